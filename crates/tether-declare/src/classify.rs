//! Capability classifier: infers access scopes and a risk flag from a tool's
//! name and description.
//!
//! Pure keyword matching over a normalized word list. The same input always
//! produces the same output, and a tool may collect scopes from several groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tether_mcp::DiscoveredTool;

pub const SCOPE_FILESYSTEM_READ: &str = "filesystem:read";
pub const SCOPE_FILESYSTEM_WRITE: &str = "filesystem:write";
pub const SCOPE_NETWORK_OUTBOUND: &str = "network:outbound";

/// Shown in place of an empty scope set.
pub const NO_PERMISSIONS: &str = "no permissions";

struct ScopeGroup {
    scope: &'static str,
    keywords: &'static [&'static str],
}

/// Checked in order; every matching group contributes its scope.
const SCOPE_GROUPS: &[ScopeGroup] = &[
    ScopeGroup {
        scope: SCOPE_FILESYSTEM_READ,
        keywords: &[
            "read", "get", "list", "view", "show", "search", "find", "load", "open", "cat",
            "stat", "grep", "glob", "browse", "query", "inspect", "directory", "tree",
        ],
    },
    ScopeGroup {
        scope: SCOPE_FILESYSTEM_WRITE,
        keywords: &[
            "write", "create", "update", "delete", "remove", "edit", "modify", "save", "move",
            "rename", "copy", "append", "insert", "upload", "mkdir", "rm", "overwrite",
        ],
    },
    ScopeGroup {
        scope: SCOPE_NETWORK_OUTBOUND,
        keywords: &[
            "http", "https", "url", "fetch", "download", "request", "api", "web", "network",
            "socket", "curl", "endpoint", "webhook", "email", "send", "post",
        ],
    },
];

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "exec", "execute", "shell", "command", "eval", "spawn", "subprocess", "process", "sudo",
    "bash", "terminal", "script", "system", "kill",
];

const INFLECTIONS: &[&str] = &["s", "es", "ed", "ing", "er"];

/// A discovered tool plus what the classifier (and later the reviewer)
/// decided about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedTool {
    #[serde(flatten)]
    pub tool: DiscoveredTool,
    pub scopes: BTreeSet<String>,
    pub high_risk: bool,
    pub included: bool,
}

impl ClassifiedTool {
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    /// Scopes for display, or "no permissions".
    pub fn scope_label(&self) -> String {
        scope_label(&self.scopes)
    }
}

/// Classify one tool. New tools start out included.
pub fn classify(tool: &DiscoveredTool) -> ClassifiedTool {
    let words = tokenize(&format!("{} {}", tool.name, tool.description));

    let scopes = SCOPE_GROUPS
        .iter()
        .filter(|group| matches_any(&words, group.keywords))
        .map(|group| group.scope.to_string())
        .collect();

    ClassifiedTool {
        tool: tool.clone(),
        scopes,
        high_risk: matches_any(&words, HIGH_RISK_KEYWORDS),
        included: true,
    }
}

pub fn classify_all(tools: &[DiscoveredTool]) -> Vec<ClassifiedTool> {
    tools.iter().map(classify).collect()
}

pub fn scope_label(scopes: &BTreeSet<String>) -> String {
    if scopes.is_empty() {
        NO_PERMISSIONS.to_string()
    } else {
        scopes.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Lowercase words, split on non-alphanumerics and camelCase boundaries.
/// An acronym ends before its last capital when a lowercase letter follows,
/// so `HTTPGet` gives `http`, `get`.
fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    let mut prev_upper = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if !c.is_alphanumeric() {
            flush(&mut words, &mut current);
            prev_lower = false;
            prev_upper = false;
            continue;
        }
        let next_lower = chars.peek().is_some_and(|n| n.is_lowercase());
        if c.is_uppercase() && (prev_lower || (prev_upper && next_lower)) {
            flush(&mut words, &mut current);
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        prev_upper = c.is_uppercase();
        current.extend(c.to_lowercase());
    }
    flush(&mut words, &mut current);
    words
}

fn flush(words: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

fn matches_any(words: &[String], keywords: &[&str]) -> bool {
    words
        .iter()
        .any(|word| keywords.iter().any(|kw| matches_keyword(word, kw)))
}

/// Exact match, or the keyword plus a plain inflection ("reads", "fetched",
/// "writing").
fn matches_keyword(word: &str, keyword: &str) -> bool {
    if word == keyword {
        return true;
    }
    // "write" also inflects as "writ" + "ing"
    [Some(keyword), keyword.strip_suffix('e')]
        .into_iter()
        .flatten()
        .any(|stem| {
            word.strip_prefix(stem)
                .is_some_and(|rest| INFLECTIONS.contains(&rest))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> DiscoveredTool {
        DiscoveredTool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn scopes(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn read_file_is_read_only_and_low_risk() {
        let classified = classify(&tool("read_file", "Read a file from disk"));
        assert_eq!(classified.scopes, scopes(&[SCOPE_FILESYSTEM_READ]));
        assert!(!classified.high_risk);
        assert!(classified.included);
    }

    #[test]
    fn execute_shell_is_high_risk() {
        let classified = classify(&tool("execute_shell", "Run a shell command"));
        assert!(classified.high_risk);
        assert!(!classified.scopes.contains(SCOPE_FILESYSTEM_WRITE));
    }

    #[test]
    fn multiple_groups_union() {
        let classified = classify(&tool(
            "sync_file",
            "Reads a local file and writes it to a remote URL",
        ));
        assert_eq!(
            classified.scopes,
            scopes(&[
                SCOPE_FILESYSTEM_READ,
                SCOPE_FILESYSTEM_WRITE,
                SCOPE_NETWORK_OUTBOUND
            ])
        );
    }

    #[test]
    fn unmatched_tool_has_no_permissions() {
        let classified = classify(&tool("add", "Add two numbers"));
        assert!(classified.scopes.is_empty());
        assert!(!classified.high_risk);
        assert_eq!(classified.scope_label(), "no permissions");
    }

    #[test]
    fn classification_is_deterministic() {
        let t = tool("fetchUrl", "Fetches a web page and returns markdown");
        let first = classify(&t);
        for _ in 0..10 {
            assert_eq!(classify(&t), first);
        }
        assert_eq!(first.scopes, scopes(&[SCOPE_NETWORK_OUTBOUND]));
    }

    #[test]
    fn camel_case_names_are_split() {
        assert_eq!(tokenize("writeFile"), vec!["write", "file"]);
        assert_eq!(tokenize("list_dir2Items"), vec!["list", "dir2", "items"]);
        let classified = classify(&tool("writeFile", ""));
        assert_eq!(classified.scopes, scopes(&[SCOPE_FILESYSTEM_WRITE]));
    }

    #[test]
    fn acronyms_end_before_the_next_word() {
        assert_eq!(tokenize("HTTPGet"), vec!["http", "get"]);
        assert_eq!(tokenize("parseJSONFile"), vec!["parse", "json", "file"]);
        assert_eq!(tokenize("getURL"), vec!["get", "url"]);
        assert_eq!(tokenize("HTTP"), vec!["http"]);

        let classified = classify(&tool("HTTPGet", ""));
        assert_eq!(
            classified.scopes,
            scopes(&[SCOPE_FILESYSTEM_READ, SCOPE_NETWORK_OUTBOUND])
        );
    }

    #[test]
    fn keywords_do_not_match_inside_other_words() {
        // "thread" contains "read", "catalog" contains "cat"
        let classified = classify(&tool("thread_catalog", "Thread catalog"));
        assert!(classified.scopes.is_empty());
        // "killer" is kill + er, "ecosystem" is not "system"
        assert!(classify(&tool("killer_app", "")).high_risk);
        assert!(!classify(&tool("ecosystem_stats", "")).high_risk);
    }

    #[test]
    fn inflections_match() {
        assert!(matches_keyword("reading", "read"));
        assert!(matches_keyword("writing", "write"));
        assert!(matches_keyword("executes", "execute"));
        assert!(matches_keyword("executed", "execute"));
        assert!(matches_keyword("processes", "process"));
        assert!(matches_keyword("fetched", "fetch"));
        assert!(!matches_keyword("readme", "read"));
        assert!(!matches_keyword("re", "read"));
    }

    #[test]
    fn label_is_sorted_and_joined() {
        let set = scopes(&[SCOPE_NETWORK_OUTBOUND, SCOPE_FILESYSTEM_READ]);
        assert_eq!(scope_label(&set), "filesystem:read, network:outbound");
    }

    #[test]
    fn serializes_flat_with_camel_case() {
        let classified = classify(&tool("read_file", "Read a file"));
        let value = serde_json::to_value(&classified).unwrap();
        assert_eq!(value["name"], "read_file");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert_eq!(value["highRisk"], false);
        assert_eq!(value["scopes"], json!(["filesystem:read"]));
    }
}
