//! Review loop: an operator (or a script) accepts, retags or excludes each
//! classified tool before it goes into a declaration.

use crate::classify::ClassifiedTool;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

/// What to do with one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// Keep the inferred scopes.
    Accept,
    /// Keep the tool with these scopes instead of the inferred ones.
    Edit(BTreeSet<String>),
    /// Drop the tool from the declaration.
    Exclude,
}

/// Source of review decisions.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility so interactive and
/// programmatic deciders can be swapped behind `&dyn ReviewDecider`.
pub trait ReviewDecider: Send + Sync {
    /// Decide what happens to `tool`. Tools are presented in discovery order.
    fn decide<'a>(
        &'a self,
        tool: &'a ClassifiedTool,
    ) -> Pin<Box<dyn Future<Output = ReviewDecision> + Send + 'a>>;
}

/// Batch mode: accept every tool with its inferred scopes.
pub struct AcceptAll;

impl ReviewDecider for AcceptAll {
    fn decide<'a>(
        &'a self,
        _tool: &'a ClassifiedTool,
    ) -> Pin<Box<dyn Future<Output = ReviewDecision> + Send + 'a>> {
        Box::pin(async { ReviewDecision::Accept })
    }
}

/// Programmatic decisions keyed by tool name, for automated pipelines.
#[derive(Debug, Clone)]
pub struct ScriptedDecider {
    decisions: HashMap<String, ReviewDecision>,
    fallback: ReviewDecision,
}

impl Default for ScriptedDecider {
    fn default() -> Self {
        Self {
            decisions: HashMap::new(),
            fallback: ReviewDecision::Accept,
        }
    }
}

impl ScriptedDecider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Into<String>, decision: ReviewDecision) -> Self {
        self.decisions.insert(tool.into(), decision);
        self
    }

    /// Decision for tools without an explicit entry (accept by default).
    pub fn otherwise(mut self, decision: ReviewDecision) -> Self {
        self.fallback = decision;
        self
    }
}

impl ReviewDecider for ScriptedDecider {
    fn decide<'a>(
        &'a self,
        tool: &'a ClassifiedTool,
    ) -> Pin<Box<dyn Future<Output = ReviewDecision> + Send + 'a>> {
        let decision = self
            .decisions
            .get(tool.name())
            .unwrap_or(&self.fallback)
            .clone();
        Box::pin(async move { decision })
    }
}

/// Run every tool past `decider` and return only the tools that stay in.
pub async fn review(tools: Vec<ClassifiedTool>, decider: &dyn ReviewDecider) -> Vec<ClassifiedTool> {
    let mut kept = Vec::with_capacity(tools.len());

    for mut tool in tools {
        match decider.decide(&tool).await {
            ReviewDecision::Accept => {
                tool.included = true;
            }
            ReviewDecision::Edit(scopes) => {
                tracing::debug!(tool = %tool.name(), ?scopes, "Scopes edited");
                tool.scopes = scopes;
                tool.included = true;
            }
            ReviewDecision::Exclude => {
                tracing::info!("Excluded tool '{}'", tool.name());
                continue;
            }
        }
        kept.push(tool);
    }

    kept
}

/// Parse a comma-separated scope list. Blank entries are ignored.
pub fn parse_scopes(input: &str) -> BTreeSet<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
