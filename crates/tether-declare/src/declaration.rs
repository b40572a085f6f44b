//! The declaration: the operator-approved tool set plus its identity.

use crate::classify::ClassifiedTool;
use crate::error::DeclareError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tether_mcp::ChildCommand;

pub const DECLARATION_FILE: &str = "declaration.json";

/// Identity fields for a generated wrapper. All four are required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarationMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: String,
}

impl DeclarationMeta {
    /// Fail on the first missing or blank field.
    pub fn validate(&self) -> Result<(), DeclareError> {
        let fields = [
            ("id", &self.id),
            ("name", &self.name),
            ("description", &self.description),
            ("author", &self.author),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(DeclareError::MissingField(field));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    #[serde(flatten)]
    pub meta: DeclarationMeta,
    /// Child command line the wrapper runs.
    pub command: String,
    pub generated_at: DateTime<Utc>,
    pub tools: Vec<ClassifiedTool>,
}

impl Declaration {
    /// Build from reviewed tools. Tools not marked included are dropped; if
    /// none remain the declaration is refused.
    pub fn build(
        meta: DeclarationMeta,
        command: &ChildCommand,
        reviewed: Vec<ClassifiedTool>,
    ) -> Result<Self, DeclareError> {
        meta.validate()?;

        let tools: Vec<ClassifiedTool> = reviewed.into_iter().filter(|t| t.included).collect();
        if tools.is_empty() {
            return Err(DeclareError::AllToolsExcluded);
        }

        Ok(Self {
            meta,
            command: command.to_string(),
            generated_at: Utc::now(),
            tools,
        })
    }

    /// Union of every declared tool's scopes.
    pub fn scopes(&self) -> BTreeSet<String> {
        self.tools
            .iter()
            .flat_map(|t| t.scopes.iter().cloned())
            .collect()
    }

    pub fn high_risk_tools(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| t.high_risk)
            .map(|t| t.name())
            .collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, DeclareError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, DeclareError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
