//! Record shapes exchanged between the data-access layer and the front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/* ---------- Enumerations ---------- */

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptType {
    Functional,
    System,
    Template,
    Chain,
    Agent,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
}

/// AI surface a prompt is known to work with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AiInterface {
    Claude,
    Chatgpt,
    Gemini,
    Vscode,
    Other,
}

/// Use-case category of a prompt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptDomain {
    General,
    Coding,
    Research,
    DataAnalysis,
    Content,
    SystemDesign,
}

/* ---------- Prompts ---------- */

/// A prompt with its interface, domain and tag sets flattened from the join tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub prompt_type: PromptType,
    pub status: PromptStatus,
    pub is_favorite: bool,
    pub use_count: i32,
    pub version: i32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub interfaces: Vec<AiInterface>,
    pub domains: Vec<PromptDomain>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptInsert {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub prompt_type: PromptType,
    #[serde(default)]
    pub status: Option<PromptStatus>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
    pub created_by: String,
    #[serde(default)]
    pub interfaces: Vec<AiInterface>,
    #[serde(default)]
    pub domains: Vec<PromptDomain>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Note stored with version 1.
    #[serde(default)]
    pub change_notes: Option<String>,
}

/// Partial update. `None` fields are left untouched; an empty association
/// list is treated like an absent one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub status: Option<PromptStatus>,
    pub is_favorite: Option<bool>,
    pub interfaces: Option<Vec<AiInterface>>,
    pub domains: Option<Vec<PromptDomain>>,
    pub tags: Option<Vec<String>>,
    pub change_notes: Option<String>,
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PromptFilters {
    pub search: Option<String>,
    pub types: Vec<PromptType>,
    pub status: Vec<PromptStatus>,
    pub interfaces: Vec<AiInterface>,
    pub domains: Vec<PromptDomain>,
    pub tags: Vec<String>,
    pub created_by: Option<String>,
    pub only_favorites: bool,
    /// Zero-based page index.
    pub page: u64,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptSearchResult {
    pub prompts: Vec<Prompt>,
    pub total_count: u64,
}

/* ---------- Multi-step write reporting ---------- */

/// Sub-step of a multi-step write that may fail without aborting the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "target", rename_all = "snake_case")]
pub enum WriteStep {
    Interfaces,
    Domains,
    /// Clearing the tag set before re-linking.
    Tags,
    Tag(String),
    Version,
    UsageEvent,
    UseCount,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    #[serde(flatten)]
    pub step: WriteStep,
    pub error: String,
}

/// Result of a create or update: the re-fetched prompt plus every follow-up
/// step that failed.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub prompt: Prompt,
    pub failed_steps: Vec<StepFailure>,
}

/* ---------- Catalog ---------- */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub interfaces: Vec<AiInterface>,
    pub domains: Vec<PromptDomain>,
    pub tags: Vec<Tag>,
}

/* ---------- History, usage, relations ---------- */

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptVersion {
    pub id: String,
    pub prompt_id: String,
    pub version: i32,
    pub content: String,
    pub change_notes: Option<String>,
    pub changed_by: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordUsage {
    pub version: i32,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptUsage {
    pub id: String,
    pub prompt_id: String,
    pub version: i32,
    pub user_id: Option<String>,
    pub context: Option<serde_json::Value>,
    pub result: Option<String>,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub prompt_type: PromptType,
    pub status: PromptStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedPrompt {
    pub relation_type: String,
    pub prompt: PromptSummary,
}

/// `sources` point at the prompt, `targets` are pointed at by it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelatedPrompts {
    pub sources: Vec<RelatedPrompt>,
    pub targets: Vec<RelatedPrompt>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRelation {
    pub source_prompt_id: String,
    pub target_prompt_id: String,
    pub relation_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRelation {
    pub id: String,
    pub source_prompt_id: String,
    pub target_prompt_id: String,
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn enum_text_matches_serde() {
        for domain in PromptDomain::iter() {
            let json = serde_json::to_string(&domain).unwrap();
            assert_eq!(json, format!("\"{domain}\""));
        }
        assert_eq!(PromptDomain::DataAnalysis.to_string(), "DATA_ANALYSIS");
        assert_eq!(AiInterface::from_str("CHATGPT").unwrap(), AiInterface::Chatgpt);
        assert!(PromptStatus::from_str("draft").is_err());
    }

    #[test]
    fn update_payload_leaves_missing_fields_empty() {
        let update: PromptUpdate =
            serde_json::from_str(r#"{"title":"New","tags":[]}"#).unwrap();
        assert_eq!(update.title.as_deref(), Some("New"));
        assert!(update.content.is_none());
        assert_eq!(update.tags, Some(vec![]));
        assert!(update.interfaces.is_none());
    }

    #[test]
    fn step_failure_serializes_flat() {
        let failure = StepFailure {
            step: WriteStep::Tag("rust".into()),
            error: "boom".into(),
        };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"step": "tag", "target": "rust", "error": "boom"})
        );
    }
}
