#![allow(dead_code)]

use prompt_hub::schema::ensure_schema;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use shared::dto::{AiInterface, PromptDomain, PromptInsert, PromptType};

/// Fresh in-memory SQLite database with the prompt hub schema.
pub async fn setup() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // a second pooled connection would open a different in-memory database
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    ensure_schema(&db).await.unwrap();
    db
}

pub fn insert(title: &str) -> PromptInsert {
    PromptInsert {
        title: title.into(),
        description: None,
        content: format!("{title} body"),
        prompt_type: PromptType::Functional,
        status: None,
        is_favorite: None,
        created_by: "tester".into(),
        interfaces: vec![AiInterface::Claude],
        domains: vec![PromptDomain::General],
        tags: vec![],
        change_notes: None,
    }
}

pub fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
