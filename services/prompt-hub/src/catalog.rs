//! Option lists for the prompt filter UI.

use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, QuerySelect};
use shared::dto::{AiInterface, FilterOptions, PromptDomain, Tag};
use shared::error::{AppError, Result};
use tracing::error;

use crate::model::{
    prompt_domain, prompt_interface, tag, PromptDomainEntity, PromptInterfaceEntity, TagEntity,
};

fn parse_all<T: std::str::FromStr + Ord>(column: &'static str, raw: Vec<String>) -> Result<Vec<T>> {
    let mut values = raw
        .into_iter()
        .map(|v| {
            v.parse().map_err(|_| AppError::Decode { column, value: v })
        })
        .collect::<Result<Vec<T>>>()?;
    values.sort();
    Ok(values)
}

/// Interfaces and domains currently attached to at least one prompt, plus
/// every known tag.
pub async fn filter_options(db: &DatabaseConnection) -> Result<FilterOptions> {
    let interfaces: Vec<String> = PromptInterfaceEntity::find()
        .select_only()
        .column(prompt_interface::Column::Interface)
        .distinct()
        .into_tuple::<String>()
        .all(db)
        .await
        .map_err(|e| {
            error!("failed to fetch interfaces: {}", e);
            e
        })?;

    let domains: Vec<String> = PromptDomainEntity::find()
        .select_only()
        .column(prompt_domain::Column::Domain)
        .distinct()
        .into_tuple::<String>()
        .all(db)
        .await
        .map_err(|e| {
            error!("failed to fetch domains: {}", e);
            e
        })?;

    let tags = TagEntity::find()
        .order_by_asc(tag::Column::Name)
        .all(db)
        .await
        .map_err(|e| {
            error!("failed to fetch tags: {}", e);
            e
        })?;

    Ok(FilterOptions {
        interfaces: parse_all::<AiInterface>("prompt_interfaces.interface", interfaces)?,
        domains: parse_all::<PromptDomain>("prompt_domains.domain", domains)?,
        tags: tags
            .into_iter()
            .map(|t| Tag { id: t.id, name: t.name })
            .collect(),
    })
}
