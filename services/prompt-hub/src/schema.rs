//! Idempotent bootstrap of the prompt hub tables.

use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema};
use tracing::info;

use crate::model::{
    prompt, prompt_version, PromptDomainEntity, PromptEntity, PromptInterfaceEntity,
    PromptRelationEntity, PromptTagEntity, PromptUsageEntity, PromptVersionEntity, TagEntity,
};

async fn create_table<E: EntityTrait>(
    db: &DatabaseConnection,
    schema: &Schema,
    entity: E,
) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Creates every table and index the service needs unless it already exists.
/// Referenced tables come first so the foreign keys resolve.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, PromptEntity).await?;
    create_table(db, &schema, TagEntity).await?;
    create_table(db, &schema, PromptInterfaceEntity).await?;
    create_table(db, &schema, PromptDomainEntity).await?;
    create_table(db, &schema, PromptTagEntity).await?;
    create_table(db, &schema, PromptVersionEntity).await?;
    create_table(db, &schema, PromptUsageEntity).await?;
    create_table(db, &schema, PromptRelationEntity).await?;

    // version numbers are unique per prompt
    let versions = Index::create()
        .name("idx_prompt_versions_prompt_version")
        .table(PromptVersionEntity)
        .col(prompt_version::Column::PromptId)
        .col(prompt_version::Column::Version)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&versions)).await?;

    let recent = Index::create()
        .name("idx_prompts_updated_at")
        .table(PromptEntity)
        .col(prompt::Column::UpdatedAt)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&recent)).await?;

    info!("prompt hub schema ready");
    Ok(())
}
