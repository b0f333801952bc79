//! Data access for prompts: search, fetch, create, update, delete, favorites,
//! usage recording, version history and relation links.
//!
//! Multi-step writes run their statements one after another without a
//! transaction. Only the main-row statement can fail the call; every later
//! step is logged and reported back as a [`StepFailure`].

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::Utc;
use sea_orm::sea_query::{Expr, Func, LikeExpr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use shared::dto::{
    AiInterface, NewRelation, Prompt, PromptDomain, PromptFilters, PromptInsert,
    PromptRelation, PromptSearchResult, PromptSummary, PromptUpdate, PromptUsage, PromptVersion,
    RecordUsage, RelatedPrompt, RelatedPrompts, SaveOutcome, StepFailure, WriteStep,
};
use shared::error::{AppError, Result};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::model::{
    prompt, prompt_domain, prompt_interface, prompt_relation, prompt_tag, prompt_usage,
    prompt_version, tag, PromptActiveModel, PromptDomainActiveModel, PromptDomainEntity,
    PromptEntity, PromptInterfaceActiveModel, PromptInterfaceEntity, PromptRelationActiveModel,
    PromptRelationEntity, PromptTagActiveModel, PromptTagEntity, PromptUsageActiveModel,
    PromptUsageEntity, PromptVersionActiveModel, PromptVersionEntity, TagActiveModel, TagEntity,
};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
/// Largest offset or limit the store accepts (a signed 64-bit integer).
const MAX_OFFSET: u64 = i64::MAX as u64;
const INITIAL_VERSION_NOTE: &str = "Initial version";
const UPDATED_CONTENT_NOTE: &str = "Updated prompt content";

/* ---------------- Decoding ---------------- */

fn decode<T: FromStr>(column: &'static str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| AppError::Decode {
        column,
        value: raw.to_string(),
    })
}

#[derive(Default)]
struct Associations {
    interfaces: Vec<AiInterface>,
    domains: Vec<PromptDomain>,
    tags: Vec<String>,
}

fn into_prompt(model: prompt::Model, assoc: Associations) -> Result<Prompt> {
    Ok(Prompt {
        prompt_type: decode("prompts.type", &model.prompt_type)?,
        status: decode("prompts.status", &model.status)?,
        id: model.id,
        title: model.title,
        description: model.description,
        content: model.content,
        is_favorite: model.is_favorite,
        use_count: model.use_count,
        version: model.version,
        created_by: model.created_by,
        created_at: model.created_at,
        updated_at: model.updated_at,
        last_used_at: model.last_used_at,
        interfaces: assoc.interfaces,
        domains: assoc.domains,
        tags: assoc.tags,
    })
}

fn into_summary(model: prompt::Model) -> Result<PromptSummary> {
    Ok(PromptSummary {
        prompt_type: decode("prompts.type", &model.prompt_type)?,
        status: decode("prompts.status", &model.status)?,
        id: model.id,
        title: model.title,
        description: model.description,
    })
}

fn into_version(model: prompt_version::Model) -> PromptVersion {
    PromptVersion {
        id: model.id,
        prompt_id: model.prompt_id,
        version: model.version,
        content: model.content,
        change_notes: model.change_notes,
        changed_by: model.changed_by,
        changed_at: model.changed_at,
    }
}

fn into_relation(model: prompt_relation::Model) -> PromptRelation {
    PromptRelation {
        id: model.id,
        source_prompt_id: model.source_prompt_id,
        target_prompt_id: model.target_prompt_id,
        relation_type: model.relation_type,
        created_at: model.created_at,
    }
}

/// Loads the interface, domain and tag sets of the given prompts, each sorted.
async fn load_associations(
    db: &DatabaseConnection,
    ids: &[String],
) -> Result<HashMap<String, Associations>> {
    let mut map: HashMap<String, Associations> = HashMap::new();
    if ids.is_empty() {
        return Ok(map);
    }

    let interfaces = PromptInterfaceEntity::find()
        .filter(prompt_interface::Column::PromptId.is_in(ids.iter().cloned()))
        .all(db)
        .await?;
    for row in interfaces {
        let value = decode("prompt_interfaces.interface", &row.interface)?;
        map.entry(row.prompt_id).or_default().interfaces.push(value);
    }

    let domains = PromptDomainEntity::find()
        .filter(prompt_domain::Column::PromptId.is_in(ids.iter().cloned()))
        .all(db)
        .await?;
    for row in domains {
        let value = decode("prompt_domains.domain", &row.domain)?;
        map.entry(row.prompt_id).or_default().domains.push(value);
    }

    let links = PromptTagEntity::find()
        .filter(prompt_tag::Column::PromptId.is_in(ids.iter().cloned()))
        .all(db)
        .await?;
    let tag_ids: BTreeSet<String> = links.iter().map(|l| l.tag_id.clone()).collect();
    let names: HashMap<String, String> = if tag_ids.is_empty() {
        HashMap::new()
    } else {
        TagEntity::find()
            .filter(tag::Column::Id.is_in(tag_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect()
    };
    for link in links {
        if let Some(name) = names.get(&link.tag_id) {
            map.entry(link.prompt_id).or_default().tags.push(name.clone());
        }
    }

    for assoc in map.values_mut() {
        assoc.interfaces.sort();
        assoc.domains.sort();
        assoc.tags.sort();
    }
    Ok(map)
}

/* ---------------- Search ---------------- */

const LIKE_ESCAPE: char = '!';

/// Makes `%`, `_` and the escape character match literally in a LIKE pattern.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Store-side predicate for a filter set. Association filters become
/// `id IN (subquery)` so the total count stays exact.
pub(crate) fn search_condition(filters: &PromptFilters) -> Condition {
    let mut cond = Condition::all();

    if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        // lower() in SQLite folds ASCII only, so non-ASCII text matches
        // case-insensitively on PostgreSQL alone.
        let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
        cond = cond.add(
            Condition::any()
                .add(
                    Expr::expr(Func::lower(Expr::col((PromptEntity, prompt::Column::Title))))
                        .like(LikeExpr::new(pattern.as_str()).escape(LIKE_ESCAPE)),
                )
                .add(
                    Expr::expr(Func::lower(Expr::col((
                        PromptEntity,
                        prompt::Column::Description,
                    ))))
                    .like(LikeExpr::new(pattern.as_str()).escape(LIKE_ESCAPE)),
                ),
        );
    }
    if !filters.types.is_empty() {
        cond = cond.add(prompt::Column::PromptType.is_in(filters.types.iter().map(|t| t.to_string())));
    }
    if !filters.status.is_empty() {
        cond = cond.add(prompt::Column::Status.is_in(filters.status.iter().map(|s| s.to_string())));
    }
    if let Some(created_by) = &filters.created_by {
        cond = cond.add(prompt::Column::CreatedBy.eq(created_by.as_str()));
    }
    if filters.only_favorites {
        cond = cond.add(prompt::Column::IsFavorite.eq(true));
    }

    if !filters.interfaces.is_empty() {
        let sub = Query::select()
            .column(prompt_interface::Column::PromptId)
            .from(PromptInterfaceEntity)
            .and_where(
                prompt_interface::Column::Interface
                    .is_in(filters.interfaces.iter().map(|i| i.to_string())),
            )
            .to_owned();
        cond = cond.add(prompt::Column::Id.in_subquery(sub));
    }
    if !filters.domains.is_empty() {
        let sub = Query::select()
            .column(prompt_domain::Column::PromptId)
            .from(PromptDomainEntity)
            .and_where(
                prompt_domain::Column::Domain.is_in(filters.domains.iter().map(|d| d.to_string())),
            )
            .to_owned();
        cond = cond.add(prompt::Column::Id.in_subquery(sub));
    }
    if !filters.tags.is_empty() {
        let tag_ids = Query::select()
            .column(tag::Column::Id)
            .from(TagEntity)
            .and_where(tag::Column::Name.is_in(filters.tags.iter().cloned()))
            .to_owned();
        let sub = Query::select()
            .column(prompt_tag::Column::PromptId)
            .from(PromptTagEntity)
            .and_where(prompt_tag::Column::TagId.in_subquery(tag_ids))
            .to_owned();
        cond = cond.add(prompt::Column::Id.in_subquery(sub));
    }

    cond
}

/// Returns one page of prompts, most recently updated first, and the number
/// of prompts matching the filters across all pages.
pub async fn search_prompts(
    db: &DatabaseConnection,
    filters: &PromptFilters,
) -> Result<PromptSearchResult> {
    let page_size = filters
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_OFFSET);
    let query = PromptEntity::find().filter(search_condition(filters));

    let total_count = query.clone().count(db).await.map_err(|e| {
        error!("db error: {}", e);
        e
    })?;
    let Some(offset) = filters
        .page
        .checked_mul(page_size)
        .filter(|offset| *offset <= MAX_OFFSET)
    else {
        return Ok(PromptSearchResult {
            prompts: Vec::new(),
            total_count,
        });
    };
    let models = query
        .order_by_desc(prompt::Column::UpdatedAt)
        .order_by_desc(prompt::Column::CreatedAt)
        .order_by_asc(prompt::Column::Id)
        .offset(offset)
        .limit(page_size)
        .all(db)
        .await
        .map_err(|e| {
            error!("db error: {}", e);
            e
        })?;

    let ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
    let mut assoc = load_associations(db, &ids).await?;
    let prompts = models
        .into_iter()
        .map(|m| {
            let a = assoc.remove(&m.id).unwrap_or_default();
            into_prompt(m, a)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PromptSearchResult {
        prompts,
        total_count,
    })
}

/* ---------------- Fetch ---------------- */

/// Returns the prompt with its association sets, or `None` if it does not exist.
pub async fn get_prompt(db: &DatabaseConnection, id: &str) -> Result<Option<Prompt>> {
    let Some(model) = PromptEntity::find_by_id(id.to_string()).one(db).await.map_err(|e| {
        error!(prompt_id = id, "failed to fetch prompt: {}", e);
        e
    })?
    else {
        return Ok(None);
    };
    let mut assoc = load_associations(db, &[model.id.clone()]).await?;
    let a = assoc.remove(&model.id).unwrap_or_default();
    into_prompt(model, a).map(Some)
}

/* ---------------- Write helpers ---------------- */

fn note_failure(failures: &mut Vec<StepFailure>, prompt_id: &str, step: WriteStep, err: DbErr) {
    error!(prompt_id, ?step, "prompt write step failed: {}", err);
    failures.push(StepFailure {
        step,
        error: err.to_string(),
    });
}

fn unique<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    items.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

fn unique_tag_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

async fn insert_interfaces(
    db: &DatabaseConnection,
    prompt_id: &str,
    interfaces: &[AiInterface],
) -> std::result::Result<(), DbErr> {
    let rows: Vec<PromptInterfaceActiveModel> = unique(interfaces)
        .into_iter()
        .map(|i| PromptInterfaceActiveModel {
            prompt_id: Set(prompt_id.to_string()),
            interface: Set(i.to_string()),
        })
        .collect();
    if rows.is_empty() {
        return Ok(());
    }
    PromptInterfaceEntity::insert_many(rows)
        .exec_without_returning(db)
        .await?;
    Ok(())
}

async fn insert_domains(
    db: &DatabaseConnection,
    prompt_id: &str,
    domains: &[PromptDomain],
) -> std::result::Result<(), DbErr> {
    let rows: Vec<PromptDomainActiveModel> = unique(domains)
        .into_iter()
        .map(|d| PromptDomainActiveModel {
            prompt_id: Set(prompt_id.to_string()),
            domain: Set(d.to_string()),
        })
        .collect();
    if rows.is_empty() {
        return Ok(());
    }
    PromptDomainEntity::insert_many(rows)
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Looks a tag up by exact name and creates it when missing.
async fn resolve_tag(db: &DatabaseConnection, name: &str) -> std::result::Result<String, DbErr> {
    if let Some(existing) = TagEntity::find()
        .filter(tag::Column::Name.eq(name))
        .one(db)
        .await?
    {
        return Ok(existing.id);
    }
    let created = TagActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        name: Set(name.to_string()),
    }
    .insert(db)
    .await?;
    info!(tag = name, "created tag");
    Ok(created.id)
}

async fn link_tags(
    db: &DatabaseConnection,
    prompt_id: &str,
    names: &[String],
    failures: &mut Vec<StepFailure>,
) {
    for name in unique_tag_names(names) {
        let linked = async {
            let tag_id = resolve_tag(db, &name).await?;
            PromptTagEntity::insert(PromptTagActiveModel {
                prompt_id: Set(prompt_id.to_string()),
                tag_id: Set(tag_id),
            })
            .exec_without_returning(db)
            .await
        }
        .await;
        if let Err(e) = linked {
            note_failure(failures, prompt_id, WriteStep::Tag(name), e);
        }
    }
}

async fn insert_version(
    db: &DatabaseConnection,
    prompt_id: &str,
    version: i32,
    content: &str,
    change_notes: &str,
    changed_by: Option<String>,
) -> std::result::Result<(), DbErr> {
    PromptVersionEntity::insert(PromptVersionActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        prompt_id: Set(prompt_id.to_string()),
        version: Set(version),
        content: Set(content.to_string()),
        change_notes: Set(Some(change_notes.to_string())),
        changed_by: Set(changed_by),
        changed_at: Set(Utc::now()),
    })
    .exec_without_returning(db)
    .await?;
    Ok(())
}

/// Highest recorded version of a prompt, 0 when it has none.
async fn latest_version(db: &DatabaseConnection, prompt_id: &str) -> std::result::Result<i32, DbErr> {
    let latest = PromptVersionEntity::find()
        .filter(prompt_version::Column::PromptId.eq(prompt_id))
        .order_by_desc(prompt_version::Column::Version)
        .one(db)
        .await?;
    Ok(latest.map(|v| v.version).unwrap_or(0))
}

fn not_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{field} required")));
    }
    Ok(())
}

/// Validated and trimmed. Prompt bodies go through [`not_blank`] only, so
/// their whitespace is stored as given.
fn required(field: &str, value: &str) -> Result<String> {
    not_blank(field, value)?;
    Ok(value.trim().to_string())
}

async fn refetch(db: &DatabaseConnection, id: &str) -> Result<Prompt> {
    get_prompt(db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("prompt {id}")))
}

/* ---------------- Create ---------------- */

/// Inserts a prompt, its association rows and version 1, in that order.
pub async fn create_prompt(db: &DatabaseConnection, input: PromptInsert) -> Result<SaveOutcome> {
    let title = required("title", &input.title)?;
    not_blank("content", &input.content)?;
    let content = input.content;
    let created_by = required("created_by", &input.created_by)?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let record = PromptActiveModel {
        id: Set(id.clone()),
        title: Set(title),
        description: Set(input.description.clone()),
        content: Set(content.clone()),
        prompt_type: Set(input.prompt_type.to_string()),
        status: Set(input.status.unwrap_or_default().to_string()),
        is_favorite: Set(input.is_favorite.unwrap_or(false)),
        use_count: Set(0),
        version: Set(1),
        created_by: Set(created_by.clone()),
        created_at: Set(now),
        updated_at: Set(Some(now)),
        last_used_at: Set(None),
    };
    PromptEntity::insert(record)
        .exec_without_returning(db)
        .await
        .map_err(|e| {
            error!("failed to insert prompt: {}", e);
            e
        })?;

    let mut failures = Vec::new();
    if let Err(e) = insert_interfaces(db, &id, &input.interfaces).await {
        note_failure(&mut failures, &id, WriteStep::Interfaces, e);
    }
    if let Err(e) = insert_domains(db, &id, &input.domains).await {
        note_failure(&mut failures, &id, WriteStep::Domains, e);
    }
    link_tags(db, &id, &input.tags, &mut failures).await;

    let note = input.change_notes.as_deref().unwrap_or(INITIAL_VERSION_NOTE);
    if let Err(e) = insert_version(db, &id, 1, &content, note, Some(created_by)).await {
        note_failure(&mut failures, &id, WriteStep::Version, e);
    }

    info!(prompt_id = %id, failed_steps = failures.len(), "created prompt");
    Ok(SaveOutcome {
        prompt: refetch(db, &id).await?,
        failed_steps: failures,
    })
}

/* ---------------- Update ---------------- */

/// Applies a partial update. Returns `None` when the prompt does not exist.
pub async fn update_prompt(
    db: &DatabaseConnection,
    id: &str,
    patch: PromptUpdate,
) -> Result<Option<SaveOutcome>> {
    let mut update = PromptEntity::update_many()
        .col_expr(prompt::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(prompt::Column::Id.eq(id));
    if let Some(title) = &patch.title {
        update = update.col_expr(prompt::Column::Title, Expr::value(required("title", title)?));
    }
    if let Some(description) = &patch.description {
        update = update.col_expr(prompt::Column::Description, Expr::value(description.clone()));
    }
    if let Some(content) = &patch.content {
        not_blank("content", content)?;
        update = update.col_expr(prompt::Column::Content, Expr::value(content.clone()));
    }
    if let Some(status) = patch.status {
        update = update.col_expr(prompt::Column::Status, Expr::value(status.to_string()));
    }
    if let Some(is_favorite) = patch.is_favorite {
        update = update.col_expr(prompt::Column::IsFavorite, Expr::value(is_favorite));
    }

    let res = update.exec(db).await.map_err(|e| {
        error!(prompt_id = id, "failed to update prompt: {}", e);
        e
    })?;
    if res.rows_affected == 0 {
        return Ok(None);
    }

    let mut failures = Vec::new();

    if let Some(content) = &patch.content {
        let note = patch.change_notes.as_deref().unwrap_or(UPDATED_CONTENT_NOTE);
        let bumped = async {
            let next = latest_version(db, id).await? + 1;
            insert_version(db, id, next, content, note, patch.changed_by.clone()).await?;
            Ok::<i32, DbErr>(next)
        }
        .await;
        match bumped {
            Ok(next) => {
                let written = PromptEntity::update_many()
                    .col_expr(prompt::Column::Version, Expr::value(next))
                    .filter(prompt::Column::Id.eq(id))
                    .exec(db)
                    .await;
                if let Err(e) = written {
                    note_failure(&mut failures, id, WriteStep::Version, e);
                }
            }
            Err(e) => note_failure(&mut failures, id, WriteStep::Version, e),
        }
    }

    if let Some(interfaces) = patch.interfaces.as_ref().filter(|l| !l.is_empty()) {
        let replaced = async {
            PromptInterfaceEntity::delete_many()
                .filter(prompt_interface::Column::PromptId.eq(id))
                .exec(db)
                .await?;
            insert_interfaces(db, id, interfaces).await
        }
        .await;
        if let Err(e) = replaced {
            note_failure(&mut failures, id, WriteStep::Interfaces, e);
        }
    }

    if let Some(domains) = patch.domains.as_ref().filter(|l| !l.is_empty()) {
        let replaced = async {
            PromptDomainEntity::delete_many()
                .filter(prompt_domain::Column::PromptId.eq(id))
                .exec(db)
                .await?;
            insert_domains(db, id, domains).await
        }
        .await;
        if let Err(e) = replaced {
            note_failure(&mut failures, id, WriteStep::Domains, e);
        }
    }

    if let Some(tags) = patch.tags.as_ref().filter(|l| !l.is_empty()) {
        let cleared = PromptTagEntity::delete_many()
            .filter(prompt_tag::Column::PromptId.eq(id))
            .exec(db)
            .await;
        match cleared {
            Ok(_) => link_tags(db, id, tags, &mut failures).await,
            Err(e) => note_failure(&mut failures, id, WriteStep::Tags, e),
        }
    }

    info!(prompt_id = id, failed_steps = failures.len(), "updated prompt");
    Ok(Some(SaveOutcome {
        prompt: refetch(db, id).await?,
        failed_steps: failures,
    }))
}

/* ---------------- Favorite, usage, delete ---------------- */

/// Writes `is_favorite`. Returns `false` when no prompt has this id.
pub async fn set_favorite(db: &DatabaseConnection, id: &str, is_favorite: bool) -> Result<bool> {
    let res = PromptEntity::update_many()
        .col_expr(prompt::Column::IsFavorite, Expr::value(is_favorite))
        .filter(prompt::Column::Id.eq(id))
        .exec(db)
        .await
        .map_err(|e| {
            error!(prompt_id = id, "failed to set favorite: {}", e);
            e
        })?;
    Ok(res.rows_affected > 0)
}

/// Appends a usage event and bumps the prompt's usage counter. The two
/// writes are independent; failures are reported, never raised.
pub async fn record_usage(
    db: &DatabaseConnection,
    prompt_id: &str,
    usage: RecordUsage,
) -> Vec<StepFailure> {
    let mut failures = Vec::new();
    let now = Utc::now();

    let event = PromptUsageEntity::insert(PromptUsageActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        prompt_id: Set(prompt_id.to_string()),
        version: Set(usage.version),
        user_id: Set(usage.user_id),
        context: Set(usage.context),
        result: Set(usage.result),
        used_at: Set(now),
    })
    .exec_without_returning(db)
    .await;
    if let Err(e) = event {
        note_failure(&mut failures, prompt_id, WriteStep::UsageEvent, e);
    }

    let counted = PromptEntity::update_many()
        .col_expr(
            prompt::Column::UseCount,
            Expr::col(prompt::Column::UseCount).add(1),
        )
        .col_expr(prompt::Column::LastUsedAt, Expr::value(now))
        .filter(prompt::Column::Id.eq(prompt_id))
        .exec(db)
        .await;
    match counted {
        Ok(res) if res.rows_affected == 0 => {
            warn!(prompt_id, "usage recorded for unknown prompt");
        }
        Ok(_) => {}
        Err(e) => note_failure(&mut failures, prompt_id, WriteStep::UseCount, e),
    }

    failures
}

/// Deletes the prompt row. Dependent rows follow the store's foreign keys.
pub async fn delete_prompt(db: &DatabaseConnection, id: &str) -> Result<bool> {
    let res = PromptEntity::delete_many()
        .filter(prompt::Column::Id.eq(id))
        .exec(db)
        .await
        .map_err(|e| {
            error!(prompt_id = id, "failed to delete prompt: {}", e);
            e
        })?;
    if res.rows_affected > 0 {
        info!(prompt_id = id, "deleted prompt");
    }
    Ok(res.rows_affected > 0)
}

/* ---------------- History ---------------- */

pub async fn prompt_versions(db: &DatabaseConnection, prompt_id: &str) -> Result<Vec<PromptVersion>> {
    let rows = PromptVersionEntity::find()
        .filter(prompt_version::Column::PromptId.eq(prompt_id))
        .order_by_desc(prompt_version::Column::Version)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(into_version).collect())
}

pub async fn usage_history(db: &DatabaseConnection, prompt_id: &str) -> Result<Vec<PromptUsage>> {
    let rows = PromptUsageEntity::find()
        .filter(prompt_usage::Column::PromptId.eq(prompt_id))
        .order_by_desc(prompt_usage::Column::UsedAt)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|u| PromptUsage {
            id: u.id,
            prompt_id: u.prompt_id,
            version: u.version,
            user_id: u.user_id,
            context: u.context,
            result: u.result,
            used_at: u.used_at,
        })
        .collect())
}

/* ---------------- Relations ---------------- */

async fn related_side(
    db: &DatabaseConnection,
    edges: Vec<prompt_relation::Model>,
    other_end: fn(&prompt_relation::Model) -> &String,
) -> Result<Vec<RelatedPrompt>> {
    let ids: BTreeSet<String> = edges.iter().map(|e| other_end(e).clone()).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let summaries: HashMap<String, prompt::Model> = PromptEntity::find()
        .filter(prompt::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut related = Vec::with_capacity(edges.len());
    for edge in edges {
        let Some(model) = summaries.get(other_end(&edge)) else {
            warn!(relation_id = %edge.id, "relation points at a missing prompt");
            continue;
        };
        related.push(RelatedPrompt {
            relation_type: edge.relation_type,
            prompt: into_summary(model.clone())?,
        });
    }
    Ok(related)
}

/// Prompts linked to this one: `sources` point at it, `targets` are pointed at.
pub async fn related_prompts(db: &DatabaseConnection, prompt_id: &str) -> Result<RelatedPrompts> {
    let incoming = PromptRelationEntity::find()
        .filter(prompt_relation::Column::TargetPromptId.eq(prompt_id))
        .order_by_asc(prompt_relation::Column::CreatedAt)
        .all(db)
        .await
        .map_err(|e| {
            error!(prompt_id, "failed to fetch source relations: {}", e);
            e
        })?;
    let outgoing = PromptRelationEntity::find()
        .filter(prompt_relation::Column::SourcePromptId.eq(prompt_id))
        .order_by_asc(prompt_relation::Column::CreatedAt)
        .all(db)
        .await
        .map_err(|e| {
            error!(prompt_id, "failed to fetch target relations: {}", e);
            e
        })?;

    Ok(RelatedPrompts {
        sources: related_side(db, incoming, |e| &e.source_prompt_id).await?,
        targets: related_side(db, outgoing, |e| &e.target_prompt_id).await?,
    })
}

/// Stores a directed relation between two existing prompts.
pub async fn link_prompts(db: &DatabaseConnection, input: NewRelation) -> Result<PromptRelation> {
    let relation_type = required("relation_type", &input.relation_type)?;
    for id in [&input.source_prompt_id, &input.target_prompt_id] {
        if PromptEntity::find_by_id(id.clone()).one(db).await?.is_none() {
            return Err(AppError::NotFound(format!("prompt {id}")));
        }
    }
    let model = PromptRelationActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        source_prompt_id: Set(input.source_prompt_id),
        target_prompt_id: Set(input.target_prompt_id),
        relation_type: Set(relation_type),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;
    info!(relation_id = %model.id, "linked prompts");
    Ok(into_relation(model))
}

pub async fn unlink_prompts(db: &DatabaseConnection, relation_id: &str) -> Result<bool> {
    let res = PromptRelationEntity::delete_many()
        .filter(prompt_relation::Column::Id.eq(relation_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, QueryTrait};
    use shared::dto::{PromptStatus, PromptType};

    fn sql(filters: &PromptFilters) -> String {
        PromptEntity::find()
            .filter(search_condition(filters))
            .build(DatabaseBackend::Postgres)
            .to_string()
    }

    #[test]
    fn empty_filters_have_no_predicate() {
        let sql = sql(&PromptFilters::default());
        assert!(!sql.contains("LIKE"), "{sql}");
        assert!(!sql.contains(" IN "), "{sql}");
    }

    #[test]
    fn search_is_lowercased_substring_on_title_or_description() {
        let filters = PromptFilters {
            search: Some("  Code Review ".into()),
            ..Default::default()
        };
        let sql = sql(&filters);
        assert!(sql.contains("LIKE '%code review%'"), "{sql}");
        assert!(sql.contains("\"title\""));
        assert!(sql.contains("\"description\""));
        assert!(sql.contains(" OR "));
    }

    #[test]
    fn scalar_and_association_filters() {
        let filters = PromptFilters {
            types: vec![PromptType::Functional],
            status: vec![PromptStatus::Active, PromptStatus::Draft],
            interfaces: vec![AiInterface::Claude],
            tags: vec!["rust".into()],
            only_favorites: true,
            ..Default::default()
        };
        let sql = sql(&filters);
        assert!(sql.contains("'FUNCTIONAL'"), "{sql}");
        assert!(sql.contains("'ACTIVE'"));
        assert!(sql.contains("\"prompt_interfaces\""));
        assert!(sql.contains("'CLAUDE'"));
        assert!(sql.contains("\"prompt_tags\""));
        assert!(sql.contains("'rust'"));
        assert!(sql.contains("\"is_favorite\""));
    }

    #[test]
    fn tag_names_are_trimmed_and_deduplicated() {
        let names = vec![" b ".to_string(), "a".into(), "b".into(), "  ".into()];
        assert_eq!(unique_tag_names(&names), vec!["a".to_string(), "b".to_string()]);
    }

    fn prompt_row(prompt_type: &str, version: i32) -> prompt::Model {
        prompt::Model {
            id: "p1".into(),
            title: "t".into(),
            description: None,
            content: "c".into(),
            prompt_type: prompt_type.into(),
            status: "DRAFT".into(),
            is_favorite: false,
            use_count: 0,
            version,
            created_by: "u".into(),
            created_at: Utc::now(),
            updated_at: None,
            last_used_at: None,
        }
    }

    fn exec_ok() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    /// Query results for a refetch: the prompt row and three empty association sets.
    fn refetched(db: MockDatabase, row: prompt::Model) -> MockDatabase {
        db.append_query_results([vec![row]])
            .append_query_results([Vec::<prompt_interface::Model>::new()])
            .append_query_results([Vec::<prompt_domain::Model>::new()])
            .append_query_results([Vec::<prompt_tag::Model>::new()])
    }

    fn logged(db: DatabaseConnection) -> Vec<String> {
        db.into_transaction_log()
            .iter()
            .map(|t| format!("{t:?}"))
            .collect()
    }

    fn insert(content: &str) -> PromptInsert {
        PromptInsert {
            title: "Title".into(),
            description: None,
            content: content.into(),
            prompt_type: PromptType::Functional,
            status: None,
            is_favorite: None,
            created_by: "u".into(),
            interfaces: vec![],
            domains: vec![],
            tags: vec![],
            change_notes: None,
        }
    }

    #[tokio::test]
    async fn unknown_enum_text_is_a_decode_error() {
        let db = refetched(
            MockDatabase::new(DatabaseBackend::Postgres),
            prompt_row("NOT_A_TYPE", 1),
        )
        .into_connection();

        let err = get_prompt(&db, "p1").await.unwrap_err();
        assert!(matches!(err, AppError::Decode { column: "prompts.type", .. }));
    }

    #[tokio::test]
    async fn failed_interface_insert_is_reported_and_later_steps_still_run() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec_ok()])
            .append_exec_errors([DbErr::Custom("interfaces unavailable".into())])
            .append_exec_results([exec_ok(), exec_ok()]);
        let db = refetched(db, prompt_row("FUNCTIONAL", 1)).into_connection();

        let mut input = insert("body");
        input.interfaces = vec![AiInterface::Claude];
        input.domains = vec![PromptDomain::General];
        let outcome = create_prompt(&db, input).await.unwrap();

        assert_eq!(outcome.failed_steps.len(), 1);
        assert_eq!(outcome.failed_steps[0].step, WriteStep::Interfaces);
        assert!(outcome.failed_steps[0].error.contains("interfaces unavailable"));
        assert_eq!(outcome.prompt.version, 1);

        let log = logged(db);
        assert!(log.iter().any(|t| t.contains("prompt_domains")));
        assert!(log.iter().any(|t| t.contains("prompt_versions") && t.contains("INSERT")));
        assert!(!log.iter().any(|t| t.contains("DELETE")));
    }

    #[tokio::test]
    async fn failed_version_insert_skips_the_version_bump() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec_ok()])
            .append_query_results([vec![prompt_version::Model {
                id: "v1".into(),
                prompt_id: "p1".into(),
                version: 1,
                content: "c".into(),
                change_notes: None,
                changed_by: None,
                changed_at: Utc::now(),
            }]])
            .append_exec_errors([DbErr::Custom("versions unavailable".into())]);
        let db = refetched(db, prompt_row("FUNCTIONAL", 1)).into_connection();

        let patch = PromptUpdate {
            content: Some("new body".into()),
            ..Default::default()
        };
        let outcome = update_prompt(&db, "p1", patch).await.unwrap().unwrap();

        assert_eq!(outcome.failed_steps.len(), 1);
        assert_eq!(outcome.failed_steps[0].step, WriteStep::Version);
        assert_eq!(outcome.prompt.version, 1);

        let updates = logged(db).iter().filter(|t| t.contains("UPDATE")).count();
        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn transport_failure_propagates_from_delete_and_favorite() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_errors([
                DbErr::Custom("connection reset".into()),
                DbErr::Custom("connection reset".into()),
            ])
            .into_connection();

        let err = delete_prompt(&db, "p1").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        let err = set_favorite(&db, "p1", true).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn like_wildcards_in_search_text_are_escaped() {
        assert_eq!(escape_like("50%_off!"), "50!%!_off!!");
        let filters = PromptFilters {
            search: Some("A_C".into()),
            ..Default::default()
        };
        let sql = sql(&filters);
        assert!(sql.contains("LIKE '%a!_c%' ESCAPE '!'"), "{sql}");
    }

    #[test]
    fn search_text_is_lowercased_beyond_ascii() {
        let filters = PromptFilters {
            search: Some("ÉTUDE".into()),
            ..Default::default()
        };
        assert!(sql(&filters).contains("'%étude%'"));
    }

    #[tokio::test]
    async fn content_whitespace_is_kept_but_blank_content_is_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let err = create_prompt(&db, insert(" \n\t")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let patch = PromptUpdate {
            content: Some("   ".into()),
            ..Default::default()
        };
        let err = update_prompt(&db, "p1", patch).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_propagates_from_fetch() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom("connection reset".into())])
            .into_connection();

        let err = get_prompt(&db, "p1").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[tokio::test]
    async fn blank_title_is_rejected_before_any_write() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mut input = insert("body");
        input.title = "   ".into();
        let err = create_prompt(&db, input).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(db.into_transaction_log().is_empty());
    }
}
