//! REST API over the prompt data-access layer.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use shared::dto::{
    FilterOptions, NewRelation, Prompt, PromptFilters, PromptInsert, PromptRelation,
    PromptSearchResult, PromptUpdate, PromptUsage, PromptVersion, RecordUsage, RelatedPrompts,
    SaveOutcome, StepFailure,
};
use shared::error::AppError;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::{catalog, prompts};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub max_page_size: u64,
}

/// Simple liveness endpoint for orchestration.
async fn health() -> &'static str {
    "OK"
}

/* ---------------- DTOs ---------------- */

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Query string of the list endpoint. List-valued filters are comma separated.
#[derive(Deserialize, Default)]
struct ListParams {
    search: Option<String>,
    types: Option<String>,
    status: Option<String>,
    interfaces: Option<String>,
    domains: Option<String>,
    tags: Option<String>,
    created_by: Option<String>,
    #[serde(default)]
    favorites: bool,
    #[serde(default)]
    page: u64,
    page_size: Option<u64>,
}

#[derive(Deserialize)]
struct FavoriteInput {
    is_favorite: bool,
}

#[derive(Serialize)]
struct UsageRecorded {
    failed_steps: Vec<StepFailure>,
}

fn split_list<T: FromStr>(field: &str, raw: Option<&str>) -> Result<Vec<T>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| bad_request(&format!("invalid {field} value: {s}"))))
        .collect()
}

impl ListParams {
    fn into_filters(self, max_page_size: u64) -> Result<PromptFilters, ApiError> {
        Ok(PromptFilters {
            types: split_list("types", self.types.as_deref())?,
            status: split_list("status", self.status.as_deref())?,
            interfaces: split_list("interfaces", self.interfaces.as_deref())?,
            domains: split_list("domains", self.domains.as_deref())?,
            tags: split_list("tags", self.tags.as_deref())?,
            search: self.search,
            created_by: self.created_by,
            only_favorites: self.favorites,
            page: self.page,
            page_size: Some(
                self.page_size
                    .unwrap_or(prompts::DEFAULT_PAGE_SIZE)
                    .clamp(1, max_page_size.max(1)),
            ),
        })
    }
}

/* ---------------- Prompts ---------------- */

async fn list_prompts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PromptSearchResult>, ApiError> {
    let filters = params.into_filters(state.max_page_size)?;
    let result = prompts::search_prompts(&state.db, &filters)
        .await
        .map_err(app_err)?;
    Ok(Json(result))
}

async fn get_prompt(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Prompt>, ApiError> {
    let Some(prompt) = prompts::get_prompt(&state.db, &id).await.map_err(app_err)? else {
        return Err(not_found());
    };
    Ok(Json(prompt))
}

async fn create_prompt(
    State(state): State<AppState>,
    Json(input): Json<PromptInsert>,
) -> Result<Json<SaveOutcome>, ApiError> {
    let outcome = prompts::create_prompt(&state.db, input)
        .await
        .map_err(app_err)?;
    Ok(Json(outcome))
}

async fn update_prompt(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<PromptUpdate>,
) -> Result<Json<SaveOutcome>, ApiError> {
    let Some(outcome) = prompts::update_prompt(&state.db, &id, input)
        .await
        .map_err(app_err)?
    else {
        return Err(not_found());
    };
    Ok(Json(outcome))
}

async fn delete_prompt(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    if !prompts::delete_prompt(&state.db, &id).await.map_err(app_err)? {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn set_favorite(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<FavoriteInput>,
) -> Result<StatusCode, ApiError> {
    if !prompts::set_favorite(&state.db, &id, input.is_favorite)
        .await
        .map_err(app_err)?
    {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn record_usage(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<RecordUsage>,
) -> Json<UsageRecorded> {
    let failed_steps = prompts::record_usage(&state.db, &id, input).await;
    if !failed_steps.is_empty() {
        warn!(prompt_id = %id, failed = failed_steps.len(), "usage partially recorded");
    }
    Json(UsageRecorded { failed_steps })
}

async fn list_usage(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PromptUsage>>, ApiError> {
    let items = prompts::usage_history(&state.db, &id).await.map_err(app_err)?;
    Ok(Json(items))
}

async fn list_versions(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PromptVersion>>, ApiError> {
    let items = prompts::prompt_versions(&state.db, &id)
        .await
        .map_err(app_err)?;
    Ok(Json(items))
}

async fn related(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RelatedPrompts>, ApiError> {
    let items = prompts::related_prompts(&state.db, &id)
        .await
        .map_err(app_err)?;
    Ok(Json(items))
}

/* ---------------- Relations ---------------- */

async fn create_relation(
    State(state): State<AppState>,
    Json(input): Json<NewRelation>,
) -> Result<Json<PromptRelation>, ApiError> {
    let relation = prompts::link_prompts(&state.db, input)
        .await
        .map_err(app_err)?;
    Ok(Json(relation))
}

async fn delete_relation(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    if !prompts::unlink_prompts(&state.db, &id).await.map_err(app_err)? {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

/* ---------------- Catalog ---------------- */

async fn prompt_filters(State(state): State<AppState>) -> Result<Json<FilterOptions>, ApiError> {
    let options = catalog::filter_options(&state.db).await.map_err(app_err)?;
    Ok(Json(options))
}

/* ---------------- Error helpers ---------------- */

fn app_err(e: AppError) -> ApiError {
    match e {
        AppError::NotFound(_) => not_found(),
        AppError::InvalidInput(msg) => bad_request(&msg),
        other => {
            error!("db error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
        }
    }
}
fn bad_request(msg: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg.into() }))
}
fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "Not found".into() }))
}

/* ---------------- Router ---------------- */

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/prompts", get(list_prompts).post(create_prompt))
        .route(
            "/prompts/:id",
            get(get_prompt).put(update_prompt).delete(delete_prompt),
        )
        .route("/prompts/:id/favorite", put(set_favorite))
        .route("/prompts/:id/usage", get(list_usage).post(record_usage))
        .route("/prompts/:id/versions", get(list_versions))
        .route("/prompts/:id/related", get(related))
        .route("/relations", post(create_relation))
        .route("/relations/:id", delete(delete_relation))
        .route("/prompt-filters", get(prompt_filters))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_parse_comma_separated_enums() {
        let params = ListParams {
            types: Some("FUNCTIONAL, AGENT".into()),
            interfaces: Some("CLAUDE".into()),
            tags: Some("rust,,sql".into()),
            page_size: Some(500),
            ..Default::default()
        };
        let filters = params.into_filters(100).unwrap();
        assert_eq!(filters.types.len(), 2);
        assert_eq!(filters.interfaces.len(), 1);
        assert_eq!(filters.tags, vec!["rust".to_string(), "sql".to_string()]);
        assert_eq!(filters.page_size, Some(100));
    }

    #[test]
    fn unknown_enum_in_query_is_bad_request() {
        let params = ListParams {
            status: Some("ARCHIVED".into()),
            ..Default::default()
        };
        let (status, body) = params.into_filters(100).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.0.error.contains("ARCHIVED"));
    }
}
