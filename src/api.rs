// src/api.rs
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::management::{
    DeleteResponse, EntriesView, ManagementApi, SourceList, SourceView, StatusView,
};
use crate::source::{NewSource, SourceId, SourceUpdate};

#[derive(Clone)]
pub struct AppState {
    pub api: ManagementApi,
}

/// HTTP face of `RegistryError`, plus transport-level input problems.
#[derive(Debug)]
pub enum ApiError {
    Registry(RegistryError),
    UnknownId(String),
    Body(String),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Body(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::Body(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Registry(e) => {
                let status = match e {
                    RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
                    RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                    RegistryError::InvalidTransition { .. } => StatusCode::CONFLICT,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::UnknownId(raw) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                format!("source not found: {raw}"),
            ),
            ApiError::Body(msg) => (
                StatusCode::BAD_REQUEST,
                "ValidationError",
                format!("validation error: {msg}"),
            ),
        };
        if status != StatusCode::NOT_FOUND {
            warn!(target: "api", %status, kind, error = %message, "request rejected");
        }
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

fn parse_id(raw: &str) -> Result<SourceId, ApiError> {
    raw.parse().map_err(|_| ApiError::UnknownId(raw.to_string()))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/status", get(status))
        .route("/api/sources", get(list_sources).post(register_source))
        .route(
            "/api/sources/{id}",
            get(get_source).patch(update_source).delete(delete_source),
        )
        .route("/api/sources/{id}/entries", get(source_entries))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Convenience alias used by the binary and tests.
pub fn router(api: ManagementApi) -> Router {
    create_router(AppState { api })
}

async fn register_source(
    State(state): State<AppState>,
    body: Result<Json<NewSource>, JsonRejection>,
) -> Result<(StatusCode, Json<SourceView>), ApiError> {
    let Json(input) = body?;
    let view = state.api.register(input)?;
    info!(target: "api", source_id = %view.source.source_id, "source created");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_sources(State(state): State<AppState>) -> Json<SourceList> {
    Json(state.api.list())
}

async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.api.get(id)?))
}

async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SourceUpdate>, JsonRejection>,
) -> Result<Json<SourceView>, ApiError> {
    let id = parse_id(&id)?;
    let Json(patch) = body?;
    Ok(Json(state.api.update(id, &patch)?))
}

async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<DeleteResponse> {
    // unknown or malformed ids are already "deleted"
    match id.parse::<SourceId>() {
        Ok(id) => Json(state.api.delete(id)),
        Err(_) => Json(DeleteResponse { success: true }),
    }
}

#[derive(Deserialize)]
struct EntriesQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn source_entries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<EntriesQuery>, QueryRejection>,
) -> Result<Json<EntriesView>, ApiError> {
    let id = parse_id(&id)?;
    let Query(q) = query?;
    Ok(Json(state.api.entries(id, q.limit)?))
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.api.status())
}
