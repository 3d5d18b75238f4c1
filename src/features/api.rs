use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use super::db::DbHandle;
use super::guard;
use super::models::{
    BulkCreated, DEFAULT_PAGE_LIMIT, FeatureFilter, Health, MAX_PAGE_LIMIT, NewFeature,
};
use crate::errors::TrackerError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub passes: Option<bool>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListParams {
    fn resolve(self) -> Result<(FeatureFilter, i64, i64), TrackerError> {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(TrackerError::invalid_field(
                "limit",
                format!("limit must be between 1 and {}", MAX_PAGE_LIMIT),
            ));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(TrackerError::invalid_field("offset", "offset must be >= 0"));
        }
        let filter = FeatureFilter {
            passes: self.passes,
            category: self.category,
        };
        Ok((filter, limit, offset))
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        match self.0 {
            TrackerError::Validation { fields, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"error": message, "fields": fields})),
            )
                .into_response(),
            TrackerError::NotFound(_) => {
                debug!(%message, "Feature API lookup found nothing");
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"error": message})),
                )
                    .into_response()
            }
            _ => {
                error!(%message, "Feature API request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": message})),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn json_body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    body.map(|Json(v)| v)
        .map_err(|rejection| TrackerError::invalid_field("body", rejection.body_text()).into())
}

fn feature_id(path: Result<Path<i64>, PathRejection>) -> ApiResult<i64> {
    path.map(|Path(id)| id)
        .map_err(|rejection| TrackerError::invalid_field("id", rejection.body_text()).into())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/features", get(list_features).post(create_feature))
        .route("/features/next", get(next_feature))
        .route("/features/stats", get(feature_stats))
        .route("/features/bulk", post(create_features_bulk))
        .route(
            "/features/{id}",
            get(get_feature).patch(update_feature).delete(delete_feature),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    state.db.call(|db| db.count()).await?;
    Ok(Json(Health {
        status: "ok".to_string(),
        database: "connected".to_string(),
    }))
}

async fn list_features(
    State(state): State<SharedState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params
        .map_err(|rejection| TrackerError::invalid_field("query", rejection.body_text()))?;
    let (filter, limit, offset) = params.resolve()?;
    let page = state
        .db
        .call(move |db| db.list_features(&filter, limit, offset))
        .await?;
    Ok(Json(page))
}

async fn next_feature(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let feature = state.db.call(|db| db.next_pending()).await?;
    Ok(Json(feature))
}

async fn feature_stats(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let stats = state.db.call(|db| db.stats()).await?;
    Ok(Json(stats))
}

async fn get_feature(
    State(state): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = feature_id(path)?;
    let feature = state.db.call(move |db| db.get_feature(id)).await?;
    Ok(Json(feature))
}

async fn create_feature(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let new_feature = NewFeature::from_json(&json_body(body)?, "")?;
    let feature = state
        .db
        .call(move |db| db.create_feature(&new_feature))
        .await?;
    Ok((StatusCode::CREATED, Json(feature)))
}

async fn create_features_bulk(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let items = match body.as_object() {
        Some(map) => {
            if let Some(extra) = map.keys().find(|k| k.as_str() != "features") {
                return Err(TrackerError::invalid_field(
                    extra.as_str(),
                    format!("unknown field `{}`", extra),
                )
                .into());
            }
            map.get("features").and_then(Value::as_array)
        }
        None => None,
    }
    .ok_or_else(|| TrackerError::invalid_field("features", "features must be a list"))?;

    if items.is_empty() {
        return Err(
            TrackerError::invalid_field("features", "features must contain at least one entry")
                .into(),
        );
    }

    let batch = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            // Decode and validate each element before moving on, so the
            // reported field belongs to the first bad element.
            let prefix = format!("features[{}].", i);
            NewFeature::from_json(item, &prefix)
                .and_then(|feature| feature.validate_with_prefix(&prefix).map(|_| feature))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let ids = state.db.call(move |db| db.create_features(&batch)).await?;
    Ok((StatusCode::CREATED, Json(BulkCreated { created: ids.len() })))
}

async fn update_feature(
    State(state): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = feature_id(path)?;
    let body = json_body(body)?;
    let feature = guard::apply_update(&state.db, id, &body).await?;
    Ok(Json(feature))
}

async fn delete_feature(
    State(state): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = feature_id(path)?;
    state.db.call(move |db| db.delete_feature(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
