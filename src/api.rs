//! Read and refresh endpoints over the [`ResultCache`].

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::cache::{CacheInfo, ResultCache};
use crate::error::{CacheIoError, PipelineError};
use crate::models::{CorpusStatistics, KeywordWeight, PerDocumentAnalysis};

pub struct AppState {
    pub cache: Arc<ResultCache>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub message: String,
    pub statistics: CorpusStatistics,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub populated: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Cache(#[from] CacheIoError),

    #[error("Post not found")]
    PostNotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::PostNotFound => StatusCode::NOT_FOUND,
            ApiError::Pipeline(PipelineError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Pipeline(_) | ApiError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Corpus-level statistics
#[utoipa::path(
    get,
    path = "/api/overall",
    responses(
        (status = 200, description = "Corpus statistics", body = CorpusStatistics),
        (status = 500, description = "Analysis failed", body = ErrorBody)
    ),
    tag = "analysis"
)]
pub async fn get_overall(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CorpusStatistics>, ApiError> {
    let result = state.cache.get(false).await?;
    Ok(Json(result.overall_statistics.clone()))
}

/// Every per-post analysis
#[utoipa::path(
    get,
    path = "/api/posts",
    responses(
        (status = 200, description = "Per-post analyses", body = [PerDocumentAnalysis]),
        (status = 500, description = "Analysis failed", body = ErrorBody)
    ),
    tag = "analysis"
)]
pub async fn get_posts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PerDocumentAnalysis>>, ApiError> {
    let result = state.cache.get(false).await?;
    Ok(Json(result.posts.clone()))
}

/// Heaviest keywords across the corpus
#[utoipa::path(
    get,
    path = "/api/keywords",
    responses(
        (status = 200, description = "Corpus keywords", body = [KeywordWeight]),
        (status = 500, description = "Analysis failed", body = ErrorBody)
    ),
    tag = "analysis"
)]
pub async fn get_keywords(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<KeywordWeight>>, ApiError> {
    let result = state.cache.get(false).await?;
    Ok(Json(result.top_keywords.clone()))
}

/// Analysis of a single post
#[utoipa::path(
    get,
    path = "/api/post/{post_id}",
    params(("post_id" = String, Path, description = "Post identifier")),
    responses(
        (status = 200, description = "Post analysis", body = PerDocumentAnalysis),
        (status = 404, description = "Unknown post", body = ErrorBody),
        (status = 500, description = "Analysis failed", body = ErrorBody)
    ),
    tag = "analysis"
)]
pub async fn get_post_detail(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<String>,
) -> Result<Json<PerDocumentAnalysis>, ApiError> {
    let result = state.cache.get(false).await?;
    result
        .find_post(&post_id)
        .cloned()
        .map(Json)
        .ok_or(ApiError::PostNotFound)
}

/// Re-run the analysis and replace the cached result
#[utoipa::path(
    post,
    path = "/api/refresh",
    responses(
        (status = 200, description = "Fresh statistics", body = RefreshResponse),
        (status = 500, description = "Analysis failed", body = ErrorBody),
        (status = 503, description = "Server is shutting down", body = ErrorBody)
    ),
    tag = "cache"
)]
pub async fn refresh_analysis(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let result = state.cache.get(true).await?;
    Ok(Json(RefreshResponse {
        message: "Analysis refreshed".to_string(),
        statistics: result.overall_statistics.clone(),
    }))
}

/// Durable cache metadata
#[utoipa::path(
    get,
    path = "/api/cache-info",
    responses((status = 200, description = "Cache metadata", body = CacheInfo)),
    tag = "cache"
)]
pub async fn cache_info(State(state): State<Arc<AppState>>) -> Json<CacheInfo> {
    Json(state.cache.info().await)
}

/// Drop the cached result
#[utoipa::path(
    delete,
    path = "/api/cache",
    responses(
        (status = 200, description = "Cache cleared", body = MessageResponse),
        (status = 500, description = "Cache file could not be removed", body = ErrorBody)
    ),
    tag = "cache"
)]
pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.cache.invalidate().await?;
    Ok(Json(MessageResponse {
        message: "Cache cleared".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "cache"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        populated: state.cache.populated_at().is_some(),
    })
}
