use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{delete, get},
    Router,
};
use dotenv::dotenv;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use thread_sentiment::api::{self, AppState};
use thread_sentiment::batch::BatchCoordinator;
use thread_sentiment::cache::ResultCache;
use thread_sentiment::config::AppConfig;
use thread_sentiment::scorer::LexiconScorer;
use thread_sentiment::store::DirectoryStore;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::get_overall,
        api::get_posts,
        api::get_keywords,
        api::get_post_detail,
        api::refresh_analysis,
        api::cache_info,
        api::invalidate_cache,
        api::health
    ),
    components(
        schemas(
            api::ErrorBody,
            api::RefreshResponse,
            api::MessageResponse,
            api::HealthResponse,
            thread_sentiment::cache::CacheInfo,
            thread_sentiment::models::CorpusStatistics,
            thread_sentiment::models::PerDocumentAnalysis,
            thread_sentiment::models::PostInfo,
            thread_sentiment::models::DocumentStatistics,
            thread_sentiment::models::CommentSentiment,
            thread_sentiment::models::AuthorSentiment,
            thread_sentiment::models::TimePoint,
            thread_sentiment::models::AnalysisDiagnostics,
            thread_sentiment::models::KeywordWeight,
            thread_sentiment::models::SentimentResult,
            thread_sentiment::models::SentimentLabel,
            thread_sentiment::models::SentimentDistribution,
            thread_sentiment::models::PostsBySentiment
        )
    ),
    tags(
        (name = "analysis", description = "Sentiment Analysis API"),
        (name = "cache", description = "Result Cache Management API")
    )
)]
struct ApiDoc;

/// Resolves once `signal` fires, after cancelling any running analysis. If the
/// signal handler cannot be installed the server keeps running.
async fn shutdown_on(
    signal: impl Future<Output = std::io::Result<()>>,
    cache: Arc<ResultCache>,
) {
    match signal.await {
        Ok(()) => {
            info!("Shutdown signal received");
            cache.shutdown();
        }
        Err(e) => {
            error!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Serving analysis of {} (cache file {})",
        config.data_dir.display(),
        config.cache_file.display()
    );

    let coordinator =
        BatchCoordinator::new(Arc::new(LexiconScorer::new())).with_concurrency(config.workers);
    let source = Arc::new(DirectoryStore::new(&config.data_dir));
    let cache = Arc::new(ResultCache::open(coordinator, source, &config.cache_file).await);

    // Warm the cache in the background; early requests join the same run.
    let warm = cache.clone();
    tokio::spawn(async move {
        if let Err(e) = warm.get(false).await {
            error!("Initial analysis failed: {}", e);
        }
    });

    let state = Arc::new(AppState {
        cache: cache.clone(),
    });

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/overall", get(api::get_overall))
        .route("/api/posts", get(api::get_posts))
        .route("/api/keywords", get(api::get_keywords))
        .route("/api/post/:post_id", get(api::get_post_detail))
        .route(
            "/api/refresh",
            get(api::refresh_analysis).post(api::refresh_analysis),
        )
        .route("/api/cache-info", get(api::cache_info))
        .route("/api/cache", delete(api::invalidate_cache))
        .route("/health", get(api::health))
        .fallback_service(ServeDir::new(&config.static_dir)) // Serve Dashboard
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c(), cache))
        .await?;

    Ok(())
}
