//! Router assembly and server bootstrap.

use crate::routes;
use crate::state::AppState;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Generation
        .route("/v1/generate/:topic_id", post(routes::generate::generate))
        // Backends
        .route(
            "/api/backends",
            post(routes::backends::create_backend).get(routes::backends::list_backends),
        )
        .route(
            "/api/backends/:id",
            get(routes::backends::get_backend)
                .put(routes::backends::update_backend)
                .delete(routes::backends::delete_backend),
        )
        .route("/api/backends/:id/test", post(routes::backends::test_connection))
        .route(
            "/api/backends/:id/statistics",
            get(routes::backends::get_statistics),
        )
        .route(
            "/api/backends/:id/entities/fetch",
            post(routes::backends::fetch_entities),
        )
        .route(
            "/api/backends/:id/entities",
            get(routes::backends::get_entities),
        )
        .route(
            "/api/backends/:id/entities/bulk",
            post(routes::backends::bulk_update_entities),
        )
        .route(
            "/api/backends/:id/entities/:entity_id",
            put(routes::backends::update_entity),
        )
        .route(
            "/api/backends/:id/device-types",
            post(routes::backends::add_device_type),
        )
        .route(
            "/api/backends/:id/locations",
            post(routes::backends::add_location),
        )
        .route(
            "/api/backends/:id/validate",
            get(routes::backends::validate_mappings),
        )
        .route(
            "/api/backends/:id/grammar/generate",
            post(routes::backends::generate_grammar),
        )
        .route(
            "/api/backends/:id/grammar/status",
            get(routes::backends::grammar_status),
        )
        .route(
            "/api/backends/:id/grammar/test",
            post(routes::backends::test_command),
        )
        // Topics + heartbeat
        .route("/v1/topics", get(routes::topics::list_topics))
        .route("/v1/topics/heartbeat", post(routes::topics::receive_heartbeat))
        .route(
            "/v1/topics/heartbeat/status",
            get(routes::topics::heartbeat_status),
        )
        .route(
            "/v1/topics/:id",
            get(routes::topics::get_topic)
                .put(routes::topics::update_topic)
                .delete(routes::topics::delete_topic),
        )
        .route(
            "/v1/topics/:id/link-backend",
            post(routes::topics::link_backend),
        )
        // Cache
        .route("/v1/cache", delete(routes::cache::clear))
        .route("/v1/cache/stats", get(routes::cache::stats))
        .route("/v1/cache/entries", get(routes::cache::list_entries))
        .route(
            "/v1/cache/entries/:topic_id/:text",
            delete(routes::cache::remove_entry),
        )
        .route(
            "/v1/cache/error-correction",
            post(routes::cache::trigger_error_correction),
        )
        // Status + performance
        .route("/v1/status/last-command", get(routes::status::last_command))
        .route("/v1/status/health", get(routes::status::health))
        .route("/v1/status/performance", get(routes::status::performance))
        .route(
            "/v1/performance/log",
            post(routes::status::append_log)
                .get(routes::status::read_log)
                .delete(routes::status::clear_log),
        )
        // Models
        .route("/v1/models", get(routes::models::list_models))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let supervisor = state.supervisor.clone();
    let app = build_router(state);

    info!("ORAC Core v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    supervisor.shutdown_all().await;
    Ok(())
}
