//! Security Pipeline demo server
//!
//! Serves a small JSON API behind the full pipeline, plus health, metrics
//! and the admin audit routes. Configuration comes from `CONFIG_PATH`
//! (default `config.toml`, optional) with `SECURITY_PIPELINE__*` overrides.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use security_pipeline::{
    api::{audit_routes, health_routes},
    audit::{AuditAnnotation, AuditEventType},
    config::AppConfig,
    middleware::SanitizedInput,
    observability::init_observability,
    shutdown::ShutdownCoordinator,
    Pipeline,
};
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration from file
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = AppConfig::from_file_with_env(&config_path)?;

    init_observability(&config.logging.level, &config.logging.format);
    info!("Starting Security Pipeline demo server");
    info!("Configuration loaded and validated from {}", config_path);

    let pipeline = Pipeline::new(config.security.clone())?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let sweep = pipeline.start_background_tasks(coordinator.subscribe());
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_for_signal().await });
    }

    let api = Router::new()
        .route("/api/items", get(list_items).post(create_item))
        .route("/api/items/:id", get(get_item).delete(delete_item))
        .route("/api/auth/login", axum::routing::post(login));

    let app = pipeline
        .attach(api)
        .merge(health_routes(pipeline.clone()))
        .merge(audit_routes(pipeline.audit_store()))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut notifier = coordinator.subscribe();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { notifier.wait().await })
        .await?;

    if let Some(handle) = sweep {
        handle.await.ok();
    }
    info!("Server shutdown complete");

    Ok(())
}

async fn list_items(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    Json(json!({ "items": [], "query": query }))
}

async fn get_item(Path(id): Path<String>, Extension(input): Extension<SanitizedInput>) -> impl IntoResponse {
    Json(json!({ "id": id, "sanitizedParams": input.path_params }))
}

async fn create_item(Json(body): Json<Value>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(json!({ "created": body })))
}

async fn delete_item(Path(id): Path<String>) -> impl IntoResponse {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.extensions_mut().insert(
        AuditAnnotation::event_type(AuditEventType::DataDeleted)
            .with_action("item.delete")
            .with_metadata("itemId", id),
    );
    response
}

async fn login(Json(body): Json<Value>) -> impl IntoResponse {
    // Demo only: any non-empty password is accepted
    let ok = body
        .get("password")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.is_empty());
    if ok {
        (StatusCode::OK, Json(json!({ "status": "logged_in" })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": { "message": "Invalid credentials" } })))
    }
}
