//! HTTP routes
//!
//! All endpoints speak JSON except `/api/progress` (SSE) and the embedded
//! static assets. Install is asynchronous: the handler answers
//! `202 Accepted` and progress flows through the broker; a duplicate
//! install for an active key answers `409 Conflict`.

use crate::assets;
use crate::error::ApiError;
use crate::proxy;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tooldock_core::InstallKey;
use tooldock_engine::Error;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Request/query body addressing one `tool@version`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyParams {
    tool_name: String,
    version: String,
}

impl KeyParams {
    fn key(&self) -> InstallKey {
        InstallKey::new(&self.tool_name, &self.version)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleRequest {
    tool_name: String,
    enabled: bool,
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/status", get(status))
        .route("/api/install", post(install))
        .route("/api/uninstall", post(uninstall))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/active", get(active))
        .route("/api/tool-path", get(tool_path))
        .route("/api/tool-info", get(tool_info))
        .route("/api/tool-metadata", get(tool_metadata))
        .route("/api/platform", get(platform))
        .layer(TimeoutLayer::new(Duration::from_secs(15)));

    // SSE lives outside the timeout layer: the stream is long-lived by
    // design and ends when the client disconnects
    Router::new()
        .merge(api)
        .route("/api/progress", get(progress))
        .route("/", get(assets::index))
        .route("/static/*path", get(assets::static_asset))
        .route("/proxy/:name/*path", get(proxy::forward))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.list_tools())
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status())
}

async fn install(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KeyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let key = request.key();
    // Unknown tool/version or no URL for this platform is a client error,
    // surfaced before anything is spawned
    state.engine.tool_config(&key.name, &key.version)?;

    // Claim the key before answering: of two racing requests exactly one
    // obtains the reservation and a 202, the other gets the 409 here
    let Some(reservation) = state.engine.try_reserve(&key) else {
        return Err(ApiError(Error::busy(key.to_string())));
    };

    let engine = state.engine.clone();
    let sink = state.broker.clone();
    tokio::spawn(async move {
        let key = reservation.key().clone();
        match engine.install_reserved(reservation, sink).await {
            Ok(()) => {}
            Err(error) if error.is_busy() => {
                tracing::info!(%key, "install raced another operation");
            }
            Err(error) => {
                // The failed event already reached subscribers
                tracing::warn!(%key, %error, "install failed");
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

async fn uninstall(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KeyParams>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.uninstall(&request.key()).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn pause(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KeyParams>,
) -> impl IntoResponse {
    state.engine.pause(&request.key());
    Json(json!({ "status": "ok" }))
}

async fn toggle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToggleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .toggle_group(&request.tool_name, request.enabled)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn active(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let keys: Vec<String> = state
        .engine
        .active()
        .list()
        .iter()
        .map(InstallKey::to_string)
        .collect();
    Json(json!({ "needsSSE": !keys.is_empty(), "active": keys }))
}

async fn tool_path(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (storage, exec) = state.engine.tool_paths(&query.key())?;
    Ok(Json(json!({
        "storagePath": storage.to_string_lossy(),
        "execPath": exec.to_string_lossy(),
    })))
}

async fn tool_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.engine.tool_info(&query.key()).await?;
    Ok(Json(json!({ "info": info })))
}

async fn tool_metadata(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let metadata = state.engine.metadata_json(&query.key())?;
    Ok(Json(json!({ "metadata": metadata })))
}

async fn platform(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let roots = state.engine.roots();
    Json(json!({ "platform": format!("{}/{}", roots.os(), roots.arch()) }))
}

/// Removes the broker subscription when the SSE stream drops
struct Unsubscribe {
    broker: Arc<crate::broker::Broker>,
    id: u64,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

async fn progress(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, mut receiver) = state.broker.subscribe();
    let broker = state.broker.clone();

    let stream = async_stream::stream! {
        let _guard = Unsubscribe { broker, id };
        while let Some(message) = receiver.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(error) => {
                    tracing::error!(%error, "failed to serialize progress message");
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
