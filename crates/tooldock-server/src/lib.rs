//! # tooldock-server
//!
//! JSON + Server-Sent-Events surface over a [`tooldock_engine::Engine`]:
//! listing, status, install/uninstall/pause/toggle, live progress fan-out,
//! embedded front-end assets and the nested-UI reverse proxy.

pub mod assets;
pub mod broker;
pub mod error;
pub mod proxy;
pub mod routes;
pub mod state;

pub use broker::Broker;
pub use error::ApiError;
pub use proxy::ProxyRegistry;
pub use routes::router;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

/// Serve the API until the process is stopped
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tooldock server listening");
    axum::serve(listener, app).await
}
