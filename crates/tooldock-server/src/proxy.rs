//! Reverse-proxy registry for nested tool sub-UIs
//!
//! Installed tools that ship their own web UI register an upstream here and
//! become reachable under `/proxy/<name>/…`. Only the registration contract
//! and plain GET forwarding are provided; anything fancier belongs to the
//! tool itself.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tooldock_engine::Error;

/// Map of proxy name to upstream base URL
#[derive(Default)]
pub struct ProxyRegistry {
    upstreams: RwLock<HashMap<String, String>>,
}

impl ProxyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an upstream for a name
    pub fn register(&self, name: impl Into<String>, upstream: impl Into<String>) {
        let name = name.into();
        let upstream = upstream.into();
        tracing::info!(%name, %upstream, "registered proxy upstream");
        self.upstreams
            .write()
            .expect("proxy registry poisoned")
            .insert(name, upstream);
    }

    /// Remove a registration
    pub fn unregister(&self, name: &str) {
        self.upstreams
            .write()
            .expect("proxy registry poisoned")
            .remove(name);
    }

    /// Look up the upstream for a name
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.upstreams
            .read()
            .expect("proxy registry poisoned")
            .get(name)
            .cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .upstreams
            .read()
            .expect("proxy registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Forward `GET /proxy/<name>/<rest>` to the registered upstream
pub async fn forward(
    State(state): State<Arc<AppState>>,
    Path((name, rest)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let Some(upstream) = state.proxies.lookup(&name) else {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from(format!("no proxy registered for {}", name)))
            .unwrap_or_default());
    };

    let mut url = format!("{}/{}", upstream.trim_end_matches('/'), rest);
    if let Some(query) = query {
        url.push('?');
        url.push_str(&query);
    }

    let response = state
        .engine
        .http_client()
        .get(&url)
        .send()
        .await
        .map_err(|error| ApiError(Error::download_failed(&url, error.to_string())))?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response
        .bytes()
        .await
        .map_err(|error| ApiError(Error::download_failed(&url, error.to_string())))?;

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    Ok(builder.body(Body::from(body)).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_roundtrip() {
        let registry = ProxyRegistry::new();
        assert!(registry.lookup("pgadmin").is_none());

        registry.register("pgadmin", "http://127.0.0.1:5050");
        assert_eq!(
            registry.lookup("pgadmin"),
            Some("http://127.0.0.1:5050".to_string())
        );
        assert_eq!(registry.names(), vec!["pgadmin"]);

        registry.register("pgadmin", "http://127.0.0.1:6060");
        assert_eq!(
            registry.lookup("pgadmin"),
            Some("http://127.0.0.1:6060".to_string())
        );

        registry.unregister("pgadmin");
        assert!(registry.lookup("pgadmin").is_none());
    }
}
