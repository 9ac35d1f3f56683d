//! Embedded front-end assets

use axum::body::Body;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::Response;
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets"]
struct Assets;

/// Serve the embedded index page
pub async fn index() -> Response {
    serve("index.html")
}

/// Serve an embedded asset under `/static/…`
pub async fn static_asset(Path(path): Path<String>) -> Response {
    serve(&format!("static/{}", path))
}

fn serve(path: &str) -> Response {
    match Assets::get(path) {
        Some(content) => Response::builder()
            .header(header::CONTENT_TYPE, content_type(path))
            .body(Body::from(content.data.into_owned()))
            .unwrap_or_default(),
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found"))
            .unwrap_or_default(),
    }
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "html" => "text/html; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("static/app.js"), "text/javascript; charset=utf-8");
        assert_eq!(content_type("static/app.css"), "text/css; charset=utf-8");
        assert_eq!(content_type("favicon.ico"), "image/x-icon");
        assert_eq!(content_type("blob"), "application/octet-stream");
    }

    #[test]
    fn test_index_is_embedded() {
        assert!(Assets::get("index.html").is_some());
        assert!(Assets::get("static/app.js").is_some());
        assert!(Assets::get("static/app.css").is_some());
    }
}
