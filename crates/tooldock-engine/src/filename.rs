//! Download filename resolution
//!
//! Priority: RFC 5987 `filename*=UTF-8''…` (percent-decoded) > quoted
//! `filename="…"` > unquoted `filename=…` > URL path basename. Whatever the
//! source, only the final path component survives, so a hostile header
//! cannot escape the version folder.

use std::path::Path;

const FALLBACK: &str = "download";

/// Resolve the local filename for a download
pub fn resolve(content_disposition: Option<&str>, url: &str) -> String {
    content_disposition
        .and_then(from_content_disposition)
        .unwrap_or_else(|| from_url(url))
}

/// Extract a filename from a `Content-Disposition` header value
pub fn from_content_disposition(header: &str) -> Option<String> {
    let mut plain: Option<String> = None;

    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = strip_param(part, "filename*") {
            // RFC 5987: charset'language'percent-encoded
            let encoded = value.rsplit("''").next().unwrap_or(value);
            if let Ok(decoded) = urlencoding::decode(encoded) {
                if let Some(name) = sanitize(&decoded) {
                    return Some(name);
                }
            }
        } else if plain.is_none()
            && let Some(value) = strip_param(part, "filename")
        {
            let value = value.trim_matches('"');
            plain = sanitize(value);
        }
    }

    plain
}

/// Filename from the URL path's last segment, query string stripped
pub fn from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let basename = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    sanitize(basename).unwrap_or_else(|| FALLBACK.to_string())
}

fn strip_param<'a>(part: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = part.split_once('=')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

/// Keep only a safe final path component
fn sanitize(name: &str) -> Option<String> {
    let name = Path::new(name).file_name()?.to_str()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}
