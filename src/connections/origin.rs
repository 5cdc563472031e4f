//! Origin normalization.
//!
//! An origin is scheme + host + port. Paths, queries, fragments and
//! credentials are dropped, default ports are elided and hosts lowercased, so
//! `https://X.com:443/a?b` and `https://x.com/c` name the same connection.

use url::Url;

use crate::connections::ConnectionError;

/// Normalize a page origin or URL. Only `http` and `https` pages can connect.
pub fn normalize_origin(raw: &str) -> Result<String, ConnectionError> {
    let url = Url::parse(raw.trim()).map_err(|_| ConnectionError::InvalidOrigin(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConnectionError::InvalidOrigin(raw.to_string()));
    }

    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(ConnectionError::InvalidOrigin(raw.to_string()));
    }
    Ok(origin.ascii_serialization())
}
