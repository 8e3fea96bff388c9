//! HTTP Basic authentication against the local account table.

use anyhow::Result;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::User;

/// Credentials from an `Authorization: Basic ...` header, if present and
/// well-formed.
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Validate Basic credentials. `None` means the request must be challenged.
pub async fn authenticate(db: &Database, headers: &HeaderMap) -> Result<Option<User>> {
    let Some((username, password)) = parse_basic_auth(headers) else {
        return Ok(None);
    };

    debug!("Authenticating user: {}", username);

    let Some(user) = db.get_user_by_username(&username).await? else {
        warn!("Authentication failed for unknown user: {}", username);
        return Ok(None);
    };

    if !user.is_active {
        warn!("Inactive user attempted login: {}", username);
        return Ok(None);
    }

    if !bcrypt::verify(&password, &user.password_hash)? {
        warn!("Authentication failed for user: {}", username);
        return Ok(None);
    }

    debug!("User authenticated successfully: {}", username);
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_parse_basic_auth() {
        // "alice:secret"
        let headers = headers_with("Basic YWxpY2U6c2VjcmV0");
        assert_eq!(
            parse_basic_auth(&headers),
            Some(("alice".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_parse_basic_auth_password_with_colon() {
        // "alice:se:cret" - only the first colon splits.
        let encoded = BASE64.encode("alice:se:cret");
        let headers = headers_with(&format!("Basic {}", encoded));
        assert_eq!(
            parse_basic_auth(&headers),
            Some(("alice".to_string(), "se:cret".to_string()))
        );
    }

    #[test]
    fn test_parse_basic_auth_rejects_other_schemes() {
        let headers = headers_with("Bearer some-token");
        assert_eq!(parse_basic_auth(&headers), None);
    }

    #[test]
    fn test_parse_basic_auth_rejects_garbage() {
        let headers = headers_with("Basic not-base64!!!");
        assert_eq!(parse_basic_auth(&headers), None);
    }

    #[test]
    fn test_parse_basic_auth_missing_header() {
        assert_eq!(parse_basic_auth(&HeaderMap::new()), None);
    }
}
