//! # Auth Gate
//!
//! Every route requires the configured API token, presented either as
//! `Authorization: Bearer <token>` or as the `_token` query parameter. The
//! query parameter is only consulted when no `Authorization` header is sent;
//! a header with any other scheme is rejected. Rejected requests never reach
//! the store.

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::debug;

use kvb_common::{AuthToken, BridgeError, BridgeResult};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(rename = "_token")]
    token: Option<String>,
}

/// Validates request credentials against the configured token.
#[derive(Debug, Clone)]
pub struct AuthGate {
    token: AuthToken,
}

impl AuthGate {
    pub fn new(token: AuthToken) -> Self {
        AuthGate { token }
    }

    /// Returns true when `presented` equals the configured token.
    ///
    /// Comparison time does not depend on where the tokens differ.
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(presented) if !self.token.is_empty() => {
                presented.as_bytes().ct_eq(self.token.as_bytes()).into()
            }
            _ => false,
        }
    }

    /// Checks the credentials carried by a request's headers and URI.
    pub fn check(&self, headers: &HeaderMap, uri: &Uri) -> BridgeResult<()> {
        let presented = match headers.get(header::AUTHORIZATION) {
            Some(value) => value.to_str().ok().and_then(bearer_credentials).map(str::to_string),
            None => query_token(uri),
        };
        if self.authorize(presented.as_deref()) {
            Ok(())
        } else {
            Err(BridgeError::Auth)
        }
    }
}

/// Extracts the credentials of a `Bearer` header; the scheme is case-insensitive.
fn bearer_credentials(value: &str) -> Option<&str> {
    let (scheme, credentials) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| credentials.trim())
}

fn query_token(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.token)
}

/// Middleware rejecting unauthenticated requests with 401.
pub async fn require_token(State(gate): State<AuthGate>, request: Request, next: Next) -> Response {
    if let Err(err) = gate.check(request.headers(), request.uri()) {
        debug!(method = %request.method(), path = %request.uri().path(), "rejected request");
        return ApiError::from(err).into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn gate() -> AuthGate {
        AuthGate::new(AuthToken::new("secret"))
    }

    #[test]
    fn test_authorize() {
        let gate = gate();
        assert!(gate.authorize(Some("secret")));
        assert!(!gate.authorize(Some("secreT")));
        assert!(!gate.authorize(Some("secret2")));
        assert!(!gate.authorize(Some("")));
        assert!(!gate.authorize(None));
    }

    #[test]
    fn test_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(gate().check(&headers, &Uri::from_static("/")).is_ok());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer secret"));
        assert!(gate().check(&headers, &Uri::from_static("/")).is_ok());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic secret"));
        assert_eq!(
            gate().check(&headers, &Uri::from_static("/")),
            Err(BridgeError::Auth)
        );
    }

    #[test]
    fn test_other_scheme_does_not_fall_back_to_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(
            gate().check(&headers, &Uri::from_static("/get/a?_token=secret")),
            Err(BridgeError::Auth)
        );
    }

    #[test]
    fn test_query_token() {
        let headers = HeaderMap::new();
        assert!(gate()
            .check(&headers, &Uri::from_static("/get/a?_token=secret"))
            .is_ok());
        assert!(gate()
            .check(&headers, &Uri::from_static("/get/a?_token=nope"))
            .is_err());
        assert!(gate().check(&headers, &Uri::from_static("/get/a")).is_err());
    }

    #[test]
    fn test_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(gate()
            .check(&headers, &Uri::from_static("/?_token=secret"))
            .is_err());
    }
}
