//! Bearer token verification for the server transport.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use mcplink_transport_traits::{AuthInfo, TransportError, TransportResult};

/// Validates `Authorization: Bearer` tokens on inbound requests.
///
/// A rejected token answers the HTTP request with 401; an accepted one is
/// handed to the engine alongside every message of that request.
#[async_trait]
pub trait TokenVerifier: Send + Sync + fmt::Debug {
    /// Verify `token` and describe what it grants
    async fn verify_access_token(&self, token: &str) -> TransportResult<AuthInfo>;
}

/// Accepts a fixed set of tokens.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthInfo>,
}

impl StaticTokenVerifier {
    /// Create an empty verifier that rejects everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` on behalf of `client_id` with the given scopes
    #[must_use]
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        client_id: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let token = token.into();
        let info = AuthInfo {
            token: token.clone(),
            client_id: client_id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            ..AuthInfo::default()
        };
        self.tokens.insert(token, info);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify_access_token(&self, token: &str) -> TransportResult<AuthInfo> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| TransportError::Unauthorized("invalid bearer token".to_string()))
    }
}

/// Extract the token from an `Authorization` header value
pub(crate) fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}
