//! Access-token verification and the authenticated-user extractor.
//!
//! Tokens are issued by the auth server and verified here with its Ed25519
//! public key. Successful verifications are cached until the token expires
//! so the signature is not re-checked on every request.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use alumni_shared::auth::{verify_access_token, AccessToken};
use alumni_shared::error::TokenError;
use alumni_shared::types::UserId;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Clone)]
struct CachedIdentity {
    user: UserId,
    valid_until: DateTime<Utc>,
}

impl CachedIdentity {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.valid_until
    }
}

/// Verifies and caches access tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    server_pubkey: [u8; 32],
    /// Cache: encoded token -> identity it proved.
    cache: Arc<RwLock<HashMap<String, CachedIdentity>>>,
}

impl TokenVerifier {
    pub fn new(server_pubkey: [u8; 32]) -> Self {
        Self {
            server_pubkey,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve an encoded token to the user it was issued for.
    pub async fn verify(&self, raw: &str) -> Result<UserId, TokenError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(raw) {
                if entry.is_fresh() {
                    return Ok(entry.user);
                }
            }
        }

        let token = AccessToken::decode(raw)?;
        let user = match verify_access_token(&token, &self.server_pubkey) {
            Ok(user) => user,
            Err(e) => {
                debug!(user = %token.user_id, error = %e, "Token rejected");
                return Err(e);
            }
        };

        self.cache.write().await.insert(
            raw.to_string(),
            CachedIdentity {
                user,
                valid_until: token.valid_until,
            },
        );
        debug!(user = %user, until = %token.valid_until, "Token verified");
        Ok(user)
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired token cache entries");
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer header first, then a `?token=` query parameter (used by browsers
/// opening a WebSocket, which cannot set headers).
fn extract_token(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty())
    })
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = extract_token(parts).ok_or(ServerError::MissingToken)?;
        let user = state.verifier.verify(&raw).await?;
        Ok(AuthUser(user))
    }
}
