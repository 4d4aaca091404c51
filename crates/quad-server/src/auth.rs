//! Bearer-token sessions.
//!
//! `/auth/login` issues an opaque token that resolves to a [`UserId`] for a
//! fixed lifetime. Tokens live in memory only, so a restart logs everyone
//! out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use quad_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Clone)]
struct IssuedToken {
    user: UserId,
    expires_at: DateTime<Utc>,
}

/// Issues and resolves bearer tokens.
#[derive(Clone)]
pub struct TokenRegistry {
    ttl: chrono::Duration,
    tokens: Arc<RwLock<HashMap<String, IssuedToken>>>,
}

impl TokenRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn issue(&self, user: UserId) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let issued = IssuedToken {
            user,
            expires_at: Utc::now() + self.ttl,
        };
        self.tokens.write().await.insert(token.clone(), issued);
        debug!(user = %user, "Issued bearer token");
        token
    }

    /// The user behind `token`, if it exists and has not expired.
    pub async fn resolve(&self, token: &str) -> Option<UserId> {
        let tokens = self.tokens.read().await;
        tokens
            .get(token)
            .filter(|t| Utc::now() < t.expires_at)
            .map(|t| t.user)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }

    /// Drop expired tokens. Called periodically from a background task.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| now < t.expires_at);
        let removed = before - tokens.len();
        if removed > 0 {
            debug!(removed, remaining = tokens.len(), "Purged expired tokens");
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ServerError::Unauthorized)?;
        state
            .tokens
            .resolve(token)
            .await
            .map(AuthUser)
            .ok_or(ServerError::Unauthorized)
    }
}
