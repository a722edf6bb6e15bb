// SPDX-License-Identifier: MIT
//! GitHub App authentication.
//!
//! Two layers: a short-lived RS256 App JWT minted from the App private key,
//! and per-installation access tokens obtained by exchanging that JWT. Tokens
//! are cached in memory keyed by installation id and reused until 60 seconds
//! before their server-side expiry. Concurrent refreshes for the same
//! installation may race; both exchanges succeed and the loser's token is
//! simply overwritten.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ReviewError;
use crate::github::types::InstallationTokenResponse;

/// Reuse margin: a cached token is considered expired this long before the
/// server says so, covering clock skew and in-flight request time.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// App JWT lifetime; GitHub caps it at 10 minutes.
const JWT_TTL_SECS: u64 = 600;
/// Backdate `iat` to absorb clock skew between us and GitHub.
const JWT_BACKDATE_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct AppJwtClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

/// Mint a short-lived App JWT signed with the App's RSA key.
pub fn mint_app_jwt(app_id: &str, private_key_pem: &str) -> Result<String, ReviewError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ReviewError::Authentication(format!("system clock before epoch: {e}")))?
        .as_secs();

    let claims = AppJwtClaims {
        iat: now.saturating_sub(JWT_BACKDATE_SECS),
        exp: now + JWT_TTL_SECS,
        iss: app_id.to_string(),
    };

    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| ReviewError::Authentication(format!("invalid App private key: {e}")))?;

    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| ReviewError::Authentication(format!("App JWT signing failed: {e}")))
}

// ─── Installation token cache ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

impl CachedToken {
    fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires_at.duration_since(now) {
            Ok(remaining) => remaining > EXPIRY_MARGIN,
            Err(_) => false,
        }
    }
}

/// In-memory installation token cache. One per [`GitHubClient`] instance so
/// tests can construct isolated clients without global state.
#[derive(Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<i64, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached token for `installation_id`, if still fresh.
    pub async fn get(&self, installation_id: i64) -> Option<String> {
        let guard = self.tokens.read().await;
        let cached = guard.get(&installation_id)?;
        if cached.is_fresh(SystemTime::now()) {
            Some(cached.token.clone())
        } else {
            None
        }
    }

    /// Store a freshly exchanged token. `expires_at` is GitHub's RFC 3339
    /// expiry; an unparseable timestamp falls back to a conservative 5 minutes.
    pub async fn put(&self, installation_id: i64, response: &InstallationTokenResponse) {
        let expires_at = chrono::DateTime::parse_from_rfc3339(&response.expires_at)
            .map(SystemTime::from)
            .unwrap_or_else(|_| SystemTime::now() + Duration::from_secs(300));

        debug!(installation_id, "caching installation token");
        self.tokens.write().await.insert(
            installation_id,
            CachedToken {
                token: response.token.clone(),
                expires_at,
            },
        );
    }

    #[cfg(test)]
    pub async fn insert_raw(&self, installation_id: i64, token: &str, expires_at: SystemTime) {
        self.tokens.write().await.insert(
            installation_id,
            CachedToken {
                token: token.to_string(),
                expires_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_token_is_returned() {
        let cache = TokenCache::new();
        cache
            .insert_raw(7, "ghs_abc", SystemTime::now() + Duration::from_secs(3600))
            .await;
        assert_eq!(cache.get(7).await.as_deref(), Some("ghs_abc"));
    }

    #[tokio::test]
    async fn token_inside_expiry_margin_is_treated_as_stale() {
        let cache = TokenCache::new();
        cache
            .insert_raw(7, "ghs_abc", SystemTime::now() + Duration::from_secs(30))
            .await;
        assert!(cache.get(7).await.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_not_returned() {
        let cache = TokenCache::new();
        cache
            .insert_raw(7, "ghs_abc", SystemTime::now() - Duration::from_secs(1))
            .await;
        assert!(cache.get(7).await.is_none());
    }

    #[tokio::test]
    async fn unknown_installation_misses() {
        let cache = TokenCache::new();
        assert!(cache.get(99).await.is_none());
    }

    #[tokio::test]
    async fn unparseable_expiry_falls_back_to_short_ttl() {
        let cache = TokenCache::new();
        cache
            .put(
                3,
                &InstallationTokenResponse {
                    token: "ghs_xyz".into(),
                    expires_at: "not-a-timestamp".into(),
                },
            )
            .await;
        // 5 minute fallback is beyond the 60s margin, so it is usable.
        assert_eq!(cache.get(3).await.as_deref(), Some("ghs_xyz"));
    }

    #[test]
    fn jwt_minting_rejects_garbage_key() {
        let err = mint_app_jwt("12345", "not a pem").unwrap_err();
        assert!(matches!(err, ReviewError::Authentication(_)));
    }
}
