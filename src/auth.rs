//! Token authentication
//!
//! Credential issuance lives outside this server. What the chat core needs is
//! a way to turn a presented token into an `Identity`, and to hear about
//! tokens being revoked so live sessions can be cut off.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

use crate::broadcast::Revocation;
use crate::types::Identity;

/// Resolves and revokes session tokens
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Identity behind `token`, or `None` (anonymous) if it's unknown
    async fn resolve(&self, token: &str) -> Option<Identity>;

    /// Invalidate `token`, returning whose it was
    async fn revoke(&self, token: &str) -> Option<Identity>;
}

/// Token table keyed by SHA-256 digest, so raw tokens never sit in memory
/// longer than a request.
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, Identity>>,
    revocations: mpsc::Sender<Revocation>,
}

impl TokenRegistry {
    pub fn new(revocations: mpsc::Sender<Revocation>) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            revocations,
        }
    }

    pub async fn insert(&self, token: &str, identity: Identity) {
        self.tokens.write().await.insert(digest(token), identity);
    }

    /// Seed from `username=token` pairs; the username doubles as the user id
    pub async fn seed(&self, pairs: &[(String, String)]) {
        for (username, token) in pairs {
            self.insert(token, Identity::new(username.clone(), username.clone()))
                .await;
        }
        tracing::info!("Token registry seeded with {} users", pairs.len());
    }
}

#[async_trait]
impl TokenAuthority for TokenRegistry {
    async fn resolve(&self, token: &str) -> Option<Identity> {
        self.tokens.read().await.get(&digest(token)).cloned()
    }

    async fn revoke(&self, token: &str) -> Option<Identity> {
        let identity = self.tokens.write().await.remove(&digest(token))?;

        let revocation = Revocation {
            user_id: identity.id.clone(),
        };
        if self.revocations.send(revocation).await.is_err() {
            tracing::warn!("Revocation listener is gone; {} stays connected", identity.username);
        }
        Some(identity)
    }
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Find the token a client presented: an `Authorization: Token <key>` header
/// wins over a `token=<key>` query parameter.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    header_token(headers).or_else(|| {
        query_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

pub fn header_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, key) = value.trim().split_once(' ')?;
    let key = key.trim();
    (scheme == "Token" && !key.is_empty()).then(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc123"));
        assert_eq!(header_token(&headers), Some("abc123".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(header_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token"));
        assert_eq!(header_token(&headers), None);
    }

    #[test]
    fn test_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_token(&headers, Some("from-query")),
            Some("from-query".to_string())
        );
        assert_eq!(extract_token(&headers, Some("  ")), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token from-header"));
        assert_eq!(
            extract_token(&headers, Some("from-query")),
            Some("from-header".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_and_revoke() {
        let (tx, mut rx) = mpsc::channel(4);
        let registry = TokenRegistry::new(tx);
        registry
            .seed(&[("alice".to_string(), "secret-a".to_string())])
            .await;

        let alice = registry.resolve("secret-a").await.unwrap();
        assert_eq!(alice.username, "alice");
        assert!(registry.resolve("secret-b").await.is_none());

        assert_eq!(registry.revoke("secret-a").await, Some(alice.clone()));
        assert!(registry.resolve("secret-a").await.is_none());
        assert_eq!(
            rx.recv().await,
            Some(Revocation {
                user_id: alice.id.clone()
            })
        );

        // Unknown tokens don't emit anything
        assert!(registry.revoke("secret-a").await.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_digest_is_stable_hex() {
        assert_eq!(digest("abc"), digest("abc"));
        assert_ne!(digest("abc"), digest("abd"));
        assert_eq!(digest("abc").len(), 64);
    }
}
