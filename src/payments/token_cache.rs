//! Bearer-token cache shared by the OAuth rails (M-Pesa, Airtel).
//!
//! One instance is created at startup and injected into every provider that
//! needs it. Entries are keyed by provider and client id, populated lazily
//! and refreshed once `expires_at - safety_margin` has passed.
//!
//! Refreshes are best-effort, not serialized: the lock is never held across
//! the token exchange, so callers that observe an expired entry at the same
//! time may each fetch a token. The last writer wins.

use crate::payments::error::PaymentResult;
use crate::payments::types::ProviderName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl ProviderCredential {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        let expires_in = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::zero());
        Self {
            access_token: access_token.into(),
            expires_at: Utc::now() + expires_in,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        self.expires_at - margin > now
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("access_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Performs a provider's token exchange.
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn provider(&self) -> ProviderName;

    /// Distinguishes multiple accounts on the same rail.
    fn client_id(&self) -> &str;

    async fn fetch_token(&self) -> PaymentResult<ProviderCredential>;
}

type CacheKey = (ProviderName, String);

pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, ProviderCredential>>,
    safety_margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

impl TokenCache {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            safety_margin,
        }
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Returns a usable bearer token, exchanging credentials only when the
    /// cached one is absent or inside the safety margin.
    pub async fn get_token(&self, source: &dyn TokenSource) -> PaymentResult<String> {
        let key = (source.provider(), source.client_id().to_string());
        {
            let entries = self.entries.read().await;
            if let Some(credential) = entries.get(&key) {
                if credential.is_usable(Utc::now(), self.safety_margin) {
                    debug!(provider = %key.0, "using cached access token");
                    return Ok(credential.access_token.clone());
                }
            }
        }

        let credential = source.fetch_token().await?;
        info!(
            provider = %key.0,
            expires_at = %credential.expires_at,
            "access token refreshed"
        );
        let token = credential.access_token.clone();
        self.entries.write().await.insert(key, credential);
        Ok(token)
    }

    /// Drops the cached token after the provider rejected it.
    pub async fn invalidate(&self, provider: ProviderName, client_id: &str) {
        let removed = self
            .entries
            .write()
            .await
            .remove(&(provider, client_id.to_string()));
        if removed.is_some() {
            info!(provider = %provider, "cached access token invalidated");
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
