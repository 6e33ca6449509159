//! Azure AD authentication
//!
//! OAuth2 client-credentials flow with a per-client, single-slot token cache.
//! Reads are lock-free; refreshes are serialized so that concurrent callers
//! racing an expired token trigger exactly one exchange.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cancel::cancellable;
use crate::config::BusinessCentralConfig;
use crate::error::{BusinessCentralError, Error};
use crate::observer::{Observer, TokenInfo};

/// Tokens are treated as expired this long before the issuer says so.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token response from Azure AD
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Cached token with expiry tracking
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Token issued at `issued_at`, valid for `expires_in` seconds minus the margin.
    ///
    /// Returns `None` when the lifetime does not fit in a `DateTime<Utc>`.
    pub fn issued(access_token: String, issued_at: DateTime<Utc>, expires_in: u64) -> Option<Self> {
        let lifetime = i64::try_from(expires_in)
            .ok()
            .and_then(|secs| Duration::try_seconds(secs - EXPIRY_MARGIN_SECS))?;
        let expires_at = issued_at.checked_add_signed(lifetime)?;

        Some(Self {
            access_token,
            expires_at,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Bearer token cache for one set of client credentials.
pub struct TokenCache {
    http_client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    observer: Arc<dyn Observer>,
    slot: ArcSwapOption<CachedToken>,
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    pub fn new(
        http_client: Client,
        config: &BusinessCentralConfig,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            http_client,
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            observer,
            slot: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Token endpoint with the tenant substituted.
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Current slot content, expired or not.
    pub fn peek(&self) -> Option<CachedToken> {
        self.slot.load_full().map(|cached| (*cached).clone())
    }

    /// Return a valid access token, exchanging credentials if needed.
    pub async fn token(&self, cancel: &CancellationToken) -> Result<String, Error> {
        if let Some(cached) = self.fresh() {
            tracing::debug!("Using cached token");
            return Ok(self.resolved(&cached, true));
        }

        let _guard = cancellable(cancel, self.refresh_lock.lock()).await?;

        // Another caller may have refreshed while we waited.
        if let Some(cached) = self.fresh() {
            tracing::debug!("Token refreshed by a concurrent caller");
            return Ok(self.resolved(&cached, true));
        }

        tracing::info!("Acquiring new access token for scope: {}", self.scope);
        self.observer.token_requested();

        let cached = Arc::new(self.acquire_token(cancel).await?);
        self.slot.store(Some(Arc::clone(&cached)));

        tracing::info!("Token acquired successfully, expires at {}", cached.expires_at);

        Ok(self.resolved(&cached, false))
    }

    /// Drop the cached token so the next [`token`](Self::token) call refreshes.
    pub async fn invalidate(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let _guard = cancellable(cancel, self.refresh_lock.lock()).await?;
        self.slot.store(None);
        tracing::debug!("Token cache cleared");
        Ok(())
    }

    /// Drop the cached token only if it is still `rejected`.
    ///
    /// A caller that saw a 401 must not wipe a token another caller already
    /// refreshed in the meantime.
    pub async fn invalidate_rejected(
        &self,
        rejected: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let _guard = cancellable(cancel, self.refresh_lock.lock()).await?;
        if self
            .slot
            .load_full()
            .is_some_and(|cached| cached.access_token == rejected)
        {
            self.slot.store(None);
            tracing::debug!("Rejected token cleared");
        } else {
            tracing::debug!("Rejected token already replaced");
        }
        Ok(())
    }

    fn fresh(&self) -> Option<Arc<CachedToken>> {
        self.slot.load_full().filter(|cached| !cached.is_expired())
    }

    fn resolved(&self, cached: &CachedToken, from_cache: bool) -> String {
        self.observer.token_refreshed(&TokenInfo {
            expires_at: cached.expires_at,
            from_cache,
        });
        cached.access_token.clone()
    }

    /// Exchange client credentials at the token endpoint.
    async fn acquire_token(&self, cancel: &CancellationToken) -> Result<CachedToken, Error> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let issued_at = Utc::now();
        let request = self.http_client.post(&self.token_url).form(&params).send();
        let response = cancellable(cancel, request).await??;

        let status = response.status();
        let body = cancellable(cancel, response.text()).await??;

        if !status.is_success() {
            tracing::error!("Token request failed: {}", status);
            return Err(
                BusinessCentralError::from_response(status, "POST", &self.token_url, body).into(),
            );
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::TokenParse(format!("Failed to parse token response: {}", e))
        })?;

        CachedToken::issued(
            token_response.access_token,
            issued_at,
            token_response.expires_in,
        )
        .ok_or_else(|| {
            Error::TokenParse(format!(
                "Token lifetime out of range: expires_in={}",
                token_response.expires_in
            ))
        })
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("cached", &self.peek())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use chrono::TimeZone;

    #[test]
    fn test_expiry_includes_margin() {
        let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = CachedToken::issued("abc".to_string(), issued_at, 3600).unwrap();

        assert_eq!(token.expires_at(), issued_at + Duration::seconds(3540));
        assert!(!token.is_expired_at(issued_at + Duration::seconds(3539)));
        assert!(token.is_expired_at(issued_at + Duration::seconds(3540)));
        assert!(token.is_expired_at(issued_at + Duration::seconds(3600)));
    }

    #[test]
    fn test_short_lived_token_is_immediately_expired() {
        let token = CachedToken::issued("abc".to_string(), Utc::now(), 30).unwrap();
        assert!(token.is_expired());
    }

    #[test]
    fn test_out_of_range_lifetime_is_rejected() {
        let now = Utc::now();
        assert!(CachedToken::issued("abc".to_string(), now, 9_000_000_000_000).is_none());
        assert!(CachedToken::issued("abc".to_string(), now, u64::MAX).is_none());
        assert!(CachedToken::issued("abc".to_string(), now, 0).is_some());
    }

    #[test]
    fn test_debug_hides_token_value() {
        let token = CachedToken::issued("super-secret".to_string(), Utc::now(), 3600).unwrap();
        assert!(!format!("{:?}", token).contains("super-secret"));
    }

    #[test]
    fn test_new_cache_is_empty() {
        let config = BusinessCentralConfig::new(
            "my-tenant",
            "client-id",
            "secret",
            "https://bc.example/ODataV4",
            "CRONUS",
        );
        let cache = TokenCache::new(Client::new(), &config, Arc::new(NoopObserver));
        assert!(cache.peek().is_none());
        assert_eq!(
            cache.token_url(),
            "https://login.microsoftonline.com/my-tenant/oauth2/v2.0/token"
        );
    }

    fn cache() -> TokenCache {
        let config = BusinessCentralConfig::new(
            "t",
            "c",
            "s",
            "https://bc.example/ODataV4",
            "CRONUS",
        );
        TokenCache::new(Client::new(), &config, Arc::new(NoopObserver))
    }

    fn store(cache: &TokenCache, token: &str) {
        let cached = CachedToken::issued(token.to_string(), Utc::now(), 3600).unwrap();
        cache.slot.store(Some(Arc::new(cached)));
    }

    #[tokio::test]
    async fn test_invalidate_rejected_keeps_newer_token() {
        let cache = cache();
        let cancel = CancellationToken::new();
        store(&cache, "fresh");

        cache.invalidate_rejected("stale", &cancel).await.unwrap();
        assert_eq!(cache.peek().unwrap().access_token(), "fresh");

        cache.invalidate_rejected("fresh", &cancel).await.unwrap();
        assert!(cache.peek().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_refresh() {
        let config = BusinessCentralConfig::new(
            "t",
            "c",
            "s",
            "https://bc.example/ODataV4",
            "CRONUS",
        )
        .with_token_endpoint("http://127.0.0.1:9/{TenantId}/token");
        let cache = TokenCache::new(Client::new(), &config, Arc::new(NoopObserver));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cache.token(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
