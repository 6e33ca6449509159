//! Request lifecycle telemetry
//!
//! An [`Observer`] is a side channel: hooks are called synchronously, must
//! not block, and can never change the outcome of a request.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Request metadata for the starting/succeeded hooks.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub status: Option<u16>,
}

/// Failure metadata for the failed/deserialization hooks.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub method: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub status: Option<u16>,
    /// Rendered error.
    pub error: String,
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenInfo {
    pub expires_at: DateTime<Utc>,
    pub from_cache: bool,
}

/// Lifecycle hooks. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    fn request_starting(&self, _request: &RequestInfo) {}

    fn request_succeeded(&self, _request: &RequestInfo) {}

    fn request_failed(&self, _error: &ErrorInfo) {}

    /// Called right before a token exchange goes out.
    fn token_requested(&self) {}

    /// Called on every token resolution, cache hit or exchange.
    fn token_refreshed(&self, _token: &TokenInfo) {}

    fn deserialization_failed(&self, _error: &ErrorInfo) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards every hook to `tracing` under the `bc_odata::observer` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn request_starting(&self, request: &RequestInfo) {
        tracing::debug!(
            target: "bc_odata::observer",
            method = %request.method,
            url = %request.url,
            "request starting"
        );
    }

    fn request_succeeded(&self, request: &RequestInfo) {
        tracing::info!(
            target: "bc_odata::observer",
            method = %request.method,
            url = %request.url,
            status = request.status,
            duration_ms = request.duration.map(|d| d.as_millis() as u64),
            "request succeeded"
        );
    }

    fn request_failed(&self, error: &ErrorInfo) {
        tracing::warn!(
            target: "bc_odata::observer",
            method = %error.method,
            url = %error.url,
            status = error.status,
            duration_ms = error.duration.map(|d| d.as_millis() as u64),
            error = %error.error,
            "request failed"
        );
    }

    fn token_requested(&self) {
        tracing::debug!(target: "bc_odata::observer", "token requested");
    }

    fn token_refreshed(&self, token: &TokenInfo) {
        tracing::debug!(
            target: "bc_odata::observer",
            expires_at = %token.expires_at,
            from_cache = token.from_cache,
            "token resolved"
        );
    }

    fn deserialization_failed(&self, error: &ErrorInfo) {
        tracing::warn!(
            target: "bc_odata::observer",
            method = %error.method,
            url = %error.url,
            status = error.status,
            error = %error.error,
            "response deserialization failed"
        );
    }
}
