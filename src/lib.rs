//! Business Central OData Library
//!
//! Client for the Microsoft Dynamics 365 Business Central OData v4 API with
//! client-credentials authentication, typed filters, paging and a classified
//! error taxonomy.

pub mod auth;
mod cancel;
pub mod config;
pub mod error;
pub mod observer;
pub mod odata;

pub use auth::{CachedToken, TokenCache};
pub use config::{BusinessCentralConfig, ConfigError};
pub use error::{BusinessCentralError, Error, ErrorKind};
pub use observer::{ErrorInfo, NoopObserver, Observer, RequestInfo, TokenInfo, TracingObserver};
pub use odata::{
    BusinessCentralClient, ClientBuilder, Filter, FilterValue, ODataFilter, QueryOptions,
    UrlBuilder,
};
pub use tokio_util::sync::CancellationToken;
