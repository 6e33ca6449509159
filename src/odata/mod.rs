//! OData module
//!
//! Query building and the HTTP client for Business Central OData APIs

pub mod client;
pub mod filter;
pub mod query;
pub mod url;

pub use client::{BusinessCentralClient, ClientBuilder, ANY_ETAG, DEFAULT_PAGE_SIZE};
pub use filter::{Filter, FilterValue, ODataFilter};
pub use query::QueryOptions;
pub use url::UrlBuilder;
