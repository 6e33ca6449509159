//! OData Client module
//!
//! HTTP client for the Business Central OData v4 endpoint of one company.
//! Every call acquires a bearer token, retries exactly once after a 401 with a
//! fresh token, and classifies any other failure into [`BusinessCentralError`].

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, IF_MATCH, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::filter::ODataFilter;
use super::query::QueryOptions;
use super::url::UrlBuilder;
use crate::auth::TokenCache;
use crate::cancel::cancellable;
use crate::config::{BusinessCentralConfig, ConfigError};
use crate::error::{BusinessCentralError, Error};
use crate::observer::{ErrorInfo, NoopObserver, Observer, RequestInfo};

/// Page size used by [`BusinessCentralClient::query_all`] when `top` is unset.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// ETag that matches any version of an entity.
pub const ANY_ETAG: &str = "*";

const APPLICATION_JSON: &str = "application/json";

/// OData list envelope
#[derive(Debug, Deserialize)]
struct ODataList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

/// Everything needed to (re)build one outbound request.
#[derive(Debug, Clone)]
struct RequestTemplate {
    method: Method,
    url: String,
    if_match: Option<String>,
    body: Option<Vec<u8>>,
}

impl RequestTemplate {
    fn get(url: String) -> Self {
        Self {
            method: Method::GET,
            url,
            if_match: None,
            body: None,
        }
    }

    fn with_if_match(mut self, etag: &str) -> Self {
        self.if_match = Some(etag.to_string());
        self
    }

    fn with_json<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self, Error> {
        self.body = Some(serde_json::to_vec(payload)?);
        Ok(self)
    }

    fn build(&self, http_client: &Client, token: &str) -> RequestBuilder {
        let mut request = http_client
            .request(self.method.clone(), &self.url)
            .bearer_auth(token)
            .header(ACCEPT, APPLICATION_JSON);

        if let Some(etag) = &self.if_match {
            request = request.header(IF_MATCH, etag);
        }

        if let Some(body) = &self.body {
            request = request
                .header(CONTENT_TYPE, APPLICATION_JSON)
                .body(body.clone());
        }

        request
    }

    fn request_info(&self, duration: Option<Duration>, status: Option<StatusCode>) -> RequestInfo {
        RequestInfo {
            method: self.method.to_string(),
            url: self.url.clone(),
            duration,
            status: status.map(|s| s.as_u16()),
        }
    }

    fn error_info(
        &self,
        duration: Option<Duration>,
        status: Option<StatusCode>,
        error: String,
        response_body: Option<String>,
    ) -> ErrorInfo {
        ErrorInfo {
            method: self.method.to_string(),
            url: self.url.clone(),
            duration,
            status: status.map(|s| s.as_u16()),
            error,
            response_body,
        }
    }
}

/// Builder for [`BusinessCentralClient`]
pub struct ClientBuilder {
    config: BusinessCentralConfig,
    observer: Arc<dyn Observer>,
    http_client: Option<Client>,
}

impl ClientBuilder {
    pub fn new(config: BusinessCentralConfig) -> Self {
        Self {
            config,
            observer: Arc::new(NoopObserver),
            http_client: None,
        }
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Use a preconfigured `reqwest` client instead of building one.
    pub fn http_client(mut self, http_client: Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn build(self) -> Result<BusinessCentralClient, ConfigError> {
        self.config.validate()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => {
                let mut headers = HeaderMap::new();
                headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
                let user_agent = HeaderValue::from_str(&self.config.user_agent).map_err(|e| {
                    ConfigError::Invalid {
                        field: "user_agent",
                        reason: e.to_string(),
                    }
                })?;
                headers.insert(USER_AGENT, user_agent);

                Client::builder()
                    .timeout(self.config.timeout())
                    .default_headers(headers)
                    .build()?
            }
        };

        let tokens = TokenCache::new(http_client.clone(), &self.config, Arc::clone(&self.observer));
        let urls = UrlBuilder::new(&self.config.base_url, &self.config.company);

        Ok(BusinessCentralClient {
            http_client,
            urls,
            tokens,
            observer: self.observer,
        })
    }
}

/// OData client for one Business Central company
pub struct BusinessCentralClient {
    http_client: Client,
    urls: UrlBuilder,
    tokens: TokenCache,
    observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for BusinessCentralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessCentralClient")
            .field("urls", &self.urls)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl BusinessCentralClient {
    /// Create a client with the default HTTP stack and no observer.
    pub fn new(config: BusinessCentralConfig) -> Result<Self, ConfigError> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: BusinessCentralConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn urls(&self) -> &UrlBuilder {
        &self.urls
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Query an entity set and return the `value` array.
    ///
    /// # Arguments
    /// * `path` - Entity set path, e.g. `"salesOrders"`
    /// * `filter` - `$filter`; empty or `"true"` means no filter
    /// * `options` - `$top`, `$skip` and `$orderby`
    /// * `select` - `$select` fields; blank entries are ignored
    pub async fn query<T, S>(
        &self,
        path: &str,
        filter: &ODataFilter,
        options: &QueryOptions,
        select: &[S],
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let url = self.urls.query_url(path, filter, options, select);
        tracing::debug!("Fetching: {}", url);

        let template = RequestTemplate::get(url);
        let response = self.send(&template, cancel).await?;
        let list: ODataList<T> = self.deserialize(&template, response, cancel).await?;

        tracing::debug!("Fetched {} records", list.value.len());
        Ok(list.value)
    }

    /// Fetch every page of a query using `$top`/`$skip`.
    ///
    /// The page size is `options.top` (default 1000). Paging stops at the
    /// first page shorter than the page size.
    pub async fn query_all<T, S>(
        &self,
        path: &str,
        filter: &ODataFilter,
        options: &QueryOptions,
        select: &[S],
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let page_size = options.top.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Ok(Vec::new());
        }

        let mut all_records = Vec::new();
        let mut skip: u32 = 0;
        let mut page = 0;

        loop {
            page += 1;
            let page_options = QueryOptions {
                top: Some(page_size),
                skip: Some(skip),
                order_by: options.order_by.clone(),
            };

            let records: Vec<T> = self
                .query(path, filter, &page_options, select, cancel)
                .await?;
            let fetched = records.len();

            tracing::debug!("Page {}: fetched {} records", page, fetched);

            all_records.extend(records);

            if fetched < page_size as usize {
                break;
            }

            skip += page_size;
        }

        tracing::info!("Total records fetched: {}", all_records.len());
        Ok(all_records)
    }

    /// GET an entity path and deserialize the whole body.
    pub async fn query_raw<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error> {
        let template = RequestTemplate::get(self.urls.entity_url(path));
        let response = self.send(&template, cancel).await?;
        self.deserialize(&template, response, cancel).await
    }

    /// Create an entity and return it as echoed by the service.
    pub async fn post<T>(&self, path: &str, payload: &T, cancel: &CancellationToken) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        let template = RequestTemplate {
            method: Method::POST,
            url: self.urls.entity_url(path),
            if_match: None,
            body: None,
        }
        .with_json(payload)?;

        let response = self.send(&template, cancel).await?;
        self.deserialize(&template, response, cancel).await
    }

    /// Partially update the entity `key` and return the updated entity.
    ///
    /// A 204 response is an error: the caller expects the entity back.
    pub async fn patch<T>(
        &self,
        path: &str,
        key: &str,
        payload: &T,
        if_match: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        self.send_entity(Method::PATCH, path, key, payload, if_match, cancel)
            .await
    }

    /// [`patch`](Self::patch) with `If-Match: *`.
    pub async fn patch_any<T>(
        &self,
        path: &str,
        key: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        self.patch(path, key, payload, ANY_ETAG, cancel).await
    }

    /// Replace the entity `key` and return the stored entity.
    pub async fn put<T>(
        &self,
        path: &str,
        key: &str,
        payload: &T,
        if_match: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        self.send_entity(Method::PUT, path, key, payload, if_match, cancel)
            .await
    }

    /// Delete the entity `key`.
    pub async fn delete(
        &self,
        path: &str,
        key: &str,
        if_match: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let template = RequestTemplate {
            method: Method::DELETE,
            url: self.urls.entity_key_url(path, key),
            if_match: None,
            body: None,
        }
        .with_if_match(if_match);

        self.send(&template, cancel).await?;
        Ok(())
    }

    async fn send_entity<T>(
        &self,
        method: Method,
        path: &str,
        key: &str,
        payload: &T,
        if_match: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        let template = RequestTemplate {
            method,
            url: self.urls.entity_key_url(path, key),
            if_match: None,
            body: None,
        }
        .with_if_match(if_match)
        .with_json(payload)?;

        let response = self.send(&template, cancel).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Err(
                BusinessCentralError::no_content(template.method.as_str(), &template.url).into(),
            );
        }

        self.deserialize(&template, response, cancel).await
    }

    /// Execute a request with bearer auth, retrying once after a 401.
    async fn send(
        &self,
        template: &RequestTemplate,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        self.observer
            .request_starting(&template.request_info(None, None));

        let mut attempt = 0;

        loop {
            attempt += 1;

            let token = self
                .tokens
                .token(cancel)
                .await
                .inspect_err(|e| self.report_failure(template, None, e))?;

            let started = Instant::now();
            let response = cancellable(cancel, template.build(&self.http_client, &token).send())
                .await
                .and_then(|sent| sent.map_err(Error::from))
                .inspect_err(|e| self.report_failure(template, Some(started.elapsed()), e))?;
            let elapsed = started.elapsed();
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && attempt == 1 {
                tracing::warn!(
                    "{} {} returned 401, retrying with a refreshed token",
                    template.method,
                    template.url
                );
                self.observer.request_failed(&template.error_info(
                    Some(elapsed),
                    Some(status),
                    "Unauthorized; retrying with a refreshed token".to_string(),
                    None,
                ));

                self.tokens
                    .invalidate_rejected(&token, cancel)
                    .await
                    .inspect_err(|e| self.report_failure(template, None, e))?;
                continue;
            }

            if !status.is_success() {
                let body = cancellable(cancel, response.text())
                    .await
                    .and_then(|read| read.map_err(Error::from))
                    .inspect_err(|e| self.report_failure(template, Some(elapsed), e))?;
                let error = BusinessCentralError::from_response(
                    status,
                    template.method.as_str(),
                    &template.url,
                    body.clone(),
                );

                self.observer.request_failed(&template.error_info(
                    Some(elapsed),
                    Some(status),
                    error.to_string(),
                    Some(body),
                ));

                return Err(error.into());
            }

            self.observer
                .request_succeeded(&template.request_info(Some(elapsed), Some(status)));

            return Ok(response);
        }
    }

    /// Read the body and deserialize it, classifying mismatches as server errors.
    async fn deserialize<T: DeserializeOwned>(
        &self,
        template: &RequestTemplate,
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<T, Error> {
        let status = response.status();
        let body = cancellable(cancel, response.text()).await??;

        let parsed = serde_json::from_str::<T>(&body);
        match parsed {
            Ok(value) => Ok(value),
            Err(e) => {
                self.observer.deserialization_failed(&template.error_info(
                    None,
                    Some(status),
                    e.to_string(),
                    Some(body.clone()),
                ));

                Err(BusinessCentralError::deserialization(
                    status,
                    template.method.as_str(),
                    &template.url,
                    "Failed to deserialize Business Central response.",
                    body,
                    e,
                )
                .into())
            }
        }
    }

    fn report_failure(&self, template: &RequestTemplate, duration: Option<Duration>, error: &Error) {
        self.observer
            .request_failed(&template.error_info(duration, None, error.to_string(), None));
    }
}
