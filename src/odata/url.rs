//! Resource URL construction
//!
//! Every component (company, path, key, filter, select field, orderby) is
//! percent-encoded on its own; the assembled query string never is.

use super::filter::ODataFilter;
use super::query::QueryOptions;

/// Literal filter that Business Central accepts as "match everything".
const MATCH_ALL_FILTER: &str = "true";

/// Builds `{base}/Company('{company}')/{path}` URLs for one company.
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    base_url: String,
    company: String,
}

impl UrlBuilder {
    pub fn new(base_url: &str, company: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            company: company.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    /// `{base}/Company('{company}')/{path}`
    pub fn entity_url(&self, path: &str) -> String {
        format!("{}/{}", self.company_base(), encode(path))
    }

    /// `{base}/Company('{company}')/{path}({key})`
    pub fn entity_key_url(&self, path: &str, key: &str) -> String {
        format!("{}/{}({})", self.company_base(), encode(path), encode(key))
    }

    /// Entity URL plus `$filter`, `$select`, `$top`, `$skip` and `$orderby`.
    pub fn query_url<S: AsRef<str>>(
        &self,
        path: &str,
        filter: &ODataFilter,
        options: &QueryOptions,
        select: &[S],
    ) -> String {
        let mut url = self.entity_url(path);
        let mut params = Vec::new();

        if !filter.is_empty() && filter.as_str() != MATCH_ALL_FILTER {
            params.push(format!("$filter={}", encode(filter.as_str())));
        }

        let fields: Vec<String> = select
            .iter()
            .map(|field| AsRef::<str>::as_ref(field))
            .filter(|field| !field.trim().is_empty())
            .map(encode)
            .collect();
        if !fields.is_empty() {
            params.push(format!("$select={}", fields.join(",")));
        }

        if let Some(top) = options.top {
            params.push(format!("$top={}", top));
        }

        if let Some(skip) = options.skip {
            params.push(format!("$skip={}", skip));
        }

        if let Some(order_by) = options.order_by.as_deref() {
            if !order_by.trim().is_empty() {
                params.push(format!("$orderby={}", encode(order_by)));
            }
        }

        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }

        url
    }

    fn company_base(&self) -> String {
        format!("{}/Company('{}')", self.base_url, encode(&self.company))
    }
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
