//! Error types
//!
//! [`BusinessCentralError`] is the classified form of every non-2xx response
//! (and of 2xx bodies that fail to deserialize). [`Error`] is what the public
//! API returns: a classified failure, or a transport/cancellation failure that
//! passes through untouched.

use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

const CORRELATION_MARKER: &str = "correlationid:";

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] BusinessCentralError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Token parse error: {0}")]
    TokenParse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// The classified failure, if this is one.
    pub fn as_api(&self) -> Option<&BusinessCentralError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.as_api().map(BusinessCentralError::kind)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Classification of a failed Business Central response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Auth,
    Validation,
    Server,
}

impl ErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Auth,
            StatusCode::BAD_REQUEST => ErrorKind::Validation,
            _ => ErrorKind::Server,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Auth => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
        };
        f.write_str(name)
    }
}

/// A failed request, with everything needed to diagnose it.
#[derive(Error, Debug)]
#[error("{composed}")]
pub struct BusinessCentralError {
    kind: ErrorKind,
    status: StatusCode,
    method: String,
    url: String,
    message: String,
    response_body: Option<String>,
    odata_code: Option<String>,
    correlation_id: Option<String>,
    composed: String,
    #[source]
    source: Option<serde_json::Error>,
}

impl BusinessCentralError {
    /// Classify a non-success response body.
    pub fn from_response(status: StatusCode, method: &str, url: &str, body: String) -> Self {
        let (odata_code, odata_message) = match serde_json::from_str::<ODataErrorEnvelope>(&body) {
            Ok(ODataErrorEnvelope { error: Some(detail) }) => (detail.code, detail.message),
            _ => (None, None),
        };
        let correlation_id = odata_message.as_deref().and_then(extract_correlation_id);
        let message = odata_message.unwrap_or_else(|| default_message(status));

        Self::build(
            ErrorKind::from_status(status),
            status,
            method,
            url,
            message,
            Some(body),
            odata_code,
            correlation_id,
            None,
        )
    }

    /// A 2xx response whose body did not match the expected shape.
    pub fn deserialization(
        status: StatusCode,
        method: &str,
        url: &str,
        message: &str,
        body: String,
        source: serde_json::Error,
    ) -> Self {
        Self::build(
            ErrorKind::Server,
            status,
            method,
            url,
            message.to_string(),
            Some(body),
            None,
            None,
            Some(source),
        )
    }

    /// A 204 where the caller needed an echoed entity.
    pub fn no_content(method: &str, url: &str) -> Self {
        Self::build(
            ErrorKind::Server,
            StatusCode::NO_CONTENT,
            method,
            url,
            format!("{} returned 204 No Content; no entity was returned.", method),
            None,
            None,
            None,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        kind: ErrorKind,
        status: StatusCode,
        method: &str,
        url: &str,
        message: String,
        response_body: Option<String>,
        odata_code: Option<String>,
        correlation_id: Option<String>,
        source: Option<serde_json::Error>,
    ) -> Self {
        let mut composed = format!(
            "Business Central {} error ({}): {}\nMethod: {}\nURL: {}",
            kind,
            status_line(status),
            message,
            method,
            url
        );
        if let Some(code) = &odata_code {
            composed.push_str(&format!("\nOData code: {}", code));
        }
        if let Some(id) = &correlation_id {
            composed.push_str(&format!("\nCorrelation id: {}", id));
        }
        if let Some(body) = response_body.as_deref().filter(|b| !b.is_empty()) {
            composed.push_str(&format!("\nResponse body: {}", body));
        }

        Self {
            kind,
            status,
            method: method.to_string(),
            url: url.to_string(),
            message,
            response_body,
            odata_code,
            correlation_id,
            composed,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Vendor message, or the status line when the body had none.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response_body(&self) -> Option<&str> {
        self.response_body.as_deref()
    }

    pub fn odata_code(&self) -> Option<&str> {
        self.odata_code.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct ODataErrorEnvelope {
    #[serde(alias = "Error")]
    error: Option<ODataErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ODataErrorDetail {
    #[serde(default, alias = "Code")]
    code: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn default_message(status: StatusCode) -> String {
    format!("Business Central returned {}.", status_line(status))
}

/// Everything after `CorrelationId:` (any case), trimmed of whitespace and
/// trailing dots.
fn extract_correlation_id(message: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with the original.
    let index = message.to_ascii_lowercase().find(CORRELATION_MARKER)?;
    let id = message[index + CORRELATION_MARKER.len()..]
        .trim()
        .trim_end_matches('.');
    Some(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://bc.example/ODataV4/Company('CRONUS')/items";

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StatusCode::NOT_FOUND, ErrorKind::NotFound),
            (StatusCode::UNAUTHORIZED, ErrorKind::Auth),
            (StatusCode::FORBIDDEN, ErrorKind::Auth),
            (StatusCode::BAD_REQUEST, ErrorKind::Validation),
            (StatusCode::CONFLICT, ErrorKind::Server),
            (StatusCode::TOO_MANY_REQUESTS, ErrorKind::Server),
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Server),
        ];
        for (status, kind) in cases {
            let err = BusinessCentralError::from_response(status, "GET", URL, String::new());
            assert_eq!(err.kind(), kind, "status {}", status);
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn test_vendor_error_with_correlation_id() {
        let body = r#"{"error":{"code":"BadRequest_ResourceNotFound","message":"Resource not found. CorrelationId: 953b8867-cd45-4516-becf-e22d63f7f98c."}}"#;
        let err = BusinessCentralError::from_response(
            StatusCode::BAD_REQUEST,
            "GET",
            URL,
            body.to_string(),
        );

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.odata_code(), Some("BadRequest_ResourceNotFound"));
        assert_eq!(
            err.correlation_id(),
            Some("953b8867-cd45-4516-becf-e22d63f7f98c")
        );
        assert_eq!(err.response_body(), Some(body));

        let text = err.to_string();
        assert!(text.contains("BadRequest_ResourceNotFound"), "{}", text);
        assert!(text.contains("953b8867-cd45-4516-becf-e22d63f7f98c"), "{}", text);
        assert!(
            text.contains("Correlation id: 953b8867-cd45-4516-becf-e22d63f7f98c\n"),
            "{}",
            text
        );
        assert!(text.contains("400 Bad Request"), "{}", text);
        assert!(text.contains("GET"), "{}", text);
        assert!(text.contains(URL), "{}", text);
    }

    #[test]
    fn test_correlation_marker_is_case_insensitive() {
        assert_eq!(
            extract_correlation_id("Oops. correlationid:  abc-123 ..").as_deref(),
            Some("abc-123")
        );
        assert_eq!(extract_correlation_id("no marker here"), None);
    }

    #[test]
    fn test_unparseable_body_falls_back_to_status_line() {
        let err = BusinessCentralError::from_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PATCH",
            URL,
            "<html>boom</html>".to_string(),
        );
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(
            err.message(),
            "Business Central returned 500 Internal Server Error."
        );
        assert_eq!(err.odata_code(), None);
        assert_eq!(err.correlation_id(), None);
        assert!(err.to_string().contains("<html>boom</html>"));
    }

    #[test]
    fn test_pascal_case_envelope() {
        let body = r#"{"Error":{"Code":"Internal_ServerError","Message":"Something broke"}}"#;
        let err = BusinessCentralError::from_response(
            StatusCode::BAD_GATEWAY,
            "GET",
            URL,
            body.to_string(),
        );
        assert_eq!(err.odata_code(), Some("Internal_ServerError"));
        assert_eq!(err.message(), "Something broke");
    }

    #[test]
    fn test_no_content_is_server_kind() {
        let err = BusinessCentralError::no_content("PATCH", URL);
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), StatusCode::NO_CONTENT);
        assert_eq!(err.response_body(), None);
    }

    #[test]
    fn test_crate_error_kind() {
        let err: Error = BusinessCentralError::from_response(
            StatusCode::NOT_FOUND,
            "GET",
            URL,
            String::new(),
        )
        .into();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        assert!(!err.is_cancelled());
        assert_eq!(Error::Cancelled.kind(), None);
    }
}
