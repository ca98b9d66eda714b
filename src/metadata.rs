//! Per-request settings.

use crate::ConfigError;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Metadata for an individual HTTP request.
///
/// `path` is relative to the client's base URL and should not start with `/`.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method. Only GET, POST, PUT, DELETE and PATCH are sent.
    pub method: Method,

    /// The request path, relative to the base URL.
    pub path: String,

    /// Headers for this request. These win over the client's defaults.
    pub headers: HeaderMap,

    /// Whether transient responses (503, 504) are retried.
    pub retry: bool,
}

impl RequestMetadata {
    /// Creates a new `RequestMetadata` with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            retry: true,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| ConfigError::InvalidHeader(format!("name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| ConfigError::InvalidHeader(format!("value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds every header in `headers`, replacing earlier values for the same names.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for name in headers.keys() {
            self.headers.remove(name);
        }
        for (name, value) in &headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Disables retrying of transient responses for this request.
    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}
