//! Response wrapper that keeps the decoded body next to the raw response details.

use crate::{Error, Result};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// A response body, decoded according to its declared content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// An `application/json` body that parsed.
    Json(serde_json::Value),
    /// Any other body, or JSON that failed to parse.
    Text(String),
}

impl ResponseBody {
    /// Classifies `raw` by `content_type`.
    ///
    /// JSON that fails to parse falls back to text without an error.
    pub fn from_raw(content_type: Option<&str>, raw: &str) -> Self {
        let is_json = content_type
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));

        if is_json {
            if let Ok(value) = serde_json::from_str(raw) {
                return ResponseBody::Json(value);
            }
            tracing::debug!("Body declared as JSON did not parse, returning text");
        }
        ResponseBody::Text(raw.to_string())
    }

    /// The parsed JSON value, if the body was JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Text(_) => None,
        }
    }

    /// The text, if the body was not JSON.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Json(_) => None,
            ResponseBody::Text(s) => Some(s),
        }
    }
}

/// A successful HTTP response.
///
/// # Examples
///
/// ```no_run
/// use iron_core::Client;
///
/// # async fn example() -> Result<(), iron_core::Error> {
/// let client = Client::builder("my-app", "1.0.0")
///     .product("iron_mq")
///     .token("TOKEN")
///     .project_id("PROJECT")
///     .build()?;
///
/// let response = client.get("queues").await?;
///
/// println!("Status: {}", response.status);
/// println!("Body: {:?}", response.data);
/// println!("Attempts: {}", response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The decoded response data.
    pub data: T,

    /// The raw response body as a string.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The declared `Content-Type`, if any.
    pub content_type: Option<String>,

    /// The response headers.
    pub headers: HeaderMap,

    /// The absolute URL that was requested.
    pub url: String,

    /// Time from the first attempt until this response arrived, retries included.
    pub latency: Duration,

    /// The number of attempts made, `1` when no retry was needed.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Maps the response data to a different type using the provided function.
    ///
    /// This is useful when you want to transform the response data while
    /// preserving the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            content_type: self.content_type,
            headers: self.headers,
            url: self.url,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl Response<ResponseBody> {
    /// Decodes the raw body into `R`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body if decoding fails.
    pub fn json<R: DeserializeOwned>(&self) -> Result<R> {
        serde_json::from_str(&self.raw_body).map_err(|e| {
            tracing::error!(
                error = %e,
                raw_response = %self.raw_body,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response: self.raw_body.clone(),
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_content_type_is_parsed() {
        let body = ResponseBody::from_raw(Some("application/json; charset=utf-8"), r#"{"a":1}"#);
        assert_eq!(body.as_json(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_broken_json_falls_back_to_text() {
        let body = ResponseBody::from_raw(Some("application/json"), "{oops");
        assert_eq!(body, ResponseBody::Text("{oops".to_string()));
    }

    #[test]
    fn test_other_content_types_are_text() {
        let body = ResponseBody::from_raw(Some("text/plain"), r#"{"a":1}"#);
        assert_eq!(body.as_text(), Some(r#"{"a":1}"#));

        let body = ResponseBody::from_raw(None, "hello");
        assert_eq!(body.as_text(), Some("hello"));
    }
}
