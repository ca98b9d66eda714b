//! Error types for configuration, authentication and HTTP calls.
//!
//! Every fallible operation in the crate returns [`Error`]. Configuration problems are
//! reported through the nested [`ConfigError`] so callers can tell a bad setup apart
//! from a failing server.

use http::{HeaderMap, StatusCode};

/// The main error type for Iron.io API calls.
///
/// # Examples
///
/// ```no_run
/// use iron_core::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder("my-app", "1.0.0")
///     .product("iron_worker")
///     .token("TOKEN")
///     .project_id("PROJECT")
///     .build()?;
///
/// match client.get("codes").await {
///     Ok(response) => println!("Success: {:?}", response.data),
///     Err(Error::HttpError { status, message, url, .. }) => {
///         eprintln!("HTTP error {} from {}: {}", status, url, message);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client could not be configured.
    ///
    /// Raised while constructing a client and never retried.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The credential exchange with the Keystone server failed.
    ///
    /// A previously cached token is left untouched when this is returned.
    #[error("Authentication failed: {message}")]
    Auth {
        /// What went wrong during the exchange
        message: String,
        /// The HTTP status of the exchange, if a response was received
        status: Option<StatusCode>,
    },

    /// The request used a method other than GET, POST, PUT, DELETE or PATCH.
    ///
    /// No network call is made when this is returned.
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// The server answered with a status of 400 or above.
    ///
    /// For transient statuses (503, 504) this is the last response observed after
    /// the retry budget was spent.
    ///
    /// # Fields
    ///
    /// * `status` - The HTTP status code
    /// * `message` - The server's `msg`/`message` field, or the status line
    /// * `url` - The absolute URL that was requested
    /// * `raw_response` - The raw response body
    /// * `headers` - The response headers
    #[error("HTTP error {status} from {url}: {message}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The error message
        message: String,
        /// The requested URL
        url: String,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// A connection-level failure below HTTP (DNS, TCP, TLS, timeout).
    ///
    /// Not retried by the executor.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A successful response body could not be decoded into the requested type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize a request body to JSON.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An invalid URL was produced or supplied.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if this is an HTTP error with a transient status (503 or 504).
    ///
    /// # Examples
    ///
    /// ```
    /// use iron_core::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     message: "503 Service Unavailable".to_string(),
    ///     url: "https://worker-aws-us-east-1.iron.io/2/projects/P/tasks".to_string(),
    ///     raw_response: String::new(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        match self {
            Error::HttpError { status, .. } => crate::retry::is_transient(*status),
            _ => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::Auth { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    pub(crate) fn auth(message: impl Into<String>, status: Option<StatusCode>) -> Self {
        Error::Auth {
            message: message.into(),
            status,
        }
    }
}

/// Problems found while resolving or validating client configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value was not set by any configuration layer.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A keystone block was given without all of its sub-fields.
    #[error("incomplete keystone configuration, missing: {}", missing.join(", "))]
    IncompleteKeystone {
        /// The absent sub-fields
        missing: Vec<&'static str>,
    },

    /// The protocol is neither `http` nor `https`.
    #[error("invalid protocol `{0}`, expected `http` or `https`")]
    InvalidProtocol(String),

    /// The port is not an integer between 1 and 65535.
    #[error("invalid port `{0}`")]
    InvalidPort(String),

    /// The `cloud` override could not be parsed into protocol, host and port.
    #[error("invalid cloud url `{url}`: {reason}")]
    InvalidCloudUrl {
        /// The offending value
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// A configuration value has the wrong shape.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The configuration key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// A header name or value cannot be sent over HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Retry parameters out of range.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

/// A specialized `Result` type for Iron.io API calls.
pub type Result<T> = std::result::Result<T, Error>;
