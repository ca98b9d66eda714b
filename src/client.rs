//! HTTP client for Iron.io APIs.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to resolve configuration and create clients.

use crate::{
    auth::TokenProvider,
    config::{Config, ConfigOverrides, ConfigResolver, ConfigSources, KeystoneConfig, Protocol},
    metadata::RequestMetadata,
    response::ResponseBody,
    retry::{RetryOnTransient, RetryPredicate, RetryStrategy},
    ConfigError, Error, Response, Result,
};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// An HTTP client bound to one Iron.io product and project.
///
/// The client is designed to be reused across multiple requests. Cloning it is cheap
/// and clones share the connection pool and any cached Keystone token.
///
/// # Examples
///
/// ```no_run
/// use iron_core::Client;
///
/// # async fn example() -> Result<(), iron_core::Error> {
/// let client = Client::builder("iron_worker_rust", "0.1.0")
///     .product("iron_worker")
///     .token("TOKEN")
///     .project_id("PROJECT")
///     .build()?;
///
/// // GET https://worker-aws-us-east-1.iron.io/2/projects/PROJECT/codes
/// let codes = client.get("codes").await?;
/// println!("Codes: {:?}", codes.data);
///
/// let task = serde_json::json!({ "tasks": [{ "code_name": "hello" }] });
/// let queued = client.post_json("tasks", &task).await?;
/// println!("Queued: {:?}", queued.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    config: Config,
    base_url: String,
    default_headers: HeaderMap,
    token_provider: TokenProvider,
    retry_strategy: RetryStrategy,
    retry_predicate: Box<dyn RetryPredicate>,
    timeout: Option<Duration>,
}

impl Client {
    /// Creates a new `ClientBuilder` for a client identifying itself as
    /// `{name} (version: {version})`.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(name, version)
    }

    /// Resolves configuration for `product` from the process environment, config
    /// files and `overrides`, and returns a ready client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the configuration is incomplete or invalid.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        product: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self> {
        let mut builder = ClientBuilder::new(name, version).overrides(overrides);
        if let Some(product) = product {
            builder = builder.product(product);
        }
        builder.build()
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The URL every request path is appended to.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Headers sent with every request (before per-request headers and a Keystone
    /// `Authorization` are applied).
    pub fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    /// The token provider backing `Authorization`.
    pub fn token_provider(&self) -> &TokenProvider {
        &self.inner.token_provider
    }

    /// Sends a request, retrying transient responses, and classifies the result.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidMethod`] for methods other than GET, POST, PUT, DELETE and
    ///   PATCH, before anything is sent
    /// * [`Error::HttpError`] for a status of 400 or above, including a transient
    ///   status that outlived every retry
    /// * [`Error::Transport`] for connection failures, which are not retried
    /// * [`Error::Auth`] if a Keystone token could not be obtained
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use iron_core::{metadata::RequestMetadata, Client};
    /// use http::Method;
    ///
    /// # async fn example() -> Result<(), iron_core::Error> {
    /// let client = Client::builder("my-app", "1.0.0")
    ///     .product("iron_cache")
    ///     .token("TOKEN")
    ///     .project_id("PROJECT")
    ///     .build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::GET, "caches")
    ///     .with_header("Accept", "text/plain")?
    ///     .without_retry();
    ///
    /// let response = client.call(metadata, None).await?;
    /// println!("{:?}", response.data);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call(
        &self,
        metadata: RequestMetadata,
        body: Option<&[u8]>,
    ) -> Result<Response<ResponseBody>> {
        check_method(&metadata.method)?;

        let url = format!(
            "{}{}",
            self.inner.base_url,
            metadata.path.trim_start_matches('/')
        );
        Url::parse(&url)?;

        let mut headers = self.request_headers(&metadata).await?;
        if metadata.method == Method::POST {
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from(body.map_or(0, |b| b.len())),
            );
        }

        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .execute_request(&metadata.method, &url, &headers, body, attempt)
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        method = %metadata.method,
                        url = %url,
                        "Request failed"
                    );
                })?;
            let status = response.status();

            if metadata.retry && self.inner.retry_predicate.should_retry(status, attempt) {
                if let Some(delay) = self.inner.retry_strategy.delay_for_attempt(attempt) {
                    tracing::info!(
                        status = status.as_u16(),
                        delay_ms = delay.as_millis(),
                        attempt = attempt,
                        "Transient response, retrying request after delay"
                    );
                    drop(response);
                    tokio::time::sleep(delay).await;
                    continue;
                }

                tracing::warn!(
                    status = status.as_u16(),
                    attempts = attempt,
                    "Retries exhausted on transient response"
                );
            }

            return self
                .parse_response(response, url, start_time.elapsed(), attempt)
                .await;
        }
    }

    /// Builds the headers for one call: defaults, then a fresh Keystone token, then
    /// the caller's headers. Each call gets its own copy.
    async fn request_headers(&self, metadata: &RequestMetadata) -> Result<HeaderMap> {
        let mut headers = self.inner.default_headers.clone();

        if self.inner.token_provider.is_dynamic() {
            let token = self.inner.token_provider.token().await?;
            headers.insert(header::AUTHORIZATION, oauth_header(&token)?);
        }

        for name in metadata.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &metadata.headers {
            headers.append(name.clone(), value.clone());
        }

        Ok(headers)
    }

    /// Executes a single request attempt.
    async fn execute_request(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
        attempt: usize,
    ) -> Result<reqwest::Response> {
        tracing::debug!(
            method = %method,
            url = %url,
            attempt = attempt,
            "Executing HTTP request"
        );

        let mut request = self
            .inner
            .http_client
            .request(method.clone(), url)
            .headers(headers.clone());

        if let Some(timeout) = self.inner.timeout {
            request = request.timeout(timeout);
        }

        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        Ok(request.send().await?)
    }

    /// Turns a final response into a [`Response`] or an [`Error::HttpError`].
    async fn parse_response(
        &self,
        response: reqwest::Response,
        url: String,
        latency: Duration,
        attempts: usize,
    ) -> Result<Response<ResponseBody>> {
        let status = response.status();
        let headers = response.headers().clone();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        let raw_body = response.text().await?;

        if status.is_client_error() || status.is_server_error() {
            if status.is_client_error() {
                tracing::error!(
                    status = status.as_u16(),
                    response = %raw_body,
                    "Client error (4xx)"
                );
            } else {
                tracing::warn!(
                    status = status.as_u16(),
                    response = %raw_body,
                    "Server error (5xx)"
                );
            }

            return Err(Error::HttpError {
                status,
                message: error_message(status, &raw_body),
                url,
                raw_response: raw_body,
                headers,
            });
        }

        let data = ResponseBody::from_raw(content_type.as_deref(), &raw_body);
        Ok(Response {
            data,
            raw_body,
            status,
            content_type,
            headers,
            url,
            latency,
            attempts,
        })
    }

    /// Makes a GET request to `path`, relative to the base URL.
    pub async fn get(&self, path: impl Into<String>) -> Result<Response<ResponseBody>> {
        self.call(RequestMetadata::new(Method::GET, path), None)
            .await
    }

    /// Makes a POST request with a raw body. `Content-Length` is set from the body.
    pub async fn post(
        &self,
        path: impl Into<String>,
        body: impl AsRef<[u8]>,
    ) -> Result<Response<ResponseBody>> {
        self.call(RequestMetadata::new(Method::POST, path), Some(body.as_ref()))
            .await
    }

    /// Makes a PUT request with a raw body.
    pub async fn put(
        &self,
        path: impl Into<String>,
        body: impl AsRef<[u8]>,
    ) -> Result<Response<ResponseBody>> {
        self.call(RequestMetadata::new(Method::PUT, path), Some(body.as_ref()))
            .await
    }

    /// Makes a DELETE request.
    pub async fn delete(&self, path: impl Into<String>) -> Result<Response<ResponseBody>> {
        self.call(RequestMetadata::new(Method::DELETE, path), None)
            .await
    }

    /// Makes a PATCH request with a raw body.
    pub async fn patch(
        &self,
        path: impl Into<String>,
        body: impl AsRef<[u8]>,
    ) -> Result<Response<ResponseBody>> {
        self.call(RequestMetadata::new(Method::PATCH, path), Some(body.as_ref()))
            .await
    }

    /// Makes a POST request with `body` serialized as JSON.
    pub async fn post_json<Req>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<ResponseBody>>
    where
        Req: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, body).await
    }

    /// Makes a PUT request with `body` serialized as JSON.
    pub async fn put_json<Req>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<ResponseBody>>
    where
        Req: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, body).await
    }

    /// Makes a PATCH request with `body` serialized as JSON.
    pub async fn patch_json<Req>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<ResponseBody>>
    where
        Req: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    async fn send_json<Req>(
        &self,
        method: Method,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<ResponseBody>>
    where
        Req: Serialize + ?Sized,
    {
        let json =
            serde_json::to_vec(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        let mut metadata = RequestMetadata::new(method, path);
        metadata.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.call(metadata, Some(&json)).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("config", &self.inner.config)
            .field("retry_strategy", &self.inner.retry_strategy)
            .finish_non_exhaustive()
    }
}

const SUPPORTED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
];

fn check_method(method: &Method) -> Result<()> {
    if SUPPORTED_METHODS.contains(method) {
        Ok(())
    } else {
        Err(Error::InvalidMethod(method.to_string()))
    }
}

fn oauth_header(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::try_from(format!("OAuth {}", token))
        .map_err(|e| ConfigError::InvalidHeader(format!("authorization: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// The server's `msg` or `message` field when the body is a JSON object, else the
/// status line.
fn error_message(status: StatusCode, raw_body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw_body)
        .ok()
        .and_then(|v| {
            ["msg", "message"]
                .iter()
                .find_map(|key| v.get(*key)?.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| {
            format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )
        })
}

/// Builder for configuring and creating a [`Client`].
///
/// Connection settings set here form the highest-precedence configuration layer;
/// anything left unset falls through to environment variables, config files and
/// product presets.
///
/// # Examples
///
/// ```no_run
/// use iron_core::{ClientBuilder, RetryStrategy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), iron_core::Error> {
/// let client = ClientBuilder::new("my-app", "1.0.0")
///     .product("iron_worker")
///     .project_id("PROJECT")
///     .keystone_credentials("https://keystone.example.com/v2.0", "tenant", "user", "secret")
///     .timeout(Duration::from_secs(30))
///     .retry_strategy(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(250),
///         max_retries: 3,
///     })
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    name: String,
    version: String,
    product: Option<String>,
    overrides: ConfigOverrides,
    sources: Option<ConfigSources>,
    extra_headers: HeaderMap,
    retry_strategy: RetryStrategy,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            product: None,
            overrides: ConfigOverrides::default(),
            sources: None,
            extra_headers: HeaderMap::new(),
            retry_strategy: RetryStrategy::default(),
            retry_predicate: None,
            timeout: None,
            http_client: None,
        }
    }

    /// Selects the product, e.g. `iron_worker`, for presets, env vars and file scopes.
    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Replaces all explicit overrides at once.
    pub fn overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Sets the API host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.overrides.host = Some(host.into());
        self
    }

    /// Sets the URL scheme.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.overrides.protocol = Some(protocol);
        self
    }

    /// Sets the port.
    pub fn port(mut self, port: u16) -> Self {
        self.overrides.port = Some(port);
        self
    }

    /// Sets the API version.
    pub fn api_version(mut self, api_version: impl ToString) -> Self {
        self.overrides.api_version = Some(api_version.to_string());
        self
    }

    /// Sets the project ID.
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.overrides.project_id = Some(project_id.into());
        self
    }

    /// Sets a static OAuth token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.overrides.token = Some(token.into());
        self
    }

    /// Sets a keystone block, which may be partial and is validated at build time.
    pub fn keystone(mut self, keystone: impl Into<KeystoneConfig>) -> Self {
        self.overrides.keystone = Some(keystone.into());
        self
    }

    /// Sets complete keystone credentials.
    pub fn keystone_credentials(
        self,
        server: impl Into<String>,
        tenant: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.keystone(crate::config::KeystoneCredentials::new(
            server, tenant, username, password,
        ))
    }

    /// Sets a URL that replaces protocol, host, port and path prefix.
    pub fn cloud(mut self, cloud: impl Into<String>) -> Self {
        self.overrides.cloud = Some(cloud.into());
        self
    }

    /// Sets the path inserted between host and API version.
    pub fn path_prefix(mut self, path_prefix: impl Into<String>) -> Self {
        self.overrides.path_prefix = Some(path_prefix.into());
        self
    }

    /// Adds a config file applied just below the explicit overrides.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.overrides.config_file = Some(path.into());
        self
    }

    /// Reads layered configuration from `sources` instead of the current process.
    pub fn sources(mut self, sources: ConfigSources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| ConfigError::InvalidHeader(format!("name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| ConfigError::InvalidHeader(format!("value: {}", e)))?;
        self.extra_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the retry strategy for transient responses.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Sets a custom retry predicate.
    ///
    /// By default only 503 and 504 are retried.
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses an existing `reqwest::Client` for API calls and Keystone exchanges.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Resolves configuration and builds the `Client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a required value is missing or invalid.
    pub fn build(self) -> Result<Client> {
        let resolver =
            ConfigResolver::new(self.sources.unwrap_or_else(ConfigSources::from_process));
        let config = resolver.resolve(self.product.as_deref(), &self.overrides)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder().build()?,
        };

        let token_provider = TokenProvider::from_config(&config, http_client.clone())?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        default_headers.insert(
            header::USER_AGENT,
            HeaderValue::try_from(format!("{} (version: {})", self.name, self.version))
                .map_err(|e| ConfigError::InvalidHeader(format!("user-agent: {}", e)))?,
        );
        if let TokenProvider::Static(token) = &token_provider {
            default_headers.insert(header::AUTHORIZATION, oauth_header(token.token())?);
        }
        for (name, value) in &self.extra_headers {
            default_headers.insert(name.clone(), value.clone());
        }

        let base_url = config.base_url();
        Url::parse(&base_url)?;

        tracing::info!(
            base_url = %base_url,
            keystone = token_provider.is_dynamic(),
            "Client ready"
        );

        let retry_predicate = self
            .retry_predicate
            .unwrap_or_else(|| Box::new(RetryOnTransient));

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                config,
                base_url,
                default_headers,
                token_provider,
                retry_strategy: self.retry_strategy,
                retry_predicate,
                timeout: self.timeout,
            }),
        })
    }
}
