//! Layered configuration resolution.
//!
//! Values are merged from these layers, lowest precedence first. A layer only
//! overwrites the keys it actually sets:
//!
//! 1. Built-in defaults (`https`, port 443)
//! 2. Product preset (default host and API version)
//! 3. Global user file, `~/.iron.json`
//! 4. Generic environment variables, `IRON_{KEY}`
//! 5. Product environment variables, `{PRODUCT}_{KEY}`
//! 6. Working-directory file, `iron.json`
//! 7. An explicitly supplied config file
//! 8. Explicit overrides
//!
//! Config files are JSON objects. Keys may appear at the top level, inside an object
//! named after the product, or both; product keys win within the same file. Missing
//! or malformed files are skipped.

use crate::ConfigError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// File name of the per-user config file, relative to the home directory.
pub const GLOBAL_CONFIG_FILE: &str = ".iron.json";

/// File name of the config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "iron.json";

/// Environment prefix consulted regardless of product.
pub const GENERIC_ENV_PREFIX: &str = "iron";

/// Port used when nothing else sets one.
pub const DEFAULT_PORT: u16 = 443;

const HTTPS_PORT: u16 = 443;

/// Keys read from environment variables. Keystone is a record and has no env form.
const ENV_KEYS: [&str; 8] = [
    "host",
    "protocol",
    "port",
    "api_version",
    "project_id",
    "token",
    "path_prefix",
    "cloud",
];

/// The URL scheme used to reach the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    #[default]
    Https,
}

impl Protocol {
    /// The lowercase scheme name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// The well-known port for this scheme.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => HTTPS_PORT,
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(ConfigError::InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default host and API version for a service family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductPreset {
    /// Default API host.
    pub host: &'static str,
    /// Default API version.
    pub api_version: &'static str,
}

/// Looks up the preset for a product identifier such as `iron_worker`.
///
/// # Examples
///
/// ```
/// use iron_core::config::preset;
///
/// assert_eq!(preset("iron_worker").unwrap().host, "worker-aws-us-east-1.iron.io");
/// assert!(preset("unknown").is_none());
/// ```
pub fn preset(product: &str) -> Option<ProductPreset> {
    let (host, api_version) = match product {
        "iron_worker" => ("worker-aws-us-east-1.iron.io", "2"),
        "iron_mq" => ("mq-aws-us-east-1.iron.io", "1"),
        "iron_cache" => ("cache-aws-us-east-1.iron.io", "1"),
        _ => return None,
    };
    Some(ProductPreset { host, api_version })
}

/// A keystone block as written in a single layer. Sub-fields may be missing.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeystoneConfig {
    /// Keystone server URL.
    pub server: Option<String>,
    /// Tenant name.
    pub tenant: Option<String>,
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl KeystoneConfig {
    /// Validates that all four sub-fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IncompleteKeystone`] naming the absent fields.
    pub fn complete(self) -> Result<KeystoneCredentials, ConfigError> {
        fn take(
            value: Option<String>,
            name: &'static str,
            missing: &mut Vec<&'static str>,
        ) -> String {
            match value.filter(|v| !v.is_empty()) {
                Some(v) => v,
                None => {
                    missing.push(name);
                    String::new()
                }
            }
        }

        let mut missing = Vec::new();
        let credentials = KeystoneCredentials {
            server: take(self.server, "server", &mut missing),
            tenant: take(self.tenant, "tenant", &mut missing),
            username: take(self.username, "username", &mut missing),
            password: take(self.password, "password", &mut missing),
        };

        if missing.is_empty() {
            Ok(credentials)
        } else {
            Err(ConfigError::IncompleteKeystone { missing })
        }
    }
}

impl fmt::Debug for KeystoneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoneConfig")
            .field("server", &self.server)
            .field("tenant", &self.tenant)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl From<KeystoneCredentials> for KeystoneConfig {
    fn from(c: KeystoneCredentials) -> Self {
        Self {
            server: Some(c.server),
            tenant: Some(c.tenant),
            username: Some(c.username),
            password: Some(c.password),
        }
    }
}

/// A complete set of keystone credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct KeystoneCredentials {
    /// Keystone server URL.
    pub server: String,
    /// Tenant name.
    pub tenant: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl KeystoneCredentials {
    /// Creates credentials from their four parts.
    pub fn new(
        server: impl Into<String>,
        tenant: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            tenant: tenant.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for KeystoneCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoneCredentials")
            .field("server", &self.server)
            .field("tenant", &self.tenant)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Explicitly supplied values, the highest-precedence layer.
///
/// Only fields that are `Some` take effect.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// API host.
    pub host: Option<String>,
    /// URL scheme.
    pub protocol: Option<Protocol>,
    /// TCP port.
    pub port: Option<u16>,
    /// API version, e.g. `2`.
    pub api_version: Option<String>,
    /// Project identifier.
    pub project_id: Option<String>,
    /// Static OAuth token.
    pub token: Option<String>,
    /// Keystone credentials, possibly partial.
    pub keystone: Option<KeystoneConfig>,
    /// URL replacing protocol, host, port and path prefix in one go.
    pub cloud: Option<String>,
    /// Path inserted between the host and the API version.
    pub path_prefix: Option<String>,
    /// Extra config file applied just below these overrides.
    pub config_file: Option<PathBuf>,
}

impl ConfigOverrides {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            host: self.host.clone(),
            protocol: self.protocol.map(|p| p.as_str().to_string()),
            port: self.port.map(|p| p.to_string()),
            api_version: self.api_version.clone(),
            project_id: self.project_id.clone(),
            token: self.token.clone(),
            keystone: self.keystone.clone(),
            cloud: self.cloud.clone(),
            path_prefix: self.path_prefix.clone(),
        }
    }
}

/// Where layered configuration is read from.
///
/// [`ConfigSources::from_process`] describes the real process; tests and embedders
/// can point the resolver at their own files and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// The per-user config file.
    pub global_file: Option<PathBuf>,
    /// The working-directory config file.
    pub local_file: Option<PathBuf>,
    /// Environment variables.
    pub env: HashMap<String, String>,
}

impl ConfigSources {
    /// Captures the home directory file, `./iron.json` and the process environment.
    pub fn from_process() -> Self {
        Self {
            global_file: dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_FILE)),
            local_file: Some(PathBuf::from(LOCAL_CONFIG_FILE)),
            env: std::env::vars().collect(),
        }
    }

    /// Sets the per-user config file.
    pub fn global_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_file = Some(path.into());
        self
    }

    /// Sets the working-directory config file.
    pub fn local_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_file = Some(path.into());
        self
    }

    /// Adds an environment variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The partial view of configuration contributed by one layer.
#[derive(Debug, Clone, Default, PartialEq)]
struct ConfigLayer {
    host: Option<String>,
    protocol: Option<String>,
    port: Option<String>,
    api_version: Option<String>,
    project_id: Option<String>,
    token: Option<String>,
    keystone: Option<KeystoneConfig>,
    cloud: Option<String>,
    path_prefix: Option<String>,
}

impl ConfigLayer {
    fn defaults() -> Self {
        Self {
            protocol: Some(Protocol::default().as_str().to_string()),
            port: Some(DEFAULT_PORT.to_string()),
            ..Self::default()
        }
    }

    fn from_preset(preset: ProductPreset) -> Self {
        Self {
            host: Some(preset.host.to_string()),
            api_version: Some(preset.api_version.to_string()),
            ..Self::default()
        }
    }

    /// Reads `{PREFIX}_{KEY}` for every scalar key.
    fn from_env(env: &HashMap<String, String>, prefix: &str) -> Self {
        let get = |key: &str| {
            env.get(&format!("{}_{}", prefix, key).to_uppercase())
                .cloned()
        };
        let mut layer = Self::default();
        for key in ENV_KEYS {
            if let Some(value) = get(key) {
                layer.set_scalar(key, value);
            }
        }
        layer
    }

    /// Extracts the known keys of a JSON object, ignoring everything else.
    fn from_json_object(object: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut layer = Self::default();
        for key in ENV_KEYS {
            if let Some(value) = object.get(key) {
                if let Some(value) = scalar(key, value)? {
                    layer.set_scalar(key, value);
                }
            }
        }
        match object.get("keystone") {
            None | Some(Value::Null) => {}
            Some(value @ Value::Object(_)) => {
                let keystone = KeystoneConfig::deserialize(value).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "keystone".to_string(),
                        reason: e.to_string(),
                    }
                })?;
                layer.keystone = Some(keystone);
            }
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "keystone".to_string(),
                    reason: "expected an object".to_string(),
                })
            }
        }
        Ok(layer)
    }

    fn set_scalar(&mut self, key: &str, value: String) {
        let slot = match key {
            "host" => &mut self.host,
            "protocol" => &mut self.protocol,
            "port" => &mut self.port,
            "api_version" => &mut self.api_version,
            "project_id" => &mut self.project_id,
            "token" => &mut self.token,
            "path_prefix" => &mut self.path_prefix,
            "cloud" => &mut self.cloud,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Overwrites every key that `other` sets.
    fn merge(&mut self, other: ConfigLayer) {
        fn over<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        over(&mut self.host, other.host);
        over(&mut self.protocol, other.protocol);
        over(&mut self.port, other.port);
        over(&mut self.api_version, other.api_version);
        over(&mut self.project_id, other.project_id);
        over(&mut self.token, other.token);
        over(&mut self.keystone, other.keystone);
        over(&mut self.cloud, other.cloud);
        over(&mut self.path_prefix, other.path_prefix);
    }
}

fn scalar(key: &str, value: &Value) -> Result<Option<String>, ConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a string or number, got {}", other),
        }),
    }
}

/// Reads one config file into a layer, with product keys over flat keys.
fn read_config_file(path: &Path, product: Option<&str>) -> Result<ConfigLayer, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "top level is not a JSON object".to_string())?;

    let mut layer = ConfigLayer::from_json_object(object).map_err(|e| e.to_string())?;
    if let Some(Value::Object(scoped)) = product.and_then(|p| object.get(p)) {
        layer.merge(ConfigLayer::from_json_object(scoped).map_err(|e| e.to_string())?);
    }
    Ok(layer)
}

/// Fully resolved, validated connection settings.
///
/// `host`, `protocol`, `port` and `path_prefix` already reflect a `cloud` override
/// when one was given.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// API host.
    pub host: String,
    /// URL scheme.
    pub protocol: Protocol,
    /// TCP port.
    pub port: u16,
    /// API version.
    pub api_version: String,
    /// Project identifier.
    pub project_id: String,
    /// Static OAuth token, if configured.
    pub token: Option<String>,
    /// Keystone credentials, if configured.
    pub keystone: Option<KeystoneCredentials>,
    /// The `cloud` override that produced the connection fields, if any.
    pub cloud: Option<String>,
    /// Path between the host and the API version, empty or starting with `/`.
    pub path_prefix: String,
}

impl Config {
    /// Validates a merged layer.
    fn from_layer(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let project_id = layer
            .project_id
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingField("project_id"))?;

        let keystone = layer.keystone.map(KeystoneConfig::complete).transpose()?;
        let token = layer.token.filter(|v| !v.is_empty());
        if token.is_none() && keystone.is_none() {
            return Err(ConfigError::MissingField("token"));
        }

        let api_version = layer
            .api_version
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingField("api_version"))?;

        let cloud = layer.cloud.filter(|v| !v.is_empty());
        let (protocol, host, port, path_prefix) = match &cloud {
            Some(cloud) => parse_cloud(cloud)?,
            None => {
                let protocol = match &layer.protocol {
                    Some(p) => p.parse::<Protocol>()?,
                    None => Protocol::default(),
                };
                let host = layer
                    .host
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::MissingField("host"))?;
                let port = match &layer.port {
                    Some(p) => parse_port(p)?,
                    None => protocol.default_port(),
                };
                let path_prefix = normalize_path_prefix(layer.path_prefix.as_deref());
                (protocol, host, port, path_prefix)
            }
        };

        Ok(Self {
            host,
            protocol,
            port,
            api_version,
            project_id,
            token,
            keystone,
            cloud,
            path_prefix,
        })
    }

    /// Assembles `{protocol}://{host}[:{port}]{path_prefix}/{api_version}/projects/{project_id}/`.
    ///
    /// The port is left out only for https on 443.
    ///
    /// # Examples
    ///
    /// ```
    /// use iron_core::config::{ConfigOverrides, ConfigResolver, ConfigSources};
    ///
    /// let overrides = ConfigOverrides {
    ///     token: Some("T".into()),
    ///     project_id: Some("P".into()),
    ///     ..Default::default()
    /// };
    /// let config = ConfigResolver::new(ConfigSources::default())
    ///     .resolve(Some("iron_worker"), &overrides)
    ///     .unwrap();
    /// assert_eq!(config.base_url(), "https://worker-aws-us-east-1.iron.io/2/projects/P/");
    /// ```
    pub fn base_url(&self) -> String {
        let mut url = format!("{}://{}", self.protocol, self.host);
        if !(self.protocol == Protocol::Https && self.port == HTTPS_PORT) {
            url.push_str(&format!(":{}", self.port));
        }
        url.push_str(&self.path_prefix);
        url.push_str(&format!("/{}/", self.api_version));
        if !self.project_id.is_empty() {
            url.push_str(&format!("projects/{}/", self.project_id));
        }
        url
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("port", &self.port)
            .field("api_version", &self.api_version)
            .field("project_id", &self.project_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("keystone", &self.keystone)
            .field("cloud", &self.cloud)
            .field("path_prefix", &self.path_prefix)
            .finish()
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(value.to_string())),
    }
}

fn normalize_path_prefix(prefix: Option<&str>) -> String {
    let trimmed = prefix.unwrap_or("").trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse_cloud(cloud: &str) -> Result<(Protocol, String, u16, String), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCloudUrl {
        url: cloud.to_string(),
        reason,
    };

    let url = Url::parse(cloud).map_err(|e| invalid(e.to_string()))?;
    let protocol: Protocol = url
        .scheme()
        .parse()
        .map_err(|_| invalid(format!("unsupported scheme `{}`", url.scheme())))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("no host".to_string()))?
        .to_string();
    let port = url.port().unwrap_or_else(|| protocol.default_port());
    let path_prefix = normalize_path_prefix(Some(url.path()));

    Ok((protocol, host, port, path_prefix))
}

/// Merges every configuration layer into a [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    sources: ConfigSources,
}

impl ConfigResolver {
    /// Creates a resolver reading from `sources`.
    pub fn new(sources: ConfigSources) -> Self {
        Self { sources }
    }

    /// Creates a resolver for the current process.
    pub fn from_process() -> Self {
        Self::new(ConfigSources::from_process())
    }

    /// Resolves configuration for `product`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required field is unset after all layers, the
    /// keystone block is partial, or a value is out of range.
    pub fn resolve(
        &self,
        product: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<Config, ConfigError> {
        let config = Config::from_layer(self.merge_layers(product, overrides))?;
        tracing::debug!(
            product = product.unwrap_or(GENERIC_ENV_PREFIX),
            host = %config.host,
            protocol = %config.protocol,
            port = config.port,
            api_version = %config.api_version,
            "Resolved configuration"
        );
        Ok(config)
    }

    fn merge_layers(&self, product: Option<&str>, overrides: &ConfigOverrides) -> ConfigLayer {
        let mut merged = ConfigLayer::defaults();

        if let Some(preset) = product.and_then(preset) {
            merged.merge(ConfigLayer::from_preset(preset));
        }

        if let Some(path) = &self.sources.global_file {
            apply_file(&mut merged, path, product);
        }

        merged.merge(ConfigLayer::from_env(&self.sources.env, GENERIC_ENV_PREFIX));
        if let Some(product) = product {
            merged.merge(ConfigLayer::from_env(&self.sources.env, product));
        }

        if let Some(path) = &self.sources.local_file {
            apply_file(&mut merged, path, product);
        }

        if let Some(path) = &overrides.config_file {
            apply_file(&mut merged, path, product);
        }

        merged.merge(overrides.layer());
        merged
    }
}

fn apply_file(merged: &mut ConfigLayer, path: &Path, product: Option<&str>) {
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "Config file not found, skipping");
        return;
    }
    match read_config_file(path, product) {
        Ok(layer) => {
            tracing::debug!(path = %path.display(), "Applied config file");
            merged.merge(layer);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
        }
    }
}

/// Resolves configuration for the current process.
///
/// Shorthand for `ConfigResolver::from_process().resolve(product, overrides)`.
pub fn resolve(product: Option<&str>, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    ConfigResolver::from_process().resolve(product, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn minimal() -> ConfigOverrides {
        ConfigOverrides {
            token: Some("T".into()),
            project_id: Some("P".into()),
            ..Default::default()
        }
    }

    fn write_json(dir: &TempDir, name: &str, value: Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn empty() -> ConfigResolver {
        ConfigResolver::new(ConfigSources::default())
    }

    #[test]
    fn test_bare_minimum_from_overrides() {
        let overrides = ConfigOverrides {
            api_version: Some("2".into()),
            host: Some("worker-aws-us-east-1.iron.io".into()),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();

        assert_eq!(config.protocol, Protocol::Https);
        assert_eq!(config.port, 443);
        assert_eq!(config.token.as_deref(), Some("T"));
        assert_eq!(
            config.base_url(),
            "https://worker-aws-us-east-1.iron.io/2/projects/P/"
        );
    }

    #[test]
    fn test_http_port_is_included() {
        let overrides = ConfigOverrides {
            protocol: Some(Protocol::Http),
            port: Some(80),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();
        assert_eq!(
            config.base_url(),
            "http://worker-aws-us-east-1.iron.io:80/2/projects/P/"
        );
    }

    #[test]
    fn test_https_non_default_port_is_included() {
        let overrides = ConfigOverrides {
            port: Some(8443),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_mq"), &overrides).unwrap();
        assert_eq!(
            config.base_url(),
            "https://mq-aws-us-east-1.iron.io:8443/1/projects/P/"
        );
    }

    #[test]
    fn test_path_prefix_is_normalized() {
        let overrides = ConfigOverrides {
            path_prefix: Some("api/".into()),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_cache"), &overrides).unwrap();
        assert_eq!(
            config.base_url(),
            "https://cache-aws-us-east-1.iron.io/api/1/projects/P/"
        );
    }

    #[test]
    fn test_missing_required_fields() {
        let err = empty()
            .resolve(Some("iron_worker"), &ConfigOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));

        let no_token = ConfigOverrides {
            project_id: Some("P".into()),
            ..Default::default()
        };
        assert_eq!(
            empty().resolve(Some("iron_worker"), &no_token).unwrap_err(),
            ConfigError::MissingField("token")
        );

        let no_project = ConfigOverrides {
            token: Some("T".into()),
            ..Default::default()
        };
        assert_eq!(
            empty().resolve(Some("iron_worker"), &no_project).unwrap_err(),
            ConfigError::MissingField("project_id")
        );
    }

    #[test]
    fn test_missing_host_without_preset() {
        let err = empty().resolve(Some("iron_other"), &minimal()).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("api_version"));

        let overrides = ConfigOverrides {
            api_version: Some("1".into()),
            ..minimal()
        };
        let err = empty().resolve(None, &overrides).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("host"));
    }

    #[test]
    fn test_incomplete_keystone_is_rejected() {
        let overrides = ConfigOverrides {
            project_id: Some("P".into()),
            keystone: Some(KeystoneConfig {
                server: Some("http://localhost".into()),
                tenant: Some("tenant".into()),
                username: Some("user".into()),
                password: None,
            }),
            ..Default::default()
        };
        let err = empty().resolve(Some("iron_worker"), &overrides).unwrap_err();
        assert_eq!(
            err,
            ConfigError::IncompleteKeystone {
                missing: vec!["password"]
            }
        );
    }

    #[test]
    fn test_invalid_port_and_protocol() {
        let sources = ConfigSources::default().env_var("IRON_PORT", "not-a-port");
        let err = ConfigResolver::new(sources)
            .resolve(Some("iron_worker"), &minimal())
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidPort("not-a-port".into()));

        let sources = ConfigSources::default().env_var("IRON_PROTOCOL", "ftp");
        let err = ConfigResolver::new(sources)
            .resolve(Some("iron_worker"), &minimal())
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidProtocol("ftp".into()));
    }

    #[test]
    fn test_cloud_replaces_connection_fields() {
        let overrides = ConfigOverrides {
            host: Some("ignored.example.com".into()),
            protocol: Some(Protocol::Https),
            port: Some(443),
            cloud: Some("http://localhost:8080/worker/".into()),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();

        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8080);
        assert_eq!(config.path_prefix, "/worker");
        assert_eq!(
            config.base_url(),
            "http://localhost:8080/worker/2/projects/P/"
        );
    }

    #[test]
    fn test_cloud_without_port_uses_scheme_default() {
        let overrides = ConfigOverrides {
            cloud: Some("https://eu.iron.io".into()),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_mq"), &overrides).unwrap();
        assert_eq!(config.port, 443);
        assert_eq!(config.base_url(), "https://eu.iron.io/1/projects/P/");
    }

    #[test]
    fn test_invalid_cloud_url() {
        let overrides = ConfigOverrides {
            cloud: Some("not a url".into()),
            ..minimal()
        };
        let err = empty().resolve(Some("iron_mq"), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCloudUrl { .. }));
    }

    #[test]
    fn test_config_file_flat_keys() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "config.json",
            json!({
                "host": "file-host",
                "protocol": "http",
                "port": "8080",
                "api_version": 3,
                "project_id": "file-project",
                "token": "file-token"
            }),
        );
        let overrides = ConfigOverrides {
            config_file: Some(path),
            ..Default::default()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();

        assert_eq!(config.host, "file-host");
        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_version, "3");
        assert_eq!(config.project_id, "file-project");
        assert_eq!(config.token.as_deref(), Some("file-token"));
    }

    #[test]
    fn test_config_file_product_keys_win_over_flat() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "config.json",
            json!({
                "host": "flat-host",
                "project_id": "flat-project",
                "iron_worker": {
                    "api_version": 7,
                    "project_id": "product-project",
                    "token": "product-token"
                },
                "iron_mq": {
                    "token": "mq-token"
                }
            }),
        );
        let overrides = ConfigOverrides {
            config_file: Some(path),
            ..Default::default()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();

        assert_eq!(config.host, "flat-host");
        assert_eq!(config.api_version, "7");
        assert_eq!(config.project_id, "product-project");
        assert_eq!(config.token.as_deref(), Some("product-token"));
    }

    #[test]
    fn test_overrides_beat_config_file() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "config.json",
            json!({ "project_id": "file-project", "token": "file-token", "host": "file-host" }),
        );
        let overrides = ConfigOverrides {
            config_file: Some(path),
            project_id: Some("args-project".into()),
            token: Some("args-token".into()),
            ..Default::default()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();

        assert_eq!(config.host, "file-host");
        assert_eq!(config.project_id, "args-project");
        assert_eq!(config.token.as_deref(), Some("args-token"));
    }

    #[test]
    fn test_malformed_and_missing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        let wrong_shape = write_json(&dir, "array.json", json!(["host"]));

        let sources = ConfigSources::default()
            .global_file(dir.path().join("does-not-exist.json"))
            .local_file(wrong_shape);
        let overrides = ConfigOverrides {
            config_file: Some(broken),
            ..minimal()
        };
        let config = ConfigResolver::new(sources)
            .resolve(Some("iron_worker"), &overrides)
            .unwrap();
        assert_eq!(config.host, "worker-aws-us-east-1.iron.io");
    }

    #[test]
    fn test_keystone_from_file() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "keystone.json",
            json!({
                "project_id": "keystone-project",
                "keystone": {
                    "server": "http://localhost",
                    "tenant": "keystone-tenant",
                    "username": "keystone-username",
                    "password": "keystone-password"
                }
            }),
        );
        let overrides = ConfigOverrides {
            config_file: Some(path),
            ..Default::default()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();

        let keystone = config.keystone.unwrap();
        assert_eq!(keystone.tenant, "keystone-tenant");
        assert_eq!(keystone.password, "keystone-password");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_env_product_beats_generic() {
        let sources = ConfigSources::default()
            .env_var("IRON_TOKEN", "generic-token")
            .env_var("IRON_PROJECT_ID", "generic-project")
            .env_var("IRON_WORKER_TOKEN", "worker-token")
            .env_var("IRON_MQ_TOKEN", "mq-token");
        let config = ConfigResolver::new(sources)
            .resolve(Some("iron_worker"), &ConfigOverrides::default())
            .unwrap();

        assert_eq!(config.token.as_deref(), Some("worker-token"));
        assert_eq!(config.project_id, "generic-project");
    }

    /// Every layer sets `host`; dropping the top layer each round must expose the
    /// next one down.
    #[test]
    fn test_layer_precedence() {
        let dir = TempDir::new().unwrap();
        let global = write_json(&dir, "global.json", json!({ "host": "global" }));
        let local = write_json(&dir, "local.json", json!({ "host": "local" }));
        let explicit = write_json(&dir, "explicit.json", json!({ "host": "explicit" }));

        let build = |levels: usize| {
            let mut sources = ConfigSources::default();
            let mut overrides = minimal();
            if levels >= 3 {
                sources.global_file = Some(global.clone());
            }
            if levels >= 4 {
                sources.env.insert("IRON_HOST".into(), "env".into());
            }
            if levels >= 5 {
                sources.env.insert("IRON_WORKER_HOST".into(), "product-env".into());
            }
            if levels >= 6 {
                sources.local_file = Some(local.clone());
            }
            if levels >= 7 {
                overrides.config_file = Some(explicit.clone());
            }
            if levels >= 8 {
                overrides.host = Some("args".into());
            }
            ConfigResolver::new(sources)
                .resolve(Some("iron_worker"), &overrides)
                .unwrap()
                .host
        };

        let expected = [
            (2, "worker-aws-us-east-1.iron.io"),
            (3, "global"),
            (4, "env"),
            (5, "product-env"),
            (6, "local"),
            (7, "explicit"),
            (8, "args"),
        ];
        for (levels, host) in expected {
            assert_eq!(build(levels), host, "with {} layers", levels);
        }
    }

    #[test]
    fn test_lower_layers_fill_unset_keys() {
        let dir = TempDir::new().unwrap();
        let global = write_json(
            &dir,
            "global.json",
            json!({ "token": "global-token", "project_id": "global-project" }),
        );
        let local = write_json(&dir, "local.json", json!({ "project_id": "local-project" }));
        let sources = ConfigSources::default()
            .global_file(global)
            .local_file(local)
            .env_var("IRON_PORT", "9443");
        let config = ConfigResolver::new(sources)
            .resolve(Some("iron_worker"), &ConfigOverrides::default())
            .unwrap();

        assert_eq!(config.token.as_deref(), Some("global-token"));
        assert_eq!(config.project_id, "local-project");
        assert_eq!(config.port, 9443);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let overrides = ConfigOverrides {
            keystone: Some(KeystoneCredentials::new("http://ks", "t", "u", "hunter2").into()),
            token: Some("secret-token".into()),
            ..minimal()
        };
        let config = empty().resolve(Some("iron_worker"), &overrides).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("secret-token"));
    }
}
