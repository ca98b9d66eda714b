//! # iron_core - Shared plumbing for Iron.io API clients
//!
//! `iron_core` resolves connection settings from layered sources, builds the API base
//! URL, keeps an authentication token current, and sends requests with automatic
//! retry of transient server failures. Product clients (IronWorker, IronMQ,
//! IronCache) are built on top of it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use iron_core::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), iron_core::Error> {
//!     // Token and project can also come from IRON_TOKEN / IRON_PROJECT_ID,
//!     // ~/.iron.json or ./iron.json
//!     let client = Client::builder("iron_worker_rust", "0.1.0")
//!         .product("iron_worker")
//!         .token("TOKEN")
//!         .project_id("PROJECT")
//!         .build()?;
//!
//!     println!("Talking to {}", client.base_url());
//!
//!     let codes = client.get("codes").await?;
//!     println!("Codes: {:?}", codes.data);
//!     println!("Request took {:?}", codes.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Each key is taken from the highest-precedence layer that sets it: built-in
//! defaults, product preset, `~/.iron.json`, `IRON_*` variables, `{PRODUCT}_*`
//! variables, `./iron.json`, an explicit config file, then values given to the
//! builder. See [`config`] for details.
//!
//! ## Error Handling
//!
//! ```no_run
//! use iron_core::{Client, ConfigError, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder("app", "1").product("iron_mq").token("T").project_id("P").build()?;
//! match client.get("queues").await {
//!     Ok(response) => println!("Success: {:?}", response.data),
//!     Err(Error::HttpError { status, message, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, message);
//!     }
//!     Err(Error::Configuration(ConfigError::MissingField(field))) => {
//!         eprintln!("Set {} first", field);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retries
//!
//! Responses with status 503 or 504 are retried up to 5 times, waiting 0.5s, 1s,
//! 2s, 4s and 8s. When the retries run out, the last response is reported as an
//! [`Error::HttpError`]. Connection failures are not retried.

pub mod auth;
mod client;
pub mod config;
mod error;
pub mod metadata;
mod response;
pub mod retry;
pub mod timestamp;

pub use auth::{KeystoneToken, StaticToken, TokenProvider};
pub use client::{Client, ClientBuilder};
pub use config::{Config, ConfigOverrides, ConfigResolver, ConfigSources, Protocol};
pub use error::{ConfigError, Error, Result};
pub use response::{Response, ResponseBody};
pub use retry::{RetryPredicate, RetryStrategy};
