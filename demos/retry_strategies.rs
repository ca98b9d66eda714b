//! Example demonstrating retry behavior.
//!
//! This example shows how to:
//! - Keep the default schedule for 503/504 responses
//! - Shorten or disable retries on a client
//! - Retry additional statuses with a predicate
//! - Wrap arbitrary async work in the standalone backoff helper
//!
//! Run with: `cargo run --example retry_strategies`

use http::{Method, StatusCode};
use iron_core::metadata::RequestMetadata;
use iron_core::retry::{retry, BackoffPolicy, RetryError, RetryOnStatus};
use iron_core::{Client, ConfigSources, Error, RetryStrategy};
use std::cell::Cell;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing to see retry attempts
    tracing_subscriber::fmt()
        .with_env_filter("iron_core=debug,retry_strategies=info")
        .init();

    println!("=== Default Strategy ===");
    let default = RetryStrategy::default();
    let schedule: Vec<Duration> = (1..=default.max_retries())
        .filter_map(|n| default.delay_for_attempt(n))
        .collect();
    println!("Delays after a 503/504: {:?}", schedule);
    println!();

    // Settings come only from the builder here, no env vars or files
    let builder = || {
        Client::builder("retry_demo", env!("CARGO_PKG_VERSION"))
            .sources(ConfigSources::default())
            .product("iron_mq")
            .token("TOKEN")
            .project_id("PROJECT")
    };

    println!("=== No Retry Strategy ===");
    let client_no_retry = builder().retry_strategy(RetryStrategy::None).build()?;
    match client_no_retry.get("queues").await {
        Ok(_) => println!("Unexpected success"),
        Err(e) => println!("Failed immediately (no retries): {}", e),
    }
    println!();

    println!("=== Short Exponential Backoff ===");
    println!("Delays: 100ms, 200ms, 400ms");
    let client_short = builder()
        .retry_strategy(RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_retries: 3,
        })
        .timeout(Duration::from_secs(5))
        .build()?;

    match client_short.get("queues").await {
        Ok(response) => println!("Succeeded after {} attempts", response.attempts),
        Err(e) => println!("Failed: {}", e),
    }
    println!();

    println!("=== Retrying 502 As Well ===");
    let client_custom = builder()
        .retry_predicate(Box::new(RetryOnStatus::new([
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ])))
        .build()?;

    // A single request can still opt out
    let metadata = RequestMetadata::new(Method::GET, "queues").without_retry();
    match client_custom.call(metadata, None).await {
        Ok(response) => println!("Status: {}", response.status),
        Err(e) => println!("Failed without retrying: {}", e),
    }
    println!();

    println!("=== Standalone Backoff Helper ===");
    let policy = BackoffPolicy::new(4, Duration::from_millis(50), 2.0)?;
    let calls = Cell::new(0);

    let outcome: Result<&str, RetryError<String>> = retry(
        &policy,
        |e: &String| e.starts_with("busy"),
        || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(format!("busy (call {})", n))
                } else {
                    Ok("done")
                }
            }
        },
    )
    .await;

    match outcome {
        Ok(value) => println!("Finished with {:?} after {} calls", value, calls.get()),
        Err(RetryError::TooManyRetries { attempts, last_error }) => {
            println!("Gave up after {} attempts: {:?}", attempts, last_error)
        }
        Err(RetryError::Aborted(e)) => println!("Stopped on a permanent error: {}", e),
    }

    Ok(())
}
