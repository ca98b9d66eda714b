//! Basic example demonstrating configuration and simple requests.
//!
//! This example shows how to:
//! - Resolve configuration for a product from env vars and `iron.json` files
//! - Make GET requests and decode them into typed structs
//! - POST JSON payloads
//! - Inspect response metadata
//!
//! Set `IRON_TOKEN` and `IRON_PROJECT_ID` (or write them to `./iron.json`), then
//! run with: `cargo run --example basic_call`

use iron_core::{Client, ConfigError, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct CodeList {
    codes: Vec<Code>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Code {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct NewTask<'a> {
    code_name: &'a str,
    payload: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskBatch<'a> {
    tasks: Vec<NewTask<'a>>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("iron_core=debug,basic_call=info")
        .init();

    let client = match Client::builder("iron_core_demo", env!("CARGO_PKG_VERSION"))
        .product("iron_worker")
        .build()
    {
        Ok(client) => client,
        Err(Error::Configuration(ConfigError::MissingField(field))) => {
            eprintln!(
                "No {} configured. Set IRON_{} or add it to iron.json.",
                field,
                field.to_uppercase()
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("Base URL: {}", client.base_url());
    println!();

    println!("=== GET Request Example ===");
    let response = client.get("codes").await?;
    let codes: CodeList = response.json()?;

    for code in &codes.codes {
        println!("Code {}: {}", code.id, code.name);
    }
    println!("Request latency: {:?}", response.latency);
    println!("Status code: {}", response.status);
    println!("Attempts: {}", response.attempts);
    println!();

    println!("=== POST Request Example ===");
    let batch = TaskBatch {
        tasks: vec![NewTask {
            code_name: "hello",
            payload: "{}",
        }],
    };

    match client.post_json("tasks", &batch).await {
        Ok(queued) => {
            println!("Queued: {:?}", queued.data);
            println!("Status code: {}", queued.status);
        }
        Err(Error::HttpError {
            status, message, ..
        }) => {
            println!("Server refused the task ({}): {}", status, message);
        }
        Err(e) => return Err(e),
    }

    Ok(())
}
