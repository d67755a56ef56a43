// Leasekeep polling client
//
// Submits an async_add request and polls check_task_status until the request leaves
// the running state.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use leasekeep_rpc::{init_telemetry, RetryPolicy, RpcClient, TelemetryConfig};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "leasekeep-client")]
#[command(about = "Submit an async_add request and poll until it finishes")]
#[command(version)]
struct Cli {
    /// RPC endpoint URL
    #[arg(long, env = "RPC_URL", default_value = leasekeep_rpc::config::DEFAULT_RPC_URL)]
    url: String,

    /// First operand
    #[arg(short, default_value_t = 5)]
    x: i64,

    /// Second operand
    #[arg(short, default_value_t = 3)]
    y: i64,

    /// Request id (minted when omitted)
    #[arg(long)]
    id: Option<String>,

    /// Seconds between status checks
    #[arg(long, default_value_t = 5)]
    poll_seconds: u64,

    /// Attempts per call before giving up on transient errors
    #[arg(long, default_value_t = 3)]
    retries: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(TelemetryConfig::from_env().with_service_name("leasekeep-client"))?;

    let cli = Cli::parse();
    let retry = RetryPolicy::default().with_max_attempts(cli.retries);
    let client = RpcClient::new(&cli.url)
        .context("Failed to build HTTP client")?
        .with_retry(retry);

    let mut status = client
        .async_add(Value::from(cli.x), Value::from(cli.y), cli.id)
        .await
        .context("async_add request failed")?;
    let request_id = match &status.id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    tracing::info!(%request_id, status = %status.status, "Submitted async task");

    let poll = Duration::from_secs(cli.poll_seconds);
    while status.status.is_running() {
        tokio::time::sleep(poll).await;
        status = client
            .check_task_status(&request_id)
            .await
            .context("check_task_status request failed")?;
        tracing::info!(%request_id, status = %status.status, "Task status");
    }

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
