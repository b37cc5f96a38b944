// Control probe: dial the hub once and exercise its text command surface.
use anyhow::{Context, Result};
use clap::Parser;
use eventhub_test_harness::{observability, probe};
use eventhub_transport::{Connection, Connector, WebSocketConnector};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "eventhub-control-probe")]
#[command(about = "Send SUBSCRIBE/UNSUBSCRIBE/PUBLISH/LIST to an event hub and log its replies")]
struct Args {
    /// Subscriber endpoint to dial
    #[arg(long, env = "EVENTHUB_LOADTEST_ENDPOINT", default_value = "ws://127.0.0.1:8080/test1")]
    endpoint: String,

    /// Topic used for SUBSCRIBE and UNSUBSCRIBE
    #[arg(long, default_value = "test2")]
    topic: String,

    /// Text sent with PUBLISH
    #[arg(long, default_value = "Here comes a very very big message yo!")]
    message: String,

    /// Pause after each command in milliseconds
    #[arg(long, default_value = "500")]
    pause_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args = Args::parse();
    info!(endpoint = %args.endpoint, topic = %args.topic, "Starting control probe");

    let mut connection = WebSocketConnector
        .connect(&args.endpoint)
        .await
        .with_context(|| format!("connect to {}", args.endpoint))?;
    let script = probe::script(&args.topic, &args.message);
    let replies = probe::run_script(&mut connection, &script, Duration::from_millis(args.pause_ms))
        .await
        .context("run control script")?;
    info!(replies = replies.len(), "control probe finished");

    if let Err(err) = connection.close().await {
        warn!(error = %err, "close failed");
    }
    Ok(())
}
