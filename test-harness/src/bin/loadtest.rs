// Load test entrypoint: run one test definition against a live hub or an in-process one.
use anyhow::{Context, Result};
use clap::Parser;
use eventhub_test_harness::{
    DefinitionArgs, Orchestrator, RunFailure, RunReport, TestDefinition, observability,
};
use eventhub_transport::{Connector, MemoryHub, Publisher, RedisPublisher, WebSocketConnector};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "eventhub-loadtest")]
#[command(about = "Connect N subscribers to an event hub, publish checksummed events, report latency")]
struct Args {
    #[command(flatten)]
    definition: DefinitionArgs,

    /// Run against an in-process hub instead of the configured endpoint and broker
    #[arg(long, env = "EVENTHUB_LOADTEST_IN_PROCESS")]
    in_process: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// On abort, also print latency statistics of the clients that completed
    #[arg(long)]
    report_partial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args = Args::parse();
    let definition = TestDefinition::resolve(&args.definition)?;
    info!(
        name = %definition.name,
        clients = definition.num_clients,
        iterations = definition.iterations,
        payload_size = definition.payload_size,
        endpoint = %definition.subscriber_endpoint,
        producer = %definition.producer_target,
        topic = %definition.producer_topic,
        in_process = args.in_process,
        "Starting load test"
    );

    if args.in_process {
        let hub = MemoryHub::new();
        hub.listen(&definition.subscriber_endpoint, &definition.producer_topic);
        return execute(&args, definition, hub.clone(), hub).await;
    }

    let publisher = RedisPublisher::connect(&definition.producer_target)
        .await
        .with_context(|| format!("connect producer to {}", definition.producer_target))?;
    execute(&args, definition, WebSocketConnector, publisher).await
}

async fn execute<C: Connector, P: Publisher>(
    args: &Args,
    definition: TestDefinition,
    connector: C,
    publisher: P,
) -> Result<()> {
    let orchestrator = Orchestrator::new(definition, connector, publisher)?;
    match orchestrator.run().await {
        Ok(report) => print_report(&report, args.json),
        Err(failure) => {
            if args.report_partial {
                print_partial(&failure, args.json)?;
            }
            Err(anyhow::Error::new(failure))
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("encode report")?;
        println!("{text}");
    } else {
        print!("{report}");
    }
    Ok(())
}

fn print_partial(failure: &RunFailure, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(&failure.to_json()).context("encode failure")?;
        println!("{text}");
    } else {
        print!("{}", failure.partial_report());
    }
    Ok(())
}
