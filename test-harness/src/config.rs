// Test definition: built-in defaults, then CLI/env flags, then an optional YAML override file.
use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HarnessError;

pub const DEFAULT_NAME: &str = "Test 1";
pub const DEFAULT_NUM_CLIENTS: usize = 20_000;
pub const DEFAULT_PAYLOAD_SIZE: usize = 1000;
pub const DEFAULT_ITERATIONS: usize = 10;
pub const DEFAULT_PRODUCER_TARGET: &str = "127.0.0.1:6379";
pub const DEFAULT_PRODUCER_TOPIC: &str = "eventhub.test1";
pub const DEFAULT_SUBSCRIBER_ENDPOINT: &str = "ws://127.0.0.1:8080/test1";
pub const DEFAULT_SPAWN_INTERVAL_MS: u64 = 1;

pub const CONFIG_ENV: &str = "EVENTHUB_LOADTEST_CONFIG";

/// Immutable description of one load run; shared read-only once workers start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDefinition {
    // Report label only.
    pub name: String,
    pub num_clients: usize,
    // Filler bytes per event payload.
    pub payload_size: usize,
    // Events each client must verify before completing.
    pub iterations: usize,
    // Publish side channel address.
    pub producer_target: String,
    pub producer_topic: String,
    // Address every client dials.
    pub subscriber_endpoint: String,
    // None waits forever.
    pub connect_timeout: Option<Duration>,
    // None waits forever.
    pub completion_timeout: Option<Duration>,
    // None allows every worker to dial at once.
    pub max_concurrent_connects: Option<usize>,
    // Pause between worker spawns.
    pub spawn_interval: Duration,
    // Extra topics each client subscribes to before signaling readiness.
    pub subscribe: Vec<String>,
}

impl Default for TestDefinition {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            num_clients: DEFAULT_NUM_CLIENTS,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            iterations: DEFAULT_ITERATIONS,
            producer_target: DEFAULT_PRODUCER_TARGET.to_string(),
            producer_topic: DEFAULT_PRODUCER_TOPIC.to_string(),
            subscriber_endpoint: DEFAULT_SUBSCRIBER_ENDPOINT.to_string(),
            connect_timeout: None,
            completion_timeout: None,
            max_concurrent_connects: None,
            spawn_interval: Duration::from_millis(DEFAULT_SPAWN_INTERVAL_MS),
            subscribe: Vec::new(),
        }
    }
}

/// Command-line flags describing a run; every flag can also come from the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct DefinitionArgs {
    /// Run name shown in the report [default: "Test 1"]
    #[arg(long, env = "EVENTHUB_LOADTEST_NAME")]
    pub name: Option<String>,

    /// Number of concurrent subscriber clients [default: 20000]
    #[arg(long, env = "EVENTHUB_LOADTEST_CLIENTS")]
    pub clients: Option<usize>,

    /// Payload size in bytes [default: 1000]
    #[arg(long, env = "EVENTHUB_LOADTEST_PAYLOAD_SIZE")]
    pub payload_size: Option<usize>,

    /// Events every client must receive [default: 10]
    #[arg(long, env = "EVENTHUB_LOADTEST_ITERATIONS")]
    pub iterations: Option<usize>,

    /// Publish broker address (host:port or redis:// URL) [default: 127.0.0.1:6379]
    #[arg(long, env = "EVENTHUB_LOADTEST_PRODUCER_TARGET")]
    pub producer_target: Option<String>,

    /// Topic events are published to [default: eventhub.test1]
    #[arg(long, env = "EVENTHUB_LOADTEST_PRODUCER_TOPIC")]
    pub producer_topic: Option<String>,

    /// Subscriber endpoint every client dials [default: ws://127.0.0.1:8080/test1]
    #[arg(long, env = "EVENTHUB_LOADTEST_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Connect barrier deadline in milliseconds (0 = no timeout)
    #[arg(long, env = "EVENTHUB_LOADTEST_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Completion barrier deadline in milliseconds (0 = no timeout)
    #[arg(long, env = "EVENTHUB_LOADTEST_COMPLETION_TIMEOUT_MS")]
    pub completion_timeout_ms: Option<u64>,

    /// Upper bound on simultaneous connection attempts (0 = unbounded)
    #[arg(long, env = "EVENTHUB_LOADTEST_MAX_CONCURRENT_CONNECTS")]
    pub max_concurrent_connects: Option<usize>,

    /// Pause between client spawns in milliseconds [default: 1]
    #[arg(long, env = "EVENTHUB_LOADTEST_SPAWN_INTERVAL_MS")]
    pub spawn_interval_ms: Option<u64>,

    /// Extra topic each client subscribes to before signaling ready (repeatable)
    #[arg(long, env = "EVENTHUB_LOADTEST_SUBSCRIBE", value_delimiter = ',')]
    pub subscribe: Vec<String>,

    /// YAML file whose fields override every other source
    #[arg(long, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestDefinitionOverride {
    name: Option<String>,
    num_clients: Option<usize>,
    payload_size: Option<usize>,
    iterations: Option<usize>,
    producer_target: Option<String>,
    producer_topic: Option<String>,
    subscriber_endpoint: Option<String>,
    connect_timeout_ms: Option<u64>,
    completion_timeout_ms: Option<u64>,
    max_concurrent_connects: Option<usize>,
    spawn_interval_ms: Option<u64>,
    subscribe: Option<Vec<String>>,
}

fn millis_or_none(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

impl TestDefinition {
    /// Layer defaults, flags and the optional YAML file, then validate the result.
    pub fn resolve(args: &DefinitionArgs) -> Result<Self> {
        let mut definition = Self::default();
        definition.apply_args(args);
        if let Some(path) = &args.config {
            definition.apply_yaml_file(path)?;
        }
        definition.validate()?;
        Ok(definition)
    }

    pub fn apply_args(&mut self, args: &DefinitionArgs) {
        if let Some(value) = &args.name {
            self.name = value.clone();
        }
        if let Some(value) = args.clients {
            self.num_clients = value;
        }
        if let Some(value) = args.payload_size {
            self.payload_size = value;
        }
        if let Some(value) = args.iterations {
            self.iterations = value;
        }
        if let Some(value) = &args.producer_target {
            self.producer_target = value.clone();
        }
        if let Some(value) = &args.producer_topic {
            self.producer_topic = value.clone();
        }
        if let Some(value) = &args.endpoint {
            self.subscriber_endpoint = value.clone();
        }
        if let Some(value) = args.connect_timeout_ms {
            self.connect_timeout = millis_or_none(value);
        }
        if let Some(value) = args.completion_timeout_ms {
            self.completion_timeout = millis_or_none(value);
        }
        if let Some(value) = args.max_concurrent_connects {
            self.max_concurrent_connects = (value > 0).then_some(value);
        }
        if let Some(value) = args.spawn_interval_ms {
            self.spawn_interval = Duration::from_millis(value);
        }
        if !args.subscribe.is_empty() {
            self.subscribe = args.subscribe.clone();
        }
    }

    pub fn apply_yaml_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read test definition: {}", path.display()))?;
        self.apply_yaml(&contents)
            .with_context(|| format!("apply test definition: {}", path.display()))
    }

    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: TestDefinitionOverride =
            serde_yaml::from_str(contents).with_context(|| "parse test definition yaml")?;
        if let Some(value) = override_cfg.name {
            self.name = value;
        }
        if let Some(value) = override_cfg.num_clients {
            self.num_clients = value;
        }
        if let Some(value) = override_cfg.payload_size {
            self.payload_size = value;
        }
        if let Some(value) = override_cfg.iterations {
            self.iterations = value;
        }
        if let Some(value) = override_cfg.producer_target {
            self.producer_target = value;
        }
        if let Some(value) = override_cfg.producer_topic {
            self.producer_topic = value;
        }
        if let Some(value) = override_cfg.subscriber_endpoint {
            self.subscriber_endpoint = value;
        }
        if let Some(value) = override_cfg.connect_timeout_ms {
            self.connect_timeout = millis_or_none(value);
        }
        if let Some(value) = override_cfg.completion_timeout_ms {
            self.completion_timeout = millis_or_none(value);
        }
        if let Some(value) = override_cfg.max_concurrent_connects {
            self.max_concurrent_connects = (value > 0).then_some(value);
        }
        if let Some(value) = override_cfg.spawn_interval_ms {
            self.spawn_interval = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.subscribe {
            self.subscribe = value;
        }
        Ok(())
    }

    /// Reject definitions no run could satisfy.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |reason: &str| Err(HarnessError::InvalidDefinition(reason.to_string()));
        if self.num_clients == 0 {
            return invalid("num_clients must be at least 1");
        }
        if self.iterations == 0 {
            return invalid("iterations must be at least 1");
        }
        if self.producer_topic.trim().is_empty() {
            return invalid("producer_topic must not be empty");
        }
        if self.producer_target.trim().is_empty() {
            return invalid("producer_target must not be empty");
        }
        if self.subscriber_endpoint.trim().is_empty() {
            return invalid("subscriber_endpoint must not be empty");
        }
        if self
            .subscribe
            .iter()
            .any(|topic| topic.is_empty() || topic.contains(char::is_whitespace))
        {
            return invalid("subscribe topics must be non-empty and contain no whitespace");
        }
        Ok(())
    }

    /// Number of latency samples a successful run produces.
    pub fn expected_samples(&self) -> usize {
        self.num_clients.saturating_mul(self.iterations)
    }
}
