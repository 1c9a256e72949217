//! # gs-cli
//!
//! Loads a host's YAML topology and runs it to completion or until a
//! termination signal, with no application-specific handlers attached.
//! Useful for smoke-testing a topology in isolation; the Scenario D/E/F
//! demos under `demos/` wire their own handlers directly against
//! `gs-broker`/`gs-dispatch`/`gs-host` instead of going through this
//! binary.

use anyhow::Result;
use clap::Parser;
use gs_broker::adapter::BrokerAdapter;
use gs_broker::kafka::KafkaBroker;
use gs_broker::memory::MemoryBroker;
use gs_broker::stream::Stream;
use gs_dispatch::ChangeDispatcher;
use gs_host::{BrokerSpec, HostSpec, ServiceHost};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gs-cli")]
#[command(about = "Run a stateful-object streaming host from a YAML topology")]
struct Args {
    /// Path to the host YAML configuration file.
    #[arg(short = 's', long)]
    host_spec: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let yaml = std::fs::read_to_string(&args.host_spec)?;
    let spec = HostSpec::from_yaml(&yaml)?;

    let broker: Arc<dyn BrokerAdapter> = match &spec.broker {
        BrokerSpec::Memory => Arc::new(MemoryBroker::new()),
        BrokerSpec::Kafka { brokers, group_id } => {
            Arc::new(KafkaBroker::connect(brokers, group_id)?)
        }
    };

    let own_stream = Stream::bind(broker, &spec.own_topic, spec.partitions).await?;
    let dispatcher = Arc::new(ChangeDispatcher::new());
    let host = ServiceHost::new(spec.name.clone(), own_stream, dispatcher);

    host.start(None).await?;
    tracing::info!(host = %host.name(), "host running, waiting for termination signal");

    while host.state() != gs_host::HostState::Stopped {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    Ok(())
}
