//! Command-line interface for the appliance gateway bridge.

mod mqtt;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use unitbridge_core::discovery::{parse_endpoint_list, DiscoveryEngine};
use unitbridge_core::publish::{LogPublisher, Publisher};
use unitbridge_core::scheduler::PollingScheduler;
use unitbridge_core::session::Session;
use unitbridge_core::settings::Settings;
use unitbridge_core::transport::{Endpoint, WsTransport, DEFAULT_PORT};
use unitbridge_core::writer::PropertyWriter;

use crate::mqtt::{MqttPublisher, SetCommand};

/// Bridge an appliance gateway to MQTT.
#[derive(Parser, Debug)]
#[command(name = "unitbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the properties of a gateway and write a settings file.
    Discover {
        /// Gateway host or IP address.
        #[arg(long)]
        host: String,
        /// Gateway port.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// File with additional endpoints to probe, one per line.
        #[arg(short, long)]
        endpoints: Option<PathBuf>,
        /// Settings file to write.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Leave sampled values out of the settings file.
        #[arg(long)]
        without_values: bool,
    },
    /// Print the identity of a gateway.
    Info {
        /// Gateway host or IP address.
        #[arg(long)]
        host: String,
        /// Gateway port.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Poll the properties of a settings file and publish them.
    Poll {
        /// Settings file written by `discover`.
        #[arg(short, long)]
        settings: PathBuf,
        /// Log values instead of publishing them to the broker.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Discover {
            host,
            port,
            endpoints,
            output,
            without_values,
        } => run_discover(host, port, endpoints, output, !without_values).await,
        Command::Info { host, port } => run_info(host, port).await,
        Command::Poll { settings, dry_run } => run_poll(&settings, dry_run).await,
    }
}

fn init_logging(verbose: bool) {
    // JSON output for service deployments
    let json_logging = std::env::var("UNITBRIDGE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

fn load_engine(endpoints: Option<&Path>) -> Result<DiscoveryEngine> {
    let Some(path) = endpoints else {
        return Ok(DiscoveryEngine::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read endpoint list {}", path.display()))?;
    Ok(DiscoveryEngine::new(parse_endpoint_list(&text)))
}

async fn run_discover(
    host: String,
    port: u16,
    endpoints: Option<PathBuf>,
    output: Option<PathBuf>,
    include_values: bool,
) -> Result<()> {
    let engine = load_engine(endpoints.as_deref())?;
    let endpoint = Endpoint::new(host, port);
    let mut session = Session::new(WsTransport::new(), endpoint.clone());

    let properties = engine
        .discover(&mut session)
        .await
        .with_context(|| format!("Discovery on {} failed", endpoint))?;
    for property in properties.iter() {
        info!("{}", property);
    }

    let settings = Settings::new(endpoint, properties);
    match output {
        Some(path) => {
            settings
                .save(&path, include_values)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), count = settings.properties.len(), "Settings written");
        }
        None => println!("{}", settings.to_json(include_values)?),
    }
    Ok(())
}

async fn run_info(host: String, port: u16) -> Result<()> {
    let endpoint = Endpoint::new(host, port);
    let mut session = Session::new(WsTransport::new(), endpoint.clone());
    session
        .connect()
        .await
        .with_context(|| format!("Could not connect to {}", endpoint))?;
    let info = session.device_info().await;
    session.disconnect().await;

    match info? {
        Some(info) => println!("{}", info),
        None => println!("{} does not report device information", endpoint),
    }
    Ok(())
}

async fn run_poll(path: &Path, dry_run: bool) -> Result<()> {
    let settings = Settings::load(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    info!(
        device = %settings.device,
        properties = settings.properties.len(),
        "Starting polling"
    );

    let mut commands = None;
    let publisher: Arc<dyn Publisher> = if dry_run {
        Arc::new(LogPublisher)
    } else {
        let (publisher, receiver) =
            MqttPublisher::connect(&settings.broker, settings.batch.topic.clone()).await?;
        commands = Some(receiver);
        Arc::new(publisher)
    };

    let session = Session::new(WsTransport::new(), settings.device.clone()).shared();
    let writer = PropertyWriter::new(session.clone(), settings.properties.clone(), publisher.clone());
    let scheduler = PollingScheduler::new(
        session,
        settings.properties,
        publisher,
        settings.batch,
        chrono::Utc::now(),
    );

    if let Some(commands) = commands {
        tokio::spawn(handle_set_commands(writer, commands));
    }

    tokio::select! {
        _ = scheduler.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }
    Ok(())
}

async fn handle_set_commands(
    writer: PropertyWriter<WsTransport>,
    mut commands: tokio::sync::mpsc::Receiver<SetCommand>,
) {
    while let Some(SetCommand { id, value }) = commands.recv().await {
        match writer.write(&id, &value).await {
            Ok(verified) => info!(id = %id, value = %verified, "Property written"),
            Err(e) => error!(id = %id, "Write failed: {}", e),
        }
    }
    warn!("Set command channel closed");
}
