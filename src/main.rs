//! brokerlink command line
//!
//! Drives a [`BrokerClient`] from a fixed-interval control loop: listen on a
//! topic filter, publish a single message, or inspect the configuration.

use brokerlink::client::{BrokerClient, Callback, ConnectionState, LifecycleEvent};
use brokerlink::config::ClientConfig;
use brokerlink::observability::init_logging;
use brokerlink::protocol::{QoS, MATCH_ALL};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Client-side MQTT façade
#[derive(Parser)]
#[command(name = "brokerlink")]
#[command(about = "Connect to an MQTT broker from a single control loop")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker address (overrides the configuration file)
    #[arg(long, env = "BROKERLINK_HOST")]
    host: Option<String>,

    /// Broker port (overrides the configuration file; ignored if not a number)
    #[arg(long, env = "BROKERLINK_PORT")]
    port: Option<String>,

    /// Control loop interval in milliseconds
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// More verbose logging than the configured level (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a topic filter and log every message until Ctrl-C
    Listen {
        /// Topic filter
        #[arg(short, long, default_value = MATCH_ALL)]
        filter: String,
        /// QoS level (0-2)
        #[arg(short, long, default_value_t = 2)]
        qos: u8,
        /// Start a new connect sequence after the connection drops
        #[arg(long)]
        reconnect: bool,
    },
    /// Publish one message and exit
    Publish {
        topic: String,
        payload: String,
        /// QoS level (0-2)
        #[arg(short, long, default_value_t = 2)]
        qos: u8,
        #[arg(long)]
        retain: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings come from the file, so load it before anything logs
    let loaded = load_configuration(&cli);
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_logging(&logging, cli.verbose);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    debug!(endpoint = %config.broker.endpoint(), "Configuration loaded");

    let tick = Duration::from_millis(cli.tick_ms.max(1));
    let result = match cli.command {
        Commands::Listen {
            filter,
            qos,
            reconnect,
        } => listen(config, tick, &filter, parse_qos(qos), reconnect).await,
        Commands::Publish {
            topic,
            payload,
            qos,
            retain,
        } => publish_once(config, tick, &topic, &payload, parse_qos(qos), retain).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_file(path)?,
        None => {
            let default_path = PathBuf::from("brokerlink.toml");
            if default_path.exists() {
                ClientConfig::load_from_file(&default_path)?
            } else {
                ClientConfig::default()
            }
        }
    };

    if let Some(host) = &cli.host {
        config.broker.address = host.clone();
    }
    if let Some(port) = &cli.port {
        config.broker.set_port_str(port);
    }
    config.validate()?;
    Ok(config)
}

fn parse_qos(level: u8) -> QoS {
    QoS::from_u8(level).unwrap_or_else(|| {
        warn!("Invalid QoS level {}, using {}", level, QoS::default());
        QoS::default()
    })
}

async fn listen(
    config: ClientConfig,
    tick: Duration,
    filter: &str,
    qos: QoS,
    reconnect: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = BrokerClient::with_rumqttc(config);
    let mut lifecycle = client.lifecycle();

    client.subscribe_with_qos(
        filter,
        qos,
        Callback::new(|topic, payload| {
            info!(topic = %topic, bytes = payload.len(), "{}", String::from_utf8_lossy(payload));
        }),
    )?;
    client.connect();

    let mut ticker = interval(tick);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                client.tick().await;
            }
        }

        loop {
            match lifecycle.try_recv() {
                Ok(LifecycleEvent::Connected) => info!(filter = %filter, "Listening"),
                Ok(LifecycleEvent::ConnectionFailed(e)) => {
                    client.shutdown();
                    return Err(e.to_string().into());
                }
                Ok(LifecycleEvent::ConnectionLost) if reconnect => {
                    warn!("Connection lost, reconnecting");
                    client.connect();
                }
                Ok(LifecycleEvent::ConnectionLost) => {
                    client.shutdown();
                    return Err("connection lost".into());
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => warn!("Missed {} lifecycle events", skipped),
                Err(_) => break,
            }
        }
    }

    client.shutdown();
    info!(metrics = ?client.metrics(), "Listener stopped");
    Ok(())
}

async fn publish_once(
    config: ClientConfig,
    tick: Duration,
    topic: &str,
    payload: &str,
    qos: QoS,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = BrokerClient::with_rumqttc(config);
    let mut lifecycle = client.lifecycle();

    // Buffered, then flushed right after the handshake
    client.publish_with(topic, payload, qos, retain)?;
    client.connect();

    let mut ticker = interval(tick);
    while client.state() != ConnectionState::Connected {
        ticker.tick().await;
        client.tick().await;

        while let Ok(event) = lifecycle.try_recv() {
            if let LifecycleEvent::ConnectionFailed(e) = event {
                return Err(e.to_string().into());
            }
        }
    }

    info!(topic = %topic, "Published");
    client.disconnect();
    ticker.tick().await;
    client.tick().await;
    Ok(())
}

fn handle_config_command(config: ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        let mut shown = config;
        if shown.connection.password.is_some() {
            shown.connection.password = Some("***".to_string());
        }
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&shown)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}
