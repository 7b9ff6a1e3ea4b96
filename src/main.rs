//! mqtt-logging - Command line entry point
//!
//! Posts data points and log lines to the configured broker, and checks
//! configuration files.

use clap::{Parser, Subcommand};
use mqtt_logging::config::LoggingConfig;
use mqtt_logging::observability::{init_default_logging, metrics};
use mqtt_logging::{DirectPublisher, LoggerFactory, PublishOutcome};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// Forward log lines and data points to an MQTT broker
#[derive(Parser)]
#[command(name = "mqtt-logging")]
#[command(about = "Forward log lines and data points to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one payload to {project}/{subtopic} at QoS 0
    Post {
        subtopic: String,
        payload: String,
        /// Ask the broker to retain the message
        #[arg(long)]
        retain: bool,
    },
    /// Log one line through a console + MQTT logger
    Emit {
        message: String,
        /// Logger name; dots become topic levels
        #[arg(long, default_value = "mqtt-logging")]
        name: String,
        /// Level to log at (ERROR, WARN, INFO, DEBUG, TRACE); defaults to output.level
        #[arg(long)]
        level: Option<String>,
        /// Also write to a timestamped file under the output root
        #[arg(long)]
        file: bool,
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

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Post {
            subtopic,
            payload,
            retain,
        } => handle_post(&config, &subtopic, &payload, retain).await,
        Commands::Emit {
            message,
            name,
            level,
            file,
        } => handle_emit(config, &message, &name, level.as_deref(), file).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<LoggingConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(LoggingConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations, then fall back to the environment alone
            let default_paths = ["mqtt-logging.toml", "config/mqtt-logging.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(LoggingConfig::load_from_file(&path)?);
                }
            }

            Ok(LoggingConfig::from_env()?)
        }
    }
}

async fn handle_post(
    config: &LoggingConfig,
    subtopic: &str,
    payload: &str,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let publisher = DirectPublisher::from_config(config)?;
    let outcome = publisher.post(subtopic, payload, retain).await;
    publisher.close().await;

    report_outcome(outcome)
}

async fn handle_emit(
    config: LoggingConfig,
    message: &str,
    name: &str,
    level: Option<&str>,
    log_to_file: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let level = config.effective_level(level)?;
    let factory = LoggerFactory::new(config)?;
    let destinations = factory.destinations(log_to_file);

    let message = message.to_string();
    let name = name.to_string();

    // The sink worker joins on drop, which must not happen on a runtime thread
    let log_file = tokio::task::spawn_blocking(move || {
        let logger = factory.make_logger(&name, &destinations, level)?;
        logger.in_scope(|| match level {
            tracing::Level::ERROR => tracing::error!("{message}"),
            tracing::Level::WARN => tracing::warn!("{message}"),
            tracing::Level::INFO => tracing::info!("{message}"),
            tracing::Level::DEBUG => tracing::debug!("{message}"),
            _ => tracing::trace!("{message}"),
        });
        logger.flush();
        Ok::<_, mqtt_logging::LoggerError>(logger.log_file().map(|p| p.to_path_buf()))
    })
    .await??;

    if let Some(path) = log_file {
        info!("Log file written to {}", path.display());
    }

    let snapshot = metrics().snapshot();
    if snapshot.emission.delivered == 0 {
        return Err("log line did not reach the broker".into());
    }
    Ok(())
}

fn handle_config_command(
    config: &LoggingConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    mqtt_logging::BrokerEndpoint::from_config(config)?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn report_outcome(outcome: PublishOutcome) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        PublishOutcome::Delivered | PublishOutcome::DeliveredSanitized => {
            info!(%outcome, "Post complete");
            Ok(())
        }
        PublishOutcome::Reported | PublishOutcome::Dropped => {
            Err(format!("post was not delivered ({outcome})").into())
        }
    }
}
