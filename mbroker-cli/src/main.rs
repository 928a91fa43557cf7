//! mbroker-cli - Command-line interface for mbroker
//!
//! One-shot publishing and topic listing, plus a streaming subscriber.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use mbroker_client::{ConnectionConfig, Queue, Role, WireFormat};
use mbroker_protocol::DEFAULT_PORT;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mbroker-cli")]
#[command(about = "Command-line interface for the mbroker message broker")]
#[command(version)]
struct Cli {
    /// Broker address
    #[arg(short, long, env = "MBROKER_SERVER", default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    server: SocketAddr,

    /// Wire format to negotiate with the broker
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Seconds to wait for the connection and for replies
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Xml,
    Binary,
}

impl From<Format> for WireFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => WireFormat::Json,
            Format::Xml => WireFormat::Xml,
            Format::Binary => WireFormat::Binary,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Publish a value to a topic
    Publish {
        /// Topic name
        topic: String,

        /// Value: JSON, @file.json, or any other text as a string
        value: String,
    },

    /// Print messages from a topic until Ctrl+C
    Subscribe {
        /// Topic name
        topic: String,
    },

    /// List topics that have been published to
    ListTopics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let config = ConnectionConfig::new(cli.server)
        .with_connect_timeout(timeout)
        .with_request_timeout(timeout);
    let format = WireFormat::from(cli.format);

    match cli.command {
        Commands::Subscribe { topic } => {
            let mut queue = Queue::connect(config, topic.as_str(), Role::Consumer, format)
                .await
                .map_err(|e| {
                    eprintln!("{}: {}", "Connection failed".red(), e);
                    e
                })?;

            eprintln!("{} {} ({})", "Subscribed to".green(), topic.cyan(), format);
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    message = queue.pull() => {
                        match message {
                            Ok((topic, value)) => {
                                println!("{} {}", topic.cyan(), commands::format_value(&value));
                            }
                            Err(e) => {
                                eprintln!("{}: {}", "Connection closed".red(), e);
                                break;
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Unsubscribing...".dimmed());
                        let _ = queue.cancel().await;
                        break;
                    }
                }
            }

            queue.close().await?;
        }
        cmd => {
            let result = commands::execute(config, format, cmd).await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
