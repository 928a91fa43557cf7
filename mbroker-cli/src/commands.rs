//! Command execution.

use crate::Commands;
use colored::Colorize;
use mbroker_client::{ConnectionConfig, Queue, Role, WireFormat};
use mbroker_protocol::Value;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(
    config: ConnectionConfig,
    format: WireFormat,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Publish { topic, value } => {
            let value = parse_value(&value)?;
            let mut queue = Queue::connect(config, topic.as_str(), Role::Producer, format).await?;
            queue.push(value.clone()).await?;
            queue.close().await?;

            Ok(format!(
                "{} {} to {}",
                "Published".green(),
                format_value(&value),
                topic.cyan()
            ))
        }

        Commands::ListTopics => {
            let mut queue = Queue::connect(config, "", Role::Producer, format).await?;
            let topics = queue.list_topics().await?;
            queue.close().await?;

            if topics.is_empty() {
                return Ok("No topics published".yellow().to_string());
            }

            let mut output = format!("{} topic(s)", topics.len()).bold().to_string();
            for topic in topics {
                output.push_str(&format!("\n  {}", topic.cyan()));
            }
            Ok(output)
        }

        // Streams until interrupted, handled in main.rs
        Commands::Subscribe { .. } => unreachable!(),
    }
}

/// Parses a value argument: `@path` reads JSON from a file, valid JSON is
/// used as is, anything else is sent as a string.
fn parse_value(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&content)?);
    }
    Ok(serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string())))
}

/// Formats a delivered value for display. Strings print without quotes.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
