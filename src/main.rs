//! slack-rtm CLI - listen to and post on a Slack workspace over RTM.
//!
//! This is the main binary entry point. See the `slack_rtm` library for the
//! transport, processor and state.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use slack_rtm::{Config, Gateway};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long `say` waits for the service to acknowledge what it sent.
const ACK_WAIT: Duration = Duration::from_secs(5);

/// How often `say` checks for acknowledgments.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

// CLI
#[derive(Parser)]
#[command(name = "slack-rtm")]
#[command(version)]
#[command(about = "Resilient Slack real-time messaging client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every incoming message as one JSON line until Ctrl-C
    Listen,
    /// Post a message, split to fit Slack's limits
    Say {
        /// Channel id (C…) or name (#general)
        #[arg(long, short)]
        channel: String,
        /// Text to send; read from stdin when omitted
        text: Option<String>,
    },
    /// Show the effective configuration (token omitted)
    Config {
        /// Write the effective configuration to the config directory
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();

    // Keep stdout for message output; logs go to stderr or SLACK_RTM_LOG_FILE.
    if let Ok(path) = std::env::var("SLACK_RTM_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Listen => listen(&config).await,
        Commands::Say { channel, text } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read message from stdin")?;
                    buf
                }
            };
            say(&config, &channel, &text).await
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save_to(&Config::config_dir()?)?;
                eprintln!("Saved {}", path.display());
            }
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> Result<Gateway> {
    if !config.has_token() {
        anyhow::bail!("No token configured; set SLACK_TOKEN");
    }
    Gateway::connect(config)
        .await
        .context("Failed to connect to Slack")
}

async fn listen(config: &Config) -> Result<()> {
    let mut gateway = connect(config).await?;
    let me = gateway.state().self_user();
    log::info!("Listening as {} ({})", me.name, me.id);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut stdout = std::io::stdout().lock();
    loop {
        let frame = tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                log::info!("Interrupted, shutting down");
                break;
            }
            frame = gateway.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        stdout.write_all(&frame)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }

    let stats = gateway.stats().snapshot();
    gateway.close().await;
    log::info!(
        "Received {} frames, forwarded {} messages, dropped {} malformed",
        stats.frames,
        stats.forwarded,
        stats.decode_failures
    );
    Ok(())
}

async fn say(config: &Config, channel: &str, text: &str) -> Result<()> {
    let gateway = connect(config).await?;

    let channel_id = match gateway.state().channel_by_name(channel) {
        Some(found) => found.id,
        None => channel.to_string(),
    };

    let ids = gateway.write(&channel_id, text).await?;
    let Some(&last) = ids.last() else {
        log::warn!("Nothing to send");
        gateway.close().await;
        return Ok(());
    };
    log::info!("Sent {} message(s) to {}", ids.len(), channel_id);

    let acked = tokio::time::timeout(ACK_WAIT, async {
        while gateway.stats().snapshot().highest_ack < last {
            tokio::time::sleep(ACK_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok();

    let stats = gateway.stats().snapshot();
    gateway.close().await;

    if !acked {
        log::warn!("Timed out waiting for acknowledgment of event {}", last);
    }
    if stats.rejected_acks > 0 {
        anyhow::bail!("{} message(s) rejected by Slack", stats.rejected_acks);
    }
    Ok(())
}
