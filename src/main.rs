mod bot;
mod config;
mod llm;
mod platform;
mod setup;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Backend, Config, Secrets};
use crate::llm::LlmClient;
use crate::platform::discord::DiscordClient;
use crate::setup::{Overrides, Prompter};

const DEFAULT_CONFIG: &str = "config.toml";

/// Answer the newest message in a Discord channel with generated text.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text generation backend: g (Gemini) or o (OpenRouter)
    #[arg(long, value_parser = parse_backend)]
    backend: Option<Backend>,

    /// Channel to watch
    #[arg(long)]
    channel: Option<String>,

    /// Seconds between polls
    #[arg(long)]
    read_delay: Option<u64>,

    /// Seconds to wait before posting a reply
    #[arg(long)]
    reply_delay: Option<u64>,
}

fn parse_backend(value: &str) -> Result<Backend, String> {
    Backend::from_selector(value).ok_or_else(|| format!("unknown backend '{value}', use g or o"))
}

async fn countdown(secs: u64) {
    info!("Starting...");
    for remaining in (1..=secs).rev() {
        info!("{}", remaining);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets may come from a local .env file
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,discord_autoreply=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string())),
        )
        .init();

    let cli = Cli::parse();

    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let config = Config::load(&config_path, required)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let secrets = Secrets::from_env();

    let overrides = Overrides {
        backend: cli.backend,
        channel_id: cli.channel,
        read_delay_secs: cli.read_delay,
        reply_delay_secs: cli.reply_delay,
    };
    let settings = setup::resolve(overrides, &config, &mut Prompter::stdio())?;

    info!("Configuration loaded");
    info!("  Backend: {}", settings.backend);
    info!("  Channel: {}", settings.bot.channel_id);
    info!("  Read delay: {}s", settings.bot.read_delay.as_secs());
    info!("  Reply delay: {}s", settings.bot.reply_delay.as_secs());
    if secrets.discord_token.is_empty() {
        warn!("DISCORD_TOKEN is not set");
    }
    if secrets.api_key(settings.backend).is_empty() {
        warn!("No API key for {}, generation will fail", settings.backend);
    }

    let discord = DiscordClient::new(&config.discord, &secrets.discord_token);
    let llm = LlmClient::new(settings.backend, &config, &secrets);

    countdown(config.bot.countdown_secs).await;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            on_signal.cancel();
        }
    });

    let state = bot::run(&discord, &llm, &settings.bot, cancel).await?;
    if let Some(last) = state.last_replied {
        info!("Last replied message: {}", last);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "discord-autoreply",
            "--backend",
            "o",
            "--channel",
            "123",
            "--read-delay",
            "10",
            "--reply-delay",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(Backend::Openrouter));
        assert_eq!(cli.channel.as_deref(), Some("123"));
        assert_eq!(cli.read_delay, Some(10));
        assert_eq!(cli.reply_delay, Some(2));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["discord-autoreply", "--backend", "claude"]).is_err());
        assert!(Cli::try_parse_from(["discord-autoreply", "--read-delay", "-3"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_takes_one_second_per_step() {
        let started = tokio::time::Instant::now();
        countdown(3).await;
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
