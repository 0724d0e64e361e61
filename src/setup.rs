//! Startup settings: command line flags first, then the config file, then an
//! interactive prompt on stdin for anything still missing.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::time::Duration;

use crate::bot::BotSettings;
use crate::config::{Backend, Config};

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<Backend>,
    pub channel_id: Option<String>,
    pub read_delay_secs: Option<u64>,
    pub reply_delay_secs: Option<u64>,
}

/// Everything needed to start polling
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub backend: Backend,
    pub bot: BotSettings,
}

/// Line-oriented terminal prompts.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut buf = String::new();
        let read = self
            .input
            .read_line(&mut buf)
            .context("Failed to read from stdin")?;
        if read == 0 {
            anyhow::bail!("stdin closed while waiting for: {}", prompt.trim());
        }
        Ok(buf.trim().to_owned())
    }

    fn complain(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{message}")?;
        Ok(())
    }

    pub fn ask_backend(&mut self) -> Result<Backend> {
        loop {
            let answer = self.read_line("Choose AI (Google Gemini (g) / OpenRouter (o)): ")?;
            match Backend::from_selector(&answer) {
                Some(backend) => return Ok(backend),
                None => self.complain("Please answer g or o.")?,
            }
        }
    }

    pub fn ask_channel(&mut self) -> Result<String> {
        loop {
            let answer = self.read_line("Channel ID: ")?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            self.complain("Channel ID cannot be empty.")?;
        }
    }

    pub fn ask_secs(&mut self, prompt: &str) -> Result<u64> {
        loop {
            let answer = self.read_line(prompt)?;
            match answer.parse::<u64>() {
                Ok(secs) => return Ok(secs),
                Err(_) => self.complain("Please enter a whole number of seconds.")?,
            }
        }
    }
}

/// Merge flags, config file and prompts into the settings for this run.
pub fn resolve<R: BufRead, W: Write>(
    overrides: Overrides,
    config: &Config,
    prompter: &mut Prompter<R, W>,
) -> Result<RunSettings> {
    let backend = match overrides.backend.or(config.llm.backend) {
        Some(backend) => backend,
        None => prompter.ask_backend()?,
    };

    let channel_id = match overrides
        .channel_id
        .or_else(|| config.discord.channel_id.clone())
    {
        Some(id) => id,
        None => prompter.ask_channel()?,
    };

    let read_delay_secs = match overrides.read_delay_secs.or(config.bot.read_delay_secs) {
        Some(secs) => secs,
        None => prompter.ask_secs("Delay between reading new messages (seconds): ")?,
    };

    let reply_delay_secs = match overrides.reply_delay_secs.or(config.bot.reply_delay_secs) {
        Some(secs) => secs,
        None => prompter.ask_secs("Delay before replying (seconds): ")?,
    };

    Ok(RunSettings {
        backend,
        bot: BotSettings {
            channel_id,
            read_delay: Duration::from_secs(read_delay_secs),
            reply_delay: Duration::from_secs(reply_delay_secs),
            retry_failed_posts: config.bot.retry_failed_posts,
        },
    })
}
