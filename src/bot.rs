use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::llm::TextGenerator;
use crate::platform::{ChannelApi, IncomingMessage, MessageId, PartialDelivery};

/// Platform message type code that is never answered (system notices).
pub const SYSTEM_MESSAGE_TYPE: u32 = 8;

/// Fixed parameters of one polling session
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub channel_id: String,
    pub read_delay: Duration,
    pub reply_delay: Duration,
    /// Leave the message eligible when its reply could not be posted.
    ///
    /// A reply split into several parts that failed after some of them went
    /// out still counts as handled, so delivered parts are never repeated.
    pub retry_failed_posts: bool,
}

/// Mutable state of the loop, owned by the frame that runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub self_id: String,
    pub last_replied: Option<MessageId>,
}

impl SessionState {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            last_replied: None,
        }
    }
}

/// Why a fetched message was not answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyHandled,
    OwnMessage,
    SystemMessage,
}

/// What a single poll cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NoMessages,
    Skipped(SkipReason),
    GenerationFailed,
    Replied(MessageId),
    PostFailed(MessageId),
    FetchFailed,
    Cancelled,
}

/// Decide whether `message` deserves a reply given the session so far.
pub fn check_reply_worthy(
    state: &SessionState,
    message: &IncomingMessage,
) -> Result<(), SkipReason> {
    if state.last_replied.is_some_and(|last| message.id <= last) {
        return Err(SkipReason::AlreadyHandled);
    }
    if message.author_id() == state.self_id {
        return Err(SkipReason::OwnMessage);
    }
    if message.kind == SYSTEM_MESSAGE_TYPE {
        return Err(SkipReason::SystemMessage);
    }
    Ok(())
}

/// Await `fut` unless `cancel` fires first.
async fn or_cancelled<F: Future>(fut: F, cancel: &CancellationToken) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    or_cancelled(tokio::time::sleep(duration), cancel)
        .await
        .is_some()
}

/// Run one read/generate/reply cycle against the newest message.
pub async fn poll_once(
    api: &dyn ChannelApi,
    generator: &dyn TextGenerator,
    settings: &BotSettings,
    state: &mut SessionState,
    cancel: &CancellationToken,
) -> PollOutcome {
    let Some(fetched) = or_cancelled(api.fetch_latest(&settings.channel_id), cancel).await else {
        return PollOutcome::Cancelled;
    };
    let messages = match fetched {
        Ok(messages) => messages,
        Err(e) => {
            error!("Request error: {:#}", e);
            return PollOutcome::FetchFailed;
        }
    };

    let Some(latest) = messages.into_iter().next() else {
        return PollOutcome::NoMessages;
    };

    if let Err(reason) = check_reply_worthy(state, &latest) {
        debug!("Skipping message {}: {:?}", latest.id, reason);
        return PollOutcome::Skipped(reason);
    }

    info!("Received message: {}", latest.content);

    let Some(generated) = or_cancelled(generator.generate(&latest.content), cancel).await else {
        return PollOutcome::Cancelled;
    };
    let Some(reply) = generated else {
        return PollOutcome::GenerationFailed;
    };

    info!(
        "Waiting for {} seconds before replying...",
        settings.reply_delay.as_secs()
    );
    if !pause(settings.reply_delay, cancel).await {
        return PollOutcome::Cancelled;
    }

    // Not raced against `cancel`: a half-sent reply must still be recorded.
    // The client's request timeout bounds it.
    match api.post_reply(&settings.channel_id, latest.id, &reply).await {
        Ok(()) => {
            info!("Replied with message: {}", reply);
            state.last_replied = Some(latest.id);
            PollOutcome::Replied(latest.id)
        }
        Err(e) => {
            error!("Failed to send reply to {}: {:#}", latest.id, e);
            let partly_sent = e
                .downcast_ref::<PartialDelivery>()
                .is_some_and(|p| p.delivered > 0);
            if !settings.retry_failed_posts || partly_sent {
                state.last_replied = Some(latest.id);
            }
            PollOutcome::PostFailed(latest.id)
        }
    }
}

/// Resolve the acting account, then poll until `cancel` fires.
///
/// Failing to resolve the account is fatal: without it the bot could answer
/// its own messages. Everything after that is logged and retried on the next
/// cycle. Returns the final session state.
pub async fn run(
    api: &dyn ChannelApi,
    generator: &dyn TextGenerator,
    settings: &BotSettings,
    cancel: CancellationToken,
) -> Result<SessionState> {
    let self_id = or_cancelled(api.resolve_self_id(), &cancel)
        .await
        .context("Stopped before the bot account was resolved")?
        .context("Failed to retrieve bot information")?;

    info!("Acting as account {}", self_id);
    let mut state = SessionState::new(self_id);

    while !cancel.is_cancelled() {
        let outcome = poll_once(api, generator, settings, &mut state, &cancel).await;
        debug!("Poll outcome: {:?}", outcome);
        if outcome == PollOutcome::Cancelled {
            break;
        }

        info!(
            "Waiting for {} seconds before checking for new messages...",
            settings.read_delay.as_secs()
        );
        if !pause(settings.read_delay, &cancel).await {
            break;
        }
    }

    info!("Polling stopped");
    Ok(state)
}
