use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChannelApi, IncomingMessage, MessageId, PartialDelivery};
use crate::config::DiscordConfig;

/// Discord rejects message content longer than this.
const MAX_MESSAGE_LEN: usize = 2000;

/// Upper bound on one Discord request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
}

#[derive(Debug, Serialize)]
struct MessageReference {
    message_id: MessageId,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
    message_reference: MessageReference,
}

/// Split long replies for Discord's 2000 char limit.
///
/// Whitespace-only chunks are dropped since Discord rejects empty messages.
fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    let text = text.trim_end();
    if text.chars().count() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = if end < rest.len() {
            rest[..end]
                .rfind('\n')
                .or_else(|| rest[..end].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        let chunk = &rest[..cut];
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        rest = &rest[cut..];
    }

    chunks
}

/// REST client for one Discord account
pub struct DiscordClient {
    client: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            authorization: format!("{}{}", config.token_prefix, token),
        }
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.base_url, channel_id)
    }

    async fn post_chunk(&self, url: &str, message_id: MessageId, content: &str) -> Result<()> {
        let payload = CreateMessage {
            content,
            message_reference: MessageReference { message_id },
        };

        let response = self
            .client
            .post(url)
            .header("Authorization", &self.authorization)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .context("Failed to send reply to Discord")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to send reply ({}): {}", status, error_body);
        }

        Ok(())
    }
}

#[async_trait]
impl ChannelApi for DiscordClient {
    async fn resolve_self_id(&self) -> Result<String> {
        let url = format!("{}/users/@me", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.authorization)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("Failed to reach Discord")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord API error ({}): {}", status, error_body);
        }

        let user: CurrentUser = response
            .json()
            .await
            .context("Failed to parse current user")?;

        Ok(user.id)
    }

    async fn fetch_latest(&self, channel_id: &str) -> Result<Vec<IncomingMessage>> {
        let url = self.messages_url(channel_id);

        debug!("Fetching messages: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.authorization)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("Failed to reach Discord")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to retrieve messages ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse channel messages")
    }

    async fn post_reply(&self, channel_id: &str, message_id: MessageId, text: &str) -> Result<()> {
        let url = self.messages_url(channel_id);
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let total = chunks.len();

        for (delivered, chunk) in chunks.into_iter().enumerate() {
            self.post_chunk(&url, message_id, chunk)
                .await
                .context(PartialDelivery { delivered, total })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, prefix: &str) -> DiscordClient {
        let config = DiscordConfig {
            base_url: server.uri(),
            token_prefix: prefix.to_string(),
            channel_id: None,
        };
        DiscordClient::new(&config, "secret-token")
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 2000), vec!["hello"]);
        assert_eq!(split_message("", 2000), vec![""]);
    }

    #[test]
    fn test_split_prefers_whitespace() {
        let chunks = split_message("aaaa bbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb\n", "cccc"]);

        let chunks = split_message("aaaa bbbb cccc", 7);
        assert_eq!(chunks, vec!["aaaa ", "bbbb ", "cccc"]);
    }

    #[test]
    fn test_split_hard_cut_keeps_char_boundaries() {
        let text = "é".repeat(5);
        let chunks = split_message(&text, 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_drops_trailing_whitespace_chunk() {
        let text = format!("{}\n", "word ".repeat(400));
        let chunks = split_message(&text, 2000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].ends_with("word"));

        let text = format!("{}\n\n  \n", "a".repeat(2000));
        assert_eq!(split_message(&text, 2000), vec!["a".repeat(2000)]);
    }

    #[test]
    fn test_split_never_yields_blank_chunks() {
        let text = format!("{}{}{}", "x".repeat(10), " ".repeat(15), "y".repeat(3));
        let chunks = split_message(&text, 10);
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
        assert_eq!(chunks.first(), Some(&"xxxxxxxxxx"));
        assert!(chunks.last().is_some_and(|c| c.ends_with("yyy")));
    }

    #[tokio::test]
    async fn test_resolve_self_id() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/users/@me"))
            .and(matchers::header("Authorization", "secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "999",
                "username": "me"
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(client(&server, "").resolve_self_id().await.unwrap(), "999");
    }

    #[tokio::test]
    async fn test_resolve_self_id_unauthorized() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/users/@me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("401: Unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, "").resolve_self_id().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_fetch_latest_newest_first() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/channels/42/messages"))
            .and(matchers::header("Authorization", "Bot secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "101", "type": 0, "content": "hi", "author": { "id": "7" } },
                { "id": "100", "type": 8, "content": "", "author": { "id": "8" } }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client(&server, "Bot ").fetch_latest("42").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MessageId(101));
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].author_id(), "7");
        assert_eq!(messages[1].kind, 8);
    }

    #[tokio::test]
    async fn test_fetch_latest_error_status() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Missing Access"))
            .mount(&server)
            .await;

        let err = client(&server, "").fetch_latest("42").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Missing Access"));
    }

    #[tokio::test]
    async fn test_post_reply_references_message() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/channels/42/messages"))
            .and(matchers::header("Authorization", "secret-token"))
            .and(matchers::body_json(json!({
                "content": "hello",
                "message_reference": { "message_id": "101" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "102" })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, "")
            .post_reply("42", MessageId(101), "hello")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_reply_splits_long_text() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/channels/42/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .expect(2)
            .mount(&server)
            .await;

        let text = "word ".repeat(500);
        client(&server, "")
            .post_reply("42", MessageId(101), &text)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_reply_trailing_newline_is_one_post() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/channels/42/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .expect(1)
            .mount(&server)
            .await;

        let text = format!("{}\n", "word ".repeat(400));
        client(&server, "")
            .post_reply("42", MessageId(101), &text)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_reply_reports_partial_delivery() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream hiccup"))
            .expect(1)
            .mount(&server)
            .await;

        let text = "word ".repeat(500);
        let err = client(&server, "")
            .post_reply("42", MessageId(101), &text)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<PartialDelivery>(),
            Some(&PartialDelivery {
                delivered: 1,
                total: 2
            })
        );
        assert!(format!("{:#}", err).contains("upstream hiccup"));
    }

    #[tokio::test]
    async fn test_post_reply_failure() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Cannot send an empty message"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, "")
            .post_reply("42", MessageId(101), "x")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Cannot send an empty message"));
    }
}
