pub mod discord;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Numeric message ID. Ordering follows the platform's creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(MessageId(n)),
            Raw::Text(s) => s
                .parse()
                .map(MessageId)
                .map_err(|_| serde::de::Error::custom(format!("invalid message id: {s:?}"))),
        }
    }
}

// IDs go back out as strings, the same way the platform sends them.
impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
}

/// A message read from the channel
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    #[serde(default)]
    pub author: Author,
    /// Platform message type code
    #[serde(rename = "type", default)]
    pub kind: u32,
    #[serde(default)]
    pub content: String,
}

impl IncomingMessage {
    pub fn author_id(&self) -> &str {
        &self.author.id
    }
}

/// Error context of a reply that failed at part `delivered + 1` of `total`.
///
/// When `delivered > 0` the earlier parts already reached the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDelivery {
    pub delivered: usize,
    pub total: usize,
}

impl std::fmt::Display for PartialDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reply part {}/{} not delivered",
            self.delivered + 1,
            self.total
        )
    }
}

/// Read and write access to a single messaging platform.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    /// ID of the account the client is acting as.
    async fn resolve_self_id(&self) -> Result<String>;

    /// Recent messages in the channel, newest first.
    async fn fetch_latest(&self, channel_id: &str) -> Result<Vec<IncomingMessage>>;

    /// Post `text` as a reply referencing `message_id`.
    ///
    /// A failure after some parts went out carries [`PartialDelivery`] context.
    async fn post_reply(&self, channel_id: &str, message_id: MessageId, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_id_from_string_or_number() {
        let id: MessageId = serde_json::from_value(json!("1276543210987654321")).unwrap();
        assert_eq!(id, MessageId(1276543210987654321));
        let id: MessageId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(id, MessageId(42));
        assert!(serde_json::from_value::<MessageId>(json!("abc")).is_err());
        assert!(serde_json::from_value::<MessageId>(json!(-1)).is_err());
    }

    #[test]
    fn test_message_id_orders_numerically() {
        // "99" > "100" as strings
        let a: MessageId = serde_json::from_value(json!("99")).unwrap();
        let b: MessageId = serde_json::from_value(json!("100")).unwrap();
        assert!(a < b);
        assert_eq!(serde_json::to_value(b).unwrap(), json!("100"));
    }

    #[test]
    fn test_incoming_message_defaults() {
        let msg: IncomingMessage = serde_json::from_value(json!({ "id": "7" })).unwrap();
        assert_eq!(msg.id, MessageId(7));
        assert_eq!(msg.author_id(), "");
        assert_eq!(msg.kind, 0);
        assert_eq!(msg.content, "");

        let msg: IncomingMessage = serde_json::from_value(json!({
            "id": "8",
            "type": 8,
            "content": "",
            "author": { "id": "55", "username": "someone" },
            "channel_id": "1"
        }))
        .unwrap();
        assert_eq!(msg.kind, 8);
        assert_eq!(msg.author_id(), "55");
    }
}
