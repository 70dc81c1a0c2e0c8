//! Quipbot IPC - Inter-Process Communication
//!
//! Event bus for adapter-to-core communication

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    pub id: String,
    pub channel: String,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    /// Text message; `from` is the sender's user id.
    #[serde(rename = "message")]
    Message { from: String, text: String },

    /// Inline button press; `data` is the opaque callback data.
    #[serde(rename = "callback")]
    Callback { query_id: String, data: String },
}

/// A single delivery request for the transport.
///
/// `callback_ack` turns the message into a callback acknowledgement (the text
/// becomes the optional toast), `photo_url` into an image with `text` as
/// caption, and `edit_message_id` into an in-place edit.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: i64,
    pub text: String,
    pub edit_message_id: Option<i64>,
    pub inline_keyboard: Option<Vec<Vec<InlineButton>>>,
    pub chat_action: Option<String>,
    pub photo_url: Option<String>,
    pub callback_ack: Option<String>,
}

impl OutboundMessage {
    pub fn text(channel: &str, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id,
            text: text.into(),
            edit_message_id: None,
            inline_keyboard: None,
            chat_action: None,
            photo_url: None,
            callback_ack: None,
        }
    }

    pub fn photo(
        channel: &str,
        chat_id: i64,
        url: impl Into<String>,
        caption: impl Into<String>,
    ) -> Self {
        let mut msg = Self::text(channel, chat_id, caption);
        msg.photo_url = Some(url.into());
        msg
    }

    pub fn callback_ack(channel: &str, chat_id: i64, query_id: &str, toast: Option<&str>) -> Self {
        let mut msg = Self::text(channel, chat_id, toast.unwrap_or_default());
        msg.callback_ack = Some(query_id.to_string());
        msg
    }

    pub fn chat_action(channel: &str, chat_id: i64, action: &str) -> Self {
        let mut msg = Self::text(channel, chat_id, "");
        msg.chat_action = Some(action.to_string());
        msg
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<InlineButton>>) -> Self {
        self.inline_keyboard = Some(keyboard);
        self
    }

    pub fn editing(mut self, message_id: i64) -> Self {
        self.edit_message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl Envelope {
    pub fn new(channel: &str, kind: MessageKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            id: generate_trace_id(),
            channel: channel.to_string(),
            kind,
            payload: serde_json::json!({}),
            chat_id: None,
            message_id: None,
        }
    }

    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Convenience accessor for a string field of the adapter payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|value| value.as_str())
    }
}

pub const EVENT_BUS_CAPACITY: usize = 256;
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
    outbound: broadcast::Sender<OutboundMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            inbound: inbound_tx,
            outbound: outbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.inbound.send(envelope)?;
        Ok(())
    }

    pub fn outbound_sender(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    pub fn outbound_subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_envelope() -> Envelope {
        Envelope::new(
            "telegram",
            MessageKind::Message {
                from: "user".to_string(),
                text: "hello".to_string(),
            },
        )
    }

    #[test]
    fn envelope_has_schema_version_and_trace_id() {
        let env = message_envelope();
        assert_eq!(env.schema_version, 1);
        assert!(env.trace_id.starts_with("trace-"));
    }

    #[test]
    fn trace_id_different_for_each_envelope() {
        assert_ne!(message_envelope().trace_id, message_envelope().trace_id);
    }

    #[test]
    fn legacy_json_with_missing_fields_gets_defaults() {
        let json = r#"{"id":"y","channel":"telegram","kind":{"type":"callback","query_id":"q1","data":"help"},"payload":{},"chat_id":7}"#;
        let env: Envelope = serde_json::from_str(json).expect("deserialize");
        assert_eq!(env.schema_version, 1);
        assert!(!env.trace_id.is_empty());
        assert_eq!(env.chat_id, Some(7));
        assert!(matches!(env.kind, MessageKind::Callback { ref data, .. } if data == "help"));
    }

    #[test]
    fn payload_str_reads_adapter_fields() {
        let env = message_envelope().with_payload(serde_json::json!({"first_name": "Ada"}));
        assert_eq!(env.payload_str("first_name"), Some("Ada"));
        assert_eq!(env.payload_str("missing"), None);
    }

    #[test]
    fn outbound_constructors_set_the_right_delivery_kind() {
        let photo = OutboundMessage::photo("telegram", 1, "https://img", "cap");
        assert_eq!(photo.photo_url.as_deref(), Some("https://img"));
        assert_eq!(photo.text, "cap");

        let ack = OutboundMessage::callback_ack("telegram", 1, "q9", None);
        assert_eq!(ack.callback_ack.as_deref(), Some("q9"));
        assert!(ack.text.is_empty());

        let edit = OutboundMessage::text("telegram", 1, "x").editing(55);
        assert_eq!(edit.edit_message_id, Some(55));
    }

    #[tokio::test]
    async fn event_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut inbound = bus.subscribe();
        let mut outbound = bus.outbound_subscribe();

        bus.publish(message_envelope().with_chat_id(3))
            .expect("publish");
        bus.outbound_sender()
            .send(OutboundMessage::text("telegram", 3, "hi"))
            .expect("send");

        assert_eq!(inbound.recv().await.expect("inbound").chat_id, Some(3));
        assert_eq!(outbound.recv().await.expect("outbound").text, "hi");
    }
}
