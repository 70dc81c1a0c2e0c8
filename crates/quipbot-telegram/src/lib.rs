//! Quipbot Telegram Adapter
//!
//! Telegram Bot API long-polling with client recreation, inline keyboards,
//! callback queries, photos and message chunking

pub mod menu;

use anyhow::{anyhow, Result};
use quipbot_config::TelegramConfig;
use quipbot_ipc::{Envelope, EventBus, InlineButton, MessageKind, OutboundMessage};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;
const TELEGRAM_MAX_CAPTION_LEN: usize = 1024;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CLIENT_RECREATE_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub text: Option<String>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: T,
}

/// How an outbound message maps onto the Bot API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    CallbackAck,
    ChatAction,
    Photo,
    Edit,
    Text,
}

fn delivery_for(msg: &OutboundMessage) -> Delivery {
    if msg.callback_ack.is_some() {
        Delivery::CallbackAck
    } else if msg.chat_action.is_some() {
        Delivery::ChatAction
    } else if msg.photo_url.is_some() {
        Delivery::Photo
    } else if msg.edit_message_id.is_some() {
        Delivery::Edit
    } else {
        Delivery::Text
    }
}

fn keyboard_markup(keyboard: &[Vec<InlineButton>]) -> serde_json::Value {
    serde_json::json!({
        "inline_keyboard": keyboard.iter().map(|row| {
            row.iter().map(|btn| serde_json::json!({
                "text": btn.text,
                "callback_data": btn.callback_data
            })).collect::<Vec<_>>()
        }).collect::<Vec<_>>()
    })
}

pub struct TelegramAdapter {
    client: Client,
    account_tag: String,
    allowed_chats: Option<HashSet<i64>>,
    api_url: String,
    poll_timeout_secs: u64,
    client_recreate_interval_secs: u64,
    event_bus: Option<EventBus>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let api_url = format!("https://api.telegram.org/bot{}", config.bot_token.trim());
        let allowed_chats = config
            .allowed_chats
            .clone()
            .map(|items| items.into_iter().collect());
        let poll_timeout_secs = config
            .poll_timeout_secs
            .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS);

        Ok(Self {
            client: Self::build_client(poll_timeout_secs)?,
            account_tag: config.account_tag(),
            allowed_chats,
            api_url,
            poll_timeout_secs,
            client_recreate_interval_secs: config
                .client_recreate_interval_secs
                .unwrap_or(DEFAULT_CLIENT_RECREATE_SECS),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn account_tag(&self) -> &str {
        &self.account_tag
    }

    fn build_client(poll_timeout_secs: u64) -> Result<Client> {
        // Request timeout must outlast the long-poll window.
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(poll_timeout_secs + 30))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&chat_id))
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        let url = format!("{}/getMe", self.api_url);
        let parsed: ApiResponse<TelegramUser> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("telegram getMe request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("telegram getMe HTTP error: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow!("telegram getMe decode failed: {}", e))?;

        if !parsed.ok {
            return Err(anyhow!("telegram getMe returned ok=false"));
        }
        Ok(parsed.result)
    }

    pub async fn get_updates(
        &self,
        client: &Client,
        offset: Option<i64>,
    ) -> Result<Vec<TelegramUpdate>> {
        let url = format!("{}/getUpdates", self.api_url);

        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });

        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        let resp = client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram getUpdates request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("telegram getUpdates HTTP error: {}", e))?;

        let parsed: ApiResponse<Vec<TelegramUpdate>> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram getUpdates decode failed: {}", e))?;

        if !parsed.ok {
            return Err(anyhow!("telegram getUpdates returned ok=false"));
        }

        Ok(parsed.result)
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        inline_keyboard: Option<Vec<Vec<InlineButton>>>,
    ) -> Result<()> {
        let chunks = chunk_message(text);
        let url = format!("{}/sendMessage", self.api_url);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut payload = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            if i == chunks.len() - 1 {
                if let Some(keyboard) = &inline_keyboard {
                    payload["reply_markup"] = keyboard_markup(keyboard);
                }
            }

            self.post_api(&url, payload).await?;
        }

        Ok(())
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption: &str,
    ) -> Result<()> {
        let url = format!("{}/sendPhoto", self.api_url);
        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "photo": photo_url,
        });
        if !caption.is_empty() {
            let caption: String = caption.chars().take(TELEGRAM_MAX_CAPTION_LEN).collect();
            payload["caption"] = serde_json::json!(caption);
        }

        self.post_api(&url, payload).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        inline_keyboard: Option<Vec<Vec<InlineButton>>>,
    ) -> Result<()> {
        // editMessageText cannot be split into chunks: fallback to a new message if too long.
        if text.chars().count() > TELEGRAM_MAX_MESSAGE_LEN {
            return self
                .send_message(chat_id, text, inline_keyboard)
                .await;
        }

        let url = format!("{}/editMessageText", self.api_url);

        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });

        if let Some(keyboard) = &inline_keyboard {
            payload["reply_markup"] = keyboard_markup(keyboard);
        }

        self.post_api(&url, payload).await
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/answerCallbackQuery", self.api_url);

        let mut payload = serde_json::json!({
            "callback_query_id": callback_query_id,
        });

        if let Some(t) = text.filter(|t| !t.is_empty()) {
            payload["text"] = serde_json::json!(t);
        }

        self.post_api(&url, payload).await
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let url = format!("{}/sendChatAction", self.api_url);
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "action": action,
        });
        let _ = self.client.post(&url).json(&payload).send().await;
        Ok(())
    }

    async fn post_api(&self, url: &str, payload: serde_json::Value) -> Result<()> {
        let endpoint = url.rsplit('/').next().unwrap_or("telegram");

        let resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} request failed: {}", endpoint, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram {} HTTP {}: {}", endpoint, status, body));
        }

        let parsed: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram {} decode failed: {}", endpoint, e))?;
        if !parsed.ok {
            return Err(anyhow!("telegram {} returned ok=false", endpoint));
        }

        Ok(())
    }

    pub async fn poll(&self) -> Result<()> {
        let mut offset: Option<i64> = None;

        info!(account = %self.account_tag, "Telegram polling started");

        let mut client = self.client.clone();
        let mut client_recreate_at =
            Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);

        if let Err(err) = self.sync_bot_commands(&client).await {
            warn!("Failed to sync Telegram bot commands: {}", err);
        } else {
            info!("Telegram bot commands synced");
        }

        loop {
            if Instant::now() >= client_recreate_at {
                debug!("Recreating HTTP client to prevent stale connections");
                match Self::build_client(self.poll_timeout_secs) {
                    Ok(fresh) => client = fresh,
                    Err(err) => warn!("Keeping previous HTTP client: {}", err),
                }
                client_recreate_at =
                    Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);
            }

            let updates = match self.get_updates(&client, offset).await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Telegram polling error: {}", err);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);

                if let Some(message) = &update.message {
                    self.handle_message(message);
                }

                if let Some(callback) = &update.callback_query {
                    self.handle_callback(callback);
                }
            }
        }
    }

    async fn sync_bot_commands(&self, client: &Client) -> Result<()> {
        let url = format!("{}/setMyCommands", self.api_url);
        let payload = menu::bot_commands_payload();

        let resp = client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram setMyCommands request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram setMyCommands HTTP {}: {}", status, body));
        }

        let parsed: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram setMyCommands decode failed: {}", e))?;

        if !parsed.ok {
            return Err(anyhow!("telegram setMyCommands returned ok=false"));
        }

        Ok(())
    }

    fn sender_payload(&self, chat_type: &str, from: Option<&TelegramUser>) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "account_tag": self.account_tag.clone(),
            "chat_type": chat_type,
        });
        if let (Some(user), Some(obj)) = (from, payload.as_object_mut()) {
            obj.insert("from_user_id".to_string(), serde_json::json!(user.id));
            if let Some(first_name) = &user.first_name {
                obj.insert("first_name".to_string(), serde_json::json!(first_name));
            }
            if let Some(username) = &user.username {
                obj.insert("username".to_string(), serde_json::json!(username));
            }
        }
        payload
    }

    pub fn message_envelope(&self, message: &TelegramMessage) -> Option<Envelope> {
        let text = message.text.clone()?;
        let from_id = message
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_default();

        Some(
            Envelope::new(
                "telegram",
                MessageKind::Message {
                    from: from_id,
                    text,
                },
            )
            .with_chat_id(message.chat.id)
            .with_message_id(message.message_id)
            .with_payload(self.sender_payload(&message.chat.chat_type, message.from.as_ref())),
        )
    }

    /// Callbacks without a source message have no chat to answer into.
    pub fn callback_envelope(&self, callback: &TelegramCallbackQuery) -> Option<Envelope> {
        let message = callback.message.as_ref()?;

        Some(
            Envelope::new(
                "telegram",
                MessageKind::Callback {
                    query_id: callback.id.clone(),
                    data: callback.data.clone().unwrap_or_default(),
                },
            )
            .with_chat_id(message.chat.id)
            .with_message_id(message.message_id)
            .with_payload(self.sender_payload(&message.chat.chat_type, Some(&callback.from))),
        )
    }

    fn handle_message(&self, message: &TelegramMessage) {
        let chat_id = message.chat.id;

        if !self.is_chat_allowed(chat_id) {
            info!("Skipping message from unauthorized chat {}", chat_id);
            return;
        }

        let Some(envelope) = self.message_envelope(message) else {
            debug!(chat_id, "Ignoring message without text");
            return;
        };

        let from_username = message
            .from
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .unwrap_or("unknown");
        info!(chat_id, "Received message from {}", from_username);

        self.publish(envelope);
    }

    fn handle_callback(&self, callback: &TelegramCallbackQuery) {
        info!("Received callback query: {:?}", callback.data);

        let Some(envelope) = self.callback_envelope(callback) else {
            warn!(query_id = %callback.id, "Callback query without source message");
            return;
        };

        if let Some(chat_id) = envelope.chat_id {
            if !self.is_chat_allowed(chat_id) {
                info!("Skipping callback from unauthorized chat {}", chat_id);
                return;
            }
        }

        self.publish(envelope);
    }

    fn publish(&self, envelope: Envelope) {
        match &self.event_bus {
            Some(event_bus) => {
                if let Err(e) = event_bus.publish(envelope) {
                    warn!("Failed to publish to event bus: {}", e);
                }
            }
            None => info!("No event bus configured, update not forwarded"),
        }
    }

    async fn deliver(&self, msg: OutboundMessage) -> Result<()> {
        match delivery_for(&msg) {
            Delivery::CallbackAck => {
                let query_id = msg.callback_ack.as_deref().unwrap_or_default();
                self.answer_callback_query(query_id, Some(msg.text.as_str())).await
            }
            Delivery::ChatAction => {
                let action = msg.chat_action.as_deref().unwrap_or("typing");
                self.send_chat_action(msg.chat_id, action).await
            }
            Delivery::Photo => {
                let photo_url = msg.photo_url.as_deref().unwrap_or_default();
                self.send_photo(msg.chat_id, photo_url, &msg.text).await
            }
            Delivery::Edit => {
                let message_id = msg.edit_message_id.unwrap_or_default();
                self.edit_message_text(msg.chat_id, message_id, &msg.text, msg.inline_keyboard)
                    .await
            }
            Delivery::Text => {
                self.send_message(msg.chat_id, &msg.text, msg.inline_keyboard)
                    .await
            }
        }
    }

    pub async fn run_outbound_handler(&self, mut receiver: broadcast::Receiver<OutboundMessage>) {
        info!("Telegram outbound handler started");

        loop {
            match receiver.recv().await {
                Ok(msg) => {
                    if msg.channel != "telegram" {
                        continue;
                    }
                    let chat_id = msg.chat_id;
                    let kind = delivery_for(&msg);
                    if let Err(e) = self.deliver(msg).await {
                        warn!(chat_id, ?kind, "Failed to deliver outbound message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram outbound handler stopped: channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Telegram outbound handler lagged; skipped {} messages",
                        skipped
                    );
                }
            }
        }
    }
}

fn chunk_message(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + TELEGRAM_MAX_MESSAGE_LEN).min(chars.len());

        if end < chars.len() {
            if let Some(split) = (start..end)
                .rev()
                .find(|&i| matches!(chars[i], '\n' | ' ' | '.' | '!' | '?'))
            {
                end = split + 1;
            }
        }

        chunks.push(chars[start..end].iter().collect::<String>());
        start = end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_adapter(allowed: Option<Vec<i64>>) -> TelegramAdapter {
        let config = TelegramConfig {
            bot_token: "123456:TESTTOKEN".to_string(),
            allowed_chats: allowed,
            ..TelegramConfig::default()
        };
        TelegramAdapter::new(&config).expect("adapter")
    }

    fn user(id: i64, first_name: &str) -> TelegramUser {
        TelegramUser {
            id,
            is_bot: Some(false),
            first_name: Some(first_name.to_string()),
            username: None,
        }
    }

    fn message(chat_id: i64, text: Option<&str>) -> TelegramMessage {
        TelegramMessage {
            message_id: 77,
            text: text.map(str::to_string),
            chat: TelegramChat {
                id: chat_id,
                chat_type: "private".to_string(),
            },
            from: Some(user(9, "Ada")),
        }
    }

    #[test]
    fn chunk_message_preserves_content_for_unicode_text() {
        let text = format!("{} {}", "😀".repeat(5000), "fine");
        let chunks = chunk_message(&text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunk_message_respects_telegram_limit_by_characters() {
        let text = "abc😀 ".repeat(1500);
        let chunks = chunk_message(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 4096));
    }

    #[test]
    fn message_envelope_carries_sender_fields() {
        let adapter = make_adapter(None);
        let env = adapter
            .message_envelope(&message(-100, Some("/joke")))
            .expect("envelope");
        assert_eq!(env.chat_id, Some(-100));
        assert_eq!(env.message_id, Some(77));
        assert_eq!(env.payload_str("first_name"), Some("Ada"));
        assert_eq!(env.payload_str("account_tag"), Some("123456"));
        assert!(matches!(env.kind, MessageKind::Message { ref from, ref text } if from == "9" && text == "/joke"));
    }

    #[test]
    fn message_without_text_is_not_forwarded() {
        let adapter = make_adapter(None);
        assert!(adapter.message_envelope(&message(1, None)).is_none());
    }

    #[test]
    fn callback_envelope_uses_clicking_user_and_source_chat() {
        let adapter = make_adapter(None);
        let callback = TelegramCallbackQuery {
            id: "cb1".to_string(),
            from: user(5, "Bob"),
            message: Some(message(42, Some("question"))),
            data: Some("q:42:3:1".to_string()),
        };
        let env = adapter.callback_envelope(&callback).expect("envelope");
        assert_eq!(env.chat_id, Some(42));
        assert_eq!(env.payload["from_user_id"], 5);
        assert!(matches!(env.kind, MessageKind::Callback { ref query_id, ref data } if query_id == "cb1" && data == "q:42:3:1"));
    }

    #[test]
    fn allowed_chats_filter_applies() {
        let adapter = make_adapter(Some(vec![1]));
        assert!(adapter.is_chat_allowed(1));
        assert!(!adapter.is_chat_allowed(2));
    }

    #[test]
    fn delivery_kind_follows_message_shape() {
        let ack = OutboundMessage::callback_ack("telegram", 1, "q", None);
        assert_eq!(delivery_for(&ack), Delivery::CallbackAck);
        let photo = OutboundMessage::photo("telegram", 1, "https://x", "cap");
        assert_eq!(delivery_for(&photo), Delivery::Photo);
        let edit = OutboundMessage::text("telegram", 1, "t").editing(3);
        assert_eq!(delivery_for(&edit), Delivery::Edit);
        let typing = OutboundMessage::chat_action("telegram", 1, "typing");
        assert_eq!(delivery_for(&typing), Delivery::ChatAction);
        assert_eq!(delivery_for(&OutboundMessage::text("telegram", 1, "t")), Delivery::Text);
    }

    #[test]
    fn keyboard_markup_nests_rows() {
        let markup = keyboard_markup(&[
            vec![InlineButton::new("A", "a")],
            vec![InlineButton::new("B", "b")],
        ]);
        assert_eq!(markup["inline_keyboard"][1][0]["callback_data"], "b");
    }
}
