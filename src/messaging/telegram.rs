//! Telegram Bot API messenger

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use url::Url;

use crate::anniversaries::OwnerId;

use super::Action;
use super::ContactCard;
use super::Error;
use super::MessageRef;
use super::Messenger;
use super::Result;

/// Default location of the Bot API
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Descriptions of deletes/edits that count as done
const TOLERATED_DESCRIPTIONS: [&str; 3] = [
    "message to delete not found",
    "message to edit not found",
    "message is not modified",
];

/// Messenger talking to the Telegram Bot API
#[derive(Clone)]
pub struct Telegram {
    /// HTTP client
    client: reqwest::Client,

    /// Base URL of the API, always ending with a `/`
    api_url: Url,

    /// Bot token
    token: String,
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    /// Did it work?
    ok: bool,

    /// The actual result
    result: Option<T>,

    /// Human readable error
    description: Option<String>,
}

/// The only part of a sent message we care about
#[derive(Debug, Deserialize)]
struct SentMessage {
    /// Message ID within the chat
    message_id: MessageRef,
}

/// A single inline button
#[derive(Debug, Serialize)]
struct InlineKeyboardButton {
    /// Label
    text: &'static str,

    /// Data sent back on press
    callback_data: String,
}

impl Telegram {
    /// Create a messenger for a bot
    pub fn new(api_url: &Url, token: &str) -> Self {
        let mut api_url = api_url.clone();

        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_url,
            token: token.to_string(),
        }
    }

    /// Call a Bot API method
    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<Option<T>> {
        let endpoint = self
            .api_url
            .join(&format!("bot{}/{method}", self.token))
            .map_err(|err| Error::Transport(err.to_string()))?;

        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|err| Error::Transport(err.without_url().to_string()))?;

        let response = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|err| Error::Transport(err.without_url().to_string()))?;

        if response.ok {
            Ok(response.result)
        } else {
            Err(Error::Rejected(
                response
                    .description
                    .unwrap_or_else(|| format!("`{method}` failed")),
            ))
        }
    }

    /// Send something that results in a message
    async fn send(&self, method: &str, payload: &Value) -> Result<MessageRef> {
        self.call::<SentMessage>(method, payload)
            .await?
            .map(|message| message.message_id)
            .ok_or_else(|| Error::Rejected(format!("`{method}` returned no message")))
    }

    /// Call a method where some refusals mean it is already done
    async fn call_tolerant(&self, method: &str, payload: &Value) -> Result<()> {
        match self.call::<Value>(method, payload).await {
            Ok(_) => Ok(()),
            Err(Error::Rejected(description)) if is_tolerated(&description) => {
                tracing::debug!("Ignoring `{method}` refusal: {description}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Messenger for Telegram {
    async fn send_text(
        &self,
        owner_id: OwnerId,
        text: &str,
        actions: &[Action],
    ) -> Result<MessageRef> {
        let mut payload = json!({
            "chat_id": owner_id,
            "text": text,
        });

        if let Some(keyboard) = reply_markup(actions) {
            payload["reply_markup"] = keyboard;
        }

        self.send("sendMessage", &payload).await
    }

    async fn send_contact_card(
        &self,
        owner_id: OwnerId,
        card: &ContactCard<'_>,
        actions: &[Action],
    ) -> Result<MessageRef> {
        let mut payload = json!({
            "chat_id": owner_id,
            "phone_number": card.phone,
            "first_name": card.given_name,
        });

        if let Some(family_name) = card.family_name {
            payload["last_name"] = json!(family_name);
        }

        if let Some(keyboard) = reply_markup(actions) {
            payload["reply_markup"] = keyboard;
        }

        self.send("sendContact", &payload).await
    }

    async fn delete_message(&self, owner_id: OwnerId, message_ref: MessageRef) -> Result<()> {
        let payload = json!({
            "chat_id": owner_id,
            "message_id": message_ref,
        });

        self.call_tolerant("deleteMessage", &payload).await
    }

    async fn edit_text(
        &self,
        owner_id: OwnerId,
        message_ref: MessageRef,
        text: &str,
        actions: &[Action],
    ) -> Result<()> {
        let payload = json!({
            "chat_id": owner_id,
            "message_id": message_ref,
            "text": text,
            "reply_markup": reply_markup(actions).unwrap_or_else(|| json!({ "inline_keyboard": [] })),
        });

        self.call_tolerant("editMessageText", &payload).await
    }
}

/// Inline keyboard for actions
///
/// Acknowledge and defer share the first row, linking gets a row of its own.
fn reply_markup(actions: &[Action]) -> Option<Value> {
    if actions.is_empty() {
        return None;
    }

    let (link, reply) = actions
        .iter()
        .partition::<Vec<&Action>, _>(|action| matches!(action, Action::LinkContact(_)));

    let rows = [reply, link]
        .into_iter()
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.into_iter()
                .map(|action| InlineKeyboardButton {
                    text: action.label(),
                    callback_data: action.callback_data(),
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    Some(json!({ "inline_keyboard": rows }))
}

fn is_tolerated(description: &str) -> bool {
    let description = description.to_lowercase();

    TOLERATED_DESCRIPTIONS
        .iter()
        .any(|tolerated| description.contains(tolerated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_markup_rows() {
        let markup = reply_markup(&Action::for_reminder(7, true)).unwrap();

        assert_eq!(
            json!({
                "inline_keyboard": [
                    [
                        { "text": "Already congratulated", "callback_data": "remind_done:7" },
                        { "text": "Snooze", "callback_data": "remind_snooze:7" },
                    ],
                    [
                        { "text": "Link contact", "callback_data": "link:7" },
                    ],
                ]
            }),
            markup
        );

        assert_eq!(None, reply_markup(&[]));
    }

    #[test]
    fn test_is_tolerated() {
        assert!(is_tolerated("Bad Request: message to delete not found"));
        assert!(is_tolerated(
            "Bad Request: message is not modified: specified new message content is the same"
        ));
        assert!(!is_tolerated("Bad Request: message can't be deleted"));
    }

    #[test]
    fn test_api_url_gets_trailing_slash() {
        let telegram = Telegram::new(&Url::parse("http://localhost:8081/proxy").unwrap(), "t");

        assert_eq!(
            "http://localhost:8081/proxy/bott/sendMessage",
            telegram
                .api_url
                .join("bott/sendMessage")
                .unwrap()
                .as_str()
        );
    }
}
