//! Telegram webhook
//!
//! Handles the buttons pressed on reminders. The callback query is answered in the webhook
//! response itself, an authenticated update always gets a `200 OK` so Telegram does not retry.

use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;
use serde::Serialize;

use crate::anniversaries::OwnerId;
use crate::dispatch::Dispatcher;
use crate::messaging::Action;
use crate::messaging::Messenger;
use crate::storage::Storage;

/// Header carrying the secret configured with `setWebhook`
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Secret expected on webhook requests, if any
#[derive(Clone)]
pub struct WebhookSecret(Option<Arc<str>>);

impl WebhookSecret {
    pub fn new(secret: Option<&str>) -> Self {
        Self(secret.map(Arc::from))
    }

    fn accepts(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = &self.0 else {
            return true;
        };

        headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == &**secret)
    }
}

#[derive(Debug, Deserialize)]
pub struct Update {
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    id: String,
    from: User,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    id: OwnerId,
}

/// Answer to a callback query, sent back as the webhook response
#[derive(Debug, Serialize)]
struct AnswerCallbackQuery {
    method: &'static str,
    callback_query_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'static str>,
}

impl AnswerCallbackQuery {
    fn new(callback_query_id: String, text: Option<&'static str>) -> Self {
        Self {
            method: "answerCallbackQuery",
            callback_query_id,
            text,
        }
    }
}

pub async fn update<S: Storage, M: Messenger>(
    Extension(dispatcher): Extension<Dispatcher<S, M>>,
    Extension(secret): Extension<WebhookSecret>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Response {
    if !secret.accepts(&headers) {
        tracing::warn!("Webhook request with an invalid secret token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(callback_query) = update.callback_query else {
        return StatusCode::OK.into_response();
    };

    let owner_id = callback_query.from.id;
    let action = callback_query
        .data
        .as_deref()
        .and_then(Action::from_callback_data);

    let text = match action {
        Some(Action::Acknowledge(anniversary_id)) => {
            match dispatcher.acknowledge(owner_id, anniversary_id).await {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(owner_id, anniversary_id, "Could not acknowledge: {err}");
                    Some("Something went wrong, please try again")
                }
            }
        }
        Some(Action::Defer(anniversary_id)) => {
            match dispatcher.defer(owner_id, anniversary_id).await {
                Ok(()) => Some("I will remind you again later"),
                Err(err) => {
                    tracing::error!(owner_id, anniversary_id, "Could not defer: {err}");
                    Some("Something went wrong, please try again")
                }
            }
        }
        Some(Action::LinkContact(_)) => Some("Linking contacts is not available here"),
        None => {
            tracing::debug!(owner_id, data = ?callback_query.data, "Unknown callback data");
            None
        }
    };

    Json(AnswerCallbackQuery::new(callback_query.id, text)).into_response()
}
