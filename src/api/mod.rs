//! All API endpoint setup

use axum::Router;
use axum::routing::get;
use axum::routing::post;

use crate::messaging::Messenger;
use crate::storage::Storage;

pub use auth::ApiToken;
pub use auth::Authorized;
pub use request::Form;
pub use request::PathParameters;
pub use response::Error;
pub use response::Success;
pub use webhook::WebhookSecret;

mod anniversaries;
mod auth;
mod preferences;
mod request;
mod response;
mod ticks;
mod webhook;

/// Get the Axum router for all management API routes
pub fn router<S: Storage, M: Messenger>() -> Router {
    Router::new()
        .route(
            "/owners/{owner}/anniversaries",
            get(anniversaries::list::<S>).post(anniversaries::create::<S>),
        )
        .route(
            "/owners/{owner}/anniversaries/{anniversary}",
            get(anniversaries::single::<S>)
                .patch(anniversaries::update::<S>)
                .delete(anniversaries::delete::<S, M>),
        )
        .route(
            "/owners/{owner}/anniversaries/{anniversary}/done",
            post(anniversaries::done::<S, M>),
        )
        .route(
            "/owners/{owner}/anniversaries/{anniversary}/snooze",
            post(anniversaries::snooze::<S, M>),
        )
        .route(
            "/owners/{owner}/preferences",
            get(preferences::single::<S>).put(preferences::update::<S>),
        )
        .route("/ticks", post(ticks::create::<S, M>))
}

/// Get the Axum router for the Telegram webhook
pub fn webhook_router<S: Storage, M: Messenger>() -> Router {
    Router::new().route("/webhook", post(webhook::update::<S, M>))
}
