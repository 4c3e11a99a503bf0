#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
// easier to use when using the functions as callback of foreign functions
#![allow(clippy::needless_pass_by_value)]

use anyhow::Result;
use axum::Extension;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

use crate::api::ApiToken;
use crate::api::WebhookSecret;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::messaging::Messenger;
use crate::messaging::Telegram;
use crate::scheduler::Scheduler;
use crate::storage::Memory;
use crate::storage::Postgres;
use crate::storage::Storage;

mod anniversaries;
mod api;
mod config;
mod dates;
mod dispatch;
mod graceful_shutdown;
mod ledger;
mod messaging;
mod preferences;
mod scheduler;
mod storage;
#[cfg(test)]
mod tests;
mod utils;

const DEFAULT_RUST_LOG: &str = "anniversaries=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    setup_environment();
    setup_tracing();

    let config = Config::from_env()?;
    let messenger = Telegram::new(&config.telegram_api_url, &config.telegram_bot_token);

    if let Some(database_url) = &config.database_url {
        let storage = Postgres::connect(database_url).await?;

        run(storage, messenger, &config).await
    } else {
        tracing::warn!("`DATABASE_URL` is not set, using in-memory storage");

        run(Memory::new(), messenger, &config).await
    }
}

/// Serve the API and run the scheduler until shutdown
async fn run<S: Storage, M: Messenger>(storage: S, messenger: M, config: &Config) -> Result<()> {
    let shutdown = CancellationToken::new();

    let (app, dispatcher) = setup_app(storage, messenger, config);

    let triggers = Scheduler::new(dispatcher, config.interval_minutes, config.tick_on_startup)
        .start(&shutdown);

    let listener = TcpListener::bind(config.address).await?;
    tracing::info!("Listening on {}", config.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown::handler(shutdown.clone()))
        .await?;

    shutdown.cancel();

    for trigger in triggers {
        trigger.await?;
    }

    Ok(())
}

/// Create the app and its dispatcher
pub fn setup_app<S: Storage, M: Messenger>(
    storage: S,
    messenger: M,
    config: &Config,
) -> (Router, Dispatcher<S, M>) {
    let dispatcher = Dispatcher::new(storage.clone(), messenger)
        .with_max_concurrent_owners(config.max_concurrent_owners);

    let app = create_router(
        storage,
        dispatcher.clone(),
        ApiToken::new(&config.api_token),
        WebhookSecret::new(config.telegram_webhook_secret.as_deref()),
    );

    (app, dispatcher)
}

/// Create the router for the management API and the webhook
fn create_router<S: Storage, M: Messenger>(
    storage: S,
    dispatcher: Dispatcher<S, M>,
    api_token: ApiToken,
    webhook_secret: WebhookSecret,
) -> Router {
    Router::new()
        .nest("/api", api::router::<S, M>())
        .nest("/telegram", api::webhook_router::<S, M>())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(storage))
                .layer(Extension(dispatcher))
                .layer(Extension(api_token))
                .layer(Extension(webhook_secret)),
        )
}

fn setup_environment() {
    dotenvy::dotenv().ok();
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::registry;

    registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.into()),
        ))
        .with(fmt::layer())
        .init();
}
