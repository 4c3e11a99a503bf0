use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::body::Bytes;
use axum::http::Method;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_TYPE;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::Notify;
use tower::Service;
use url::Url;

use crate::anniversaries::Anniversary;
use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::config::Config;
use crate::dates::parse_partial_date;
use crate::dispatch::Dispatcher;
use crate::ledger::LedgerEntry;
use crate::messaging;
use crate::messaging::Action;
use crate::messaging::ContactCard;
use crate::messaging::DEFAULT_TELEGRAM_API_URL;
use crate::messaging::MessageRef;
use crate::messaging::Messenger;
use crate::preferences::Preferences;
use crate::preferences::StoredPreferences;
use crate::setup_app;
use crate::storage;
use crate::storage::CreateAnniversaryValues;
use crate::storage::Memory;
use crate::storage::Storage;
use crate::storage::UpdateAnniversaryValues;
use crate::storage::UpsertLedgerEntryValues;

pub const API_TOKEN: &str = "verysecret";
pub const WEBHOOK_SECRET: &str = "webhooksecret";

const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// What a message looked like
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Text(String),
    ContactCard {
        phone: String,
        given_name: String,
        family_name: Option<String>,
    },
}

/// A message handed to the messenger
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub owner_id: OwnerId,
    pub message_ref: MessageRef,
    pub content: Content,
    pub actions: Vec<Action>,
}

impl SentMessage {
    pub fn text(&self) -> &str {
        match &self.content {
            Content::Text(text) => text,
            Content::ContactCard { .. } => "",
        }
    }
}

#[derive(Default)]
struct Recorded {
    last_message_ref: MessageRef,
    sent: Vec<SentMessage>,
    deleted: Vec<(OwnerId, MessageRef)>,
    edited: Vec<(OwnerId, MessageRef, String)>,
    failing_owners: HashSet<OwnerId>,
    failing_contact_cards: bool,
    failing_deletes: bool,
}

/// Messenger keeping everything in memory, with switchable failures
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingMessenger {
    /// Every message to this owner fails
    pub fn fail_for_owner(&self, owner_id: OwnerId) {
        self.recorded.lock().unwrap().failing_owners.insert(owner_id);
    }

    /// Every contact card fails
    pub fn fail_contact_cards(&self) {
        self.recorded.lock().unwrap().failing_contact_cards = true;
    }

    /// Deleting messages fails, like for messages older than 48 hours
    pub fn fail_deletes(&self) {
        self.recorded.lock().unwrap().failing_deletes = true;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.recorded.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, owner_id: OwnerId) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.owner_id == owner_id)
            .collect()
    }

    pub fn deleted(&self) -> Vec<(OwnerId, MessageRef)> {
        self.recorded.lock().unwrap().deleted.clone()
    }

    pub fn edited(&self) -> Vec<(OwnerId, MessageRef, String)> {
        self.recorded.lock().unwrap().edited.clone()
    }

    /// Messages of an owner that are still visible
    pub fn visible_to(&self, owner_id: OwnerId) -> Vec<SentMessage> {
        let deleted = self.deleted();

        self.sent_to(owner_id)
            .into_iter()
            .filter(|message| !deleted.contains(&(owner_id, message.message_ref)))
            .collect()
    }

    fn record(
        &self,
        owner_id: OwnerId,
        content: Content,
        actions: &[Action],
    ) -> messaging::Result<MessageRef> {
        let mut recorded = self.recorded.lock().unwrap();

        if recorded.failing_owners.contains(&owner_id) {
            return Err(messaging::Error::Transport("connection refused".to_string()));
        }

        recorded.last_message_ref += 1;
        let message_ref = recorded.last_message_ref;

        recorded.sent.push(SentMessage {
            owner_id,
            message_ref,
            content,
            actions: actions.to_vec(),
        });

        Ok(message_ref)
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        owner_id: OwnerId,
        text: &str,
        actions: &[Action],
    ) -> messaging::Result<MessageRef> {
        self.record(owner_id, Content::Text(text.to_string()), actions)
    }

    async fn send_contact_card(
        &self,
        owner_id: OwnerId,
        card: &ContactCard<'_>,
        actions: &[Action],
    ) -> messaging::Result<MessageRef> {
        if self.recorded.lock().unwrap().failing_contact_cards {
            return Err(messaging::Error::Rejected("invalid phone number".to_string()));
        }

        let content = Content::ContactCard {
            phone: card.phone.to_string(),
            given_name: card.given_name.to_string(),
            family_name: card.family_name.map(ToString::to_string),
        };

        self.record(owner_id, content, actions)
    }

    async fn delete_message(
        &self,
        owner_id: OwnerId,
        message_ref: MessageRef,
    ) -> messaging::Result<()> {
        let mut recorded = self.recorded.lock().unwrap();

        if recorded.failing_deletes {
            return Err(messaging::Error::Rejected(
                "message can't be deleted".to_string(),
            ));
        }

        recorded.deleted.push((owner_id, message_ref));

        Ok(())
    }

    async fn edit_text(
        &self,
        owner_id: OwnerId,
        message_ref: MessageRef,
        text: &str,
        _actions: &[Action],
    ) -> messaging::Result<()> {
        self.recorded
            .lock()
            .unwrap()
            .edited
            .push((owner_id, message_ref, text.to_string()));

        Ok(())
    }
}

#[derive(Default)]
struct StorageFailures {
    owner_lookups: bool,
    hold_owner_lookups: bool,
    owners: HashSet<OwnerId>,
}

/// Memory storage that can be told to fail or to hold a tick halfway
#[derive(Clone, Default)]
pub struct ControlledStorage {
    memory: Memory,
    failures: Arc<Mutex<StorageFailures>>,
    owner_lookup_started: Arc<Notify>,
    owner_lookup_released: Arc<Notify>,
}

impl ControlledStorage {
    /// The storage underneath, to set up data
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Listing the owners fails
    pub fn fail_owner_lookups(&self, fail: bool) {
        self.failures.lock().unwrap().owner_lookups = fail;
    }

    /// Every lookup for this owner fails
    pub fn fail_for_owner(&self, owner_id: OwnerId) {
        self.failures.lock().unwrap().owners.insert(owner_id);
    }

    /// Listing the owners waits until [`Self::release_owner_lookups`]
    pub fn hold_owner_lookups(&self) {
        self.failures.lock().unwrap().hold_owner_lookups = true;
    }

    /// Wait until a held owner lookup is in progress
    pub async fn owner_lookup_started(&self) {
        self.owner_lookup_started.notified().await;
    }

    pub fn release_owner_lookups(&self) {
        self.failures.lock().unwrap().hold_owner_lookups = false;
        self.owner_lookup_released.notify_one();
    }

    fn check_owner(&self, owner_id: OwnerId) -> storage::Result<()> {
        if self.failures.lock().unwrap().owners.contains(&owner_id) {
            return Err(storage::Error::Connection("connection reset".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Storage for ControlledStorage {
    async fn find_all_owners(&self) -> storage::Result<Vec<OwnerId>> {
        let (fail, hold) = {
            let failures = self.failures.lock().unwrap();
            (failures.owner_lookups, failures.hold_owner_lookups)
        };

        if hold {
            self.owner_lookup_started.notify_one();
            self.owner_lookup_released.notified().await;
        }

        if fail {
            return Err(storage::Error::Connection("connection refused".to_string()));
        }

        self.memory.find_all_owners().await
    }

    async fn find_all_anniversaries_by_owner(
        &self,
        owner_id: OwnerId,
    ) -> storage::Result<Vec<Anniversary>> {
        self.check_owner(owner_id)?;
        self.memory.find_all_anniversaries_by_owner(owner_id).await
    }

    async fn find_anniversaries_by_month_day(
        &self,
        owner_id: OwnerId,
        month: u32,
        day: u32,
    ) -> storage::Result<Vec<Anniversary>> {
        self.check_owner(owner_id)?;
        self.memory
            .find_anniversaries_by_month_day(owner_id, month, day)
            .await
    }

    async fn count_anniversaries_by_month_day(&self, month: u32, day: u32) -> storage::Result<u64> {
        self.memory.count_anniversaries_by_month_day(month, day).await
    }

    async fn find_single_anniversary_by_id(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> storage::Result<Option<Anniversary>> {
        self.check_owner(owner_id)?;
        self.memory
            .find_single_anniversary_by_id(owner_id, anniversary_id)
            .await
    }

    async fn create_anniversary(
        &self,
        values: &CreateAnniversaryValues,
    ) -> storage::Result<Anniversary> {
        self.memory.create_anniversary(values).await
    }

    async fn update_anniversary(
        &self,
        anniversary: &Anniversary,
        values: &UpdateAnniversaryValues,
    ) -> storage::Result<Anniversary> {
        self.memory.update_anniversary(anniversary, values).await
    }

    async fn delete_anniversary(&self, anniversary: &Anniversary) -> storage::Result<()> {
        self.memory.delete_anniversary(anniversary).await
    }

    async fn set_notified_today(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
        notified_today: bool,
    ) -> storage::Result<()> {
        self.check_owner(owner_id)?;
        self.memory
            .set_notified_today(owner_id, anniversary_id, notified_today)
            .await
    }

    async fn reset_all_notified_today(&self) -> storage::Result<u64> {
        self.memory.reset_all_notified_today().await
    }

    async fn find_preferences(
        &self,
        owner_id: OwnerId,
    ) -> storage::Result<Option<StoredPreferences>> {
        self.check_owner(owner_id)?;
        self.memory.find_preferences(owner_id).await
    }

    async fn save_preferences(
        &self,
        owner_id: OwnerId,
        preferences: &Preferences,
    ) -> storage::Result<StoredPreferences> {
        self.memory.save_preferences(owner_id, preferences).await
    }

    async fn find_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> storage::Result<Option<LedgerEntry>> {
        self.check_owner(owner_id)?;
        self.memory.find_ledger_entry(owner_id, anniversary_id).await
    }

    async fn upsert_ledger_entry(
        &self,
        values: &UpsertLedgerEntryValues,
    ) -> storage::Result<LedgerEntry> {
        self.memory.upsert_ledger_entry(values).await
    }

    async fn delete_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> storage::Result<()> {
        self.memory
            .delete_ledger_entry(owner_id, anniversary_id)
            .await
    }
}

/// Everything a test needs to poke at
pub struct TestApp<S: Storage = Memory> {
    pub app: Router,
    pub dispatcher: Dispatcher<S, RecordingMessenger>,
    pub storage: S,
    pub messenger: RecordingMessenger,
}

pub fn test_config() -> Config {
    Config {
        address: "127.0.0.1:0".parse().unwrap(),
        database_url: None,
        interval_minutes: 60,
        tick_on_startup: false,
        max_concurrent_owners: 2,
        telegram_bot_token: String::new(),
        telegram_api_url: Url::parse(DEFAULT_TELEGRAM_API_URL).unwrap(),
        telegram_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        api_token: API_TOKEN.to_string(),
    }
}

/// Setup the app on top of in-memory storage and a recording messenger
pub fn setup_test_app() -> TestApp {
    setup_test_app_with(Memory::new())
}

/// Setup the app on top of storage that can be told to fail
pub fn setup_controlled_test_app() -> TestApp<ControlledStorage> {
    setup_test_app_with(ControlledStorage::default())
}

fn setup_test_app_with<S: Storage>(storage: S) -> TestApp<S> {
    let messenger = RecordingMessenger::default();

    let (app, dispatcher) = setup_app(storage.clone(), messenger.clone(), &test_config());

    TestApp {
        app,
        dispatcher,
        storage,
        messenger,
    }
}

/// An instant on May 20th 2025
pub fn may_20th(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 20, hour, minute, 0).unwrap()
}

pub async fn create_anniversary(
    storage: &Memory,
    owner_id: OwnerId,
    date: &str,
    display_name: &str,
) -> Anniversary {
    create_anniversary_with_contact(storage, owner_id, date, display_name, None, None).await
}

pub async fn create_anniversary_with_contact(
    storage: &Memory,
    owner_id: OwnerId,
    date: &str,
    display_name: &str,
    contact_phone: Option<&str>,
    contact_handle: Option<&str>,
) -> Anniversary {
    create_anniversary_with_platform_id(
        storage,
        owner_id,
        date,
        display_name,
        contact_phone,
        contact_handle,
        None,
    )
    .await
}

pub async fn create_anniversary_with_platform_id(
    storage: &Memory,
    owner_id: OwnerId,
    date: &str,
    display_name: &str,
    contact_phone: Option<&str>,
    contact_handle: Option<&str>,
    contact_platform_id: Option<i64>,
) -> Anniversary {
    let date = parse_partial_date(date).unwrap();

    storage
        .create_anniversary(&CreateAnniversaryValues {
            owner_id,
            date: &date,
            display_name,
            contact_phone,
            contact_handle,
            contact_platform_id,
        })
        .await
        .unwrap()
}

pub async fn save_preferences(
    storage: &Memory,
    owner_id: OwnerId,
    utc_offset_hours: i32,
    window_start_hour: u32,
) {
    let preferences = Preferences::new(utc_offset_hours, window_start_hour).unwrap();

    storage
        .save_preferences(owner_id, &preferences)
        .await
        .unwrap();
}

pub async fn is_notified_today(
    storage: &Memory,
    owner_id: OwnerId,
    anniversary_id: AnniversaryId,
) -> bool {
    storage
        .find_single_anniversary_by_id(owner_id, anniversary_id)
        .await
        .unwrap()
        .unwrap()
        .notified_today
}

/// Error response
#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    pub error: String,
    pub description: Option<String>,
}

/// Send a request to the app
///
/// Returns the status code and the body as JSON, `Null` for an empty body
pub async fn call(
    app: &mut Router,
    method: Method,
    uri: &str,
    access_token: Option<&str>,
    payload: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(access_token) = access_token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {access_token}"));
    }

    let body = if let Some(payload) = payload {
        builder = builder.header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());
        Body::from(serde_json::to_vec(&payload).unwrap())
    } else {
        Body::empty()
    };

    let response = app.call(builder.body(body).unwrap()).await.unwrap();
    let status_code = response.status();

    let body = response.into_body().collect().await.unwrap().to_bytes();

    (status_code, to_json(&body))
}

pub async fn list_anniversaries(app: &mut Router, owner_id: OwnerId) -> (StatusCode, Value) {
    call(
        app,
        Method::GET,
        &format!("/api/owners/{owner_id}/anniversaries"),
        Some(API_TOKEN),
        None,
    )
    .await
}

pub async fn maybe_create_anniversary(
    app: &mut Router,
    owner_id: OwnerId,
    payload: Value,
) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        &format!("/api/owners/{owner_id}/anniversaries"),
        Some(API_TOKEN),
        Some(payload),
    )
    .await
}

pub async fn maybe_update_anniversary(
    app: &mut Router,
    owner_id: OwnerId,
    anniversary_id: AnniversaryId,
    payload: Value,
) -> (StatusCode, Value) {
    call(
        app,
        Method::PATCH,
        &format!("/api/owners/{owner_id}/anniversaries/{anniversary_id}"),
        Some(API_TOKEN),
        Some(payload),
    )
    .await
}

pub async fn maybe_delete_anniversary(
    app: &mut Router,
    owner_id: OwnerId,
    anniversary_id: AnniversaryId,
) -> (StatusCode, Value) {
    call(
        app,
        Method::DELETE,
        &format!("/api/owners/{owner_id}/anniversaries/{anniversary_id}"),
        Some(API_TOKEN),
        None,
    )
    .await
}

/// Press `done` or `snooze` on an anniversary through the API
pub async fn maybe_press(
    app: &mut Router,
    owner_id: OwnerId,
    anniversary_id: AnniversaryId,
    action: &str,
) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        &format!("/api/owners/{owner_id}/anniversaries/{anniversary_id}/{action}"),
        Some(API_TOKEN),
        None,
    )
    .await
}

pub async fn maybe_update_preferences(
    app: &mut Router,
    owner_id: OwnerId,
    payload: Value,
) -> (StatusCode, Value) {
    call(
        app,
        Method::PUT,
        &format!("/api/owners/{owner_id}/preferences"),
        Some(API_TOKEN),
        Some(payload),
    )
    .await
}

/// Deliver a webhook update, with the given secret header
pub async fn webhook(app: &mut Router, secret: Option<&str>, update: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/telegram/webhook")
        .header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());

    if let Some(secret) = secret {
        builder = builder.header(SECRET_TOKEN_HEADER, secret);
    }

    let request = builder
        .body(Body::from(serde_json::to_vec(&update).unwrap()))
        .unwrap();

    let response = app.call(request).await.unwrap();
    let status_code = response.status();

    let body = response.into_body().collect().await.unwrap().to_bytes();

    (status_code, to_json(&body))
}

/// A webhook update for a pressed button
pub fn callback_update(owner_id: OwnerId, data: &str) -> Value {
    serde_json::json!({
        "update_id": 1,
        "callback_query": {
            "id": "callback-1",
            "from": { "id": owner_id, "is_bot": false, "first_name": "Owner" },
            "data": data,
        },
    })
}

fn to_json(body: &Bytes) -> Value {
    if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&body[..]).unwrap()
    }
}

pub fn get_error(body: &Value) -> Error {
    Error {
        error: body["error"].as_str().map(ToString::to_string).unwrap(),
        description: body
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    }
}
