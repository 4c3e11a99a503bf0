use axum::Extension;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

use crate::anniversaries::OwnerId;
use crate::preferences::Preferences;
use crate::preferences::StoredPreferences;
use crate::preferences::parse_utc_offset;
use crate::preferences::parse_window_start_hour;
use crate::storage::Storage;

use super::Authorized;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesResponse {
    pub utc_offset_hours: i32,
    pub utc_offset: String,
    pub window_start_hour: u32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl PreferencesResponse {
    fn from_stored_preferences(stored: StoredPreferences) -> Self {
        Self {
            utc_offset_hours: stored.preferences.utc_offset_hours,
            utc_offset: stored.preferences.display_utc_offset(),
            window_start_hour: stored.preferences.window_start_hour,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Number, or text as a user would type it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Number(i64),
    Text(String),
}

impl TypedValue {
    fn as_text(&self) -> String {
        match self {
            TypedValue::Number(number) => number.to_string(),
            TypedValue::Text(text) => text.clone(),
        }
    }
}

/// Preferences of a user, created with defaults on first access
pub async fn single<S: Storage>(
    _: Authorized,
    Extension(storage): Extension<S>,
    PathParameters(owner_id): PathParameters<OwnerId>,
) -> Result<Success<PreferencesResponse>, Error> {
    let stored = fetch_or_create_preferences(&storage, owner_id).await?;

    Ok(Success::ok(PreferencesResponse::from_stored_preferences(
        stored,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesForm {
    utc_offset: Option<TypedValue>,
    window_start_hour: Option<TypedValue>,
}

pub async fn update<S: Storage>(
    _: Authorized,
    Extension(storage): Extension<S>,
    PathParameters(owner_id): PathParameters<OwnerId>,
    Form(form): Form<UpdatePreferencesForm>,
) -> Result<Success<PreferencesResponse>, Error> {
    let current = fetch_or_create_preferences(&storage, owner_id)
        .await?
        .preferences;

    let utc_offset_hours = match form.utc_offset {
        Some(utc_offset) => parse_utc_offset(&utc_offset.as_text())
            .map_err(|err| Error::bad_request("Invalid UTC offset").with_description(err))?,
        None => current.utc_offset_hours,
    };

    let window_start_hour = match form.window_start_hour {
        Some(window_start_hour) => parse_window_start_hour(&window_start_hour.as_text())
            .map_err(|err| Error::bad_request("Invalid window start hour").with_description(err))?,
        None => current.window_start_hour,
    };

    let preferences = Preferences::new(utc_offset_hours, window_start_hour)
        .map_err(|err| Error::bad_request("Invalid preferences").with_description(err))?;

    let stored = storage
        .save_preferences(owner_id, &preferences)
        .await
        .map_err(Error::internal_server_error)?;

    tracing::debug!(
        owner_id,
        utc_offset_hours,
        window_start_hour,
        "Preferences updated"
    );

    Ok(Success::ok(PreferencesResponse::from_stored_preferences(
        stored,
    )))
}

async fn fetch_or_create_preferences<S: Storage>(
    storage: &S,
    owner_id: OwnerId,
) -> Result<StoredPreferences, Error> {
    let stored = storage
        .find_preferences(owner_id)
        .await
        .map_err(Error::internal_server_error)?;

    match stored {
        Some(stored) => Ok(stored),
        None => storage
            .save_preferences(owner_id, &Preferences::default())
            .await
            .map_err(Error::internal_server_error),
    }
}
