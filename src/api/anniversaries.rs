use axum::Extension;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::anniversaries::Anniversary;
use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::dispatch::Dispatcher;
use crate::messaging::Messenger;
use crate::storage::CreateAnniversaryValues;
use crate::storage::Storage;
use crate::storage::UpdateAnniversaryValues;

use super::Authorized;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;
use super::request::double_option;
use super::request::parse_date;
use super::request::parse_display_name;
use super::request::parse_optional_text;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnniversaryResponse {
    pub id: AnniversaryId,
    pub date: String,
    pub display_date: String,
    pub display_name: String,
    pub contact_phone: Option<String>,
    pub contact_handle: Option<String>,
    pub contact_platform_id: Option<i64>,
    pub notified_today: bool,
    pub days_until_next: u32,
    pub age: Option<u32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl AnniversaryResponse {
    fn from_anniversary(anniversary: Anniversary, today: NaiveDate) -> Self {
        Self {
            id: anniversary.id,
            date: anniversary.date.normalized(),
            display_date: anniversary.date.display_short(),
            days_until_next: anniversary.date.days_until_next(today),
            age: anniversary.date.age_in_years(today),
            display_name: anniversary.display_name,
            contact_phone: anniversary.contact_phone,
            contact_handle: anniversary.contact_handle,
            contact_platform_id: anniversary.contact_platform_id,
            notified_today: anniversary.notified_today,
            created_at: anniversary.created_at,
            updated_at: anniversary.updated_at,
        }
    }

    /// Soonest first
    fn from_anniversary_multiple(anniversaries: Vec<Anniversary>, today: NaiveDate) -> Vec<Self> {
        let mut responses = anniversaries
            .into_iter()
            .map(|anniversary| Self::from_anniversary(anniversary, today))
            .collect::<Vec<Self>>();

        responses.sort_by(|a, b| {
            a.days_until_next
                .cmp(&b.days_until_next)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        responses
    }
}

pub async fn list<S: Storage>(
    _: Authorized,
    Extension(storage): Extension<S>,
    PathParameters(owner_id): PathParameters<OwnerId>,
) -> Result<Success<Vec<AnniversaryResponse>>, Error> {
    let today = local_today(&storage, owner_id).await?;

    let anniversaries = storage
        .find_all_anniversaries_by_owner(owner_id)
        .await
        .map_err(Error::internal_server_error)?;

    Ok(Success::ok(AnniversaryResponse::from_anniversary_multiple(
        anniversaries,
        today,
    )))
}

pub async fn single<S: Storage>(
    _: Authorized,
    Extension(storage): Extension<S>,
    PathParameters((owner_id, anniversary_id)): PathParameters<(OwnerId, AnniversaryId)>,
) -> Result<Success<AnniversaryResponse>, Error> {
    let today = local_today(&storage, owner_id).await?;
    let anniversary = fetch_anniversary(&storage, owner_id, anniversary_id).await?;

    Ok(Success::ok(AnniversaryResponse::from_anniversary(
        anniversary,
        today,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnniversaryForm {
    date: String,
    display_name: String,
    contact_phone: Option<String>,
    contact_handle: Option<String>,
    contact_platform_id: Option<i64>,
}

pub async fn create<S: Storage>(
    _: Authorized,
    Extension(storage): Extension<S>,
    PathParameters(owner_id): PathParameters<OwnerId>,
    Form(form): Form<CreateAnniversaryForm>,
) -> Result<Success<AnniversaryResponse>, Error> {
    let date = parse_date(&form.date)?;
    let display_name = parse_display_name(&form.display_name)?;

    let values = CreateAnniversaryValues {
        owner_id,
        date: &date,
        display_name: &display_name,
        contact_phone: parse_optional_text(form.contact_phone.as_deref()),
        contact_handle: parse_optional_text(form.contact_handle.as_deref()),
        contact_platform_id: form.contact_platform_id,
    };

    let anniversary = storage
        .create_anniversary(&values)
        .await
        .map_err(Error::internal_server_error)?;

    tracing::debug!(owner_id, anniversary_id = anniversary.id, "Anniversary created");

    let today = local_today(&storage, owner_id).await?;

    Ok(Success::created(AnniversaryResponse::from_anniversary(
        anniversary,
        today,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnniversaryForm {
    date: Option<String>,
    display_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    contact_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    contact_handle: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    contact_platform_id: Option<Option<i64>>,
}

pub async fn update<S: Storage>(
    _: Authorized,
    Extension(storage): Extension<S>,
    PathParameters((owner_id, anniversary_id)): PathParameters<(OwnerId, AnniversaryId)>,
    Form(form): Form<UpdateAnniversaryForm>,
) -> Result<Success<AnniversaryResponse>, Error> {
    let anniversary = fetch_anniversary(&storage, owner_id, anniversary_id).await?;

    let date = form.date.as_deref().map(parse_date).transpose()?;
    let display_name = form
        .display_name
        .as_deref()
        .map(parse_display_name)
        .transpose()?;

    let values = UpdateAnniversaryValues {
        date: date.as_ref(),
        display_name: display_name.as_deref(),
        contact_phone: form
            .contact_phone
            .as_ref()
            .map(|phone| parse_optional_text(phone.as_deref())),
        contact_handle: form
            .contact_handle
            .as_ref()
            .map(|handle| parse_optional_text(handle.as_deref())),
        contact_platform_id: form.contact_platform_id,
    };

    let anniversary = storage
        .update_anniversary(&anniversary, &values)
        .await
        .map_err(Error::internal_server_error)?;

    let today = local_today(&storage, owner_id).await?;

    Ok(Success::ok(AnniversaryResponse::from_anniversary(
        anniversary,
        today,
    )))
}

pub async fn delete<S: Storage, M: Messenger>(
    _: Authorized,
    Extension(dispatcher): Extension<Dispatcher<S, M>>,
    PathParameters((owner_id, anniversary_id)): PathParameters<(OwnerId, AnniversaryId)>,
) -> Result<Success<&'static str>, Error> {
    if dispatcher
        .remove_anniversary(owner_id, anniversary_id)
        .await?
    {
        Ok(Success::no_content())
    } else {
        Err(Error::not_found("Anniversary not found"))
    }
}

/// Acknowledge today's reminder
pub async fn done<S: Storage, M: Messenger>(
    _: Authorized,
    Extension(dispatcher): Extension<Dispatcher<S, M>>,
    PathParameters((owner_id, anniversary_id)): PathParameters<(OwnerId, AnniversaryId)>,
) -> Result<Success<&'static str>, Error> {
    fetch_anniversary(dispatcher.storage(), owner_id, anniversary_id).await?;

    dispatcher.acknowledge(owner_id, anniversary_id).await?;

    Ok(Success::no_content())
}

/// Snooze today's reminder until a later tick
pub async fn snooze<S: Storage, M: Messenger>(
    _: Authorized,
    Extension(dispatcher): Extension<Dispatcher<S, M>>,
    PathParameters((owner_id, anniversary_id)): PathParameters<(OwnerId, AnniversaryId)>,
) -> Result<Success<&'static str>, Error> {
    fetch_anniversary(dispatcher.storage(), owner_id, anniversary_id).await?;

    dispatcher.defer(owner_id, anniversary_id).await?;

    Ok(Success::no_content())
}

/// Fetch anniversary from storage
async fn fetch_anniversary<S: Storage>(
    storage: &S,
    owner_id: OwnerId,
    anniversary_id: AnniversaryId,
) -> Result<Anniversary, Error> {
    storage
        .find_single_anniversary_by_id(owner_id, anniversary_id)
        .await
        .map_err(Error::internal_server_error)?
        .map_or_else(|| Err(Error::not_found("Anniversary not found")), Ok)
}

/// Today in the owner's timezone
async fn local_today<S: Storage>(storage: &S, owner_id: OwnerId) -> Result<NaiveDate, Error> {
    let preferences = storage
        .find_preferences(owner_id)
        .await
        .map_err(Error::internal_server_error)?
        .map(|stored| stored.preferences)
        .unwrap_or_default();

    Ok(preferences.local_time(Utc::now()).date())
}
