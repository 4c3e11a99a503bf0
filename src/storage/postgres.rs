//! Postgres storage

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use crate::anniversaries::Anniversary;
use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::dates::PartialDate;
use crate::ledger::LedgerEntry;
use crate::preferences::Preferences;
use crate::preferences::StoredPreferences;

use super::CreateAnniversaryValues;
use super::Error;
use super::Result;
use super::Storage;
use super::UpdateAnniversaryValues;
use super::UpsertLedgerEntryValues;

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

/// Columns selected for an anniversary
const ANNIVERSARY_COLUMNS: &str = r"
    id,
    owner_id,
    year,
    month,
    day,
    display_name,
    contact_phone,
    contact_handle,
    contact_platform_id,
    notified_today,
    created_at,
    updated_at
";

/// Postgres storage
#[derive(Clone)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,
}

impl Postgres {
    /// Create Postgres storage from a connection string, like `DATABASE_URL`
    ///
    /// Migrations will be run
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let connection_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await
            .map_err(connection_error)?;

        Self::new_with_pool(connection_pool).await
    }

    /// Create Postgres storage with existing pool
    ///
    /// Migrations will be run
    pub async fn new_with_pool(connection_pool: PgPool) -> Result<Self> {
        MIGRATOR
            .run(&connection_pool)
            .await
            .map_err(|err| Error::Connection(format!("Migrations could not run: {err}")))?;

        Ok(Self { connection_pool })
    }
}

/// `SQLx` version of an anniversary
#[derive(sqlx::FromRow)]
struct SqlxAnniversary {
    /// Anniversary ID
    id: i64,

    /// Owner
    owner_id: i64,

    /// Year, 0 when unknown
    year: i32,

    /// Month
    month: i32,

    /// Day
    day: i32,

    /// Name
    display_name: String,

    /// Phone
    contact_phone: Option<String>,

    /// Handle
    contact_handle: Option<String>,

    /// Account ID
    contact_platform_id: Option<i64>,

    /// Flag
    notified_today: bool,

    /// Creation date
    created_at: NaiveDateTime,

    /// Last updated at
    updated_at: NaiveDateTime,
}

impl TryFrom<SqlxAnniversary> for Anniversary {
    type Error = Error;

    fn try_from(row: SqlxAnniversary) -> Result<Self> {
        let month = u32::try_from(row.month).map_err(invalid_data)?;
        let day = u32::try_from(row.day).map_err(invalid_data)?;

        let date = PartialDate::from_parts(row.year, month, day)
            .map_err(|err| Error::InvalidData(format!("anniversary {}: {err}", row.id)))?;

        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            date,
            display_name: row.display_name,
            contact_phone: row.contact_phone,
            contact_handle: row.contact_handle,
            contact_platform_id: row.contact_platform_id,
            notified_today: row.notified_today,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Convert multiple rows, broken ones are logged and left out
fn from_sqlx_anniversary_multiple(rows: Vec<SqlxAnniversary>) -> Vec<Anniversary> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;

            Anniversary::try_from(row)
                .inspect_err(|err| {
                    tracing::warn!(anniversary_id = id, "Skipping anniversary: {err}");
                })
                .ok()
        })
        .collect()
}

/// `SQLx` version of the preferences
#[derive(sqlx::FromRow)]
struct SqlxPreferences {
    /// Owner
    owner_id: i64,

    /// Offset in hours
    utc_offset_hours: i32,

    /// Window start
    window_start_hour: i32,

    /// Creation date
    created_at: NaiveDateTime,

    /// Last updated at
    updated_at: NaiveDateTime,
}

impl TryFrom<SqlxPreferences> for StoredPreferences {
    type Error = Error;

    fn try_from(row: SqlxPreferences) -> Result<Self> {
        let window_start_hour = u32::try_from(row.window_start_hour).map_err(invalid_data)?;
        let preferences =
            Preferences::new(row.utc_offset_hours, window_start_hour).map_err(invalid_data)?;

        Ok(Self {
            owner_id: row.owner_id,
            preferences,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// `SQLx` version of a ledger entry
#[derive(sqlx::FromRow)]
struct SqlxLedgerEntry {
    /// Owner
    owner_id: i64,

    /// Anniversary
    anniversary_id: i64,

    /// Main message
    message_ref: i64,

    /// Second message
    extra_message_ref: Option<i64>,

    /// Date sent
    sent_on: NaiveDate,
}

impl From<SqlxLedgerEntry> for LedgerEntry {
    fn from(row: SqlxLedgerEntry) -> Self {
        Self {
            owner_id: row.owner_id,
            anniversary_id: row.anniversary_id,
            message_ref: row.message_ref,
            extra_message_ref: row.extra_message_ref,
            sent_on: row.sent_on,
        }
    }
}

#[async_trait]
impl Storage for Postgres {
    async fn find_all_owners(&self) -> Result<Vec<OwnerId>> {
        sqlx::query_scalar::<_, i64>(
            r"
            SELECT DISTINCT owner_id
            FROM anniversaries
            ORDER BY owner_id
            ",
        )
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)
    }

    async fn find_all_anniversaries_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Anniversary>> {
        let rows = sqlx::query_as::<_, SqlxAnniversary>(&format!(
            r"
            SELECT {ANNIVERSARY_COLUMNS}
            FROM anniversaries
            WHERE owner_id = $1
            ORDER BY id
            "
        ))
        .bind(owner_id)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(from_sqlx_anniversary_multiple(rows))
    }

    async fn find_anniversaries_by_month_day(
        &self,
        owner_id: OwnerId,
        month: u32,
        day: u32,
    ) -> Result<Vec<Anniversary>> {
        let rows = sqlx::query_as::<_, SqlxAnniversary>(&format!(
            r"
            SELECT {ANNIVERSARY_COLUMNS}
            FROM anniversaries
            WHERE owner_id = $1
                AND month = $2
                AND day = $3
            ORDER BY id
            "
        ))
        .bind(owner_id)
        .bind(to_i32(month)?)
        .bind(to_i32(day)?)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(from_sqlx_anniversary_multiple(rows))
    }

    async fn count_anniversaries_by_month_day(&self, month: u32, day: u32) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(*)
            FROM anniversaries
            WHERE month = $1
                AND day = $2
            ",
        )
        .bind(to_i32(month)?)
        .bind(to_i32(day)?)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        u64::try_from(count).map_err(invalid_data)
    }

    async fn find_single_anniversary_by_id(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<Anniversary>> {
        let row = sqlx::query_as::<_, SqlxAnniversary>(&format!(
            r"
            SELECT {ANNIVERSARY_COLUMNS}
            FROM anniversaries
            WHERE owner_id = $1
                AND id = $2
            LIMIT 1
            "
        ))
        .bind(owner_id)
        .bind(anniversary_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        row.map(Anniversary::try_from).transpose()
    }

    async fn create_anniversary(&self, values: &CreateAnniversaryValues) -> Result<Anniversary> {
        let row = sqlx::query_as::<_, SqlxAnniversary>(&format!(
            r"
            INSERT INTO anniversaries (
                owner_id,
                year,
                month,
                day,
                display_name,
                contact_phone,
                contact_handle,
                contact_platform_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ANNIVERSARY_COLUMNS}
            "
        ))
        .bind(values.owner_id)
        .bind(values.date.stored_year())
        .bind(to_i32(values.date.month())?)
        .bind(to_i32(values.date.day())?)
        .bind(values.display_name)
        .bind(values.contact_phone)
        .bind(values.contact_handle)
        .bind(values.contact_platform_id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Anniversary::try_from(row)
    }

    async fn update_anniversary(
        &self,
        anniversary: &Anniversary,
        values: &UpdateAnniversaryValues,
    ) -> Result<Anniversary> {
        let date = values.date.unwrap_or(&anniversary.date);

        let contact_phone = values
            .contact_phone
            .unwrap_or(anniversary.contact_phone.as_deref());
        let contact_handle = values
            .contact_handle
            .unwrap_or(anniversary.contact_handle.as_deref());
        let contact_platform_id = values
            .contact_platform_id
            .unwrap_or(anniversary.contact_platform_id);

        let row = sqlx::query_as::<_, SqlxAnniversary>(&format!(
            r"
            UPDATE anniversaries
            SET
                year = $3,
                month = $4,
                day = $5,
                display_name = $6,
                contact_phone = $7,
                contact_handle = $8,
                contact_platform_id = $9,
                updated_at = (now() AT TIME ZONE 'utc')
            WHERE owner_id = $1
                AND id = $2
            RETURNING {ANNIVERSARY_COLUMNS}
            "
        ))
        .bind(anniversary.owner_id)
        .bind(anniversary.id)
        .bind(date.stored_year())
        .bind(to_i32(date.month())?)
        .bind(to_i32(date.day())?)
        .bind(values.display_name.unwrap_or(anniversary.display_name.as_str()))
        .bind(contact_phone)
        .bind(contact_handle)
        .bind(contact_platform_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        match row {
            Some(row) => Anniversary::try_from(row),
            // deleted in the meantime
            None => Ok(anniversary.clone()),
        }
    }

    async fn delete_anniversary(&self, anniversary: &Anniversary) -> Result<()> {
        // ledger entries cascade
        sqlx::query(
            r"
            DELETE FROM anniversaries
            WHERE owner_id = $1
                AND id = $2
            ",
        )
        .bind(anniversary.owner_id)
        .bind(anniversary.id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn set_notified_today(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
        notified_today: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE anniversaries
            SET notified_today = $3
            WHERE owner_id = $1
                AND id = $2
            ",
        )
        .bind(owner_id)
        .bind(anniversary_id)
        .bind(notified_today)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn reset_all_notified_today(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE anniversaries
            SET notified_today = FALSE
            WHERE notified_today
            ",
        )
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(result.rows_affected())
    }

    async fn find_preferences(&self, owner_id: OwnerId) -> Result<Option<StoredPreferences>> {
        let row = sqlx::query_as::<_, SqlxPreferences>(
            r"
            SELECT
                owner_id,
                utc_offset_hours,
                window_start_hour,
                created_at,
                updated_at
            FROM preferences
            WHERE owner_id = $1
            LIMIT 1
            ",
        )
        .bind(owner_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        row.map(StoredPreferences::try_from).transpose()
    }

    async fn save_preferences(
        &self,
        owner_id: OwnerId,
        preferences: &Preferences,
    ) -> Result<StoredPreferences> {
        let row = sqlx::query_as::<_, SqlxPreferences>(
            r"
            INSERT INTO preferences (owner_id, utc_offset_hours, window_start_hour)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id) DO UPDATE
            SET
                utc_offset_hours = excluded.utc_offset_hours,
                window_start_hour = excluded.window_start_hour,
                updated_at = (now() AT TIME ZONE 'utc')
            RETURNING
                owner_id,
                utc_offset_hours,
                window_start_hour,
                created_at,
                updated_at
            ",
        )
        .bind(owner_id)
        .bind(preferences.utc_offset_hours)
        .bind(to_i32(preferences.window_start_hour)?)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        StoredPreferences::try_from(row)
    }

    async fn find_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, SqlxLedgerEntry>(
            r"
            SELECT
                owner_id,
                anniversary_id,
                message_ref,
                extra_message_ref,
                sent_on
            FROM last_notifications
            WHERE owner_id = $1
                AND anniversary_id = $2
            LIMIT 1
            ",
        )
        .bind(owner_id)
        .bind(anniversary_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(row.map(LedgerEntry::from))
    }

    async fn upsert_ledger_entry(&self, values: &UpsertLedgerEntryValues) -> Result<LedgerEntry> {
        let row = sqlx::query_as::<_, SqlxLedgerEntry>(
            r"
            INSERT INTO last_notifications (
                owner_id,
                anniversary_id,
                message_ref,
                extra_message_ref,
                sent_on
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (owner_id, anniversary_id) DO UPDATE
            SET
                message_ref = excluded.message_ref,
                extra_message_ref = excluded.extra_message_ref,
                sent_on = excluded.sent_on
            RETURNING
                owner_id,
                anniversary_id,
                message_ref,
                extra_message_ref,
                sent_on
            ",
        )
        .bind(values.owner_id)
        .bind(values.anniversary_id)
        .bind(values.message_ref)
        .bind(values.extra_message_ref)
        .bind(values.sent_on)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(LedgerEntry::from(row))
    }

    async fn delete_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM last_notifications
            WHERE owner_id = $1
                AND anniversary_id = $2
            ",
        )
        .bind(owner_id)
        .bind(anniversary_id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }
}

/// Convert any error into a connection error
fn connection_error<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::Connection(err.to_string())
}

/// Convert any error into an invalid data error
fn invalid_data<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::InvalidData(err.to_string())
}

/// Postgres has no unsigned integers
fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(invalid_data)
}
