//! All things related to the storage of anniversaries, preferences and the notification ledger

use core::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::anniversaries::Anniversary;
use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::dates::PartialDate;
use crate::ledger::LedgerEntry;
use crate::messaging::MessageRef;
use crate::preferences::Preferences;
use crate::preferences::StoredPreferences;

pub use memory::Memory;
pub use postgres::Postgres;

mod memory;
mod postgres;

/// Storage errors
#[derive(Debug)]
pub enum Error {
    /// A connection error with the storage
    Connection(String),

    /// Stored data that does not make sense
    InvalidData(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Connection(error) => write!(f, "Connection error: {error}"),
            Error::InvalidData(error) => write!(f, "Invalid data: {error}"),
        }
    }
}

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create an Anniversary
pub struct CreateAnniversaryValues<'a> {
    /// The user owning it
    pub owner_id: OwnerId,

    /// The recurring date
    pub date: &'a PartialDate,

    /// Who it is about
    pub display_name: &'a str,

    /// Optional phone number
    pub contact_phone: Option<&'a str>,

    /// Optional messenger handle
    pub contact_handle: Option<&'a str>,

    /// Optional messenger account ID
    pub contact_platform_id: Option<i64>,
}

/// Values to update an Anniversary
///
/// `None` leaves a field alone, `Some(None)` clears an optional field
#[derive(Default)]
pub struct UpdateAnniversaryValues<'a> {
    /// New date
    pub date: Option<&'a PartialDate>,

    /// New name
    pub display_name: Option<&'a str>,

    /// New phone number
    pub contact_phone: Option<Option<&'a str>>,

    /// New messenger handle
    pub contact_handle: Option<Option<&'a str>>,

    /// New messenger account ID
    pub contact_platform_id: Option<Option<i64>>,
}

/// Values to record a sent reminder
pub struct UpsertLedgerEntryValues {
    /// The user
    pub owner_id: OwnerId,

    /// The anniversary
    pub anniversary_id: AnniversaryId,

    /// Main message
    pub message_ref: MessageRef,

    /// Optional second message
    pub extra_message_ref: Option<MessageRef>,

    /// Date the reminder went out
    pub sent_on: NaiveDate,
}

/// Storage with all supported operations
#[async_trait]
pub trait Storage: Clone + Send + Sync + 'static {
    /// Every user with at least one anniversary
    async fn find_all_owners(&self) -> Result<Vec<OwnerId>>;

    /// All anniversaries of a user
    async fn find_all_anniversaries_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Anniversary>>;

    /// Anniversaries of a user recurring on a month/day, notified or not
    async fn find_anniversaries_by_month_day(
        &self,
        owner_id: OwnerId,
        month: u32,
        day: u32,
    ) -> Result<Vec<Anniversary>>;

    /// Count anniversaries of all users recurring on a month/day
    async fn count_anniversaries_by_month_day(&self, month: u32, day: u32) -> Result<u64>;

    /// Find a single anniversary of a user
    async fn find_single_anniversary_by_id(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<Anniversary>>;

    /// Create an anniversary
    async fn create_anniversary(&self, values: &CreateAnniversaryValues) -> Result<Anniversary>;

    /// Update an anniversary
    async fn update_anniversary(
        &self,
        anniversary: &Anniversary,
        values: &UpdateAnniversaryValues,
    ) -> Result<Anniversary>;

    /// Delete an anniversary, together with its ledger entry
    async fn delete_anniversary(&self, anniversary: &Anniversary) -> Result<()>;

    /// Set or clear the "notified today" flag of an anniversary
    ///
    /// Unknown anniversaries are ignored
    async fn set_notified_today(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
        notified_today: bool,
    ) -> Result<()>;

    /// Clear the "notified today" flag of every anniversary
    ///
    /// Returns the number of cleared flags
    async fn reset_all_notified_today(&self) -> Result<u64>;

    /// Preferences of a user, if ever saved
    async fn find_preferences(&self, owner_id: OwnerId) -> Result<Option<StoredPreferences>>;

    /// Create or replace the preferences of a user
    async fn save_preferences(
        &self,
        owner_id: OwnerId,
        preferences: &Preferences,
    ) -> Result<StoredPreferences>;

    /// Ledger entry of an anniversary
    async fn find_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<LedgerEntry>>;

    /// Insert a ledger entry, or overwrite the existing one for the same anniversary
    ///
    /// Atomic for concurrent writers of the same (owner, anniversary)
    async fn upsert_ledger_entry(&self, values: &UpsertLedgerEntryValues) -> Result<LedgerEntry>;

    /// Delete the ledger entry of an anniversary, missing entries are fine
    async fn delete_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<()>;
}
