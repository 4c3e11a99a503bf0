//! Anniversaries
//!
//! A recurring date owned by a user, plus the optional contact details used to shape the
//! reminder.

use chrono::NaiveDateTime;

use crate::dates::PartialDate;

/// The user owning anniversaries, also the chat the reminders go to
pub type OwnerId = i64;

/// Identifier of a single anniversary
pub type AnniversaryId = i64;

/// Longest given/family name a contact card accepts
pub const CONTACT_NAME_MAX_CHARS: usize = 64;

/// Anniversary of someone
#[derive(Clone, Debug)]
pub struct Anniversary {
    /// Anniversary ID
    pub id: AnniversaryId,

    /// The user it belongs to
    pub owner_id: OwnerId,

    /// The recurring date
    pub date: PartialDate,

    /// Who it is about
    pub display_name: String,

    /// Phone number of the person
    pub contact_phone: Option<String>,

    /// Messenger handle (username) of the person
    pub contact_handle: Option<String>,

    /// Messenger account ID of the person
    pub contact_platform_id: Option<i64>,

    /// A reminder went out today and was not snoozed
    pub notified_today: bool,

    /// Creation date
    pub created_at: NaiveDateTime,

    /// Last updated at
    pub updated_at: NaiveDateTime,
}

impl Anniversary {
    /// Handle without a leading `@`, when there is a non-empty one
    pub fn handle(&self) -> Option<&str> {
        self.contact_handle
            .as_deref()
            .map(|handle| handle.trim().trim_start_matches('@'))
            .filter(|handle| !handle.is_empty())
    }

    /// Phone number, when there is a non-empty one
    pub fn phone(&self) -> Option<&str> {
        self.contact_phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
    }

    /// Link to the messenger profile of the person
    ///
    /// The handle wins over the account ID.
    pub fn profile_reference(&self) -> Option<String> {
        if let Some(handle) = self.handle() {
            return Some(format!("https://t.me/{handle}"));
        }

        self.contact_platform_id
            .map(|platform_id| format!("tg://user?id={platform_id}"))
    }

    /// Split the display name for a contact card
    ///
    /// The first word is the given name, anything after the first space the family name. Both
    /// are truncated to [`CONTACT_NAME_MAX_CHARS`] characters.
    pub fn contact_names(&self) -> (String, Option<String>) {
        let mut parts = self.display_name.trim().splitn(2, ' ');

        let given_name = parts.next().map(truncate_name).unwrap_or_default();
        let family_name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(truncate_name);

        (given_name, family_name)
    }
}

fn truncate_name(name: &str) -> String {
    name.chars().take(CONTACT_NAME_MAX_CHARS).collect()
}
