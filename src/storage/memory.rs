//! Memory storage
//!
//! Will be destroyed on system shutdown

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::anniversaries::Anniversary;
use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::ledger::LedgerEntry;
use crate::preferences::Preferences;
use crate::preferences::StoredPreferences;

use super::CreateAnniversaryValues;
use super::Result;
use super::Storage;
use super::UpdateAnniversaryValues;
use super::UpsertLedgerEntryValues;

/// Key of a ledger entry
type LedgerKey = (OwnerId, AnniversaryId);

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug, Default)]
pub struct Memory {
    /// Last handed out anniversary ID
    last_id: Arc<AtomicI64>,

    /// All anniversaries in storage
    anniversaries: Arc<Mutex<HashMap<AnniversaryId, Anniversary>>>,

    /// All preferences in storage
    preferences: Arc<Mutex<HashMap<OwnerId, StoredPreferences>>>,

    /// The notification ledger
    ledger: Arc<Mutex<HashMap<LedgerKey, LedgerEntry>>>,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for Memory {
    async fn find_all_owners(&self) -> Result<Vec<OwnerId>> {
        Ok(self
            .anniversaries
            .lock()
            .await
            .values()
            .map(|anniversary| anniversary.owner_id)
            .collect::<BTreeSet<OwnerId>>()
            .into_iter()
            .collect())
    }

    async fn find_all_anniversaries_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Anniversary>> {
        let mut anniversaries = self
            .anniversaries
            .lock()
            .await
            .values()
            .filter(|anniversary| anniversary.owner_id == owner_id)
            .cloned()
            .collect::<Vec<Anniversary>>();

        anniversaries.sort_by_key(|anniversary| anniversary.id);

        Ok(anniversaries)
    }

    async fn find_anniversaries_by_month_day(
        &self,
        owner_id: OwnerId,
        month: u32,
        day: u32,
    ) -> Result<Vec<Anniversary>> {
        let mut anniversaries = self
            .anniversaries
            .lock()
            .await
            .values()
            .filter(|anniversary| {
                anniversary.owner_id == owner_id && anniversary.date.matches(month, day)
            })
            .cloned()
            .collect::<Vec<Anniversary>>();

        anniversaries.sort_by_key(|anniversary| anniversary.id);

        Ok(anniversaries)
    }

    async fn count_anniversaries_by_month_day(&self, month: u32, day: u32) -> Result<u64> {
        let count = self
            .anniversaries
            .lock()
            .await
            .values()
            .filter(|anniversary| anniversary.date.matches(month, day))
            .count();

        Ok(count as u64)
    }

    async fn find_single_anniversary_by_id(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<Anniversary>> {
        Ok(self
            .anniversaries
            .lock()
            .await
            .get(&anniversary_id)
            .filter(|anniversary| anniversary.owner_id == owner_id)
            .cloned())
    }

    async fn create_anniversary(&self, values: &CreateAnniversaryValues) -> Result<Anniversary> {
        let anniversary = Anniversary {
            id: self.last_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner_id: values.owner_id,
            date: *values.date,
            display_name: values.display_name.to_string(),
            contact_phone: values.contact_phone.map(ToString::to_string),
            contact_handle: values.contact_handle.map(ToString::to_string),
            contact_platform_id: values.contact_platform_id,
            notified_today: false,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };

        self.anniversaries
            .lock()
            .await
            .insert(anniversary.id, anniversary.clone());

        Ok(anniversary)
    }

    async fn update_anniversary(
        &self,
        anniversary: &Anniversary,
        values: &UpdateAnniversaryValues,
    ) -> Result<Anniversary> {
        let mut anniversaries = self.anniversaries.lock().await;

        // updating a deleted anniversary keeps it deleted
        let Some(stored) = anniversaries.get_mut(&anniversary.id) else {
            return Ok(anniversary.clone());
        };

        if let Some(date) = values.date {
            stored.date = *date;
        }

        if let Some(display_name) = values.display_name {
            stored.display_name = display_name.to_string();
        }

        if let Some(contact_phone) = values.contact_phone {
            stored.contact_phone = contact_phone.map(ToString::to_string);
        }

        if let Some(contact_handle) = values.contact_handle {
            stored.contact_handle = contact_handle.map(ToString::to_string);
        }

        if let Some(contact_platform_id) = values.contact_platform_id {
            stored.contact_platform_id = contact_platform_id;
        }

        stored.updated_at = Utc::now().naive_utc();

        Ok(stored.clone())
    }

    async fn delete_anniversary(&self, anniversary: &Anniversary) -> Result<()> {
        self.anniversaries.lock().await.remove(&anniversary.id);

        self.ledger
            .lock()
            .await
            .remove(&(anniversary.owner_id, anniversary.id));

        Ok(())
    }

    async fn set_notified_today(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
        notified_today: bool,
    ) -> Result<()> {
        if let Some(anniversary) = self
            .anniversaries
            .lock()
            .await
            .get_mut(&anniversary_id)
            .filter(|anniversary| anniversary.owner_id == owner_id)
        {
            anniversary.notified_today = notified_today;
        }

        Ok(())
    }

    async fn reset_all_notified_today(&self) -> Result<u64> {
        let mut cleared = 0;

        for anniversary in self.anniversaries.lock().await.values_mut() {
            if anniversary.notified_today {
                anniversary.notified_today = false;
                cleared += 1;
            }
        }

        Ok(cleared)
    }

    async fn find_preferences(&self, owner_id: OwnerId) -> Result<Option<StoredPreferences>> {
        Ok(self.preferences.lock().await.get(&owner_id).cloned())
    }

    async fn save_preferences(
        &self,
        owner_id: OwnerId,
        preferences: &Preferences,
    ) -> Result<StoredPreferences> {
        let now = Utc::now().naive_utc();

        let stored = self
            .preferences
            .lock()
            .await
            .entry(owner_id)
            .and_modify(|stored| {
                stored.preferences = *preferences;
                stored.updated_at = now;
            })
            .or_insert_with(|| StoredPreferences {
                owner_id,
                preferences: *preferences,
                created_at: now,
                updated_at: now,
            })
            .clone();

        Ok(stored)
    }

    async fn find_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self
            .ledger
            .lock()
            .await
            .get(&(owner_id, anniversary_id))
            .cloned())
    }

    async fn upsert_ledger_entry(&self, values: &UpsertLedgerEntryValues) -> Result<LedgerEntry> {
        let entry = LedgerEntry {
            owner_id: values.owner_id,
            anniversary_id: values.anniversary_id,
            message_ref: values.message_ref,
            extra_message_ref: values.extra_message_ref,
            sent_on: values.sent_on,
        };

        self.ledger
            .lock()
            .await
            .insert((values.owner_id, values.anniversary_id), entry.clone());

        Ok(entry)
    }

    async fn delete_ledger_entry(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<()> {
        self.ledger.lock().await.remove(&(owner_id, anniversary_id));

        Ok(())
    }
}
