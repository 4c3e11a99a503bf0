//! Notification ledger
//!
//! Remembers which message(s) currently show the reminder for an anniversary, so a resend can
//! replace them and an acknowledgement can clean them up. There is at most one entry per
//! (owner, anniversary).

use chrono::NaiveDate;

use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::messaging::MessageRef;
use crate::storage::Result;
use crate::storage::Storage;
use crate::storage::UpsertLedgerEntryValues;

/// Live reminder message(s) of an anniversary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    /// The user
    pub owner_id: OwnerId,

    /// The anniversary reminded about
    pub anniversary_id: AnniversaryId,

    /// The main message, with the action buttons
    pub message_ref: MessageRef,

    /// Message sent alongside the main one, like the text before a contact card
    pub extra_message_ref: Option<MessageRef>,

    /// Date the reminder went out, in UTC
    pub sent_on: NaiveDate,
}

impl LedgerEntry {
    /// All tracked messages, main one first
    pub fn message_refs(&self) -> impl Iterator<Item = MessageRef> + '_ {
        std::iter::once(self.message_ref).chain(self.extra_message_ref)
    }
}

/// Ledger operations on top of the storage
#[derive(Clone)]
pub struct Ledger<S: Storage> {
    /// Storage holding the entries
    storage: S,
}

impl<S: Storage> Ledger<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Current entry for an anniversary
    pub async fn get(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<LedgerEntry>> {
        self.storage
            .find_ledger_entry(owner_id, anniversary_id)
            .await
    }

    /// Record the message(s) of a fresh reminder, replacing any earlier entry
    pub async fn upsert(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
        message_ref: MessageRef,
        sent_on: NaiveDate,
        extra_message_ref: Option<MessageRef>,
    ) -> Result<LedgerEntry> {
        let values = UpsertLedgerEntryValues {
            owner_id,
            anniversary_id,
            message_ref,
            extra_message_ref,
            sent_on,
        };

        self.storage.upsert_ledger_entry(&values).await
    }

    /// Forget the entry of an anniversary, if any
    pub async fn delete(&self, owner_id: OwnerId, anniversary_id: AnniversaryId) -> Result<()> {
        self.storage
            .delete_ledger_entry(owner_id, anniversary_id)
            .await
    }

    /// Remove and return the entry of an anniversary
    pub async fn take(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<Option<LedgerEntry>> {
        let entry = self.get(owner_id, anniversary_id).await?;

        if entry.is_some() {
            self.delete(owner_id, anniversary_id).await?;
        }

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Memory;

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_keeps_latest() {
        let ledger = Ledger::new(Memory::new());

        ledger.upsert(1, 10, 100, day(20), None).await.unwrap();
        ledger.upsert(1, 10, 200, day(20), Some(199)).await.unwrap();

        let entry = ledger.get(1, 10).await.unwrap().unwrap();
        assert_eq!(200, entry.message_ref);
        assert_eq!(Some(199), entry.extra_message_ref);
        assert_eq!(vec![200, 199], entry.message_refs().collect::<Vec<_>>());

        // delete removes the single row, nothing left behind
        ledger.delete(1, 10).await.unwrap();
        assert_eq!(None, ledger.get(1, 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_are_per_owner_and_anniversary() {
        let ledger = Ledger::new(Memory::new());

        ledger.upsert(1, 10, 100, day(20), None).await.unwrap();
        ledger.upsert(2, 10, 101, day(20), None).await.unwrap();
        ledger.upsert(1, 11, 102, day(21), None).await.unwrap();

        assert_eq!(100, ledger.get(1, 10).await.unwrap().unwrap().message_ref);
        assert_eq!(101, ledger.get(2, 10).await.unwrap().unwrap().message_ref);
        assert_eq!(day(21), ledger.get(1, 11).await.unwrap().unwrap().sent_on);
    }

    #[tokio::test]
    async fn test_take() {
        let ledger = Ledger::new(Memory::new());

        assert_eq!(None, ledger.take(1, 10).await.unwrap());

        ledger.upsert(1, 10, 100, day(20), None).await.unwrap();

        let entry = ledger.take(1, 10).await.unwrap().unwrap();
        assert_eq!(100, entry.message_ref);
        assert_eq!(None, ledger.get(1, 10).await.unwrap());

        // deleting twice is fine
        ledger.delete(1, 10).await.unwrap();
    }
}
