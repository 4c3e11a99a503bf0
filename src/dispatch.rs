//! Dispatch engine
//!
//! One tick walks every owner, finds the anniversaries recurring on the owner's local date and
//! delivers one reminder per anniversary per day. The ledger remembers the delivered messages so
//! a resend replaces them and an acknowledgement or deferral cleans them up.

use core::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::anniversaries::Anniversary;
use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;
use crate::dates::recurring_month_days;
use crate::ledger::Ledger;
use crate::ledger::LedgerEntry;
use crate::messaging;
use crate::messaging::Action;
use crate::messaging::ContactCard;
use crate::messaging::MessageRef;
use crate::messaging::Messenger;
use crate::storage;
use crate::storage::Storage;

/// Confirmation after an acknowledgement
pub const ACKNOWLEDGED_TEXT: &str = "Great! I won't remind you about it again today.";

/// Text left behind on a reminder that could not be deleted
pub const STALE_REMINDER_TEXT: &str = "This reminder is no longer active.";

/// Default number of owners processed at the same time
pub const DEFAULT_MAX_CONCURRENT_OWNERS: usize = 8;

/// Dispatch errors
#[derive(Debug)]
pub enum Error {
    /// The storage failed, stops processing of the current owner
    Storage(storage::Error),

    /// A message could not be delivered, the reminder is skipped this tick
    Delivery(messaging::Error),

    /// Another tick is still running
    TickInProgress,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Storage(err) => write!(f, "Storage error: {err}"),
            Error::Delivery(err) => write!(f, "Delivery error: {err}"),
            Error::TickInProgress => write!(f, "A tick is already in progress"),
        }
    }
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        Error::Storage(err)
    }
}

impl From<messaging::Error> for Error {
    fn from(err: messaging::Error) -> Self {
        Error::Delivery(err)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Outcome of a single tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    /// Anniversaries of all owners recurring on the UTC date, informational
    pub matched_today: u64,

    /// Owners with at least one anniversary
    pub owners: usize,

    /// Reminders delivered
    pub sent: usize,

    /// Due anniversaries that were already notified today
    pub already_notified: usize,

    /// Due reminders held back by the delivery window
    pub too_early: usize,

    /// Reminders that could not be delivered
    pub failed: usize,

    /// Owners whose processing stopped on a storage error
    pub owners_failed: usize,
}

impl TickSummary {
    fn add(&mut self, outcome: OwnerOutcome) {
        self.sent += outcome.sent;
        self.already_notified += outcome.already_notified;
        self.too_early += outcome.too_early;
        self.failed += outcome.failed;
    }
}

/// Outcome of one owner within a tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct OwnerOutcome {
    sent: usize,
    already_notified: usize,
    too_early: usize,
    failed: usize,
}

/// The dispatch engine
///
/// Constructed once and shared (cheaply cloned) with the scheduler and the API.
#[derive(Clone)]
pub struct Dispatcher<S: Storage, M: Messenger> {
    storage: S,
    messenger: M,
    ledger: Ledger<S>,

    /// Held for the duration of a tick, two ticks never interleave
    tick_guard: Arc<Mutex<()>>,

    max_concurrent_owners: usize,
}

impl<S: Storage, M: Messenger> Dispatcher<S, M> {
    pub fn new(storage: S, messenger: M) -> Self {
        Self {
            ledger: Ledger::new(storage.clone()),
            storage,
            messenger,
            tick_guard: Arc::new(Mutex::new(())),
            max_concurrent_owners: DEFAULT_MAX_CONCURRENT_OWNERS,
        }
    }

    /// Limit the number of owners processed at the same time, at least one
    pub fn with_max_concurrent_owners(mut self, max_concurrent_owners: usize) -> Self {
        self.max_concurrent_owners = max_concurrent_owners.max(1);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Run a tick now
    pub async fn tick(&self) -> Result<TickSummary> {
        self.tick_at(Utc::now()).await
    }

    /// Run a tick as if it is `now`
    ///
    /// Fails with [`Error::TickInProgress`] when another tick is running, and with
    /// [`Error::Storage`] when the owners cannot be listed. Failures of a single owner or
    /// reminder only show up in the summary.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            return Err(Error::TickInProgress);
        };

        let matched_today = self.count_matching(now.date_naive()).await;
        let owners = self.storage.find_all_owners().await?;

        let mut summary = TickSummary {
            matched_today,
            owners: owners.len(),
            ..TickSummary::default()
        };

        tracing::debug!(
            matched_today,
            owners = owners.len(),
            "Starting tick at {now}"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_owners));
        let mut tasks = JoinSet::new();

        for owner_id in owners {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let dispatcher = self.clone();

            tasks.spawn(async move {
                let result = dispatcher.process_owner(owner_id, now).await;
                drop(permit);

                (owner_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => summary.add(outcome),
                Ok((owner_id, Err(err))) => {
                    tracing::error!(owner_id, "Could not process owner: {err}");
                    summary.owners_failed += 1;
                }
                Err(err) => {
                    tracing::error!("Owner task failed: {err}");
                    summary.owners_failed += 1;
                }
            }
        }

        tracing::info!(
            matched_today = summary.matched_today,
            owners = summary.owners,
            sent = summary.sent,
            already_notified = summary.already_notified,
            too_early = summary.too_early,
            failed = summary.failed,
            owners_failed = summary.owners_failed,
            "Tick finished"
        );

        Ok(summary)
    }

    /// Global count of anniversaries recurring on a date, zero when unavailable
    async fn count_matching(&self, today: NaiveDate) -> u64 {
        let mut count = 0;

        for (month, day) in recurring_month_days(today) {
            match self
                .storage
                .count_anniversaries_by_month_day(month, day)
                .await
            {
                Ok(matching) => count += matching,
                Err(err) => tracing::warn!("Could not count today's anniversaries: {err}"),
            }
        }

        count
    }

    /// Deliver the due reminders of one owner
    async fn process_owner(&self, owner_id: OwnerId, now: DateTime<Utc>) -> Result<OwnerOutcome> {
        let preferences = self
            .storage
            .find_preferences(owner_id)
            .await?
            .map(|stored| stored.preferences)
            .unwrap_or_default();

        let local_now = preferences.local_time(now);
        let local_today = local_now.date();

        let mut anniversaries = Vec::new();
        for (month, day) in recurring_month_days(local_today) {
            anniversaries.extend(
                self.storage
                    .find_anniversaries_by_month_day(owner_id, month, day)
                    .await?,
            );
        }

        let (notified, due): (Vec<_>, Vec<_>) = anniversaries
            .into_iter()
            .partition(|anniversary| anniversary.notified_today);

        let mut outcome = OwnerOutcome {
            already_notified: notified.len(),
            ..OwnerOutcome::default()
        };

        if due.is_empty() {
            return Ok(outcome);
        }

        if !preferences.is_within_window(local_now) {
            tracing::info!(
                owner_id,
                due = due.len(),
                window_start_hour = preferences.window_start_hour,
                "Too early, local time is {local_now}"
            );
            outcome.too_early = due.len();

            return Ok(outcome);
        }

        for anniversary in &due {
            match self.deliver(anniversary, now.date_naive(), local_today).await {
                Ok(_) => outcome.sent += 1,
                Err(Error::Delivery(err)) => {
                    tracing::warn!(
                        owner_id,
                        anniversary_id = anniversary.id,
                        "Could not deliver reminder: {err}"
                    );
                    outcome.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(outcome)
    }

    /// Send the reminder of an anniversary, replacing the previous one
    ///
    /// `sent_on` is recorded in the ledger, `local_today` is used for the age.
    pub async fn deliver(
        &self,
        anniversary: &Anniversary,
        sent_on: NaiveDate,
        local_today: NaiveDate,
    ) -> Result<LedgerEntry> {
        let owner_id = anniversary.owner_id;

        if let Some(previous) = self.ledger.take(owner_id, anniversary.id).await? {
            self.remove_messages(&previous).await;
        }

        let text = reminder_text(anniversary, local_today);
        let (message_ref, extra_message_ref) = if anniversary.handle().is_some() {
            let actions = Action::for_reminder(anniversary.id, false);
            let message_ref = self.messenger.send_text(owner_id, &text, &actions).await?;

            (message_ref, None)
        } else if let Some(phone) = anniversary.phone() {
            let actions = Action::for_reminder(anniversary.id, false);
            let text_ref = self.messenger.send_text(owner_id, &text, &actions).await?;

            let (given_name, family_name) = anniversary.contact_names();
            let card = ContactCard {
                phone,
                given_name: &given_name,
                family_name: family_name.as_deref(),
            };

            match self
                .messenger
                .send_contact_card(owner_id, &card, &actions)
                .await
            {
                Ok(card_ref) => (card_ref, Some(text_ref)),
                Err(err) => {
                    self.remove_message(owner_id, text_ref).await;
                    return Err(err.into());
                }
            }
        } else {
            let actions = Action::for_reminder(anniversary.id, true);
            let message_ref = self.messenger.send_text(owner_id, &text, &actions).await?;

            (message_ref, None)
        };

        let entry = self
            .ledger
            .upsert(
                owner_id,
                anniversary.id,
                message_ref,
                sent_on,
                extra_message_ref,
            )
            .await?;

        self.storage
            .set_notified_today(owner_id, anniversary.id, true)
            .await?;

        tracing::debug!(
            owner_id,
            anniversary_id = anniversary.id,
            message_ref,
            "Reminder delivered"
        );

        Ok(entry)
    }

    /// Mark an anniversary as congratulated for today
    ///
    /// Clears the reminder and confirms, safe to repeat.
    pub async fn acknowledge(&self, owner_id: OwnerId, anniversary_id: AnniversaryId) -> Result<()> {
        self.storage
            .set_notified_today(owner_id, anniversary_id, true)
            .await?;

        if let Some(entry) = self.ledger.take(owner_id, anniversary_id).await? {
            self.remove_messages(&entry).await;
        }

        self.messenger
            .send_text(owner_id, ACKNOWLEDGED_TEXT, &[])
            .await?;

        tracing::debug!(owner_id, anniversary_id, "Reminder acknowledged");

        Ok(())
    }

    /// Clear the reminder of an anniversary, a later tick sends it again
    pub async fn defer(&self, owner_id: OwnerId, anniversary_id: AnniversaryId) -> Result<()> {
        let Some(anniversary) = self
            .storage
            .find_single_anniversary_by_id(owner_id, anniversary_id)
            .await?
        else {
            tracing::debug!(owner_id, anniversary_id, "Nothing to defer");
            return Ok(());
        };

        if let Some(entry) = self.ledger.take(owner_id, anniversary.id).await? {
            self.remove_messages(&entry).await;
        }

        self.storage
            .set_notified_today(owner_id, anniversary.id, false)
            .await?;

        tracing::debug!(owner_id, anniversary_id, "Reminder deferred");

        Ok(())
    }

    /// Delete an anniversary together with its live reminder
    ///
    /// Returns `false` when there is no such anniversary.
    pub async fn remove_anniversary(
        &self,
        owner_id: OwnerId,
        anniversary_id: AnniversaryId,
    ) -> Result<bool> {
        let Some(anniversary) = self
            .storage
            .find_single_anniversary_by_id(owner_id, anniversary_id)
            .await?
        else {
            return Ok(false);
        };

        if let Some(entry) = self.ledger.take(owner_id, anniversary.id).await? {
            self.remove_messages(&entry).await;
        }

        self.storage.delete_anniversary(&anniversary).await?;

        Ok(true)
    }

    /// Clear the "notified today" flag everywhere, once a day
    pub async fn reset_daily_flags(&self) -> Result<u64> {
        let reset = self.storage.reset_all_notified_today().await?;

        tracing::info!(reset, "Daily flags reset");

        Ok(reset)
    }

    /// Best effort removal of all messages of a ledger entry
    async fn remove_messages(&self, entry: &LedgerEntry) {
        for message_ref in entry.message_refs() {
            self.remove_message(entry.owner_id, message_ref).await;
        }
    }

    /// Best effort removal of a message, errors are logged and dropped
    ///
    /// A message that cannot be deleted at least loses its buttons.
    async fn remove_message(&self, owner_id: OwnerId, message_ref: MessageRef) {
        let Err(err) = self.messenger.delete_message(owner_id, message_ref).await else {
            return;
        };

        tracing::debug!(owner_id, message_ref, "Could not delete message: {err}");

        if let Err(err) = self
            .messenger
            .edit_text(owner_id, message_ref, STALE_REMINDER_TEXT, &[])
            .await
        {
            tracing::debug!(owner_id, message_ref, "Could not edit message: {err}");
        }
    }
}

/// Greeting of a reminder, with the age and profile when known
pub fn reminder_text(anniversary: &Anniversary, local_today: NaiveDate) -> String {
    let mut lines = vec![format!(
        "Today is {}'s birthday ({})! Don't forget to congratulate them!",
        anniversary.display_name,
        anniversary.date.display_short()
    )];

    if let Some(age) = anniversary.date.age_in_years(local_today) {
        lines.push(format!("{} turns {age} today 🎉", anniversary.display_name));
    }

    if let Some(profile) = anniversary.profile_reference() {
        lines.push(format!("Profile: {profile}"));
    }

    lines.join("\n")
}
