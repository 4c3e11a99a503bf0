//! Messaging towards users
//!
//! The [`Messenger`] trait is everything the dispatcher needs from a chat platform.

use core::fmt;

use async_trait::async_trait;

use crate::anniversaries::AnniversaryId;
use crate::anniversaries::OwnerId;

pub use telegram::DEFAULT_API_URL as DEFAULT_TELEGRAM_API_URL;
pub use telegram::Telegram;

mod telegram;

/// Identifier of a delivered message
pub type MessageRef = i64;

/// Messaging errors
#[derive(Debug)]
pub enum Error {
    /// The platform could not be reached
    Transport(String),

    /// The platform refused the request
    Rejected(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transport(error) => write!(f, "Transport error: {error}"),
            Error::Rejected(error) => write!(f, "Rejected: {error}"),
        }
    }
}

/// Result type for all messaging interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Button attached to a reminder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Already congratulated, stop for today
    Acknowledge(AnniversaryId),

    /// Remind again on a later tick
    Defer(AnniversaryId),

    /// Start linking a contact to the anniversary
    LinkContact(AnniversaryId),
}

impl Action {
    /// Prefix of the acknowledge callback data
    const ACKNOWLEDGE: &'static str = "remind_done";

    /// Prefix of the defer callback data
    const DEFER: &'static str = "remind_snooze";

    /// Prefix of the link contact callback data
    const LINK_CONTACT: &'static str = "link";

    /// Button label
    pub fn label(&self) -> &'static str {
        match self {
            Action::Acknowledge(_) => "Already congratulated",
            Action::Defer(_) => "Snooze",
            Action::LinkContact(_) => "Link contact",
        }
    }

    /// Data sent back when the button is pressed
    pub fn callback_data(&self) -> String {
        match self {
            Action::Acknowledge(id) => format!("{}:{id}", Self::ACKNOWLEDGE),
            Action::Defer(id) => format!("{}:{id}", Self::DEFER),
            Action::LinkContact(id) => format!("{}:{id}", Self::LINK_CONTACT),
        }
    }

    /// Parse callback data back into an action
    pub fn from_callback_data(data: &str) -> Option<Self> {
        let (kind, id) = data.split_once(':')?;
        let id = id.parse::<AnniversaryId>().ok()?;

        match kind {
            Self::ACKNOWLEDGE => Some(Action::Acknowledge(id)),
            Self::DEFER => Some(Action::Defer(id)),
            Self::LINK_CONTACT => Some(Action::LinkContact(id)),
            _ => None,
        }
    }

    /// Actions of a reminder, link contact only when nothing is linked yet
    pub fn for_reminder(anniversary_id: AnniversaryId, with_link: bool) -> Vec<Self> {
        let mut actions = vec![
            Action::Acknowledge(anniversary_id),
            Action::Defer(anniversary_id),
        ];

        if with_link {
            actions.push(Action::LinkContact(anniversary_id));
        }

        actions
    }
}

/// Contact card of a person
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCard<'a> {
    /// Phone number
    pub phone: &'a str,

    /// Given name
    pub given_name: &'a str,

    /// Family name
    pub family_name: Option<&'a str>,
}

/// A chat platform able to reach users
///
/// Deleting a message that is already gone, and editing a message into the text it already
/// has, are both successes.
#[async_trait]
pub trait Messenger: Clone + Send + Sync + 'static {
    /// Send a text message
    async fn send_text(
        &self,
        owner_id: OwnerId,
        text: &str,
        actions: &[Action],
    ) -> Result<MessageRef>;

    /// Send a contact card
    async fn send_contact_card(
        &self,
        owner_id: OwnerId,
        card: &ContactCard<'_>,
        actions: &[Action],
    ) -> Result<MessageRef>;

    /// Delete a message
    async fn delete_message(&self, owner_id: OwnerId, message_ref: MessageRef) -> Result<()>;

    /// Replace the text (and buttons) of a message
    async fn edit_text(
        &self,
        owner_id: OwnerId,
        message_ref: MessageRef,
        text: &str,
        actions: &[Action],
    ) -> Result<()>;
}
