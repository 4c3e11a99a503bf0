//! Notification preferences of a user
//!
//! Timezone as a whole-hour offset from UTC and the local hour from which reminders may be sent.

use core::fmt;

use chrono::DateTime;
use chrono::Duration;
use chrono::NaiveDateTime;
use chrono::Timelike;
use chrono::Utc;

use crate::anniversaries::OwnerId;

/// Lowest UTC offset accepted
pub const MIN_UTC_OFFSET_HOURS: i32 = -12;

/// Highest UTC offset accepted
pub const MAX_UTC_OFFSET_HOURS: i32 = 14;

/// Last local hour reminders can go out, the window always runs until the end of the day
pub const WINDOW_END_HOUR: u32 = 23;

/// Invalid preference input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Offset is not a whole number
    InvalidUtcOffset,

    /// Offset outside -12..=14
    UtcOffsetOutOfRange(i32),

    /// Window start outside 0..=23
    WindowStartOutOfRange,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidUtcOffset => {
                write!(f, "UTC offset must be a whole number, like +3 or -1")
            }
            Error::UtcOffsetOutOfRange(offset) => write!(
                f,
                "UTC offset {offset} is out of range {MIN_UTC_OFFSET_HOURS}..+{MAX_UTC_OFFSET_HOURS}"
            ),
            Error::WindowStartOutOfRange => {
                write!(f, "Window start must be an hour from 0 to {WINDOW_END_HOUR}")
            }
        }
    }
}

/// Preferences of a single user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Preferences {
    /// Whole hours from UTC, -12..=14
    pub utc_offset_hours: i32,

    /// First local hour reminders may be sent, 0..=23
    pub window_start_hour: u32,
}

impl Preferences {
    /// Create validated preferences
    pub fn new(utc_offset_hours: i32, window_start_hour: u32) -> Result<Self, Error> {
        if !(MIN_UTC_OFFSET_HOURS..=MAX_UTC_OFFSET_HOURS).contains(&utc_offset_hours) {
            return Err(Error::UtcOffsetOutOfRange(utc_offset_hours));
        }

        if window_start_hour > WINDOW_END_HOUR {
            return Err(Error::WindowStartOutOfRange);
        }

        Ok(Self {
            utc_offset_hours,
            window_start_hour,
        })
    }

    /// Wall-clock time of the user at a given instant
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() + Duration::hours(i64::from(self.utc_offset_hours))
    }

    /// May reminders be sent at this local time?
    pub fn is_within_window(&self, local_time: NaiveDateTime) -> bool {
        (self.window_start_hour..=WINDOW_END_HOUR).contains(&local_time.hour())
    }

    /// Offset formatted like `UTC+3`
    pub fn display_utc_offset(&self) -> String {
        if self.utc_offset_hours >= 0 {
            format!("UTC+{}", self.utc_offset_hours)
        } else {
            format!("UTC{}", self.utc_offset_hours)
        }
    }
}

/// Preferences as stored for a user
#[derive(Clone, Debug)]
pub struct StoredPreferences {
    /// The user
    pub owner_id: OwnerId,

    /// The actual preferences
    pub preferences: Preferences,

    /// Creation date
    pub created_at: NaiveDateTime,

    /// Last updated at
    pub updated_at: NaiveDateTime,
}

/// Parse an UTC offset as typed by a user
///
/// Accepts `3`, `+3`, `-1`, `UTC+3`, `gmt-2` and friends.
pub fn parse_utc_offset(input: &str) -> Result<i32, Error> {
    let upper = input.trim().to_uppercase();
    let stripped = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper)
        .trim();

    let offset = stripped
        .parse::<i32>()
        .map_err(|_| Error::InvalidUtcOffset)?;

    if !(MIN_UTC_OFFSET_HOURS..=MAX_UTC_OFFSET_HOURS).contains(&offset) {
        return Err(Error::UtcOffsetOutOfRange(offset));
    }

    Ok(offset)
}

/// Parse the window start hour as typed by a user
pub fn parse_window_start_hour(input: &str) -> Result<u32, Error> {
    let hour = input
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::WindowStartOutOfRange)?;

    if hour > WINDOW_END_HOUR {
        return Err(Error::WindowStartOutOfRange);
    }

    Ok(hour)
}
