//! Recurrence engine
//!
//! Pure calendar arithmetic over partial dates: a month and a day that recur every year, with an
//! optional year used to announce ages.

use core::fmt;
use std::str::FromStr;

use chrono::Datelike;
use chrono::NaiveDate;

/// The year stored when no year is known
pub const YEAR_SENTINEL: i32 = 0;

/// Year used to validate day/month combinations without a year, it has a Feb 29
const PERMISSIVE_YEAR: i32 = 2000;

/// Lowest accepted year
const MIN_YEAR: i32 = 1900;

/// Highest accepted year
const MAX_YEAR: i32 = 2100;

/// Errors while parsing user input into a [`PartialDate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not `DD.MM` or `DD.MM.YYYY`
    InvalidFormat,

    /// A field is not a number
    NotANumber(&'static str),

    /// Day outside 1..=31 or month outside 1..=12
    InvalidDayOrMonth,

    /// Year outside 1900..=2100
    InvalidYear(i32),

    /// The day does not exist in that month (or in that specific year)
    NonexistentDate,
}

impl std::error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::InvalidFormat => write!(f, "Invalid date format, use DD.MM or DD.MM.YYYY"),
            ParseError::NotANumber(field) => write!(f, "The {field} must be a number"),
            ParseError::InvalidDayOrMonth => write!(
                f,
                "Invalid day or month, the day must be 1-31 and the month 1-12"
            ),
            ParseError::InvalidYear(year) => {
                write!(f, "Year {year} is out of range {MIN_YEAR}-{MAX_YEAR}")
            }
            ParseError::NonexistentDate => write!(f, "This date does not exist"),
        }
    }
}

/// A recurring date: month and day, optionally anchored to a year
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartialDate {
    /// Year, `None` when the age is unknown
    year: Option<i32>,

    /// Month, 1-12
    month: u32,

    /// Day of the month, 1-31
    day: u32,
}

impl PartialDate {
    /// Create a partial date from its stored parts
    ///
    /// A year of [`YEAR_SENTINEL`] means the year is unknown
    pub fn from_parts(year: i32, month: u32, day: u32) -> Result<Self, ParseError> {
        if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
            return Err(ParseError::InvalidDayOrMonth);
        }

        let year = if year == YEAR_SENTINEL {
            None
        } else {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(ParseError::InvalidYear(year));
            }

            Some(year)
        };

        if NaiveDate::from_ymd_opt(year.unwrap_or(PERMISSIVE_YEAR), month, day).is_none() {
            return Err(ParseError::NonexistentDate);
        }

        Ok(Self { year, month, day })
    }

    /// Year, if known
    pub fn year(&self) -> Option<i32> {
        self.year
    }

    /// Year as stored, [`YEAR_SENTINEL`] when unknown
    pub fn stored_year(&self) -> i32 {
        self.year.unwrap_or(YEAR_SENTINEL)
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// Does this date recur on the given month and day?
    pub fn matches(&self, month: u32, day: u32) -> bool {
        self.month == month && self.day == day
    }

    /// Normalized `YYYY-MM-DD` form, `0000` as year when unknown
    pub fn normalized(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}",
            self.stored_year(),
            self.month,
            self.day
        )
    }

    /// Short display: `DD.MM`, or `DD.MM.YYYY` when the year is known
    pub fn display_short(&self) -> String {
        match self.year {
            Some(year) => format!("{:02}.{:02}.{year:04}", self.day, self.month),
            None => format!("{:02}.{:02}", self.day, self.month),
        }
    }

    /// Days until the next occurrence on or after `today`
    ///
    /// Feb 29 occurs on Feb 28 in non-leap years.
    pub fn days_until_next(&self, today: NaiveDate) -> u32 {
        let mut candidate = self.occurrence_in(today.year());

        if candidate < today {
            candidate = self.occurrence_in(today.year() + 1);
        }

        u32::try_from((candidate - today).num_days()).unwrap_or_default()
    }

    /// Full years elapsed since the date, as of `today`
    ///
    /// `None` without a year, or when the year lies in the future. Feb 29 counts as passed on
    /// Feb 28 in non-leap years.
    pub fn age_in_years(&self, today: NaiveDate) -> Option<u32> {
        let year = self.year?;

        let before_anniversary = today < self.occurrence_in(today.year());
        let age = today.year() - year - i32::from(before_anniversary);

        u32::try_from(age).ok()
    }

    /// The occurrence of this month/day in a given year
    fn occurrence_in(&self, year: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .or_else(|| NaiveDate::from_ymd_opt(year, self.month, 28))
            .unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.display_short())
    }
}

impl FromStr for PartialDate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_partial_date(s)
    }
}

/// Parse user input `DD.MM` or `DD.MM.YYYY`
///
/// Spaces are ignored, so `20. 05` is accepted. Without a year the date is validated against a
/// leap year, so `29.02` is valid.
pub fn parse_partial_date(input: &str) -> Result<PartialDate, ParseError> {
    let cleaned = input.trim().replace(' ', "");
    let parts = cleaned.split('.').collect::<Vec<&str>>();

    if !(2..=3).contains(&parts.len()) {
        return Err(ParseError::InvalidFormat);
    }

    let day = parse_field(parts[0], "day")?;
    let month = parse_field(parts[1], "month")?;

    let year = match parts.get(2) {
        Some(year) if !year.is_empty() => {
            let year = year
                .parse::<i32>()
                .map_err(|_| ParseError::NotANumber("year"))?;

            // 0 is reserved for "unknown"
            if year == YEAR_SENTINEL {
                return Err(ParseError::InvalidYear(year));
            }

            year
        }
        _ => YEAR_SENTINEL,
    };

    PartialDate::from_parts(year, month, day)
}

/// The (month, day) pairs recurring on a given date
///
/// On Feb 28 of a non-leap year this includes Feb 29, in line with
/// [`PartialDate::days_until_next`].
pub fn recurring_month_days(today: NaiveDate) -> Vec<(u32, u32)> {
    let mut month_days = vec![(today.month(), today.day())];

    if today.month() == 2 && today.day() == 28 && !today.leap_year() {
        month_days.push((2, 29));
    }

    month_days
}

fn parse_field(value: &str, field: &'static str) -> Result<u32, ParseError> {
    if value.is_empty() {
        return Err(ParseError::InvalidFormat);
    }

    value.parse::<u32>().map_err(|_| ParseError::NotANumber(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_parse_without_year() {
        let parsed = parse_partial_date("20.05").unwrap();

        assert_eq!(None, parsed.year());
        assert_eq!("0000-05-20", parsed.normalized());
        assert_eq!("20.05", parsed.display_short());
    }

    #[test]
    fn test_parse_with_year() {
        let parsed = parse_partial_date(" 01.12.1990 ").unwrap();

        assert_eq!(Some(1990), parsed.year());
        assert_eq!("1990-12-01", parsed.normalized());
        assert_eq!("01.12.1990", parsed.display_short());
    }

    #[test]
    fn test_parse_short_display_round_trip() {
        for month in 1..=12 {
            for day in 1..=31 {
                let input = format!("{day:02}.{month:02}");

                if let Ok(parsed) = parse_partial_date(&input) {
                    assert_eq!(input, parsed.display_short());
                }
            }
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Err(ParseError::InvalidFormat), parse_partial_date("20"));
        assert_eq!(Err(ParseError::InvalidFormat), parse_partial_date("1.2.3.4"));
        assert_eq!(Err(ParseError::InvalidFormat), parse_partial_date(".05"));
        assert_eq!(
            Err(ParseError::NotANumber("month")),
            parse_partial_date("20.may")
        );
        assert_eq!(
            Err(ParseError::InvalidDayOrMonth),
            parse_partial_date("32.01")
        );
        assert_eq!(
            Err(ParseError::InvalidDayOrMonth),
            parse_partial_date("10.13")
        );
        assert_eq!(
            Err(ParseError::InvalidYear(1899)),
            parse_partial_date("10.10.1899")
        );
        assert_eq!(
            Err(ParseError::NonexistentDate),
            parse_partial_date("31.04")
        );
        assert_eq!(
            Err(ParseError::NonexistentDate),
            parse_partial_date("29.02.2001")
        );
    }

    #[test]
    fn test_parse_feb_29() {
        assert!(parse_partial_date("29.02").is_ok());
        assert!(parse_partial_date("29.02.2000").is_ok());
    }

    #[test]
    fn test_error_messages_name_the_field() {
        assert_eq!(
            "The year must be a number",
            ParseError::NotANumber("year").to_string()
        );
        assert!(ParseError::InvalidYear(3000).to_string().contains("3000"));
    }

    #[test]
    fn test_days_until_next() {
        let birthday = parse_partial_date("20.05").unwrap();

        assert_eq!(0, birthday.days_until_next(date(2025, 5, 20)));
        assert_eq!(1, birthday.days_until_next(date(2025, 5, 19)));
        assert_eq!(364, birthday.days_until_next(date(2025, 5, 21)));
        // next year is a leap year
        assert_eq!(365, birthday.days_until_next(date(2023, 5, 21)));
    }

    #[test]
    fn test_days_until_next_bounds() {
        let birthdays = ["01.01", "29.02", "31.12", "28.02", "01.03"]
            .map(|input| parse_partial_date(input).unwrap());

        let mut today = date(2023, 1, 1);
        while today < date(2025, 1, 1) {
            for birthday in &birthdays {
                assert!(birthday.days_until_next(today) < 366);
            }

            today = today.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_days_until_next_feb_29() {
        let leap_day = parse_partial_date("29.02").unwrap();

        // falls on Feb 28 in a non-leap year, never Mar 1
        assert_eq!(0, leap_day.days_until_next(date(2025, 2, 28)));
        assert_eq!(27, leap_day.days_until_next(date(2025, 2, 1)));

        // passed this year, next year is a leap year
        assert_eq!(365, leap_day.days_until_next(date(2023, 3, 1)));

        // passed this year, next year is not a leap year
        assert_eq!(364, leap_day.days_until_next(date(2024, 3, 1)));

        // leap year itself
        assert_eq!(0, leap_day.days_until_next(date(2024, 2, 29)));
    }

    #[test]
    fn test_age_in_years() {
        let birthday = parse_partial_date("20.05.1990").unwrap();

        assert_eq!(Some(35), birthday.age_in_years(date(2025, 5, 20)));
        assert_eq!(Some(34), birthday.age_in_years(date(2025, 5, 19)));
        assert_eq!(Some(0), birthday.age_in_years(date(1990, 5, 20)));
        assert_eq!(None, birthday.age_in_years(date(1989, 5, 20)));
    }

    #[test]
    fn test_age_in_years_feb_29() {
        let birthday = parse_partial_date("29.02.2000").unwrap();

        assert_eq!(Some(25), birthday.age_in_years(date(2025, 2, 28)));
        assert_eq!(Some(24), birthday.age_in_years(date(2025, 2, 27)));
        assert_eq!(Some(23), birthday.age_in_years(date(2024, 2, 28)));
        assert_eq!(Some(24), birthday.age_in_years(date(2024, 2, 29)));
    }

    #[test]
    fn test_age_without_year() {
        let birthday = parse_partial_date("20.05").unwrap();

        assert_eq!(None, birthday.age_in_years(date(2025, 5, 20)));
    }

    #[test]
    fn test_recurring_month_days() {
        assert_eq!(vec![(5, 20)], recurring_month_days(date(2025, 5, 20)));
        assert_eq!(vec![(2, 28), (2, 29)], recurring_month_days(date(2025, 2, 28)));
        assert_eq!(vec![(2, 28)], recurring_month_days(date(2024, 2, 28)));
        assert_eq!(vec![(2, 29)], recurring_month_days(date(2024, 2, 29)));
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(
            parse_partial_date("20.05").unwrap(),
            PartialDate::from_parts(0, 5, 20).unwrap()
        );
        assert_eq!(
            Err(ParseError::NonexistentDate),
            PartialDate::from_parts(0, 2, 30)
        );
    }
}
