//! `cobranzas-calendar` — business-day arithmetic for the fixed operating
//! timezone.
//!
//! All collection jobs key their work on a *local* business date in Argentina.
//! This crate answers the three questions the orchestrator keeps asking:
//! is this date a business day, when is the next one, and what local hour is
//! it right now (for export cutoffs). The holiday set is configuration-fed
//! and deliberately lenient: a malformed holiday entry is dropped, never a
//! reason to stop collecting.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

/// Timezone all collection schedules are evaluated in.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Argentina::Buenos_Aires;

/// Upper bound on forward day-by-day scans.
///
/// Defends against a holiday set that (through misconfiguration) marks every
/// day of the year: the scan fails instead of spinning.
const MAX_SCAN_DAYS: u32 = 370;

/// Calendar resolution error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// No business day was found within the scan bound.
    #[error("no business day found within {0} days (holiday set exhausts the calendar?)")]
    Unresolvable(u32),

    /// A local midnight could not be represented in the timezone.
    #[error("local midnight does not exist for {0}")]
    InvalidLocalTime(NaiveDate),
}

/// Business-day calendar for one fixed timezone with a pluggable holiday set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    tz: Tz,
    holidays: BTreeSet<NaiveDate>,
}

impl BusinessCalendar {
    pub fn new(tz: Tz, holidays: BTreeSet<NaiveDate>) -> Self {
        Self { tz, holidays }
    }

    /// Calendar for the default Argentina timezone.
    pub fn argentina(holidays: BTreeSet<NaiveDate>) -> Self {
        Self::new(DEFAULT_TIMEZONE, holidays)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }

    /// Local calendar date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// Local 0-23 hour of an instant; used for export cutoff comparisons.
    pub fn local_hour(&self, instant: DateTime<Utc>) -> u32 {
        use chrono::Timelike;
        instant.with_timezone(&self.tz).hour()
    }

    /// `YYYY-MM-DD` key of an instant's local date.
    pub fn local_date_key(&self, instant: DateTime<Utc>) -> String {
        self.local_date(instant).format("%Y-%m-%d").to_string()
    }

    /// Whether a local calendar date is a business day.
    ///
    /// Saturdays and Sundays are never business days, independent of the
    /// holiday set.
    pub fn is_business_date(&self, date: NaiveDate) -> bool {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => false,
            _ => !self.holidays.contains(&date),
        }
    }

    /// Whether an instant falls on a local business day.
    pub fn is_business_day(&self, instant: DateTime<Utc>) -> bool {
        self.is_business_date(self.local_date(instant))
    }

    /// Nearest business date at or after the given instant's local date.
    pub fn next_business_day(&self, instant: DateTime<Utc>) -> Result<NaiveDate, CalendarError> {
        self.next_business_date(self.local_date(instant))
    }

    /// Nearest business date at or after `date`.
    pub fn next_business_date(&self, date: NaiveDate) -> Result<NaiveDate, CalendarError> {
        let mut candidate = date;
        for _ in 0..MAX_SCAN_DAYS {
            if self.is_business_date(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::days(1);
        }
        Err(CalendarError::Unresolvable(MAX_SCAN_DAYS))
    }

    /// Advance `n` business days from the instant's local date.
    ///
    /// `n = 0` returns the local midnight of the date itself (no business-day
    /// normalization). `n > 0` counts business days only; the result is the
    /// local midnight of the landing date, which is always a business day.
    pub fn add_business_days(
        &self,
        instant: DateTime<Utc>,
        n: u32,
    ) -> Result<DateTime<Tz>, CalendarError> {
        let mut date = self.local_date(instant);
        for _ in 0..n {
            date = self.next_business_date(date + Duration::days(1))?;
        }
        self.local_midnight(date)
    }

    /// Local midnight of a calendar date as an absolute instant.
    pub fn local_midnight(&self, date: NaiveDate) -> Result<DateTime<Tz>, CalendarError> {
        self.tz
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
            .earliest()
            .ok_or(CalendarError::InvalidLocalTime(date))
    }
}

/// Parse a configured holiday set.
///
/// Accepts a JSON array of `YYYY-MM-DD` strings, or a plain comma-separated
/// list as fallback. Entries that do not parse are dropped: the calendar
/// treats them as ordinary days rather than refusing to run.
pub fn parse_holiday_set(raw: &str) -> BTreeSet<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return BTreeSet::new();
    }

    let entries: Vec<String> = match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => list,
        Err(_) => raw.split(',').map(|s| s.to_string()).collect(),
    };

    entries
        .iter()
        .filter_map(|e| NaiveDate::parse_from_str(e.trim(), "%Y-%m-%d").ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc_noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        // Noon UTC = 09:00 in Buenos Aires, same local date.
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn calendar_with(holidays: &[NaiveDate]) -> BusinessCalendar {
        BusinessCalendar::argentina(holidays.iter().copied().collect())
    }

    #[test]
    fn weekends_are_never_business_days() {
        let cal = calendar_with(&[]);
        // 2025-07-05 is a Saturday, 2025-07-06 a Sunday.
        assert!(!cal.is_business_date(date(2025, 7, 5)));
        assert!(!cal.is_business_date(date(2025, 7, 6)));
        assert!(cal.is_business_date(date(2025, 7, 7)));
    }

    #[test]
    fn holidays_are_not_business_days() {
        // 2025-07-09 (Independence Day) is a Wednesday.
        let cal = calendar_with(&[date(2025, 7, 9)]);
        assert!(!cal.is_business_date(date(2025, 7, 9)));
        assert!(cal.is_business_date(date(2025, 7, 8)));
    }

    #[test]
    fn next_business_day_skips_weekend_and_holiday_run() {
        // Friday holiday followed by a weekend: next business day is Monday.
        let cal = calendar_with(&[date(2025, 7, 4)]);
        assert_eq!(
            cal.next_business_date(date(2025, 7, 4)).unwrap(),
            date(2025, 7, 7)
        );
    }

    #[test]
    fn next_business_day_is_identity_on_business_days() {
        let cal = calendar_with(&[]);
        assert_eq!(
            cal.next_business_date(date(2025, 7, 8)).unwrap(),
            date(2025, 7, 8)
        );
    }

    #[test]
    fn next_business_day_fails_when_holiday_set_exhausts_calendar() {
        let start = date(2025, 1, 1);
        let every_day: BTreeSet<NaiveDate> =
            (0i64..400).map(|d| start + Duration::days(d)).collect();
        let cal = BusinessCalendar::argentina(every_day);
        assert_eq!(
            cal.next_business_date(start),
            Err(CalendarError::Unresolvable(370))
        );
    }

    #[test]
    fn add_zero_business_days_is_local_midnight() {
        let cal = calendar_with(&[]);
        // Saturday: n = 0 does not normalize to a business day.
        let out = cal.add_business_days(utc_noon(2025, 7, 5), 0).unwrap();
        assert_eq!(out.date_naive(), date(2025, 7, 5));
        assert_eq!(out.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn add_business_days_counts_business_days_only() {
        let cal = calendar_with(&[date(2025, 7, 9)]);
        // Tuesday 2025-07-08 + 2 business days: Wed is a holiday, so
        // Thu 10th is the first and Fri 11th the second.
        let out = cal.add_business_days(utc_noon(2025, 7, 8), 2).unwrap();
        assert_eq!(out.date_naive(), date(2025, 7, 11));
    }

    #[test]
    fn add_business_days_from_friday_lands_on_monday() {
        let cal = calendar_with(&[]);
        let out = cal.add_business_days(utc_noon(2025, 7, 4), 1).unwrap();
        assert_eq!(out.date_naive(), date(2025, 7, 7));
    }

    #[test]
    fn local_date_respects_timezone_boundary() {
        let cal = calendar_with(&[]);
        // 01:00 UTC is still 22:00 of the *previous* day in Buenos Aires.
        let instant = Utc.with_ymd_and_hms(2025, 7, 8, 1, 0, 0).unwrap();
        assert_eq!(cal.local_date(instant), date(2025, 7, 7));
        assert_eq!(cal.local_hour(instant), 22);
    }

    #[test]
    fn local_date_key_formats_as_iso_date() {
        let cal = calendar_with(&[]);
        assert_eq!(cal.local_date_key(utc_noon(2025, 7, 8)), "2025-07-08");
    }

    #[test]
    fn holiday_parsing_accepts_json_array() {
        let set = parse_holiday_set(r#"["2025-01-01", "2025-07-09"]"#);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&date(2025, 1, 1)));
    }

    #[test]
    fn holiday_parsing_accepts_comma_separated_fallback() {
        let set = parse_holiday_set("2025-01-01, 2025-07-09");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn holiday_parsing_drops_invalid_entries() {
        let set = parse_holiday_set(r#"["2025-01-01", "not-a-date", "2025-13-40"]"#);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn holiday_parsing_never_fails() {
        assert!(parse_holiday_set("").is_empty());
        assert!(parse_holiday_set("{broken json").is_empty());
        assert!(parse_holiday_set("[1, 2, 3]").is_empty());
    }

    proptest! {
        #[test]
        fn weekend_is_never_business_day_regardless_of_holidays(
            days in 0i64..3650,
            holiday_offsets in proptest::collection::vec(0i64..3650, 0..20),
        ) {
            let base = date(2024, 1, 1);
            let holidays: BTreeSet<NaiveDate> =
                holiday_offsets.iter().map(|d| base + Duration::days(*d)).collect();
            let cal = BusinessCalendar::argentina(holidays);

            let candidate = base + Duration::days(days);
            if matches!(candidate.weekday(), Weekday::Sat | Weekday::Sun) {
                prop_assert!(!cal.is_business_date(candidate));
            }
        }

        #[test]
        fn advancing_lands_on_business_days(
            days in 0i64..3650,
            n in 1u32..15,
            holiday_offsets in proptest::collection::vec(0i64..3650, 0..20),
        ) {
            let base = date(2024, 1, 1);
            let holidays: BTreeSet<NaiveDate> =
                holiday_offsets.iter().map(|d| base + Duration::days(*d)).collect();
            let cal = BusinessCalendar::argentina(holidays);

            let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
                + Duration::days(days);
            let landed = cal.add_business_days(start, n).unwrap();
            prop_assert!(cal.is_business_date(landed.date_naive()));
        }

        #[test]
        fn next_business_date_is_at_or_after_input(days in 0i64..3650) {
            let cal = BusinessCalendar::argentina(BTreeSet::new());
            let start = date(2024, 1, 1) + Duration::days(days);
            let next = cal.next_business_date(start).unwrap();
            prop_assert!(next >= start);
            prop_assert!(cal.is_business_date(next));
        }
    }
}
