//! `cobranzas-config` — process-wide collections tunables.
//!
//! One immutable [`CollectionsConfig`] value is built at process start (or
//! per test) and passed explicitly into every component that needs it. No
//! component reads the environment ad hoc. A malformed or missing value never
//! fails construction: every field has a documented fallback.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::warn;

use cobranzas_calendar::{parse_holiday_set, BusinessCalendar, CalendarError, DEFAULT_TIMEZONE};
use cobranzas_collections::{DebitAdapter, FallbackProvider};

/// Environment keys, one per tunable.
pub mod keys {
    pub const ENABLED: &str = "COBRANZAS_COLLECTIONS_ENABLED";
    pub const TIMEZONE: &str = "COBRANZAS_TIMEZONE";
    pub const ANCHOR_DAY: &str = "COBRANZAS_ANCHOR_DAY";
    pub const DUNNING_RETRY_DAYS: &str = "COBRANZAS_DUNNING_RETRY_DAYS";
    pub const HOLIDAYS: &str = "COBRANZAS_HOLIDAYS";
    pub const BUSINESS_DAYS_ONLY: &str = "COBRANZAS_BUSINESS_DAYS_ONLY";
    pub const SUSPEND_AFTER_DAYS: &str = "COBRANZAS_SUSPEND_AFTER_DAYS";
    pub const VAT_RATE_BPS: &str = "COBRANZAS_VAT_RATE_BPS";
    pub const DEBIT_ADAPTER: &str = "COBRANZAS_DEBIT_ADAPTER";
    pub const FALLBACK_PROVIDER: &str = "COBRANZAS_FALLBACK_PROVIDER";
    pub const FALLBACK_EXPIRY_HOURS: &str = "COBRANZAS_FALLBACK_EXPIRY_HOURS";
    pub const FALLBACK_BATCH_SIZE: &str = "COBRANZAS_FALLBACK_BATCH_SIZE";
    pub const FALLBACK_AUTO_SYNC: &str = "COBRANZAS_FALLBACK_AUTO_SYNC";
    pub const LOCK_TTL_SECS: &str = "COBRANZAS_LOCK_TTL_SECS";
    pub const EXPORT_CUTOFF_HOUR: &str = "COBRANZAS_EXPORT_CUTOFF_HOUR";
    pub const REQUIRE_AGENCY_FLAG: &str = "COBRANZAS_REQUIRE_AGENCY_FLAG";
}

/// Default dunning retry offsets (days after the failed attempt).
pub const DEFAULT_DUNNING_RETRY_DAYS: [u32; 3] = [3, 7, 14];

/// Immutable snapshot of the collections tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionsConfig {
    /// Global cron enable toggle. When off, the cron tick does nothing.
    pub enabled: bool,
    pub timezone: Tz,
    /// Day-of-month new billing cycles anchor on, clamped to 1..=31.
    pub anchor_day: u32,
    /// Sorted, de-duplicated positive day offsets for dunning retries.
    pub dunning_retry_days: Vec<u32>,
    pub holidays: BTreeSet<NaiveDate>,
    /// Whether scheduled jobs defer on non-business days.
    pub business_days_only: bool,
    /// Days of unpaid dunning after which an agency is suspended.
    pub suspend_after_days: u32,
    /// Default VAT rate in basis points (2100 = 21%).
    pub vat_rate_bps: u32,
    /// Rail targeted when a trigger names no adapter explicitly.
    pub default_debit_adapter: DebitAdapter,
    pub fallback_provider: FallbackProvider,
    pub fallback_expiry_hours: u32,
    pub fallback_batch_size: u32,
    /// Whether the cron tick also runs the fallback create/sync jobs.
    pub fallback_auto_sync: bool,
    /// Job lock lease duration. Must exceed the worst-case job duration.
    pub lock_ttl_secs: u64,
    /// Local hour at/after which CRON export runs defer to the next day.
    pub export_cutoff_hour: Option<u32>,
    /// Fail-closed rollout: agencies without an explicit rollout row get all
    /// automation disabled when set.
    pub require_agency_flag: bool,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: DEFAULT_TIMEZONE,
            anchor_day: 1,
            dunning_retry_days: DEFAULT_DUNNING_RETRY_DAYS.to_vec(),
            holidays: BTreeSet::new(),
            business_days_only: true,
            suspend_after_days: 30,
            vat_rate_bps: 2100,
            default_debit_adapter: DebitAdapter::Coelsa,
            fallback_provider: FallbackProvider::MercadoPago,
            fallback_expiry_hours: 72,
            fallback_batch_size: 500,
            fallback_auto_sync: false,
            lock_ttl_secs: 600,
            export_cutoff_hour: Some(18),
            require_agency_flag: false,
        }
    }
}

impl CollectionsConfig {
    /// Build the snapshot from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the snapshot from an arbitrary key lookup (tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let timezone = match lookup(keys::TIMEZONE) {
            Some(raw) => raw.parse::<Tz>().unwrap_or_else(|_| {
                warn!(timezone = %raw, "unparseable timezone, falling back to default");
                DEFAULT_TIMEZONE
            }),
            None => DEFAULT_TIMEZONE,
        };

        let default_debit_adapter = match lookup(keys::DEBIT_ADAPTER) {
            Some(raw) => raw.parse::<DebitAdapter>().unwrap_or_else(|_| {
                warn!(adapter = %raw, "unknown debit adapter, falling back to default");
                defaults.default_debit_adapter
            }),
            None => defaults.default_debit_adapter,
        };

        let fallback_provider = match lookup(keys::FALLBACK_PROVIDER) {
            Some(raw) => raw.parse::<FallbackProvider>().unwrap_or_else(|_| {
                warn!(provider = %raw, "unknown fallback provider, falling back to default");
                defaults.fallback_provider
            }),
            None => defaults.fallback_provider,
        };

        Self {
            enabled: parse_bool(lookup(keys::ENABLED)).unwrap_or(defaults.enabled),
            timezone,
            anchor_day: parse_u32(lookup(keys::ANCHOR_DAY))
                .map(|d| d.clamp(1, 31))
                .unwrap_or(defaults.anchor_day),
            dunning_retry_days: parse_day_offsets(lookup(keys::DUNNING_RETRY_DAYS))
                .unwrap_or_else(|| defaults.dunning_retry_days.clone()),
            holidays: lookup(keys::HOLIDAYS)
                .map(|raw| parse_holiday_set(&raw))
                .unwrap_or_default(),
            business_days_only: parse_bool(lookup(keys::BUSINESS_DAYS_ONLY))
                .unwrap_or(defaults.business_days_only),
            suspend_after_days: parse_u32(lookup(keys::SUSPEND_AFTER_DAYS))
                .unwrap_or(defaults.suspend_after_days),
            vat_rate_bps: parse_u32(lookup(keys::VAT_RATE_BPS)).unwrap_or(defaults.vat_rate_bps),
            default_debit_adapter,
            fallback_provider,
            fallback_expiry_hours: parse_u32(lookup(keys::FALLBACK_EXPIRY_HOURS))
                .unwrap_or(defaults.fallback_expiry_hours),
            fallback_batch_size: parse_u32(lookup(keys::FALLBACK_BATCH_SIZE))
                .unwrap_or(defaults.fallback_batch_size),
            fallback_auto_sync: parse_bool(lookup(keys::FALLBACK_AUTO_SYNC))
                .unwrap_or(defaults.fallback_auto_sync),
            lock_ttl_secs: parse_u32(lookup(keys::LOCK_TTL_SECS))
                .map(u64::from)
                .unwrap_or(defaults.lock_ttl_secs),
            export_cutoff_hour: match lookup(keys::EXPORT_CUTOFF_HOUR) {
                Some(raw) => parse_u32(Some(raw)).filter(|h| *h <= 23),
                None => defaults.export_cutoff_hour,
            },
            require_agency_flag: parse_bool(lookup(keys::REQUIRE_AGENCY_FLAG))
                .unwrap_or(defaults.require_agency_flag),
        }
    }

    /// Business calendar for this configuration's timezone and holidays.
    pub fn calendar(&self) -> BusinessCalendar {
        BusinessCalendar::new(self.timezone, self.holidays.clone())
    }

    /// Next billing anchor instant from `now`.
    ///
    /// If the local day-of-month is already past the anchor day, the target
    /// is the anchor day of the next month; otherwise this month's. Months
    /// shorter than the anchor day clamp to their last day. Returned as the
    /// local midnight of the target date.
    pub fn next_anchor_date(
        &self,
        now: DateTime<Utc>,
        anchor_day: Option<u32>,
    ) -> Result<DateTime<Tz>, CalendarError> {
        let anchor_day = anchor_day.unwrap_or(self.anchor_day).clamp(1, 31);
        let today = now.with_timezone(&self.timezone).date_naive();

        let (year, month) = if today.day() > anchor_day {
            next_month(today.year(), today.month())
        } else {
            (today.year(), today.month())
        };

        let day = anchor_day.min(days_in_month(year, month));
        // Valid by construction: day is clamped to the month's length.
        let target = NaiveDate::from_ymd_opt(year, month, day)
            .unwrap_or(today);

        self.calendar().local_midnight(target)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = {
        let (y, m) = next_month(year, month);
        NaiveDate::from_ymd_opt(y, m, 1)
    };
    match (first, next) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 31,
    }
}

fn parse_bool(raw: Option<String>) -> Option<bool> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u32(raw: Option<String>) -> Option<u32> {
    raw?.trim().parse::<u32>().ok()
}

/// Parse dunning retry offsets: JSON array or comma-separated, filtered to
/// positive integers, de-duplicated, sorted ascending. `None` when nothing
/// usable was configured (caller substitutes the built-in default).
fn parse_day_offsets(raw: Option<String>) -> Option<Vec<u32>> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let entries: Vec<String> = match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
        Ok(values) => values
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Err(_) => trimmed.split(',').map(|s| s.to_string()).collect(),
    };

    let mut days: Vec<u32> = entries
        .iter()
        .filter_map(|e| e.trim().parse::<u32>().ok())
        .filter(|d| *d > 0)
        .collect();
    days.sort_unstable();
    days.dedup();

    if days.is_empty() {
        None
    } else {
        Some(days)
    }
}
