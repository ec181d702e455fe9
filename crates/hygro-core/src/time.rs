//! Calendar conversion and the wall clock anchor
//!
//! The device has no RTC. Time starts at the epoch on boot and jumps to real
//! time once SNTP succeeds, which is why [`ClockState`] stores an anchor
//! instead of an absolute value.

use core::fmt::Write;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use embedded_sdmmc::Timestamp;

use crate::reading::Iso8601;

const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Latest year representable by `Timestamp::year_since_1970`.
const MAX_YEAR: i32 = 1970 + u8::MAX as i32;

const LATEST: Timestamp = Timestamp {
    year_since_1970: u8::MAX,
    zero_indexed_month: 11,
    zero_indexed_day: 30,
    hours: 23,
    minutes: 59,
    seconds: 59,
};

/// Unix seconds (UTC) shifted by `utc_offset_secs` to a calendar timestamp.
/// Saturates at the end of 2225. Offsets beyond a day are ignored.
pub fn local_timestamp(unix_secs: u64, utc_offset_secs: i32) -> Timestamp {
    let offset = FixedOffset::east_opt(utc_offset_secs).map_or(0, |o| o.local_minus_utc());

    let local = i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| secs.checked_add(i64::from(offset)))
        .and_then(|secs| DateTime::from_timestamp(secs.max(0), 0));

    match local {
        Some(dt) => timestamp_from_datetime(&dt.naive_utc()),
        None => LATEST,
    }
}

/// Unix seconds to a UTC calendar timestamp.
pub fn timestamp_from_unix(unix_secs: u64) -> Timestamp {
    local_timestamp(unix_secs, 0)
}

fn timestamp_from_datetime(dt: &NaiveDateTime) -> Timestamp {
    if dt.year() > MAX_YEAR {
        return LATEST;
    }
    Timestamp {
        year_since_1970: (dt.year() - 1970).clamp(0, i32::from(u8::MAX)) as u8,
        zero_indexed_month: dt.month0() as u8,
        zero_indexed_day: dt.day0() as u8,
        hours: dt.hour() as u8,
        minutes: dt.minute() as u8,
        seconds: dt.second() as u8,
    }
}

fn datetime_from_timestamp(ts: &Timestamp) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(
        1970 + i32::from(ts.year_since_1970),
        u32::from(ts.zero_indexed_month) + 1,
        u32::from(ts.zero_indexed_day) + 1,
    )?
    .and_hms_opt(
        u32::from(ts.hours),
        u32::from(ts.minutes),
        u32::from(ts.seconds),
    )
}

/// Formats as `YYYY-MM-DDTHH:MM:SS`. A timestamp that is not a real
/// calendar date renders as the epoch.
pub fn iso8601(ts: &Timestamp) -> Iso8601 {
    let dt = datetime_from_timestamp(ts).unwrap_or_default();
    let mut out = Iso8601::new();
    // 19 characters always fit
    let _ = write!(out, "{}", dt.format(ISO8601_FORMAT));
    out
}

/// Maps device uptime onto local wall clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
    anchor_unix: Option<u64>,
    anchor_uptime_ms: u64,
    utc_offset_secs: i32,
}

impl ClockState {
    pub const fn new(utc_offset_secs: i32) -> Self {
        Self {
            anchor_unix: None,
            anchor_uptime_ms: 0,
            utc_offset_secs,
        }
    }

    pub const fn is_synced(&self) -> bool {
        self.anchor_unix.is_some()
    }

    /// Records that `unix_secs` (UTC) was true at `uptime_ms`.
    pub fn sync(&mut self, unix_secs: u64, uptime_ms: u64) {
        self.anchor_unix = Some(unix_secs);
        self.anchor_uptime_ms = uptime_ms;
    }

    /// UTC in Unix seconds. Before the first sync this is uptime counted
    /// from the epoch.
    pub fn utc_unix(&self, uptime_ms: u64) -> u64 {
        match self.anchor_unix {
            Some(anchor) => anchor + uptime_ms.saturating_sub(self.anchor_uptime_ms) / 1000,
            None => uptime_ms / 1000,
        }
    }

    /// Local calendar time.
    pub fn timestamp(&self, uptime_ms: u64) -> Timestamp {
        local_timestamp(self.utc_unix(uptime_ms), self.utc_offset_secs)
    }
}
