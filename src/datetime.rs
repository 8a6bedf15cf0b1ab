//! Scanner timestamps.
//!
//! ISQ headers store the creation date as a 64-bit count of 100 ns ticks
//! since the VMS epoch (17 November 1858), split into two 32-bit words.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR:   u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY:    u64 = 24 * MS_PER_HOUR;
/// Julian day number of the VMS epoch.
const VMS_EPOCH_JULIAN_DAY: u64 = 2_400_001;
const TICKS_PER_MS: u64 = 10_000;

const MONTHS: [&str; 13] = [
    "XXX", "JAN", "FEB", "MAR", "APR", "MAY", "JUN",
    "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Calendar date and time of day, Gregorian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanDateTime {
    pub year:   i64,
    pub month:  u32,
    pub day:    u32,
    pub hour:   u32,
    pub minute: u32,
    pub second: u32,
    pub millis: u32,
}

/// Convert the two timestamp words to a calendar date.
pub fn decode_date(low: u32, high: u32) -> ScanDateTime {
    let ticks = u64::from(low) + (u64::from(high) << 32);
    let time = ticks / TICKS_PER_MS + VMS_EPOCH_JULIAN_DAY * MS_PER_DAY;
    let julian_day = (time / MS_PER_DAY) as i64;
    let mut ms = time % MS_PER_DAY;

    // Fliegel & Van Flandern, Gregorian from 15 October 1582.
    let mut l = julian_day + 68569;
    let n = 4 * l / 146097;
    l -= (146097 * n + 3) / 4;
    let i = 4000 * (l + 1) / 1461001;
    l = l - 1461 * i / 4 + 31;
    let j = 80 * l / 2447;
    let day = l - 2447 * j / 80;
    l = j / 11;
    let month = j + 2 - 12 * l;
    let year = 100 * (n - 49) + i + l;

    let hour = ms / MS_PER_HOUR;
    ms -= hour * MS_PER_HOUR;
    let minute = ms / MS_PER_MINUTE;
    ms -= minute * MS_PER_MINUTE;
    let second = ms / MS_PER_SECOND;
    ms -= second * MS_PER_SECOND;

    ScanDateTime {
        year,
        month:  month as u32,
        day:    day as u32,
        hour:   hour as u32,
        minute: minute as u32,
        second: second as u32,
        millis: ms as u32,
    }
}

impl ScanDateTime {
    pub fn month_abbrev(&self) -> &'static str {
        MONTHS.get(self.month as usize).copied().unwrap_or(MONTHS[0])
    }

    /// `None` when the date is outside chrono's range.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(i32::try_from(self.year).ok()?, self.month, self.day)?
            .and_hms_milli_opt(self.hour, self.minute, self.second, self.millis)
    }
}

/// Scanner log style, e.g. `13-MAY-2016 12:15:48.35` (hundredths of a second).
impl fmt::Display for ScanDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>2}-{}-{:4} {:02}:{:02}:{:02}.{:02}",
            self.day,
            self.month_abbrev(),
            self.year,
            self.hour,
            self.minute,
            self.second,
            self.millis / 10
        )
    }
}
