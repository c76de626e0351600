//! Dates, time spans and date ranges.
//!
//! All planning arithmetic runs on plain second counts. `Date` is an
//! instant (seconds since the Unix epoch), `TimeSpan` a signed duration.
//! Both are `#[repr(transparent)]` newtypes so they cost nothing over a
//! raw `i64` while keeping instants and durations from being mixed up.
//!
//! The wire contract is fixed: dates format as `%Y-%m-%dT%H:%M:%S`,
//! spans as ISO-8601 period strings where a year counts 31,536,000
//! seconds and a month 2,628,000 (a twelfth of that year). The horizon
//! sentinels `INFINITE_PAST` (1971-01-01) and `INFINITE_FUTURE`
//! (2030-12-31) must survive any round-trip bit-exact.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::error::{CoreError, CoreResult};

const SECONDS_PER_YEAR: i64 = 31_536_000;
const SECONDS_PER_MONTH: i64 = 2_628_000;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_MINUTE: i64 = 60;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// An instant on the planning timeline, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Date(pub i64);

/// Lower horizon sentinel: 1971-01-01T00:00:00.
pub const INFINITE_PAST: Date = Date(31_536_000);

/// Upper horizon sentinel: 2030-12-31T00:00:00.
pub const INFINITE_FUTURE: Date = Date(1_924_905_600);

impl Date {
    #[inline]
    pub fn new(seconds: i64) -> Self {
        Date(seconds)
    }

    #[inline]
    pub fn seconds(&self) -> i64 {
        self.0
    }

    /// Build a date from calendar fields. Out-of-range fields are a data error.
    pub fn from_ymd_hms(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> CoreResult<Self> {
        let date = chrono::NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .ok_or_else(|| {
                CoreError::Data(format!(
                    "invalid date {year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
                ))
            })?;
        Ok(Date(date.and_utc().timestamp()))
    }

    /// Parse the `%Y-%m-%dT%H:%M:%S` wire format.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let parsed = NaiveDateTime::parse_from_str(s, DATE_FORMAT)
            .map_err(|e| CoreError::Data(format!("invalid date '{s}': {e}")))?;
        Ok(Date(parsed.and_utc().timestamp()))
    }

    #[inline]
    pub fn is_infinite_past(&self) -> bool {
        *self <= INFINITE_PAST
    }

    #[inline]
    pub fn is_infinite_future(&self) -> bool {
        *self >= INFINITE_FUTURE
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp(self.0, 0) {
            Some(dt) => write!(f, "{}", dt.format(DATE_FORMAT)),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for Date {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Date {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Date::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Add<TimeSpan> for Date {
    type Output = Date;
    fn add(self, rhs: TimeSpan) -> Date {
        Date(self.0.saturating_add(rhs.0))
    }
}

impl Sub<TimeSpan> for Date {
    type Output = Date;
    fn sub(self, rhs: TimeSpan) -> Date {
        Date(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Date {
    type Output = TimeSpan;
    fn sub(self, rhs: Date) -> TimeSpan {
        TimeSpan(self.0 - rhs.0)
    }
}

impl AddAssign<TimeSpan> for Date {
    fn add_assign(&mut self, rhs: TimeSpan) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl SubAssign<TimeSpan> for Date {
    fn sub_assign(&mut self, rhs: TimeSpan) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

/// A signed duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct TimeSpan(pub i64);

impl TimeSpan {
    pub const ZERO: TimeSpan = TimeSpan(0);
    pub const DAY: TimeSpan = TimeSpan(SECONDS_PER_DAY);
    pub const HOUR: TimeSpan = TimeSpan(SECONDS_PER_HOUR);
    pub const MAX: TimeSpan = TimeSpan(INFINITE_FUTURE.0 - INFINITE_PAST.0);

    #[inline]
    pub fn seconds(s: i64) -> Self {
        TimeSpan(s)
    }

    #[inline]
    pub fn minutes(m: i64) -> Self {
        TimeSpan(m * SECONDS_PER_MINUTE)
    }

    #[inline]
    pub fn hours(h: i64) -> Self {
        TimeSpan(h * SECONDS_PER_HOUR)
    }

    #[inline]
    pub fn days(d: i64) -> Self {
        TimeSpan(d * SECONDS_PER_DAY)
    }

    #[inline]
    pub fn as_seconds(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Parse an ISO-8601 period string, or a bare second count.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let original = s;
        let mut rest = s.trim();
        let negative = if let Some(stripped) = rest.strip_prefix('-') {
            rest = stripped;
            true
        } else {
            false
        };
        // A bare integer is accepted as a second count.
        if !rest.starts_with('P') {
            return rest
                .parse::<i64>()
                .map(|v| TimeSpan(if negative { -v } else { v }))
                .map_err(|_| CoreError::Data(format!("invalid duration '{original}'")));
        }
        rest = &rest[1..];
        let mut total: i64 = 0;
        let mut in_time = false;
        let mut chars = rest.chars().peekable();
        let mut saw_component = false;
        while let Some(&c) = chars.peek() {
            if c == 'T' {
                in_time = true;
                chars.next();
                continue;
            }
            let mut value: i64 = 0;
            let mut digits = 0;
            while let Some(&d) = chars.peek() {
                if let Some(v) = d.to_digit(10) {
                    value = value * 10 + i64::from(v);
                    digits += 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let designator = chars
                .next()
                .ok_or_else(|| CoreError::Data(format!("invalid duration '{original}'")))?;
            if digits == 0 {
                return Err(CoreError::Data(format!("invalid duration '{original}'")));
            }
            total += match (designator, in_time) {
                ('Y', false) => value * SECONDS_PER_YEAR,
                ('M', false) => value * SECONDS_PER_MONTH,
                ('D', false) => value * SECONDS_PER_DAY,
                ('W', false) => value * 7 * SECONDS_PER_DAY,
                ('H', true) => value * SECONDS_PER_HOUR,
                ('M', true) => value * SECONDS_PER_MINUTE,
                ('S', true) => value,
                _ => {
                    return Err(CoreError::Data(format!("invalid duration '{original}'")));
                }
            };
            saw_component = true;
        }
        if !saw_component {
            return Err(CoreError::Data(format!("invalid duration '{original}'")));
        }
        Ok(TimeSpan(if negative { -total } else { total }))
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remainder = self.0;
        if remainder < 0 {
            write!(f, "-")?;
            remainder = -remainder;
        }
        write!(f, "P")?;
        if remainder >= SECONDS_PER_YEAR {
            write!(f, "{}Y", remainder / SECONDS_PER_YEAR)?;
            remainder %= SECONDS_PER_YEAR;
        }
        if remainder >= SECONDS_PER_DAY {
            write!(f, "{}D", remainder / SECONDS_PER_DAY)?;
            remainder %= SECONDS_PER_DAY;
        }
        if remainder > 0 {
            write!(f, "T")?;
            if remainder >= SECONDS_PER_HOUR {
                write!(f, "{}H", remainder / SECONDS_PER_HOUR)?;
                remainder %= SECONDS_PER_HOUR;
            }
            if remainder >= SECONDS_PER_MINUTE {
                write!(f, "{}M", remainder / SECONDS_PER_MINUTE)?;
                remainder %= SECONDS_PER_MINUTE;
            }
            if remainder > 0 {
                write!(f, "{remainder}S")?;
            }
        } else if self.0 == 0 {
            write!(f, "T0S")?;
        }
        Ok(())
    }
}

impl Serialize for TimeSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeSpan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TimeSpan::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Add for TimeSpan {
    type Output = TimeSpan;
    fn add(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan(self.0 + rhs.0)
    }
}

impl Sub for TimeSpan {
    type Output = TimeSpan;
    fn sub(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan(self.0 - rhs.0)
    }
}

impl Neg for TimeSpan {
    type Output = TimeSpan;
    fn neg(self) -> TimeSpan {
        TimeSpan(-self.0)
    }
}

/// A half-open window `[start, end)` on the planning timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Self {
        DateRange { start, end }
    }

    /// The whole planning horizon.
    pub fn horizon() -> Self {
        DateRange {
            start: INFINITE_PAST,
            end: INFINITE_FUTURE,
        }
    }

    #[inline]
    pub fn duration(&self) -> TimeSpan {
        self.end - self.start
    }

    /// True when the date falls inside `[start, end)`. A zero-length
    /// range contains only its own start.
    #[inline]
    pub fn contains(&self, d: Date) -> bool {
        d >= self.start && (d < self.end || (self.start == self.end && d == self.start))
    }

    #[inline]
    pub fn intersects(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the intersection with another range.
    pub fn overlap(&self, other: &DateRange) -> TimeSpan {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end - start
        } else {
            TimeSpan::ZERO
        }
    }
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange::horizon()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trip() {
        assert_eq!(INFINITE_PAST.to_string(), "1971-01-01T00:00:00");
        assert_eq!(INFINITE_FUTURE.to_string(), "2030-12-31T00:00:00");
        assert_eq!(Date::parse("1971-01-01T00:00:00").unwrap(), INFINITE_PAST);
        assert_eq!(Date::parse("2030-12-31T00:00:00").unwrap(), INFINITE_FUTURE);
    }

    #[test]
    fn date_format_round_trip() {
        let d = Date::from_ymd_hms(2024, 3, 15, 8, 30, 0).unwrap();
        assert_eq!(d.to_string(), "2024-03-15T08:30:00");
        assert_eq!(Date::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn duration_parse_calendar_units() {
        assert_eq!(TimeSpan::parse("P1Y").unwrap().as_seconds(), 31_536_000);
        assert_eq!(TimeSpan::parse("P1M").unwrap().as_seconds(), 2_628_000);
        assert_eq!(TimeSpan::parse("P1D").unwrap(), TimeSpan::days(1));
        assert_eq!(
            TimeSpan::parse("P1DT2H30M15S").unwrap().as_seconds(),
            86_400 + 2 * 3_600 + 30 * 60 + 15
        );
        assert_eq!(TimeSpan::parse("-P1D").unwrap(), TimeSpan::days(-1));
        assert_eq!(TimeSpan::parse("3600").unwrap(), TimeSpan::hours(1));
    }

    #[test]
    fn duration_display_round_trip() {
        for seconds in [0, 59, 3_600, 86_400, 90_061, 31_536_000 + 86_400, -86_400] {
            let span = TimeSpan(seconds);
            assert_eq!(TimeSpan::parse(&span.to_string()).unwrap(), span);
        }
    }

    #[test]
    fn duration_parse_rejects_garbage() {
        assert!(TimeSpan::parse("P").is_err());
        assert!(TimeSpan::parse("1DT").is_err());
        assert!(TimeSpan::parse("PT5X").is_err());
    }

    #[test]
    fn range_overlap() {
        let a = DateRange::new(Date(0), Date(100));
        let b = DateRange::new(Date(50), Date(150));
        assert_eq!(a.overlap(&b).as_seconds(), 50);
        assert!(a.intersects(&b));
        assert!(a.contains(Date(0)));
        assert!(!a.contains(Date(100)));
    }
}
