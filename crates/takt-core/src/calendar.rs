//! Calendars: date-valued step functions.
//!
//! A calendar carries a default value and a date-sorted list of buckets.
//! The value at any instant is the value of the latest bucket starting at
//! or before it, falling back to the default. Calendars serve two roles:
//! time-varying limits (minimum inventory, resource capacity) and bucket
//! grids for forecasting.

use serde::{Deserialize, Serialize};

use crate::dates::{Date, DateRange, INFINITE_FUTURE, INFINITE_PAST};

/// One step of a calendar: from `start` onward the calendar takes `value`,
/// until the next bucket begins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarBucket {
    pub start: Date,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub name: String,
    pub default_value: f64,
    /// Buckets kept sorted by start date.
    buckets: Vec<CalendarBucket>,
}

impl Calendar {
    pub fn new(name: impl Into<String>, default_value: f64) -> Self {
        Calendar {
            name: name.into(),
            default_value,
            buckets: Vec::new(),
        }
    }

    /// Insert a bucket, keeping the list date-sorted. A bucket starting on
    /// an existing date replaces the old value.
    pub fn set_value(&mut self, start: Date, value: f64) {
        match self.buckets.binary_search_by_key(&start, |b| b.start) {
            Ok(pos) => self.buckets[pos].value = value,
            Err(pos) => self.buckets.insert(pos, CalendarBucket { start, value }),
        }
    }

    pub fn buckets(&self) -> &[CalendarBucket] {
        &self.buckets
    }

    /// The calendar value at an instant.
    pub fn value_at(&self, date: Date) -> f64 {
        match self.buckets.binary_search_by_key(&date, |b| b.start) {
            Ok(pos) => self.buckets[pos].value,
            Err(0) => self.default_value,
            Err(pos) => self.buckets[pos - 1].value,
        }
    }

    /// All dates where the calendar value can change, within the horizon.
    /// The horizon edges are always included so callers can iterate
    /// consecutive boundary pairs as bucket ranges.
    pub fn boundaries(&self) -> Vec<Date> {
        let mut out = Vec::with_capacity(self.buckets.len() + 2);
        out.push(INFINITE_PAST);
        for b in &self.buckets {
            if b.start > INFINITE_PAST && b.start < INFINITE_FUTURE {
                out.push(b.start);
            }
        }
        out.push(INFINITE_FUTURE);
        out.dedup();
        out
    }

    /// Consecutive bucket ranges with their values, spanning the horizon.
    pub fn bucket_ranges(&self) -> Vec<(DateRange, f64)> {
        let bounds = self.boundaries();
        bounds
            .windows(2)
            .map(|w| (DateRange::new(w[0], w[1]), self.value_at(w[0])))
            .collect()
    }

    /// The bucket range containing a date, if any bucket spans it.
    pub fn bucket_containing(&self, date: Date) -> Option<(DateRange, f64)> {
        self.bucket_ranges()
            .into_iter()
            .find(|(range, _)| range.contains(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_lookup_steps() {
        let mut cal = Calendar::new("capacity", 5.0);
        cal.set_value(Date(100), 10.0);
        cal.set_value(Date(200), 0.0);
        assert_eq!(cal.value_at(Date(50)), 5.0);
        assert_eq!(cal.value_at(Date(100)), 10.0);
        assert_eq!(cal.value_at(Date(150)), 10.0);
        assert_eq!(cal.value_at(Date(200)), 0.0);
        assert_eq!(cal.value_at(Date(10_000)), 0.0);
    }

    #[test]
    fn replacing_a_bucket_keeps_one_entry() {
        let mut cal = Calendar::new("min", 0.0);
        cal.set_value(Date(100), 1.0);
        cal.set_value(Date(100), 2.0);
        assert_eq!(cal.buckets().len(), 1);
        assert_eq!(cal.value_at(Date(100)), 2.0);
    }

    #[test]
    fn bucket_ranges_cover_horizon() {
        let mut cal = Calendar::new("weeks", 1.0);
        cal.set_value(Date(1_000_000_000), 1.0);
        let ranges = cal.bucket_ranges();
        assert_eq!(ranges.first().unwrap().0.start, INFINITE_PAST);
        assert_eq!(ranges.last().unwrap().0.end, INFINITE_FUTURE);
        assert_eq!(ranges.len(), 2);
    }
}
