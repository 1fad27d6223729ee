//! FILENAME: query-runtime/src/months.rs
//! Calendar-month partition keys (`"YYYY-MM"`) and range splitting.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One calendar month. Orders chronologically; `key()` is the partition
/// key the cache stores it under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(YearMonth { year, month })
        } else {
            None
        }
    }

    /// Parses a `"YYYY-MM"` partition key.
    pub fn parse(key: &str) -> Option<Self> {
        let (year, month) = key.split_once('-')?;
        YearMonth::new(year.parse().ok()?, month.parse().ok()?)
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            YearMonth {
                year: self.year + 1,
                month: 1,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.next().first_day()?.pred_opt()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// An inclusive month range. `new` normalizes a reversed pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonthRange {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl MonthRange {
    pub fn new(a: YearMonth, b: YearMonth) -> Self {
        if a <= b {
            MonthRange { start: a, end: b }
        } else {
            MonthRange { start: b, end: a }
        }
    }

    pub fn single(month: YearMonth) -> Self {
        MonthRange {
            start: month,
            end: month,
        }
    }

    /// Every month of the range in chronological order.
    pub fn months(&self) -> Vec<YearMonth> {
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            out.push(cursor);
            cursor = cursor.next();
        }
        out
    }

    /// Fetch order: most recent months first.
    pub fn months_recent_first(&self) -> Vec<YearMonth> {
        let mut months = self.months();
        months.reverse();
        months
    }

    pub fn keys(&self) -> Vec<String> {
        self.months().iter().map(YearMonth::key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_partition_keys() {
        let ym = YearMonth::parse("2024-03").unwrap();
        assert_eq!(ym, YearMonth::new(2024, 3).unwrap());
        assert_eq!(ym.key(), "2024-03");
        assert!(YearMonth::parse("2024-13").is_none());
        assert!(YearMonth::parse("2024").is_none());
    }

    #[test]
    fn ranges_split_across_year_boundaries() {
        let range = MonthRange::new(
            YearMonth::new(2023, 11).unwrap(),
            YearMonth::new(2024, 2).unwrap(),
        );
        assert_eq!(range.keys(), vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
        assert_eq!(
            range.months_recent_first()[0],
            YearMonth::new(2024, 2).unwrap()
        );
    }

    #[test]
    fn reversed_bounds_normalize() {
        let range = MonthRange::new(
            YearMonth::new(2024, 5).unwrap(),
            YearMonth::new(2024, 3).unwrap(),
        );
        assert_eq!(range.keys(), vec!["2024-03", "2024-04", "2024-05"]);
    }

    #[test]
    fn month_day_bounds() {
        let feb = YearMonth::new(2024, 2).unwrap();
        assert_eq!(
            feb.first_day(),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
        assert_eq!(feb.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(YearMonth::new(2024, 12).unwrap().next().key(), "2025-01");
    }
}
