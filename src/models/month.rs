use std::fmt;

use chrono::{Datelike, NaiveDate};

/// A calendar month, the granularity at which the remote archive is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveMonth {
    year: i32,
    month: u32,
}

impl ArchiveMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of(day: NaiveDate) -> Self {
        Self {
            year: day.year(),
            month: day.month(),
        }
    }

    /// Parse a `yyyy-mm` string, as used for `epoch_month` in the config.
    pub fn parse(s: &str) -> Option<Self> {
        let (year, month) = s.split_once('-')?;
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    /// The month immediately before this one.
    pub fn pred(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    #[allow(dead_code)]
    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("month is in 1..=12")
    }

    /// The `yyyyMM` key the archive's month-index URL expects.
    pub fn key(self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for ArchiveMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
