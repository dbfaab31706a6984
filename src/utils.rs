use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;

static QUARTER_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Q([1-4])[\s\-_/']*(?:FY)?(\d{4}|\d{2})$").expect("valid quarter regex")
});
static YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:FY|CY)?[\s\-_/']*(\d{4}|\d{2})[\s\-_/']*Q([1-4])$")
        .expect("valid quarter regex")
});

/// Date layouts a spreadsheet export may use for a quarter column.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%b-%Y"];

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

/// A parsed quarter label such as `Q1-24` or `2024 Q1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuarterLabel {
    pub year: i32,
    pub quarter: u32,
}

impl QuarterLabel {
    /// Accepts `Q1-24`, `Q1 2024`, `Q1'24`, `2024-Q1`, `24Q1` and `FY24 Q1`, ignoring case.
    /// Two-digit years are read as 20xx. Calendar dates such as `2024-03-31` map to the
    /// quarter containing them.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        let (year, quarter) = if let Some(caps) = QUARTER_FIRST.captures(label) {
            (caps.get(2)?.as_str(), caps.get(1)?.as_str())
        } else if let Some(caps) = YEAR_FIRST.captures(label) {
            (caps.get(1)?.as_str(), caps.get(2)?.as_str())
        } else {
            return Self::from_date_label(label);
        };

        let mut year: i32 = year.parse().ok()?;
        if year < 100 {
            year += 2000;
        }
        Some(Self {
            year,
            quarter: quarter.parse().ok()?,
        })
    }

    fn from_date_label(label: &str) -> Option<Self> {
        let date = DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(label, format).ok())?;
        Some(Self::containing(date))
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            quarter: (date.month() - 1) / 3 + 1,
        }
    }

    /// Last calendar day of the quarter.
    pub fn end_date(&self) -> Option<NaiveDate> {
        last_day_of_month(self.year, self.quarter * 3)
    }
}

/// Quarter-end date of a period label, if it names a quarter or a date.
pub fn period_end_date(label: &str) -> Option<NaiveDate> {
    QuarterLabel::parse(label)?.end_date()
}

/// Sorts period labels by quarter-end date. Labels that are not recognizable quarters keep
/// their relative order and go after the recognized ones.
pub fn sort_periods(periods: &mut [String]) {
    periods.sort_by(|a, b| match (period_end_date(a), period_end_date(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Lazy Cartesian product over value sets; the first set varies slowest.
///
/// Empty sets are skipped rather than collapsing the whole product. Clone the iterator
/// (or call [`CartesianProduct::reset`]) to walk the sequence again.
#[derive(Debug, Clone)]
pub struct CartesianProduct<'a, T> {
    sets: Vec<&'a [T]>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl<'a, T> CartesianProduct<'a, T> {
    pub fn new<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = &'a [T]>,
    {
        let sets: Vec<&'a [T]> = sets.into_iter().filter(|set| !set.is_empty()).collect();
        let indices = vec![0; sets.len()];
        let exhausted = sets.is_empty();
        Self {
            sets,
            indices,
            exhausted,
        }
    }

    pub fn reset(&mut self) {
        self.indices.iter_mut().for_each(|i| *i = 0);
        self.exhausted = self.sets.is_empty();
    }

    /// Total number of combinations.
    pub fn combination_count(&self) -> usize {
        if self.sets.is_empty() {
            0
        } else {
            self.sets.iter().map(|set| set.len()).product()
        }
    }
}

impl<'a, T> Iterator for CartesianProduct<'a, T> {
    type Item = Vec<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let combination = self
            .sets
            .iter()
            .zip(&self.indices)
            .map(|(set, &i)| &set[i])
            .collect();

        // Odometer step: the last set turns fastest.
        let mut position = self.sets.len();
        loop {
            if position == 0 {
                self.exhausted = true;
                break;
            }
            position -= 1;
            self.indices[position] += 1;
            if self.indices[position] < self.sets[position].len() {
                break;
            }
            self.indices[position] = 0;
        }

        Some(combination)
    }
}
