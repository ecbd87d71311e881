//! Half-open date ranges.
//!
//! An [`Interval`] is `[start, end)` over calendar days with `start < end`.
//! Every node of the repair tree and every item carries one; the tree's
//! insertion logic is driven entirely by the [`Relation`] between two of them.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{RepairTreeError, Result};

/// A half-open range of days `[start, end)`.
///
/// Ordering is by `start`, then by `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "RawInterval")]
pub struct Interval {
    start: NaiveDate,
    end: NaiveDate,
}

/// How one interval sits relative to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// No shared day and no shared boundary.
    Disjoint,
    /// One ends exactly where the other starts.
    Adjacent,
    /// Same start and same end.
    Equal,
    /// `self` strictly or partially encloses `other` (shares at most one boundary).
    Contains,
    /// `self` lies inside `other` (shares at most one boundary).
    ContainedBy,
    /// Exactly one boundary of each lies strictly inside the other.
    Overlaps,
}

impl Interval {
    /// Create `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`RepairTreeError::InvalidInterval`] unless `start < end`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use repair_tree::Interval;
    ///
    /// let jan = Interval::new(
    ///     NaiveDate::from_ymd_opt(2014, 1, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2014, 2, 1).unwrap(),
    /// )
    /// .unwrap();
    /// assert_eq!(jan.days(), 31);
    /// ```
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(RepairTreeError::InvalidInterval(format!(
                "start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// `other` lies within `self` (boundaries may coincide).
    pub fn contains(&self, other: &Interval) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// `date` is a day covered by `self`.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// `date` lies strictly between the two boundaries, i.e. cutting there
    /// yields two non-empty pieces.
    pub fn is_cut_point(&self, date: NaiveDate) -> bool {
        date > self.start && date < self.end
    }

    /// At least one day is shared.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn is_adjacent(&self, other: &Interval) -> bool {
        self.end == other.start || other.end == self.start
    }

    pub fn relation(&self, other: &Interval) -> Relation {
        if self == other {
            Relation::Equal
        } else if self.is_adjacent(other) {
            Relation::Adjacent
        } else if !self.overlaps(other) {
            Relation::Disjoint
        } else if self.contains(other) {
            Relation::Contains
        } else if other.contains(self) {
            Relation::ContainedBy
        } else {
            Relation::Overlaps
        }
    }

    /// Shared days, if any.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Interval { start, end })
    }

    /// Cut at `date`, which must be a cut point.
    pub fn split_at(&self, date: NaiveDate) -> Option<(Interval, Interval)> {
        if !self.is_cut_point(date) {
            return None;
        }
        Some((
            Interval {
                start: self.start,
                end: date,
            },
            Interval {
                start: date,
                end: self.end,
            },
        ))
    }

    /// Smallest interval covering both.
    pub fn span(&self, other: &Interval) -> Interval {
        Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInterval {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl TryFrom<RawInterval> for Interval {
    type Error = RepairTreeError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Interval::new(raw.start_date, raw.end_date)
    }
}

impl From<Interval> for RawInterval {
    fn from(interval: Interval) -> Self {
        RawInterval {
            start_date: interval.start,
            end_date: interval.end,
        }
    }
}
