//! Interval and gap utilities.

use chrono::{DateTime, TimeDelta, TimeZone, Timelike, Utc};

/// Floor an instant to the preceding :00 or :30 boundary.
///
/// The floor happens in the instant's own offset and the result keeps it.
pub fn start_of_most_recent_half_hour<Tz: TimeZone>(instant: &DateTime<Tz>) -> DateTime<Tz> {
    let past_boundary = TimeDelta::minutes(i64::from(instant.minute() % 30))
        + TimeDelta::seconds(i64::from(instant.second()))
        + TimeDelta::nanoseconds(i64::from(instant.nanosecond()));
    instant.clone() - past_boundary
}

/// A run of missing blocks, `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Gap {
    pub fn missing_blocks(&self, block: TimeDelta) -> i64 {
        if block <= TimeDelta::zero() {
            return 0;
        }
        (self.to - self.from).num_seconds() / block.num_seconds()
    }
}

/// Missing stretches in a series of block starts between `from` and `to`.
///
/// `starts` need not be sorted. Starts outside the window are ignored.
pub fn find_gaps(
    starts: &[DateTime<Utc>],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    block: TimeDelta,
) -> Vec<Gap> {
    let mut sorted: Vec<DateTime<Utc>> = starts
        .iter()
        .copied()
        .filter(|s| *s >= from && *s < to)
        .collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut gaps = Vec::new();
    let mut expected = from;
    for start in sorted {
        if start > expected {
            gaps.push(Gap {
                from: expected,
                to: start,
            });
        }
        expected = start + block;
    }
    if expected < to {
        gaps.push(Gap { from: expected, to });
    }
    gaps
}
