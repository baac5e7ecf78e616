//! Derived metric records. Recomputed on demand, never persisted.

use crate::types::Segment;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fee applied to successful notional volume when estimating revenue.
///
/// A modeling assumption carried over from the dashboard ("based on 0.5% fees"),
/// not a measured or contractual rate.
pub const ESTIMATED_FEE_RATE: f64 = 0.005;

/// `failed / total`, or 0 for an empty group.
pub fn failure_rate(failed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64
    }
}

/// Performance of a single payment corridor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorMetric {
    pub corridor: String,
    pub total_transactions: u64,
    pub successful: u64,
    pub failed: u64,
    /// Fraction in 0.0..=1.0.
    pub failure_rate: f64,
    pub avg_amount: f64,
    pub total_value: f64,
    /// Successful volume times [`ESTIMATED_FEE_RATE`].
    pub revenue_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetric {
    pub segment: Segment,
    pub failure_rate: f64,
    pub avg_amount: f64,
    pub total_transactions: u64,
    pub failed: u64,
    /// Distinct users with at least one transaction (records without a user id are not counted).
    pub unique_users: u64,
    pub users_with_failures: u64,
}

/// One calendar day of activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMetric {
    pub date: NaiveDate,
    pub txn_count: u64,
    pub failure_rate: f64,
    pub successful: u64,
    pub failed: u64,
    pub total_value: f64,
}

/// Disjoint amount ranges; lower bound inclusive, upper bound exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AmountBracket {
    #[serde(rename = "<$1k")]
    Under1k,
    #[serde(rename = "$1k-$5k")]
    From1kTo5k,
    #[serde(rename = "$5k-$10k")]
    From5kTo10k,
    #[serde(rename = "$10k-$20k")]
    From10kTo20k,
    #[serde(rename = ">$20k")]
    Over20k,
}

impl AmountBracket {
    pub fn all() -> [AmountBracket; 5] {
        [
            AmountBracket::Under1k,
            AmountBracket::From1kTo5k,
            AmountBracket::From5kTo10k,
            AmountBracket::From10kTo20k,
            AmountBracket::Over20k,
        ]
    }

    pub fn for_amount(amount: f64) -> AmountBracket {
        if amount < 1_000.0 {
            AmountBracket::Under1k
        } else if amount < 5_000.0 {
            AmountBracket::From1kTo5k
        } else if amount < 10_000.0 {
            AmountBracket::From5kTo10k
        } else if amount < 20_000.0 {
            AmountBracket::From10kTo20k
        } else {
            AmountBracket::Over20k
        }
    }

    /// `(lower, upper)`; `None` upper means unbounded.
    pub fn bounds(&self) -> (f64, Option<f64>) {
        match self {
            AmountBracket::Under1k => (0.0, Some(1_000.0)),
            AmountBracket::From1kTo5k => (1_000.0, Some(5_000.0)),
            AmountBracket::From5kTo10k => (5_000.0, Some(10_000.0)),
            AmountBracket::From10kTo20k => (10_000.0, Some(20_000.0)),
            AmountBracket::Over20k => (20_000.0, None),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AmountBracket::Under1k => "<$1k",
            AmountBracket::From1kTo5k => "$1k-$5k",
            AmountBracket::From5kTo10k => "$5k-$10k",
            AmountBracket::From10kTo20k => "$10k-$20k",
            AmountBracket::Over20k => ">$20k",
        }
    }
}

impl fmt::Display for AmountBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountBracketMetric {
    pub bracket: AmountBracket,
    pub txn_count: u64,
    pub failure_rate: f64,
    pub avg_amount: f64,
}

/// Activity for one day of the week. `day_num` is 0 for Sunday through 6 for Saturday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayMetric {
    pub day_of_week: String,
    pub day_num: u32,
    pub txn_count: u64,
    pub failure_rate: f64,
    pub avg_amount: f64,
}

/// Headline figures for the dashboard KPI cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetric {
    pub total_transactions: u64,
    pub failed: u64,
    pub failure_rate: f64,
    pub total_value: f64,
    pub estimated_revenue: f64,
    pub corridor_count: u64,
}

/// A single corridor with its segment and amount breakdowns under the same filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorDeepDive {
    pub corridor: CorridorMetric,
    pub segments: Vec<SegmentMetric>,
    pub amounts: Vec<AmountBracketMetric>,
}

/// The computed figures behind an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum MetricPayload {
    Corridors(Vec<CorridorMetric>),
    Segments(Vec<SegmentMetric>),
    Trend(Vec<TrendMetric>),
    Amounts(Vec<AmountBracketMetric>),
    Weekdays(Vec<WeekdayMetric>),
    Summary(SummaryMetric),
    DeepDive(Box<CorridorDeepDive>),
}

impl MetricPayload {
    /// Number of rows, for logging.
    pub fn len(&self) -> usize {
        match self {
            MetricPayload::Corridors(rows) => rows.len(),
            MetricPayload::Segments(rows) => rows.len(),
            MetricPayload::Trend(rows) => rows.len(),
            MetricPayload::Amounts(rows) => rows.len(),
            MetricPayload::Weekdays(rows) => rows.len(),
            MetricPayload::Summary(_) | MetricPayload::DeepDive(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate_zero_total() {
        assert_eq!(failure_rate(0, 0), 0.0);
        assert!((failure_rate(3, 4) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_brackets_partition_the_domain() {
        let brackets = AmountBracket::all();
        assert_eq!(brackets[0].bounds().0, 0.0);
        for pair in brackets.windows(2) {
            // Each upper bound is the next lower bound: no gaps, no overlaps.
            assert_eq!(pair[0].bounds().1, Some(pair[1].bounds().0));
        }
        assert_eq!(brackets[4].bounds().1, None);
    }

    #[test]
    fn test_bracket_boundaries() {
        assert_eq!(AmountBracket::for_amount(999.99), AmountBracket::Under1k);
        assert_eq!(AmountBracket::for_amount(1_000.0), AmountBracket::From1kTo5k);
        assert_eq!(AmountBracket::for_amount(9_999.0), AmountBracket::From5kTo10k);
        assert_eq!(AmountBracket::for_amount(10_000.0), AmountBracket::From10kTo20k);
        assert_eq!(AmountBracket::for_amount(20_000.0), AmountBracket::Over20k);
    }

    #[test]
    fn test_bracket_serializes_as_label() {
        let json = serde_json::to_string(&AmountBracket::From1kTo5k).unwrap();
        assert_eq!(json, "\"$1k-$5k\"");
    }

    #[test]
    fn test_payload_tagging() {
        let payload = MetricPayload::Trend(Vec::new());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "trend");
        assert!(payload.is_empty());
    }
}
