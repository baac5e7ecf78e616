//! Corridor, segment, trend and amount-bracket aggregations.
//!
//! Every view is a pure function of the filtered transaction set. The async
//! [`MetricAggregator`] only fetches that set from the store and hands it to the pure
//! functions below, so the dashboard and the assistant always see identical figures for
//! identical filters.

use chrono::{Datelike, NaiveDate};
use lens_core::error::{LensError, Result};
use lens_core::metrics::{
    failure_rate, AmountBracket, AmountBracketMetric, CorridorDeepDive, CorridorMetric,
    SegmentMetric, SummaryMetric, TrendMetric, WeekdayMetric, ESTIMATED_FEE_RATE,
};
use lens_core::store::TransactionStore;
use lens_core::types::{normalize_corridor, QueryFilter, Segment, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Running counts for one group.
#[derive(Debug, Clone, Default)]
struct Tally {
    total: u64,
    successful: u64,
    failed: u64,
    volume: f64,
    successful_volume: f64,
}

impl Tally {
    fn add(&mut self, tx: &Transaction) {
        self.total += 1;
        self.volume += tx.amount;
        if tx.is_successful() {
            self.successful += 1;
            self.successful_volume += tx.amount;
        } else if tx.is_failed() {
            self.failed += 1;
        }
    }

    fn failure_rate(&self) -> f64 {
        failure_rate(self.failed, self.total)
    }

    fn avg_amount(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.volume / self.total as f64
        }
    }

    fn revenue(&self) -> f64 {
        self.successful_volume * ESTIMATED_FEE_RATE
    }

    /// Reject groups that break the derived-metric invariants.
    fn verify(&self, scope: &str) -> Result<()> {
        if self.successful + self.failed > self.total {
            return Err(violation(format!(
                "{}: successful ({}) + failed ({}) exceeds total ({})",
                scope, self.successful, self.failed, self.total
            )));
        }
        let rate = self.failure_rate();
        if !(0.0..=1.0).contains(&rate) {
            return Err(violation(format!("{}: failure rate {} out of range", scope, rate)));
        }
        if self.total > 0 && !(self.avg_amount().is_finite() && self.avg_amount() > 0.0) {
            return Err(violation(format!(
                "{}: average amount {} is not positive",
                scope,
                self.avg_amount()
            )));
        }
        Ok(())
    }
}

fn violation(message: String) -> LensError {
    error!("Aggregation invariant violated: {}", message);
    LensError::AggregationInvariantViolation(message)
}

/// Check record-level invariants before any figure is derived.
pub fn validate_transactions(transactions: &[Transaction]) -> Result<()> {
    for tx in transactions {
        tx.validate().map_err(violation)?;
    }
    Ok(())
}

/// Per-corridor performance, busiest corridor first.
pub fn corridor_metrics(transactions: &[Transaction]) -> Result<Vec<CorridorMetric>> {
    let mut groups: HashMap<String, Tally> = HashMap::new();
    for tx in transactions {
        groups
            .entry(normalize_corridor(&tx.corridor))
            .or_default()
            .add(tx);
    }

    let mut metrics = Vec::with_capacity(groups.len());
    for (corridor, tally) in groups {
        tally.verify(&corridor)?;
        metrics.push(corridor_metric(corridor, &tally));
    }
    metrics.sort_by(|a, b| {
        b.total_transactions
            .cmp(&a.total_transactions)
            .then_with(|| a.corridor.cmp(&b.corridor))
    });
    Ok(metrics)
}

fn corridor_metric(corridor: String, tally: &Tally) -> CorridorMetric {
    CorridorMetric {
        corridor,
        total_transactions: tally.total,
        successful: tally.successful,
        failed: tally.failed,
        failure_rate: tally.failure_rate(),
        avg_amount: tally.avg_amount(),
        total_value: tally.volume,
        revenue_usd: tally.revenue(),
    }
}

/// Per-segment distribution, largest segment first.
pub fn segment_metrics(transactions: &[Transaction]) -> Result<Vec<SegmentMetric>> {
    #[derive(Default)]
    struct SegmentGroup<'a> {
        tally: Tally,
        users: HashSet<&'a str>,
        failing_users: HashSet<&'a str>,
    }

    let mut groups: HashMap<Segment, SegmentGroup> = HashMap::new();
    for tx in transactions {
        let group = groups.entry(tx.segment).or_default();
        group.tally.add(tx);
        if let Some(user) = tx.user_id.as_deref() {
            group.users.insert(user);
            if tx.is_failed() {
                group.failing_users.insert(user);
            }
        }
    }

    let mut metrics = Vec::with_capacity(groups.len());
    for (segment, group) in groups {
        group.tally.verify(segment.key())?;
        metrics.push(SegmentMetric {
            segment,
            failure_rate: group.tally.failure_rate(),
            avg_amount: group.tally.avg_amount(),
            total_transactions: group.tally.total,
            failed: group.tally.failed,
            unique_users: group.users.len() as u64,
            users_with_failures: group.failing_users.len() as u64,
        });
    }

    let counted: u64 = metrics.iter().map(|m| m.total_transactions).sum();
    if counted != transactions.len() as u64 {
        return Err(violation(format!(
            "segment totals ({}) do not add up to the filtered set ({})",
            counted,
            transactions.len()
        )));
    }

    metrics.sort_by(|a, b| {
        b.total_transactions
            .cmp(&a.total_transactions)
            .then_with(|| a.segment.cmp(&b.segment))
    });
    Ok(metrics)
}

/// Daily activity, oldest day first.
pub fn daily_trend(transactions: &[Transaction]) -> Result<Vec<TrendMetric>> {
    let mut days: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    for tx in transactions {
        days.entry(tx.date()).or_default().add(tx);
    }

    days.into_iter()
        .map(|(date, tally)| {
            tally.verify(&date.to_string())?;
            Ok(TrendMetric {
                date,
                txn_count: tally.total,
                failure_rate: tally.failure_rate(),
                successful: tally.successful,
                failed: tally.failed,
                total_value: tally.volume,
            })
        })
        .collect()
}

/// Non-empty amount brackets, smallest bracket first.
pub fn amount_distribution(transactions: &[Transaction]) -> Result<Vec<AmountBracketMetric>> {
    let mut brackets: BTreeMap<AmountBracket, Tally> = BTreeMap::new();
    for tx in transactions {
        brackets
            .entry(AmountBracket::for_amount(tx.amount))
            .or_default()
            .add(tx);
    }

    brackets
        .into_iter()
        .map(|(bracket, tally)| {
            tally.verify(bracket.label())?;
            Ok(AmountBracketMetric {
                bracket,
                txn_count: tally.total,
                failure_rate: tally.failure_rate(),
                avg_amount: tally.avg_amount(),
            })
        })
        .collect()
}

/// Activity by day of week, Sunday first.
pub fn weekday_pattern(transactions: &[Transaction]) -> Result<Vec<WeekdayMetric>> {
    let mut days: BTreeMap<u32, Tally> = BTreeMap::new();
    for tx in transactions {
        days.entry(tx.date().weekday().num_days_from_sunday())
            .or_default()
            .add(tx);
    }

    days.into_iter()
        .map(|(day_num, tally)| {
            let name = WEEKDAY_NAMES[day_num as usize % 7];
            tally.verify(name)?;
            Ok(WeekdayMetric {
                day_of_week: name.to_string(),
                day_num,
                txn_count: tally.total,
                failure_rate: tally.failure_rate(),
                avg_amount: tally.avg_amount(),
            })
        })
        .collect()
}

/// Headline KPIs over the whole filtered set.
pub fn summary(transactions: &[Transaction]) -> Result<SummaryMetric> {
    let mut tally = Tally::default();
    let mut corridors = HashSet::new();
    for tx in transactions {
        tally.add(tx);
        corridors.insert(normalize_corridor(&tx.corridor));
    }
    tally.verify("summary")?;

    Ok(SummaryMetric {
        total_transactions: tally.total,
        failed: tally.failed,
        failure_rate: tally.failure_rate(),
        total_value: tally.volume,
        estimated_revenue: tally.revenue(),
        corridor_count: corridors.len() as u64,
    })
}

/// All dashboard views computed from a single fetch of the filtered set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub filter: QueryFilter,
    pub summary: SummaryMetric,
    pub corridors: Vec<CorridorMetric>,
    pub segments: Vec<SegmentMetric>,
    pub trend: Vec<TrendMetric>,
    pub amounts: Vec<AmountBracketMetric>,
}

/// Stateless aggregation front-end over a transaction store.
///
/// Safe to share across sessions and request handlers; it never mutates the store.
#[derive(Clone)]
pub struct MetricAggregator {
    store: Arc<dyn TransactionStore>,
}

impl MetricAggregator {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Fetch and validate the filtered set. Store failures surface as `DataUnavailable`.
    async fn load(&self, filter: &QueryFilter) -> Result<Vec<Transaction>> {
        let transactions = self
            .store
            .list_transactions(filter)
            .await
            .map_err(|e| match e {
                LensError::DataUnavailable(_) => e,
                other => LensError::DataUnavailable(other.to_string()),
            })?;
        validate_transactions(&transactions)?;
        debug!("Aggregating {} transactions for {:?}", transactions.len(), filter);
        Ok(transactions)
    }

    pub async fn compute_corridor_metrics(&self, filter: &QueryFilter) -> Result<Vec<CorridorMetric>> {
        corridor_metrics(&self.load(filter).await?)
    }

    pub async fn compute_segment_metrics(&self, filter: &QueryFilter) -> Result<Vec<SegmentMetric>> {
        segment_metrics(&self.load(filter).await?)
    }

    pub async fn compute_trend(&self, filter: &QueryFilter) -> Result<Vec<TrendMetric>> {
        daily_trend(&self.load(filter).await?)
    }

    pub async fn compute_amount_distribution(
        &self,
        filter: &QueryFilter,
    ) -> Result<Vec<AmountBracketMetric>> {
        amount_distribution(&self.load(filter).await?)
    }

    pub async fn compute_weekday_pattern(&self, filter: &QueryFilter) -> Result<Vec<WeekdayMetric>> {
        weekday_pattern(&self.load(filter).await?)
    }

    pub async fn compute_summary(&self, filter: &QueryFilter) -> Result<SummaryMetric> {
        summary(&self.load(filter).await?)
    }

    /// One corridor with its segment and amount breakdowns, from the same filtered set.
    ///
    /// The corridor in `filter` is required; a corridor with no matching transactions
    /// yields an all-zero metric.
    pub async fn compute_deep_dive(&self, filter: &QueryFilter) -> Result<CorridorDeepDive> {
        let corridor = filter
            .corridor
            .clone()
            .ok_or_else(|| LensError::InvalidInput("deep dive requires a corridor".into()))?;
        let transactions = self.load(filter).await?;

        let metric = corridor_metrics(&transactions)?
            .into_iter()
            .next()
            .unwrap_or_else(|| corridor_metric(normalize_corridor(&corridor), &Tally::default()));

        Ok(CorridorDeepDive {
            corridor: metric,
            segments: segment_metrics(&transactions)?,
            amounts: amount_distribution(&transactions)?,
        })
    }

    /// Every dashboard view from one consistent fetch.
    pub async fn compute_dashboard(&self, filter: &QueryFilter) -> Result<DashboardSnapshot> {
        let transactions = self.load(filter).await?;
        Ok(DashboardSnapshot {
            filter: filter.clone(),
            summary: summary(&transactions)?,
            corridors: corridor_metrics(&transactions)?,
            segments: segment_metrics(&transactions)?,
            trend: daily_trend(&transactions)?,
            amounts: amount_distribution(&transactions)?,
        })
    }

    /// Corridor keys present in the store, the resolver's vocabulary.
    pub async fn known_corridors(&self) -> Result<Vec<String>> {
        self.store.corridors().await.map_err(|e| match e {
            LensError::DataUnavailable(_) => e,
            other => LensError::DataUnavailable(other.to_string()),
        })
    }
}
