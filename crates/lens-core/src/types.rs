use crate::metrics::MetricPayload;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A single payment record, as supplied by the transaction store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Currency pair key, e.g. `USD_MXN` (source first).
    pub corridor: String,
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    pub segment: Segment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        id: impl Into<String>,
        corridor: impl Into<String>,
        amount: f64,
        status: TransactionStatus,
        segment: Segment,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let corridor = corridor.into();
        let currency = corridor
            .split('_')
            .next()
            .filter(|c| !c.is_empty())
            .unwrap_or("USD")
            .to_string();
        Self {
            id: id.into(),
            corridor,
            amount,
            currency,
            status,
            segment,
            user_id: None,
            timestamp,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn is_successful(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TransactionStatus::Failed
    }

    /// Source and target currency of the corridor, when the key is a `SRC_DST` pair.
    pub fn corridor_pair(&self) -> Option<(&str, &str)> {
        let (src, dst) = self.corridor.split_once('_')?;
        if src.is_empty() || dst.is_empty() {
            return None;
        }
        Some((src, dst))
    }

    /// Check the record-level invariants. Returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.corridor.trim().is_empty() {
            return Err(format!("transaction {} has an empty corridor", self.id));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(format!(
                "transaction {} has non-positive amount {}",
                self.id, self.amount
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[serde(alias = "success")]
    Completed,
    Initiated,
    #[serde(alias = "pending-approval")]
    PendingApproval,
    Processing,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Enterprise,
    Sme,
    Retail,
}

impl Segment {
    pub fn all() -> [Segment; 3] {
        [Segment::Enterprise, Segment::Sme, Segment::Retail]
    }

    pub fn key(&self) -> &'static str {
        match self {
            Segment::Enterprise => "enterprise",
            Segment::Sme => "sme",
            Segment::Retail => "retail",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Segment::Enterprise => "Enterprise",
            Segment::Sme => "SME",
            Segment::Retail => "Retail",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical form of a corridor key: upper-case, `_`-separated.
///
/// Accepts `usd_mxn`, `USD-MXN`, `usd mxn`, `USD→MXN` and `USD/MXN`.
pub fn normalize_corridor(raw: &str) -> String {
    raw.trim()
        .split(|c: char| c == '_' || c == '-' || c == '/' || c == '→' || c == '>' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Time window relative to the dataset's reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl TimeWindow {
    pub fn days(&self) -> Option<i64> {
        match self {
            TimeWindow::Last7Days => Some(7),
            TimeWindow::Last30Days => Some(30),
            TimeWindow::All => None,
        }
    }

    /// First calendar day included by the window, counting the reference day itself.
    pub fn start_date(&self, reference: NaiveDate) -> Option<NaiveDate> {
        self.days().map(|d| reference - Duration::days(d - 1))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Last7Days => "7d",
            TimeWindow::Last30Days => "30d",
            TimeWindow::All => "all",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "7d" | "7" | "week" => Ok(TimeWindow::Last7Days),
            "30d" | "30" | "month" => Ok(TimeWindow::Last30Days),
            "all" | "" => Ok(TimeWindow::All),
            other => Err(format!("unknown time window '{}', expected 7d, 30d or all", other)),
        }
    }
}

/// Filter applied to the transaction set before aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corridor: Option<String>,
    #[serde(default)]
    pub window: TimeWindow,
}

impl QueryFilter {
    /// No corridor selector, whole history.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_corridor(corridor: &str) -> Self {
        Self {
            corridor: Some(normalize_corridor(corridor)),
            window: TimeWindow::All,
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_corridor(mut self, corridor: Option<&str>) -> Self {
        self.corridor = corridor
            .map(normalize_corridor)
            .filter(|c| !c.is_empty());
        self
    }

    /// Same filter with the corridor selector dropped.
    pub fn without_corridor(&self) -> Self {
        Self {
            corridor: None,
            window: self.window,
        }
    }

    pub fn describe(&self) -> String {
        let corridor = self.corridor.as_deref().unwrap_or("todos los corredores");
        let window = match self.window {
            TimeWindow::Last7Days => "últimos 7 días",
            TimeWindow::Last30Days => "últimos 30 días",
            TimeWindow::All => "todo el histórico",
        };
        format!("{}, {}", corridor, window)
    }
}

/// Apply a filter to a snapshot.
///
/// Windows are anchored at `reference_date`, or at the latest transaction date in the
/// snapshot when none is configured.
pub fn select_transactions(
    transactions: &[Transaction],
    filter: &QueryFilter,
    reference_date: Option<NaiveDate>,
) -> Vec<Transaction> {
    let anchor = reference_date.or_else(|| transactions.iter().map(|t| t.date()).max());
    let window_start = anchor.and_then(|a| filter.window.start_date(a));
    let wanted = filter.corridor.as_deref().map(normalize_corridor);

    transactions
        .iter()
        .filter(|t| match &wanted {
            Some(c) => normalize_corridor(&t.corridor) == *c,
            None => true,
        })
        .filter(|t| match (window_start, anchor) {
            (Some(start), Some(end)) => {
                let d = t.date();
                d >= start && d <= end
            }
            _ => true,
        })
        .cloned()
        .collect()
}

/// Closed set of questions the assistant knows how to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    WorstCorridor,
    CorridorRanking,
    VolumeTrend,
    SegmentFailures,
    AmountDistribution,
    WeekdayPattern,
    Overview,
    CorridorDeepDive,
}

impl Intent {
    /// All intents, in tie-break priority order.
    pub fn all() -> &'static [Intent] {
        &[
            Intent::WorstCorridor,
            Intent::CorridorDeepDive,
            Intent::VolumeTrend,
            Intent::SegmentFailures,
            Intent::AmountDistribution,
            Intent::WeekdayPattern,
            Intent::CorridorRanking,
            Intent::Overview,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            Intent::WorstCorridor => "worst_corridor",
            Intent::CorridorRanking => "corridor_ranking",
            Intent::VolumeTrend => "volume_trend",
            Intent::SegmentFailures => "segment_failures",
            Intent::AmountDistribution => "amount_distribution",
            Intent::WeekdayPattern => "weekday_pattern",
            Intent::Overview => "overview",
            Intent::CorridorDeepDive => "corridor_deep_dive",
        }
    }

    pub fn from_id(id: &str) -> Option<Intent> {
        let id = id.trim();
        Intent::all().iter().copied().find(|i| i.id() == id)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Intent::WorstCorridor => "corridor with the highest failure rate",
            Intent::CorridorRanking => "all corridors ranked by volume",
            Intent::VolumeTrend => "transaction volume over time",
            Intent::SegmentFailures => "failures broken down by user segment",
            Intent::AmountDistribution => "failure rate by amount bracket",
            Intent::WeekdayPattern => "volume and failures by day of week",
            Intent::Overview => "headline KPIs and estimated revenue",
            Intent::CorridorDeepDive => "detailed analysis of a single corridor",
        }
    }

    /// Whether the intent compares corridors, so a carried-over corridor selector is dropped.
    pub fn spans_corridors(&self) -> bool {
        matches!(self, Intent::WorstCorridor | Intent::CorridorRanking)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Provenance of an answer: which intent and filter produced which figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTrace {
    pub intent: Intent,
    pub filter: QueryFilter,
    pub result: MetricPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in a conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<QueryTrace>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            trace: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            trace: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant_with_trace(content: impl Into<String>, trace: QueryTrace) -> Self {
        Self {
            trace: Some(trace),
            ..Self::assistant(content)
        }
    }
}
