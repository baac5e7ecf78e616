//! Metric aggregation, question resolution, and reporting for corridor-lens.
//!
//! Computes corridor, segment, trend and amount metrics from the transaction store,
//! answers analyst questions over those metrics, and renders markdown dashboards.

pub mod aggregations;
pub mod intents;
pub mod reports;
pub mod resolver;

pub use aggregations::{DashboardSnapshot, MetricAggregator};
pub use reports::ReportGenerator;
pub use resolver::{IntentResolver, ResolvedQuery};
