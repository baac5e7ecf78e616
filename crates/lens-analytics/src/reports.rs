//! Markdown dashboard report and terminal summary.

use crate::aggregations::DashboardSnapshot;

/// Number of most recent days shown in the report's trend table.
const TREND_TAIL_DAYS: usize = 14;

/// Report generator for dashboard snapshots.
pub struct ReportGenerator;

impl ReportGenerator {
    /// Full markdown dashboard: KPIs, corridor and segment tables, amount brackets and
    /// the tail of the daily trend.
    pub fn dashboard_report(snapshot: &DashboardSnapshot) -> String {
        let mut report = String::new();

        report.push_str(&format!(
            "# Corridor Dashboard\n\n**{}**\n\n",
            snapshot.filter.describe()
        ));

        // KPIs.
        let s = &snapshot.summary;
        report.push_str("## Overview\n\n");
        report.push_str(&format!(
            "- **Transactions:** {}\n",
            format_count(s.total_transactions)
        ));
        report.push_str(&format!(
            "- **Failed:** {} ({})\n",
            format_count(s.failed),
            format_percent(s.failure_rate)
        ));
        report.push_str(&format!("- **Total Value:** {}\n", format_usd(s.total_value)));
        report.push_str(&format!(
            "- **Estimated Revenue:** {}\n",
            format_usd(s.estimated_revenue)
        ));
        report.push_str(&format!("- **Corridors:** {}\n\n", s.corridor_count));

        if snapshot.corridors.is_empty() {
            report.push_str("_No transactions match this filter._\n");
            return report;
        }

        report.push_str("## Corridors\n\n");
        report.push_str("| Corridor | Transactions | Failed | Failure Rate | Avg Amount | Revenue |\n");
        report.push_str("|----------|--------------|--------|--------------|------------|---------|\n");
        for c in &snapshot.corridors {
            report.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                c.corridor,
                format_count(c.total_transactions),
                format_count(c.failed),
                format_percent(c.failure_rate),
                format_usd(c.avg_amount),
                format_usd(c.revenue_usd),
            ));
        }
        report.push('\n');

        report.push_str("## Segments\n\n");
        report.push_str("| Segment | Transactions | Failure Rate | Avg Amount | Users | Users With Failures |\n");
        report.push_str("|---------|--------------|--------------|------------|-------|---------------------|\n");
        for seg in &snapshot.segments {
            report.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                seg.segment.label(),
                format_count(seg.total_transactions),
                format_percent(seg.failure_rate),
                format_usd(seg.avg_amount),
                format_count(seg.unique_users),
                format_count(seg.users_with_failures),
            ));
        }
        report.push('\n');

        report.push_str("## Amount Brackets\n\n");
        report.push_str("| Bracket | Transactions | Failure Rate | Avg Amount |\n");
        report.push_str("|---------|--------------|--------------|------------|\n");
        for a in &snapshot.amounts {
            report.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                a.bracket.label(),
                format_count(a.txn_count),
                format_percent(a.failure_rate),
                format_usd(a.avg_amount),
            ));
        }
        report.push('\n');

        let skip = snapshot.trend.len().saturating_sub(TREND_TAIL_DAYS);
        report.push_str("## Daily Trend\n\n");
        report.push_str("| Day | Transactions | Failed | Failure Rate | Value |\n");
        report.push_str("|-----|--------------|--------|--------------|-------|\n");
        for t in snapshot.trend.iter().skip(skip) {
            report.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                t.date.format("%Y-%m-%d"),
                format_count(t.txn_count),
                format_count(t.failed),
                format_percent(t.failure_rate),
                format_usd(t.total_value),
            ));
        }
        report.push('\n');

        report
    }

    /// Compact summary suitable for display in the terminal.
    pub fn text_summary(snapshot: &DashboardSnapshot) -> String {
        let mut output = String::new();
        let s = &snapshot.summary;

        output.push_str(&format!("  Scope: {}\n", snapshot.filter.describe()));
        if s.total_transactions == 0 {
            output.push_str("  No transactions\n");
            return output;
        }

        output.push_str(&format!(
            "  Transactions: {}  Failed: {} ({})\n",
            format_count(s.total_transactions),
            format_count(s.failed),
            format_percent(s.failure_rate)
        ));
        output.push_str(&format!(
            "  Value: {}  Est. revenue: {}\n",
            format_usd(s.total_value),
            format_usd(s.estimated_revenue)
        ));

        if let Some(worst) = snapshot
            .corridors
            .iter()
            .max_by(|a, b| a.failure_rate.total_cmp(&b.failure_rate))
        {
            output.push_str(&format!(
                "  Highest failure rate: {} ({})\n",
                worst.corridor,
                format_percent(worst.failure_rate)
            ));
        }

        let top: Vec<_> = snapshot.corridors.iter().take(5).collect();
        if !top.is_empty() {
            output.push_str("  Busiest corridors:");
            for c in top {
                output.push_str(&format!(" {}({})", c.corridor, format_count(c.total_transactions)));
            }
            output.push('\n');
        }

        output
    }
}

/// `0.75` → `75.0%`.
pub fn format_percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// Whole count with thousands separators.
pub fn format_count(n: u64) -> String {
    group_thousands(&n.to_string())
}

/// Dollar amount with thousands separators and cents.
pub fn format_usd(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!(
        "{}${}.{:02}",
        sign,
        group_thousands(&(cents / 100).to_string()),
        cents % 100
    )
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregations::tests::scenario_a;
    use crate::aggregations::MetricAggregator;
    use lens_core::store::InMemoryStore;
    use lens_core::types::QueryFilter;
    use std::sync::Arc;

    async fn snapshot(filter: QueryFilter) -> DashboardSnapshot {
        MetricAggregator::new(Arc::new(InMemoryStore::new(scenario_a())))
            .compute_dashboard(&filter)
            .await
            .unwrap()
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_percent(0.75), "75.0%");
        assert_eq!(format_percent(0.0), "0.0%");
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_234_567), "1,234,567");
        assert_eq!(format_usd(24_000.0), "$24,000.00");
        assert_eq!(format_usd(5.0), "$5.00");
        assert_eq!(format_usd(1234.567), "$1,234.57");
    }

    #[tokio::test]
    async fn test_dashboard_report_structure() {
        let report = ReportGenerator::dashboard_report(&snapshot(QueryFilter::all()).await);
        assert!(report.contains("# Corridor Dashboard"));
        assert!(report.contains("## Overview"));
        assert!(report.contains("## Corridors"));
        assert!(report.contains("## Segments"));
        assert!(report.contains("## Amount Brackets"));
        assert!(report.contains("## Daily Trend"));
        assert!(report.contains("| USD_MXN | 4 | 3 | 75.0% |"));
        assert!(report.contains("| 2025-12-03 |"));
    }

    #[tokio::test]
    async fn test_empty_dashboard_report() {
        let report = ReportGenerator::dashboard_report(
            &snapshot(QueryFilter::for_corridor("EUR_BRL")).await,
        );
        assert!(report.contains("- **Transactions:** 0"));
        assert!(report.contains("No transactions match"));
        assert!(!report.contains("## Corridors"));
    }

    #[tokio::test]
    async fn test_text_summary() {
        let summary = ReportGenerator::text_summary(&snapshot(QueryFilter::all()).await);
        assert!(summary.contains("Transactions: 10"));
        assert!(summary.contains("Highest failure rate: USD_MXN (75.0%)"));
        assert!(summary.contains("USD_COP(6)"));
    }

    #[tokio::test]
    async fn test_empty_text_summary() {
        let summary =
            ReportGenerator::text_summary(&snapshot(QueryFilter::for_corridor("EUR_BRL")).await);
        assert!(summary.contains("No transactions"));
    }
}
