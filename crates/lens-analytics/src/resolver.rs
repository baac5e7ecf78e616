//! Question → intent → metrics → templated answer.

use crate::aggregations::MetricAggregator;
use crate::intents::{match_intent, QuestionTerms};
use crate::reports::{format_count, format_percent, format_usd};
use async_trait::async_trait;
use chrono::Datelike;
use lens_core::classifier::{IntentClassifier, OpenAiClassifier};
use lens_core::config::ClassifierConfig;
use lens_core::error::Result;
use lens_core::metrics::{
    AmountBracketMetric, CorridorDeepDive, CorridorMetric, MetricPayload, SegmentMetric,
    SummaryMetric, TrendMetric, WeekdayMetric, ESTIMATED_FEE_RATE,
};
use lens_core::resolver::{QueryResolver, Resolution};
use lens_core::types::{Intent, QueryFilter, QueryTrace, Segment};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const WEEKDAYS_ES: [&str; 7] = [
    "domingo",
    "lunes",
    "martes",
    "miércoles",
    "jueves",
    "viernes",
    "sábado",
];

/// An interpreted question: what to compute and over which slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub intent: Intent,
    pub filter: QueryFilter,
    /// Segment named in the question, used to focus the answer text.
    pub segment: Option<Segment>,
}

/// Keyword resolver over a [`MetricAggregator`], with an optional model fallback.
pub struct IntentResolver {
    aggregator: MetricAggregator,
    classifier: Option<Arc<dyn IntentClassifier>>,
    classifier_timeout: Duration,
}

impl IntentResolver {
    pub fn new(aggregator: MetricAggregator) -> Self {
        Self {
            aggregator,
            classifier: None,
            classifier_timeout: Duration::from_secs(5),
        }
    }

    /// Resolver with the model classifier attached when `config.enabled`.
    pub fn from_config(aggregator: MetricAggregator, config: &ClassifierConfig) -> Self {
        let resolver = Self::new(aggregator);
        if !config.enabled {
            return resolver;
        }
        info!("Intent classifier enabled: {} at {}", config.model, config.api_base);
        resolver.with_classifier(
            Arc::new(OpenAiClassifier::new(config)),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Consult `classifier` when no keyword matches.
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>, timeout: Duration) -> Self {
        self.classifier = Some(classifier);
        self.classifier_timeout = timeout;
        self
    }

    pub fn aggregator(&self) -> &MetricAggregator {
        &self.aggregator
    }

    /// Map a question onto an intent and a filter, or `None` if nothing matches.
    ///
    /// Corridor and window named in the question override `context`; anything not named
    /// is carried over, except that cross-corridor intents never keep a corridor.
    pub async fn interpret(&self, question: &str, context: &QueryFilter) -> Result<Option<ResolvedQuery>> {
        let known = self.aggregator.known_corridors().await?;
        let terms = QuestionTerms::extract(question, &known);

        let intent = match match_intent(&terms) {
            Some(intent) => Some(intent),
            None => self.classify_fallback(question).await,
        };
        let Some(intent) = intent else {
            debug!("No intent matched {:?}", terms.normalized);
            return Ok(None);
        };

        let mut filter = context.clone();
        if let Some(window) = terms.window {
            filter.window = window;
        }
        if let Some(corridor) = terms.corridor.as_deref() {
            filter = filter.with_corridor(Some(corridor));
        }
        if intent.spans_corridors() {
            filter = filter.without_corridor();
        }

        Ok(Some(ResolvedQuery {
            intent,
            filter,
            segment: terms.segment,
        }))
    }

    async fn classify_fallback(&self, question: &str) -> Option<Intent> {
        let classifier = self.classifier.as_ref()?;
        match tokio::time::timeout(
            self.classifier_timeout,
            classifier.classify(question, Intent::all()),
        )
        .await
        {
            Ok(Ok(intent)) => {
                debug!("Classifier picked {:?}", intent);
                intent
            }
            Ok(Err(e)) => {
                warn!("Intent classifier failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Intent classifier timed out after {:?}", self.classifier_timeout);
                None
            }
        }
    }

    /// Compute the figures for an interpreted question and render the answer.
    pub async fn answer(&self, query: &ResolvedQuery) -> Result<Resolution> {
        let filter = &query.filter;
        let scope = filter.describe();
        let agg = &self.aggregator;

        let (text, result) = match query.intent {
            Intent::WorstCorridor => {
                let rows = agg.compute_corridor_metrics(filter).await?;
                (render_worst_corridor(&rows, &scope), MetricPayload::Corridors(rows))
            }
            Intent::CorridorRanking => {
                let rows = agg.compute_corridor_metrics(filter).await?;
                (render_ranking(&rows, &scope), MetricPayload::Corridors(rows))
            }
            Intent::VolumeTrend => {
                let rows = agg.compute_trend(filter).await?;
                (render_trend(&rows, &scope), MetricPayload::Trend(rows))
            }
            Intent::SegmentFailures => {
                let rows = agg.compute_segment_metrics(filter).await?;
                (
                    render_segments(&rows, query.segment, &scope),
                    MetricPayload::Segments(rows),
                )
            }
            Intent::AmountDistribution => {
                let rows = agg.compute_amount_distribution(filter).await?;
                (render_amounts(&rows, &scope), MetricPayload::Amounts(rows))
            }
            Intent::WeekdayPattern => {
                let rows = agg.compute_weekday_pattern(filter).await?;
                (render_weekdays(&rows, &scope), MetricPayload::Weekdays(rows))
            }
            Intent::Overview => {
                let summary = agg.compute_summary(filter).await?;
                (render_overview(&summary, &scope), MetricPayload::Summary(summary))
            }
            Intent::CorridorDeepDive => {
                if filter.corridor.is_none() {
                    let known = agg.known_corridors().await?;
                    return Ok(Resolution::Unresolved {
                        clarification: corridor_clarification(&known),
                    });
                }
                let dive = agg.compute_deep_dive(filter).await?;
                (render_deep_dive(&dive, &scope), MetricPayload::DeepDive(Box::new(dive)))
            }
        };

        info!(
            "Answered {} over {} ({} rows)",
            query.intent,
            scope,
            result.len()
        );
        Ok(Resolution::Answered {
            text,
            trace: QueryTrace {
                intent: query.intent,
                filter: filter.clone(),
                result,
            },
        })
    }
}

#[async_trait]
impl QueryResolver for IntentResolver {
    async fn resolve(&self, question: &str, context: &QueryFilter) -> Result<Resolution> {
        match self.interpret(question, context).await? {
            Some(query) => self.answer(&query).await,
            None => Ok(Resolution::Unresolved {
                clarification: clarification_text(),
            }),
        }
    }
}

/// Reply when no intent matches.
pub fn clarification_text() -> String {
    let mut text = String::from(
        "No entendí la pregunta. Puedo responder sobre:\n\
         - el corredor con mayor tasa de fallo o el ranking de corredores\n\
         - el volumen de transacciones en el tiempo\n\
         - fallos por segmento (Enterprise, SME, Retail)\n\
         - fallos por rango de monto o por día de la semana\n\
         - un resumen general o el análisis de un corredor (por ejemplo USD_MXN)\n",
    );
    text.push_str("Puedes acotar con \"últimos 7 días\" o \"últimos 30 días\".");
    text
}

fn corridor_clarification(known: &[String]) -> String {
    if known.is_empty() {
        "¿Qué corredor quieres analizar? No hay corredores con datos.".to_string()
    } else {
        format!(
            "¿Qué corredor quieres analizar? Disponibles: {}.",
            known.join(", ")
        )
    }
}

fn no_data(scope: &str) -> String {
    format!("No encontré transacciones para {}.", scope)
}

/// Highest failure rate; ties go to the busier corridor, then the name.
pub fn worst_corridor(rows: &[CorridorMetric]) -> Option<&CorridorMetric> {
    rows.iter().min_by(|a, b| {
        b.failure_rate
            .total_cmp(&a.failure_rate)
            .then_with(|| b.total_transactions.cmp(&a.total_transactions))
            .then_with(|| a.corridor.cmp(&b.corridor))
    })
}

fn render_worst_corridor(rows: &[CorridorMetric], scope: &str) -> String {
    let Some(worst) = worst_corridor(rows) else {
        return no_data(scope);
    };
    let mut text = format!(
        "El corredor con mayor tasa de fallo es {} con {}: {} de {} transacciones fallaron ({}).",
        worst.corridor,
        format_percent(worst.failure_rate),
        format_count(worst.failed),
        format_count(worst.total_transactions),
        scope
    );
    let runner_up = rows
        .iter()
        .filter(|c| c.corridor != worst.corridor)
        .max_by(|a, b| a.failure_rate.total_cmp(&b.failure_rate));
    if let Some(next) = runner_up {
        text.push_str(&format!(
            " Le sigue {} con {}.",
            next.corridor,
            format_percent(next.failure_rate)
        ));
    }
    text
}

fn render_ranking(rows: &[CorridorMetric], scope: &str) -> String {
    if rows.is_empty() {
        return no_data(scope);
    }
    let mut text = format!("Corredores por volumen ({}):\n", scope);
    for (i, c) in rows.iter().enumerate() {
        text.push_str(&format!(
            "{}. {}: {} transacciones, {} en valor, fallo {}\n",
            i + 1,
            c.corridor,
            format_count(c.total_transactions),
            format_usd(c.total_value),
            format_percent(c.failure_rate)
        ));
    }
    text.trim_end().to_string()
}

/// Daily rows rolled up by calendar month.
fn render_trend(rows: &[TrendMetric], scope: &str) -> String {
    if rows.is_empty() {
        return no_data(scope);
    }

    let mut months: BTreeMap<(i32, u32), (u64, u64, f64)> = BTreeMap::new();
    for day in rows {
        let entry = months
            .entry((day.date.year(), day.date.month()))
            .or_default();
        entry.0 += day.txn_count;
        entry.1 += day.failed;
        entry.2 += day.total_value;
    }

    let mut text = format!("Volumen de transacciones por mes ({}):\n", scope);
    for ((year, month), (count, failed, value)) in &months {
        text.push_str(&format!(
            "- {}-{:02}: {} transacciones, {} en valor, fallo {}\n",
            year,
            month,
            format_count(*count),
            format_usd(*value),
            format_percent(lens_core::metrics::failure_rate(*failed, *count))
        ));
    }

    let total: u64 = rows.iter().map(|d| d.txn_count).sum();
    text.push_str(&format!(
        "Total: {} transacciones en {} días con actividad.",
        format_count(total),
        rows.len()
    ));
    if let Some(peak) = rows.iter().max_by(|a, b| {
        a.txn_count
            .cmp(&b.txn_count)
            .then_with(|| b.date.cmp(&a.date))
    }) {
        text.push_str(&format!(
            " Día de mayor volumen: {} ({} transacciones).",
            peak.date.format("%Y-%m-%d"),
            format_count(peak.txn_count)
        ));
    }
    text
}

fn render_segments(rows: &[SegmentMetric], focus: Option<Segment>, scope: &str) -> String {
    if let Some(segment) = focus {
        return match rows.iter().find(|s| s.segment == segment) {
            Some(s) => format!(
                "En el segmento {} ({}), {} de {} usuarios tienen transacciones fallidas. \
                 Fallaron {} de {} transacciones ({}).",
                s.segment.label(),
                scope,
                format_count(s.users_with_failures),
                format_count(s.unique_users),
                format_count(s.failed),
                format_count(s.total_transactions),
                format_percent(s.failure_rate)
            ),
            None => format!(
                "No hay transacciones del segmento {} para {}.",
                segment.label(),
                scope
            ),
        };
    }

    if rows.is_empty() {
        return no_data(scope);
    }
    let mut text = format!("Fallos por segmento ({}):\n", scope);
    for s in rows {
        text.push_str(&format!(
            "- {}: {} transacciones, fallo {}, {} de {} usuarios con fallos\n",
            s.segment.label(),
            format_count(s.total_transactions),
            format_percent(s.failure_rate),
            format_count(s.users_with_failures),
            format_count(s.unique_users)
        ));
    }
    text.trim_end().to_string()
}

fn render_amounts(rows: &[AmountBracketMetric], scope: &str) -> String {
    if rows.is_empty() {
        return no_data(scope);
    }
    let mut text = format!("Tasa de fallo por rango de monto ({}):\n", scope);
    for a in rows {
        text.push_str(&format!(
            "- {}: {} transacciones, fallo {}, monto promedio {}\n",
            a.bracket.label(),
            format_count(a.txn_count),
            format_percent(a.failure_rate),
            format_usd(a.avg_amount)
        ));
    }
    if let Some(worst) = rows
        .iter()
        .max_by(|a, b| a.failure_rate.total_cmp(&b.failure_rate).then_with(|| b.bracket.cmp(&a.bracket)))
    {
        text.push_str(&format!(
            "El rango con más fallos es {} ({}).",
            worst.bracket.label(),
            format_percent(worst.failure_rate)
        ));
    }
    text
}

fn render_weekdays(rows: &[WeekdayMetric], scope: &str) -> String {
    if rows.is_empty() {
        return no_data(scope);
    }
    let day_name = |n: u32| WEEKDAYS_ES[n as usize % 7];
    let mut text = format!("Actividad por día de la semana ({}):\n", scope);
    for d in rows {
        text.push_str(&format!(
            "- {}: {} transacciones, fallo {}\n",
            day_name(d.day_num),
            format_count(d.txn_count),
            format_percent(d.failure_rate)
        ));
    }
    if let Some(worst) = rows
        .iter()
        .max_by(|a, b| a.failure_rate.total_cmp(&b.failure_rate).then_with(|| b.day_num.cmp(&a.day_num)))
    {
        text.push_str(&format!(
            "El día con mayor tasa de fallo es el {} ({}).",
            day_name(worst.day_num),
            format_percent(worst.failure_rate)
        ));
    }
    text
}

fn render_overview(s: &SummaryMetric, scope: &str) -> String {
    if s.total_transactions == 0 {
        return no_data(scope);
    }
    format!(
        "Resumen ({}): {} transacciones en {} corredores, {} fallidas ({}). \
         Valor total {}; ingreso estimado {} (comisión del {}).",
        scope,
        format_count(s.total_transactions),
        s.corridor_count,
        format_count(s.failed),
        format_percent(s.failure_rate),
        format_usd(s.total_value),
        format_usd(s.estimated_revenue),
        format_percent(ESTIMATED_FEE_RATE)
    )
}

fn render_deep_dive(dive: &CorridorDeepDive, scope: &str) -> String {
    let c = &dive.corridor;
    if c.total_transactions == 0 {
        return no_data(scope);
    }

    let mut text = format!(
        "Análisis de {} ({}): {} transacciones, {} fallidas ({}), monto promedio {}, \
         ingreso estimado {}.\n",
        c.corridor,
        scope,
        format_count(c.total_transactions),
        format_count(c.failed),
        format_percent(c.failure_rate),
        format_usd(c.avg_amount),
        format_usd(c.revenue_usd)
    );

    text.push_str("Por segmento:");
    for s in &dive.segments {
        text.push_str(&format!(
            " {} {} ({} transacciones);",
            s.segment.label(),
            format_percent(s.failure_rate),
            format_count(s.total_transactions)
        ));
    }
    text.pop();
    text.push_str(".\nPor monto:");
    for a in &dive.amounts {
        text.push_str(&format!(
            " {} {} ({} transacciones);",
            a.bracket.label(),
            format_percent(a.failure_rate),
            format_count(a.txn_count)
        ));
    }
    text.pop();
    text.push('.');
    text
}
