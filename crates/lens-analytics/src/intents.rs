//! Keyword matching of free-text questions onto the closed intent set.
//!
//! Matching works on a normalized form of the question: lowercase, accents folded,
//! punctuation turned into spaces. A keyword matches when it starts a word, so `fall`
//! covers `fallo`, `fallos` and `fallidas`.

use lens_core::types::{Intent, Segment, TimeWindow};
use regex::Regex;
use std::sync::OnceLock;

/// Lowest total keyword weight that counts as a match.
pub const MIN_SCORE: u32 = 2;

/// Bonus for the deep-dive intent when a known corridor is named.
const CORRIDOR_MENTION_BONUS: u32 = 3;

fn keywords(intent: Intent) -> &'static [(&'static str, u32)] {
    match intent {
        Intent::WorstCorridor => &[
            ("mayor tasa de fall", 3),
            ("corredor con mayor", 2),
            ("peor", 2),
            ("mas fall", 2),
            ("mayor fall", 2),
            ("menor tasa de exito", 2),
            ("worst", 2),
            ("highest failure", 3),
            ("most failure", 2),
            ("problematic", 1),
            ("problema", 1),
        ],
        Intent::CorridorRanking => &[
            ("corredores", 2),
            ("corridors", 2),
            ("por corredor", 2),
            ("by corridor", 2),
            ("per corridor", 2),
            ("ranking", 2),
            ("compar", 1),
        ],
        Intent::VolumeTrend => &[
            ("volumen", 2),
            ("volume", 2),
            ("tendencia", 2),
            ("trend", 2),
            ("evolucion", 2),
            ("por mes", 2),
            ("por dia", 2),
            ("mensual", 2),
            ("diari", 2),
            ("per month", 2),
            ("per day", 2),
            ("monthly", 2),
            ("daily", 2),
            ("over time", 2),
            ("cuantas transacciones", 1),
        ],
        Intent::SegmentFailures => &[
            ("segment", 2),
            ("enterprise", 2),
            ("empresa", 1),
            ("corporativ", 1),
            ("pyme", 2),
            ("sme", 2),
            ("retail", 2),
            ("minorista", 2),
            ("usuarios", 1),
            ("users", 1),
            ("clientes", 1),
            ("customers", 1),
        ],
        Intent::AmountDistribution => &[
            ("monto", 2),
            ("importe", 2),
            ("amount", 2),
            ("bracket", 2),
            ("rango", 1),
            ("ticket", 1),
            ("tamano", 1),
            ("size", 1),
            ("transacciones grandes", 2),
            ("large transactions", 2),
        ],
        Intent::WeekdayPattern => &[
            ("dia de la semana", 3),
            ("dias de la semana", 3),
            ("weekday", 3),
            ("day of week", 3),
            ("day of the week", 3),
            ("fin de semana", 2),
            ("weekend", 2),
        ],
        Intent::Overview => &[
            ("resumen", 2),
            ("summary", 2),
            ("overview", 2),
            ("kpi", 2),
            ("ingreso", 2),
            ("revenue", 2),
            ("comision", 1),
            ("general", 1),
            ("en total", 1),
            ("tasa de fallo promedio", 2),
            ("average failure", 2),
        ],
        Intent::CorridorDeepDive => &[
            ("analiza", 1),
            ("analisis", 1),
            ("analyze", 1),
            ("analyse", 1),
            ("comportamiento", 1),
            ("behavior", 1),
            ("behaviour", 1),
            ("detalle", 1),
            ("profundiza", 1),
            ("deep dive", 2),
            ("por que", 1),
            ("why", 1),
        ],
    }
}

/// Everything extracted from one question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionTerms {
    pub normalized: String,
    pub corridor: Option<String>,
    pub segment: Option<Segment>,
    pub window: Option<TimeWindow>,
}

impl QuestionTerms {
    pub fn extract(question: &str, known_corridors: &[String]) -> Self {
        let normalized = normalize_question(question);
        Self {
            corridor: detect_corridor(&normalized, known_corridors),
            segment: detect_segment(&normalized),
            window: detect_window(&normalized),
            normalized,
        }
    }
}

/// Lowercase, fold Spanish accents, and collapse everything but word characters.
pub fn normalize_question(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            c if c.is_alphanumeric() || c == '_' => c,
            _ => ' ',
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `keyword` starts a word in `normalized`.
fn contains_word_prefix(normalized: &str, keyword: &str) -> bool {
    format!(" {}", normalized).contains(&format!(" {}", keyword))
}

/// Position of `phrase` as whole words, if present.
fn find_phrase(normalized: &str, phrase: &str) -> Option<usize> {
    format!(" {} ", normalized).find(&format!(" {} ", phrase))
}

/// The known corridor mentioned earliest in the question.
///
/// `USD_MXN` is recognized as `usd_mxn`, `usd mxn`, `usdmxn`, `usd a mxn` or `usd to mxn`.
pub fn detect_corridor(normalized: &str, known_corridors: &[String]) -> Option<String> {
    known_corridors
        .iter()
        .filter_map(|corridor| {
            let key = corridor.to_lowercase();
            let mut spellings = vec![key.clone()];
            if let Some((from, to)) = key.split_once('_') {
                spellings.push(format!("{} {}", from, to));
                spellings.push(format!("{}{}", from, to));
                spellings.push(format!("{} a {}", from, to));
                spellings.push(format!("{} to {}", from, to));
            }
            spellings
                .iter()
                .filter_map(|s| find_phrase(normalized, s))
                .min()
                .map(|pos| (pos, corridor))
        })
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, corridor)| corridor.clone())
}

pub fn detect_segment(normalized: &str) -> Option<Segment> {
    normalized.split(' ').find_map(|word| {
        if word.starts_with("enterprise") || word.starts_with("empresa") || word.starts_with("corporativ") {
            Some(Segment::Enterprise)
        } else if word == "sme" || word == "smes" || word.starts_with("pyme") {
            Some(Segment::Sme)
        } else if word.starts_with("retail") || word.starts_with("minorist") {
            Some(Segment::Retail)
        } else {
            None
        }
    })
}

fn day_count_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b(\d{1,4})\s*(?:d|dia|dias|day|days)\b").ok())
        .as_ref()
}

/// Time window named in the question, if any.
///
/// Explicit day counts round up to the nearest supported window; counts beyond 30 days
/// mean the whole history.
pub fn detect_window(normalized: &str) -> Option<TimeWindow> {
    if let Some(caps) = day_count_pattern().and_then(|re| re.captures(normalized)) {
        if let Ok(days) = caps[1].parse::<u32>() {
            return Some(match days {
                0..=7 => TimeWindow::Last7Days,
                8..=30 => TimeWindow::Last30Days,
                _ => TimeWindow::All,
            });
        }
    }

    const WEEK: &[&str] = &["ultima semana", "esta semana", "last week", "past week"];
    const MONTH: &[&str] = &["ultimo mes", "este mes", "last month", "past month"];
    const ALL: &[&str] = &["historico", "todo el periodo", "all time", "todo el tiempo"];

    if WEEK.iter().any(|p| contains_word_prefix(normalized, p)) {
        Some(TimeWindow::Last7Days)
    } else if MONTH.iter().any(|p| contains_word_prefix(normalized, p)) {
        Some(TimeWindow::Last30Days)
    } else if ALL.iter().any(|p| contains_word_prefix(normalized, p)) {
        Some(TimeWindow::All)
    } else {
        None
    }
}

/// Keyword score per intent, in priority order.
pub fn score_intents(terms: &QuestionTerms) -> Vec<(Intent, u32)> {
    Intent::all()
        .iter()
        .map(|&intent| {
            let mut score: u32 = keywords(intent)
                .iter()
                .filter(|(kw, _)| contains_word_prefix(&terms.normalized, kw))
                .map(|(_, weight)| weight)
                .sum();
            if intent == Intent::CorridorDeepDive && terms.corridor.is_some() {
                score += CORRIDOR_MENTION_BONUS;
            }
            (intent, score)
        })
        .collect()
}

/// Highest-scoring intent at or above [`MIN_SCORE`]; ties go to the earlier intent in
/// [`Intent::all`].
pub fn match_intent(terms: &QuestionTerms) -> Option<Intent> {
    let mut best: Option<(Intent, u32)> = None;
    for (intent, score) in score_intents(terms) {
        if score >= MIN_SCORE && best.map_or(true, |(_, top)| score > top) {
            best = Some((intent, score));
        }
    }
    best.map(|(intent, _)| intent)
}
