//! Warm-tier summarization behind a single call site.
//!
//! [`IterationSummarizer`] has two implementations: [`GenerativeSummarizer`]
//! (reasoning-service backed) and [`ExtractiveSummarizer`] (deterministic line
//! selection). [`FallbackSummarizer`] runs the generative one under a timeout
//! and switches to the extractive one on any failure, so summarization never
//! fails a turn.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::reasoning::{self, Reasoner, ReasoningError};

use super::budget::{estimate_tokens, truncate_to_tokens};
use super::tiers::SummarySource;

const SUMMARIZATION_PROMPT: &str = "\
Summarize the following investigation iteration record in at most {max_tokens} tokens. Focus on:
- Key decisions (hypotheses generated, tested, retired, validated)
- Evidence changes (what arrived, what it showed)
- Confidence movements with their values

Rules:
- Only include facts explicitly stated in the record. Do not infer or extrapolate.
- Preserve hypothesis and evidence ids (H2, E3, P1) verbatim.
- One or two sentences, no preamble.";

/// Words in a record line that mark a decision or an evidence change.
const SIGNAL_WORDS: &[&str] = &[
    "validated", "refuted", "retired", "dropped", "rose", "supported", "insight", "evidence",
    "stalled",
];

/// Boxed future returned by [`IterationSummarizer::summarize`].
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ReasoningError>> + Send + 'a>>;

/// Produces a bounded summary of one rendered iteration record.
pub trait IterationSummarizer: Send + Sync {
    fn source(&self) -> SummarySource;

    fn summarize<'a>(&'a self, record: &'a str, max_tokens: usize) -> SummaryFuture<'a>;
}

// ── Extractive ─────────────────────────────────────────────────────

/// Selects the highest-information lines of a record, deterministically.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveSummarizer {
    pub chars_per_token: f64,
}

impl ExtractiveSummarizer {
    pub fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }

    /// Synchronous form of [`IterationSummarizer::summarize`]; never fails.
    pub fn extract(&self, record: &str, max_tokens: usize) -> String {
        let lines: Vec<&str> = record.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut ranked: Vec<(usize, f64)> = lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i, information_density(l)))
            .collect();
        // Stable sort keeps earlier lines first among equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut chosen: Vec<usize> = Vec::new();
        for (idx, _) in &ranked {
            let mut candidate = chosen.clone();
            candidate.push(*idx);
            candidate.sort_unstable();
            let text = join_lines(&lines, &candidate);
            if estimate_tokens(&text, self.chars_per_token) <= max_tokens {
                chosen = candidate;
            }
        }

        if chosen.is_empty() {
            let best = ranked.first().map_or("", |(i, _)| lines[*i]);
            return truncate_to_tokens(best, max_tokens, self.chars_per_token);
        }
        join_lines(&lines, &chosen)
    }
}

impl IterationSummarizer for ExtractiveSummarizer {
    fn source(&self) -> SummarySource {
        SummarySource::Extractive
    }

    fn summarize<'a>(&'a self, record: &'a str, max_tokens: usize) -> SummaryFuture<'a> {
        let text = self.extract(record, max_tokens);
        Box::pin(async move { Ok(text) })
    }
}

fn join_lines(lines: &[&str], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| lines[*i].trim())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Informative tokens per word: numbers, entity ids and decision words.
fn information_density(line: &str) -> f64 {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let score: f64 = words
        .iter()
        .map(|w| {
            let w = w.trim_matches(|c: char| !c.is_alphanumeric() && c != '.');
            let lower = w.to_lowercase();
            if is_entity_id(w) {
                3.0
            } else if SIGNAL_WORDS.iter().any(|s| lower.starts_with(s)) {
                2.0
            } else if w.chars().any(|c| c.is_ascii_digit()) {
                1.0
            } else {
                0.0
            }
        })
        .sum();
    score / words.len() as f64
}

fn is_entity_id(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some('H' | 'E' | 'P' | 'I'))
        && word.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

// ── Generative ─────────────────────────────────────────────────────

/// Summarizes through the reasoning service.
pub struct GenerativeSummarizer {
    reasoner: Arc<dyn Reasoner>,
    timeout: Duration,
}

impl GenerativeSummarizer {
    pub fn new(reasoner: Arc<dyn Reasoner>, timeout: Duration) -> Self {
        Self { reasoner, timeout }
    }

    pub fn build_prompt(record: &str, max_tokens: usize) -> String {
        let instructions = SUMMARIZATION_PROMPT.replace("{max_tokens}", &max_tokens.to_string());
        format!("{instructions}\n\n=== ITERATION RECORD ===\n{record}")
    }
}

impl IterationSummarizer for GenerativeSummarizer {
    fn source(&self) -> SummarySource {
        SummarySource::Generative
    }

    fn summarize<'a>(&'a self, record: &'a str, max_tokens: usize) -> SummaryFuture<'a> {
        Box::pin(async move {
            let prompt = Self::build_prompt(record, max_tokens);
            reasoning::generate_text(self.reasoner.as_ref(), &prompt, self.timeout).await
        })
    }
}

// ── Fallback ───────────────────────────────────────────────────────

/// A summary and how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub text: String,
    pub source: SummarySource,
    /// Why the primary summarizer was bypassed, if it was.
    pub failure: Option<ReasoningError>,
}

/// Primary summarizer with a timeout-triggered extractive fallback.
pub struct FallbackSummarizer {
    primary: Option<Box<dyn IterationSummarizer>>,
    extractive: ExtractiveSummarizer,
    timeout: Duration,
}

impl FallbackSummarizer {
    pub fn new(primary: Box<dyn IterationSummarizer>, timeout: Duration, chars_per_token: f64) -> Self {
        Self {
            primary: Some(primary),
            extractive: ExtractiveSummarizer::new(chars_per_token),
            timeout,
        }
    }

    /// No primary; every summary is extractive and none counts as a fallback.
    pub fn extractive_only(chars_per_token: f64) -> Self {
        Self {
            primary: None,
            extractive: ExtractiveSummarizer::new(chars_per_token),
            timeout: Duration::ZERO,
        }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Summarize `record` within `max_tokens`. Never fails.
    pub async fn summarize(&self, record: &str, max_tokens: usize) -> SummaryOutcome {
        let cpt = self.extractive.chars_per_token;
        let failure = match &self.primary {
            None => None,
            Some(primary) => {
                match reasoning::within(self.timeout, primary.summarize(record, max_tokens)).await {
                    Ok(text) if !text.trim().is_empty() => {
                        debug!("[memory] generative summary ({} chars)", text.len());
                        return SummaryOutcome {
                            text: truncate_to_tokens(text.trim(), max_tokens, cpt),
                            source: primary.source(),
                            failure: None,
                        };
                    }
                    Ok(_) => Some(ReasoningError::InvalidOutput("empty summary".into())),
                    Err(e) => Some(e),
                }
            }
        };
        if let Some(e) = &failure {
            warn!("[memory] summarizer fell back to extractive: {e}");
        }
        SummaryOutcome {
            text: self.extractive.extract(record, max_tokens),
            source: SummarySource::Extractive,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::reasoning::ReasoningFuture;

    const RECORD: &str = "I4 [validation] turns 4-4: observe,orient,decide,act\n\
evidence +1, hypotheses +0, tests 1, retired 0, confidence -0.20\n\
H2 confidence dropped to 0.40\n\
test H2 inconclusive: compared pool metrics with error timestamps\n\
insight: error rate correlates with the 14:05 deploy";

    struct Failing;

    impl IterationSummarizer for Failing {
        fn source(&self) -> SummarySource {
            SummarySource::Generative
        }

        fn summarize<'a>(&'a self, _record: &'a str, _max: usize) -> SummaryFuture<'a> {
            Box::pin(async { Err(ReasoningError::Unavailable("down".into())) })
        }
    }

    struct Hanging;

    impl Reasoner for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        fn generate_text<'a>(&'a self, _p: &'a str, _t: Duration) -> ReasoningFuture<'a, String> {
            Box::pin(std::future::pending())
        }

        fn generate_structured<'a>(
            &'a self,
            _p: &'a str,
            _s: &'a serde_json::Value,
            _t: Duration,
        ) -> ReasoningFuture<'a, serde_json::Value> {
            Box::pin(std::future::pending())
        }
    }

    #[test]
    fn extractive_prefers_dense_lines_and_fits() {
        let summary = ExtractiveSummarizer::new(3.5).extract(RECORD, 20);
        assert!(estimate_tokens(&summary, 3.5) <= 20);
        assert!(summary.contains("H2 confidence dropped to 0.40"));
    }

    #[test]
    fn extractive_is_deterministic() {
        let s = ExtractiveSummarizer::new(3.5);
        assert_eq!(s.extract(RECORD, 40), s.extract(RECORD, 40));
    }

    #[test]
    fn extractive_truncates_when_no_line_fits() {
        let summary = ExtractiveSummarizer::new(3.5).extract(&"word ".repeat(200), 5);
        assert!(estimate_tokens(&summary, 3.5) <= 5);
    }

    #[tokio::test]
    async fn failure_falls_back_to_extractive() {
        let summarizer = FallbackSummarizer::new(Box::new(Failing), Duration::from_secs(1), 3.5);
        let outcome = summarizer.summarize(RECORD, 100).await;
        assert_eq!(outcome.source, SummarySource::Extractive);
        assert!(matches!(outcome.failure, Some(ReasoningError::Unavailable(_))));
        assert!(!outcome.text.is_empty());
    }

    #[tokio::test]
    async fn timeout_falls_back_to_extractive() {
        let primary = GenerativeSummarizer::new(Arc::new(Hanging), Duration::from_secs(60));
        let summarizer =
            FallbackSummarizer::new(Box::new(primary), Duration::from_millis(20), 3.5);
        let outcome = summarizer.summarize(RECORD, 100).await;
        assert_eq!(outcome.source, SummarySource::Extractive);
        assert!(matches!(outcome.failure, Some(ReasoningError::Timeout(_))));
    }

    #[tokio::test]
    async fn extractive_only_reports_no_failure() {
        let outcome = FallbackSummarizer::extractive_only(3.5)
            .summarize(RECORD, 100)
            .await;
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn prompt_embeds_cap_and_record() {
        let prompt = GenerativeSummarizer::build_prompt(RECORD, 100);
        assert!(prompt.contains("at most 100 tokens"));
        assert!(prompt.contains("ITERATION RECORD"));
    }
}
