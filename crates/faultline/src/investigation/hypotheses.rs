//! Hypothesis Manager: generation, evidence updates, decay and anchoring.
//!
//! All operations act on an [`OodaState`] owned by a single investigation;
//! the manager itself only borrows the thresholds from [`HypothesisConfig`].
//!
//! Initial likelihood is `prior + (0.9 - prior) * (1 - 0.6^n)` with
//! `prior = 0.15 + 0.30 * correlation` and `n` supporting evidence items, so
//! a hypothesis with no support never starts above 0.45.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::InvestigationError;
use crate::model::{
    Bearing, EvidenceTracker, Hypothesis, HypothesisCategory, HypothesisDelta, HypothesisStatus,
    OodaState, TestOutcome,
};

use super::config::HypothesisConfig;

/// Retirement reason used by decay.
pub const DECAY_RETIREMENT_REASON: &str = "confidence decayed below threshold";

const ZERO_EVIDENCE_PRIOR: f64 = 0.15;
const CORRELATION_WEIGHT: f64 = 0.30;
const LIKELIHOOD_CEILING: f64 = 0.9;
const EVIDENCE_RETENTION: f64 = 0.6;
const MIN_SUGGESTED_LIKELIHOOD: f64 = 0.05;

/// Terms that mark a piece of evidence as ruling something out.
const REFUTING_PHRASES: &[&str] = &[
    "ruled out",
    "not the cause",
    "no change",
    "unchanged",
    "normal",
    "healthy",
    "looks fine",
    "is fine",
    "no errors",
    "not related",
    "nothing",
];

const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "been", "were", "when", "what", "which", "their",
    "there", "into", "about", "after", "before", "causing", "cause", "some", "recent",
];

// ── Generation inputs ─────────────────────────────────────────────

/// A hypothesis about to be added.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub statement: String,
    pub category: HypothesisCategory,
    /// Ids of evidence records supporting it.
    pub supporting: Vec<String>,
    /// Lexical correlation with the evidence seen so far, in [0, 1].
    pub correlation: f64,
    /// Likelihood proposed by the reasoning service, if any.
    pub suggested: Option<f64>,
}

impl Candidate {
    /// Likelihood the candidate starts at.
    pub fn likelihood(&self) -> f64 {
        let envelope = initial_likelihood(self.correlation, self.supporting.len());
        match self.suggested {
            Some(s) if s.is_finite() => s.clamp(MIN_SUGGESTED_LIKELIHOOD, envelope),
            _ => envelope,
        }
    }
}

/// Structured hypothesis proposals requested from the reasoning service.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HypothesisSuggestions {
    pub hypotheses: Vec<SuggestedHypothesis>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SuggestedHypothesis {
    pub statement: String,
    pub category: HypothesisCategory,
    /// Proposed likelihood in [0, 1]; clamped by the engine.
    pub likelihood: f64,
    /// Ids of provided evidence (P1, P2, ...) that support it.
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
}

// ── Outcomes ──────────────────────────────────────────────────────

/// Result of evaluating decay for one hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayOutcome {
    pub hypothesis_id: String,
    pub before: f64,
    pub after: f64,
    pub retired: bool,
}

/// Why the engine thinks it is anchored on one theory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchoringReason {
    /// Several hypotheses in one category were tested without resolution.
    CategoryFixation {
        category: HypothesisCategory,
        hypotheses: usize,
    },
    /// The most recent iterations all failed to make progress.
    ConsecutiveStalls { iterations: usize },
    /// A strong early favourite keeps failing validation.
    PersistentFavourite {
        hypothesis_id: String,
        failures: u32,
    },
}

impl AnchoringReason {
    /// Category the investigation is fixated on, when one can be named.
    pub fn anchored_category(&self, ooda: &OodaState) -> Option<HypothesisCategory> {
        match self {
            AnchoringReason::CategoryFixation { category, .. } => Some(*category),
            AnchoringReason::PersistentFavourite { hypothesis_id, .. } => {
                ooda.hypothesis(hypothesis_id).map(|h| h.category)
            }
            AnchoringReason::ConsecutiveStalls { .. } => ooda
                .category_tests
                .iter()
                .max_by_key(|(category, count)| (**count, std::cmp::Reverse(**category)))
                .filter(|(_, count)| **count > 0)
                .map(|(category, _)| *category),
        }
    }
}

impl fmt::Display for AnchoringReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchoringReason::CategoryFixation {
                category,
                hypotheses,
            } => write!(
                f,
                "{hypotheses} {category} hypotheses tested without resolution"
            ),
            AnchoringReason::ConsecutiveStalls { iterations } => {
                write!(f, "last {iterations} iterations made no progress")
            }
            AnchoringReason::PersistentFavourite {
                hypothesis_id,
                failures,
            } => write!(
                f,
                "early favourite {hypothesis_id} failed validation {failures} times"
            ),
        }
    }
}

// ── Free functions ────────────────────────────────────────────────

/// Starting likelihood for a hypothesis with `supporting` evidence items and
/// the given lexical correlation.
pub fn initial_likelihood(correlation: f64, supporting: usize) -> f64 {
    let correlation = if correlation.is_finite() {
        correlation.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let prior = ZERO_EVIDENCE_PRIOR + CORRELATION_WEIGHT * correlation;
    let n = supporting.min(i32::MAX as usize) as i32;
    prior + (LIKELIHOOD_CEILING - prior) * (1.0 - EVIDENCE_RETENTION.powi(n))
}

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Lexical correlation between a candidate and the evidence corpus.
///
/// The larger of: the share of the statement's content words found in the
/// corpus, and category keyword hits (three or more saturate).
pub fn correlation(statement: &str, category: HypothesisCategory, corpus: &str) -> f64 {
    let corpus_lower = corpus.to_lowercase();
    let statement_words = content_words(statement);
    let corpus_words = content_words(&corpus_lower);
    let overlap = if statement_words.is_empty() {
        0.0
    } else {
        statement_words.intersection(&corpus_words).count() as f64 / statement_words.len() as f64
    };
    let hits = keyword_hits(category, &corpus_lower);
    overlap.max((hits as f64 / 3.0).min(1.0))
}

fn keyword_hits(category: HypothesisCategory, lower: &str) -> usize {
    category
        .keywords()
        .iter()
        .filter(|k| lower.contains(*k))
        .count()
}

/// Rule-based bearing of a piece of evidence on a hypothesis: `None` when the
/// content does not mention the hypothesis's category at all.
pub fn judge_bearing(hypothesis: &Hypothesis, content: &str) -> Option<Bearing> {
    let lower = content.to_lowercase();
    let statement_words = content_words(&hypothesis.statement);
    let mentions = keyword_hits(hypothesis.category, &lower) > 0
        || content_words(&lower)
            .intersection(&statement_words)
            .count()
            >= 2;
    if !mentions {
        return None;
    }
    if REFUTING_PHRASES.iter().any(|p| lower.contains(p)) {
        Some(Bearing::Refutes)
    } else {
        Some(Bearing::Supports)
    }
}

// ── Manager ───────────────────────────────────────────────────────

/// Hypothesis operations parameterised by [`HypothesisConfig`].
pub struct HypothesisManager<'c> {
    config: &'c HypothesisConfig,
}

impl<'c> HypothesisManager<'c> {
    pub fn new(config: &'c HypothesisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HypothesisConfig {
        self.config
    }

    /// Rule-based candidates ranked by keyword evidence.
    ///
    /// Forced categories come first, then categories by keyword hits in the
    /// anomaly statement and evidence, then taxonomy order. Categories that
    /// already have an active hypothesis are skipped.
    pub fn rule_candidates(
        &self,
        ooda: &OodaState,
        evidence: &EvidenceTracker,
        want: usize,
    ) -> Vec<Candidate> {
        let corpus = evidence_corpus(ooda, evidence);
        let lower = corpus.to_lowercase();
        let active: HashSet<HypothesisCategory> =
            ooda.active_hypotheses().map(|h| h.category).collect();

        let mut ranked: Vec<(usize, usize, HypothesisCategory)> = HypothesisCategory::ALL
            .iter()
            .enumerate()
            .filter(|(_, c)| !active.contains(*c))
            .map(|(order, c)| {
                let forced = ooda.forced_categories.iter().position(|f| f == c);
                let hits = keyword_hits(*c, &lower);
                // Forced categories sort ahead of any hit count.
                let rank = match forced {
                    Some(pos) => usize::MAX - pos,
                    None => hits,
                };
                (rank, order, *c)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        ranked
            .into_iter()
            .take(want.min(self.config.max_candidates))
            .map(|(_, _, category)| build_candidate(category, ooda, evidence, &corpus))
            .collect()
    }

    /// Rule-based candidate for one specific category.
    pub fn candidate_for(
        &self,
        ooda: &OodaState,
        evidence: &EvidenceTracker,
        category: HypothesisCategory,
    ) -> Candidate {
        build_candidate(category, ooda, evidence, &evidence_corpus(ooda, evidence))
    }

    /// Candidates from reasoning-service suggestions, with evidence ids
    /// filtered to ones that exist.
    pub fn suggested_candidates(
        &self,
        ooda: &OodaState,
        evidence: &EvidenceTracker,
        suggestions: HypothesisSuggestions,
    ) -> Vec<Candidate> {
        let corpus = evidence_corpus(ooda, evidence);
        suggestions
            .hypotheses
            .into_iter()
            .filter(|s| !s.statement.trim().is_empty())
            .map(|s| {
                let supporting = s
                    .supporting_evidence
                    .into_iter()
                    .filter(|id| evidence.provided.iter().any(|p| &p.id == id))
                    .collect();
                Candidate {
                    correlation: correlation(&s.statement, s.category, &corpus),
                    statement: s.statement.trim().to_string(),
                    category: s.category,
                    supporting,
                    suggested: Some(s.likelihood),
                }
            })
            .collect()
    }

    /// Add candidates as new Pending hypotheses, highest likelihood first.
    /// Duplicate statements are skipped. Returns the new ids.
    pub fn generate(
        &self,
        ooda: &mut OodaState,
        mut candidates: Vec<Candidate>,
        turn: u32,
    ) -> Vec<String> {
        candidates.sort_by(|a, b| b.likelihood().total_cmp(&a.likelihood()));
        let mut ids = Vec::new();
        for candidate in candidates.into_iter().take(self.config.max_candidates) {
            let duplicate = ooda
                .hypotheses
                .iter()
                .any(|h| h.statement.eq_ignore_ascii_case(&candidate.statement));
            if duplicate {
                continue;
            }
            let id = ooda.next_hypothesis_id();
            let mut hypothesis = Hypothesis::new(
                id.clone(),
                candidate.statement.clone(),
                candidate.category,
                candidate.likelihood(),
                turn,
            );
            hypothesis.supporting_evidence = candidate.supporting;
            ooda.hypotheses.push(hypothesis);
            ids.push(id);
        }
        ids
    }

    /// Apply one piece of evidence to a hypothesis.
    ///
    /// Support closes part of the gap to 1.0 and validates at the threshold;
    /// refutation shrinks the likelihood and sets `Refuted`. Refuted and
    /// retired hypotheses only record the evidence id until re-opened.
    pub fn update_on_evidence(
        &self,
        ooda: &mut OodaState,
        hypothesis_id: &str,
        evidence_id: &str,
        bearing: Bearing,
        turn: u32,
    ) -> Result<HypothesisDelta, InvestigationError> {
        let hypothesis = ooda
            .hypothesis_mut(hypothesis_id)
            .ok_or_else(|| InvestigationError::UnknownHypothesis(hypothesis_id.to_string()))?;
        let before = hypothesis.likelihood;
        let settled = matches!(
            hypothesis.status,
            HypothesisStatus::Refuted | HypothesisStatus::Retired
        );

        match bearing {
            Bearing::Supports => {
                push_unique(&mut hypothesis.supporting_evidence, evidence_id);
                if !settled {
                    let next = before + (1.0 - before) * self.config.support_gain;
                    hypothesis.set_likelihood(next, turn);
                    hypothesis.status = if next >= self.config.validation_threshold {
                        HypothesisStatus::Validated
                    } else {
                        HypothesisStatus::Testing
                    };
                    hypothesis.mark_progress(turn);
                }
            }
            Bearing::Refutes => {
                push_unique(&mut hypothesis.refuting_evidence, evidence_id);
                if !settled {
                    hypothesis.set_likelihood(before * self.config.refute_factor, turn);
                    hypothesis.status = HypothesisStatus::Refuted;
                    hypothesis.mark_progress(turn);
                }
            }
        }

        Ok(HypothesisDelta {
            hypothesis_id: hypothesis.id.clone(),
            before,
            after: hypothesis.likelihood,
            status: hypothesis.status,
        })
    }

    /// Count a test run against a hypothesis. Inconclusive and refuting
    /// outcomes count as failed validations.
    pub fn note_test(
        &self,
        ooda: &mut OodaState,
        hypothesis_id: &str,
        outcome: TestOutcome,
    ) -> Result<(), InvestigationError> {
        let hypothesis = ooda
            .hypothesis_mut(hypothesis_id)
            .ok_or_else(|| InvestigationError::UnknownHypothesis(hypothesis_id.to_string()))?;
        hypothesis.tests_run += 1;
        if outcome != TestOutcome::Supported {
            hypothesis.validation_failures += 1;
        }
        if hypothesis.status == HypothesisStatus::Pending {
            hypothesis.status = HypothesisStatus::Testing;
        }
        let category = hypothesis.category;
        *ooda.category_tests.entry(category).or_insert(0) += 1;
        Ok(())
    }

    /// Re-open a refuted or retired hypothesis because new context arrived.
    pub fn reopen(
        &self,
        ooda: &mut OodaState,
        hypothesis_id: &str,
        turn: u32,
    ) -> Result<(), InvestigationError> {
        let floor = self.config.retirement_threshold;
        let hypothesis = ooda
            .hypothesis_mut(hypothesis_id)
            .ok_or_else(|| InvestigationError::UnknownHypothesis(hypothesis_id.to_string()))?;
        if !matches!(
            hypothesis.status,
            HypothesisStatus::Refuted | HypothesisStatus::Retired
        ) {
            return Ok(());
        }
        hypothesis.status = HypothesisStatus::Testing;
        hypothesis.retirement_reason = None;
        if hypothesis.likelihood < floor {
            hypothesis.set_likelihood(floor, turn);
        }
        hypothesis.mark_progress(turn);
        Ok(())
    }

    /// Decay every active hypothesis that made no progress this turn.
    ///
    /// Runs at most once per turn per hypothesis. Decay starts once
    /// `decay_grace_turns` have passed since the last progress and compounds
    /// by `decay_base ^ iterations_without_progress`.
    pub fn apply_decay(&self, ooda: &mut OodaState, turn: u32) -> Vec<DecayOutcome> {
        let mut outcomes = Vec::new();
        for hypothesis in ooda.hypotheses.iter_mut() {
            if !hypothesis.status.is_active()
                || hypothesis.last_decay_turn >= turn
                || hypothesis.last_progress_turn >= turn
            {
                continue;
            }
            hypothesis.last_decay_turn = turn;
            hypothesis.iterations_without_progress += 1;
            if turn.saturating_sub(hypothesis.last_progress_turn) < self.config.decay_grace_turns {
                continue;
            }

            let before = hypothesis.likelihood;
            let factor = self
                .config
                .decay_base
                .powi(hypothesis.iterations_without_progress as i32);
            hypothesis.set_likelihood(before * factor, turn);
            let retired = hypothesis.likelihood < self.config.retirement_threshold;
            if retired {
                hypothesis.status = HypothesisStatus::Retired;
                hypothesis.retirement_reason = Some(DECAY_RETIREMENT_REASON.to_string());
            }
            outcomes.push(DecayOutcome {
                hypothesis_id: hypothesis.id.clone(),
                before,
                after: hypothesis.likelihood,
                retired,
            });
        }
        outcomes
    }

    /// Check the three anchoring conditions, most specific first.
    pub fn detect_anchoring(&self, ooda: &OodaState) -> Option<AnchoringReason> {
        let mut unresolved: BTreeMap<HypothesisCategory, usize> = BTreeMap::new();
        for hypothesis in ooda.hypotheses.iter().filter(|h| h.tested_without_resolution()) {
            *unresolved.entry(hypothesis.category).or_insert(0) += 1;
        }
        if let Some((category, count)) = unresolved
            .into_iter()
            .filter(|(_, count)| *count >= self.config.anchoring_same_category)
            .max_by_key(|(_, count)| *count)
        {
            return Some(AnchoringReason::CategoryFixation {
                category,
                hypotheses: count,
            });
        }

        if let Some(favourite) = ooda.hypotheses.iter().find(|h| {
            h.initial_likelihood > self.config.favourite_threshold
                && h.validation_failures >= self.config.favourite_failures
                && h.status != HypothesisStatus::Validated
        }) {
            return Some(AnchoringReason::PersistentFavourite {
                hypothesis_id: favourite.id.clone(),
                failures: favourite.validation_failures,
            });
        }

        let window = self.config.anchoring_stalled_iterations;
        if window > 0 && stalled_streak(ooda) >= window {
            return Some(AnchoringReason::ConsecutiveStalls { iterations: window });
        }
        None
    }

    /// Up to `forced_alternatives` categories not yet heavily tested, least
    /// tested first, never including `exclude`.
    pub fn force_alternatives(
        &self,
        tested: &BTreeMap<HypothesisCategory, u32>,
        exclude: Option<HypothesisCategory>,
    ) -> Vec<HypothesisCategory> {
        let mut open: Vec<(u32, usize, HypothesisCategory)> = HypothesisCategory::ALL
            .iter()
            .enumerate()
            .filter(|(_, c)| Some(**c) != exclude)
            .map(|(order, c)| (tested.get(c).copied().unwrap_or(0), order, *c))
            .filter(|(count, _, _)| *count < self.config.heavily_tested)
            .collect();
        open.sort();
        open.into_iter()
            .take(self.config.forced_alternatives)
            .map(|(_, _, c)| c)
            .collect()
    }

    /// The hypothesis the Act step should test next.
    ///
    /// Normally the most likely active one. While anchoring is flagged, the
    /// one from the least tested category.
    pub fn pick_target<'s>(&self, ooda: &'s OodaState) -> Option<&'s Hypothesis> {
        let tests = |h: &Hypothesis| ooda.category_tests.get(&h.category).copied().unwrap_or(0);
        if ooda.anchoring_detected {
            ooda.active_hypotheses().min_by(|a, b| {
                tests(*a)
                    .cmp(&tests(*b))
                    .then(b.likelihood.total_cmp(&a.likelihood))
            })
        } else {
            ooda.active_hypotheses()
                .max_by(|a, b| a.likelihood.total_cmp(&b.likelihood).then(b.id.cmp(&a.id)))
        }
    }
}

/// Number of most recent iterations in a row that made no progress.
pub fn stalled_streak(ooda: &OodaState) -> usize {
    ooda.iterations
        .iter()
        .rev()
        .take_while(|it| !it.made_progress)
        .count()
}

fn build_candidate(
    category: HypothesisCategory,
    ooda: &OodaState,
    evidence: &EvidenceTracker,
    corpus: &str,
) -> Candidate {
    let subject = ooda
        .anomaly
        .as_ref()
        .map(|a| a.subject())
        .unwrap_or_else(|| "the reported failures".to_string());
    let statement = category.template(&subject);
    let supporting = evidence
        .provided
        .iter()
        .filter(|p| {
            let lower = p.content.to_lowercase();
            keyword_hits(category, &lower) > 0
                && !REFUTING_PHRASES.iter().any(|r| lower.contains(r))
        })
        .map(|p| p.id.clone())
        .collect();
    Candidate {
        correlation: correlation(&statement, category, corpus),
        statement,
        category,
        supporting,
        suggested: None,
    }
}

fn evidence_corpus(ooda: &OodaState, evidence: &EvidenceTracker) -> String {
    let mut corpus = String::new();
    if let Some(frame) = &ooda.anomaly {
        corpus.push_str(&frame.statement);
        corpus.push('\n');
        for component in &frame.affected_components {
            corpus.push_str(component);
            corpus.push(' ');
        }
    }
    for provided in &evidence.provided {
        corpus.push_str(&provided.content);
        corpus.push('\n');
    }
    corpus
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}
