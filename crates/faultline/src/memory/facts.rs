//! Deterministic rendering of iteration records and key-fact extraction.
//!
//! The hot tier stores [`render_record`] output verbatim. The cold tier
//! stores [`extract_facts`] output: a few short strings per iteration, picked
//! by a fixed priority order with no generation involved.

use crate::model::{HypothesisStatus, OodaIteration, TestOutcome};

use super::budget::{estimate_tokens, truncate_to_tokens};

/// Likelihood moves smaller than this are not worth a cold fact.
const SIGNIFICANT_MOVE: f64 = 0.1;

/// Full-fidelity text form of one iteration.
pub fn render_record(it: &OodaIteration) -> String {
    let steps: Vec<String> = it.steps_completed.iter().map(|s| s.to_string()).collect();
    let mut lines = vec![
        format!(
            "{} [{}] turns {}-{}: {}",
            it.id,
            it.phase,
            it.start_turn,
            it.end_turn,
            steps.join(",")
        ),
        format!(
            "evidence +{}, hypotheses +{}, tests {}, retired {}, confidence {:+.2}",
            it.new_evidence, it.new_hypotheses, it.tests_performed, it.hypotheses_retired,
            it.confidence_delta
        ),
    ];
    for delta in &it.hypothesis_deltas {
        lines.push(describe_delta(&delta.hypothesis_id, delta.before, delta.after, delta.status));
    }
    for action in &it.actions {
        let outcome = match action.outcome {
            TestOutcome::Supported => "supported",
            TestOutcome::Refuted => "refuted",
            TestOutcome::Inconclusive => "inconclusive",
        };
        match &action.hypothesis_id {
            Some(id) => lines.push(format!("test {id} {outcome}: {}", action.description)),
            None => lines.push(format!("action {outcome}: {}", action.description)),
        }
    }
    for insight in &it.insights {
        lines.push(format!("insight: {insight}"));
    }
    if let Some(reason) = &it.stall_reason {
        lines.push(format!("stalled: {reason}"));
    }
    lines.join("\n")
}

fn describe_delta(id: &str, before: f64, after: f64, status: HypothesisStatus) -> String {
    match status {
        HypothesisStatus::Validated => format!("{id} validated at {after:.2}"),
        HypothesisStatus::Refuted => format!("{id} refuted"),
        HypothesisStatus::Retired => format!("{id} retired at {after:.2}"),
        HypothesisStatus::Pending | HypothesisStatus::Testing => {
            if after < before {
                format!("{id} confidence dropped to {after:.2}")
            } else if after > before {
                format!("{id} confidence rose to {after:.2}")
            } else {
                format!("{id} confidence held at {after:.2}")
            }
        }
    }
}

/// Key facts of an iteration, most important first.
pub fn key_facts(it: &OodaIteration) -> Vec<String> {
    let mut resolved = Vec::new();
    let mut moved = Vec::new();
    for d in &it.hypothesis_deltas {
        if !d.status.is_active() {
            resolved.push(describe_delta(&d.hypothesis_id, d.before, d.after, d.status));
        } else if (d.after - d.before).abs() >= SIGNIFICANT_MOVE {
            moved.push(describe_delta(&d.hypothesis_id, d.before, d.after, d.status));
        }
    }

    let mut facts = resolved;
    facts.extend(moved);
    if it.new_hypotheses > 0 {
        facts.push(format!("{} new hypotheses", it.new_hypotheses));
    }
    if it.new_evidence > 0 {
        facts.push(format!("{} new evidence", it.new_evidence));
    }
    if !it.made_progress {
        facts.push("no progress".to_string());
    }
    facts
}

/// Render a cold entry line.
pub fn render_facts(iteration_id: &str, facts: &[String]) -> String {
    format!("{iteration_id}: {}", facts.join("; "))
}

/// Key facts that fit in `max_tokens` once rendered, dropping the least
/// important first.
pub fn extract_facts(it: &OodaIteration, max_tokens: usize, chars_per_token: f64) -> Vec<String> {
    let mut facts = key_facts(it);
    while facts.len() > 1
        && estimate_tokens(&render_facts(&it.id, &facts), chars_per_token) > max_tokens
    {
        facts.pop();
    }
    if let Some(first) = facts.first_mut()
        && estimate_tokens(&render_facts(&it.id, std::slice::from_ref(&*first)), chars_per_token)
            > max_tokens
    {
        let prefix_tokens = estimate_tokens(&format!("{}: ", it.id), chars_per_token);
        *first = truncate_to_tokens(first, max_tokens.saturating_sub(prefix_tokens), chars_per_token);
    }
    facts
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{ActionRecord, HypothesisDelta, OodaStep, Phase};

    pub(crate) fn iteration(number: u32) -> OodaIteration {
        OodaIteration {
            id: format!("I{number}"),
            number,
            phase: Phase::Validation,
            start_turn: number,
            end_turn: number,
            steps_completed: OodaStep::ALL.to_vec(),
            steps_skipped: vec![],
            new_evidence: 1,
            new_hypotheses: 0,
            tests_performed: 1,
            hypotheses_retired: 0,
            confidence_delta: -0.2,
            insights: vec!["error rate correlates with the 14:05 deploy".into()],
            made_progress: true,
            stall_reason: None,
            touched_hypotheses: vec!["H2".into()],
            tested_categories: vec![],
            actions: vec![ActionRecord {
                hypothesis_id: Some("H2".into()),
                evidence_id: Some("P1".into()),
                description: "compared pool metrics with error timestamps".into(),
                outcome: TestOutcome::Inconclusive,
            }],
            hypothesis_deltas: vec![HypothesisDelta {
                hypothesis_id: "H2".into(),
                before: 0.6,
                after: 0.4,
                status: HypothesisStatus::Testing,
            }],
        }
    }

    #[test]
    fn record_contains_every_section() {
        let record = render_record(&iteration(4));
        assert!(record.starts_with("I4 [validation]"));
        assert!(record.contains("H2 confidence dropped to 0.40"));
        assert!(record.contains("test H2 inconclusive"));
        assert!(record.contains("insight: error rate"));
    }

    #[test]
    fn facts_put_resolutions_first() {
        let mut it = iteration(5);
        it.hypothesis_deltas.push(HypothesisDelta {
            hypothesis_id: "H1".into(),
            before: 0.32,
            after: 0.27,
            status: HypothesisStatus::Retired,
        });
        let facts = key_facts(&it);
        assert_eq!(facts[0], "H1 retired at 0.27");
        assert_eq!(facts[1], "H2 confidence dropped to 0.40");
    }

    #[test]
    fn extraction_fits_the_cap() {
        let mut it = iteration(9);
        it.made_progress = false;
        it.new_hypotheses = 3;
        let facts = extract_facts(&it, 12, 3.5);
        assert!(!facts.is_empty());
        assert!(estimate_tokens(&render_facts(&it.id, &facts), 3.5) <= 12);
    }
}
