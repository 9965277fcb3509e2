//! End-to-end behavior of the engine across many turns.
//!
//! Everything here runs offline or against a reasoner that never answers,
//! so the deterministic paths are what is being exercised.

use std::sync::Arc;
use std::time::Duration;

use faultline::api::{Reasoner, ReasoningError, ReasoningFuture};
use faultline::investigation::evidence::NewEvidenceRequest;
use faultline::investigation::hypotheses::{AnchoringReason, DECAY_RETIREMENT_REASON};
use faultline::investigation::{
    Engine, EngineConfig, HypothesisConfig, HypothesisManager, ResponseDirectives, TurnInput,
};
use faultline::model::validate::validate;
use faultline::model::{
    EngagementMode, EvidenceCategory, EvidenceStatus, EvidenceSubmission, EvidenceTracker,
    Hypothesis, HypothesisCategory, HypothesisStatus, InvestigationState, OodaState, Phase,
    Priority, Severity, TestOutcome,
};

/// A reasoning service that accepts requests and never answers.
struct Unresponsive;

impl Reasoner for Unresponsive {
    fn name(&self) -> &str {
        "unresponsive"
    }

    fn generate_text<'a>(&'a self, _: &'a str, _: Duration) -> ReasoningFuture<'a, String> {
        Box::pin(std::future::pending())
    }

    fn generate_structured<'a>(
        &'a self,
        _: &'a str,
        _: &'a serde_json::Value,
        _: Duration,
    ) -> ReasoningFuture<'a, serde_json::Value> {
        Box::pin(async { Err(ReasoningError::Unavailable("connection refused".into())) })
    }
}

fn offline() -> Engine {
    Engine::offline(EngineConfig::offline())
}

fn evidence_for(category: EvidenceCategory) -> &'static str {
    match category {
        EvidenceCategory::Scope => "all EU users on the API, US traffic is fine",
        EvidenceCategory::Symptoms => "HTTP 500 with 'connection pool exhausted' in the API logs",
        EvidenceCategory::Metrics => "error rate 38%, connection pool at 100% on api-eu-1",
        EvidenceCategory::Timeline => "started at 14:05 UTC",
        EvidenceCategory::Changes => "release 412 deployed at 14:00, pool size config changed",
        EvidenceCategory::Configuration => "max_pool_size lowered from 50 to 10 in release 412",
        EvidenceCategory::Environment => "production, eu-west-1, kubernetes",
    }
}

/// Run an incident for `turns` lead turns, answering the first open request
/// each time. Returns every state along the way.
async fn drive(engine: &Engine, turns: usize) -> Vec<InvestigationState> {
    let consultant = InvestigationState::consultant("case-drive");
    let mut state = engine
        .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
        .await
        .unwrap()
        .state;
    let mut states = vec![state.clone()];

    for i in 0..turns {
        let directives = ResponseDirectives::for_state(&state);
        let mut input = TurnInput::message(format!("update {i}: still seeing errors on the API"))
            .acknowledging();
        if let Some(request) = directives.pending_evidence.first() {
            input = input.with_evidence(EvidenceSubmission::answering(
                &request.id,
                evidence_for(request.category),
            ));
        }
        state = engine.process_turn(&state, &input).await.unwrap().state;
        states.push(state.clone());
    }
    states
}

/// Engage a post-mortem, which starts at Validation with hypotheses.
async fn post_mortem(engine: &Engine, case: &str) -> InvestigationState {
    let state = engine
        .process_turn(
            &InvestigationState::consultant(case),
            &TurnInput::message("postmortem for yesterday's checkout outage").with_consent(true),
        )
        .await
        .unwrap()
        .state;
    assert_eq!(state.phase, Phase::Validation);
    state
}

fn top_hypothesis(state: &InvestigationState) -> String {
    state
        .ooda
        .active_hypotheses()
        .max_by(|a, b| a.likelihood.total_cmp(&b.likelihood))
        .map(|h| h.id.clone())
        .expect("an active hypothesis")
}

#[tokio::test]
async fn strong_report_engages_with_a_framed_anomaly() {
    let consultant = InvestigationState::consultant("case-a");
    let outcome = offline()
        .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
        .await
        .unwrap();

    assert_eq!(consultant.mode, EngagementMode::Consultant);
    assert_eq!(outcome.state.mode, EngagementMode::LeadInvestigator);
    assert_eq!(outcome.state.phase, Phase::BlastRadius);
    assert_eq!(outcome.state.transitions.len(), 1);
    assert_eq!(outcome.state.transitions[0].from, Phase::Intake);

    let frame = outcome.state.ooda.anomaly.as_ref().unwrap();
    assert_eq!(frame.scope.as_deref(), Some("EU users"));
    assert!(frame.severity >= Severity::High);
}

#[test]
fn repeated_infrastructure_tests_trigger_anchoring() {
    let config = HypothesisConfig::default();
    let manager = HypothesisManager::new(&config);
    let mut ooda = OodaState::default();
    for statement in [
        "Node pool lost capacity",
        "Load balancer health checks flapping",
        "Kubernetes scheduler evicting pods",
        "Disk pressure on worker nodes",
    ] {
        let id = ooda.next_hypothesis_id();
        ooda.hypotheses.push(Hypothesis::new(
            id,
            statement,
            HypothesisCategory::Infrastructure,
            0.45,
            1,
        ));
    }

    for round in 0..5 {
        let id = ooda.hypotheses[round % 4].id.clone();
        manager
            .note_test(&mut ooda, &id, TestOutcome::Inconclusive)
            .unwrap();
    }

    let reason = manager.detect_anchoring(&ooda).expect("anchoring detected");
    let anchored = reason.anchored_category(&ooda);
    assert_eq!(anchored, Some(HypothesisCategory::Infrastructure));

    let forced = manager.force_alternatives(&ooda.category_tests, anchored);
    assert!(!forced.is_empty() && forced.len() <= 3);
    assert!(!forced.contains(&HypothesisCategory::Infrastructure));
}

#[tokio::test]
async fn stalled_loop_forces_an_alternative_category() {
    let mut config = EngineConfig::offline();
    config.hypotheses.decay_grace_turns = 100;
    let engine = Engine::offline(config);
    let mut state = post_mortem(&engine, "case-stall").await;

    // Categories in play count as heavily tested, infrastructure most of all.
    // The rest were tried once, so escalation has nothing untested to add.
    let active: Vec<HypothesisCategory> =
        state.ooda.active_hypotheses().map(|h| h.category).collect();
    for category in HypothesisCategory::ALL {
        let tests = if active.contains(&category) { 2 } else { 1 };
        state.ooda.category_tests.insert(category, tests);
    }
    state
        .ooda
        .category_tests
        .insert(HypothesisCategory::Infrastructure, 3);

    let mut notice = None;
    for i in 0..6 {
        let outcome = engine
            .process_turn(&state, &TurnInput::message(format!("still digging, check {i}")))
            .await
            .unwrap();
        state = outcome.state;
        if let Some(anchoring) = outcome.directives.anchoring {
            assert!(outcome.directives.stall.is_some());
            notice = Some(anchoring);
            break;
        }
    }
    let notice = notice.expect("a stalled loop flags anchoring");
    assert!(matches!(notice.reason, AnchoringReason::ConsecutiveStalls { .. }));
    assert!(!notice.forced_categories.is_empty());
    assert!(!notice.forced_categories.contains(&HypothesisCategory::Infrastructure));
    assert_eq!(state.ooda.forced_categories, notice.forced_categories);

    let known: Vec<String> = state.ooda.hypotheses.iter().map(|h| h.id.clone()).collect();
    let next = engine
        .process_turn(&state, &TurnInput::message("nothing new"))
        .await
        .unwrap()
        .state;
    assert!(
        next.ooda
            .hypotheses
            .iter()
            .filter(|h| !known.contains(&h.id))
            .any(|h| notice.forced_categories.contains(&h.category))
    );
    assert!(next.ooda.forced_categories.is_empty());
}

#[test]
fn neglected_favourite_decays_into_retirement() {
    let config = HypothesisConfig::default();
    let manager = HypothesisManager::new(&config);
    let mut ooda = OodaState::default();
    let id = ooda.next_hypothesis_id();
    ooda.hypotheses.push(Hypothesis::new(
        id.clone(),
        "Bad deploy of release 412",
        HypothesisCategory::Code,
        0.82,
        0,
    ));

    let mut previous = 0.82;
    for turn in 1..=4 {
        manager.apply_decay(&mut ooda, turn);
        let now = ooda.hypothesis(&id).unwrap().likelihood;
        assert!(now <= previous, "turn {turn}: {now} > {previous}");
        previous = now;
    }

    let h = ooda.hypothesis(&id).unwrap();
    assert!(h.likelihood < 0.3);
    assert_eq!(h.status, HypothesisStatus::Retired);
    assert_eq!(h.retirement_reason.as_deref(), Some(DECAY_RETIREMENT_REASON));
}

#[tokio::test]
async fn unresponsive_reasoner_never_fails_a_turn() {
    let config = EngineConfig::default()
        .with_reasoning_timeout(Duration::from_millis(20))
        .with_compression_interval(3);
    let engine = Engine::new(config.clone(), Arc::new(Unresponsive));

    let consultant = InvestigationState::consultant("case-d");
    let mut state = engine
        .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
        .await
        .unwrap()
        .state;

    let mut summaries_degraded = false;
    for i in 0..8 {
        let outcome = engine
            .process_turn(&state, &TurnInput::message(format!("errors continue, check {i}")))
            .await
            .unwrap();
        summaries_degraded |= outcome
            .directives
            .degraded
            .iter()
            .any(|d| d.capability == "memory summaries");
        state = outcome.state;
    }

    assert!(summaries_degraded);
    assert!(state.memory.compressions > 0);
    let usage = state.memory.usage(config.memory.chars_per_token);
    assert!(usage.compressible_within(&config.memory.budget));
}

#[tokio::test]
async fn memory_stays_within_budget_over_long_runs() {
    let engine = offline();
    let config = engine.config().clone();
    let states = drive(&engine, 14).await;

    for state in states.iter().filter(|s| s.turn >= 10) {
        let usage = state.memory.usage(config.memory.chars_per_token);
        assert!(
            usage.total() as f64 <= config.memory.budget.total as f64 * 1.1,
            "turn {}: {usage:?}",
            state.turn
        );
        assert!(usage.compressible_within(&config.memory.budget));
    }
}

#[tokio::test]
async fn every_turn_leaves_a_valid_record() {
    let engine = offline();
    let retirement = engine.config().hypotheses.retirement_threshold;
    let states = drive(&engine, 12).await;

    let mut insights = 0;
    for state in &states {
        validate(state).unwrap();
        assert!((0.0..=1.0).contains(&state.evidence.coverage));
        for h in &state.ooda.hypotheses {
            if h.status == HypothesisStatus::Retired {
                assert!(h.likelihood < retirement || h.is_explicitly_refuted());
            }
        }
        assert!(state.memory.persistent.len() >= insights);
        insights = state.memory.persistent.len();
    }
    assert!(states.windows(2).all(|w| w[1].turn == w[0].turn + 1));
}

#[tokio::test]
async fn decay_never_raises_an_idle_hypothesis() {
    let engine = offline();
    let states = drive(&engine, 12).await;

    for pair in states.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        for h in &after.ooda.hypotheses {
            let Some(prev) = before.ooda.hypothesis(&h.id) else {
                continue;
            };
            let idle = h.last_progress_turn == prev.last_progress_turn
                && after.turn.saturating_sub(h.last_progress_turn) >= 2
                && h.status == prev.status;
            if idle {
                assert!(
                    h.likelihood <= prev.likelihood,
                    "{} rose from {} to {} at turn {}",
                    h.id,
                    prev.likelihood,
                    h.likelihood,
                    after.turn
                );
            }
        }
    }
}

#[test]
fn coverage_only_grows_as_evidence_arrives() {
    let mut tracker = EvidenceTracker::default();
    let scope = tracker.request_evidence(
        NewEvidenceRequest::new(EvidenceCategory::Scope, "affected population", "who")
            .with_priority(Priority::Critical),
        1,
    );
    let start = tracker.request_evidence(
        NewEvidenceRequest::new(EvidenceCategory::Timeline, "start time", "when")
            .with_priority(Priority::Critical),
        1,
    );
    assert_eq!(tracker.compute_coverage(), 0.0);

    let submissions = [
        EvidenceSubmission::partial(&scope.id, "EU only", 0.4),
        EvidenceSubmission::unsolicited("unrelated chatter"),
        EvidenceSubmission::partial(&scope.id, "all EU users", 0.9),
        EvidenceSubmission::answering(&start.id, "14:05 UTC"),
        EvidenceSubmission::answering(&start.id, "confirmed 14:05 UTC"),
    ];
    let mut previous = 0.0;
    for (turn, submission) in submissions.into_iter().enumerate() {
        tracker.record_provided(submission, turn as u32 + 2).unwrap();
        let coverage = tracker.coverage_score();
        assert!((0.0..=1.0).contains(&coverage));
        assert!(coverage >= previous);
        previous = coverage;
    }
    assert_eq!(previous, 1.0);
}

#[tokio::test]
async fn refuting_a_hypothesis_keeps_earned_coverage() {
    let engine = offline();
    let mut state = post_mortem(&engine, "case-refute").await;
    let target = top_hypothesis(&state);
    let request = state.evidence.request_evidence(
        NewEvidenceRequest::new(
            EvidenceCategory::Metrics,
            "pool saturation",
            "Connection pool usage on api-eu-1",
        )
        .with_priority(Priority::Critical)
        .for_hypothesis(&target),
        state.turn,
    );

    let answered = engine
        .process_turn(
            &state,
            &TurnInput::message("partial data").with_evidence(EvidenceSubmission::partial(
                &request.id,
                "pool graphs for half the hosts",
                0.6,
            )),
        )
        .await
        .unwrap()
        .state;
    let before = answered.evidence.coverage;
    assert!(before > 0.0);

    let refuted = engine
        .process_turn(
            &answered,
            &TurnInput::message("ran the check").with_test(
                &target,
                TestOutcome::Refuted,
                "pool stayed at 40% during the errors",
            ),
        )
        .await
        .unwrap()
        .state;
    assert_eq!(
        refuted.ooda.hypothesis(&target).unwrap().status,
        HypothesisStatus::Refuted
    );
    assert_eq!(
        refuted.evidence.request(&request.id).unwrap().status,
        EvidenceStatus::Obsolete
    );
    assert!(refuted.evidence.coverage >= before);
}

#[tokio::test]
async fn root_cause_and_fix_survive_a_full_persistent_tier() {
    let engine = offline();
    let memory = engine.config().memory.clone();
    let mut state = post_mortem(&engine, "case-insights").await;
    let target = top_hypothesis(&state);
    for n in 0..3 {
        let note = format!("context note {n}: {}", "background ".repeat(20));
        state.memory.add_insight(
            &note,
            state.turn,
            memory.insight_max_tokens,
            memory.chars_per_token,
        );
    }
    assert!(state.memory.usage(memory.chars_per_token).persistent >= memory.budget.persistent);
    let prefilled = state.memory.persistent.clone();

    for _ in 0..12 {
        if state.is_closed() {
            break;
        }
        let input = match state.phase {
            Phase::Validation => TurnInput::message("ran the check").with_test(
                &target,
                TestOutcome::Supported,
                "pool exhaustion reproduced in staging",
            ),
            Phase::Solution => TurnInput::default().with_fix("raised max_pool_size back to 50"),
            _ => TurnInput::message("continuing"),
        };
        state = engine.process_turn(&state, &input).await.unwrap().state;
    }

    assert!(state.is_closed());
    assert!(state.solution.verified);
    let texts: Vec<&str> = state.memory.persistent.iter().map(|i| i.text.as_str()).collect();
    assert!(texts.iter().any(|t| t.starts_with("Root cause")), "{texts:?}");
    assert!(texts.iter().any(|t| t.starts_with("Fix verified")), "{texts:?}");
    assert!(prefilled.iter().all(|p| state.memory.persistent.contains(p)));
}

#[tokio::test]
async fn progress_view_is_pure() {
    let engine = offline();
    let states = drive(&engine, 4).await;
    let state = states.last().unwrap();
    let snapshot = serde_json::to_string(state).unwrap();

    let first = engine.progress_view(state);
    let second = engine.progress_view(state);
    assert_eq!(first, second);
    assert_eq!(serde_json::to_string(state).unwrap(), snapshot);
}

#[tokio::test]
async fn concurrent_turns_do_not_share_state() {
    let engine = offline();
    let a = InvestigationState::consultant("case-a");
    let b = InvestigationState::consultant("case-b");

    let input_a = TurnInput::message("API 500 errors, all EU users");
    let input_b = TurnInput::message("checkout outage, every customer sees payment failures");
    let (ra, rb) = tokio::join!(
        engine.process_turn(&a, &input_a),
        engine.process_turn(&b, &input_b),
    );
    let (a2, b2) = (ra.unwrap().state, rb.unwrap().state);

    assert_ne!(a2.id, b2.id);
    assert_eq!(a2.case_id, "case-a");
    assert_eq!(b2.case_id, "case-b");
    let frame_a = a2.ooda.anomaly.as_ref().unwrap();
    let frame_b = b2.ooda.anomaly.as_ref().unwrap();
    assert!(frame_a.statement.contains("EU"));
    assert!(!frame_b.statement.contains("EU"));
}
