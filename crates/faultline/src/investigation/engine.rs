//! The turn entry point.
//!
//! [`Engine::process_turn`] takes a state and one unit of user input and
//! returns the updated state plus [`ResponseDirectives`]. It never mutates
//! the state it is given: work happens on a private copy that is handed back
//! only when the whole turn succeeded, so an abandoned or failed turn leaves
//! nothing half-applied.
//!
//! ```ignore
//! let engine = Engine::offline(EngineConfig::offline());
//! let state = InvestigationState::consultant("case-42");
//! let outcome = engine
//!     .process_turn(&state, &TurnInput::message("API 500 errors, all EU users"))
//!     .await?;
//! assert_eq!(outcome.state.phase, Phase::BlastRadius);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::reasoning::{OfflineReasoner, Reasoner};
use crate::error::InvestigationError;
use crate::memory::{
    FallbackSummarizer, GenerativeSummarizer, MemoryCompressor, estimate_tokens,
};
use crate::model::validate::validate_with;
use crate::model::{
    ConfidencePoint, EvidenceSubmission, HypothesisStatus, InvestigationState,
    InvestigationStatus, Phase, PhaseTransition, SignalStrength, TestOutcome, TransitionKind,
    Urgency,
};

use super::config::{EngineConfig, Toggle};
use super::controller::PhaseController;
use super::directives::{
    ConsentPrompt, ProgressSummary, RejectionNotice, ResponseDirectives,
    build_report, progress_view,
};
use super::events::{EngineEvent, EventHandler, LoggingHandler};
use super::hypotheses::HypothesisManager;
use super::ooda::{OodaRunner, TurnScratch};
use super::signals::{ProblemSignal, consent_reply, detect_signal};

// ── Input ─────────────────────────────────────────────────────────

/// A test the user ran against a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub hypothesis_id: String,
    pub outcome: TestOutcome,
    pub description: String,
}

/// An evidence request the user cannot fulfil.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedReport {
    pub request_id: String,
    pub reason: String,
}

/// Everything one turn brings in.
///
/// ```ignore
/// let input = TurnInput::message("pool stats attached")
///     .with_evidence(EvidenceSubmission::answering("E3", "pool at 100%"))
///     .blocking("E4", "no access to the CDN console");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    pub message: String,
    /// Already-classified evidence from the supply channel.
    #[serde(default)]
    pub evidence: Vec<EvidenceSubmission>,
    /// Explicit answer to a consent offer.
    #[serde(default)]
    pub consent: Option<bool>,
    #[serde(default)]
    pub requested_phase: Option<Phase>,
    #[serde(default)]
    pub test_results: Vec<TestReport>,
    #[serde(default)]
    pub blocked: Vec<BlockedReport>,
    /// The user confirms the anomaly frame as stated.
    #[serde(default)]
    pub acknowledge_frame: bool,
    #[serde(default)]
    pub fix_applied: Option<String>,
    #[serde(default)]
    pub regression: bool,
    /// Refuted or retired hypotheses to re-open.
    #[serde(default)]
    pub reopen: Vec<String>,
}

impl TurnInput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            ..Self::default()
        }
    }

    pub fn with_evidence(mut self, submission: EvidenceSubmission) -> Self {
        self.evidence.push(submission);
        self
    }

    pub fn with_consent(mut self, consent: bool) -> Self {
        self.consent = Some(consent);
        self
    }

    pub fn requesting(mut self, phase: Phase) -> Self {
        self.requested_phase = Some(phase);
        self
    }

    pub fn with_test(
        mut self,
        hypothesis_id: impl Into<String>,
        outcome: TestOutcome,
        description: impl Into<String>,
    ) -> Self {
        self.test_results.push(TestReport {
            hypothesis_id: hypothesis_id.into(),
            outcome,
            description: description.into(),
        });
        self
    }

    pub fn blocking(mut self, request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.blocked.push(BlockedReport {
            request_id: request_id.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn acknowledging(mut self) -> Self {
        self.acknowledge_frame = true;
        self
    }

    pub fn with_fix(mut self, description: impl Into<String>) -> Self {
        self.fix_applied = Some(description.into());
        self
    }

    pub fn with_regression(mut self) -> Self {
        self.regression = true;
        self
    }

    pub fn reopening(mut self, hypothesis_id: impl Into<String>) -> Self {
        self.reopen.push(hypothesis_id.into());
        self
    }

    fn has_attachment(&self) -> bool {
        !self.evidence.is_empty()
    }
}

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub directives: ResponseDirectives,
    /// The state to persist. On engagement this is the fresh investigation.
    pub state: InvestigationState,
    /// The consultant record this turn replaced, to be archived.
    pub superseded: Option<InvestigationState>,
}

/// How much a persistent insight is worth keeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Insight {
    /// Background such as the engagement note or the confirmed anomaly.
    Context,
    /// A validated root cause, a verified fix or a skipped diagnosis.
    Essential,
}

/// What a consultant or lead turn produced, before directives are built.
struct TurnResult {
    state: InvestigationState,
    superseded: Option<InvestigationState>,
    transitions: Vec<PhaseTransition>,
    consent: Option<ConsentPrompt>,
}

// ── Engine ────────────────────────────────────────────────────────

/// Processes turns for any number of investigations.
///
/// The engine holds configuration and shared services only; no
/// per-investigation state lives here, so one engine can serve concurrent
/// turns of different investigations.
pub struct Engine {
    config: EngineConfig,
    reasoner: Arc<dyn Reasoner>,
    compressor: MemoryCompressor,
    events: Box<dyn EventHandler>,
}

impl Engine {
    pub fn new(config: EngineConfig, reasoner: Arc<dyn Reasoner>) -> Self {
        let cpt = config.memory.chars_per_token;
        let summarizer = if config.reasoning_for(|r| r.summaries) {
            let timeout = config.reasoning.config.timeout;
            FallbackSummarizer::new(
                Box::new(GenerativeSummarizer::new(reasoner.clone(), timeout)),
                timeout,
                cpt,
            )
        } else {
            FallbackSummarizer::extractive_only(cpt)
        };
        Self {
            compressor: MemoryCompressor::new(config.memory.clone(), summarizer),
            config,
            reasoner,
            events: Box::new(LoggingHandler),
        }
    }

    /// An engine that never calls a reasoning service.
    pub fn offline(config: EngineConfig) -> Self {
        let config = EngineConfig {
            reasoning: Toggle::disabled(),
            ..config
        };
        Self::new(config, Arc::new(OfflineReasoner))
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.events = Box::new(handler);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only progress projection. Never mutates `state`.
    pub fn progress_view(&self, state: &InvestigationState) -> ProgressSummary {
        progress_view(state, self.config.memory.chars_per_token)
    }

    fn runner(&self) -> OodaRunner<'_> {
        OodaRunner {
            config: &self.config,
            reasoner: self.reasoner.as_ref(),
            events: self.events.as_ref(),
        }
    }

    fn controller(&self) -> PhaseController<'_> {
        PhaseController::new(&self.config.controller)
    }

    /// Process one turn.
    ///
    /// Fails only for a state that does not pass validation
    /// ([`InvestigationError::CorruptPersistedState`]). Reasoning-service
    /// failures and input that references unknown hypotheses or evidence
    /// requests degrade the turn instead, and a rejected phase request returns
    /// the state unchanged with a rejection directive.
    pub async fn process_turn(
        &self,
        state: &InvestigationState,
        input: &TurnInput,
    ) -> Result<TurnOutcome, InvestigationError> {
        self.validate(state)?;

        if state.is_closed() {
            let mut directives = ResponseDirectives::for_state(state);
            if state.status == InvestigationStatus::Closed {
                directives.report = Some(build_report(state));
            }
            return Ok(TurnOutcome {
                directives,
                state: state.clone(),
                superseded: None,
            });
        }

        let requested = match input.requested_phase {
            None => None,
            Some(to) => match self.controller().validate_transition(state, to) {
                Ok(kind) => Some((to, kind)),
                Err(InvestigationError::InvalidStateTransition { from, to, reason }) => {
                    return Ok(self.rejected(state, from, to, reason));
                }
                Err(e) => return Err(e),
            },
        };

        let mut work = state.clone();
        work.turn += 1;
        self.events.on_event(&EngineEvent::TurnStarted {
            investigation_id: &work.id,
            turn: work.turn,
            mode: work.mode,
            phase: work.phase,
        });

        let mut scratch = TurnScratch::default();
        let result = if work.is_lead() {
            let before = work.transitions.len();
            self.lead_turn(&mut work, input, requested, &mut scratch).await;
            let transitions = work.transitions[before..].to_vec();
            TurnResult {
                state: work,
                superseded: None,
                transitions,
                consent: None,
            }
        } else {
            self.consultant_turn(work, input, &mut scratch).await
        };

        self.finish_turn(result, scratch)
    }

    fn validate(&self, state: &InvestigationState) -> Result<(), InvestigationError> {
        validate_with(
            state,
            self.config.hypotheses.retirement_threshold,
            self.config.hypotheses.validation_threshold,
        )
    }

    fn rejected(
        &self,
        state: &InvestigationState,
        from: Phase,
        to: Phase,
        reason: String,
    ) -> TurnOutcome {
        self.events.on_event(&EngineEvent::TransitionRejected {
            investigation_id: &state.id,
            from,
            to,
            reason: &reason,
        });
        let mut directives = ResponseDirectives::for_state(state);
        directives.rejection = Some(RejectionNotice { from, to, reason });
        TurnOutcome {
            directives,
            state: state.clone(),
            superseded: None,
        }
    }

    // ── Consultant mode ───────────────────────────────────────────

    async fn consultant_turn(
        &self,
        mut work: InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
    ) -> TurnResult {
        let signal = detect_signal(&input.message, input.has_attachment());
        let reply = input.consent.or_else(|| {
            if work.consent.offered {
                consent_reply(&input.message)
            } else {
                None
            }
        });

        let engage_now = match reply {
            Some(true) => true,
            Some(false) => false,
            None => {
                signal.strength == SignalStrength::Strong
                    && self.config.controller.engage_on_strong_signal
            }
        };

        if engage_now {
            let report = if work.consent.offered && signal.strength < SignalStrength::Weak {
                work.consent
                    .problem_report
                    .clone()
                    .unwrap_or_else(|| input.message.clone())
            } else {
                input.message.clone()
            };
            return self.engage(work, input, &signal, report, scratch).await;
        }

        let mut consent = None;
        if reply == Some(false) {
            info!("[{}] investigation declined", work.id);
            work.consent = Default::default();
        } else if signal.strength > SignalStrength::None {
            let first_offer = !work.consent.offered;
            work.consent.offered = true;
            work.consent.offered_turn.get_or_insert(work.turn);
            if work.consent.signal.is_none_or(|s| signal.strength >= s) {
                work.consent.signal = Some(signal.strength);
                work.consent.problem_report = Some(input.message.clone());
            }
            work.consent.urgency = Some(
                work.consent
                    .urgency
                    .map_or(signal.urgency, |u| u.max(signal.urgency)),
            );
            work.consent.strategy.get_or_insert(signal.strategy);
            if first_offer {
                self.events.on_event(&EngineEvent::ConsentRequested {
                    investigation_id: &work.id,
                    signal: signal.strength,
                });
            }
            consent = Some(ConsentPrompt {
                signal: signal.strength,
                urgency: work.consent.urgency.unwrap_or(signal.urgency),
                strategy: work.consent.strategy.unwrap_or(signal.strategy),
                reasons: signal.reasons.clone(),
            });
        }

        TurnResult {
            state: work,
            superseded: None,
            transitions: Vec::new(),
            consent,
        }
    }

    async fn engage(
        &self,
        consultant: InvestigationState,
        input: &TurnInput,
        signal: &ProblemSignal,
        report: String,
        scratch: &mut TurnScratch,
    ) -> TurnResult {
        let mut fresh = self.controller().engage(&consultant, signal);
        self.events.on_event(&EngineEvent::Engaged {
            superseded_id: &consultant.id,
            investigation_id: &fresh.id,
            entry_phase: fresh.entry_phase,
        });
        for transition in &fresh.transitions {
            self.events.on_event(&EngineEvent::PhaseTransition {
                investigation_id: &fresh.id,
                from: transition.from,
                to: transition.to,
                reason: &transition.reason,
            });
        }
        if fresh.urgency == Urgency::Critical || fresh.entry_phase != Phase::BlastRadius {
            let note = format!("Engaged at {} ({:?} urgency)", fresh.entry_phase, fresh.urgency);
            self.remember(&mut fresh, &note, Insight::Context);
        }
        self.runner().request_playbook(&mut fresh);

        scratch.problem_report = Some(report);
        self.lead_turn(&mut fresh, input, None, scratch).await;

        let mut superseded = consultant;
        superseded.status = InvestigationStatus::Superseded;
        superseded.consent.offered = false;
        superseded.touch();

        let transitions = fresh.transitions.clone();
        TurnResult {
            state: fresh,
            superseded: Some(superseded),
            transitions,
            consent: None,
        }
    }

    // ── Lead investigator mode ────────────────────────────────────

    async fn lead_turn(
        &self,
        state: &mut InvestigationState,
        input: &TurnInput,
        requested: Option<(Phase, TransitionKind)>,
        scratch: &mut TurnScratch,
    ) {
        let turn = state.turn;
        let manager = HypothesisManager::new(&self.config.hypotheses);
        let input = &self.screen_tests(state, input, scratch);

        if let Some((to, kind)) = requested {
            self.transition(state, to, kind, "requested by the user");
        }
        for id in &input.reopen {
            if let Err(e) = manager.reopen(&mut state.ooda, id, turn) {
                self.skipped(state, "reopen", &e, scratch);
            }
        }
        for blocked in &input.blocked {
            if let Err(e) = state.evidence.mark_blocked(&blocked.request_id, &blocked.reason) {
                self.skipped(state, "blocked evidence", &e, scratch);
                continue;
            }
            self.events.on_event(&EngineEvent::EvidenceBlocked {
                investigation_id: &state.id,
                request_id: &blocked.request_id,
                reason: &blocked.reason,
            });
        }
        for submission in &input.evidence {
            let provided = match state.evidence.record_provided(submission.clone(), turn) {
                Ok(provided) => provided,
                Err(e) => {
                    // Keep the content; only the link to the request is lost.
                    self.skipped(state, "evidence request link", &e, scratch);
                    let unlinked = EvidenceSubmission {
                        request_id: None,
                        ..submission.clone()
                    };
                    match state.evidence.record_provided(unlinked, turn) {
                        Ok(provided) => provided,
                        Err(e) => {
                            self.skipped(state, "evidence intake", &e, scratch);
                            continue;
                        }
                    }
                }
            };
            debug!("[{}] received {} ({:.0}%)", state.id, provided.id, provided.completeness * 100.0);
        }

        let runner = self.runner();
        runner.run_iteration(state, input, scratch).await;
        self.record_insights(state);

        let controller = self.controller();
        if state.phase == Phase::Solution && controller.fix_verified(state) && !state.solution.verified {
            state.solution.verified = true;
            let fix = state.solution.fix_description.clone().unwrap_or_default();
            self.remember(state, &format!("Fix verified: {fix}"), Insight::Essential);
        }
        if let Some((next, reason)) = controller.completion_transition(state) {
            self.transition(state, next, TransitionKind::Advance, &reason);
        }

        if state.phase == Phase::Document && !state.is_closed() {
            if scratch.report.is_none() {
                runner.run_iteration(state, input, scratch).await;
            }
            controller.close(state);
            let confirmed = scratch
                .report
                .as_ref()
                .is_some_and(|r| r.root_cause_confirmed);
            self.events.on_event(&EngineEvent::InvestigationClosed {
                investigation_id: &state.id,
                root_cause_confirmed: confirmed,
            });
        }

        self.compress(state, scratch).await;

        let max = state.ooda.max_likelihood();
        state.ooda.confidence_by_turn.push(ConfidencePoint {
            turn,
            likelihood: max,
        });
    }

    /// Drop test reports for hypotheses this investigation does not have.
    fn screen_tests(
        &self,
        state: &InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
    ) -> TurnInput {
        let mut screened = input.clone();
        screened.test_results.retain(|t| {
            let known = state.ooda.hypothesis(&t.hypothesis_id).is_some();
            if !known {
                let e = InvestigationError::UnknownHypothesis(t.hypothesis_id.clone());
                self.skipped(state, "test results", &e, scratch);
            }
            known
        });
        screened
    }

    /// Input that cannot apply to this investigation is skipped, not fatal.
    fn skipped(
        &self,
        state: &InvestigationState,
        capability: &str,
        error: &InvestigationError,
        scratch: &mut TurnScratch,
    ) {
        debug!("[{}] skipping {capability}: {error}", state.id);
        scratch.degrade(capability, error);
    }

    fn transition(&self, state: &mut InvestigationState, to: Phase, kind: TransitionKind, reason: &str) {
        let from = state.phase;
        self.controller().apply(state, to, kind, reason);
        self.events.on_event(&EngineEvent::PhaseTransition {
            investigation_id: &state.id,
            from,
            to,
            reason,
        });
        if kind == TransitionKind::Skip {
            self.remember(
                state,
                "Skipped to solution under critical urgency; root cause unconfirmed",
                Insight::Essential,
            );
        }
        self.runner().request_playbook(state);
    }

    /// Durable facts worth keeping for the rest of the investigation.
    fn record_insights(&self, state: &mut InvestigationState) {
        let mut insights = Vec::new();
        if let Some(frame) = &state.ooda.anomaly
            && frame.acknowledged
            && frame.confidence >= self.config.controller.frame_confirmation
        {
            insights.push((format!("Anomaly: {}", frame.statement), Insight::Context));
        }
        for h in state
            .ooda
            .hypotheses
            .iter()
            .filter(|h| h.status == HypothesisStatus::Validated)
        {
            insights.push((
                format!("Root cause {} validated: {}", h.id, h.statement),
                Insight::Essential,
            ));
        }
        for (text, kind) in insights {
            self.remember(state, &text, kind);
        }
    }

    /// Append a persistent insight.
    ///
    /// Context insights only use the persistent budget left after one
    /// insight's worth is held back; essential ones are always kept.
    fn remember(&self, state: &mut InvestigationState, text: &str, kind: Insight) {
        let memory = &self.config.memory;
        let cpt = memory.chars_per_token;
        if kind == Insight::Context {
            let cost = estimate_tokens(text, cpt).min(memory.insight_max_tokens);
            let room = memory
                .budget
                .persistent
                .saturating_sub(memory.insight_max_tokens);
            if state.memory.usage(cpt).persistent + cost > room {
                debug!("[{}] persistent tier full, not keeping: {text}", state.id);
                return;
            }
        }
        state
            .memory
            .add_insight(text, state.turn, memory.insight_max_tokens, cpt);
    }

    async fn compress(&self, state: &mut InvestigationState, scratch: &mut TurnScratch) {
        if !self.compressor.is_due(state.turn) {
            return;
        }
        let report = self
            .compressor
            .compress(&mut state.memory, &mut state.ooda.iterations, state.turn)
            .await;
        for failure in &report.failures {
            let error = failure.to_string();
            self.events.on_event(&EngineEvent::SummarizerFallback {
                investigation_id: &state.id,
                error: &error,
            });
        }
        if let Some(failure) = report.failures.first() {
            scratch.degrade("memory summaries", failure);
        }
        self.events.on_event(&EngineEvent::CompressionCompleted {
            investigation_id: &state.id,
            before: report.before,
            after: report.after,
            fallbacks: report.fallbacks,
        });
    }

    // ── Directives ────────────────────────────────────────────────

    fn finish_turn(
        &self,
        result: TurnResult,
        scratch: TurnScratch,
    ) -> Result<TurnOutcome, InvestigationError> {
        let TurnResult {
            mut state,
            superseded,
            transitions,
            consent,
        } = result;
        state.touch();
        self.validate(&state)?;

        let mut directives = ResponseDirectives::for_state(&state);
        directives.superseded_id = superseded.as_ref().map(|s| s.id.clone());
        directives.consent = consent;
        directives.anchoring = scratch.anchoring;
        directives.stall = scratch.stall;
        directives.degraded = scratch.degraded;
        directives.transitions = transitions;
        directives.report = scratch.report.or_else(|| {
            (state.status == InvestigationStatus::Closed).then(|| build_report(&state))
        });
        if state.phase == Phase::Hypothesis && state.urgency == Urgency::Critical {
            directives.suggested_transition = Some(Phase::Solution);
        }

        Ok(TurnOutcome {
            directives,
            state,
            superseded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::reasoning::{ReasoningError, ReasoningFuture};
    use crate::investigation::events::{FnEventHandler, NoopHandler};
    use crate::model::{EngagementMode, Severity, Strategy};
    use std::sync::Mutex;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::offline(EngineConfig::offline()).with_event_handler(NoopHandler)
    }

    /// Never answers; every call ends at the engine's timeout.
    struct Stalled;

    impl Reasoner for Stalled {
        fn name(&self) -> &str {
            "stalled"
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
            Box::pin(async { Err(ReasoningError::Unavailable("down".into())) })
        }
    }

    #[tokio::test]
    async fn strong_signal_engages_in_one_turn() {
        let engine = engine();
        let consultant = InvestigationState::consultant("case-a");
        let outcome = engine
            .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
            .await
            .unwrap();

        let state = &outcome.state;
        assert_eq!(state.mode, EngagementMode::LeadInvestigator);
        assert_eq!(state.phase, Phase::BlastRadius);
        assert_ne!(state.id, consultant.id);
        let frame = state.ooda.anomaly.as_ref().unwrap();
        assert_eq!(frame.scope.as_deref(), Some("EU users"));
        assert!(frame.severity >= Severity::High);

        let superseded = outcome.superseded.as_ref().unwrap();
        assert_eq!(superseded.id, consultant.id);
        assert_eq!(superseded.status, InvestigationStatus::Superseded);
        assert_eq!(outcome.directives.superseded_id.as_deref(), Some(consultant.id.as_str()));
        assert_eq!(outcome.directives.transitions.len(), 1);
        assert!(!outcome.directives.pending_evidence.is_empty());
    }

    #[tokio::test]
    async fn weak_signal_asks_for_consent_then_engages() {
        let engine = engine();
        let consultant = InvestigationState::consultant("case-b");
        let offered = engine
            .process_turn(&consultant, &TurnInput::message("checkout seems slow"))
            .await
            .unwrap();
        assert_eq!(offered.state.mode, EngagementMode::Consultant);
        assert!(offered.state.consent.offered);
        assert_eq!(
            offered.directives.consent.as_ref().map(|c| c.signal),
            Some(SignalStrength::Weak)
        );

        let engaged = engine
            .process_turn(&offered.state, &TurnInput::message("yes please"))
            .await
            .unwrap();
        assert_eq!(engaged.state.mode, EngagementMode::LeadInvestigator);
        let frame = engaged.state.ooda.anomaly.as_ref().unwrap();
        assert_eq!(frame.statement, "checkout seems slow");
    }

    #[tokio::test]
    async fn declining_clears_the_offer() {
        let engine = engine();
        let consultant = InvestigationState::consultant("case-c");
        let offered = engine
            .process_turn(&consultant, &TurnInput::message("login keeps failing"))
            .await
            .unwrap();
        let declined = engine
            .process_turn(&offered.state, &TurnInput::message("no, not now"))
            .await
            .unwrap();
        assert!(!declined.state.consent.offered);
        assert_eq!(declined.state.mode, EngagementMode::Consultant);
        assert!(declined.superseded.is_none());
    }

    #[tokio::test]
    async fn rejected_transition_leaves_state_unchanged() {
        let engine = engine();
        let consultant = InvestigationState::consultant("case-d");
        let lead = engine
            .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
            .await
            .unwrap()
            .state;
        let outcome = engine
            .process_turn(&lead, &TurnInput::message("skip ahead").requesting(Phase::Solution))
            .await
            .unwrap();
        assert_eq!(outcome.state, lead);
        let rejection = outcome.directives.rejection.unwrap();
        assert_eq!(rejection.from, Phase::BlastRadius);
        assert_eq!(rejection.to, Phase::Solution);
    }

    #[tokio::test]
    async fn post_mortem_enters_validation_with_hypotheses() {
        let engine = engine();
        let consultant = InvestigationState::consultant("case-e");
        let outcome = engine
            .process_turn(
                &consultant,
                &TurnInput::message("postmortem for yesterday's checkout outage").with_consent(true),
            )
            .await
            .unwrap();
        let state = &outcome.state;
        assert_eq!(state.strategy, Strategy::PostMortem);
        assert_eq!(state.phase, Phase::Validation);
        assert!(state.ooda.anomaly.as_ref().unwrap().acknowledged);
        assert!(state.ooda.active_hypotheses().count() >= 2);
        assert!(
            state
                .memory
                .persistent
                .iter()
                .any(|i| i.text.starts_with("Engaged at validation"))
        );
    }

    #[tokio::test]
    async fn corrupt_state_is_refused() {
        let engine = engine();
        let mut state = InvestigationState::consultant("case-f");
        state.phase = Phase::Validation;
        let err = engine
            .process_turn(&state, &TurnInput::message("hello"))
            .await
            .unwrap_err();
        assert!(err.requires_recovery());
    }

    #[tokio::test]
    async fn unknown_references_degrade_the_turn() {
        let engine = engine();
        let consultant = InvestigationState::consultant("case-g");
        let lead = engine
            .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
            .await
            .unwrap()
            .state;
        let input = TurnInput::message("here")
            .blocking("E99", "no access")
            .with_test("H404", TestOutcome::Refuted, "rollback did not help")
            .reopening("H77");
        let outcome = engine.process_turn(&lead, &input).await.unwrap();

        assert_eq!(outcome.state.turn, lead.turn + 1);
        let skipped: Vec<&str> = outcome
            .directives
            .degraded
            .iter()
            .map(|d| d.capability.as_str())
            .collect();
        assert!(skipped.contains(&"blocked evidence"));
        assert!(skipped.contains(&"test results"));
        assert!(skipped.contains(&"reopen"));
        assert!(outcome.state.ooda.hypothesis("H404").is_none());
    }

    #[tokio::test]
    async fn reasoning_timeouts_degrade_instead_of_failing() {
        let config = EngineConfig::default().with_reasoning_timeout(Duration::from_millis(20));
        let engine = Engine::new(config, Arc::new(Stalled)).with_event_handler(NoopHandler);
        let consultant = InvestigationState::consultant("case-h");
        let outcome = engine
            .process_turn(&consultant, &TurnInput::message("API 500 errors, all EU users"))
            .await
            .unwrap();
        assert_eq!(outcome.state.phase, Phase::BlastRadius);
        assert!(
            outcome
                .directives
                .degraded
                .iter()
                .any(|d| d.capability == "anomaly framing")
        );
    }

    #[tokio::test]
    async fn events_report_engagement_and_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = Engine::offline(EngineConfig::offline()).with_event_handler(FnEventHandler::new(
            move |event| {
                let name = match event {
                    EngineEvent::Engaged { .. } => "engaged",
                    EngineEvent::PhaseTransition { .. } => "transition",
                    EngineEvent::IterationCompleted { .. } => "iteration",
                    _ => return,
                };
                if let Ok(mut seen) = sink.lock() {
                    seen.push(name);
                }
            },
        ));
        engine
            .process_turn(
                &InvestigationState::consultant("case-i"),
                &TurnInput::message("API 500 errors, all EU users"),
            )
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["engaged", "transition", "iteration"]);
    }

    #[tokio::test]
    async fn progress_view_is_read_only_and_stable() {
        let engine = engine();
        let state = engine
            .process_turn(
                &InvestigationState::consultant("case-j"),
                &TurnInput::message("API 500 errors, all EU users"),
            )
            .await
            .unwrap()
            .state;
        let before = state.clone();
        let a = engine.progress_view(&state);
        let b = engine.progress_view(&state);
        assert_eq!(a, b);
        assert_eq!(state, before);
    }
}
