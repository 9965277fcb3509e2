//! OODA Iteration Engine.
//!
//! One iteration runs the steps the current phase activates, in
//! Observe → Orient → Decide → Act order, then records an [`OodaIteration`].
//! Steps only touch the state they are handed; anything user-facing that is
//! not part of the durable state goes into [`TurnScratch`].
//!
//! | Phase | Observe | Orient | Decide | Act |
//! |-------|---------|--------|--------|-----|
//! | BlastRadius | playbook requests | frame refinement | | |
//! | Timeline | playbook requests | frame refinement | | |
//! | Hypothesis | playbook requests | frame, bearings | generate | |
//! | Validation | per-hypothesis requests | frame, bearings | top up, alternatives | test |
//! | Solution | post-fix request | | mitigation target | fix / regression |
//! | Document | | report | | |
//!
//! Reasoning-backed refinements are optional: every call has a rule-based
//! fallback, and a failed call only adds a degraded-capability note.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::api::ids::iteration_id;
use crate::api::reasoning::{Reasoner, ReasoningError, generate_text, generate_typed};
use crate::model::{
    ActionRecord, AnomalyFrame, Bearing, EvidenceCategory, EvidenceSubmission, Hypothesis,
    HypothesisCategory, HypothesisDelta, HypothesisStatus, InvestigationState, OodaIteration,
    OodaStep, Phase, Priority, Severity, Strategy, TestOutcome, Urgency,
};

use super::config::EngineConfig;
use super::directives::{
    AnchoringNotice, DegradedCapability, InvestigationReport, StallNotice, build_report,
};
use super::engine::{TestReport, TurnInput};
use super::events::{EngineEvent, EventHandler};
use super::evidence::NewEvidenceRequest;
use super::hypotheses::{
    HypothesisManager, HypothesisSuggestions, judge_bearing, stalled_streak,
};
use super::signals::{FrameFields, consent_reply, extract_frame_fields, reports_fix, reports_regression};

/// Frame statements longer than this are cut at a word boundary.
const MAX_STATEMENT_CHARS: usize = 240;

// ── Per-turn scratch ──────────────────────────────────────────────

/// Turn-local notes that end up in the response directives, not the state.
#[derive(Debug, Default)]
pub(crate) struct TurnScratch {
    /// Problem report that engaged this turn; seeds the anomaly frame.
    pub problem_report: Option<String>,
    pub degraded: Vec<DegradedCapability>,
    pub anchoring: Option<AnchoringNotice>,
    pub stall: Option<StallNotice>,
    /// (hypothesis, evidence, bearing) applied this turn.
    pub bearings: Vec<(String, String, Bearing)>,
    pub report: Option<InvestigationReport>,
}

impl TurnScratch {
    /// Note a capability that ran in a reduced form this turn.
    pub fn degrade(&mut self, capability: &str, error: impl ToString) {
        self.degraded.push(DegradedCapability {
            capability: capability.to_string(),
            error: error.to_string(),
        });
    }

    fn bearing_applied(&self, hypothesis_id: &str, evidence_id: &str) -> bool {
        self.bearings
            .iter()
            .any(|(h, e, _)| h == hypothesis_id && e == evidence_id)
    }
}

// ── Playbook ──────────────────────────────────────────────────────

struct PlaybookEntry {
    phase: Phase,
    category: EvidenceCategory,
    priority: Priority,
    label: &'static str,
    description: &'static str,
    guidance: &'static str,
}

/// Evidence each phase asks for as soon as it is entered.
const PLAYBOOK: &[PlaybookEntry] = &[
    PlaybookEntry {
        phase: Phase::BlastRadius,
        category: EvidenceCategory::Scope,
        priority: Priority::Critical,
        label: "affected population",
        description: "Which users, regions, tenants or clients are affected, and which are not",
        guidance: "Compare one failing and one working request; split the error dashboard by region or tenant.",
    },
    PlaybookEntry {
        phase: Phase::BlastRadius,
        category: EvidenceCategory::Symptoms,
        priority: Priority::Critical,
        label: "error signature",
        description: "Exact error messages, status codes or screenshots users see",
        guidance: "Copy the response body or one log line for a failing request.",
    },
    PlaybookEntry {
        phase: Phase::BlastRadius,
        category: EvidenceCategory::Metrics,
        priority: Priority::Important,
        label: "error rate",
        description: "Error-rate or latency graph covering the incident window",
        guidance: "Export or screenshot the service dashboard for the last 24 hours.",
    },
    PlaybookEntry {
        phase: Phase::Timeline,
        category: EvidenceCategory::Timeline,
        priority: Priority::Critical,
        label: "start time",
        description: "When the problem started, as precisely as possible",
        guidance: "Use the first alert, the first support ticket, or the first bad point on a graph.",
    },
    PlaybookEntry {
        phase: Phase::Timeline,
        category: EvidenceCategory::Changes,
        priority: Priority::Critical,
        label: "recent changes",
        description: "Deploys, config changes, migrations or flag flips shortly before the start",
        guidance: "Check CI/CD history, the change calendar and feature-flag audit logs.",
    },
    PlaybookEntry {
        phase: Phase::Timeline,
        category: EvidenceCategory::Environment,
        priority: Priority::Optional,
        label: "environment differences",
        description: "How the affected environment differs from a healthy one",
        guidance: "Compare versions, regions and instance types between affected and unaffected hosts.",
    },
    PlaybookEntry {
        phase: Phase::Hypothesis,
        category: EvidenceCategory::Configuration,
        priority: Priority::Important,
        label: "current configuration",
        description: "Relevant configuration of the affected components",
        guidance: "Dump the effective config, including environment variables and flag values.",
    },
    PlaybookEntry {
        phase: Phase::Hypothesis,
        category: EvidenceCategory::Metrics,
        priority: Priority::Important,
        label: "resource usage",
        description: "CPU, memory, connection pool and queue depth of the affected services",
        guidance: "Look at saturation panels for the incident window.",
    },
    PlaybookEntry {
        phase: Phase::Solution,
        category: EvidenceCategory::Metrics,
        priority: Priority::Critical,
        label: "post-fix error rate",
        description: "Error rate after the fix was applied",
        guidance: "Watch the same dashboard used during the incident until it settles.",
    },
];

/// Evidence request that would confirm or refute `hypothesis`.
fn hypothesis_request(hypothesis: &Hypothesis, priority: Priority) -> NewEvidenceRequest {
    let (category, what, description) = match hypothesis.category {
        HypothesisCategory::Infrastructure => (
            EvidenceCategory::Metrics,
            "host health",
            "Health of the nodes or instances behind the affected component",
        ),
        HypothesisCategory::Code => (
            EvidenceCategory::Changes,
            "code diff",
            "The diff or release notes of the suspect deploy",
        ),
        HypothesisCategory::Configuration => (
            EvidenceCategory::Configuration,
            "config diff",
            "Configuration before and after the problem started",
        ),
        HypothesisCategory::ExternalDependency => (
            EvidenceCategory::Metrics,
            "dependency status",
            "Status page and error rate of the upstream provider",
        ),
        HypothesisCategory::ClientSide => (
            EvidenceCategory::Environment,
            "client details",
            "App version, browser and OS of affected users",
        ),
        HypothesisCategory::Data => (
            EvidenceCategory::Metrics,
            "data checks",
            "Query results or migration logs for the affected records",
        ),
        HypothesisCategory::Network => (
            EvidenceCategory::Metrics,
            "network checks",
            "DNS resolution, TLS handshakes and latency from affected regions",
        ),
        HypothesisCategory::Security => (
            EvidenceCategory::Metrics,
            "security signals",
            "WAF, authentication and rate-limit logs",
        ),
        HypothesisCategory::ResourceExhaustion => (
            EvidenceCategory::Metrics,
            "saturation",
            "CPU, memory, pool and quota usage at the time of failure",
        ),
    };
    NewEvidenceRequest::new(category, format!("{what} for {}", hypothesis.id), description)
        .with_guidance(format!("Would confirm or rule out: {}", hypothesis.statement))
        .with_priority(priority)
        .for_hypothesis(hypothesis.id.clone())
}

// ── Reasoning outputs ─────────────────────────────────────────────

/// Bearing judgements requested from the reasoning service.
#[derive(Debug, Deserialize, JsonSchema)]
struct BearingAssessment {
    judgements: Vec<BearingJudgement>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BearingJudgement {
    evidence_id: String,
    hypothesis_id: String,
    /// `null` when the evidence says nothing about the hypothesis.
    bearing: Option<Bearing>,
}

// ── Iteration accumulator ─────────────────────────────────────────

struct IterationDraft {
    number: u32,
    phase: Phase,
    start_turn: u32,
    max_before: f64,
    snapshot: HashMap<String, (f64, HypothesisStatus)>,
    new_hypotheses: u32,
    tests: u32,
    insights: Vec<String>,
    touched: Vec<String>,
    tested_categories: BTreeSet<HypothesisCategory>,
    actions: Vec<ActionRecord>,
}

impl IterationDraft {
    fn start(state: &InvestigationState) -> Self {
        Self {
            number: state.ooda.iteration,
            phase: state.phase,
            start_turn: state.turn,
            max_before: state.ooda.max_likelihood(),
            snapshot: state
                .ooda
                .hypotheses
                .iter()
                .map(|h| (h.id.clone(), (h.likelihood, h.status)))
                .collect(),
            new_hypotheses: 0,
            tests: 0,
            insights: Vec::new(),
            touched: Vec::new(),
            tested_categories: BTreeSet::new(),
            actions: Vec::new(),
        }
    }

    fn touch(&mut self, hypothesis_id: &str) {
        if !self.touched.iter().any(|t| t == hypothesis_id) {
            self.touched.push(hypothesis_id.to_string());
        }
    }
}

// ── Runner ────────────────────────────────────────────────────────

/// Runs OODA iterations with the engine's configuration and services.
pub(crate) struct OodaRunner<'e> {
    pub config: &'e EngineConfig,
    pub reasoner: &'e dyn Reasoner,
    pub events: &'e dyn EventHandler,
}

impl OodaRunner<'_> {
    fn hypotheses(&self) -> HypothesisManager<'_> {
        HypothesisManager::new(&self.config.hypotheses)
    }

    fn timeout(&self) -> Duration {
        self.config.reasoning.config.timeout
    }

    fn fallback(
        &self,
        state: &InvestigationState,
        capability: &str,
        error: &ReasoningError,
        scratch: &mut TurnScratch,
    ) {
        let message = error.to_string();
        self.events.on_event(&EngineEvent::ReasoningFallback {
            investigation_id: &state.id,
            capability,
            error: &message,
        });
        scratch.degrade(capability, message);
    }

    /// Run one iteration of the current phase. Returns the iteration id, or
    /// `None` when the phase runs no OODA steps.
    pub async fn run_iteration(
        &self,
        state: &mut InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
    ) -> Option<String> {
        let definition = state.phase.definition();
        if !state.ooda.active || !definition.runs_ooda() {
            return None;
        }
        state.ooda.iteration += 1;
        state.ooda.phase_iterations += 1;
        let mut draft = IterationDraft::start(state);

        for &step in definition.steps {
            state.ooda.step = step;
            match step {
                OodaStep::Observe => self.observe(state, scratch, &mut draft),
                OodaStep::Orient => self.orient(state, input, scratch, &mut draft).await,
                OodaStep::Decide => self.decide(state, scratch, &mut draft).await,
                OodaStep::Act => self.act(state, input, scratch, &mut draft),
            }
        }
        Some(self.finish(state, draft, scratch))
    }

    // ── Observe ───────────────────────────────────────────────────

    fn observe(&self, state: &mut InvestigationState, scratch: &mut TurnScratch, draft: &mut IterationDraft) {
        let turn = state.turn;
        let explicit: Vec<(String, String, Bearing)> = state
            .evidence
            .received_on(turn)
            .flat_map(|p| {
                p.bearings
                    .iter()
                    .map(|b| (b.hypothesis_id.clone(), p.id.clone(), b.bearing))
            })
            .collect();
        for (hypothesis_id, evidence_id, bearing) in explicit {
            self.apply_bearing(state, &hypothesis_id, &evidence_id, bearing, scratch, draft);
        }
        self.request_playbook(state);
    }

    /// Open the current phase's standard evidence requests. Each label is
    /// requested at most once per investigation.
    pub fn request_playbook(&self, state: &mut InvestigationState) {
        let turn = state.turn;
        for entry in PLAYBOOK.iter().filter(|e| e.phase == state.phase) {
            if state.evidence.requests.iter().any(|r| r.label == entry.label) {
                continue;
            }
            let request = NewEvidenceRequest::new(entry.category, entry.label, entry.description)
                .with_guidance(entry.guidance)
                .with_priority(entry.priority)
                .from_step(OodaStep::Observe);
            state.evidence.request_evidence(request, turn);
        }
        if state.phase == Phase::Validation {
            self.request_for_hypotheses(state, OodaStep::Observe);
        }
    }

    /// One request per active hypothesis that has never had one. The most
    /// likely hypothesis gets a critical request.
    fn request_for_hypotheses(&self, state: &mut InvestigationState, step: OodaStep) {
        let turn = state.turn;
        let mut active: Vec<&Hypothesis> = state.ooda.active_hypotheses().collect();
        active.sort_by(|a, b| b.likelihood.total_cmp(&a.likelihood));
        let top = active.first().map(|h| h.id.clone());
        let wanted: Vec<NewEvidenceRequest> = active
            .into_iter()
            .filter(|h| {
                !state
                    .evidence
                    .requests
                    .iter()
                    .any(|r| r.hypothesis_id.as_deref() == Some(h.id.as_str()))
            })
            .map(|h| {
                let priority = if top.as_deref() == Some(h.id.as_str()) {
                    Priority::Critical
                } else {
                    Priority::Important
                };
                hypothesis_request(h, priority).from_step(step)
            })
            .collect();
        for request in wanted {
            state.evidence.request_evidence(request, turn);
        }
    }

    fn apply_bearing(
        &self,
        state: &mut InvestigationState,
        hypothesis_id: &str,
        evidence_id: &str,
        bearing: Bearing,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        if scratch.bearing_applied(hypothesis_id, evidence_id) {
            return;
        }
        let turn = state.turn;
        match self
            .hypotheses()
            .update_on_evidence(&mut state.ooda, hypothesis_id, evidence_id, bearing, turn)
        {
            Ok(delta) => {
                debug!(
                    "[{}] {evidence_id} {bearing:?} {hypothesis_id}: {:.2} -> {:.2}",
                    state.id, delta.before, delta.after
                );
                draft.touch(hypothesis_id);
                scratch
                    .bearings
                    .push((hypothesis_id.to_string(), evidence_id.to_string(), bearing));
            }
            Err(e) => debug!("[{}] ignoring bearing of {evidence_id}: {e}", state.id),
        }
    }

    // ── Orient ────────────────────────────────────────────────────

    async fn orient(
        &self,
        state: &mut InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        if state.phase == Phase::Document {
            self.synthesize(state, scratch, draft).await;
            return;
        }
        self.refine_frame(state, input, scratch, draft).await;
        if matches!(state.phase, Phase::Hypothesis | Phase::Validation) {
            self.judge_new_evidence(state, scratch, draft).await;
        }
    }

    async fn refine_frame(
        &self,
        state: &mut InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        let turn = state.turn;
        let had_frame = state.ooda.anomaly.is_some();
        let primary = scratch
            .problem_report
            .clone()
            .unwrap_or_else(|| input.message.clone());

        let mut texts = vec![primary.clone()];
        texts.extend(state.evidence.received_on(turn).map(|p| p.content.clone()));
        let mut fields = FrameFields::default();
        for text in &texts {
            merge_fields(&mut fields, extract_frame_fields(text));
        }

        if self.config.reasoning_for(|r| r.framing) && texts.iter().any(|t| !t.trim().is_empty()) {
            let prompt = frame_prompt(state, &texts);
            match generate_typed::<FrameFields>(self.reasoner, &prompt, self.timeout()).await {
                Ok(assessed) => merge_fields(&mut fields, assessed),
                Err(e) => self.fallback(state, "anomaly framing", &e, scratch),
            }
        }

        if state.ooda.anomaly.is_none() {
            let statement = clip_statement(&primary);
            if statement.is_empty() {
                return;
            }
            let severity = fields.severity.unwrap_or(severity_for(state.urgency));
            let mut frame = AnomalyFrame::new(statement, severity);
            frame.acknowledged = state.strategy == Strategy::PostMortem;
            state.ooda.anomaly = Some(frame);
            draft.insights.push("anomaly framed".to_string());
        }

        let acknowledge =
            input.acknowledge_frame || (had_frame && consent_reply(&input.message) == Some(true));
        let corroborating = state
            .evidence
            .provided
            .iter()
            .filter(|p| {
                matches!(
                    p.category,
                    Some(EvidenceCategory::Scope | EvidenceCategory::Symptoms | EvidenceCategory::Metrics)
                )
            })
            .count();

        let Some(frame) = state.ooda.anomaly.as_mut() else {
            return;
        };
        if apply_fields(frame, &fields) && had_frame {
            frame.revision += 1;
            draft.insights.push(format!("frame revised (r{})", frame.revision));
        }
        if acknowledge && !frame.acknowledged {
            frame.acknowledged = true;
            draft.insights.push("frame acknowledged".to_string());
        }
        frame.confidence = frame_confidence(frame, corroborating);
    }

    async fn judge_new_evidence(
        &self,
        state: &mut InvestigationState,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        let turn = state.turn;
        let fresh: Vec<(String, String)> = state
            .evidence
            .received_on(turn)
            .filter(|p| p.bearings.is_empty())
            .map(|p| (p.id.clone(), p.content.clone()))
            .collect();
        let active: Vec<String> = state.ooda.active_hypotheses().map(|h| h.id.clone()).collect();
        if fresh.is_empty() || active.is_empty() {
            return;
        }

        let mut judged: Vec<(String, String, Bearing)> = Vec::new();
        let mut assessed = false;
        if self.config.reasoning_for(|r| r.hypotheses) {
            let prompt = bearing_prompt(state, &fresh);
            match generate_typed::<BearingAssessment>(self.reasoner, &prompt, self.timeout()).await {
                Ok(assessment) => {
                    assessed = true;
                    judged.extend(assessment.judgements.into_iter().filter_map(|j| {
                        let known = fresh.iter().any(|(id, _)| *id == j.evidence_id)
                            && active.contains(&j.hypothesis_id);
                        let bearing = j.bearing?;
                        known.then_some((j.hypothesis_id, j.evidence_id, bearing))
                    }));
                }
                Err(e) => self.fallback(state, "evidence assessment", &e, scratch),
            }
        }
        if !assessed {
            for (evidence_id, content) in &fresh {
                for hypothesis in state.ooda.active_hypotheses() {
                    if let Some(bearing) = judge_bearing(hypothesis, content) {
                        judged.push((hypothesis.id.clone(), evidence_id.clone(), bearing));
                    }
                }
            }
        }
        for (hypothesis_id, evidence_id, bearing) in judged {
            self.apply_bearing(state, &hypothesis_id, &evidence_id, bearing, scratch, draft);
        }
    }

    async fn synthesize(
        &self,
        state: &mut InvestigationState,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        let mut report = build_report(state);
        if self.config.reasoning_for(|r| r.summaries) {
            let prompt = report_prompt(state, &report);
            match generate_text(self.reasoner, &prompt, self.timeout()).await {
                Ok(text) => report.narrative = Some(text.trim().to_string()),
                Err(e) => self.fallback(state, "report narrative", &e, scratch),
            }
        }
        draft.insights.push("report synthesized".to_string());
        scratch.report = Some(report);
    }

    // ── Decide ────────────────────────────────────────────────────

    async fn decide(
        &self,
        state: &mut InvestigationState,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        match state.phase {
            Phase::Hypothesis | Phase::Validation => {
                self.decide_hypotheses(state, scratch, draft).await;
            }
            Phase::Solution => self.decide_mitigation(state, draft),
            _ => {}
        }
    }

    async fn decide_hypotheses(
        &self,
        state: &mut InvestigationState,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        let manager = self.hypotheses();
        let config = manager.config();
        let turn = state.turn;
        let mut new_ids = Vec::new();

        // An anchored investigation must try a different category first.
        if !state.ooda.forced_categories.is_empty() {
            let forced = std::mem::take(&mut state.ooda.forced_categories);
            let active: Vec<HypothesisCategory> =
                state.ooda.active_hypotheses().map(|h| h.category).collect();
            if let Some(category) = forced.iter().copied().find(|c| !active.contains(c)) {
                let candidate = manager.candidate_for(&state.ooda, &state.evidence, category);
                new_ids.extend(manager.generate(&mut state.ooda, vec![candidate], turn));
                draft
                    .insights
                    .push(format!("forced a {category} alternative after anchoring"));
            } else {
                debug!(
                    "[{}] forced categories {forced:?} already have active hypotheses",
                    state.id
                );
            }
        }

        // Escalate once the phase outlives its intensity.
        let intensity = state.phase.definition().intensity;
        if state.ooda.phase_iterations > intensity.max_iterations() {
            let untested = HypothesisCategory::ALL.iter().copied().find(|c| {
                !state.ooda.category_tests.contains_key(c)
                    && !state.ooda.hypotheses.iter().any(|h| h.category == *c)
            });
            if let Some(category) = untested {
                let candidate = manager.candidate_for(&state.ooda, &state.evidence, category);
                new_ids.extend(manager.generate(&mut state.ooda, vec![candidate], turn));
                draft
                    .insights
                    .push(format!("escalated to untested category {category}"));
            }
        }

        let active = state.ooda.active_hypotheses().count();
        if active < config.min_candidates {
            let want = config.max_candidates.saturating_sub(active).max(1);
            let candidates = match self.suggest(state, want, scratch).await {
                Some(candidates) => candidates,
                None => manager.rule_candidates(&state.ooda, &state.evidence, want),
            };
            let mut candidates = candidates;
            candidates.truncate(want);
            new_ids.extend(manager.generate(&mut state.ooda, candidates, turn));
        }

        for id in &new_ids {
            if let Some(h) = state.ooda.hypothesis(id) {
                self.events.on_event(&EngineEvent::HypothesisGenerated {
                    investigation_id: &state.id,
                    hypothesis_id: &h.id,
                    category: h.category,
                    likelihood: h.likelihood,
                });
            }
            draft.touch(id);
        }
        draft.new_hypotheses += new_ids.len() as u32;
        if state.phase == Phase::Validation && !new_ids.is_empty() {
            self.request_for_hypotheses(state, OodaStep::Decide);
        }
    }

    /// Reasoning-service hypothesis proposals, or `None` to use the rules.
    async fn suggest(
        &self,
        state: &InvestigationState,
        want: usize,
        scratch: &mut TurnScratch,
    ) -> Option<Vec<super::hypotheses::Candidate>> {
        if !self.config.reasoning_for(|r| r.hypotheses) {
            return None;
        }
        let prompt = hypothesis_prompt(state, want);
        let result =
            generate_typed::<HypothesisSuggestions>(self.reasoner, &prompt, self.timeout()).await;
        match result {
            Ok(suggestions) => {
                let candidates =
                    self.hypotheses()
                        .suggested_candidates(&state.ooda, &state.evidence, suggestions);
                if candidates.is_empty() {
                    let error = ReasoningError::InvalidOutput("no usable hypotheses".into());
                    self.fallback(state, "hypothesis generation", &error, scratch);
                    None
                } else {
                    Some(candidates)
                }
            }
            Err(e) => {
                self.fallback(state, "hypothesis generation", &e, scratch);
                None
            }
        }
    }

    fn decide_mitigation(&self, state: &mut InvestigationState, draft: &mut IterationDraft) {
        if state.ooda.phase_iterations != 1 {
            return;
        }
        let target = state
            .ooda
            .hypotheses
            .iter()
            .filter(|h| h.status == HypothesisStatus::Validated)
            .max_by(|a, b| a.likelihood.total_cmp(&b.likelihood))
            .or_else(|| self.hypotheses().pick_target(&state.ooda));
        match target {
            Some(h) => {
                let id = h.id.clone();
                draft.insights.push(format!("mitigate {id}: {}", h.statement));
                draft.touch(&id);
            }
            None => draft
                .insights
                .push("mitigating symptoms without a named root cause".to_string()),
        }
    }

    // ── Act ───────────────────────────────────────────────────────

    fn act(
        &self,
        state: &mut InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        match state.phase {
            Phase::Validation => self.act_validation(state, input, scratch, draft),
            Phase::Solution => self.act_solution(state, input, draft),
            _ => {}
        }
    }

    fn act_validation(
        &self,
        state: &mut InvestigationState,
        input: &TurnInput,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        if !input.test_results.is_empty() {
            for report in &input.test_results {
                self.record_user_test(state, report, scratch, draft);
            }
            return;
        }

        let turn = state.turn;
        let latest_evidence = state.evidence.received_on(turn).last().map(|p| p.id.clone());
        if latest_evidence.is_none() {
            return;
        }

        // Hypotheses that the new evidence bore on were tested by it.
        let mut outcomes: Vec<(String, Option<String>, TestOutcome)> = Vec::new();
        for (hypothesis_id, evidence_id, bearing) in &scratch.bearings {
            let outcome = match bearing {
                Bearing::Supports => TestOutcome::Supported,
                Bearing::Refutes => TestOutcome::Refuted,
            };
            match outcomes.iter_mut().find(|(h, _, _)| h == hypothesis_id) {
                Some(existing) => {
                    existing.1 = Some(evidence_id.clone());
                    existing.2 = outcome;
                }
                None => outcomes.push((hypothesis_id.clone(), Some(evidence_id.clone()), outcome)),
            }
        }
        if outcomes.is_empty()
            && let Some(target) = self.hypotheses().pick_target(&state.ooda)
        {
            outcomes.push((target.id.clone(), latest_evidence, TestOutcome::Inconclusive));
        }

        for (hypothesis_id, evidence_id, outcome) in outcomes {
            self.note_test(state, &hypothesis_id, evidence_id, outcome, "tested against new evidence", draft);
        }
    }

    fn record_user_test(
        &self,
        state: &mut InvestigationState,
        report: &TestReport,
        scratch: &mut TurnScratch,
        draft: &mut IterationDraft,
    ) {
        let turn = state.turn;
        let bearing = match report.outcome {
            TestOutcome::Supported => Some(Bearing::Supports),
            TestOutcome::Refuted => Some(Bearing::Refutes),
            TestOutcome::Inconclusive => None,
        };
        let mut evidence_id = None;
        if let Some(bearing) = bearing {
            let submission = EvidenceSubmission::unsolicited(report.description.clone())
                .with_bearing(report.hypothesis_id.clone(), bearing);
            match state.evidence.record_provided(submission, turn) {
                Ok(provided) => {
                    self.apply_bearing(state, &report.hypothesis_id, &provided.id, bearing, scratch, draft);
                    evidence_id = Some(provided.id);
                }
                Err(e) => debug!("[{}] test report not recorded: {e}", state.id),
            }
        }
        self.note_test(
            state,
            &report.hypothesis_id,
            evidence_id,
            report.outcome,
            &report.description,
            draft,
        );
    }

    fn note_test(
        &self,
        state: &mut InvestigationState,
        hypothesis_id: &str,
        evidence_id: Option<String>,
        outcome: TestOutcome,
        description: &str,
        draft: &mut IterationDraft,
    ) {
        if let Err(e) = self.hypotheses().note_test(&mut state.ooda, hypothesis_id, outcome) {
            debug!("[{}] test not counted: {e}", state.id);
            return;
        }
        if let Some(h) = state.ooda.hypothesis(hypothesis_id) {
            draft.tested_categories.insert(h.category);
        }
        draft.tests += 1;
        draft.touch(hypothesis_id);
        draft.actions.push(ActionRecord {
            hypothesis_id: Some(hypothesis_id.to_string()),
            evidence_id,
            description: description.to_string(),
            outcome,
        });
    }

    fn act_solution(&self, state: &mut InvestigationState, input: &TurnInput, draft: &mut IterationDraft) {
        let turn = state.turn;
        let applied = state.solution.fix_applied_turn.is_some();
        let regression = input.regression || (applied && reports_regression(&input.message));

        if regression && applied {
            state.solution.fix_applied_turn = None;
            state.solution.regressions += 1;
            state.solution.verified = false;
            draft.insights.push("regression reported after fix".to_string());
            draft.actions.push(ActionRecord {
                hypothesis_id: None,
                evidence_id: None,
                description: "fix regressed".to_string(),
                outcome: TestOutcome::Refuted,
            });
            return;
        }

        let fix = input.fix_applied.clone().or_else(|| {
            reports_fix(&input.message).then(|| input.message.trim().to_string())
        });
        if let Some(fix) = fix
            && !applied
        {
            state.solution.fix_applied_turn = Some(turn);
            state.solution.fix_description = Some(fix.clone());
            draft.insights.push(format!("fix applied: {fix}"));
            draft.actions.push(ActionRecord {
                hypothesis_id: None,
                evidence_id: None,
                description: format!("applied fix: {fix}"),
                outcome: TestOutcome::Inconclusive,
            });
        }
    }

    // ── Finish ────────────────────────────────────────────────────

    fn finish(
        &self,
        state: &mut InvestigationState,
        mut draft: IterationDraft,
        scratch: &mut TurnScratch,
    ) -> String {
        let turn = state.turn;
        let manager = self.hypotheses();

        for outcome in manager.apply_decay(&mut state.ooda, turn) {
            draft.touch(&outcome.hypothesis_id);
            if outcome.retired {
                self.events.on_event(&EngineEvent::HypothesisRetired {
                    investigation_id: &state.id,
                    hypothesis_id: &outcome.hypothesis_id,
                    reason: super::hypotheses::DECAY_RETIREMENT_REASON,
                });
            }
        }

        let settled: Vec<String> = state
            .ooda
            .hypotheses
            .iter()
            .filter(|h| matches!(h.status, HypothesisStatus::Refuted | HypothesisStatus::Retired))
            .map(|h| h.id.clone())
            .collect();
        for id in &settled {
            state.evidence.obsolete_for_hypothesis(id);
        }

        let deltas: Vec<HypothesisDelta> = state
            .ooda
            .hypotheses
            .iter()
            .filter_map(|h| {
                let (before, status) = draft.snapshot.get(&h.id)?;
                let changed = (h.likelihood - before).abs() > f64::EPSILON || h.status != *status;
                changed.then(|| HypothesisDelta {
                    hypothesis_id: h.id.clone(),
                    before: *before,
                    after: h.likelihood,
                    status: h.status,
                })
            })
            .collect();
        let retired = deltas
            .iter()
            .filter(|d| {
                matches!(d.status, HypothesisStatus::Refuted | HypothesisStatus::Retired)
                    && draft
                        .snapshot
                        .get(&d.hypothesis_id)
                        .is_some_and(|(_, before)| before.is_active())
            })
            .count() as u32;

        let confidence_delta = state.ooda.max_likelihood() - draft.max_before;
        let new_evidence = state.evidence.received_on(turn).count() as u32;
        let made_progress = confidence_delta > self.config.controller.progress_epsilon
            || new_evidence > 0
            || retired > 0;
        let definition = state.phase.definition();

        let id = iteration_id(draft.number);
        let iteration = OodaIteration {
            id: id.clone(),
            number: draft.number,
            phase: draft.phase,
            start_turn: draft.start_turn,
            end_turn: turn,
            steps_completed: definition.steps.to_vec(),
            steps_skipped: definition.skipped_steps(),
            new_evidence,
            new_hypotheses: draft.new_hypotheses,
            tests_performed: draft.tests,
            hypotheses_retired: retired,
            confidence_delta,
            insights: draft.insights,
            made_progress,
            stall_reason: (!made_progress)
                .then(|| "no new evidence, no confidence gain and nothing ruled out".to_string()),
            touched_hypotheses: draft.touched,
            tested_categories: draft.tested_categories.into_iter().collect(),
            actions: draft.actions,
            hypothesis_deltas: deltas,
        };
        state.ooda.iterations.push(iteration);
        self.events.on_event(&EngineEvent::IterationCompleted {
            investigation_id: &state.id,
            iteration_id: &id,
            phase: state.phase,
            made_progress,
            confidence_delta,
        });

        self.check_anchoring(state, scratch);
        self.check_stall(state, scratch);
        id
    }

    fn check_anchoring(&self, state: &mut InvestigationState, scratch: &mut TurnScratch) {
        // A stalled loop forces the check in any phase.
        let stalled = stalled_streak(&state.ooda)
            >= self.config.hypotheses.anchoring_stalled_iterations.max(1);
        if state.ooda.hypotheses.is_empty()
            || !(stalled || matches!(state.phase, Phase::Hypothesis | Phase::Validation))
        {
            return;
        }
        let manager = self.hypotheses();
        let Some(reason) = manager.detect_anchoring(&state.ooda) else {
            state.ooda.anchoring_detected = false;
            return;
        };
        let forced =
            manager.force_alternatives(&state.ooda.category_tests, reason.anchored_category(&state.ooda));
        let description = reason.to_string();
        if !state.ooda.anchoring_detected {
            state.ooda.anchoring_detected = true;
            state.ooda.forced_categories = forced.clone();
            self.events.on_event(&EngineEvent::AnchoringDetected {
                investigation_id: &state.id,
                reason: &description,
                forced: &forced,
            });
        }
        scratch.anchoring = Some(AnchoringNotice {
            reason,
            description,
            forced_categories: forced,
        });
    }

    fn check_stall(&self, state: &InvestigationState, scratch: &mut TurnScratch) {
        let streak = stalled_streak(&state.ooda);
        if streak < self.config.hypotheses.anchoring_stalled_iterations.max(1) {
            return;
        }
        self.events.on_event(&EngineEvent::Stalled {
            investigation_id: &state.id,
            iterations: streak,
        });
        scratch.stall = Some(StallNotice {
            iterations: streak,
            explanation: stall_explanation(state),
        });
    }
}

// ── Frame helpers ─────────────────────────────────────────────────

/// Fill gaps in `into` from `from`; severity keeps the higher value.
fn merge_fields(into: &mut FrameFields, from: FrameFields) {
    if into.scope.is_none() {
        into.scope = from.scope;
    }
    for component in from.components {
        if !into.components.iter().any(|c| c.eq_ignore_ascii_case(&component)) {
            into.components.push(component);
        }
    }
    if into.started_at.is_none() {
        into.started_at = from.started_at;
    }
    into.severity = into.severity.max(from.severity);
}

/// Apply extracted fields to the frame. Returns whether anything changed.
fn apply_fields(frame: &mut AnomalyFrame, fields: &FrameFields) -> bool {
    let mut changed = false;
    if frame.scope.is_none()
        && let Some(scope) = &fields.scope
    {
        frame.scope = Some(scope.clone());
        changed = true;
    }
    for component in &fields.components {
        if !frame
            .affected_components
            .iter()
            .any(|c| c.eq_ignore_ascii_case(component))
        {
            frame.affected_components.push(component.clone());
            changed = true;
        }
    }
    if frame.started_at.is_none()
        && let Some(start) = &fields.started_at
    {
        frame.started_at = Some(start.clone());
        changed = true;
    }
    if let Some(severity) = fields.severity
        && severity > frame.severity
    {
        frame.severity = severity;
        changed = true;
    }
    changed
}

/// Frame confidence in tenths: 3 for a statement, 2 each for scope and
/// components, 1 for a start time, and 1 per corroborating evidence item
/// up to 2.
fn frame_confidence(frame: &AnomalyFrame, corroborating: usize) -> f64 {
    let mut tenths = 3u32;
    if frame.scope.is_some() {
        tenths += 2;
    }
    if !frame.affected_components.is_empty() {
        tenths += 2;
    }
    if frame.started_at.is_some() {
        tenths += 1;
    }
    tenths += corroborating.min(2) as u32;
    f64::from(tenths.min(10)) / 10.0
}

fn severity_for(urgency: Urgency) -> Severity {
    match urgency {
        Urgency::Low => Severity::Low,
        Urgency::Medium => Severity::Medium,
        Urgency::High => Severity::High,
        Urgency::Critical => Severity::Critical,
    }
}

fn clip_statement(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_STATEMENT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_STATEMENT_CHARS).collect();
    if let Some(pos) = cut.rfind(' ') {
        cut.truncate(pos);
    }
    cut
}

fn stall_explanation(state: &InvestigationState) -> String {
    let mut explanation = match state.phase {
        Phase::BlastRadius => {
            "The anomaly frame is not confirmed yet; confirm it or supply the scope and symptoms requested.".to_string()
        }
        Phase::Timeline => {
            "The start time or the surrounding changes are still unknown.".to_string()
        }
        Phase::Hypothesis | Phase::Validation => {
            "Recent tests neither raised nor ruled out any hypothesis.".to_string()
        }
        Phase::Solution => "The fix has not been applied or verified yet.".to_string(),
        Phase::Intake | Phase::Document => "No new information arrived.".to_string(),
    };
    let blocked = state.evidence.blocked_critical().count();
    if blocked > 0 {
        explanation.push_str(&format!(
            " {blocked} critical evidence request(s) are blocked; see the suggested alternatives."
        ));
    }
    let open: Vec<String> = state
        .evidence
        .open_requests()
        .into_iter()
        .filter(|r| r.priority == Priority::Critical)
        .map(|r| format!("{} ({})", r.label, r.id))
        .collect();
    if !open.is_empty() {
        explanation.push_str(&format!(" Still needed: {}.", open.join(", ")));
    }
    explanation
}

// ── Prompts ───────────────────────────────────────────────────────

fn context_block(state: &InvestigationState) -> String {
    let mut out = String::new();
    if let Some(frame) = &state.ooda.anomaly {
        out.push_str(&format!("Anomaly: {}\n", frame.statement));
        if let Some(scope) = &frame.scope {
            out.push_str(&format!("Scope: {scope}\n"));
        }
        if !frame.affected_components.is_empty() {
            out.push_str(&format!("Components: {}\n", frame.affected_components.join(", ")));
        }
        if let Some(start) = &frame.started_at {
            out.push_str(&format!("Started: {start}\n"));
        }
    }
    let history = state.memory.render_context();
    if !history.is_empty() {
        out.push_str("\n");
        out.push_str(&history);
    }
    out
}

fn frame_prompt(state: &InvestigationState, texts: &[String]) -> String {
    format!(
        "You are framing a production incident.\n{}\nNew reports:\n{}\n\n\
         Extract who is affected (scope), the affected components, when it started and the severity. \
         Leave a field empty when the reports do not say.",
        context_block(state),
        texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

fn hypothesis_prompt(state: &InvestigationState, want: usize) -> String {
    let existing: Vec<String> = state
        .ooda
        .hypotheses
        .iter()
        .map(|h| format!("- {} [{}] {} ({:?}, {:.2})", h.id, h.category, h.statement, h.status, h.likelihood))
        .collect();
    let evidence: Vec<String> = state
        .evidence
        .provided
        .iter()
        .map(|p| format!("- {}: {}", p.id, p.content))
        .collect();
    let forced: Vec<&str> = state.ooda.forced_categories.iter().map(|c| c.as_str()).collect();
    format!(
        "You are proposing root-cause hypotheses for a production incident.\n{}\n\
         Existing hypotheses:\n{}\nEvidence:\n{}\n\n\
         Propose up to {want} new, distinct hypotheses from categories not already covered.{}\n\
         Cite supporting evidence ids only when the evidence actually supports the hypothesis.",
        context_block(state),
        if existing.is_empty() { "(none)".to_string() } else { existing.join("\n") },
        if evidence.is_empty() { "(none)".to_string() } else { evidence.join("\n") },
        if forced.is_empty() {
            String::new()
        } else {
            format!(" Prefer these categories: {}.", forced.join(", "))
        }
    )
}

fn bearing_prompt(state: &InvestigationState, fresh: &[(String, String)]) -> String {
    let hypotheses: Vec<String> = state
        .ooda
        .active_hypotheses()
        .map(|h| format!("- {}: {}", h.id, h.statement))
        .collect();
    let evidence: Vec<String> = fresh.iter().map(|(id, c)| format!("- {id}: {c}")).collect();
    format!(
        "For each evidence item and hypothesis pair, say whether the evidence supports, \
         refutes, or says nothing about the hypothesis.\n\nHypotheses:\n{}\n\nEvidence:\n{}",
        hypotheses.join("\n"),
        evidence.join("\n")
    )
}

fn report_prompt(state: &InvestigationState, report: &InvestigationReport) -> String {
    format!(
        "Write a short incident write-up (under 200 words) from these findings.\n{}\n\n{}",
        context_block(state),
        report.render()
    )
}
