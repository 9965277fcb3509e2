//! Lifecycle taxonomy: engagement modes, the seven investigation phases, the
//! OODA steps, and the static per-phase definitions.
//!
//! Phase definitions are immutable process-wide tables referenced by
//! [`Phase`]; no investigation holds a mutable copy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the engine engages with the user.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngagementMode {
    /// Reactive Q&A. Phase is always [`Phase::Intake`], no OODA cycles.
    Consultant,
    /// Active investigation across phases BlastRadius through Document.
    LeadInvestigator,
}

/// The seven strategic phases, in lifecycle order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intake,
    BlastRadius,
    Timeline,
    Hypothesis,
    Validation,
    Solution,
    Document,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Intake,
        Phase::BlastRadius,
        Phase::Timeline,
        Phase::Hypothesis,
        Phase::Validation,
        Phase::Solution,
        Phase::Document,
    ];

    /// Position in the lifecycle (0–6).
    pub fn ordinal(self) -> u8 {
        match self {
            Phase::Intake => 0,
            Phase::BlastRadius => 1,
            Phase::Timeline => 2,
            Phase::Hypothesis => 3,
            Phase::Validation => 4,
            Phase::Solution => 5,
            Phase::Document => 6,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Phase> {
        Phase::ALL.get(ordinal as usize).copied()
    }

    /// The next phase on the forward path, `None` for Document.
    pub fn next(self) -> Option<Phase> {
        Phase::from_ordinal(self.ordinal() + 1)
    }

    /// Static definition (active steps, intensity, goal) for this phase.
    pub fn definition(self) -> &'static PhaseDefinition {
        &PHASE_DEFINITIONS[self.ordinal() as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::BlastRadius => "blast_radius",
            Phase::Timeline => "timeline",
            Phase::Hypothesis => "hypothesis",
            Phase::Validation => "validation",
            Phase::Solution => "solution",
            Phase::Document => "document",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the tactical Observe/Orient/Decide/Act cycle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OodaStep {
    Observe,
    Orient,
    Decide,
    Act,
}

impl OodaStep {
    pub const ALL: [OodaStep; 4] = [
        OodaStep::Observe,
        OodaStep::Orient,
        OodaStep::Decide,
        OodaStep::Act,
    ];
}

impl fmt::Display for OodaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OodaStep::Observe => "observe",
            OodaStep::Orient => "orient",
            OodaStep::Decide => "decide",
            OodaStep::Act => "act",
        };
        f.write_str(s)
    }
}

/// How many OODA iterations a phase is expected to take.
///
/// A soft guideline: exceeding the ceiling escalates hypothesis generation,
/// it never stops the phase.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Light,
    Medium,
    Full,
}

impl Intensity {
    pub fn min_iterations(self) -> u32 {
        match self {
            Intensity::Light => 1,
            Intensity::Medium => 2,
            Intensity::Full => 3,
        }
    }

    pub fn max_iterations(self) -> u32 {
        match self {
            Intensity::Light => 2,
            Intensity::Medium => 4,
            Intensity::Full => 6,
        }
    }
}

/// Static description of one phase.
#[derive(Debug)]
pub struct PhaseDefinition {
    pub phase: Phase,
    /// Short statement of what the phase establishes.
    pub goal: &'static str,
    /// OODA steps executed in this phase, in cycle order. Empty for Intake.
    pub steps: &'static [OodaStep],
    pub intensity: Intensity,
}

impl PhaseDefinition {
    pub fn runs_ooda(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn is_active(&self, step: OodaStep) -> bool {
        self.steps.contains(&step)
    }

    /// Steps of the full cycle this phase does not execute.
    pub fn skipped_steps(&self) -> Vec<OodaStep> {
        OodaStep::ALL
            .iter()
            .copied()
            .filter(|s| !self.is_active(*s))
            .collect()
    }
}

pub static PHASE_DEFINITIONS: [PhaseDefinition; 7] = [
    PhaseDefinition {
        phase: Phase::Intake,
        goal: "Answer questions and detect whether there is a problem to investigate",
        steps: &[],
        intensity: Intensity::Light,
    },
    PhaseDefinition {
        phase: Phase::BlastRadius,
        goal: "Establish what is broken, for whom, and how badly",
        steps: &[OodaStep::Observe, OodaStep::Orient],
        intensity: Intensity::Light,
    },
    PhaseDefinition {
        phase: Phase::Timeline,
        goal: "Establish when the problem started and what changed around it",
        steps: &[OodaStep::Observe, OodaStep::Orient],
        intensity: Intensity::Light,
    },
    PhaseDefinition {
        phase: Phase::Hypothesis,
        goal: "Formulate ranked candidate root causes",
        steps: &[OodaStep::Observe, OodaStep::Orient, OodaStep::Decide],
        intensity: Intensity::Medium,
    },
    PhaseDefinition {
        phase: Phase::Validation,
        goal: "Test hypotheses against evidence until one is validated",
        steps: &[
            OodaStep::Observe,
            OodaStep::Orient,
            OodaStep::Decide,
            OodaStep::Act,
        ],
        intensity: Intensity::Full,
    },
    PhaseDefinition {
        phase: Phase::Solution,
        goal: "Apply a fix and verify it holds without regression",
        steps: &[OodaStep::Observe, OodaStep::Decide, OodaStep::Act],
        intensity: Intensity::Medium,
    },
    PhaseDefinition {
        phase: Phase::Document,
        goal: "Synthesize the findings into a durable report",
        steps: &[OodaStep::Orient],
        intensity: Intensity::Light,
    },
];

/// Urgency of the reported problem.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

/// Overall investigation approach.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The problem is happening now: scope it, then diagnose.
    ActiveIncident,
    /// The problem is over and its symptom is known: go straight to testing.
    PostMortem,
}

/// How a phase was entered.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// One step forward along the ordinal sequence.
    Advance,
    /// Hypothesis straight to Solution under critical urgency.
    Skip,
    /// Post-mortem engagement starting directly at Validation.
    ReEntry,
}

/// A recorded phase change.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub turn: u32,
    pub kind: TransitionKind,
    pub reason: String,
}

/// A phase change asked for by the user or the engine, before validation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTransitionRequest {
    pub from: Phase,
    pub to: Phase,
}
