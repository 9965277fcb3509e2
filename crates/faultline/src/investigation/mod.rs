//! The investigation engine: turn processing on top of the state model.
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | [`Engine::process_turn`], the single entry point |
//! | [`controller`] | engagement, phase transitions, completion rules |
//! | [`hypotheses`] | generation, decay, retirement, anchoring |
//! | [`evidence`] | request lifecycle, coverage, blocked alternatives |
//! | [`signals`] | rule-based reading of user text |
//! | [`directives`] | per-turn output, progress view, closing report |
//! | [`events`] | observable engine events and handlers |
//! | [`config`] | [`EngineConfig`] and its sections |
//! | [`service`] | store-backed load/process/save per turn |
//!
//! The OODA step runner is internal to the engine.

pub mod config;
pub mod controller;
pub mod directives;
pub mod engine;
pub mod events;
pub mod evidence;
pub mod hypotheses;
mod ooda;
pub mod service;
pub mod signals;

pub use config::{
    ControllerConfig, EngineConfig, EngineReasoningConfig, HypothesisConfig, ReasoningConfig,
    Toggle,
};
pub use controller::PhaseController;
pub use directives::{
    AnchoringNotice, ConsentPrompt, DegradedCapability, InvestigationReport, ProgressSummary,
    RejectionNotice, ResponseDirectives, StallNotice, build_report, progress_view,
};
pub use engine::{BlockedReport, Engine, TestReport, TurnInput, TurnOutcome};
pub use events::{
    CompositeEventHandler, EngineEvent, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler,
};
pub use hypotheses::HypothesisManager;
pub use service::InvestigationService;
pub use signals::{ProblemSignal, detect_signal};
