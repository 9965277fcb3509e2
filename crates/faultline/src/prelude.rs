//! Convenience re-exports for common `faultline` types.
//!
//! Meant to be glob-imported by callers driving investigations:
//!
//! ```ignore
//! use faultline::prelude::*;
//! ```
//!
//! This pulls in the engine, its configuration and input types, the state
//! model's top-level types, the stores and the reasoning-service seam.
//! Tier internals, prompt schemas and the OpenRouter wire types are left
//! out; import those from their modules directly when needed.

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::investigation::{
    CompositeEventHandler, Engine, EngineConfig, EngineEvent, EventHandler, FnEventHandler,
    InvestigationReport, InvestigationService, LoggingHandler, NoopHandler, ProgressSummary,
    ResponseDirectives, Toggle, TurnInput, TurnOutcome,
};

// ── State model ─────────────────────────────────────────────────────
pub use crate::model::{
    EngagementMode, EvidenceSubmission, HypothesisCategory, HypothesisStatus, InvestigationState,
    InvestigationStatus, Phase, Strategy, TestOutcome, Urgency,
};

// ── Persistence ─────────────────────────────────────────────────────
pub use crate::store::{FileStore, InMemoryStore, InvestigationStore, RetentionHints};

// ── Reasoning service ───────────────────────────────────────────────
pub use crate::api::{OfflineReasoner, OpenRouterReasoner, Reasoner, ReasoningError};

pub use crate::error::InvestigationError;
pub use crate::json_schema_for;
