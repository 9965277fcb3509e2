//! Investigation orchestration engine for conversational incident response.
//!
//! `faultline` drives a troubleshooting conversation through a structured
//! investigation. A user message first lands in *consultant* mode, where the
//! engine only reads it for problem signals. When the user consents, or the
//! signal is strong enough, the engine *engages*: it opens a fresh
//! lead-investigator record and runs a phased workflow (blast radius,
//! timeline, hypothesis, validation, solution, document) with an OODA
//! (observe, orient, decide, act) loop inside each phase.
//!
//! Each turn is a pure step: an [`InvestigationState`](model::InvestigationState)
//! and a [`TurnInput`](investigation::TurnInput) go in, the updated state and
//! a set of [`ResponseDirectives`](investigation::ResponseDirectives) come
//! out. The directives say what to ask for and what to show; turning them
//! into prose is the caller's job.
//!
//! The reasoning service (an LLM behind OpenRouter) is optional. Every place
//! that calls it has a deterministic fallback, and a call that fails or times
//! out degrades the turn instead of failing it.
//!
//! # Getting started
//!
//! ```ignore
//! use faultline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), InvestigationError> {
//!     let engine = Engine::offline(EngineConfig::offline());
//!     let service = InvestigationService::new(engine, InMemoryStore::new());
//!
//!     let case = service.open_case("case-42")?;
//!     let outcome = service
//!         .submit(&case.id, &TurnInput::message("API 500 errors for all EU users"))
//!         .await?;
//!
//!     // Engagement replaced the consultant record with a fresh investigation.
//!     let id = outcome.state.id.clone();
//!     println!("{}", serde_json::to_string_pretty(&outcome.directives).unwrap());
//!
//!     let next = TurnInput::message("started around 14:05 after the deploy");
//!     service.submit(&id, &next).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Process a turn:** [`Engine::process_turn`](investigation::Engine::process_turn),
//!   or [`InvestigationService::submit`](investigation::InvestigationService::submit)
//!   to have loading and saving handled for you.
//! - **Tune behavior:** [`EngineConfig`](investigation::EngineConfig). Reasoning
//!   features sit behind a [`Toggle`](investigation::Toggle); thresholds for
//!   decay, retirement and anchoring live in
//!   [`HypothesisConfig`](investigation::HypothesisConfig).
//! - **Observe the engine:** implement
//!   [`EventHandler`](investigation::EventHandler), or compose the provided
//!   handlers.
//! - **Persist investigations:** implement
//!   [`InvestigationStore`](store::InvestigationStore), or use
//!   [`FileStore`](store::FileStore) / [`InMemoryStore`](store::InMemoryStore).
//! - **Plug in another model provider:** implement
//!   [`Reasoner`](api::reasoning::Reasoner).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`model`] | Investigation state, phases, hypotheses, evidence, iterations, invariant checks |
//! | [`investigation`] | Engine, phase controller, OODA runner, hypothesis and evidence management, directives |
//! | [`memory`] | Hot/warm/cold/persistent tiers and their compression |
//! | [`store`] | Persistence capability with in-memory and file implementations |
//! | [`api`] | Reasoning-service trait, OpenRouter client, retry |
//! | [`error`] | [`InvestigationError`](error::InvestigationError) |
//!
//! # Design principles
//!
//! 1. **Turns are atomic.** The engine works on a copy and hands back a
//!    complete state or an error. Nothing half-applied is ever stored.
//!
//! 2. **Reasoning is optional.** The rule-based paths are complete on their
//!    own; the reasoning service refines them when it is available.
//!
//! 3. **Memory is budgeted.** Iteration history is compressed through tiers
//!    so the context handed to the reasoning service stays within a fixed
//!    token budget no matter how long the investigation runs.
//!
//! 4. **Corrupt state stops the investigation.** A record that fails its
//!    invariants is refused instead of repaired.

pub mod api;
pub mod error;
pub mod investigation;
pub mod memory;
pub mod model;
pub mod prelude;
pub mod store;

use schemars::JsonSchema;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` for a structured reasoning
/// result. The same schema is sent with the request and used to validate
/// the response.
///
/// # Example
///
/// ```
/// use faultline::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Assessment {
///     statement: String,
///     #[serde(default)]
///     likelihood: Option<f64>,
/// }
///
/// let schema = json_schema_for::<Assessment>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"statement".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
