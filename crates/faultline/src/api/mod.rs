//! Reasoning-service layer: the capability the engine consumes, its
//! OpenRouter implementation, retry, and identifiers.
//!
//! - [`reasoning`]: [`Reasoner`] trait, [`ReasoningError`], the timeout- and
//!   schema-enforcing call helpers.
//! - [`openrouter`]: HTTP client and [`OpenRouterReasoner`].
//! - [`retry`]: transient error detection with exponential backoff.
//! - [`ids`]: investigation id generation and usage accounting.

pub mod ids;
pub mod openrouter;
pub mod reasoning;
pub mod retry;

pub use ids::{UsageTracker, generate_investigation_id};
pub use openrouter::{OpenRouterClient, OpenRouterReasoner};
pub use reasoning::{OfflineReasoner, Reasoner, ReasoningError, ReasoningFuture};
pub use retry::RetryConfig;
