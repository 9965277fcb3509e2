//! The reasoning-service capability consumed by the engine.
//!
//! The engine depends only on "generate text" and "generate a structured
//! object" with a caller-supplied timeout. Every failure is a
//! [`ReasoningError`], so a failed call can never be mistaken for a
//! successful answer that merely carries low confidence.
//!
//! [`generate_typed`] is the single structured call site: it enforces the
//! timeout, checks the returned object against the JSON Schema of the target
//! type and deserializes it. Callers that receive an error fall back to their
//! deterministic rule.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Boxed future returned by [`Reasoner`] methods.
pub type ReasoningFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ReasoningError>> + Send + 'a>>;

/// Why a reasoning call produced no usable result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),

    /// Service unreachable, rejected the request, or is disabled.
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    /// The service answered, but the answer did not match the requested shape.
    #[error("reasoning output invalid: {0}")]
    InvalidOutput(String),
}

/// Abstract text / structured-object generation.
///
/// Implementations must be shareable across concurrently processed
/// investigations; they hold no per-investigation state.
pub trait Reasoner: Send + Sync {
    /// Short name used in logs and degraded-capability notes.
    fn name(&self) -> &str;

    fn generate_text<'a>(&'a self, prompt: &'a str, timeout: Duration)
    -> ReasoningFuture<'a, String>;

    /// Generate a JSON object conforming to `schema`.
    fn generate_structured<'a>(
        &'a self,
        prompt: &'a str,
        schema: &'a serde_json::Value,
        timeout: Duration,
    ) -> ReasoningFuture<'a, serde_json::Value>;
}

/// A reasoner that is never available. Used for offline runs; every caller
/// takes its deterministic fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineReasoner;

impl Reasoner for OfflineReasoner {
    fn name(&self) -> &str {
        "offline"
    }

    fn generate_text<'a>(
        &'a self,
        _prompt: &'a str,
        _timeout: Duration,
    ) -> ReasoningFuture<'a, String> {
        Box::pin(async { Err(ReasoningError::Unavailable("offline mode".into())) })
    }

    fn generate_structured<'a>(
        &'a self,
        _prompt: &'a str,
        _schema: &'a serde_json::Value,
        _timeout: Duration,
    ) -> ReasoningFuture<'a, serde_json::Value> {
        Box::pin(async { Err(ReasoningError::Unavailable("offline mode".into())) })
    }
}

/// Run `fut` under `timeout`, mapping expiry to [`ReasoningError::Timeout`].
///
/// Applied on top of whatever the implementation does with the timeout, so a
/// reasoner that ignores it still cannot stall a turn.
pub async fn within<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ReasoningError>>,
) -> Result<T, ReasoningError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ReasoningError::Timeout(timeout)),
    }
}

/// Generate text with the timeout enforced.
pub async fn generate_text(
    reasoner: &dyn Reasoner,
    prompt: &str,
    timeout: Duration,
) -> Result<String, ReasoningError> {
    let text = within(timeout, reasoner.generate_text(prompt, timeout)).await?;
    if text.trim().is_empty() {
        return Err(ReasoningError::InvalidOutput("empty text".into()));
    }
    Ok(text)
}

/// Generate, schema-check and deserialize a structured result of type `T`.
pub async fn generate_typed<T: DeserializeOwned + JsonSchema>(
    reasoner: &dyn Reasoner,
    prompt: &str,
    timeout: Duration,
) -> Result<T, ReasoningError> {
    let schema = crate::json_schema_for::<T>();
    let value = within(timeout, reasoner.generate_structured(prompt, &schema, timeout)).await?;
    validate_against(&schema, &value)?;
    debug!("[reasoning] {} returned a schema-valid object", reasoner.name());
    serde_json::from_value(value).map_err(|e| ReasoningError::InvalidOutput(e.to_string()))
}

/// Check `value` against `schema`, collecting every violation.
pub fn validate_against(
    schema: &serde_json::Value,
    value: &serde_json::Value,
) -> Result<(), ReasoningError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| ReasoningError::InvalidOutput(format!("unusable schema: {e}")))?;
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReasoningError::InvalidOutput(errors.join("; ")))
    }
}

/// Pull the first JSON object out of free model text (which may wrap it in
/// prose or a fenced block).
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(text.get(start..=end)?).ok()
}
