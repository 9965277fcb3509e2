//! Configuration types for the [`Engine`](super::engine::Engine).
//!
//! Every section has working defaults. Override specific sections through
//! [`EngineConfig`] struct fields, or use the builder methods for the common
//! knobs.
//!
//! ```ignore
//! let config = EngineConfig::default()
//!     .with_model("anthropic/claude-sonnet-4")
//!     .with_reasoning_timeout(Duration::from_secs(10))
//!     .with_compression_interval(3);
//!
//! let offline = EngineConfig {
//!     reasoning: Toggle::disabled(),
//!     ..EngineConfig::default()
//! };
//! ```

use std::time::Duration;

use crate::api::openrouter::DEFAULT_MODEL;
use crate::api::retry::RetryConfig;
use crate::memory::MemoryConfig;

// ── Generic toggle ────────────────────────────────────────────────

/// Enabled/disabled wrapper for an optional engine capability.
///
/// When `enabled` is `false` the capability is skipped regardless of the
/// inner config values.
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle<T: Default> {
    pub enabled: bool,
    pub config: T,
}

impl<T: Default> Toggle<T> {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Reasoning ─────────────────────────────────────────────────────

/// Reasoning-service call settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningConfig {
    pub model: String,
    /// Per-call timeout. Expiry triggers the deterministic fallback.
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retry: RetryConfig,
    /// Use the reasoning service for warm-tier summaries.
    pub summaries: bool,
    /// Use the reasoning service for hypothesis generation.
    pub hypotheses: bool,
    /// Use the reasoning service for anomaly-frame assessment.
    pub framing: bool,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(20),
            max_tokens: 1024,
            temperature: 0.2,
            retry: RetryConfig::default(),
            summaries: true,
            hypotheses: true,
            framing: true,
        }
    }
}

/// Reasoning is on by default; `Toggle::disabled()` runs fully offline.
pub type EngineReasoningConfig = Toggle<ReasoningConfig>;

// ── Hypotheses ────────────────────────────────────────────────────

/// Confidence dynamics and anchoring thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisConfig {
    /// Per-stalled-iteration decay factor.
    pub decay_base: f64,
    /// Turns without progress before decay applies.
    pub decay_grace_turns: u32,
    /// Below this a decaying hypothesis is retired.
    pub retirement_threshold: f64,
    /// At or above this a supported hypothesis is validated.
    pub validation_threshold: f64,
    /// Hypotheses in one category tested without resolution that count as
    /// category fixation.
    pub anchoring_same_category: usize,
    /// Consecutive iterations without progress that count as a stall.
    pub anchoring_stalled_iterations: usize,
    /// Initial likelihood above which a hypothesis is a strong favourite.
    pub favourite_threshold: f64,
    /// Failed validations of a strong favourite that count as anchoring.
    pub favourite_failures: u32,
    /// Tests in a category before it counts as heavily tested.
    pub heavily_tested: u32,
    /// Categories offered when anchoring is detected.
    pub forced_alternatives: usize,
    pub min_candidates: usize,
    pub max_candidates: usize,
    /// Likelihood gained from a supporting test, as a share of the gap to 1.
    pub support_gain: f64,
    /// Likelihood kept after a refuting test.
    pub refute_factor: f64,
}

impl Default for HypothesisConfig {
    fn default() -> Self {
        Self {
            decay_base: 0.85,
            decay_grace_turns: 2,
            retirement_threshold: 0.3,
            validation_threshold: 0.7,
            anchoring_same_category: 4,
            anchoring_stalled_iterations: 3,
            favourite_threshold: 0.8,
            favourite_failures: 3,
            heavily_tested: 2,
            forced_alternatives: 3,
            min_candidates: 2,
            max_candidates: 4,
            support_gain: 0.35,
            refute_factor: 0.4,
        }
    }
}

// ── Controller ────────────────────────────────────────────────────

/// Phase/mode controller settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Anomaly-frame confidence needed to leave BlastRadius.
    pub frame_confirmation: f64,
    /// Turns after a fix with no regression before Solution completes.
    pub verification_window: u32,
    /// A strong problem signal engages immediately instead of offering.
    pub engage_on_strong_signal: bool,
    /// Minimum confidence delta that counts as progress.
    pub progress_epsilon: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            frame_confirmation: 0.7,
            verification_window: 2,
            engage_on_strong_signal: true,
            progress_epsilon: 0.01,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub reasoning: EngineReasoningConfig,
    pub memory: MemoryConfig,
    pub hypotheses: HypothesisConfig,
    pub controller: ControllerConfig,
}

impl EngineConfig {
    /// Defaults with the reasoning service disabled.
    pub fn offline() -> Self {
        Self {
            reasoning: Toggle::disabled(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.reasoning.config.model = model.into();
        self
    }

    pub fn with_reasoning_timeout(mut self, timeout: Duration) -> Self {
        self.reasoning.config.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.reasoning.config.retry = RetryConfig::with_retries(retries);
        self
    }

    pub fn with_compression_interval(mut self, turns: u32) -> Self {
        self.memory.compression_interval = turns;
        self
    }

    pub fn with_engage_on_strong_signal(mut self, engage: bool) -> Self {
        self.controller.engage_on_strong_signal = engage;
        self
    }

    /// Whether a given reasoning-backed feature should be attempted.
    pub fn reasoning_for(&self, feature: fn(&ReasoningConfig) -> bool) -> bool {
        self.reasoning.enabled && feature(&self.reasoning.config)
    }
}
