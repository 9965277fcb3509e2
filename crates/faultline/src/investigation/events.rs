//! Engine events and handlers.
//!
//! The engine reports what it decided through [`EngineEvent`] variants.
//! Events are purely observational: handlers cannot alter the turn, and a
//! turn that is later abandoned may already have emitted events.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use tracing::{debug, info, warn};

use crate::memory::TierUsage;
use crate::model::{EngagementMode, HypothesisCategory, Phase, SignalStrength};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted while a turn is processed.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    TurnStarted {
        investigation_id: &'a str,
        turn: u32,
        mode: EngagementMode,
        phase: Phase,
    },
    /// Consultant mode handed over to a fresh lead investigation.
    Engaged {
        superseded_id: &'a str,
        investigation_id: &'a str,
        entry_phase: Phase,
    },
    /// A problem signal was detected and an investigation was offered.
    ConsentRequested {
        investigation_id: &'a str,
        signal: SignalStrength,
    },
    PhaseTransition {
        investigation_id: &'a str,
        from: Phase,
        to: Phase,
        reason: &'a str,
    },
    TransitionRejected {
        investigation_id: &'a str,
        from: Phase,
        to: Phase,
        reason: &'a str,
    },
    IterationCompleted {
        investigation_id: &'a str,
        iteration_id: &'a str,
        phase: Phase,
        made_progress: bool,
        confidence_delta: f64,
    },
    HypothesisGenerated {
        investigation_id: &'a str,
        hypothesis_id: &'a str,
        category: HypothesisCategory,
        likelihood: f64,
    },
    HypothesisRetired {
        investigation_id: &'a str,
        hypothesis_id: &'a str,
        reason: &'a str,
    },
    AnchoringDetected {
        investigation_id: &'a str,
        reason: &'a str,
        forced: &'a [HypothesisCategory],
    },
    /// Several iterations in a row made no progress.
    Stalled {
        investigation_id: &'a str,
        iterations: usize,
    },
    EvidenceBlocked {
        investigation_id: &'a str,
        request_id: &'a str,
        reason: &'a str,
    },
    CompressionCompleted {
        investigation_id: &'a str,
        before: TierUsage,
        after: TierUsage,
        fallbacks: u32,
    },
    /// A warm summary used the extractive path because the reasoning service
    /// failed.
    SummarizerFallback {
        investigation_id: &'a str,
        error: &'a str,
    },
    /// A reasoning-backed step used its deterministic rule instead.
    ReasoningFallback {
        investigation_id: &'a str,
        capability: &'a str,
        error: &'a str,
    },
    InvestigationClosed {
        investigation_id: &'a str,
        root_cause_confirmed: bool,
    },
}

// ── Handler trait ──────────────────────────────────────────────────

/// Observer of engine events.
///
/// Handlers are shared by every investigation the engine processes, so they
/// must be `Send + Sync`.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EngineEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let EngineEvent::PhaseTransition { to, .. } = event {
///         println!("now in {to}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&EngineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler without breaking the builder chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

// ── Logging ────────────────────────────────────────────────────────

/// Logs events through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        match event {
            EngineEvent::TurnStarted {
                investigation_id,
                turn,
                mode,
                phase,
            } => {
                debug!("[{investigation_id}] turn {turn} ({mode:?}, {phase})");
            }
            EngineEvent::Engaged {
                superseded_id,
                investigation_id,
                entry_phase,
            } => {
                info!(
                    "[{investigation_id}] engaged as lead investigator at {entry_phase} (supersedes {superseded_id})"
                );
            }
            EngineEvent::ConsentRequested {
                investigation_id,
                signal,
            } => {
                info!("[{investigation_id}] {signal:?} problem signal, offering an investigation");
            }
            EngineEvent::PhaseTransition {
                investigation_id,
                from,
                to,
                reason,
            } => {
                info!("[{investigation_id}] phase {from} -> {to}: {reason}");
            }
            EngineEvent::TransitionRejected {
                investigation_id,
                from,
                to,
                reason,
            } => {
                warn!("[{investigation_id}] rejected transition {from} -> {to}: {reason}");
            }
            EngineEvent::IterationCompleted {
                investigation_id,
                iteration_id,
                phase,
                made_progress,
                confidence_delta,
            } => {
                debug!(
                    "[{investigation_id}] {iteration_id} in {phase}: progress={made_progress}, delta={confidence_delta:+.3}"
                );
            }
            EngineEvent::HypothesisGenerated {
                investigation_id,
                hypothesis_id,
                category,
                likelihood,
            } => {
                debug!(
                    "[{investigation_id}] new hypothesis {hypothesis_id} ({category}) at {likelihood:.2}"
                );
            }
            EngineEvent::HypothesisRetired {
                investigation_id,
                hypothesis_id,
                reason,
            } => {
                info!("[{investigation_id}] retired {hypothesis_id}: {reason}");
            }
            EngineEvent::AnchoringDetected {
                investigation_id,
                reason,
                forced,
            } => {
                let forced: Vec<&str> = forced.iter().map(|c| c.as_str()).collect();
                warn!(
                    "[{investigation_id}] anchoring detected ({reason}); forcing {}",
                    forced.join(", ")
                );
            }
            EngineEvent::Stalled {
                investigation_id,
                iterations,
            } => {
                warn!("[{investigation_id}] {iterations} iterations without progress");
            }
            EngineEvent::EvidenceBlocked {
                investigation_id,
                request_id,
                reason,
            } => {
                warn!("[{investigation_id}] evidence {request_id} blocked: {reason}");
            }
            EngineEvent::CompressionCompleted {
                investigation_id,
                before,
                after,
                fallbacks,
            } => {
                info!(
                    "[{investigation_id}] compressed {} -> {} ({fallbacks} fallback)",
                    before.total(),
                    after.to_log_string()
                );
            }
            EngineEvent::SummarizerFallback {
                investigation_id,
                error,
            } => {
                warn!("[{investigation_id}] extractive summary used: {error}");
            }
            EngineEvent::ReasoningFallback {
                investigation_id,
                capability,
                error,
            } => {
                warn!("[{investigation_id}] {capability} fell back to rules: {error}");
            }
            EngineEvent::InvestigationClosed {
                investigation_id,
                root_cause_confirmed,
            } => {
                info!("[{investigation_id}] closed (root cause confirmed: {root_cause_confirmed})");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> EngineEvent<'static> {
        EngineEvent::Stalled {
            investigation_id: "inv-1",
            iterations: 3,
        }
    }

    #[test]
    fn composite_dispatches_to_every_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = count.clone();
        let b = count.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| {
                a.fetch_add(1, Ordering::Relaxed);
            }))
            .with_if(false, NoopHandler)
            .with(FnEventHandler::new(move |_| {
                b.fetch_add(10, Ordering::Relaxed);
            }));
        handler.on_event(&sample());
        assert_eq!(count.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        LoggingHandler.on_event(&sample());
        LoggingHandler.on_event(&EngineEvent::AnchoringDetected {
            investigation_id: "inv-1",
            reason: "category fixation",
            forced: &[HypothesisCategory::Network],
        });
    }
}
