//! Investigation identifiers and reasoning-call usage accounting.
//!
//! Investigation ids are process-unique: a nanosecond timestamp plus a
//! monotonically increasing counter, so two investigations opened in the same
//! instant for the same case still get distinct ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a fresh investigation id (`inv-<hex nanos>-<counter>`).
pub fn generate_investigation_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("inv-{ts:x}-{count:04x}")
}

/// Id of the `number`-th iteration of an investigation.
pub fn iteration_id(number: u32) -> String {
    format!("I{number}")
}

/// Cumulative token usage of the reasoning service across one process.
///
/// Shared by reference between concurrent turns; counters are atomics so no
/// investigation ever blocks on another.
#[derive(Debug, Default)]
pub struct UsageTracker {
    calls: AtomicU64,
    failures: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, prompt_tokens: u32, completion_tokens: u32) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(prompt_tokens as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed) + self.completion_tokens.load(Ordering::Relaxed)
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "reasoning calls: {} ({} failed), tokens: {} prompt + {} completion",
            self.calls(),
            self.failures(),
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn investigation_ids_are_unique() {
        let a = generate_investigation_id();
        let b = generate_investigation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("inv-"));
    }

    #[test]
    fn iteration_id_format() {
        assert_eq!(iteration_id(7), "I7");
    }

    #[test]
    fn usage_accumulates() {
        let usage = UsageTracker::new();
        usage.record(100, 20);
        usage.record(50, 10);
        usage.record_failure();
        assert_eq!(usage.calls(), 3);
        assert_eq!(usage.failures(), 1);
        assert_eq!(usage.total_tokens(), 180);
        assert!(usage.summary().contains("1 failed"));
    }
}
