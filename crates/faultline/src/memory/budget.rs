//! Token estimation and per-tier budgets.
//!
//! Token counts are estimated from character counts, the same way the rest
//! of the crate sizes text for the reasoning service. Estimates round up so
//! a text that fits by estimate fits.

use serde::{Deserialize, Serialize};

/// Default characters per token (conservative estimate for English text).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimated tokens for `text`: `ceil(chars / chars_per_token)`.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    (chars as f64 / chars_per_token).ceil() as usize
}

/// Cut `text` so its estimate is at most `max_tokens`, marking the cut with
/// a trailing ellipsis. Always splits on a char boundary.
pub fn truncate_to_tokens(text: &str, max_tokens: usize, chars_per_token: f64) -> String {
    if estimate_tokens(text, chars_per_token) <= max_tokens {
        return text.to_string();
    }
    let max_chars = (max_tokens as f64 * chars_per_token).floor() as usize;
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

/// Token budget per memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryBudget {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub persistent: usize,
    /// Ceiling for all four tiers together.
    pub total: usize,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            hot: 500,
            warm: 300,
            cold: 100,
            persistent: 100,
            total: 1600,
        }
    }
}

/// Compression cycle settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    pub budget: MemoryBudget,
    /// Compression runs on turns divisible by this value.
    pub compression_interval: u32,
    /// Most recent iterations kept verbatim.
    pub hot_window: usize,
    /// Iterations kept as summaries after leaving the hot window.
    pub warm_window: usize,
    /// Iterations kept as extracted facts after leaving the warm window.
    pub cold_window: usize,
    /// Cap for one warm summary.
    pub summary_max_tokens: usize,
    /// Cap for one persistent insight.
    pub insight_max_tokens: usize,
    pub chars_per_token: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget: MemoryBudget::default(),
            compression_interval: 3,
            hot_window: 2,
            warm_window: 3,
            cold_window: 5,
            summary_max_tokens: 100,
            insight_max_tokens: 40,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl MemoryConfig {
    /// Whether a compression cycle is due at the end of `turn`.
    pub fn is_compression_turn(&self, turn: u32) -> bool {
        self.compression_interval > 0 && turn > 0 && turn % self.compression_interval == 0
    }

    /// Token cap for one hot record.
    pub fn hot_record_max_tokens(&self) -> usize {
        self.budget.hot / self.hot_window.max(1)
    }

    /// Token cap for one cold entry.
    pub fn cold_entry_max_tokens(&self) -> usize {
        self.budget.cold / self.cold_window.max(1)
    }

    /// Iterations this many positions back (1 = most recent) are warm.
    pub fn is_warm_position(&self, back: usize) -> bool {
        back > self.hot_window && back <= self.hot_window + self.warm_window
    }

    pub fn is_cold_position(&self, back: usize) -> bool {
        back > self.hot_window + self.warm_window
    }
}

/// Estimated token usage of each tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub persistent: usize,
}

impl TierUsage {
    pub fn total(&self) -> usize {
        self.hot + self.warm + self.cold + self.persistent
    }

    /// Hot, warm and cold each within their own budget.
    pub fn compressible_within(&self, budget: &MemoryBudget) -> bool {
        self.hot <= budget.hot && self.warm <= budget.warm && self.cold <= budget.cold
    }

    pub fn within(&self, budget: &MemoryBudget) -> bool {
        self.compressible_within(budget) && self.total() <= budget.total
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "memory: ~{} tokens (hot {}, warm {}, cold {}, persistent {})",
            self.total(),
            self.hot,
            self.warm,
            self.cold,
            self.persistent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 3.5), 0);
        assert_eq!(estimate_tokens("abc", 3.5), 1);
        assert_eq!(estimate_tokens("abcd", 3.5), 2);
        assert_eq!(estimate_tokens(&"x".repeat(350), 3.5), 100);
    }

    #[test]
    fn truncation_respects_cap_and_char_boundaries() {
        let text = "é".repeat(1000);
        let cut = truncate_to_tokens(&text, 10, 3.5);
        assert!(estimate_tokens(&cut, 3.5) <= 10);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate_to_tokens("short", 10, 3.5), "short");
    }

    #[test]
    fn window_positions() {
        let config = MemoryConfig::default();
        assert!(!config.is_warm_position(2));
        assert!(config.is_warm_position(3));
        assert!(config.is_warm_position(5));
        assert!(config.is_cold_position(6));
        assert_eq!(config.hot_record_max_tokens(), 250);
        assert_eq!(config.cold_entry_max_tokens(), 20);
    }

    #[test]
    fn compression_schedule() {
        let config = MemoryConfig::default();
        assert!(!config.is_compression_turn(0));
        assert!(!config.is_compression_turn(2));
        assert!(config.is_compression_turn(3));
        assert!(config.is_compression_turn(9));
    }

    #[test]
    fn usage_totals() {
        let usage = TierUsage {
            hot: 480,
            warm: 300,
            cold: 90,
            persistent: 60,
        };
        assert_eq!(usage.total(), 930);
        assert!(usage.within(&MemoryBudget::default()));
        assert!(usage.to_log_string().contains("930"));
    }
}
