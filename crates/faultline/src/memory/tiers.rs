//! The four memory tiers and their aggregate.
//!
//! Tiers reference iterations by id only. Hypotheses are never stored here;
//! they live at full fidelity in the OODA layer.

use serde::{Deserialize, Serialize};

use super::budget::{TierUsage, estimate_tokens, truncate_to_tokens};
use super::facts::render_facts;

/// A recent iteration held verbatim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HotEntry {
    pub iteration_id: String,
    pub number: u32,
    pub record: String,
}

/// Which summarizer produced a warm entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Generative,
    Extractive,
}

/// A summarized iteration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WarmEntry {
    pub iteration_id: String,
    pub number: u32,
    pub summary: String,
    pub source: SummarySource,
    /// The generative summarizer failed for this entry; the raw iteration is
    /// kept and summarization is retried on the next cycle.
    #[serde(default)]
    pub retry_pending: bool,
}

/// Key facts of an old iteration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ColdEntry {
    pub iteration_id: String,
    pub number: u32,
    pub facts: Vec<String>,
}

impl ColdEntry {
    pub fn render(&self) -> String {
        render_facts(&self.iteration_id, &self.facts)
    }
}

/// A durable insight that is never compressed or evicted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PersistentInsight {
    pub text: String,
    pub turn: u32,
}

/// Hot/Warm/Cold/Persistent memory of one investigation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HierarchicalMemory {
    pub hot: Vec<HotEntry>,
    pub warm: Vec<WarmEntry>,
    pub cold: Vec<ColdEntry>,
    pub persistent: Vec<PersistentInsight>,
    pub last_compression_turn: Option<u32>,
    pub compressions: u32,
}

impl HierarchicalMemory {
    /// Append an insight unless an identical one is already recorded.
    /// Returns whether it was added.
    pub fn add_insight(
        &mut self,
        text: &str,
        turn: u32,
        max_tokens: usize,
        chars_per_token: f64,
    ) -> bool {
        let text = truncate_to_tokens(text.trim(), max_tokens, chars_per_token);
        if text.is_empty() || self.persistent.iter().any(|i| i.text == text) {
            return false;
        }
        self.persistent.push(PersistentInsight { text, turn });
        true
    }

    pub fn warm_entry(&self, iteration_id: &str) -> Option<&WarmEntry> {
        self.warm.iter().find(|w| w.iteration_id == iteration_id)
    }

    pub fn has_cold(&self, iteration_id: &str) -> bool {
        self.cold.iter().any(|c| c.iteration_id == iteration_id)
    }

    /// Estimated tokens per tier, measured on the rendered text.
    pub fn usage(&self, chars_per_token: f64) -> TierUsage {
        let tokens = |text: &str| estimate_tokens(text, chars_per_token);
        TierUsage {
            hot: self.hot.iter().map(|h| tokens(&h.record)).sum(),
            warm: self.warm.iter().map(|w| tokens(&w.summary)).sum(),
            cold: self.cold.iter().map(|c| tokens(&c.render())).sum(),
            persistent: self.persistent.iter().map(|p| tokens(&p.text)).sum(),
        }
    }

    /// The bounded history handed to the reasoning service, oldest first.
    pub fn render_context(&self) -> String {
        let mut out = String::new();
        if !self.persistent.is_empty() {
            out.push_str("## Established\n");
            for insight in &self.persistent {
                out.push_str(&format!("- {}\n", insight.text));
            }
        }
        if !self.cold.is_empty() {
            out.push_str("## Older iterations\n");
            for entry in &self.cold {
                out.push_str(&format!("- {}\n", entry.render()));
            }
        }
        if !self.warm.is_empty() {
            out.push_str("## Earlier iterations\n");
            for entry in &self.warm {
                out.push_str(&format!("- {}: {}\n", entry.iteration_id, entry.summary));
            }
        }
        if !self.hot.is_empty() {
            out.push_str("## Recent iterations\n");
            for entry in &self.hot {
                out.push_str(&entry.record);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insights_are_deduplicated_and_capped() {
        let mut memory = HierarchicalMemory::default();
        assert!(memory.add_insight("Root cause: pool exhaustion", 4, 40, 3.5));
        assert!(!memory.add_insight("Root cause: pool exhaustion", 5, 40, 3.5));
        assert!(memory.add_insight(&"x".repeat(1000), 6, 40, 3.5));
        assert_eq!(memory.persistent.len(), 2);
        assert!(memory.usage(3.5).persistent <= 50);
    }

    #[test]
    fn usage_measures_each_tier() {
        let memory = HierarchicalMemory {
            hot: vec![HotEntry {
                iteration_id: "I3".into(),
                number: 3,
                record: "x".repeat(35),
            }],
            cold: vec![ColdEntry {
                iteration_id: "I1".into(),
                number: 1,
                facts: vec!["no progress".into()],
            }],
            ..Default::default()
        };
        let usage = memory.usage(3.5);
        assert_eq!(usage.hot, 10);
        assert_eq!(usage.warm, 0);
        assert_eq!(usage.cold, 5); // "I1: no progress" = 15 chars
    }

    #[test]
    fn context_lists_tiers_oldest_first() {
        let mut memory = HierarchicalMemory::default();
        memory.add_insight("frame confirmed", 1, 40, 3.5);
        memory.hot.push(HotEntry {
            iteration_id: "I7".into(),
            number: 7,
            record: "I7 [validation]".into(),
        });
        memory.cold.push(ColdEntry {
            iteration_id: "I1".into(),
            number: 1,
            facts: vec!["2 new hypotheses".into()],
        });
        let ctx = memory.render_context();
        let established = ctx.find("Established").unwrap();
        let older = ctx.find("I1: 2 new hypotheses").unwrap();
        let recent = ctx.find("I7 [validation]").unwrap();
        assert!(established < older && older < recent);
    }
}
