//! The compression cycle.
//!
//! Runs every `compression_interval` turns over the raw iteration history of
//! one investigation:
//!
//! 1. Hot = the `hot_window` most recent iterations, rendered verbatim.
//! 2. Iterations in the warm window get a capped summary, unless they already
//!    have one that does not need a retry.
//! 3. Iterations older than the warm window are reduced to key facts and their
//!    raw records are dropped from the live history.
//! 4. Warm and cold are pruned to their windows, then trimmed to budget.
//!
//! Persistent insights are never touched here.

use tracing::{debug, info};

use crate::api::reasoning::ReasoningError;
use crate::model::OodaIteration;

use super::budget::{MemoryConfig, TierUsage, truncate_to_tokens};
use super::facts::{extract_facts, render_record};
use super::summarizer::FallbackSummarizer;
use super::tiers::{ColdEntry, HierarchicalMemory, HotEntry, WarmEntry};

/// What one compression cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionReport {
    pub turn: u32,
    pub summarized: u32,
    pub fallbacks: u32,
    pub aged_to_cold: u32,
    pub dropped: u32,
    /// Reasoning failures that forced an extractive summary.
    pub failures: Vec<ReasoningError>,
    pub before: TierUsage,
    pub after: TierUsage,
}

/// Keeps an investigation's memory tiers inside their budgets.
pub struct MemoryCompressor {
    config: MemoryConfig,
    summarizer: FallbackSummarizer,
}

impl MemoryCompressor {
    pub fn new(config: MemoryConfig, summarizer: FallbackSummarizer) -> Self {
        Self { config, summarizer }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Whether a cycle is due at the end of `turn`.
    pub fn is_due(&self, turn: u32) -> bool {
        self.config.is_compression_turn(turn)
    }

    /// Run one cycle. `iterations` is the live raw history, oldest first;
    /// iterations that age into the cold tier are removed from it.
    pub async fn compress(
        &self,
        memory: &mut HierarchicalMemory,
        iterations: &mut Vec<OodaIteration>,
        turn: u32,
    ) -> CompressionReport {
        let cpt = self.config.chars_per_token;
        let before = memory.usage(cpt);
        let mut report = CompressionReport {
            turn,
            summarized: 0,
            fallbacks: 0,
            aged_to_cold: 0,
            dropped: 0,
            failures: Vec::new(),
            before,
            after: before,
        };
        let latest = iterations.last().map_or(0, |it| it.number);

        // 1. Hot.
        let hot_cap = self.config.hot_record_max_tokens();
        memory.hot = iterations
            .iter()
            .filter(|it| position_back(latest, it.number) <= self.config.hot_window)
            .map(|it| HotEntry {
                iteration_id: it.id.clone(),
                number: it.number,
                record: truncate_to_tokens(&render_record(it), hot_cap, cpt),
            })
            .collect();

        // 2. Warm.
        let mut warm = Vec::new();
        for it in iterations
            .iter()
            .filter(|it| self.config.is_warm_position(position_back(latest, it.number)))
        {
            if let Some(existing) = memory.warm_entry(&it.id)
                && !existing.retry_pending
            {
                warm.push(existing.clone());
                continue;
            }
            let record = render_record(it);
            let outcome = self
                .summarizer
                .summarize(&record, self.config.summary_max_tokens)
                .await;
            report.summarized += 1;
            let retry_pending = outcome.failure.is_some();
            if let Some(failure) = outcome.failure {
                report.fallbacks += 1;
                report.failures.push(failure);
            }
            debug!(
                "[memory] summarized {} via {:?} ({} chars)",
                it.id,
                outcome.source,
                outcome.text.len()
            );
            warm.push(WarmEntry {
                iteration_id: it.id.clone(),
                number: it.number,
                summary: outcome.text,
                source: outcome.source,
                retry_pending,
            });
        }
        memory.warm = warm;

        // 3. Cold.
        let cold_cap = self.config.cold_entry_max_tokens();
        let (aged, live): (Vec<OodaIteration>, Vec<OodaIteration>) = iterations
            .drain(..)
            .partition(|it| self.config.is_cold_position(position_back(latest, it.number)));
        *iterations = live;
        for it in &aged {
            if memory.has_cold(&it.id) {
                continue;
            }
            memory.cold.push(ColdEntry {
                iteration_id: it.id.clone(),
                number: it.number,
                facts: extract_facts(it, cold_cap, cpt),
            });
            report.aged_to_cold += 1;
        }
        memory.cold.sort_by_key(|c| c.number);

        // 4. Prune and trim.
        report.dropped += prune_oldest(&mut memory.warm, self.config.warm_window);
        report.dropped += prune_oldest(&mut memory.cold, self.config.cold_window);
        self.trim_cold(memory);

        memory.last_compression_turn = Some(turn);
        memory.compressions += 1;
        report.after = memory.usage(cpt);
        info!(
            "[memory] compression at turn {turn}: {} -> {} tokens ({} summarized, {} fallback, {} aged, {} dropped)",
            report.before.total(),
            report.after.total(),
            report.summarized,
            report.fallbacks,
            report.aged_to_cold,
            report.dropped,
        );
        report
    }

    /// Drop trailing facts from the oldest cold entries until the tier fits.
    fn trim_cold(&self, memory: &mut HierarchicalMemory) {
        let cpt = self.config.chars_per_token;
        let budget = self.config.budget.cold;
        let mut idx = 0;
        while memory.usage(cpt).cold > budget && idx < memory.cold.len() {
            let entry = &mut memory.cold[idx];
            if entry.facts.len() > 1 {
                entry.facts.pop();
            } else {
                idx += 1;
            }
        }
        while memory.usage(cpt).cold > budget && !memory.cold.is_empty() {
            memory.cold.remove(0);
        }
    }
}

/// 1 for the most recent iteration, 2 for the one before, and so on.
fn position_back(latest: u32, number: u32) -> usize {
    (latest.saturating_sub(number) + 1) as usize
}

trait Numbered {
    fn number(&self) -> u32;
}

impl Numbered for WarmEntry {
    fn number(&self) -> u32 {
        self.number
    }
}

impl Numbered for ColdEntry {
    fn number(&self) -> u32 {
        self.number
    }
}

fn prune_oldest<T: Numbered>(entries: &mut Vec<T>, keep: usize) -> u32 {
    entries.sort_by_key(|e| e.number());
    let excess = entries.len().saturating_sub(keep);
    entries.drain(..excess);
    excess as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::facts::tests::iteration;
    use crate::memory::summarizer::{IterationSummarizer, SummaryFuture};
    use crate::memory::tiers::SummarySource;
    use std::time::Duration;

    struct Flaky {
        fail: bool,
    }

    impl IterationSummarizer for Flaky {
        fn source(&self) -> SummarySource {
            SummarySource::Generative
        }

        fn summarize<'a>(&'a self, _record: &'a str, _max: usize) -> SummaryFuture<'a> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(ReasoningError::Timeout(Duration::from_millis(1)))
                } else {
                    Ok("H2 weakened after pool metrics came back flat.".to_string())
                }
            })
        }
    }

    fn history(n: u32) -> Vec<OodaIteration> {
        (1..=n).map(iteration).collect()
    }

    fn compressor(fail: bool) -> MemoryCompressor {
        let config = MemoryConfig::default();
        let summarizer = FallbackSummarizer::new(
            Box::new(Flaky { fail }),
            Duration::from_secs(1),
            config.chars_per_token,
        );
        MemoryCompressor::new(config, summarizer)
    }

    #[tokio::test]
    async fn windows_are_assigned_by_age() {
        let mut memory = HierarchicalMemory::default();
        let mut iterations = history(9);
        let report = compressor(false).compress(&mut memory, &mut iterations, 9).await;

        let hot: Vec<u32> = memory.hot.iter().map(|h| h.number).collect();
        let warm: Vec<u32> = memory.warm.iter().map(|w| w.number).collect();
        let cold: Vec<u32> = memory.cold.iter().map(|c| c.number).collect();
        assert_eq!(hot, vec![8, 9]);
        assert_eq!(warm, vec![5, 6, 7]);
        assert_eq!(cold, vec![1, 2, 3, 4]);
        assert_eq!(iterations.len(), 5);
        assert_eq!(report.summarized, 3);
        assert!(memory.warm.iter().all(|w| w.source == SummarySource::Generative));
        assert!(report.after.within(&MemoryConfig::default().budget));
    }

    #[tokio::test]
    async fn existing_summaries_are_reused() {
        let mut memory = HierarchicalMemory::default();
        let mut iterations = history(6);
        let c = compressor(false);
        c.compress(&mut memory, &mut iterations, 6).await;
        let report = c.compress(&mut memory, &mut iterations, 6).await;
        assert_eq!(report.summarized, 0);
    }

    #[tokio::test]
    async fn failed_summaries_fall_back_and_retry_next_cycle() {
        let mut memory = HierarchicalMemory::default();
        let mut iterations = history(5);
        let report = compressor(true).compress(&mut memory, &mut iterations, 5).await;
        assert_eq!(report.fallbacks, 3);
        assert!(memory.warm.iter().all(|w| w.retry_pending));
        assert!(memory.warm.iter().all(|w| w.source == SummarySource::Extractive));

        let report = compressor(false).compress(&mut memory, &mut iterations, 5).await;
        assert_eq!(report.summarized, 3);
        assert!(memory.warm.iter().all(|w| !w.retry_pending));
    }

    #[tokio::test]
    async fn cold_is_pruned_to_window_and_budget() {
        let mut memory = HierarchicalMemory::default();
        let mut iterations = history(30);
        let config = MemoryConfig::default();
        compressor(false).compress(&mut memory, &mut iterations, 30).await;
        assert!(memory.cold.len() <= config.cold_window);
        assert!(memory.usage(config.chars_per_token).cold <= config.budget.cold);
        assert_eq!(memory.cold.last().map(|c| c.number), Some(25));
    }
}
