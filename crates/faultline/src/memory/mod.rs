//! Hierarchical memory: keeps an investigation's accumulated iteration
//! history inside a fixed token budget.
//!
//! | Tier | Content | Default budget |
//! |------|---------|----------------|
//! | Hot | last 2 iterations, verbatim | 500 |
//! | Warm | summaries of iterations 3–5 back | 300 |
//! | Cold | key facts of iterations 6+ back, last 5 kept | 100 |
//! | Persistent | append-only durable insights | 100 |
//!
//! - [`budget`]: token estimation, [`MemoryBudget`], [`MemoryConfig`].
//! - [`tiers`]: tier entries and [`HierarchicalMemory`].
//! - [`facts`]: deterministic record rendering and key-fact extraction.
//! - [`summarizer`]: generative/extractive summarizers behind one call site.
//! - [`compressor`]: the compression cycle.

pub mod budget;
pub mod compressor;
pub mod facts;
pub mod summarizer;
pub mod tiers;

pub use budget::{DEFAULT_CHARS_PER_TOKEN, MemoryBudget, MemoryConfig, TierUsage, estimate_tokens};
pub use compressor::{CompressionReport, MemoryCompressor};
pub use summarizer::{
    ExtractiveSummarizer, FallbackSummarizer, GenerativeSummarizer, IterationSummarizer,
    SummaryOutcome,
};
pub use tiers::{
    ColdEntry, HierarchicalMemory, HotEntry, PersistentInsight, SummarySource, WarmEntry,
};
