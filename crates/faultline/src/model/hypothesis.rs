//! Hypothesis records and the fixed root-cause category taxonomy.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed taxonomy of root-cause categories.
///
/// Adding a category is a compile-checked change: every `match` over this
/// enum must handle it.
#[derive(
    Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisCategory {
    Infrastructure,
    Code,
    Configuration,
    ExternalDependency,
    ClientSide,
    Data,
    Network,
    Security,
    ResourceExhaustion,
}

impl HypothesisCategory {
    pub const ALL: [HypothesisCategory; 9] = [
        HypothesisCategory::Infrastructure,
        HypothesisCategory::Code,
        HypothesisCategory::Configuration,
        HypothesisCategory::ExternalDependency,
        HypothesisCategory::ClientSide,
        HypothesisCategory::Data,
        HypothesisCategory::Network,
        HypothesisCategory::Security,
        HypothesisCategory::ResourceExhaustion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HypothesisCategory::Infrastructure => "infrastructure",
            HypothesisCategory::Code => "code",
            HypothesisCategory::Configuration => "configuration",
            HypothesisCategory::ExternalDependency => "external_dependency",
            HypothesisCategory::ClientSide => "client_side",
            HypothesisCategory::Data => "data",
            HypothesisCategory::Network => "network",
            HypothesisCategory::Security => "security",
            HypothesisCategory::ResourceExhaustion => "resource_exhaustion",
        }
    }

    /// Lowercase terms that point at this category in free text.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            HypothesisCategory::Infrastructure => &[
                "node", "host", "server", "cluster", "kubernetes", "pod", "instance", "load balancer",
                "disk", "vm",
            ],
            HypothesisCategory::Code => &[
                "deploy", "release", "commit", "bug", "exception", "stack trace", "regression",
                "null", "panic", "code",
            ],
            HypothesisCategory::Configuration => &[
                "config", "flag", "setting", "env", "feature toggle", "parameter", "yaml",
                "secret rotation",
            ],
            HypothesisCategory::ExternalDependency => &[
                "third-party", "vendor", "upstream", "provider", "api key", "payment", "saas",
                "dependency",
            ],
            HypothesisCategory::ClientSide => &[
                "browser", "mobile", "app version", "client", "frontend", "cache", "cdn",
            ],
            HypothesisCategory::Data => &[
                "database", "migration", "schema", "query", "replica", "corrupt", "index", "row",
            ],
            HypothesisCategory::Network => &[
                "dns", "latency", "packet", "timeout", "tls", "certificate", "firewall", "route",
                "region",
            ],
            HypothesisCategory::Security => &[
                "attack", "ddos", "auth", "permission", "token", "breach", "waf", "forbidden",
            ],
            HypothesisCategory::ResourceExhaustion => &[
                "memory", "cpu", "oom", "connection pool", "quota", "rate limit", "thread",
                "saturation", "leak",
            ],
        }
    }

    /// Rule-based statement template used when no reasoning service is
    /// available.
    pub fn template(self, subject: &str) -> String {
        match self {
            HypothesisCategory::Infrastructure => {
                format!("An infrastructure component behind {subject} is unhealthy")
            }
            HypothesisCategory::Code => {
                format!("A recent code change introduced a defect causing {subject}")
            }
            HypothesisCategory::Configuration => {
                format!("A configuration change is causing {subject}")
            }
            HypothesisCategory::ExternalDependency => {
                format!("An external dependency is failing and causing {subject}")
            }
            HypothesisCategory::ClientSide => {
                format!("A client-side change or stale client cache is causing {subject}")
            }
            HypothesisCategory::Data => {
                format!("Bad or migrated data is causing {subject}")
            }
            HypothesisCategory::Network => {
                format!("A network path problem (DNS, TLS, routing) is causing {subject}")
            }
            HypothesisCategory::Security => {
                format!("A security control or hostile traffic is causing {subject}")
            }
            HypothesisCategory::ResourceExhaustion => {
                format!("A saturated resource (memory, CPU, pools, quotas) is causing {subject}")
            }
        }
    }
}

impl fmt::Display for HypothesisCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a hypothesis.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Pending,
    Testing,
    Validated,
    Refuted,
    Retired,
}

impl HypothesisStatus {
    /// Still open for testing and subject to decay.
    pub fn is_active(self) -> bool {
        matches!(self, HypothesisStatus::Pending | HypothesisStatus::Testing)
    }

    /// Settled by evidence one way or the other.
    pub fn is_resolved(self) -> bool {
        matches!(self, HypothesisStatus::Validated | HypothesisStatus::Refuted)
    }
}

/// One point of a hypothesis's confidence trajectory.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ConfidencePoint {
    pub turn: u32,
    pub likelihood: f64,
}

/// A candidate root-cause theory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Hypothesis {
    pub id: String,
    pub statement: String,
    pub category: HypothesisCategory,
    /// Current likelihood in [0, 1].
    pub likelihood: f64,
    pub initial_likelihood: f64,
    pub trajectory: Vec<ConfidencePoint>,
    pub status: HypothesisStatus,
    pub created_turn: u32,
    pub updated_turn: u32,
    /// Ids of evidence records (requests or provided items) supporting it.
    pub supporting_evidence: Vec<String>,
    pub refuting_evidence: Vec<String>,
    pub iterations_without_progress: u32,
    pub last_progress_turn: u32,
    /// Last turn decay was evaluated for this hypothesis.
    pub last_decay_turn: u32,
    pub retirement_reason: Option<String>,
    /// Number of times the hypothesis has been put to a test.
    pub tests_run: u32,
    /// Tests that failed to validate it (inconclusive or refuting).
    pub validation_failures: u32,
}

impl Hypothesis {
    pub fn new(
        id: impl Into<String>,
        statement: impl Into<String>,
        category: HypothesisCategory,
        likelihood: f64,
        turn: u32,
    ) -> Self {
        let likelihood = likelihood.clamp(0.0, 1.0);
        Self {
            id: id.into(),
            statement: statement.into(),
            category,
            likelihood,
            initial_likelihood: likelihood,
            trajectory: vec![ConfidencePoint { turn, likelihood }],
            status: HypothesisStatus::Pending,
            created_turn: turn,
            updated_turn: turn,
            supporting_evidence: Vec::new(),
            refuting_evidence: Vec::new(),
            iterations_without_progress: 0,
            last_progress_turn: turn,
            last_decay_turn: turn,
            retirement_reason: None,
            tests_run: 0,
            validation_failures: 0,
        }
    }

    /// Set the likelihood and append it to the trajectory.
    pub fn set_likelihood(&mut self, likelihood: f64, turn: u32) {
        self.likelihood = likelihood.clamp(0.0, 1.0);
        self.updated_turn = turn;
        match self.trajectory.last_mut() {
            Some(last) if last.turn == turn => last.likelihood = self.likelihood,
            _ => self.trajectory.push(ConfidencePoint {
                turn,
                likelihood: self.likelihood,
            }),
        }
    }

    /// Record that the hypothesis moved this turn.
    pub fn mark_progress(&mut self, turn: u32) {
        self.iterations_without_progress = 0;
        self.last_progress_turn = turn;
        self.updated_turn = turn;
    }

    pub fn is_explicitly_refuted(&self) -> bool {
        !self.refuting_evidence.is_empty()
    }

    /// Tested at least once without being validated or refuted.
    pub fn tested_without_resolution(&self) -> bool {
        self.tests_run > 0 && !self.status.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_has_nine_distinct_names() {
        let mut names: Vec<&str> = HypothesisCategory::ALL.iter().map(|c| c.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn set_likelihood_clamps_and_collapses_same_turn() {
        let mut h = Hypothesis::new("H1", "db is slow", HypothesisCategory::Data, 0.4, 1);
        h.set_likelihood(1.4, 2);
        h.set_likelihood(0.6, 2);
        assert_eq!(h.likelihood, 0.6);
        assert_eq!(h.trajectory.len(), 2);
        assert_eq!(h.trajectory[1], ConfidencePoint { turn: 2, likelihood: 0.6 });
    }

    #[test]
    fn status_predicates() {
        assert!(HypothesisStatus::Testing.is_active());
        assert!(!HypothesisStatus::Retired.is_active());
        assert!(HypothesisStatus::Refuted.is_resolved());
        assert!(!HypothesisStatus::Retired.is_resolved());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&HypothesisCategory::ResourceExhaustion).unwrap();
        assert_eq!(json, "\"resource_exhaustion\"");
    }
}
