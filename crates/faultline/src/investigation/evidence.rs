//! Evidence Tracker operations.
//!
//! Requests start `Pending`. Supplied content raises a request's
//! completeness (never lowers it); at 1.0 the request is `Complete`, below it
//! `Partial`. Content arriving for a `Blocked` request unblocks it. Coverage
//! is the completeness-weighted share of critical requests that are
//! `Complete` or `Partial`.

use crate::error::InvestigationError;
use crate::model::{
    EvidenceCategory, EvidenceProvided, EvidenceRequest, EvidenceStatus, EvidenceSubmission,
    EvidenceTracker, OodaStep, Priority,
};

/// Parameters of a new evidence request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvidenceRequest {
    pub category: EvidenceCategory,
    pub label: String,
    pub description: String,
    pub guidance: String,
    pub priority: Priority,
    pub originating_step: OodaStep,
    pub hypothesis_id: Option<String>,
}

impl NewEvidenceRequest {
    pub fn new(
        category: EvidenceCategory,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            label: label.into(),
            description: description.into(),
            guidance: String::new(),
            priority: Priority::Important,
            originating_step: OodaStep::Observe,
            hypothesis_id: None,
        }
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = guidance.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn from_step(mut self, step: OodaStep) -> Self {
        self.originating_step = step;
        self
    }

    pub fn for_hypothesis(mut self, hypothesis_id: impl Into<String>) -> Self {
        self.hypothesis_id = Some(hypothesis_id.into());
        self
    }
}

impl EvidenceTracker {
    /// Register a request, or return the open request that already asks for
    /// the same thing.
    pub fn request_evidence(&mut self, new: NewEvidenceRequest, turn: u32) -> EvidenceRequest {
        if let Some(existing) = self.requests.iter().find(|r| {
            r.status.is_open()
                && r.category == new.category
                && r.label == new.label
                && r.hypothesis_id == new.hypothesis_id
        }) {
            return existing.clone();
        }
        self.next_request += 1;
        let request = EvidenceRequest {
            id: format!("E{}", self.next_request),
            label: new.label,
            description: new.description,
            category: new.category,
            guidance: new.guidance,
            status: EvidenceStatus::Pending,
            completeness: 0.0,
            priority: new.priority,
            originating_step: new.originating_step,
            hypothesis_id: new.hypothesis_id,
            created_turn: turn,
            blocked_reason: None,
        };
        self.requests.push(request.clone());
        request
    }

    /// Record supplied content and update the linked request, if any.
    pub fn record_provided(
        &mut self,
        submission: EvidenceSubmission,
        turn: u32,
    ) -> Result<EvidenceProvided, InvestigationError> {
        let completeness = if submission.completeness.is_finite() {
            submission.completeness.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut category = submission.category;

        if let Some(request_id) = &submission.request_id {
            let request = self
                .request_mut(request_id)
                .ok_or_else(|| InvestigationError::UnknownEvidenceRequest(request_id.clone()))?;
            category = category.or(Some(request.category));
            if request.status != EvidenceStatus::Obsolete {
                request.completeness = (request.completeness + completeness).min(1.0);
                request.blocked_reason = None;
                request.status = if request.completeness >= 1.0 {
                    EvidenceStatus::Complete
                } else {
                    EvidenceStatus::Partial
                };
            }
        }

        self.next_provided += 1;
        let provided = EvidenceProvided {
            id: format!("P{}", self.next_provided),
            request_id: submission.request_id,
            content: submission.content,
            category,
            completeness,
            received_turn: turn,
            bearings: submission.bearings,
            source: submission.source,
        };
        self.provided.push(provided.clone());
        self.compute_coverage();
        Ok(provided)
    }

    /// Mark a request as impossible to obtain for now.
    pub fn mark_blocked(&mut self, id: &str, reason: &str) -> Result<(), InvestigationError> {
        let request = self
            .request_mut(id)
            .ok_or_else(|| InvestigationError::UnknownEvidenceRequest(id.to_string()))?;
        match request.status {
            EvidenceStatus::Complete | EvidenceStatus::Obsolete => {
                Err(InvestigationError::InvalidEvidenceTransition {
                    id: id.to_string(),
                    reason: format!("cannot block a {:?} request", request.status),
                })
            }
            _ => {
                request.status = EvidenceStatus::Blocked;
                request.blocked_reason = Some(reason.to_string());
                self.compute_coverage();
                Ok(())
            }
        }
    }

    /// Mark a request as no longer needed. Complete requests keep their
    /// status.
    pub fn mark_obsolete(&mut self, id: &str) -> Result<(), InvestigationError> {
        let request = self
            .request_mut(id)
            .ok_or_else(|| InvestigationError::UnknownEvidenceRequest(id.to_string()))?;
        if request.status != EvidenceStatus::Complete {
            request.status = EvidenceStatus::Obsolete;
        }
        self.compute_coverage();
        Ok(())
    }

    /// Obsolete every unfinished request linked to `hypothesis_id`.
    pub fn obsolete_for_hypothesis(&mut self, hypothesis_id: &str) -> Vec<String> {
        let mut ids = Vec::new();
        for request in &mut self.requests {
            if request.hypothesis_id.as_deref() == Some(hypothesis_id)
                && matches!(
                    request.status,
                    EvidenceStatus::Pending | EvidenceStatus::Partial | EvidenceStatus::Blocked
                )
            {
                request.status = EvidenceStatus::Obsolete;
                ids.push(request.id.clone());
            }
        }
        if !ids.is_empty() {
            self.compute_coverage();
        }
        ids
    }

    /// Recompute and cache the coverage score.
    pub fn compute_coverage(&mut self) -> f64 {
        self.coverage = self.coverage_score();
        self.coverage
    }

    /// Coverage without touching the cache.
    pub fn coverage_score(&self) -> f64 {
        let critical: Vec<&EvidenceRequest> = self
            .requests
            .iter()
            .filter(|r| r.priority == Priority::Critical)
            .collect();
        if critical.is_empty() {
            return 0.0;
        }
        // An obsolete request keeps what it earned before it was retired,
        // so coverage never falls when a hypothesis is refuted.
        let satisfied: f64 = critical
            .iter()
            .map(|r| match r.status {
                EvidenceStatus::Complete => 1.0,
                EvidenceStatus::Partial | EvidenceStatus::Obsolete => r.completeness,
                EvidenceStatus::Pending | EvidenceStatus::Blocked => 0.0,
            })
            .sum();
        (satisfied / critical.len() as f64).clamp(0.0, 1.0)
    }

    /// Blocked requests of critical priority.
    pub fn blocked_critical(&self) -> impl Iterator<Item = &EvidenceRequest> {
        self.blocked_requests()
            .filter(|r| r.priority == Priority::Critical)
    }

    /// Whether any evidence of one of `categories` has been supplied.
    pub fn has_provided(&self, categories: &[EvidenceCategory]) -> bool {
        self.provided
            .iter()
            .any(|p| p.category.is_some_and(|c| categories.contains(&c)))
    }
}

/// Other ways to obtain what a blocked request asked for.
pub fn alternative_suggestions(request: &EvidenceRequest) -> Vec<String> {
    let suggestions: &[&str] = match request.category {
        EvidenceCategory::Symptoms => &[
            "Paste the error text a user or client sees instead of server logs",
            "Reproduce the failure with curl or a browser and share the response",
        ],
        EvidenceCategory::Timeline => &[
            "Check when the first support ticket or alert fired",
            "Look at the earliest anomaly on any dashboard you can reach",
        ],
        EvidenceCategory::Changes => &[
            "Ask the owning team which deploys or flag flips happened that day",
            "Check the CI/CD history or the repository commit log",
        ],
        EvidenceCategory::Configuration => &[
            "Compare the running config with the version in source control",
            "Ask someone with access to export the relevant settings",
        ],
        EvidenceCategory::Scope => &[
            "Sample a handful of failing and succeeding users and compare them",
            "Use support tickets to estimate which regions or tenants are affected",
        ],
        EvidenceCategory::Metrics => &[
            "Use a coarser dashboard or the cloud provider console",
            "Share a screenshot of any graph covering the incident window",
        ],
        EvidenceCategory::Environment => &[
            "Describe the environment from deployment manifests",
            "Ask an affected user for client version, OS and network details",
        ],
    };
    suggestions.iter().map(|s| s.to_string()).collect()
}
