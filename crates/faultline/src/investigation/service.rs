//! Store-backed investigation service.
//!
//! [`InvestigationService`] addresses investigations only by id. Each turn
//! is load, process, save: the updated record is written only after the
//! engine returned successfully, so a failed or abandoned turn leaves the
//! stored record exactly as it was.

use chrono::Utc;
use futures::future::join_all;
use tracing::info;

use crate::error::InvestigationError;
use crate::model::{InvestigationState, InvestigationStatus};
use crate::store::{InvestigationManifest, InvestigationStore, RetentionHints};

use super::directives::ProgressSummary;
use super::engine::{Engine, TurnInput, TurnOutcome};

pub struct InvestigationService {
    engine: Engine,
    store: Box<dyn InvestigationStore>,
    retention: RetentionHints,
}

impl InvestigationService {
    pub fn new(engine: Engine, store: impl InvestigationStore + 'static) -> Self {
        Self {
            engine,
            store: Box::new(store),
            retention: RetentionHints::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionHints) -> Self {
        self.retention = retention;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &dyn InvestigationStore {
        self.store.as_ref()
    }

    /// Start a consultant-mode record for a conversation and persist it.
    pub fn open_case(&self, case_id: &str) -> Result<InvestigationState, InvestigationError> {
        let state = InvestigationState::consultant(case_id);
        self.store.save(&state, &self.retention)?;
        info!(id = %state.id, case = case_id, "case opened");
        Ok(state)
    }

    /// Load a record or fail with [`InvestigationError::NotFound`].
    pub fn load(&self, id: &str) -> Result<InvestigationState, InvestigationError> {
        self.store
            .load(id)?
            .ok_or_else(|| InvestigationError::NotFound(id.to_string()))
    }

    /// Run one turn for the investigation stored under `id`.
    ///
    /// On engagement the fresh investigation is saved under its own id and
    /// the consultant record is archived as superseded. Callers continue
    /// with `outcome.state.id`.
    pub async fn submit(
        &self,
        id: &str,
        input: &TurnInput,
    ) -> Result<TurnOutcome, InvestigationError> {
        let state = self.load(id)?;
        let outcome = self.engine.process_turn(&state, input).await?;

        self.store.save(&outcome.state, &self.retention)?;
        if let Some(old) = &outcome.superseded {
            self.store.save(old, &self.retention)?;
            info!(from = %old.id, to = %outcome.state.id, "consultant record superseded");
        }
        if outcome.state.status == InvestigationStatus::Closed && state.status != outcome.state.status
        {
            info!(id = %outcome.state.id, turn = outcome.state.turn, "investigation archived");
        }
        Ok(outcome)
    }

    /// Run turns for several investigations concurrently. Results come back
    /// in input order; one failure does not affect the others.
    pub async fn submit_many(
        &self,
        turns: &[(String, TurnInput)],
    ) -> Vec<Result<TurnOutcome, InvestigationError>> {
        join_all(turns.iter().map(|(id, input)| self.submit(id, input))).await
    }

    pub fn progress(&self, id: &str) -> Result<ProgressSummary, InvestigationError> {
        Ok(self.engine.progress_view(&self.load(id)?))
    }

    pub fn list(&self) -> Result<Vec<InvestigationManifest>, InvestigationError> {
        self.store.list()
    }

    /// Expire summarised tiers of closed investigations.
    pub fn prune(&self) -> Result<usize, InvestigationError> {
        let pruned = self.store.prune_expired(Utc::now())?;
        if pruned > 0 {
            info!(pruned, "expired memory tiers pruned");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::EngineConfig;
    use crate::model::{EngagementMode, Phase};
    use crate::store::InMemoryStore;

    fn service() -> InvestigationService {
        InvestigationService::new(Engine::offline(EngineConfig::offline()), InMemoryStore::new())
    }

    #[tokio::test]
    async fn engagement_archives_the_consultant_record() {
        let svc = service();
        let case = svc.open_case("case-1").unwrap();
        let outcome = svc
            .submit(&case.id, &TurnInput::message("API returning 500 errors for all EU users"))
            .await
            .unwrap();

        assert_ne!(outcome.state.id, case.id);
        assert_eq!(outcome.state.mode, EngagementMode::LeadInvestigator);
        let old = svc.load(&case.id).unwrap();
        assert_eq!(old.status, InvestigationStatus::Superseded);
        assert_eq!(svc.load(&outcome.state.id).unwrap().phase, Phase::BlastRadius);
        assert_eq!(svc.list().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let err = service()
            .submit("inv-missing", &TurnInput::message("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvestigationError::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_request_id_keeps_the_content() {
        let svc = service();
        let case = svc.open_case("case-2").unwrap();
        let lead = svc
            .submit(&case.id, &TurnInput::message("API returning 500 errors for all EU users"))
            .await
            .unwrap()
            .state;

        let stale = TurnInput::message("here")
            .with_evidence(crate::model::EvidenceSubmission::answering("E99", "pool at 100%"));
        let outcome = svc.submit(&lead.id, &stale).await.unwrap();
        assert!(
            outcome
                .directives
                .degraded
                .iter()
                .any(|d| d.capability == "evidence request link")
        );

        let stored = svc.load(&lead.id).unwrap();
        assert_eq!(stored.turn, lead.turn + 1);
        assert_eq!(stored.evidence.provided.len(), lead.evidence.provided.len() + 1);
        let kept = stored.evidence.provided.last().unwrap();
        assert_eq!(kept.content, "pool at 100%");
        assert!(kept.request_id.is_none());
    }

    #[tokio::test]
    async fn concurrent_turns_stay_isolated() {
        let svc = service();
        let a = svc.open_case("a").unwrap();
        let b = svc.open_case("b").unwrap();
        let results = svc
            .submit_many(&[
                (a.id.clone(), TurnInput::message("checkout errors for all users since 10:00")),
                (b.id.clone(), TurnInput::message("thanks, that's all")),
            ])
            .await;

        let a_out = results[0].as_ref().unwrap();
        let b_out = results[1].as_ref().unwrap();
        assert!(a_out.state.is_lead());
        assert!(!b_out.state.is_lead());
        assert_eq!(svc.load(&b.id).unwrap().turn, 1);
        assert!(svc.progress(&a_out.state.id).is_ok());
    }
}
