//! Lead pipeline orchestrator.
//!
//! One run takes a verified lead through:
//! 1. Enrichment via the injected provider (outside any transaction)
//! 2. Enrichment upsert and read-back inside the run transaction
//! 3. Scoring against the persisted record
//! 4. Row lock and anonymization check
//! 5. Operator dispatch for hot leads, gated by DNC compliance
//! 6. Lead update and commit
//!
//! Any failure from step 2 on rolls the whole run back.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::db_storage::{LeadStore, RunTransaction};
use crate::dispatch::DispatchService;
use crate::enrichment::{build_cheat_sheet, EnrichmentProvider, EnrichmentRequest};
use crate::errors::AppError;
use crate::locks::LeadLocks;
use crate::models::{
    DispatchRecord, DispatchStatus, EnrichmentBundle, EnrichmentRecord, Lead, LeadId, LeadStatus,
    LeadUpdate, PriorityTag, RunOutcome, ScoreResult, SkipReason,
};
use crate::scoring::{ScoringInput, ScoringPolicy};

pub struct LeadPipeline {
    store: Arc<dyn LeadStore>,
    enrichment: Arc<dyn EnrichmentProvider>,
    scoring: ScoringPolicy,
    dispatch: DispatchService,
    locks: LeadLocks,
    provider_timeout: Duration,
}

/// What a run wrote, before commit.
struct StagedRun {
    update: LeadUpdate,
    score: ScoreResult,
    dispatch: Option<DispatchStatus>,
}

impl LeadPipeline {
    pub fn new(
        store: Arc<dyn LeadStore>,
        enrichment: Arc<dyn EnrichmentProvider>,
        scoring: ScoringPolicy,
        dispatch: DispatchService,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            enrichment,
            scoring,
            dispatch,
            locks: LeadLocks::new(),
            provider_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    pub fn dispatch(&self) -> &DispatchService {
        &self.dispatch
    }

    /// Persisted status, or `Enriching` while a pipeline run holds the lead.
    /// An anonymization waiting on or holding the lock does not count.
    pub async fn observed_status(&self, lead_id: LeadId) -> Result<LeadStatus, AppError> {
        let lead = self
            .store
            .fetch_lead(lead_id)
            .await?
            .ok_or(AppError::LeadNotFound(lead_id))?;
        if self.locks.is_running(lead_id) && !lead.status.is_terminal() {
            return Ok(LeadStatus::Enriching);
        }
        Ok(lead.status)
    }

    /// Runs the pipeline for one lead. Never panics or propagates errors: every
    /// failure ends up in the returned outcome.
    pub async fn run_pipeline(&self, lead_id: LeadId) -> RunOutcome {
        let Some(_guard) = self.locks.try_acquire_run(lead_id) else {
            tracing::warn!("Pipeline already running for lead {}, skipping trigger", lead_id);
            return RunOutcome::skipped(
                lead_id,
                SkipReason::ConcurrentRunConflict,
                Some(LeadStatus::Enriching),
            );
        };

        let lead = match self.store.fetch_lead(lead_id).await {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                tracing::warn!("Lead {} not found, discarding pipeline run", lead_id);
                return RunOutcome::skipped(lead_id, SkipReason::LeadNotFound, None);
            }
            Err(e) => {
                tracing::error!("Failed to load lead {}: {}", lead_id, e);
                return RunOutcome::failed(lead_id, None, &e);
            }
        };

        match lead.status {
            LeadStatus::Pending => {
                tracing::info!("Lead {} is not verified yet, skipping", lead_id);
                return RunOutcome::skipped(lead_id, SkipReason::NotVerified, Some(lead.status));
            }
            LeadStatus::Anonymized => {
                tracing::info!("Lead {} is anonymized, skipping", lead_id);
                return RunOutcome::skipped(lead_id, SkipReason::Anonymized, Some(lead.status));
            }
            _ => {}
        }

        tracing::info!("Starting enrichment for lead {} (status {})", lead_id, lead.status);
        match self.execute(&lead).await {
            Ok(outcome) => outcome,
            Err(AppError::LeadAnonymized(_)) => {
                tracing::warn!(
                    "Lead {} was anonymized during the run, results discarded",
                    lead_id
                );
                RunOutcome::skipped(lead_id, SkipReason::Anonymized, Some(LeadStatus::Anonymized))
            }
            Err(e) => {
                tracing::error!("Pipeline run for lead {} failed: {}", lead_id, e);
                RunOutcome::failed(lead_id, Some(lead.status), &e)
            }
        }
    }

    async fn execute(&self, lead: &Lead) -> Result<RunOutcome, AppError> {
        let request = EnrichmentRequest::from_lead(lead);
        tracing::info!("Step 1: Fetching enrichment for lead {}", lead.id);
        let bundle =
            tokio::time::timeout(self.provider_timeout, self.enrichment.enrich(&request)).await??;

        let mut tx = self.store.begin_run(lead.id).await?;
        let staged = match self.stage(lead, bundle, tx.as_mut()).await {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(
                        "Rollback for lead {} failed: {}",
                        lead.id,
                        rollback_err
                    );
                }
                return Err(e);
            }
        };

        tx.commit().await?;
        tracing::info!(
            "Lead {} fully processed. Final status: {}, score {} ({})",
            lead.id,
            staged.update.status,
            staged.score.score,
            staged.score.priority_tag
        );

        Ok(RunOutcome::succeeded(
            lead.id,
            staged.update.status,
            staged.score,
            staged.dispatch,
        ))
    }

    async fn stage(
        &self,
        lead: &Lead,
        bundle: EnrichmentBundle,
        tx: &mut dyn RunTransaction,
    ) -> Result<StagedRun, AppError> {
        tracing::info!("Step 2: Persisting enrichment for lead {}", lead.id);
        let record = EnrichmentRecord {
            lead_id: lead.id,
            property: bundle.property,
            identity: bundle.identity,
            enriched_at: Utc::now(),
        };
        tx.upsert_enrichment(&record).await?;
        let persisted = tx.enrichment().await?.ok_or_else(|| {
            AppError::InternalError(format!("Enrichment for lead {} vanished after upsert", lead.id))
        })?;

        tracing::info!("Step 3: Scoring lead {}", lead.id);
        let score = self
            .scoring
            .engine_for(lead.organization_id)
            .score(&ScoringInput::from_records(lead, Some(&persisted)))?;

        let current = tx
            .lock_lead()
            .await?
            .ok_or(AppError::LeadNotFound(lead.id))?;
        if current.status == LeadStatus::Anonymized {
            return Err(AppError::LeadAnonymized(lead.id));
        }

        let mut annotations = current.annotations.clone();
        annotations.version += 1;
        annotations.cheat_sheet = if bundle.notes.is_empty() {
            build_cheat_sheet(&persisted.property, &persisted.identity)
        } else {
            bundle.notes
        };
        annotations.dossier = Some(score.dossier.clone());
        annotations.priority_tag = Some(score.priority_tag);

        let mut target = LeadStatus::Enriched;
        let mut dispatch = None;
        if score.priority_tag == PriorityTag::HotLead {
            if let Some(reference) = annotations.dispatch_reference() {
                tracing::info!(
                    "Lead {} already dispatched (reference {}), not calling again",
                    lead.id,
                    reference
                );
            } else {
                tracing::info!(
                    "Step 4: HOT LEAD DETECTED ({})! Notifying operator for lead {}",
                    score.score,
                    lead.id
                );
                let outcome = self
                    .dispatch
                    .notify_operator(&current.contact(), score.score)
                    .await?;
                if outcome.status == DispatchStatus::Completed {
                    target = LeadStatus::Contacted;
                } else {
                    tracing::info!("Dispatch for lead {} blocked by DNC policy", lead.id);
                }
                dispatch = Some(outcome.status);
                annotations.dispatch = Some(DispatchRecord {
                    reference_id: outcome.reference_id,
                    status: outcome.status,
                    recording_url: outcome.recording_url,
                    attempted_at: Utc::now(),
                });
            }
        }

        // The estimate lives on the enrichment record; the lead column keeps the
        // intake value so a refresh run always scores the latest estimate.
        let update = LeadUpdate {
            status: current.status.advance_to(target),
            lead_score: score.score,
            property_value: current.property_value,
            social_profile_url: persisted
                .identity
                .social_profile_url
                .clone()
                .or(current.social_profile_url.clone()),
            annotations,
        };
        tx.update_lead(&update).await?;

        Ok(StagedRun {
            update,
            score,
            dispatch,
        })
    }

    /// Data-privacy entry point. Waits for any in-flight run on the lead.
    pub async fn anonymize(&self, lead_id: LeadId) -> Result<Lead, AppError> {
        let _guard = self.locks.acquire(lead_id).await;
        let lead = self
            .store
            .anonymize(lead_id)
            .await?
            .ok_or(AppError::LeadNotFound(lead_id))?;
        tracing::info!("Lead {} anonymized per request", lead_id);
        Ok(lead)
    }
}
