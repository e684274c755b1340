//! In-process [`LeadStore`] used by tests and local runs without Postgres.
//!
//! Run transactions stage their writes and apply them under one lock on commit,
//! which gives the same all-or-nothing behavior as the Postgres store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::compliance::redact;
use crate::db_storage::{LeadStore, RunTransaction};
use crate::errors::AppError;
use crate::models::{
    EnrichmentRecord, Lead, LeadId, LeadStatus, LeadUpdate, NewLead, PipelineAnnotations,
};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: LeadId,
    leads: HashMap<LeadId, Lead>,
    enrichment: HashMap<LeadId, EnrichmentRecord>,
    commits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLeadStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of enrichment records held across all leads.
    pub fn enrichment_count(&self) -> usize {
        self.state().enrichment.len()
    }

    /// Number of run transactions committed so far.
    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    pub fn lead(&self, lead_id: LeadId) -> Option<Lead> {
        self.state().leads.get(&lead_id).cloned()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn create_lead(&self, lead: NewLead) -> Result<Lead, AppError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let record = Lead {
            id,
            organization_id: lead.organization_id,
            first_name: lead.first_name,
            last_name: lead.last_name,
            email: lead.email,
            phone: lead.phone,
            address: lead.address,
            city: lead.city,
            state: lead.state,
            zip_code: lead.zip_code,
            status: lead.status.unwrap_or(LeadStatus::Pending),
            lead_score: 0,
            property_value: lead.property_value,
            household_income: lead.household_income,
            social_profile_url: None,
            source: lead.source,
            annotations: PipelineAnnotations::default(),
            created_at: Utc::now(),
            updated_at: None,
        };
        state.leads.insert(id, record.clone());
        Ok(record)
    }

    async fn fetch_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, AppError> {
        Ok(self.state().leads.get(&lead_id).cloned())
    }

    async fn fetch_enrichment(
        &self,
        lead_id: LeadId,
    ) -> Result<Option<EnrichmentRecord>, AppError> {
        Ok(self.state().enrichment.get(&lead_id).cloned())
    }

    async fn begin_run(&self, lead_id: LeadId) -> Result<Box<dyn RunTransaction>, AppError> {
        Ok(Box::new(MemoryRunTransaction {
            lead_id,
            store: self.clone(),
            staged_enrichment: None,
            staged_update: None,
        }))
    }

    async fn anonymize(&self, lead_id: LeadId) -> Result<Option<Lead>, AppError> {
        let mut state = self.state();
        let Some(lead) = state.leads.get_mut(&lead_id) else {
            return Ok(None);
        };
        redact(lead);
        lead.updated_at = Some(Utc::now());
        let lead = lead.clone();
        state.enrichment.remove(&lead_id);
        Ok(Some(lead))
    }
}

struct MemoryRunTransaction {
    lead_id: LeadId,
    store: InMemoryLeadStore,
    staged_enrichment: Option<EnrichmentRecord>,
    staged_update: Option<LeadUpdate>,
}

#[async_trait]
impl RunTransaction for MemoryRunTransaction {
    async fn upsert_enrichment(&mut self, record: &EnrichmentRecord) -> Result<(), AppError> {
        self.staged_enrichment = Some(record.clone());
        Ok(())
    }

    async fn enrichment(&mut self) -> Result<Option<EnrichmentRecord>, AppError> {
        if let Some(staged) = &self.staged_enrichment {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.state().enrichment.get(&self.lead_id).cloned())
    }

    async fn lock_lead(&mut self) -> Result<Option<Lead>, AppError> {
        Ok(self.store.state().leads.get(&self.lead_id).cloned())
    }

    async fn update_lead(&mut self, update: &LeadUpdate) -> Result<(), AppError> {
        self.staged_update = Some(update.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryRunTransaction {
            lead_id,
            store,
            staged_enrichment,
            staged_update,
        } = *self;
        let mut state = store.state();
        match state.leads.get(&lead_id) {
            None => return Err(AppError::LeadNotFound(lead_id)),
            Some(lead) if lead.status == LeadStatus::Anonymized => {
                return Err(AppError::LeadAnonymized(lead_id));
            }
            Some(_) => {}
        }

        if let Some(record) = staged_enrichment {
            state.enrichment.insert(lead_id, record);
        }
        if let Some(update) = staged_update {
            if let Some(lead) = state.leads.get_mut(&lead_id) {
                lead.status = update.status;
                lead.lead_score = update.lead_score.clamp(0, 100);
                lead.property_value = update.property_value;
                lead.social_profile_url = update.social_profile_url;
                lead.annotations = update.annotations;
                lead.updated_at = Some(Utc::now());
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
