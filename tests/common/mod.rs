//! Deterministic fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use mos_lead_engine::compliance::{ComplianceGate, DncRegistry, PatternDncRegistry};
use mos_lead_engine::db_storage::LeadStore;
use mos_lead_engine::dispatch::{CallReceipt, CallRequest, Dialer, DispatchService};
use mos_lead_engine::enrichment::{EnrichmentProvider, EnrichmentRequest};
use mos_lead_engine::errors::AppError;
use mos_lead_engine::memory_store::InMemoryLeadStore;
use mos_lead_engine::models::{
    EnrichmentBundle, IdentityAttrs, Lead, LeadId, LeadStatus, NewLead, PropertyAttrs,
};
use mos_lead_engine::pipeline::LeadPipeline;
use mos_lead_engine::scoring::ScoringPolicy;

pub const SAFE_PHONE: &str = "415-555-0123";
pub const DNC_PHONE: &str = "555-123-0000";

pub fn hot_bundle() -> EnrichmentBundle {
    EnrichmentBundle {
        property: PropertyAttrs {
            sqft: Some(3200),
            year_built: Some(1992),
            estimated_value: Some(1_150_000),
            ..Default::default()
        },
        identity: IdentityAttrs {
            job_title: Some("Owner".to_string()),
            social_profile_url: Some("https://social.example.com/jane".to_string()),
            social_quality_score: Some(90.0),
            ..Default::default()
        },
        notes: Vec::new(),
    }
}

pub fn verified_lead(phone: &str) -> NewLead {
    NewLead {
        organization_id: 1,
        first_name: Some("Jane".to_string()),
        last_name: Some("Doe".to_string()),
        email: Some("jane.doe@example.com".to_string()),
        phone: Some(phone.to_string()),
        address: Some("12 Market St".to_string()),
        zip_code: Some("94110".to_string()),
        status: Some(LeadStatus::Verified),
        property_value: Some(1_200_000.0),
        household_income: Some(200_000.0),
        source: Some("web".to_string()),
        ..Default::default()
    }
}

pub async fn create(store: &InMemoryLeadStore, lead: NewLead) -> Lead {
    store.create_lead(lead).await.unwrap()
}

/// Returns a fixed bundle and counts calls.
pub struct FakeEnrichment {
    bundle: EnrichmentBundle,
    pub calls: AtomicUsize,
}

impl FakeEnrichment {
    pub fn new(bundle: EnrichmentBundle) -> Self {
        Self {
            bundle,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentProvider for FakeEnrichment {
    async fn enrich(&self, _: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bundle.clone())
    }
}

/// Returns the queued bundles in order, repeating the last one.
pub struct SequencedEnrichment {
    bundles: Mutex<VecDeque<EnrichmentBundle>>,
}

impl SequencedEnrichment {
    pub fn new(bundles: Vec<EnrichmentBundle>) -> Self {
        Self {
            bundles: Mutex::new(bundles.into()),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for SequencedEnrichment {
    async fn enrich(&self, _: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        let mut bundles = self.bundles.lock().unwrap();
        let bundle = if bundles.len() > 1 {
            bundles.pop_front()
        } else {
            bundles.front().cloned()
        };
        bundle.ok_or_else(|| AppError::ProviderUnavailable("no bundle queued".into()))
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct FlakyEnrichment {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyEnrichment {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for FlakyEnrichment {
    async fn enrich(&self, _: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(AppError::ProviderUnavailable("enrichment offline".into()));
        }
        Ok(hot_bundle())
    }
}

/// Blocks until released.
pub struct BlockingEnrichment {
    pub release: Notify,
}

impl BlockingEnrichment {
    pub fn new() -> Self {
        Self {
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for BlockingEnrichment {
    async fn enrich(&self, _: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        self.release.notified().await;
        Ok(hot_bundle())
    }
}

/// Anonymizes the lead behind the orchestrator's back while "enriching".
pub struct AnonymizingEnrichment {
    pub store: InMemoryLeadStore,
    pub lead_id: LeadId,
}

#[async_trait]
impl EnrichmentProvider for AnonymizingEnrichment {
    async fn enrich(&self, _: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        self.store.anonymize(self.lead_id).await?;
        Ok(hot_bundle())
    }
}

#[derive(Default)]
pub struct CountingDialer {
    pub calls: AtomicUsize,
}

impl CountingDialer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn place_call(&self, request: &CallRequest) -> Result<CallReceipt, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CallReceipt {
            call_sid: format!("CA-{}", request.lead_id),
            status: "completed".to_string(),
            recording_url: None,
        })
    }
}

pub struct FailingDialer;

#[async_trait]
impl Dialer for FailingDialer {
    async fn place_call(&self, _: &CallRequest) -> Result<CallReceipt, AppError> {
        Err(AppError::ProviderUnavailable("dialer offline".into()))
    }
}

pub struct UnreachableRegistry;

#[async_trait]
impl DncRegistry for UnreachableRegistry {
    async fn is_listed(&self, _: &str) -> Result<bool, AppError> {
        Err(AppError::ProviderUnavailable("registry unreachable".into()))
    }
}

/// Lists every number until `set_listed(false)`. Counts lookups.
pub struct ToggleRegistry {
    listed: AtomicBool,
    lookups: AtomicUsize,
}

impl ToggleRegistry {
    pub fn new(listed: bool) -> Self {
        Self {
            listed: AtomicBool::new(listed),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_listed(&self, listed: bool) {
        self.listed.store(listed, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DncRegistry for ToggleRegistry {
    async fn is_listed(&self, _: &str) -> Result<bool, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.listed.load(Ordering::SeqCst))
    }
}

pub fn pipeline(
    store: &InMemoryLeadStore,
    enrichment: Arc<dyn EnrichmentProvider>,
    registry: Arc<dyn DncRegistry>,
    dialer: Arc<dyn Dialer>,
) -> LeadPipeline {
    pipeline_with_policy(store, enrichment, registry, dialer, ScoringPolicy::default())
}

pub fn pipeline_with_policy(
    store: &InMemoryLeadStore,
    enrichment: Arc<dyn EnrichmentProvider>,
    registry: Arc<dyn DncRegistry>,
    dialer: Arc<dyn Dialer>,
    scoring: ScoringPolicy,
) -> LeadPipeline {
    let timeout = Duration::from_secs(2);
    let dispatch = DispatchService::new(ComplianceGate::new(registry), dialer, timeout);
    LeadPipeline::new(Arc::new(store.clone()), enrichment, scoring, dispatch, timeout)
}

pub fn pattern_registry() -> Arc<dyn DncRegistry> {
    Arc::new(PatternDncRegistry::default())
}
