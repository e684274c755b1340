//! Do-not-call gate and PII redaction.
//!
//! The gate fails closed: a number is only callable when a registry positively
//! says it is not listed. Registry errors, open circuits and numbers that do not
//! normalize all count as unsafe.

use async_trait::async_trait;
use failsafe::CircuitBreaker;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::{create_provider_circuit_breaker, guarded};
use crate::errors::AppError;
use crate::models::{Lead, LeadStatus, PipelineAnnotations};

/// Reduces a raw phone number to its national digits.
///
/// Returns `None` when fewer than 7 digits remain. An 11-digit number with a
/// leading `1` country code is reduced to 10 digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let national = if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    };
    if national.len() < 7 {
        None
    } else {
        Some(national)
    }
}

/// A source of truth for do-not-call listings.
#[async_trait]
pub trait DncRegistry: Send + Sync {
    /// `Ok(true)` when the normalized number is listed.
    async fn is_listed(&self, national_number: &str) -> Result<bool, AppError>;
}

/// Rule-based registry: blocked prefixes, suffixes and explicit numbers.
#[derive(Debug, Clone)]
pub struct PatternDncRegistry {
    blocked_prefixes: Vec<String>,
    blocked_suffixes: Vec<String>,
    blocked_numbers: HashSet<String>,
}

impl Default for PatternDncRegistry {
    fn default() -> Self {
        Self::new(vec!["999".to_string()], vec!["0000".to_string()])
    }
}

impl PatternDncRegistry {
    pub fn new(blocked_prefixes: Vec<String>, blocked_suffixes: Vec<String>) -> Self {
        Self {
            blocked_prefixes,
            blocked_suffixes,
            blocked_numbers: HashSet::new(),
        }
    }

    pub fn with_numbers<I, S>(mut self, numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked_numbers
            .extend(numbers.into_iter().filter_map(|n| normalize_phone(n.as_ref())));
        self
    }
}

#[async_trait]
impl DncRegistry for PatternDncRegistry {
    async fn is_listed(&self, national_number: &str) -> Result<bool, AppError> {
        Ok(self.blocked_numbers.contains(national_number)
            || self
                .blocked_prefixes
                .iter()
                .any(|p| national_number.starts_with(p.as_str()))
            || self
                .blocked_suffixes
                .iter()
                .any(|s| national_number.ends_with(s.as_str())))
    }
}

#[derive(Debug, Deserialize)]
struct RegistryLookup {
    listed: bool,
}

/// Remote registry reached over HTTP: `GET {base}/v1/dnc/{number}` →
/// `{"listed": bool}`.
pub struct HttpDncRegistry<B> {
    client: reqwest::Client,
    base_url: String,
    breaker: B,
}

impl HttpDncRegistry<()> {
    pub fn new(
        base_url: String,
        timeout: Duration,
    ) -> Result<HttpDncRegistry<impl CircuitBreaker + Send + Sync + 'static>, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create DNC registry client: {}", e))
            })?;

        Ok(HttpDncRegistry {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker: create_provider_circuit_breaker(),
        })
    }
}

impl<B> HttpDncRegistry<B> {
    async fn lookup(&self, national_number: &str) -> Result<bool, AppError> {
        let url = format!("{}/v1/dnc/{}", self.base_url, national_number);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("DNC registry request failed: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::ProviderUnavailable(format!(
                "DNC registry returned {}",
                response.status()
            )));
        }

        let lookup: RegistryLookup = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Failed to parse DNC registry response: {}", e))
        })?;
        Ok(lookup.listed)
    }
}

#[async_trait]
impl<B> DncRegistry for HttpDncRegistry<B>
where
    B: CircuitBreaker + Send + Sync,
{
    async fn is_listed(&self, national_number: &str) -> Result<bool, AppError> {
        guarded(&self.breaker, "dnc_registry", self.lookup(national_number)).await
    }
}

/// Decides whether a number may be called right now.
#[derive(Clone)]
pub struct ComplianceGate {
    registry: Arc<dyn DncRegistry>,
}

impl ComplianceGate {
    pub fn new(registry: Arc<dyn DncRegistry>) -> Self {
        Self { registry }
    }

    /// Consults the registry on every call; results are never cached.
    pub async fn is_safe_to_call(&self, phone: &str) -> bool {
        let Some(national) = normalize_phone(phone) else {
            tracing::warn!("[Compliance] BLOCKED: '{}' is not a dialable number", phone);
            return false;
        };

        match self.registry.is_listed(&national).await {
            Ok(false) => true,
            Ok(true) => {
                tracing::info!("[Compliance] BLOCKED: {} is on DNC list", national);
                false
            }
            Err(e) => {
                tracing::error!(
                    "[Compliance] DNC registry unavailable, treating {} as unsafe: {}",
                    national,
                    e
                );
                false
            }
        }
    }
}

/// Strips PII from a lead, keeping only non-identifying statistics.
pub fn redact(lead: &mut Lead) {
    lead.first_name = Some("REDACTED".to_string());
    lead.last_name = Some("REDACTED".to_string());
    lead.email = Some(format!("redacted_{}@example.com", lead.id));
    lead.phone = Some("000-000-0000".to_string());
    lead.address = Some("REDACTED".to_string());
    lead.social_profile_url = None;
    lead.household_income = None;
    lead.property_value = None;
    lead.annotations = PipelineAnnotations {
        anonymized_per_request: true,
        ..PipelineAnnotations::default()
    };
    lead.status = LeadStatus::Anonymized;
}
