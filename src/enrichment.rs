//! Enrichment provider seam and its HTTP adapter.
//!
//! The orchestrator only sees [`EnrichmentProvider`]. Production wires in
//! [`HttpEnrichmentProvider`]; tests inject deterministic fakes.

use async_trait::async_trait;
use failsafe::CircuitBreaker;
use moka::future::Cache;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;

use crate::cache_validator::{fingerprint, SealedEntry};
use crate::circuit_breaker::{create_provider_circuit_breaker, guarded};
use crate::errors::AppError;
use crate::models::{EnrichmentBundle, IdentityAttrs, Lead, PropertyAttrs};

/// Contact details sent to an enrichment provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl EnrichmentRequest {
    /// Builds a request from a lead, dropping emails that fail validation.
    pub fn from_lead(lead: &Lead) -> Self {
        let email = lead
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .and_then(|e| {
                if is_valid_email(e) {
                    Some(e.to_string())
                } else {
                    tracing::warn!(
                        "Skipping invalid/fake email for enrichment lookup on lead {}",
                        lead.id
                    );
                    None
                }
            });

        let address = match (&lead.address, &lead.zip_code) {
            (Some(street), Some(zip)) => Some(format!("{}, {}", street.trim(), zip.trim())),
            (Some(street), None) => Some(street.trim().to_string()),
            (None, _) => None,
        };

        Self {
            email,
            phone: lead.phone.clone().filter(|p| !p.trim().is_empty()),
            address,
        }
    }
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| {
            Regex::new(
                r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
            )
            .ok()
        })
        .as_ref()
}

/// Validate email address
///
/// Checks for:
/// - Basic email format (contains @ and .)
/// - Fake/placeholder patterns (repeated digits like 9999, 1111)
/// - Minimum length requirements
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];
    if fake_patterns.iter().any(|p| email.contains(p)) {
        return false;
    }

    email_regex().is_some_and(|re| re.is_match(email))
}

/// Talking points for the sales rep, derived from enrichment data.
pub fn build_cheat_sheet(property: &PropertyAttrs, identity: &IdentityAttrs) -> Vec<String> {
    let mut notes = Vec::new();
    if property.year_built.is_some_and(|y| y < 2000) {
        notes.push("Home built before 2000: HVAC likely nearing end of life.".to_string());
    }
    if property.estimated_value.is_some_and(|v| v > 800_000) {
        notes.push("High-Value Property: Pitch premium 'Inverter' systems.".to_string());
    }
    if identity
        .job_title
        .as_deref()
        .is_some_and(|t| t.contains("Owner") || t.contains("VP"))
    {
        notes.push(
            "Decision Maker: Likely values time and efficiency over lowest price.".to_string(),
        );
    }
    notes
}

/// Fetches property and identity attributes for a lead.
///
/// Implementations must be idempotent for identical requests.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError>;
}

/// JSON-over-HTTP enrichment provider.
///
/// `POST {base}/v1/enrich` with `{email, phone, address}`; responses are cached
/// for an hour, sealed with a checksum. Calls go through a circuit breaker.
pub struct HttpEnrichmentProvider<B> {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: Cache<String, String>,
    breaker: B,
}

impl HttpEnrichmentProvider<()> {
    pub fn new(
        base_url: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<HttpEnrichmentProvider<impl CircuitBreaker + Send + Sync + 'static>, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create enrichment client: {}", e))
            })?;

        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(100_000)
            .build();

        Ok(HttpEnrichmentProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            cache,
            breaker: create_provider_circuit_breaker(),
        })
    }
}

impl<B> HttpEnrichmentProvider<B> {
    async fn fetch(&self, request: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        let url = format!("{}/v1/enrich", self.base_url);
        tracing::info!("Requesting enrichment from {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "email": request.email,
                "phone": request.phone,
                "address": request.address,
            }))
            .send()
            .await
            .map_err(|e| {
                AppError::ProviderUnavailable(format!("Enrichment request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Enrichment provider returned error {}: {}", status, error_text);
            return Err(AppError::ProviderUnavailable(format!(
                "Enrichment provider returned status {}",
                status
            )));
        }

        let mut bundle: EnrichmentBundle = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Failed to parse enrichment response: {}", e))
        })?;

        if bundle.notes.is_empty() {
            bundle.notes = build_cheat_sheet(&bundle.property, &bundle.identity);
        }
        Ok(bundle)
    }
}

#[async_trait]
impl<B> EnrichmentProvider for HttpEnrichmentProvider<B>
where
    B: CircuitBreaker + Send + Sync,
{
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentBundle, AppError> {
        let key = fingerprint(
            "enrich",
            &[
                request.email.as_deref(),
                request.phone.as_deref(),
                request.address.as_deref(),
            ],
        );

        if let Some(sealed) = self.cache.get(&key).await {
            if let Some(bundle) = SealedEntry::open::<EnrichmentBundle>(&sealed) {
                tracing::debug!("Enrichment cache hit");
                return Ok(bundle);
            }
            self.cache.invalidate(&key).await;
        }

        let bundle = guarded(&self.breaker, "enrichment", self.fetch(request)).await?;
        if let Some(sealed) = SealedEntry::seal(&bundle) {
            self.cache.insert(key, sealed).await;
        }
        Ok(bundle)
    }
}
