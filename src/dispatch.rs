//! Operator notification for hot leads ("speed to lead").
//!
//! Every call goes through the [`ComplianceGate`] first. A DNC hit is a normal
//! `blocked_dnc` outcome, not an error.

use async_trait::async_trait;
use failsafe::CircuitBreaker;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::{create_provider_circuit_breaker, guarded};
use crate::compliance::ComplianceGate;
use crate::errors::AppError;
use crate::models::{DispatchStatus, LeadContact};

/// One outbound call request to the telephony provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRequest {
    pub lead_id: i64,
    /// Number the lead is bridged to once the operator accepts.
    pub lead_phone: String,
    /// Text read to the operator before bridging.
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallReceipt {
    pub call_sid: String,
    pub status: String,
    pub recording_url: Option<String>,
}

/// Places exactly one outbound call per invocation.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn place_call(&self, request: &CallRequest) -> Result<CallReceipt, AppError>;
}

/// `POST {base}/v1/calls` with `{to, lead_phone, lead_id, script}`.
pub struct HttpDialer<B> {
    client: reqwest::Client,
    base_url: String,
    token: String,
    operator_phone: String,
    breaker: B,
}

impl HttpDialer<()> {
    pub fn new(
        base_url: String,
        token: String,
        operator_phone: String,
        timeout: Duration,
    ) -> Result<HttpDialer<impl CircuitBreaker + Send + Sync + 'static>, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create dialer client: {}", e)))?;

        Ok(HttpDialer {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            operator_phone,
            breaker: create_provider_circuit_breaker(),
        })
    }
}

impl<B> HttpDialer<B> {
    async fn post_call(&self, request: &CallRequest) -> Result<CallReceipt, AppError> {
        let url = format!("{}/v1/calls", self.base_url);
        tracing::info!("Dialing operator for lead {}", request.lead_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "to": self.operator_phone,
                "lead_phone": request.lead_phone,
                "lead_id": request.lead_id,
                "script": request.script,
            }))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Dialer request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ProviderUnavailable(format!(
                "Dialer returned {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Failed to parse dialer response: {}", e))
        })
    }
}

#[async_trait]
impl<B> Dialer for HttpDialer<B>
where
    B: CircuitBreaker + Send + Sync,
{
    async fn place_call(&self, request: &CallRequest) -> Result<CallReceipt, AppError> {
        guarded(&self.breaker, "dialer", self.post_call(request)).await
    }
}

/// What `notify_operator` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub reference_id: Option<String>,
    pub status: DispatchStatus,
    pub recording_url: Option<String>,
}

impl DispatchOutcome {
    fn blocked() -> Self {
        Self {
            reference_id: None,
            status: DispatchStatus::BlockedDnc,
            recording_url: None,
        }
    }
}

pub fn operator_script(contact: &LeadContact, score: i32) -> String {
    format!(
        "Hot Lead Alert! {} from {}. Score {}. Press 1 to connect.",
        contact.name,
        contact.zip_code.as_deref().unwrap_or("an unknown area"),
        score
    )
}

#[derive(Clone)]
pub struct DispatchService {
    gate: ComplianceGate,
    dialer: Arc<dyn Dialer>,
    timeout: Duration,
}

impl DispatchService {
    pub fn new(gate: ComplianceGate, dialer: Arc<dyn Dialer>, timeout: Duration) -> Self {
        Self {
            gate,
            dialer,
            timeout,
        }
    }

    pub fn gate(&self) -> &ComplianceGate {
        &self.gate
    }

    /// Calls the operator about `contact`, unless the lead's number is not
    /// callable.
    pub async fn notify_operator(
        &self,
        contact: &LeadContact,
        score: i32,
    ) -> Result<DispatchOutcome, AppError> {
        let Some(phone) = contact.phone.as_deref() else {
            tracing::warn!("[Compliance] BLOCKED: lead {} has no phone", contact.lead_id);
            return Ok(DispatchOutcome::blocked());
        };

        if !self.gate.is_safe_to_call(phone).await {
            return Ok(DispatchOutcome::blocked());
        }

        let request = CallRequest {
            lead_id: contact.lead_id,
            lead_phone: phone.to_string(),
            script: operator_script(contact, score),
        };
        tracing::info!("Operator script for lead {}: '{}'", contact.lead_id, request.script);

        let receipt = tokio::time::timeout(self.timeout, self.dialer.place_call(&request)).await??;
        tracing::info!(
            "Operator call {} placed for lead {} (status: {})",
            receipt.call_sid,
            contact.lead_id,
            receipt.status
        );

        Ok(DispatchOutcome {
            reference_id: Some(receipt.call_sid),
            status: DispatchStatus::Completed,
            recording_url: receipt.recording_url,
        })
    }
}
