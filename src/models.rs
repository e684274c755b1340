use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// Primary key of a lead row.
pub type LeadId = i64;

// ============ Lead ============

/// Position of a lead in the processing pipeline.
///
/// Statuses only move forward (`pending → verified → enriching → enriched →
/// contacted`). `Anonymized` can be reached from any other status and is
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Verified,
    /// Transient: a pipeline run holds the lead. Never persisted.
    Enriching,
    Enriched,
    Contacted,
    Anonymized,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::Verified => "verified",
            LeadStatus::Enriching => "enriching",
            LeadStatus::Enriched => "enriched",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Anonymized => "anonymized",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            LeadStatus::Pending => 0,
            LeadStatus::Verified => 1,
            LeadStatus::Enriching => 2,
            LeadStatus::Enriched => 3,
            LeadStatus::Contacted => 4,
            LeadStatus::Anonymized => u8::MAX,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Anonymized)
    }

    /// Returns the later of `self` and `target` along the pipeline.
    ///
    /// A contacted lead that is refreshed stays contacted, and nothing ever
    /// leaves `Anonymized`.
    pub fn advance_to(self, target: LeadStatus) -> LeadStatus {
        if self.is_terminal() || target.rank() <= self.rank() {
            self
        } else {
            target
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(LeadStatus::Pending),
            "verified" => Ok(LeadStatus::Verified),
            "enriching" => Ok(LeadStatus::Enriching),
            "enriched" => Ok(LeadStatus::Enriched),
            "contacted" => Ok(LeadStatus::Contacted),
            "anonymized" => Ok(LeadStatus::Anonymized),
            other => Err(AppError::InternalError(format!(
                "Unknown lead status '{}'",
                other
            ))),
        }
    }
}

/// Coarse urgency classification derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTag {
    Low,
    Warm,
    HotLead,
}

impl PriorityTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTag::Low => "LOW",
            PriorityTag::Warm => "WARM",
            PriorityTag::HotLead => "HOT_LEAD",
        }
    }
}

impl fmt::Display for PriorityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an operator dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    BlockedDnc,
}

/// The last dispatch attempt recorded on a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Provider call reference. Its presence marks the lead as already dispatched.
    pub reference_id: Option<String>,
    pub status: DispatchStatus,
    pub recording_url: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Derived artifacts the pipeline attaches to a lead.
///
/// Written as one value on every orchestrator commit; `version` counts commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineAnnotations {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub cheat_sheet: Vec<String>,
    pub dossier: Option<String>,
    pub priority_tag: Option<PriorityTag>,
    pub dispatch: Option<DispatchRecord>,
    #[serde(default)]
    pub anonymized_per_request: bool,
}

impl PipelineAnnotations {
    /// Reference of a dispatch that actually reached the operator, if any.
    pub fn dispatch_reference(&self) -> Option<&str> {
        self.dispatch
            .as_ref()
            .and_then(|d| d.reference_id.as_deref())
    }
}

/// A prospective customer moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub organization_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub status: LeadStatus,
    /// Always within `0..=100`.
    pub lead_score: i32,
    pub property_value: Option<f64>,
    pub household_income: Option<f64>,
    pub social_profile_url: Option<String>,
    pub source: Option<String>,
    pub annotations: PipelineAnnotations,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Lead {
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            "Unknown lead".to_string()
        } else {
            parts.join(" ")
        }
    }

    pub fn contact(&self) -> LeadContact {
        LeadContact {
            lead_id: self.id,
            name: self.display_name(),
            phone: self.phone.clone(),
            zip_code: self.zip_code.clone(),
        }
    }
}

/// Row shape of `leads`.
#[derive(Debug, Clone, FromRow)]
pub struct LeadRow {
    pub id: i64,
    pub organization_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub status: String,
    pub lead_score: i32,
    pub property_value: Option<f64>,
    pub household_income: Option<f64>,
    pub social_profile_url: Option<String>,
    pub source: Option<String>,
    pub annotations: Json<PipelineAnnotations>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = AppError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        Ok(Lead {
            id: row.id,
            organization_id: row.organization_id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            city: row.city,
            state: row.state,
            zip_code: row.zip_code,
            status: row.status.parse()?,
            lead_score: row.lead_score.clamp(0, 100),
            property_value: row.property_value,
            household_income: row.household_income,
            social_profile_url: row.social_profile_url,
            source: row.source,
            annotations: row.annotations.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Lead as handed over by the intake collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLead {
    pub organization_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// `None` means `pending`.
    pub status: Option<LeadStatus>,
    pub property_value: Option<f64>,
    pub household_income: Option<f64>,
    pub source: Option<String>,
}

/// What the operator needs to know to call a lead back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadContact {
    pub lead_id: LeadId,
    pub name: String,
    pub phone: Option<String>,
    pub zip_code: Option<String>,
}

/// Fields the orchestrator writes on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadUpdate {
    pub status: LeadStatus,
    pub lead_score: i32,
    pub property_value: Option<f64>,
    pub social_profile_url: Option<String>,
    pub annotations: PipelineAnnotations,
}

// ============ Enrichment ============

/// One entry of a property's tax history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxAssessment {
    pub year: i32,
    #[serde(alias = "tax")]
    pub amount: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyAttrs {
    pub sqft: Option<i32>,
    pub lot_size: Option<f64>,
    pub year_built: Option<i32>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub estimated_value: Option<i64>,
    pub last_sold_price: Option<i64>,
    pub last_sold_date: Option<NaiveDateTime>,
    /// Ordered as returned by the provider (most recent first).
    #[serde(default)]
    pub tax_history: Vec<TaxAssessment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityAttrs {
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub verified_email: Option<String>,
    #[serde(alias = "linkedin_url")]
    pub social_profile_url: Option<String>,
    /// Provider-assigned quality of the social footprint, `0..=100`.
    pub social_quality_score: Option<f64>,
}

/// What an enrichment provider returns for one lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentBundle {
    #[serde(default)]
    pub property: PropertyAttrs,
    #[serde(default)]
    pub identity: IdentityAttrs,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Persisted enrichment, one per lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub lead_id: LeadId,
    pub property: PropertyAttrs,
    pub identity: IdentityAttrs,
    pub enriched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct EnrichmentRow {
    pub lead_id: i64,
    pub property: Json<PropertyAttrs>,
    pub identity: Json<IdentityAttrs>,
    pub enriched_at: DateTime<Utc>,
}

impl From<EnrichmentRow> for EnrichmentRecord {
    fn from(row: EnrichmentRow) -> Self {
        EnrichmentRecord {
            lead_id: row.lead_id,
            property: row.property.0,
            identity: row.identity.0,
            enriched_at: row.enriched_at,
        }
    }
}

// ============ Scoring ============

/// Latest scoring result. Not persisted as its own entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: i32,
    pub priority_tag: PriorityTag,
    pub dossier: String,
}

// ============ Pipeline outcome ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LeadNotFound,
    ConcurrentRunConflict,
    NotVerified,
    Anonymized,
}

/// Result of one orchestrator run, as seen by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub lead_id: LeadId,
    pub status: RunStatus,
    /// Persisted status after the run; `None` when the lead is unknown.
    pub final_lead_status: Option<LeadStatus>,
    pub score: Option<ScoreResult>,
    pub dispatch: Option<DispatchStatus>,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<String>,
    pub retryable: bool,
}

impl RunOutcome {
    pub fn succeeded(
        lead_id: LeadId,
        final_status: LeadStatus,
        score: ScoreResult,
        dispatch: Option<DispatchStatus>,
    ) -> Self {
        Self {
            lead_id,
            status: RunStatus::Succeeded,
            final_lead_status: Some(final_status),
            score: Some(score),
            dispatch,
            skip_reason: None,
            error: None,
            retryable: false,
        }
    }

    pub fn skipped(lead_id: LeadId, reason: SkipReason, status: Option<LeadStatus>) -> Self {
        Self {
            lead_id,
            status: RunStatus::Skipped,
            final_lead_status: status,
            score: None,
            dispatch: None,
            skip_reason: Some(reason),
            error: None,
            retryable: false,
        }
    }

    pub fn failed(lead_id: LeadId, status: Option<LeadStatus>, error: &AppError) -> Self {
        Self {
            lead_id,
            status: RunStatus::Failed,
            final_lead_status: status,
            score: None,
            dispatch: None,
            skip_reason: None,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_moves_backwards() {
        assert_eq!(
            LeadStatus::Verified.advance_to(LeadStatus::Enriched),
            LeadStatus::Enriched
        );
        assert_eq!(
            LeadStatus::Contacted.advance_to(LeadStatus::Enriched),
            LeadStatus::Contacted
        );
        assert_eq!(
            LeadStatus::Anonymized.advance_to(LeadStatus::Contacted),
            LeadStatus::Anonymized
        );
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            LeadStatus::Pending,
            LeadStatus::Verified,
            LeadStatus::Enriched,
            LeadStatus::Contacted,
            LeadStatus::Anonymized,
        ] {
            assert_eq!(status.as_str().parse::<LeadStatus>().unwrap(), status);
        }
        assert!("closed".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn priority_tag_serializes_like_the_crm() {
        let json = serde_json::to_string(&PriorityTag::HotLead).unwrap();
        assert_eq!(json, "\"HOT_LEAD\"");
    }

    #[test]
    fn provider_payload_accepts_legacy_field_names() {
        let bundle: EnrichmentBundle = serde_json::from_value(serde_json::json!({
            "property": {
                "sqft": 2400,
                "estimated_value": 910000,
                "last_sold_date": "2019-05-15T00:00:00",
                "tax_history": [{"year": 2023, "tax": 8500}, {"year": 2022, "tax": 8200}]
            },
            "identity": {
                "linkedin_url": "https://linkedin.com/in/jdoe",
                "job_title": "Surgeon"
            }
        }))
        .unwrap();

        assert_eq!(bundle.property.tax_history[0].amount, 8500);
        assert_eq!(
            bundle.identity.social_profile_url.as_deref(),
            Some("https://linkedin.com/in/jdoe")
        );
        assert!(bundle.notes.is_empty());
    }

    #[test]
    fn dispatch_reference_ignores_blocked_attempts() {
        let mut annotations = PipelineAnnotations::default();
        annotations.dispatch = Some(DispatchRecord {
            reference_id: None,
            status: DispatchStatus::BlockedDnc,
            recording_url: None,
            attempted_at: Utc::now(),
        });
        assert_eq!(annotations.dispatch_reference(), None);
    }
}
