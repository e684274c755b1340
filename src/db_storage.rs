//! Lead persistence.
//!
//! The orchestrator writes through a [`RunTransaction`]: enrichment upsert,
//! read-back, lead update and commit happen as one unit, and dropping or rolling
//! back the transaction leaves the lead untouched.
//!
//! Postgres layout used by [`PgLeadStore`]:
//!
//! - `leads(id bigserial, organization_id bigint, first_name, last_name, email,
//!   phone, address, city, state, zip_code text, status text, lead_score int,
//!   property_value float8, household_income float8, social_profile_url text,
//!   source text, annotations jsonb, created_at timestamptz, updated_at timestamptz)`
//! - `enrichment_records(lead_id bigint primary key references leads,
//!   property jsonb, identity jsonb, enriched_at timestamptz)`
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::compliance::redact;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    EnrichmentRecord, EnrichmentRow, Lead, LeadId, LeadRow, LeadStatus, LeadUpdate, NewLead,
};

/// Storage used by the pipeline and the data-privacy collaborator.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Intake: persists a new lead (status `pending` unless given).
    async fn create_lead(&self, lead: NewLead) -> Result<Lead, AppError>;

    async fn fetch_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, AppError>;

    async fn fetch_enrichment(&self, lead_id: LeadId)
        -> Result<Option<EnrichmentRecord>, AppError>;

    /// Opens the unit of work for one orchestrator run.
    async fn begin_run(&self, lead_id: LeadId) -> Result<Box<dyn RunTransaction>, AppError>;

    /// Redacts PII, drops the enrichment record and marks the lead anonymized.
    /// `None` when the lead does not exist.
    async fn anonymize(&self, lead_id: LeadId) -> Result<Option<Lead>, AppError>;
}

/// Staged writes of a single pipeline run.
#[async_trait]
pub trait RunTransaction: Send {
    async fn upsert_enrichment(&mut self, record: &EnrichmentRecord) -> Result<(), AppError>;

    /// Enrichment as seen inside this transaction.
    async fn enrichment(&mut self) -> Result<Option<EnrichmentRecord>, AppError>;

    /// Re-reads the lead and holds it until commit or rollback.
    async fn lock_lead(&mut self) -> Result<Option<Lead>, AppError>;

    /// Fails with [`AppError::LeadAnonymized`] if the lead was anonymized.
    async fn update_lead(&mut self, update: &LeadUpdate) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

const LEAD_COLUMNS: &str = "id, organization_id, first_name, last_name, email, phone, address, \
     city, state, zip_code, status, lead_score, property_value, household_income, \
     social_profile_url, source, annotations, created_at, updated_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn create_lead(&self, lead: NewLead) -> Result<Lead, AppError> {
        let status = lead.status.unwrap_or(LeadStatus::Pending);
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            INSERT INTO leads (
                organization_id, first_name, last_name, email, phone, address,
                city, state, zip_code, status, lead_score, property_value,
                household_income, source, annotations
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $12, $13, '{{}}'::jsonb)
            RETURNING {}
            "#,
            LEAD_COLUMNS
        ))
        .bind(lead.organization_id)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.state)
        .bind(&lead.zip_code)
        .bind(status.as_str())
        .bind(lead.property_value)
        .bind(lead.household_income)
        .bind(&lead.source)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert lead")?;

        let lead = Lead::try_from(row)?;
        tracing::info!("Lead {} created with status {}", lead.id, lead.status);
        Ok(lead)
    }

    async fn fetch_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {} FROM leads WHERE id = $1",
            LEAD_COLUMNS
        ))
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Lead::try_from).transpose()
    }

    async fn fetch_enrichment(
        &self,
        lead_id: LeadId,
    ) -> Result<Option<EnrichmentRecord>, AppError> {
        let row = sqlx::query_as::<_, EnrichmentRow>(
            "SELECT lead_id, property, identity, enriched_at FROM enrichment_records WHERE lead_id = $1",
        )
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EnrichmentRecord::from))
    }

    async fn begin_run(&self, lead_id: LeadId) -> Result<Box<dyn RunTransaction>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to open pipeline transaction")?;
        Ok(Box::new(PgRunTransaction { lead_id, tx }))
    }

    async fn anonymize(&self, lead_id: LeadId) -> Result<Option<Lead>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {} FROM leads WHERE id = $1 FOR UPDATE",
            LEAD_COLUMNS
        ))
        .bind(lead_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut lead = Lead::try_from(row)?;
        redact(&mut lead);

        sqlx::query(
            r#"
            UPDATE leads
            SET first_name = $2, last_name = $3, email = $4, phone = $5, address = $6,
                property_value = NULL, household_income = NULL, social_profile_url = NULL,
                status = $7, annotations = $8, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.address)
        .bind(lead.status.as_str())
        .bind(Json(&lead.annotations))
        .execute(&mut *tx)
        .await
        .context("Failed to redact lead")?;

        sqlx::query("DELETE FROM enrichment_records WHERE lead_id = $1")
            .bind(lead_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete enrichment record")?;

        tx.commit().await?;
        tracing::info!("Lead {} anonymized", lead_id);
        Ok(Some(lead))
    }
}

pub struct PgRunTransaction {
    lead_id: LeadId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RunTransaction for PgRunTransaction {
    async fn upsert_enrichment(&mut self, record: &EnrichmentRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_records (lead_id, property, identity, enriched_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (lead_id) DO UPDATE
            SET property = EXCLUDED.property,
                identity = EXCLUDED.identity,
                enriched_at = EXCLUDED.enriched_at
            "#,
        )
        .bind(record.lead_id)
        .bind(Json(&record.property))
        .bind(Json(&record.identity))
        .bind(record.enriched_at)
        .execute(&mut *self.tx)
        .await
        .context("Failed to upsert enrichment record")?;
        Ok(())
    }

    async fn enrichment(&mut self) -> Result<Option<EnrichmentRecord>, AppError> {
        let row = sqlx::query_as::<_, EnrichmentRow>(
            "SELECT lead_id, property, identity, enriched_at FROM enrichment_records WHERE lead_id = $1",
        )
        .bind(self.lead_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(EnrichmentRecord::from))
    }

    async fn lock_lead(&mut self) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {} FROM leads WHERE id = $1 FOR UPDATE",
            LEAD_COLUMNS
        ))
        .bind(self.lead_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Lead::try_from).transpose()
    }

    async fn update_lead(&mut self, update: &LeadUpdate) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = $2, lead_score = $3, property_value = $4,
                social_profile_url = $5, annotations = $6, updated_at = now()
            WHERE id = $1 AND status <> 'anonymized'
            "#,
        )
        .bind(self.lead_id)
        .bind(update.status.as_str())
        .bind(update.lead_score.clamp(0, 100))
        .bind(update.property_value)
        .bind(&update.social_profile_url)
        .bind(Json(&update.annotations))
        .execute(&mut *self.tx)
        .await
        .context("Failed to update lead")?;

        if result.rows_affected() == 0 {
            return Err(AppError::LeadAnonymized(self.lead_id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.context("Failed to commit pipeline run")
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back pipeline run")
    }
}
