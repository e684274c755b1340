//! Nurture agent: a per-lead state machine that picks the next engagement
//! action after the pipeline has run.
//!
//! ```text
//! START     + any trigger -> SEND_SMS     -> SMS_SENT
//! SMS_SENT  + no_reply    -> SEND_EMAIL   -> EMAIL_SENT
//! SMS_SENT  + replied     -> NOTIFY_HUMAN -> HANDOFF (terminal)
//! ```
//!
//! Other combinations report an unhandled trigger and leave the agent as is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::db_storage::LeadStore;
use crate::errors::{AppError, ResultExt};
use crate::locks::LeadLocks;
use crate::models::{LeadId, LeadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NurtureState {
    Start,
    SmsSent,
    EmailSent,
    Handoff,
}

impl NurtureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NurtureState::Start => "START",
            NurtureState::SmsSent => "SMS_SENT",
            NurtureState::EmailSent => "EMAIL_SENT",
            NurtureState::Handoff => "HANDOFF",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NurtureState::Handoff)
    }
}

impl fmt::Display for NurtureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NurtureState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(NurtureState::Start),
            "SMS_SENT" => Ok(NurtureState::SmsSent),
            "EMAIL_SENT" => Ok(NurtureState::EmailSent),
            "HANDOFF" => Ok(NurtureState::Handoff),
            other => Err(AppError::InternalError(format!(
                "Unknown nurture state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NurtureTrigger {
    Start,
    NoReply,
    Replied,
}

impl NurtureTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            NurtureTrigger::Start => "start",
            NurtureTrigger::NoReply => "no_reply",
            NurtureTrigger::Replied => "replied",
        }
    }
}

impl fmt::Display for NurtureTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; surrounding whitespace is ignored.
impl FromStr for NurtureTrigger {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(NurtureTrigger::Start),
            "no_reply" => Ok(NurtureTrigger::NoReply),
            "replied" => Ok(NurtureTrigger::Replied),
            other => Err(AppError::BadRequest(format!(
                "Unknown nurture trigger '{}' (expected start, no_reply or replied)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    SendSms,
    SendEmail,
    NotifyHuman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Sms,
    Email,
    Internal,
}

/// One decision of the agent. Delivery happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NurtureAction {
    pub kind: ActionKind,
    pub channel: Channel,
    pub content: String,
    pub reasoning: String,
}

impl NurtureAction {
    fn new(kind: ActionKind, channel: Channel, content: &str, reasoning: &str) -> Self {
        Self {
            kind,
            channel,
            content: content.to_string(),
            reasoning: reasoning.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NurtureOutcome {
    Emitted {
        action: NurtureAction,
        state: NurtureState,
    },
    Unhandled {
        state: NurtureState,
        trigger: NurtureTrigger,
    },
    Terminal {
        state: NurtureState,
    },
}

/// Pure transition table.
fn transition(
    state: NurtureState,
    trigger: NurtureTrigger,
) -> Option<(NurtureAction, NurtureState)> {
    match (state, trigger) {
        (NurtureState::Start, _) => Some((
            NurtureAction::new(
                ActionKind::SendSms,
                Channel::Sms,
                "Hi! Thanks for requesting a quote. When is a good time to chat?",
                "Initial outreach preference: High open rate channel.",
            ),
            NurtureState::SmsSent,
        )),
        (NurtureState::SmsSent, NurtureTrigger::NoReply) => Some((
            NurtureAction::new(
                ActionKind::SendEmail,
                Channel::Email,
                "Subject: Your Estimate. Body: Just following up on your request...",
                "No reply to SMS after 24h. Switching channel to Email.",
            ),
            NurtureState::EmailSent,
        )),
        (NurtureState::SmsSent, NurtureTrigger::Replied) => Some((
            NurtureAction::new(
                ActionKind::NotifyHuman,
                Channel::Internal,
                "Lead replied! Needs manual review.",
                "Positive intent detected. Handing off to sales manager.",
            ),
            NurtureState::Handoff,
        )),
        _ => None,
    }
}

/// Per-lead agent. State and history only change through [`NurtureAgent::advance`].
///
/// ```compile_fail
/// let mut agent = mos_lead_engine::nurture::NurtureAgent::new(1);
/// agent.history.clear();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NurtureAgent {
    lead_id: LeadId,
    state: NurtureState,
    history: Vec<NurtureAction>,
}

impl NurtureAgent {
    pub fn new(lead_id: LeadId) -> Self {
        Self {
            lead_id,
            state: NurtureState::Start,
            history: Vec::new(),
        }
    }

    /// Rebuilds a persisted agent.
    pub(crate) fn restore(
        lead_id: LeadId,
        state: NurtureState,
        history: Vec<NurtureAction>,
    ) -> Self {
        Self {
            lead_id,
            state,
            history,
        }
    }

    pub fn lead_id(&self) -> LeadId {
        self.lead_id
    }

    pub fn state(&self) -> NurtureState {
        self.state
    }

    /// Emitted actions, oldest first.
    pub fn history(&self) -> &[NurtureAction] {
        &self.history
    }

    pub fn advance(&mut self, trigger: NurtureTrigger) -> NurtureOutcome {
        if self.state.is_terminal() {
            return NurtureOutcome::Terminal { state: self.state };
        }

        match transition(self.state, trigger) {
            Some((action, next)) => {
                self.state = next;
                self.history.push(action.clone());
                NurtureOutcome::Emitted {
                    action,
                    state: next,
                }
            }
            None => NurtureOutcome::Unhandled {
                state: self.state,
                trigger,
            },
        }
    }
}

/// Persistence for agent state.
#[async_trait]
pub trait NurtureStore: Send + Sync {
    async fn load(&self, lead_id: LeadId) -> Result<Option<NurtureAgent>, AppError>;

    async fn save(&self, agent: &NurtureAgent) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryNurtureStore {
    agents: Arc<Mutex<HashMap<LeadId, NurtureAgent>>>,
}

impl InMemoryNurtureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NurtureStore for InMemoryNurtureStore {
    async fn load(&self, lead_id: LeadId) -> Result<Option<NurtureAgent>, AppError> {
        let agents = self.agents.lock().unwrap_or_else(|p| p.into_inner());
        Ok(agents.get(&lead_id).cloned())
    }

    async fn save(&self, agent: &NurtureAgent) -> Result<(), AppError> {
        let mut agents = self.agents.lock().unwrap_or_else(|p| p.into_inner());
        agents.insert(agent.lead_id, agent.clone());
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NurtureRow {
    lead_id: i64,
    state: String,
    history: Json<Vec<NurtureAction>>,
}

/// `nurture_agents(lead_id bigint primary key references leads, state text,
/// history jsonb, updated_at timestamptz)`
#[derive(Clone)]
pub struct PgNurtureStore {
    pool: PgPool,
}

impl PgNurtureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NurtureStore for PgNurtureStore {
    async fn load(&self, lead_id: LeadId) -> Result<Option<NurtureAgent>, AppError> {
        let row = sqlx::query_as::<_, NurtureRow>(
            "SELECT lead_id, state, history FROM nurture_agents WHERE lead_id = $1",
        )
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load nurture agent")?;

        row.map(|row| -> Result<NurtureAgent, AppError> {
            Ok(NurtureAgent::restore(
                row.lead_id,
                row.state.parse()?,
                row.history.0,
            ))
        })
        .transpose()
    }

    async fn save(&self, agent: &NurtureAgent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO nurture_agents (lead_id, state, history, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (lead_id) DO UPDATE
            SET state = EXCLUDED.state,
                history = EXCLUDED.history,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(agent.lead_id)
        .bind(agent.state.as_str())
        .bind(Json(&agent.history))
        .execute(&self.pool)
        .await
        .context("Failed to save nurture agent")?;
        Ok(())
    }
}

/// Entry point for nurture triggers. Advances on the same lead are serialized.
pub struct NurtureRegistry {
    leads: Arc<dyn LeadStore>,
    store: Arc<dyn NurtureStore>,
    locks: LeadLocks,
}

impl NurtureRegistry {
    pub fn new(leads: Arc<dyn LeadStore>, store: Arc<dyn NurtureStore>) -> Self {
        Self {
            leads,
            store,
            locks: LeadLocks::new(),
        }
    }

    pub async fn advance_nurture(
        &self,
        lead_id: LeadId,
        trigger: NurtureTrigger,
    ) -> Result<NurtureOutcome, AppError> {
        let _guard = self.locks.acquire(lead_id).await;

        let lead = self
            .leads
            .fetch_lead(lead_id)
            .await?
            .ok_or(AppError::LeadNotFound(lead_id))?;
        if lead.status == LeadStatus::Anonymized {
            return Err(AppError::LeadAnonymized(lead_id));
        }

        let mut agent = self
            .store
            .load(lead_id)
            .await?
            .unwrap_or_else(|| NurtureAgent::new(lead_id));

        let outcome = agent.advance(trigger);
        match &outcome {
            NurtureOutcome::Emitted { action, state } => {
                self.store.save(&agent).await?;
                tracing::info!(
                    "[Nurture] Lead {}: {} -> {:?} via {:?}, now {}",
                    lead_id,
                    trigger,
                    action.kind,
                    action.channel,
                    state
                );
            }
            NurtureOutcome::Unhandled { state, .. } => {
                tracing::warn!(
                    "[Nurture] Lead {}: trigger '{}' not handled in state {}",
                    lead_id,
                    trigger,
                    state
                );
            }
            NurtureOutcome::Terminal { .. } => {
                tracing::info!("[Nurture] Lead {} already handed off", lead_id);
            }
        }

        Ok(outcome)
    }

    /// Current agent, `None` before the first trigger.
    pub async fn agent(&self, lead_id: LeadId) -> Result<Option<NurtureAgent>, AppError> {
        self.store.load(lead_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_always_sends_sms() {
        for trigger in [
            NurtureTrigger::Start,
            NurtureTrigger::NoReply,
            NurtureTrigger::Replied,
        ] {
            let mut agent = NurtureAgent::new(1);
            let outcome = agent.advance(trigger);
            let NurtureOutcome::Emitted { action, state } = outcome else {
                panic!("expected an action for {}", trigger);
            };
            assert_eq!(action.kind, ActionKind::SendSms);
            assert_eq!(action.channel, Channel::Sms);
            assert_eq!(state, NurtureState::SmsSent);
            assert_eq!(agent.history.len(), 1);
        }
    }

    #[test]
    fn no_reply_switches_to_email() {
        let mut agent = NurtureAgent::new(1);
        agent.advance(NurtureTrigger::Start);
        let outcome = agent.advance(NurtureTrigger::NoReply);

        assert!(matches!(
            outcome,
            NurtureOutcome::Emitted { ref action, state: NurtureState::EmailSent }
                if action.kind == ActionKind::SendEmail && action.channel == Channel::Email
        ));
        assert_eq!(
            agent.history[1].reasoning,
            "No reply to SMS after 24h. Switching channel to Email."
        );
    }

    #[test]
    fn reply_hands_off_and_stays_terminal() {
        let mut agent = NurtureAgent::new(1);
        agent.advance(NurtureTrigger::Start);
        agent.advance(NurtureTrigger::Replied);
        assert_eq!(agent.state, NurtureState::Handoff);
        assert_eq!(agent.history[1].kind, ActionKind::NotifyHuman);
        assert_eq!(agent.history[1].channel, Channel::Internal);

        let outcome = agent.advance(NurtureTrigger::NoReply);
        assert_eq!(
            outcome,
            NurtureOutcome::Terminal {
                state: NurtureState::Handoff
            }
        );
        assert_eq!(agent.history.len(), 2);
    }

    #[test]
    fn unhandled_triggers_leave_history_alone() {
        let mut agent = NurtureAgent::new(1);
        agent.advance(NurtureTrigger::Start);
        assert_eq!(
            agent.advance(NurtureTrigger::Start),
            NurtureOutcome::Unhandled {
                state: NurtureState::SmsSent,
                trigger: NurtureTrigger::Start
            }
        );

        agent.advance(NurtureTrigger::NoReply);
        for trigger in [
            NurtureTrigger::Start,
            NurtureTrigger::NoReply,
            NurtureTrigger::Replied,
        ] {
            assert!(matches!(
                agent.advance(trigger),
                NurtureOutcome::Unhandled {
                    state: NurtureState::EmailSent,
                    ..
                }
            ));
        }
        assert_eq!(agent.history.len(), 2);
        assert_eq!(agent.state, NurtureState::EmailSent);
    }

    #[test]
    fn triggers_parse_case_insensitively() {
        assert_eq!("START".parse::<NurtureTrigger>().unwrap(), NurtureTrigger::Start);
        assert_eq!(" No_Reply ".parse::<NurtureTrigger>().unwrap(), NurtureTrigger::NoReply);
        assert_eq!("replied".parse::<NurtureTrigger>().unwrap(), NurtureTrigger::Replied);
        assert!(matches!(
            "maybe".parse::<NurtureTrigger>(),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn state_round_trips_through_text() {
        for state in [
            NurtureState::Start,
            NurtureState::SmsSent,
            NurtureState::EmailSent,
            NurtureState::Handoff,
        ] {
            assert_eq!(state.as_str().parse::<NurtureState>().unwrap(), state);
        }
    }
}
