/// Nurture registry tests: persistence, lead checks and per-lead serialization
mod common;

use std::sync::Arc;

use common::*;
use mos_lead_engine::db_storage::LeadStore;
use mos_lead_engine::errors::AppError;
use mos_lead_engine::memory_store::InMemoryLeadStore;
use mos_lead_engine::nurture::{
    ActionKind, Channel, InMemoryNurtureStore, NurtureOutcome, NurtureRegistry, NurtureState,
    NurtureTrigger,
};

fn registry(store: &InMemoryLeadStore, agents: &InMemoryNurtureStore) -> NurtureRegistry {
    NurtureRegistry::new(Arc::new(store.clone()), Arc::new(agents.clone()))
}

#[tokio::test]
async fn full_sequence_ends_in_handoff() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let agents = InMemoryNurtureStore::new();
    let registry = registry(&store, &agents);

    let sms = registry
        .advance_nurture(lead.id, NurtureTrigger::Start)
        .await
        .unwrap();
    let NurtureOutcome::Emitted { action, state } = sms else {
        panic!("expected an SMS action");
    };
    assert_eq!(action.kind, ActionKind::SendSms);
    assert_eq!(
        action.content,
        "Hi! Thanks for requesting a quote. When is a good time to chat?"
    );
    assert_eq!(state, NurtureState::SmsSent);

    let handoff = registry
        .advance_nurture(lead.id, NurtureTrigger::Replied)
        .await
        .unwrap();
    assert!(matches!(
        handoff,
        NurtureOutcome::Emitted { ref action, state: NurtureState::Handoff }
            if action.channel == Channel::Internal
    ));

    let after = registry
        .advance_nurture(lead.id, NurtureTrigger::NoReply)
        .await
        .unwrap();
    assert_eq!(
        after,
        NurtureOutcome::Terminal {
            state: NurtureState::Handoff
        }
    );

    let agent = registry.agent(lead.id).await.unwrap().unwrap();
    assert_eq!(agent.lead_id(), lead.id);
    assert_eq!(agent.state(), NurtureState::Handoff);
    let kinds: Vec<_> = agent.history().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![ActionKind::SendSms, ActionKind::NotifyHuman]);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let agents = InMemoryNurtureStore::new();

    registry(&store, &agents)
        .advance_nurture(lead.id, NurtureTrigger::Start)
        .await
        .unwrap();

    let restarted = registry(&store, &agents);
    let outcome = restarted
        .advance_nurture(lead.id, NurtureTrigger::NoReply)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        NurtureOutcome::Emitted {
            state: NurtureState::EmailSent,
            ..
        }
    ));
}

#[tokio::test]
async fn same_triggers_give_same_actions() {
    let store = InMemoryLeadStore::new();
    let a = create(&store, verified_lead(SAFE_PHONE)).await;
    let b = create(&store, verified_lead(SAFE_PHONE)).await;
    let registry = registry(&store, &InMemoryNurtureStore::new());

    for trigger in [NurtureTrigger::Start, NurtureTrigger::NoReply] {
        registry.advance_nurture(a.id, trigger).await.unwrap();
        registry.advance_nurture(b.id, trigger).await.unwrap();
    }

    let a = registry.agent(a.id).await.unwrap().unwrap();
    let b = registry.agent(b.id).await.unwrap().unwrap();
    assert_eq!(a.history(), b.history());
    assert_eq!(a.state(), b.state());
}

#[tokio::test]
async fn unknown_and_anonymized_leads_are_rejected() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let registry = registry(&store, &InMemoryNurtureStore::new());

    assert!(matches!(
        registry.advance_nurture(777, NurtureTrigger::Start).await,
        Err(AppError::LeadNotFound(777))
    ));

    store.anonymize(lead.id).await.unwrap();
    assert!(matches!(
        registry.advance_nurture(lead.id, NurtureTrigger::Start).await,
        Err(AppError::LeadAnonymized(_))
    ));
    assert!(registry.agent(lead.id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_advances_are_serialized() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let registry = Arc::new(registry(&store, &InMemoryNurtureStore::new()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .advance_nurture(lead.id, NurtureTrigger::Start)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut emitted = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), NurtureOutcome::Emitted { .. }) {
            emitted += 1;
        }
    }

    assert_eq!(emitted, 1);
    let agent = registry.agent(lead.id).await.unwrap().unwrap();
    assert_eq!(agent.history().len(), 1);
    assert_eq!(agent.state(), NurtureState::SmsSent);
}
