//! MOS Lead Engine Library
//!
//! Takes verified leads through enrichment, scoring and compliance-gated
//! operator dispatch, and drives the follow-up nurture agent.
//!
//! # Modules
//!
//! - `cache_validator`: Integrity-checked cache entries.
//! - `circuit_breaker`: Circuit breaker for provider calls.
//! - `compliance`: DNC gate and PII redaction.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema.
//! - `db_storage`: Lead store traits and the Postgres store.
//! - `dispatch`: Operator notification for hot leads.
//! - `enrichment`: Enrichment provider interface and HTTP client.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `locks`: Per-lead execution locks.
//! - `memory_store`: In-process lead store.
//! - `models`: Core data models.
//! - `nurture`: Nurture agent state machine and its persistence.
//! - `pipeline`: Lead pipeline orchestrator.
//! - `queue`: Background work queue for pipeline runs.
//! - `scoring`: Rule-weighted lead scoring.

pub mod cache_validator;
pub mod circuit_breaker;
pub mod compliance;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dispatch;
pub mod enrichment;
pub mod errors;
pub mod handlers;
pub mod locks;
pub mod memory_store;
pub mod models;
pub mod nurture;
pub mod pipeline;
pub mod queue;
pub mod scoring;
