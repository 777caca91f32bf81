//! # eventgate
//!
//! Multi-tenant event gateway.
//!
//! Ingests business events from push webhooks, scheduled polls and bulk
//! imports; records an auditable lifecycle for each event with per-org
//! deduplication; enqueues deliveries; and derives per-source checkpoints and
//! ingestion gaps. Storage sits behind traits with in-memory and Postgres
//! (sqlx) backends. Observability is tracing plus OpenTelemetry.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod executor;
pub mod import;
pub mod intake;
pub mod jobs;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod telemetry;
