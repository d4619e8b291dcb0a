//! Praxis: Asynchronous Plan Generation
//!
//! Users submit a free-text goal; a background worker asks a language model for a
//! structured plan and persists it as a Plan with ordered Tasks. Sibling queues
//! recompute experience totals and regenerate individual tasks. Every job runs on a
//! durable sled-backed queue with bounded per-queue concurrency, retries with backoff
//! and dead-lettering.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod runtime;
pub mod service;
pub mod store;
pub mod types;
pub mod worker;
