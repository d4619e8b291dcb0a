//! Integration tests for the Praxis plan generation pipeline

mod config_layers;
mod plan_pipeline;
mod provider_clients;
mod test_utils;
mod worker_pool;
mod xp_and_tasks;
