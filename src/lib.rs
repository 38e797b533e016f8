// LLM Speed Test - Library root for testing

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod routes;
pub mod store;
pub mod streaming;
