//! soil telemetry relay: mqtt ingestion, range store, push channel, and the
//! dashboard core that consumes them.

pub mod config;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod sqlite;
pub mod store;
pub mod web;
