//! Infrastructure layer: Postgres, Redis, capture pipeline wiring.

pub mod appliers;
pub mod cache;
pub mod capture_source;
pub mod config;
pub mod event_bus;
pub mod graph;
pub mod stores;
pub mod workers;
