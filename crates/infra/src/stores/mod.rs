//! Durable storage backends for the version chains.

pub mod postgres;

pub use postgres::PostgresVersionStore;
