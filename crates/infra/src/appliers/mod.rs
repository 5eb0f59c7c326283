//! Appliers fanning captured changes out to the read-side stores.

pub mod cache_invalidator;
pub mod graph_projector;

pub use cache_invalidator::CacheInvalidator;
pub use graph_projector::GraphProjector;
