//! Graph projection target.
//!
//! The projector expresses its writes as parameterized statements and
//! this port runs them. Deployments bridge it to their graph database
//! endpoint; tests record what would have been run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub type GraphParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum GraphStoreError {
    #[error("graph connection error: {0}")]
    Connection(String),
    #[error("graph command error: {0}")]
    Command(String),
}

pub trait GraphStore: Send + Sync {
    fn run(&self, statement: &str, params: &GraphParams) -> Result<(), GraphStoreError>;
}

impl<G: GraphStore + ?Sized> GraphStore for Arc<G> {
    fn run(&self, statement: &str, params: &GraphParams) -> Result<(), GraphStoreError> {
        (**self).run(statement, params)
    }
}

/// Records statements instead of running them.
#[derive(Default)]
pub struct RecordingGraphStore {
    statements: Mutex<Vec<(String, GraphParams)>>,
    unavailable: AtomicBool,
}

impl RecordingGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `run` fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<(String, GraphParams)> {
        self.statements.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.statements.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GraphStore for RecordingGraphStore {
    fn run(&self, statement: &str, params: &GraphParams) -> Result<(), GraphStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GraphStoreError::Connection(
                "graph store unavailable".to_string(),
            ));
        }
        let mut statements = self
            .statements
            .lock()
            .map_err(|_| GraphStoreError::Connection("graph recorder lock poisoned".to_string()))?;
        statements.push((statement.to_string(), params.clone()));
        Ok(())
    }
}
