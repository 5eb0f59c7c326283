//! Decoding and fan-out of raw change messages.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::envelope::CdcEnvelope;
use crate::event::ChangeEvent;

/// Applier failure, split by whether redelivery can help.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Downstream temporarily unreachable; the change must be redelivered.
    #[error("transient apply failure: {0}")]
    Transient(String),
    /// The change can never apply. Logged and dropped so one bad row cannot
    /// wedge the stream.
    #[error("fatal apply failure: {0}")]
    Fatal(String),
}

impl ApplyError {
    pub fn transient(msg: impl Into<String>) -> Self {
        ApplyError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ApplyError::Fatal(msg.into())
    }
}

/// A projection fed by normalized row changes.
///
/// Appliers must tolerate seeing the same change more than once: delivery
/// is at-least-once, and one sibling's transient failure redelivers the
/// message to all of them.
pub trait Applier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn apply(&self, change: &ChangeEvent) -> Result<(), ApplyError>;
}

impl<A: Applier + ?Sized> Applier for Arc<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn apply(&self, change: &ChangeEvent) -> Result<(), ApplyError> {
        (**self).apply(change)
    }
}

/// What the consumer tells its source to do with a raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with the message: applied, skipped, or failed fatally.
    Ack,
    /// Leave the message pending for redelivery.
    Retry,
}

/// Decodes change envelopes and fans them out to the appliers.
///
/// Undecodable or unactionable messages are logged and acked. Every applier
/// sees every change even when a sibling fails; any transient failure marks
/// the whole message for redelivery.
pub struct ChangeCaptureConsumer {
    appliers: Vec<Arc<dyn Applier>>,
}

impl ChangeCaptureConsumer {
    pub fn new(appliers: Vec<Arc<dyn Applier>>) -> Self {
        Self { appliers }
    }

    /// Decode one raw message body into a normalized change, or `None` when
    /// the message should be skipped.
    pub fn decode(&self, raw: &[u8]) -> Option<ChangeEvent> {
        let envelope: CdcEnvelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "skipping undecodable change envelope");
                return None;
            }
        };
        match ChangeEvent::from_envelope(&envelope) {
            Some(change) => Some(change),
            None => {
                warn!(op = %envelope.payload.op, "skipping change without actionable identity");
                None
            }
        }
    }

    /// Process one raw message end to end.
    pub fn process(&self, raw: &[u8]) -> Disposition {
        match self.decode(raw) {
            Some(change) => self.dispatch(&change),
            None => Disposition::Ack,
        }
    }

    /// Fan a normalized change out to every applier.
    pub fn dispatch(&self, change: &ChangeEvent) -> Disposition {
        let mut retry = false;
        for applier in &self.appliers {
            match applier.apply(change) {
                Ok(()) => {
                    debug!(
                        applier = applier.name(),
                        code = %change.code,
                        op = change.op.as_code(),
                        "change applied"
                    );
                }
                Err(ApplyError::Transient(reason)) => {
                    warn!(
                        applier = applier.name(),
                        code = %change.code,
                        %reason,
                        "transient failure, message will be redelivered"
                    );
                    retry = true;
                }
                Err(ApplyError::Fatal(reason)) => {
                    warn!(
                        applier = applier.name(),
                        code = %change.code,
                        %reason,
                        "fatal failure, change dropped for this applier"
                    );
                }
            }
        }
        if retry { Disposition::Retry } else { Disposition::Ack }
    }
}
