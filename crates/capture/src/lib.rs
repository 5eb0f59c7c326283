//! Change-data-capture intake: decode connector envelopes, normalize them,
//! and fan them out to projection appliers.
//!
//! Transport polling (consumer groups, claiming, dead-lettering) lives in
//! `orgledger-infra`; this crate is the transport-independent middle.

pub mod consumer;
pub mod envelope;
pub mod event;

pub use consumer::{Applier, ApplyError, ChangeCaptureConsumer, Disposition};
pub use envelope::{
    CapturedRow, CdcDate, CdcEnvelope, CdcPayload, CdcSource, ORGANIZATION_UNITS_TOPIC,
    capture_topic,
};
pub use event::{ChangeEvent, ChangeOp};
