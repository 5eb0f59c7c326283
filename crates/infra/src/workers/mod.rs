//! Background worker threads.

pub mod capture_worker;

pub use capture_worker::{CaptureWorker, WorkerHandle};
