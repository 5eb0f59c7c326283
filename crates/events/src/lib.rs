//! Domain event plumbing: the wire event, the bus seam, retry and
//! cancellation. Transport adapters live in `orgledger-infra`.

pub mod bus;
pub mod cancel;
pub mod envelope;
pub mod in_memory;
pub mod retry;

pub use bus::{EventBus, PublishError};
pub use cancel::CancellationToken;
pub use envelope::DomainEvent;
pub use in_memory::InMemoryEventBus;
pub use retry::{RetryPolicy, RetryingEventBus};
