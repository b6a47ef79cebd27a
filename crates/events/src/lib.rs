//! Domain events and the audit-trail fan-out.
//!
//! Armory and distribution aggregates decide in terms of events; committed
//! events are wrapped in envelopes and published so the audit trail can be
//! consumed outside the transaction that produced them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
