//! # Messaging Module
//!
//! Transport side of the delivery core: the envelope and dead-letter record types, the
//! broker client interface and its in-memory implementation, the protected delivery
//! pipeline, and the publisher façade that callers use.

pub mod broker;
pub mod envelope;
pub mod in_memory_broker;
pub mod pipeline;
pub mod publisher;

pub use broker::{BrokerAck, BrokerMessage, MessageBroker};
pub use envelope::{DeadLetterRecord, Envelope};
pub use in_memory_broker::InMemoryBroker;
pub use pipeline::DeliveryPipeline;
pub use publisher::{EventPublisher, PublishOutcome, PublishReceipt};
