//! # gs-broker
//!
//! The broker adapter and stream abstraction. [`adapter::BrokerAdapter`] is
//! the abstract transport contract (topic creation, produce, subscribe);
//! [`kafka::KafkaBroker`] backs it with `rdkafka`, [`memory::MemoryBroker`]
//! backs it with in-process channels for tests and demos. [`stream::Stream`]
//! binds a topic (or in-memory channel) to the codec and to exactly one
//! dispatch observer.

#![allow(unused)]

pub mod adapter;
pub mod commit;
pub mod error;
pub mod kafka;
pub mod memory;
pub mod stream;

pub use adapter::{BrokerAdapter, Headers, ObserverFn};
pub use commit::commit;
pub use error::{TopicShapeError, TransportError};
pub use stream::Stream;
