//! # gs-host
//!
//! The service host: lifecycle state machine, `active` convention variable,
//! signal-chaining graceful shutdown, and YAML topology loading.

pub mod error;
pub mod lifecycle;
pub mod spec;

pub use error::HostError;
pub use lifecycle::{HostState, PriorHandler, ServiceHost};
pub use spec::{BrokerSpec, HostSpec};
