//! # silodb Replication
//!
//! Fire-and-forget replication controller for silodb.
//!
//! This crate provides:
//! - The `Replicator` controller: state machine, delegate fan-out, and the
//!   self-retention that keeps a running session alive
//! - `ReplicatorConfig`: validated session descriptors
//! - The transport abstraction the controller drives, with a mock for tests
//! - Push filter bridging and the HTTP interceptor chain

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod factory;
pub mod filter;
pub mod interceptor;
pub mod replicator;
pub mod transport;

pub use config::{Direction, ReplicatorConfig};
pub use error::{ConfigError, ErrorDomain, ReplicatorError};
pub use factory::ReplicatorFactory;
pub use filter::{bridge_push_filter, FilterParams, PushFilter, TransportFilter};
pub use interceptor::{HttpInterceptor, InterceptorContext, SessionCookieInterceptor};
pub use replicator::{Replicator, ReplicatorDelegate, ReplicatorState};
pub use transport::{
    JobDescriptor, MockJob, MockTransport, Transport, TransportError, TransportJob,
    TransportListener,
};
