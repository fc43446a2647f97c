//! Error types for the replication layer.
//!
//! Replicator errors carry a `(domain, code)` pair: errors raised by the
//! controller itself live in the replicator domain with small fixed codes,
//! while transport failures pass through in the transport domain with their
//! original code. The pair is preserved as a tagged variant rather than
//! collapsed into a single integer.

use crate::transport::{codes, TransportError};
use thiserror::Error;

/// The domain an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// The replicator controller.
    Replicator,
    /// The underlying transport.
    Transport,
}

/// Errors surfaced by a [`Replicator`](crate::replicator::Replicator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicatorError {
    /// `start` was called more than once, or after `stop`.
    #[error("replicator already started")]
    AlreadyStarted,

    /// The transport refused to construct a job.
    #[error("transport failed to initialise: {0}")]
    TransportInitFailed(String),

    /// The configuration is missing its local or remote endpoint.
    #[error("configuration is missing a local or remote endpoint")]
    UndefinedSource,

    /// The transport reported that the local datastore vanished mid-run.
    #[error("local datastore was deleted during replication")]
    LocalDatastoreDeleted,

    /// Any other transport failure, passed through verbatim.
    #[error("transport error {code}: {message}")]
    Transport {
        /// The transport's error code.
        code: i32,
        /// The transport's error message.
        message: String,
    },
}

impl ReplicatorError {
    /// Returns the domain this error belongs to.
    #[must_use]
    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::Transport { .. } => ErrorDomain::Transport,
            _ => ErrorDomain::Replicator,
        }
    }

    /// Returns the integer code within the error's domain.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::AlreadyStarted => 1,
            Self::TransportInitFailed(_) => 2,
            Self::UndefinedSource => 3,
            Self::LocalDatastoreDeleted => 4,
            Self::Transport { code, .. } => *code,
        }
    }

    /// Projects a transport error into the replicator taxonomy.
    ///
    /// A deleted local datastore is recognised and re-tagged into the
    /// replicator domain; everything else passes through.
    #[must_use]
    pub fn from_transport(err: TransportError) -> Self {
        if err.code == codes::LOCAL_DATASTORE_DELETED {
            Self::LocalDatastoreDeleted
        } else {
            Self::Transport {
                code: err.code,
                message: err.message,
            }
        }
    }
}

/// Errors rejecting a configuration at controller construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An optional header failed validation; the controller is not created.
    #[error("invalid header {name:?}: {reason}")]
    HeaderValidationFailed {
        /// The offending header name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}
