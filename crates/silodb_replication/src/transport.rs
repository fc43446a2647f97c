//! Transport layer abstraction.
//!
//! The transport is the opaque engine that actually moves revisions over
//! the wire. The controller builds a [`JobDescriptor`] from its
//! configuration, asks a [`Transport`] to turn it into a [`TransportJob`],
//! and observes the job's lifecycle through a [`TransportListener`]. A
//! [`MockTransport`] ships here for tests.

use crate::filter::{FilterParams, TransportFilter};
use crate::interceptor::HttpInterceptor;
use parking_lot::Mutex;
use silodb_core::RevisionStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Well-known transport error codes.
pub mod codes {
    /// The local datastore backing the job was deleted mid-run.
    pub const LOCAL_DATASTORE_DELETED: i32 = 404;
}

/// An error reported by the transport, identified by an integer code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    /// Transport-domain error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Everything the transport needs to run one replication job.
#[derive(Clone)]
pub struct JobDescriptor {
    /// The local datastore.
    pub local: Arc<dyn RevisionStore>,
    /// URL of the remote endpoint.
    pub remote: String,
    /// True for push (local → remote), false for pull.
    pub push: bool,
    /// Always false; continuous replication is not supported.
    pub continuous: bool,
    /// Ordered interceptor chain the transport runs around each request.
    pub interceptors: Vec<Arc<dyn HttpInterceptor>>,
    /// Named remote filter.
    pub filter_name: Option<String>,
    /// Filter parameters.
    pub filter_params: FilterParams,
    /// Extra request headers.
    pub request_headers: BTreeMap<String, String>,
    /// Bridged local predicate; push only.
    pub push_filter: Option<TransportFilter>,
    /// Always false; checkpoints are never discarded.
    pub reset: bool,
    /// Always `None`; the changes feed is not long-polled.
    pub heartbeat: Option<Duration>,
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("remote", &self.remote)
            .field("push", &self.push)
            .field("interceptors", &self.interceptors.len())
            .field("filter_name", &self.filter_name)
            .field("has_push_filter", &self.push_filter.is_some())
            .finish_non_exhaustive()
    }
}

/// Observer of a job's lifecycle events.
///
/// Implementations must not call back into the job from inside a
/// notification while holding locks the job's accessors take.
pub trait TransportListener: Send + Sync {
    /// The job has begun exchanging changes.
    fn on_started(&self);

    /// Progress counters were updated.
    fn on_progress(&self, changes_processed: i64, changes_total: i64);

    /// The job finished, successfully or not; this is its final event.
    fn on_stopped(&self);
}

/// One running (or runnable) replication job.
pub trait TransportJob: Send + Sync {
    /// Starts the job; events are delivered to the installed listener.
    fn start(&self);

    /// Requests the job stop; termination is observed via `on_stopped`.
    fn stop(&self);

    /// Cancels a job that has not begun running. Returns false when the job
    /// already started, in which case `stop` is the only way out.
    fn cancel_if_not_started(&self) -> bool;

    /// True while the job is exchanging changes.
    fn is_running(&self) -> bool;

    /// The job's failure, once it has one.
    fn error(&self) -> Option<TransportError>;

    /// Number of changes processed so far.
    fn changes_processed(&self) -> i64;

    /// Total number of changes the session will process.
    fn changes_total(&self) -> i64;

    /// Identifier of the replication session, stable across checkpoints.
    fn session_id(&self) -> String;

    /// Installs the lifecycle listener.
    fn set_listener(&self, listener: Arc<dyn TransportListener>);

    /// Removes the lifecycle listener.
    fn clear_listener(&self);
}

impl fmt::Debug for dyn TransportJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportJob")
            .field("session_id", &self.session_id())
            .field("is_running", &self.is_running())
            .finish()
    }
}

/// Builds transport jobs from descriptors.
pub trait Transport: Send + Sync {
    /// Constructs a job for `descriptor` without starting it.
    fn build_job(&self, descriptor: &JobDescriptor) -> Result<Arc<dyn TransportJob>, TransportError>;
}

/// A scriptable transport job for tests.
///
/// Tests drive the lifecycle by calling `emit_*`, which dispatch to the
/// installed listener the way a real transport's worker thread would. The
/// listener is cloned out of the lock before dispatch so a listener may
/// call back into the job.
pub struct MockJob {
    descriptor: JobDescriptor,
    session_id: String,
    running: AtomicBool,
    error: Mutex<Option<TransportError>>,
    changes_processed: AtomicI64,
    changes_total: AtomicI64,
    cancel_result: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
}

impl MockJob {
    fn new(descriptor: JobDescriptor, session_id: String) -> Self {
        Self {
            descriptor,
            session_id,
            running: AtomicBool::new(false),
            error: Mutex::new(None),
            changes_processed: AtomicI64::new(0),
            changes_total: AtomicI64::new(0),
            cancel_result: AtomicBool::new(true),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            listener: Mutex::new(None),
        }
    }

    /// The descriptor this job was built from.
    #[must_use]
    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    /// Number of times `start` was called.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of times `stop` was called.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// True while a listener is installed.
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Scripts the outcome of `cancel_if_not_started`.
    pub fn set_cancel_result(&self, accepted: bool) {
        self.cancel_result.store(accepted, Ordering::SeqCst);
    }

    /// Scripts the error the job exposes once stopped.
    pub fn set_error(&self, error: TransportError) {
        *self.error.lock() = Some(error);
    }

    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.lock().clone()
    }

    /// Delivers the `started` event.
    pub fn emit_started(&self) {
        self.running.store(true, Ordering::SeqCst);
        if let Some(listener) = self.listener() {
            listener.on_started();
        }
    }

    /// Delivers a `progress` event.
    pub fn emit_progress(&self, changes_processed: i64, changes_total: i64) {
        self.running.store(true, Ordering::SeqCst);
        self.changes_processed
            .store(changes_processed, Ordering::SeqCst);
        self.changes_total.store(changes_total, Ordering::SeqCst);
        if let Some(listener) = self.listener() {
            listener.on_progress(changes_processed, changes_total);
        }
    }

    /// Delivers the terminal `stopped` event, optionally with an error.
    pub fn emit_stopped(&self, error: Option<TransportError>) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(error) = error {
            *self.error.lock() = Some(error);
        }
        if let Some(listener) = self.listener() {
            listener.on_stopped();
        }
    }
}

impl TransportJob for MockJob {
    fn start(&self) {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_if_not_started(&self) -> bool {
        !self.running.load(Ordering::SeqCst) && self.cancel_result.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<TransportError> {
        self.error.lock().clone()
    }

    fn changes_processed(&self) -> i64 {
        self.changes_processed.load(Ordering::SeqCst)
    }

    fn changes_total(&self) -> i64 {
        self.changes_total.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn clear_listener(&self) {
        *self.listener.lock() = None;
    }
}

/// A transport that builds [`MockJob`]s.
#[derive(Default)]
pub struct MockTransport {
    jobs: Mutex<Vec<Arc<MockJob>>>,
    fail_builds: AtomicBool,
}

impl MockTransport {
    /// Creates a mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `build_job` calls fail.
    pub fn refuse_builds(&self) {
        self.fail_builds.store(true, Ordering::SeqCst);
    }

    /// Returns the most recently built job.
    #[must_use]
    pub fn last_job(&self) -> Option<Arc<MockJob>> {
        self.jobs.lock().last().cloned()
    }

    /// Number of jobs built so far.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Transport for MockTransport {
    fn build_job(&self, descriptor: &JobDescriptor) -> Result<Arc<dyn TransportJob>, TransportError> {
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(TransportError::new(500, "transport refused construction"));
        }
        let mut jobs = self.jobs.lock();
        let session_id = format!("mock-session-{}", jobs.len());
        let job = Arc::new(MockJob::new(descriptor.clone(), session_id));
        jobs.push(Arc::clone(&job));
        Ok(job)
    }
}
