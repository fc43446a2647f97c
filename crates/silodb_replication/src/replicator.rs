//! The replicator controller.
//!
//! A [`Replicator`] is a fire-and-forget handle over one push or pull
//! replication session. `start()` adapts the configuration into a transport
//! job, subscribes to its lifecycle events, and registers the controller in
//! a process-wide retention registry so the session survives even when the
//! caller drops every handle; completion is then observed only through the
//! delegate. The retention is released exactly once, when the controller
//! reaches a terminal state.
//!
//! All state is guarded by a single per-controller mutex shared by the
//! caller-facing API and the transport's event callbacks. Event handlers
//! mutate state and compute the delegate signals under the mutex, then
//! release it before invoking the delegate.

use crate::config::{Direction, ReplicatorConfig};
use crate::error::{ConfigError, ReplicatorError};
use crate::filter::bridge_push_filter;
use crate::interceptor::SessionCookieInterceptor;
use crate::transport::{JobDescriptor, Transport, TransportJob, TransportListener};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Lifecycle state of a replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    /// Created, or started but not yet reported running by the transport.
    Pending,
    /// The transport is exchanging changes.
    Started,
    /// A stop was requested; waiting for the transport to wind down.
    Stopping,
    /// Stopped before completion.
    Stopped,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Error,
}

impl ReplicatorState {
    /// Returns true for the non-terminal states.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Started | Self::Stopping)
    }

    /// Returns true for the absorbing states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Observer of a replicator's lifecycle.
///
/// All callbacks default to no-ops; implement only the ones you need.
/// Calls are fire-and-forget: the controller does not wait on the delegate
/// and tolerates a dropped one.
pub trait ReplicatorDelegate: Send + Sync {
    /// The replicator's state changed.
    fn did_change_state(&self, replicator: &Replicator) {
        let _ = replicator;
    }

    /// Either progress counter changed.
    fn did_change_progress(&self, replicator: &Replicator) {
        let _ = replicator;
    }

    /// The replicator reached a non-error terminal state via the transport.
    fn did_complete(&self, replicator: &Replicator) {
        let _ = replicator;
    }

    /// The replicator reached the `Error` state.
    fn did_error(&self, replicator: &Replicator, error: &ReplicatorError) {
        let _ = (replicator, error);
    }
}

#[derive(Clone, Copy)]
struct Snapshot {
    state: ReplicatorState,
    changes_processed: i64,
    changes_total: i64,
}

struct Shared {
    state: ReplicatorState,
    started: bool,
    job: Option<Arc<dyn TransportJob>>,
    error: Option<ReplicatorError>,
    changes_processed: i64,
    changes_total: i64,
}

impl Shared {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            changes_processed: self.changes_processed,
            changes_total: self.changes_total,
        }
    }
}

/// Delegate signals computed against the captured old state.
struct Signals {
    state_changed: bool,
    progress_changed: bool,
    completing: bool,
    error: Option<ReplicatorError>,
}

/// Computes the fan-out for a transition from `old` to the current state.
///
/// `completing_eligible` is set only on the event-driven `stopped` path: the
/// synchronous cancel/never-started stop also reaches `Stopped`, but fires
/// only `did_change_state`.
fn compute_signals(old: Snapshot, current: &Shared, completing_eligible: bool) -> Signals {
    let state_changed = old.state != current.state;
    let progress_changed = old.changes_processed != current.changes_processed
        || old.changes_total != current.changes_total;
    let terminal_transition =
        state_changed && old.state.is_active() && current.state.is_terminal();
    Signals {
        state_changed,
        progress_changed,
        completing: completing_eligible
            && terminal_transition
            && current.state != ReplicatorState::Error,
        error: if terminal_transition && current.state == ReplicatorState::Error {
            current.error.clone()
        } else {
            None
        },
    }
}

pub(crate) struct Inner {
    id: u64,
    config: ReplicatorConfig,
    transport: Arc<dyn Transport>,
    shared: Mutex<Shared>,
    delegate: Mutex<Option<Weak<dyn ReplicatorDelegate>>>,
}

/// Process-wide registry that owns running controllers.
///
/// This is the self-retention: an entry keeps the controller alive across
/// asynchronous transport events after the caller has dropped every handle.
/// Dropping a running controller early would abort the session before its
/// checkpoint is persisted, so entries are removed only on the transition
/// into a terminal state.
struct LiveSet {
    slots: Mutex<HashMap<u64, Arc<Inner>>>,
}

impl LiveSet {
    fn global() -> &'static LiveSet {
        static LIVE: OnceLock<LiveSet> = OnceLock::new();
        LIVE.get_or_init(|| LiveSet {
            slots: Mutex::new(HashMap::new()),
        })
    }

    fn retain(&self, inner: Arc<Inner>) {
        self.slots.lock().insert(inner.id, inner);
    }

    fn release(&self, id: u64) {
        self.slots.lock().remove(&id);
    }

    fn contains(&self, id: u64) -> bool {
        self.slots.lock().contains_key(&id)
    }
}

/// Listener installed on the transport job; holds the controller strongly
/// for the duration of each event dispatch.
struct JobListener {
    inner: Arc<Inner>,
}

impl TransportListener for JobListener {
    fn on_started(&self) {
        Inner::handle_started(&self.inner);
    }

    fn on_progress(&self, changes_processed: i64, changes_total: i64) {
        Inner::handle_progress(&self.inner, changes_processed, changes_total);
    }

    fn on_stopped(&self) {
        Inner::handle_stopped(&self.inner);
    }
}

fn build_descriptor(config: &ReplicatorConfig) -> Result<JobDescriptor, ReplicatorError> {
    let local = config
        .local
        .clone()
        .ok_or(ReplicatorError::UndefinedSource)?;
    let remote = config
        .remote
        .clone()
        .filter(|remote| !remote.is_empty())
        .ok_or(ReplicatorError::UndefinedSource)?;

    // Credential promotion: the session-cookie interceptor goes after every
    // user-provided interceptor.
    let mut interceptors = config.http_interceptors.clone();
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        interceptors.push(Arc::new(SessionCookieInterceptor::new(username, password)));
    }

    let push = config.direction == Direction::Push;
    let push_filter = match &config.push_filter {
        Some(filter) if push => Some(bridge_push_filter(Arc::clone(filter))),
        _ => None,
    };

    Ok(JobDescriptor {
        local,
        remote,
        push,
        continuous: false,
        interceptors,
        filter_name: config.filter_name.clone(),
        filter_params: config.filter_params.clone(),
        request_headers: config.optional_headers.clone(),
        push_filter,
        reset: false,
        heartbeat: None,
    })
}

impl Inner {
    fn delegate(&self) -> Option<Arc<dyn ReplicatorDelegate>> {
        let guard = self.delegate.lock();
        guard.as_ref().and_then(Weak::upgrade)
    }

    fn notify(self: &Arc<Self>, signals: Signals) {
        if !signals.state_changed
            && !signals.progress_changed
            && !signals.completing
            && signals.error.is_none()
        {
            return;
        }
        let Some(delegate) = self.delegate() else {
            return;
        };
        let handle = Replicator {
            inner: Arc::clone(self),
        };
        if signals.state_changed {
            delegate.did_change_state(&handle);
        }
        if signals.progress_changed {
            delegate.did_change_progress(&handle);
        }
        if signals.completing {
            delegate.did_complete(&handle);
        }
        if let Some(error) = &signals.error {
            delegate.did_error(&handle, error);
        }
    }

    fn handle_started(inner: &Arc<Self>) {
        let signals = {
            let mut shared = inner.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            let old = shared.snapshot();
            if shared.state == ReplicatorState::Pending {
                shared.state = ReplicatorState::Started;
            }
            compute_signals(old, &shared, false)
        };
        tracing::debug!(id = inner.id, "replication reported started");
        inner.notify(signals);
    }

    fn handle_progress(inner: &Arc<Self>, changes_processed: i64, changes_total: i64) {
        let signals = {
            let mut shared = inner.shared.lock();
            if shared.state.is_terminal() {
                // Late delivery after the terminal state; dropped.
                return;
            }
            let old = shared.snapshot();
            shared.changes_processed = changes_processed;
            shared.changes_total = changes_total;
            let running = shared
                .job
                .as_ref()
                .map_or(false, |job| job.is_running());
            if running && shared.state == ReplicatorState::Pending {
                // Covers a late-delivered started event.
                shared.state = ReplicatorState::Started;
            }
            compute_signals(old, &shared, false)
        };
        inner.notify(signals);
    }

    fn handle_stopped(inner: &Arc<Self>) {
        let (signals, job, final_state) = {
            let mut shared = inner.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            let old = shared.snapshot();
            let job = shared.job.take();
            let transport_error = job.as_ref().and_then(|job| job.error());
            shared.state = match &transport_error {
                Some(_) => ReplicatorState::Error,
                None => match old.state {
                    ReplicatorState::Started => ReplicatorState::Complete,
                    // Stopping, or Pending when a cancellation raced the
                    // transport's own wind-down.
                    _ => ReplicatorState::Stopped,
                },
            };
            if let Some(error) = transport_error {
                shared.error = Some(ReplicatorError::from_transport(error));
            }
            LiveSet::global().release(inner.id);
            (compute_signals(old, &shared, true), job, shared.state)
        };
        if let Some(job) = &job {
            job.clear_listener();
        }
        tracing::debug!(id = inner.id, state = ?final_state, "replication finished");
        inner.notify(signals);
    }
}

/// A fire-and-forget handle driving one replication session.
///
/// Handles are cheap clones over shared state; dropping every handle after
/// `start()` does not abort the session.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<Inner>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Replicator {
    /// Creates a controller over `config`, validating it first.
    ///
    /// The configuration is captured at construction and read-only from
    /// then on.
    pub fn new(config: ReplicatorConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate_headers()?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
                config,
                transport,
                shared: Mutex::new(Shared {
                    state: ReplicatorState::Pending,
                    started: false,
                    job: None,
                    error: None,
                    changes_processed: 0,
                    changes_total: 0,
                }),
                delegate: Mutex::new(None),
            }),
        })
    }

    /// Starts the replication session.
    ///
    /// May be called at most once; any later call, or a call in a
    /// non-`Pending` state, fails with
    /// [`AlreadyStarted`](ReplicatorError::AlreadyStarted) without touching
    /// state. A transport that refuses construction moves the controller to
    /// `Error` and the failure is returned.
    pub fn start(&self) -> Result<(), ReplicatorError> {
        let mut shared = self.inner.shared.lock();
        if shared.started || shared.state != ReplicatorState::Pending {
            return Err(ReplicatorError::AlreadyStarted);
        }
        shared.started = true;
        let old = shared.snapshot();

        let built = build_descriptor(&self.inner.config).and_then(|descriptor| {
            self.inner
                .transport
                .build_job(&descriptor)
                .map_err(|err| ReplicatorError::TransportInitFailed(err.to_string()))
        });

        match built {
            Err(error) => {
                shared.state = ReplicatorState::Error;
                shared.error = Some(error.clone());
                let signals = compute_signals(old, &shared, false);
                drop(shared);
                tracing::warn!(id = self.inner.id, %error, "replication failed to start");
                self.inner.notify(signals);
                Err(error)
            }
            Ok(job) => {
                // Reset before the listener is installed so no progress
                // event can be lost to the reset.
                shared.changes_processed = 0;
                shared.changes_total = 0;
                shared.job = Some(Arc::clone(&job));
                drop(shared);

                LiveSet::global().retain(Arc::clone(&self.inner));
                job.set_listener(Arc::new(JobListener {
                    inner: Arc::clone(&self.inner),
                }));
                job.start();
                tracing::debug!(id = self.inner.id, "replication job started");
                Ok(())
            }
        }
    }

    /// Requests the session stop.
    ///
    /// Safe from any state. Returns `true` once the request is accepted;
    /// `false` from a terminal state, and when a not-yet-running transport
    /// refused cancellation (the session will report started and can then
    /// be stopped normally). Actual termination is observed via the
    /// `stopped` event, except on the synchronous cancel and never-started
    /// paths, which reach `Stopped` directly.
    pub fn stop(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        let old = shared.snapshot();
        match shared.state {
            ReplicatorState::Pending => match shared.job.clone() {
                None => {
                    shared.state = ReplicatorState::Stopped;
                    let signals = compute_signals(old, &shared, false);
                    drop(shared);
                    tracing::debug!(id = self.inner.id, "stopped before start");
                    self.inner.notify(signals);
                    true
                }
                Some(job) => {
                    if job.cancel_if_not_started() {
                        shared.state = ReplicatorState::Stopped;
                        shared.job = None;
                        LiveSet::global().release(self.inner.id);
                        let signals = compute_signals(old, &shared, false);
                        drop(shared);
                        job.clear_listener();
                        tracing::debug!(id = self.inner.id, "cancelled before transport start");
                        self.inner.notify(signals);
                        true
                    } else {
                        // The transport is already under way; it will report
                        // started and can be stopped then.
                        false
                    }
                }
            },
            ReplicatorState::Started => {
                shared.state = ReplicatorState::Stopping;
                let job = shared.job.clone();
                let signals = compute_signals(old, &shared, false);
                drop(shared);
                if let Some(job) = job {
                    job.stop();
                }
                self.inner.notify(signals);
                true
            }
            ReplicatorState::Stopping => true,
            // Terminal: no-op, and the delegate is not notified.
            _ => false,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ReplicatorState {
        self.inner.shared.lock().state
    }

    /// Returns true while the state is non-terminal.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Number of changes processed so far in this session.
    #[must_use]
    pub fn changes_processed(&self) -> i64 {
        self.inner.shared.lock().changes_processed
    }

    /// Total number of changes this session will process.
    #[must_use]
    pub fn changes_total(&self) -> i64 {
        self.inner.shared.lock().changes_total
    }

    /// Returns the controller's error.
    ///
    /// Always `None` while active: non-fatal mid-flight transport errors
    /// are not surfaced. Once terminal, the projected error is available.
    #[must_use]
    pub fn error(&self) -> Option<ReplicatorError> {
        let shared = self.inner.shared.lock();
        if shared.state.is_active() {
            None
        } else {
            shared.error.clone()
        }
    }

    /// Returns the transport's session id once a job exists.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        let job = self.inner.shared.lock().job.clone();
        job.map(|job| job.session_id())
    }

    /// Installs the delegate. The controller keeps only a weak reference.
    pub fn set_delegate<D: ReplicatorDelegate + 'static>(&self, delegate: &Arc<D>) {
        let delegate: Arc<dyn ReplicatorDelegate> = delegate.clone();
        let weak: Weak<dyn ReplicatorDelegate> = Arc::downgrade(&delegate);
        *self.inner.delegate.lock() = Some(weak);
    }

    /// Returns the configuration this controller was built with.
    #[must_use]
    pub fn config(&self) -> &ReplicatorConfig {
        &self.inner.config
    }

    /// True while the process-wide retention registry holds this
    /// controller, i.e. between a successful `start()` and the terminal
    /// state. Diagnostic.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        LiveSet::global().contains(self.inner.id)
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("Replicator")
            .field("id", &self.inner.id)
            .field("state", &shared.state)
            .field("changes_processed", &shared.changes_processed)
            .field("changes_total", &shared.changes_total)
            .finish_non_exhaustive()
    }
}
