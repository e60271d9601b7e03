//! The boundary towards the active-object runtime
//!
//! Everything the dispatch engine needs from the layer that creates, locates and
//! invokes members is captured by the [GroupRuntime](GroupRuntime) trait.
//! How a call is serialised or transported is entirely up to the implementation.

use crate::{group::MemberSpec, GroupLogger};
use slog::{o, Drain};
use std::{
    borrow::Cow,
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
        OnceLock,
    },
};

mod context;
mod scheduler;

pub use context::*;
pub use scheduler::*;

/// A captured failure of a single member invocation
///
/// Failures are shared between the result sink, exception lists,
/// and failed member placeholders, hence the reference counting.
pub type Failure = Arc<dyn Error + Send + Sync + 'static>;

/// How a member must be invoked
///
/// This is determined once when a member joins a group and cached alongside it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum MemberKind {
    /// A plain value that is invoked directly, without reification.
    Plain,
    /// A reified reference to a member in this process.
    ///
    /// Calls are shallow-copied before reification, so that concurrently running
    /// local invocations never share mutable call state.
    LocalReified,
    /// A reified reference to a member in another process.
    ///
    /// The transport performs its own marshalling copy, so calls are passed by reference.
    RemoteReified,
}

impl MemberKind {
    /// Returns `true` if calls on this kind of member go through reification.
    pub fn is_reified(&self) -> bool {
        !matches!(self, MemberKind::Plain)
    }
}

/// API of the active-object runtime as seen by the dispatch engine
///
/// All invocation methods are synchronous from the point of view of the calling task,
/// and are executed on worker pool threads, never on the group-calling thread.
pub trait GroupRuntime: Send + Sync + 'static {
    /// An opaque member handle (a local object or a remote reference)
    type Member: Clone + Send + Sync + fmt::Debug + 'static;
    /// A reified method call
    type Call: Clone + Send + Sync + fmt::Debug + 'static;
    /// The value returned by a result-producing call
    type Value: Send + 'static;
    /// Constructor arguments for member creation
    type Args: Send + Sync + fmt::Debug + 'static;

    /// Classify `member` as plain, local reified, or remote reified.
    fn member_kind(&self, member: &Self::Member) -> MemberKind;

    /// Execute `call` directly on a plain (non-reified) `member`.
    fn invoke(
        &self,
        ctx: &ActiveContext,
        member: &Self::Member,
        call: &Self::Call,
    ) -> Result<Self::Value, Failure>;

    /// Send `call` to a reified `member` and wait for its outcome.
    ///
    /// Local members receive an owned shallow copy of the call, while remote members
    /// receive a borrowed call that the transport marshals itself.
    fn reify(
        &self,
        ctx: &ActiveContext,
        member: &Self::Member,
        call: Cow<'_, Self::Call>,
    ) -> Result<Self::Value, Failure>;

    /// Create a new member as described by `spec`.
    fn create_member(
        &self,
        ctx: &ActiveContext,
        spec: &MemberSpec<Self::Args>,
    ) -> Result<Self::Member, Failure>;
}

/// A sequence of dispatch numbers scoped to a single group reference
///
/// Each dispatch on a group draws the next number, which is used to label its
/// monitor and log output. Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct DispatchSequence {
    next: Arc<AtomicUsize>,
}

impl DispatchSequence {
    /// Create a new sequence starting at 0
    pub fn new() -> Self {
        DispatchSequence::default()
    }

    /// Return the current number and advance the sequence
    pub fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The number of dispatches drawn from this sequence so far
    pub fn issued(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

static DEFAULT_ROOT_LOGGER: OnceLock<GroupLogger> = OnceLock::new();
static DEFAULT_ROOT_LOGGER_GUARD: Mutex<Option<slog_async::AsyncGuard>> = Mutex::new(None);

/// The process-wide default root logger
///
/// It is created on first use and writes asynchronously to the terminal.
pub fn default_logger() -> &'static GroupLogger {
    DEFAULT_ROOT_LOGGER.get_or_init(|| {
        let decorator = slog_term::TermDecorator::new().stdout().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let (drain, guard) = slog_async::Async::new(drain).chan_size(1024).build_with_guard();
        *DEFAULT_ROOT_LOGGER_GUARD.lock().unwrap_or_else(|e| e.into_inner()) = Some(guard);
        let drain = drain.fuse();
        slog::Logger::root_typed(
            Arc::new(drain),
            o!(
            "location" => slog::PushFnValue(|r: &slog::Record<'_>, ser: slog::PushFnValueSerializer<'_>| {
                ser.emit(format_args!("{}:{}", r.file(), r.line()))
            })
                    ),
        )
    })
}

/// Flushes the global default logger and stops its background thread
///
/// Records logged before this call are written out before it returns.
/// Logging to the default logger afterwards will panic,
/// so make sure you use this only right before exiting the programme.
/// Calling it more than once, or before the logger was ever used, does nothing.
pub fn drop_default_logger() {
    let guard = DEFAULT_ROOT_LOGGER_GUARD.lock().unwrap_or_else(|e| e.into_inner()).take();
    drop(guard);
}
