use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use uuid::Uuid;

/// The identity of the caller a group invocation originates from
///
/// Tasks run on pool threads, not on the group-calling thread.
/// Every task therefore enters the originating context explicitly
/// and hands it to the runtime, so that reified calls still resolve
/// to the correct caller.
#[derive(Debug)]
pub struct ActiveContext {
    id: Uuid,
    caller: String,
    active_scopes: AtomicUsize,
}

impl ActiveContext {
    /// Create a fresh context for the caller named `caller`
    pub fn new<I>(caller: I) -> Arc<Self>
    where
        I: Into<String>,
    {
        Arc::new(ActiveContext {
            id: Uuid::new_v4(),
            caller: caller.into(),
            active_scopes: AtomicUsize::new(0),
        })
    }

    /// The unique id of this context
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The name of the originating caller
    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Enter this context for the duration of the returned scope
    ///
    /// The scope is released when dropped, including during unwinding.
    pub fn enter(self: &Arc<Self>) -> ContextScope {
        self.active_scopes.fetch_add(1, Ordering::SeqCst);
        ContextScope {
            context: self.clone(),
        }
    }

    /// The number of scopes currently holding this context
    pub fn active_scopes(&self) -> usize {
        self.active_scopes.load(Ordering::SeqCst)
    }
}

impl fmt::Display for ActiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.caller, self.id)
    }
}

/// An entered [ActiveContext](ActiveContext)
#[derive(Debug)]
#[must_use = "The context is released as soon as the scope is dropped."]
pub struct ContextScope {
    context: Arc<ActiveContext>,
}

impl Deref for ContextScope {
    type Target = ActiveContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.context.active_scopes.fetch_sub(1, Ordering::SeqCst);
    }
}
