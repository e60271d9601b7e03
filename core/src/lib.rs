//! The groupcall crate turns a single method invocation on a *group reference*
//! into a set of individually addressed calls, runs them concurrently on a bounded
//! worker pool, and reassembles the outcomes in the caller's original ordering.
//!
//! The active-object runtime that actually reifies and transports calls is not part of
//! this crate. It is plugged in via the [GroupRuntime](runtime::GroupRuntime) trait.
//!
//! To get all groupcall related things into scope import `use groupcall::prelude::*;` instead of `use groupcall::*;`.
//!
//! # Example
//!
//! ```
//! use groupcall::prelude::*;
//! use std::{borrow::Cow, sync::Arc};
//!
//! #[derive(Debug)]
//! struct Doubler;
//! impl GroupRuntime for Doubler {
//!     type Member = u64;
//!     type Call = u64;
//!     type Value = u64;
//!     type Args = u64;
//!
//!     fn member_kind(&self, _member: &u64) -> MemberKind {
//!         MemberKind::Plain
//!     }
//!
//!     fn invoke(&self, _ctx: &ActiveContext, member: &u64, call: &u64) -> Result<u64, Failure> {
//!         Ok(member * call)
//!     }
//!
//!     fn reify(&self, ctx: &ActiveContext, member: &u64, call: Cow<'_, u64>) -> Result<u64, Failure> {
//!         self.invoke(ctx, member, &call)
//!     }
//!
//!     fn create_member(&self, _ctx: &ActiveContext, spec: &MemberSpec<u64>) -> Result<u64, Failure> {
//!         Ok(spec.args)
//!     }
//! }
//!
//! let group = GroupRef::new(Arc::new(Doubler), DispatchConfig::default());
//! for m in 1..=3 {
//!     group.add_member(m);
//! }
//! let result = group.invoke(2, &Broadcast, None).expect("dispatch");
//! assert_eq!(vec![2, 4, 6], result.values().into_iter().map(|v| *v.expect("value")).collect::<Vec<_>>());
//! ```

use slog::{Fuse, Logger};
use slog_async::Async;

pub mod config;
pub mod dispatch;
pub mod group;
pub mod routing;
pub mod runtime;
pub mod tasks;
mod utils;

/// To get all groupcall related things into scope import `use groupcall::prelude::*`.
pub mod prelude {
    pub use slog::{crit, debug, error, info, o, trace, warn, Drain, Fuse, Logger};

    pub use crate::{
        config::{ConfigError, DispatchConfig, DispatchOverride},
        dispatch::{Completion, DispatchError, Dispatcher, Interrupt},
        group::{
            Broadcast,
            CallPartitioner,
            ExceptionAggregate,
            ExceptionInGroup,
            ExceptionList,
            GroupOutcome,
            GroupRef,
            GroupResult,
            Member,
            MemberList,
            MemberSpec,
            PartitionError,
            ResultSink,
            Scatter,
            TaskFactory,
        },
        routing::{AssignmentPolicy, DispatchMode, DispatchMonitor},
        runtime::{
            default_logger,
            ActiveContext,
            ContextScope,
            DispatchSequence,
            ExecutorPool,
            Failure,
            GroupRuntime,
            MemberKind,
            WorkerPool,
        },
        tasks::{GroupTask, TaskPanicked},
        GroupLogger,
    };
}

/// The logger type used throughout the crate.
pub type GroupLogger = Logger<std::sync::Arc<Fuse<Async>>>;
