//! Units of group work
//!
//! A task stands for "invoke on the member at slot *g*, deposit the outcome at position *r*".
//! The target slot may change until the task starts running, the result position never does.

use crate::{
    group::{Member, MemberList},
    runtime::{ActiveContext, Failure, GroupRuntime, MemberKind},
    utils::panic_message,
    GroupLogger,
};
#[allow(unused_imports)]
use slog::{debug, error, trace, warn};
use std::{borrow::Cow, error::Error, fmt, panic, sync::Arc};
use synchronoise::CountdownEvent;

mod call;
mod create;
mod one_way;

pub use call::*;
pub use create::*;
pub use one_way::*;

/// A single unit of group work, as scheduled by the [Dispatcher](crate::dispatch::Dispatcher)
pub trait GroupTask: Send + fmt::Debug {
    /// The member slot this task currently aims at
    fn target_slot(&self) -> usize;

    /// Redirect this task to `slot`
    ///
    /// Only used for dynamically reassignable tasks, right before they run.
    fn set_target_slot(&mut self, slot: usize);

    /// Where the outcome of this task belongs in the caller-visible result sequence
    fn result_position(&self) -> usize;

    /// Whether this task may pick its target slot at execution time
    fn is_dynamically_reassignable(&self) -> bool {
        false
    }

    /// How many counts of the completion latch this task accounts for
    fn units_of_work(&self) -> usize {
        1
    }

    /// Run the task to completion on the current thread
    fn run(self: Box<Self>);
}

/// Everything a task needs besides its own call
///
/// An environment is shared by all tasks of a single group call.
pub struct TaskEnv<R: GroupRuntime> {
    runtime: Arc<R>,
    members: Arc<MemberList<R::Member>>,
    context: Arc<ActiveContext>,
    latch: Arc<CountdownEvent>,
    logger: GroupLogger,
}

impl<R: GroupRuntime> TaskEnv<R> {
    /// Create a new environment
    pub fn new(
        runtime: Arc<R>,
        members: Arc<MemberList<R::Member>>,
        context: Arc<ActiveContext>,
        latch: Arc<CountdownEvent>,
        logger: GroupLogger,
    ) -> Self {
        TaskEnv {
            runtime,
            members,
            context,
            latch,
            logger,
        }
    }

    /// The member list of this group call
    pub fn members(&self) -> &Arc<MemberList<R::Member>> {
        &self.members
    }

    /// The completion latch of this group call
    pub fn latch(&self) -> &Arc<CountdownEvent> {
        &self.latch
    }

    pub(crate) fn member(&self, slot: usize) -> Option<Arc<Member<R::Member>>> {
        self.members.get(slot)
    }

    pub(crate) fn count_down(&self) {
        if let Err(e) = self.latch.decrement() {
            error!(
                self.logger,
                "Completion latch could not be counted down: {:?}", e
            );
        }
    }

    /// Call `call` on `member` in the way its `kind` demands
    ///
    /// Panics in the runtime are caught and reported as [TaskPanicked](TaskPanicked) failures.
    pub(crate) fn invoke(
        &self,
        ctx: &ActiveContext,
        member: &R::Member,
        kind: MemberKind,
        call: &R::Call,
    ) -> Result<R::Value, Failure> {
        let runtime = &self.runtime;
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| match kind {
            MemberKind::Plain => runtime.invoke(ctx, member, call),
            MemberKind::LocalReified => runtime.reify(ctx, member, Cow::Owned(call.clone())),
            MemberKind::RemoteReified => runtime.reify(ctx, member, Cow::Borrowed(call)),
        }));
        res.unwrap_or_else(|e| {
            let message = panic_message(&*e);
            error!(self.logger, "Invocation on {:?} panicked with: {}", member, message);
            Err(Arc::new(TaskPanicked { message }) as Failure)
        })
    }
}

impl<R: GroupRuntime> fmt::Debug for TaskEnv<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskEnv{{ members={}, context={}, pending={} }}",
            self.members.len(),
            self.context,
            self.latch.count()
        )
    }
}

/// The failure recorded when an invocation panics instead of returning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanicked {
    /// The panic payload, if it was a string
    pub message: String,
}
impl fmt::Display for TaskPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invocation panicked: {}", self.message)
    }
}
impl Error for TaskPanicked {}

/// The failure recorded when a task targets a slot that holds no member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSuchMember {
    /// The empty or missing slot
    pub slot: usize,
}
impl fmt::Display for NoSuchMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "There is no member at slot {}", self.slot)
    }
}
impl Error for NoSuchMember {}

#[cfg(test)]
pub(crate) mod test_runtime {
    use super::*;
    use crate::group::MemberSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A runtime over integer members, where calls are multipliers.
    ///
    /// Members that are multiples of 5 fail, member 13 panics.
    #[derive(Debug, Default)]
    pub struct Arith {
        pub copies: AtomicUsize,
        pub borrowed: AtomicUsize,
        pub plain: AtomicUsize,
    }

    #[derive(Debug)]
    pub struct Refused(pub u64);
    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "member {} refused", self.0)
        }
    }
    impl Error for Refused {}

    impl Arith {
        fn compute(&self, member: u64, call: u64) -> Result<u64, Failure> {
            if member == 13 {
                panic!("unlucky member");
            }
            if member % 5 == 0 {
                Err(Arc::new(Refused(member)))
            } else {
                Ok(member * call)
            }
        }
    }

    impl GroupRuntime for Arith {
        type Member = u64;
        type Call = u64;
        type Value = u64;
        type Args = u64;

        fn member_kind(&self, member: &u64) -> MemberKind {
            match member % 3 {
                0 => MemberKind::Plain,
                1 => MemberKind::LocalReified,
                _ => MemberKind::RemoteReified,
            }
        }

        fn invoke(&self, _ctx: &ActiveContext, member: &u64, call: &u64) -> Result<u64, Failure> {
            self.plain.fetch_add(1, Ordering::SeqCst);
            self.compute(*member, *call)
        }

        fn reify(
            &self,
            _ctx: &ActiveContext,
            member: &u64,
            call: Cow<'_, u64>,
        ) -> Result<u64, Failure> {
            match call {
                Cow::Owned(_) => self.copies.fetch_add(1, Ordering::SeqCst),
                Cow::Borrowed(_) => self.borrowed.fetch_add(1, Ordering::SeqCst),
            };
            self.compute(*member, *call)
        }

        fn create_member(
            &self,
            _ctx: &ActiveContext,
            spec: &MemberSpec<u64>,
        ) -> Result<u64, Failure> {
            if spec.args % 5 == 0 {
                Err(Arc::new(Refused(spec.args)))
            } else {
                Ok(spec.args)
            }
        }
    }
}
