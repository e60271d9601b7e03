//! Group references and the data they hand out
//!
//! A [GroupRef](GroupRef) turns one call on the group into one generated call per member
//! (or however many a [CallPartitioner](CallPartitioner) produces), assigns them to
//! member slots according to the active [DispatchMode](DispatchMode), and hands the
//! resulting tasks to its [Dispatcher](Dispatcher).

use crate::{
    config::{DispatchConfig, DispatchOverride, DispatchSettings},
    dispatch::{DispatchError, Dispatcher, Interrupt},
    routing::{AssignmentPolicy, DispatchMode},
    runtime::{default_logger, ActiveContext, Failure, GroupRuntime, MemberKind, WorkerPool},
    tasks::NoSuchMember,
    GroupLogger,
};
#[allow(unused_imports)]
use slog::{debug, info, o, trace, warn};
use std::{
    fmt,
    ops::Range,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

mod factory;
mod members;
mod outcome;

pub use factory::*;
pub use members::*;
pub use outcome::*;

/// A reference to a group of members that can be called as one
///
/// All operations take `&self`, so a group reference can be shared between threads.
/// Each call operates on a snapshot of the member list taken when the call starts.
pub struct GroupRef<R: GroupRuntime> {
    runtime: Arc<R>,
    members: RwLock<Vec<Member<R::Member>>>,
    config: RwLock<DispatchConfig>,
    custom_policy: RwLock<Option<Arc<dyn AssignmentPolicy<R::Call>>>>,
    context: Arc<ActiveContext>,
    factory: TaskFactory<R>,
    dispatcher: Dispatcher,
    interrupt: Interrupt,
    logger: GroupLogger,
}

impl<R: GroupRuntime> GroupRef<R> {
    /// An empty group logging to the [default logger](default_logger)
    pub fn new(runtime: Arc<R>, config: DispatchConfig) -> Self {
        let context = ActiveContext::new("group");
        let logger = default_logger().new(o!("group" => context.id().to_string()));
        let dispatcher = Dispatcher::new(logger.clone());
        Self::assemble(runtime, config, context, dispatcher, logger)
    }

    /// An empty group that logs to `logger`
    pub fn with_logger(runtime: Arc<R>, config: DispatchConfig, logger: GroupLogger) -> Self {
        let context = ActiveContext::new("group");
        let dispatcher = Dispatcher::new(logger.clone());
        Self::assemble(runtime, config, context, dispatcher, logger)
    }

    /// An empty group that runs its tasks on `pool`
    pub fn with_pool(
        runtime: Arc<R>,
        config: DispatchConfig,
        pool: Box<dyn WorkerPool>,
        logger: GroupLogger,
    ) -> Self {
        let context = ActiveContext::new("group");
        let dispatcher = Dispatcher::with_pool(pool, Default::default(), logger.clone());
        Self::assemble(runtime, config, context, dispatcher, logger)
    }

    fn assemble(
        runtime: Arc<R>,
        config: DispatchConfig,
        context: Arc<ActiveContext>,
        dispatcher: Dispatcher,
        logger: GroupLogger,
    ) -> Self {
        let factory = TaskFactory::new(runtime.clone(), context.clone(), logger.clone());
        GroupRef {
            runtime,
            members: RwLock::new(Vec::new()),
            config: RwLock::new(config),
            custom_policy: RwLock::new(None),
            context,
            factory,
            dispatcher,
            interrupt: Interrupt::new(),
            logger,
        }
    }

    fn read_members(&self) -> RwLockReadGuard<'_, Vec<Member<R::Member>>> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_members(&self) -> RwLockWriteGuard<'_, Vec<Member<R::Member>>> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `handle` as a new member and return its slot
    pub fn add_member(&self, handle: R::Member) -> usize {
        let kind = self.runtime.member_kind(&handle);
        self.push_member(Member::live(handle, kind))
    }

    /// Add a placeholder for a member that failed with `failure` and return its slot
    pub fn add_failed_member(&self, failure: Failure) -> usize {
        self.push_member(Member::Failed(failure))
    }

    fn push_member(&self, member: Member<R::Member>) -> usize {
        let mut members = self.write_members();
        members.push(member);
        let slot = members.len() - 1;
        trace!(self.logger, "Added member at slot {}", slot);
        slot
    }

    /// Remove the member at `slot`, shifting all later members down by one
    pub fn remove_member(&self, slot: usize) -> Option<Member<R::Member>> {
        let mut members = self.write_members();
        if slot < members.len() {
            Some(members.remove(slot))
        } else {
            None
        }
    }

    /// The number of members, failed ones included
    pub fn size(&self) -> usize {
        self.read_members().len()
    }

    /// A snapshot of the current members
    pub fn members(&self) -> Vec<Member<R::Member>> {
        self.read_members().clone()
    }

    /// The member at `slot`, if any
    pub fn get(&self, slot: usize) -> Option<Member<R::Member>> {
        self.read_members().get(slot).cloned()
    }

    /// How calls on the member at `slot` are routed, if it is live
    pub fn member_kind(&self, slot: usize) -> Option<MemberKind> {
        self.read_members().get(slot).and_then(Member::kind)
    }

    /// The group-level dispatch defaults
    pub fn config(&self) -> DispatchConfig {
        *self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the group-level dispatch defaults
    pub fn set_config(&self, config: DispatchConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Set the default assignment policy and number of buffered waves
    pub fn set_dispatch_mode(&self, mode: DispatchMode, buffer_size: usize) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.set_mode(mode).set_buffer_size(buffer_size);
        debug!(self.logger, "Dispatch mode set to {} with buffer size {}", mode, buffer_size);
    }

    /// Register the policy used in [Custom](DispatchMode::Custom) mode
    pub fn set_custom_policy(&self, policy: Arc<dyn AssignmentPolicy<R::Call>>) {
        *self.custom_policy.write().unwrap_or_else(|e| e.into_inner()) = Some(policy);
    }

    /// The runtime members of this group live in
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// The context all tasks of this group run under
    pub fn context(&self) -> &Arc<ActiveContext> {
        &self.context
    }

    /// A handle that interrupts a thread currently waiting on a call of this group
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// The number of dispatches performed by this group so far
    pub fn dispatches(&self) -> usize {
        self.dispatcher.dispatches()
    }

    /// The current number of worker pool threads
    pub fn pool_size(&self) -> usize {
        self.dispatcher.pool_size()
    }

    fn plan<P>(
        &self,
        call: &R::Call,
        partitioner: &P,
        call_site: Option<&DispatchOverride>,
    ) -> Result<Plan<R>, DispatchError>
    where
        P: CallPartitioner<R::Call> + ?Sized,
    {
        let members = Arc::new(MemberList::from_members(self.members()));
        let generated = partitioner.partition(call, members.len())?;
        let settings = self.config().resolve(call_site);
        let custom = self
            .custom_policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let slots = settings
            .mode
            .assign(call, &generated, members.len(), custom.as_deref())?;
        trace!(
            self.logger,
            "Planned {} calls over {} members", generated.len(), members.len();
            "mode" => %settings.mode
        );
        Ok(Plan {
            members,
            generated,
            slots,
            settings,
        })
    }

    /// Invoke `call` on the group and collect the outcomes in call order
    ///
    /// The original call is split by `partitioner`, and `call_site` overrides
    /// the group's dispatch defaults for this call only.
    pub fn invoke<P>(
        &self,
        call: R::Call,
        partitioner: &P,
        call_site: Option<&DispatchOverride>,
    ) -> Result<GroupResult<R::Member, R::Value>, DispatchError>
    where
        P: CallPartitioner<R::Call> + ?Sized,
    {
        let plan = self.plan(&call, partitioner, call_site)?;
        let sink = Arc::new(ResultSink::new(plan.generated.len()));
        let batch = self.factory.generate_call_tasks(
            plan.generated,
            &plan.slots,
            plan.members.clone(),
            &sink,
            plan.settings.dynamically_reassignable,
        );
        let completion = self.dispatcher.dispatch_tasks(
            batch.tasks,
            &batch.latch,
            plan.members.len(),
            &plan.settings,
            Some(&self.interrupt),
        )?;
        Ok(GroupResult::new(sink.take_outcomes(), completion))
    }

    /// Invoke `call` on the group without collecting values
    ///
    /// Returns the failures of all attempted calls, which can be turned into an
    /// error with [into_result](ExceptionList::into_result).
    /// Members that had already failed are not called at all.
    pub fn invoke_one_way<P>(
        &self,
        call: R::Call,
        partitioner: &P,
        call_site: Option<&DispatchOverride>,
    ) -> Result<ExceptionList<R::Member>, DispatchError>
    where
        P: CallPartitioner<R::Call> + ?Sized,
    {
        let plan = self.plan(&call, partitioner, call_site)?;
        let exceptions = Arc::new(ExceptionAggregate::new());
        let batch = self.factory.generate_one_way_tasks(
            plan.generated,
            &plan.slots,
            plan.members.clone(),
            &exceptions,
        );
        let completion = self.dispatcher.dispatch_tasks(
            batch.tasks,
            &batch.latch,
            plan.members.len(),
            &plan.settings,
            Some(&self.interrupt),
        )?;
        if !completion.is_finished() {
            debug!(self.logger, "One-way call returned early with {:?}", completion);
        }
        Ok(exceptions.take())
    }

    /// Create one new member per spec and add them to the group
    ///
    /// Members whose creation failed are added as failed placeholders.
    /// Returns the slots of the new members.
    pub fn create_members(
        &self,
        specs: Vec<MemberSpec<R::Args>>,
    ) -> Result<Range<usize>, DispatchError> {
        let existing = self.members();
        let first_slot = existing.len();
        let count = specs.len();
        let members = Arc::new(MemberList::with_empty_slots(existing, count));
        let batch = self
            .factory
            .generate_creation_tasks(specs, first_slot, members.clone());
        let settings = DispatchSettings {
            mode: DispatchMode::StaticRoundRobin,
            buffer_size: 1,
            dynamically_reassignable: false,
            ..self.config().resolve(None)
        };
        let completion = self.dispatcher.dispatch_tasks(
            batch.tasks,
            &batch.latch,
            members.len(),
            &settings,
            Some(&self.interrupt),
        )?;
        if !completion.is_finished() {
            warn!(
                self.logger,
                "Member creation returned early with {:?}, unfinished members are marked failed",
                completion
            );
        }

        let created = members.members_from(first_slot);
        let mut group = self.write_members();
        let start = group.len();
        for (offset, member) in created.into_iter().enumerate() {
            group.push(member.unwrap_or_else(|| {
                Member::Failed(Arc::new(NoSuchMember {
                    slot: first_slot + offset,
                }))
            }));
        }
        debug!(self.logger, "Added {} created members", count);
        Ok(start..start + count)
    }

    /// Shut down the worker pool of this group
    pub fn shutdown(self) -> Result<(), String> {
        self.dispatcher.shutdown()
    }
}

impl<R: GroupRuntime> fmt::Debug for GroupRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GroupRef{{ context={}, members={}, config={:?}, dispatcher={:?} }}",
            self.context,
            self.size(),
            self.config(),
            self.dispatcher
        )
    }
}

struct Plan<R: GroupRuntime> {
    members: Arc<MemberList<R::Member>>,
    generated: Vec<R::Call>,
    slots: Vec<usize>,
    settings: DispatchSettings,
}
