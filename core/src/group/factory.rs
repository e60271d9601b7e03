use super::*;
use crate::tasks::{AsyncCallTask, CreateMemberTask, GroupTask, OneWayCallTask, TaskEnv};
use std::{collections::VecDeque, error::Error, fmt};
use synchronoise::CountdownEvent;

/// Splits an original call into the calls actually sent to members
pub trait CallPartitioner<C>: fmt::Debug {
    /// Produce the generated calls for `original` over a group of `member_count` members.
    fn partition(&self, original: &C, member_count: usize) -> Result<Vec<C>, PartitionError>;
}

/// Sends the same call to every member
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Broadcast;

impl<C: Clone> CallPartitioner<C> for Broadcast {
    fn partition(&self, original: &C, member_count: usize) -> Result<Vec<C>, PartitionError> {
        Ok(vec![original.clone(); member_count])
    }
}

/// Derives any number of calls from the original using a closure
///
/// The number of generated calls may differ from the number of members.
pub struct Scatter<F> {
    splitter: F,
}

impl<F> Scatter<F> {
    /// Create a partitioner from `splitter`
    pub fn new(splitter: F) -> Self {
        Scatter { splitter }
    }
}

impl<F> fmt::Debug for Scatter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scatter{{ splitter: {} }}", std::any::type_name::<F>())
    }
}

impl<C, F> CallPartitioner<C> for Scatter<F>
where
    F: Fn(&C, usize) -> Result<Vec<C>, PartitionError>,
{
    fn partition(&self, original: &C, member_count: usize) -> Result<Vec<C>, PartitionError> {
        (self.splitter)(original, member_count)
    }
}

/// A call could not be split up for the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionError {
    /// What went wrong
    pub message: String,
}
impl PartitionError {
    /// An error with the given `message`
    pub fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        PartitionError {
            message: message.into(),
        }
    }
}
impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not partition call: {}", self.message)
    }
}
impl Error for PartitionError {}

/// Tasks for one group call together with the latch that tracks them
pub struct TaskBatch {
    /// The tasks, in call order
    pub tasks: VecDeque<Box<dyn GroupTask>>,
    /// Counts down once per unit of work
    pub latch: Arc<CountdownEvent>,
}

impl TaskBatch {
    fn sized(units: usize) -> (VecDeque<Box<dyn GroupTask>>, Arc<CountdownEvent>) {
        (VecDeque::new(), Arc::new(CountdownEvent::new(units)))
    }

    /// The total units of work across all tasks
    pub fn units_of_work(&self) -> usize {
        self.tasks.iter().map(|t| t.units_of_work()).sum()
    }
}

impl fmt::Debug for TaskBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBatch")
            .field("tasks", &self.tasks)
            .field("latch", &self.latch.count())
            .finish()
    }
}

/// Turns generated calls into tasks
///
/// The factory sizes the completion latch to the units of work of the tasks it creates,
/// so that waiting on the latch returns exactly when every attempted call has finished.
pub struct TaskFactory<R: GroupRuntime> {
    runtime: Arc<R>,
    context: Arc<ActiveContext>,
    logger: GroupLogger,
}

impl<R: GroupRuntime> TaskFactory<R> {
    /// Create a factory for tasks running under `context`
    pub fn new(runtime: Arc<R>, context: Arc<ActiveContext>, logger: GroupLogger) -> Self {
        TaskFactory {
            runtime,
            context,
            logger,
        }
    }

    fn env(
        &self,
        members: Arc<MemberList<R::Member>>,
        latch: &Arc<CountdownEvent>,
    ) -> Arc<TaskEnv<R>> {
        Arc::new(TaskEnv::new(
            self.runtime.clone(),
            members,
            self.context.clone(),
            latch.clone(),
            self.logger.clone(),
        ))
    }

    /// One result-producing task per generated call
    ///
    /// Call `i` targets `slots[i]` and writes to position `i` of `sink`.
    pub fn generate_call_tasks(
        &self,
        generated: Vec<R::Call>,
        slots: &[usize],
        members: Arc<MemberList<R::Member>>,
        sink: &Arc<ResultSink<R::Member, R::Value>>,
        reassignable: bool,
    ) -> TaskBatch {
        let (mut tasks, latch) = TaskBatch::sized(generated.len());
        let env = self.env(members, &latch);
        for (position, (call, slot)) in generated.into_iter().zip(slots.iter()).enumerate() {
            tasks.push_back(Box::new(AsyncCallTask::new(
                env.clone(),
                call,
                sink.clone(),
                *slot,
                position,
                reassignable,
            )));
        }
        trace!(self.logger, "Generated {} call tasks", tasks.len());
        TaskBatch { tasks, latch }
    }

    /// One one-way task per generated call
    ///
    /// Calls targeting members that have already failed are skipped and do not count
    /// towards the latch.
    pub fn generate_one_way_tasks(
        &self,
        generated: Vec<R::Call>,
        slots: &[usize],
        members: Arc<MemberList<R::Member>>,
        exceptions: &Arc<ExceptionAggregate<R::Member>>,
    ) -> TaskBatch {
        let units = slots
            .iter()
            .take(generated.len())
            .filter(|slot| !members.get(**slot).is_some_and(|m| m.is_failed()))
            .count();
        let (mut tasks, latch) = TaskBatch::sized(units);
        let env = self.env(members, &latch);
        for (position, (call, slot)) in generated.into_iter().zip(slots.iter()).enumerate() {
            tasks.push_back(Box::new(OneWayCallTask::new(
                env.clone(),
                call,
                exceptions.clone(),
                *slot,
                position,
            )));
        }
        trace!(
            self.logger,
            "Generated {} one-way tasks for {} units of work",
            tasks.len(),
            units
        );
        TaskBatch { tasks, latch }
    }

    /// One creation task per spec, filling the slots `first_slot..`
    pub fn generate_creation_tasks(
        &self,
        specs: Vec<MemberSpec<R::Args>>,
        first_slot: usize,
        members: Arc<MemberList<R::Member>>,
    ) -> TaskBatch {
        let (mut tasks, latch) = TaskBatch::sized(specs.len());
        let env = self.env(members, &latch);
        for (position, spec) in specs.into_iter().enumerate() {
            tasks.push_back(Box::new(CreateMemberTask::new(
                env.clone(),
                spec,
                first_slot + position,
                position,
            )));
        }
        trace!(self.logger, "Generated {} creation tasks", tasks.len());
        TaskBatch { tasks, latch }
    }
}

impl<R: GroupRuntime> fmt::Debug for TaskFactory<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskFactory{{ context={} }}", self.context)
    }
}
