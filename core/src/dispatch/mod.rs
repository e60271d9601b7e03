//! Scheduling of group tasks onto the worker pool
//!
//! A dispatch happens in two phases.
//! First, up to `buffer_size` *buffered waves* are submitted, each of which contains
//! at most one task per member slot. Tasks whose slot is already taken in the current
//! wave are put back at the end of the queue.
//! Then all remaining tasks are submitted as *overflow*. Overflow tasks that are
//! dynamically reassignable pick a free slot from the [DispatchMonitor](DispatchMonitor)
//! when they start running, all others keep their assigned slot.
//!
//! Finally the calling thread waits until every unit of work has counted down
//! the completion latch, or until it is interrupted.

use crate::{
    config::DispatchSettings,
    group::PartitionError,
    routing::DispatchMonitor,
    runtime::{DispatchSequence, ExecutorPool, Job, WorkerPool},
    tasks::GroupTask,
    GroupLogger,
};
#[allow(unused_imports)]
use slog::{debug, error, info, trace, warn};
use std::{
    collections::{BTreeSet, VecDeque},
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use synchronoise::CountdownEvent;

const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors that prevent a group call from being dispatched
///
/// None of these are raised once tasks have started running,
/// except for [IncorrectTaskAllocation](DispatchError::IncorrectTaskAllocation),
/// which may leave the tasks of earlier waves running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The buffered phase could not place any remaining task without reusing a slot.
    IncorrectTaskAllocation {
        /// The buffered wave that got stuck
        wave: usize,
        /// The number of tasks still queued
        remaining: usize,
    },
    /// A task targets a slot beyond the member list.
    SlotOutOfRange {
        /// The result position of the offending task
        position: usize,
        /// The slot it targets
        slot: usize,
        /// The number of member slots
        members: usize,
    },
    /// [Custom](crate::routing::DispatchMode::Custom) mode was requested without registering a policy.
    MissingCustomPolicy,
    /// A custom policy did not return one slot per generated call.
    PolicySizeMismatch {
        /// The number of generated calls
        expected: usize,
        /// The number of slots the policy returned
        actual: usize,
    },
    /// The original call could not be partitioned.
    Partition(PartitionError),
}

impl From<PartitionError> for DispatchError {
    fn from(error: PartitionError) -> Self {
        DispatchError::Partition(error)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::IncorrectTaskAllocation { wave, remaining } => write!(
                f,
                "Incorrect task allocation: no free slot for any of the {} remaining tasks \
                 in buffered wave {}",
                remaining, wave
            ),
            DispatchError::SlotOutOfRange {
                position,
                slot,
                members,
            } => write!(
                f,
                "Task for result position {} targets slot {}, but the group only has {} members",
                position, slot, members
            ),
            DispatchError::MissingCustomPolicy => {
                write!(f, "Custom dispatch mode requires a registered assignment policy")
            }
            DispatchError::PolicySizeMismatch { expected, actual } => write!(
                f,
                "Assignment policy returned {} slots for {} calls",
                actual, expected
            ),
            DispatchError::Partition(e) => write!(f, "{}", e),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DispatchError::Partition(e) => Some(e),
            _ => None,
        }
    }
}

/// How the wait for a dispatch ended
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Completion {
    /// Every unit of work completed.
    Finished,
    /// The wait was interrupted while work was still pending.
    ///
    /// Pending tasks keep running and may still write their outcomes.
    Interrupted {
        /// Units of work that had not completed yet
        pending: usize,
    },
}

impl Completion {
    /// Returns `true` if every unit of work completed
    pub fn is_finished(&self) -> bool {
        matches!(self, Completion::Finished)
    }
}

/// A cooperative interruption flag for threads waiting on a dispatch
///
/// Clones share the same flag.
/// An interruption is consumed by the wait that observes it.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A fresh, unset flag
    pub fn new() -> Self {
        Interrupt::default()
    }

    /// Ask the waiting thread to stop waiting
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if an interruption is pending
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Drop a pending interruption
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

/// The number of pool threads for a group of `nb_members` members
///
/// That is `ceil(nb_members / ratio) + additional`, or just `additional` if `ratio` is 0.
pub fn optimal_pool_size(nb_members: usize, ratio: usize, additional: usize) -> usize {
    if ratio == 0 {
        additional
    } else {
        nb_members.div_ceil(ratio) + additional
    }
}

impl DispatchSettings {
    /// The number of pool threads for a group of `nb_members` members under these settings
    pub fn optimal_pool_size(&self, nb_members: usize) -> usize {
        optimal_pool_size(nb_members, self.member_to_thread_ratio, self.additional_threads)
    }
}

/// Runs group tasks on a resizable worker pool and waits for their completion
pub struct Dispatcher {
    pool: Box<dyn WorkerPool>,
    sequence: DispatchSequence,
    logger: GroupLogger,
}

impl Dispatcher {
    /// A dispatcher on top of a fresh [ExecutorPool](ExecutorPool)
    ///
    /// The pool starts with a single thread and is resized on every dispatch.
    pub fn new(logger: GroupLogger) -> Self {
        Dispatcher::with_pool(
            Box::new(ExecutorPool::with_threads(1)),
            DispatchSequence::new(),
            logger,
        )
    }

    /// A dispatcher on top of a custom `pool`, numbering its dispatches from `sequence`
    pub fn with_pool(
        pool: Box<dyn WorkerPool>,
        sequence: DispatchSequence,
        logger: GroupLogger,
    ) -> Self {
        Dispatcher {
            pool,
            sequence,
            logger,
        }
    }

    /// The current number of pool threads
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// The number of dispatches performed so far
    pub fn dispatches(&self) -> usize {
        self.sequence.issued()
    }

    /// Shut the worker pool down
    pub fn shutdown(&self) -> Result<(), String> {
        self.pool.shutdown()
    }

    /// Submit `tasks` for a group of `member_count` members, and wait for `done` to open.
    ///
    /// `done` must have been sized to the total units of work of `tasks`.
    /// If `interrupt` is given, the wait stops early once it is triggered.
    pub fn dispatch_tasks(
        &self,
        mut tasks: VecDeque<Box<dyn GroupTask>>,
        done: &Arc<CountdownEvent>,
        member_count: usize,
        settings: &DispatchSettings,
        interrupt: Option<&Interrupt>,
    ) -> Result<Completion, DispatchError> {
        if let Some(task) = tasks.iter().find(|t| t.target_slot() >= member_count) {
            return Err(DispatchError::SlotOutOfRange {
                position: task.result_position(),
                slot: task.target_slot(),
                members: member_count,
            });
        }

        let dispatch_id = self.sequence.next_index();
        let threads = settings.optimal_pool_size(member_count);
        self.pool.resize(threads);
        debug!(
            self.logger,
            "Dispatching {} tasks over {} members", tasks.len(), member_count;
            "dispatch" => dispatch_id,
            "mode" => %settings.mode,
            "threads" => self.pool.size()
        );

        let monitor = if settings.mode.is_monitored()
            || tasks.iter().any(|t| t.is_dynamically_reassignable())
        {
            Some(Arc::new(DispatchMonitor::new(
                dispatch_id,
                member_count,
                self.logger.clone(),
            )))
        } else {
            None
        };

        self.submit_buffered(&mut tasks, member_count, settings.buffer_size, &monitor)?;
        self.submit_overflow(tasks, &monitor);

        let completion = self.wait(done, interrupt);
        trace!(self.logger, "Dispatch finished with {:?}", completion; "dispatch" => dispatch_id);
        Ok(completion)
    }

    fn submit_buffered(
        &self,
        tasks: &mut VecDeque<Box<dyn GroupTask>>,
        member_count: usize,
        buffer_size: usize,
        monitor: &Option<Arc<DispatchMonitor>>,
    ) -> Result<(), DispatchError> {
        for wave in 0..buffer_size {
            if tasks.is_empty() {
                break;
            }
            let mut already_targeted = BTreeSet::new();
            for _ in 0..member_count {
                let mut iterations = 0usize;
                while let Some(task) = tasks.pop_front() {
                    let slot = task.target_slot();
                    if already_targeted.insert(slot) {
                        trace!(self.logger, "Wave {}: submitting {:?}", wave, task);
                        self.pool.execute(buffered_job(task, monitor.clone()));
                        break;
                    }
                    tasks.push_back(task);
                    iterations += 1;
                    if iterations > tasks.len() {
                        error!(
                            self.logger,
                            "No task among the {} remaining ones fits into wave {}",
                            tasks.len(),
                            wave
                        );
                        return Err(DispatchError::IncorrectTaskAllocation {
                            wave,
                            remaining: tasks.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn submit_overflow(
        &self,
        tasks: VecDeque<Box<dyn GroupTask>>,
        monitor: &Option<Arc<DispatchMonitor>>,
    ) {
        if !tasks.is_empty() {
            trace!(self.logger, "Submitting {} overflow tasks", tasks.len());
        }
        for task in tasks {
            let job = match monitor {
                Some(monitor) if task.is_dynamically_reassignable() => {
                    dynamic_job(task, monitor.clone())
                }
                _ => buffered_job(task, monitor.clone()),
            };
            self.pool.execute(job);
        }
    }

    fn wait(&self, done: &CountdownEvent, interrupt: Option<&Interrupt>) -> Completion {
        match interrupt {
            None => {
                done.wait();
                Completion::Finished
            }
            Some(interrupt) => loop {
                let pending = done.wait_timeout(INTERRUPT_POLL_INTERVAL);
                if pending == 0 {
                    return Completion::Finished;
                }
                if interrupt.take() {
                    warn!(
                        self.logger,
                        "Interrupted while waiting for {} pending units of work", pending
                    );
                    return Completion::Interrupted { pending };
                }
            },
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dispatcher{{ threads={}, dispatches={} }}",
            self.pool.size(),
            self.sequence.issued()
        )
    }
}

/// Runs `task` on its assigned slot, reporting occupation to `monitor` if present.
///
/// Occupation is registered on the pool thread, right before the task runs.
fn buffered_job(task: Box<dyn GroupTask>, monitor: Option<Arc<DispatchMonitor>>) -> Job {
    Box::new(move || match monitor {
        Some(monitor) => {
            let slot = task.target_slot();
            monitor.occupy(slot);
            monitor.dispatched_task(task.as_ref());
            let start = Instant::now();
            task.run();
            monitor.release(slot, start.elapsed());
        }
        None => task.run(),
    })
}

/// Runs `task` on whichever slot `monitor` hands out when the job starts.
fn dynamic_job(mut task: Box<dyn GroupTask>, monitor: Arc<DispatchMonitor>) -> Job {
    Box::new(move || match monitor.get_worker() {
        Some(slot) => {
            task.set_target_slot(slot);
            monitor.dispatched_task(task.as_ref());
            let start = Instant::now();
            task.run();
            monitor.release(slot, start.elapsed());
        }
        None => task.run(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{routing::DispatchMode, runtime::default_logger};
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::Mutex;

    /// Runs every job inline on the submitting thread.
    #[derive(Debug, Default)]
    struct InlinePool {
        sizes: Mutex<Vec<usize>>,
    }

    impl WorkerPool for InlinePool {
        fn execute(&self, job: Job) {
            job()
        }

        fn resize(&self, threads: usize) {
            self.sizes.lock().expect("sizes").push(threads);
        }

        fn size(&self) -> usize {
            self.sizes.lock().expect("sizes").last().copied().unwrap_or(0)
        }

        fn shutdown(&self) -> Result<(), String> {
            Ok(())
        }
    }

    struct Probe {
        slot: usize,
        position: usize,
        reassignable: bool,
        latch: Arc<CountdownEvent>,
        runs: Sender<(usize, usize)>,
        gate: Option<Receiver<()>>,
    }

    impl fmt::Debug for Probe {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Probe{{ slot={}, position={} }}", self.slot, self.position)
        }
    }

    impl GroupTask for Probe {
        fn target_slot(&self) -> usize {
            self.slot
        }

        fn set_target_slot(&mut self, slot: usize) {
            self.slot = slot;
        }

        fn result_position(&self) -> usize {
            self.position
        }

        fn is_dynamically_reassignable(&self) -> bool {
            self.reassignable
        }

        fn run(self: Box<Self>) {
            if let Some(gate) = &self.gate {
                gate.recv().expect("gate");
            }
            self.runs.send((self.position, self.slot)).expect("send");
            self.latch.decrement().expect("decrement");
        }
    }

    fn probes(
        slots: &[usize],
        reassignable: bool,
    ) -> (
        VecDeque<Box<dyn GroupTask>>,
        Arc<CountdownEvent>,
        Receiver<(usize, usize)>,
    ) {
        let latch = Arc::new(CountdownEvent::new(slots.len()));
        let (tx, rx) = unbounded();
        let tasks = slots
            .iter()
            .enumerate()
            .map(|(position, slot)| {
                Box::new(Probe {
                    slot: *slot,
                    position,
                    reassignable,
                    latch: latch.clone(),
                    runs: tx.clone(),
                    gate: None,
                }) as Box<dyn GroupTask>
            })
            .collect();
        (tasks, latch, rx)
    }

    fn inline_dispatcher() -> Dispatcher {
        Dispatcher::with_pool(
            Box::new(InlinePool::default()),
            DispatchSequence::new(),
            default_logger().clone(),
        )
    }

    fn settings(mode: DispatchMode, buffer_size: usize) -> DispatchSettings {
        DispatchSettings {
            mode,
            buffer_size,
            ..DispatchSettings::default()
        }
    }

    #[test]
    fn pool_sizing() {
        assert_eq!(3, optimal_pool_size(0, 4, 3));
        assert_eq!(4, optimal_pool_size(1, 4, 3));
        assert_eq!(4, optimal_pool_size(4, 4, 3));
        assert_eq!(5, optimal_pool_size(5, 4, 3));
        assert_eq!(28, optimal_pool_size(100, 4, 3));
        assert_eq!(3, optimal_pool_size(100, 0, 3));
        assert_eq!(0, optimal_pool_size(100, 0, 0));
        assert_eq!(28, DispatchSettings::default().optimal_pool_size(100));
    }

    #[test]
    fn waves_hold_one_task_per_slot() {
        let dispatcher = inline_dispatcher();
        let (tasks, latch, runs) = probes(&[0, 0, 0, 1, 1, 1], false);
        let res = dispatcher.dispatch_tasks(
            tasks,
            &latch,
            2,
            &settings(DispatchMode::StaticRoundRobin, 2),
            None,
        );
        assert_eq!(Ok(Completion::Finished), res);
        let order: Vec<usize> = runs.try_iter().map(|(position, _)| position).collect();
        assert_eq!(vec![0, 3, 4, 1, 2, 5], order);
        assert_eq!(1, dispatcher.dispatches());
    }

    #[test]
    fn zero_buffer_is_all_overflow() {
        let dispatcher = inline_dispatcher();
        let (tasks, latch, runs) = probes(&[1, 1, 0], false);
        let res = dispatcher.dispatch_tasks(
            tasks,
            &latch,
            2,
            &settings(DispatchMode::StaticRoundRobin, 0),
            None,
        );
        assert_eq!(Ok(Completion::Finished), res);
        let order: Vec<usize> = runs.try_iter().map(|(position, _)| position).collect();
        assert_eq!(vec![0, 1, 2], order);
    }

    #[test]
    fn empty_dispatch_returns_immediately() {
        let dispatcher = inline_dispatcher();
        let (tasks, latch, _runs) = probes(&[], false);
        let res = dispatcher.dispatch_tasks(tasks, &latch, 4, &DispatchSettings::default(), None);
        assert_eq!(Ok(Completion::Finished), res);
        assert_eq!(4, dispatcher.pool_size());
    }

    #[test]
    fn stuck_wave_is_an_allocation_error() {
        let dispatcher = inline_dispatcher();
        let (tasks, latch, _runs) = probes(&[0, 0], false);
        let res = dispatcher.dispatch_tasks(
            tasks,
            &latch,
            2,
            &settings(DispatchMode::Custom, 1),
            None,
        );
        assert_eq!(
            Err(DispatchError::IncorrectTaskAllocation {
                wave: 0,
                remaining: 1
            }),
            res
        );
    }

    #[test]
    fn out_of_range_slots_are_rejected_before_submission() {
        let dispatcher = inline_dispatcher();
        let (tasks, latch, runs) = probes(&[0, 3], false);
        let res = dispatcher.dispatch_tasks(tasks, &latch, 2, &DispatchSettings::default(), None);
        assert_eq!(
            Err(DispatchError::SlotOutOfRange {
                position: 1,
                slot: 3,
                members: 2
            }),
            res
        );
        assert!(runs.try_recv().is_err());
        assert_eq!(2, latch.count());
    }

    #[test]
    fn dynamic_overflow_is_reassigned() {
        let dispatcher = inline_dispatcher();
        let (tasks, latch, runs) = probes(&[0, 1, 0, 1, 0, 1], true);
        let res = dispatcher.dispatch_tasks(
            tasks,
            &latch,
            2,
            &settings(DispatchMode::Dynamic, 1),
            None,
        );
        assert_eq!(Ok(Completion::Finished), res);
        let observed: Vec<(usize, usize)> = runs.try_iter().collect();
        assert_eq!(6, observed.len());
        assert_eq!((0, 0), observed[0]);
        assert_eq!((1, 1), observed[1]);
        assert!(observed.iter().all(|(_, slot)| *slot < 2));
    }

    #[test]
    fn interrupt_flag_is_shared() {
        let interrupt = Interrupt::new();
        let other = interrupt.clone();
        other.interrupt();
        assert!(interrupt.is_interrupted());
        interrupt.clear();
        assert!(!other.is_interrupted());
    }

    #[test]
    fn interrupted_wait() {
        let dispatcher = Dispatcher::new(default_logger().clone());
        let latch = Arc::new(CountdownEvent::new(1));
        let (tx, rx) = unbounded();
        let (open, gate) = unbounded();
        let mut tasks: VecDeque<Box<dyn GroupTask>> = VecDeque::new();
        tasks.push_back(Box::new(Probe {
            slot: 0,
            position: 0,
            reassignable: false,
            latch: latch.clone(),
            runs: tx,
            gate: Some(gate),
        }));
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let res = dispatcher.dispatch_tasks(
            tasks,
            &latch,
            1,
            &DispatchSettings::default(),
            Some(&interrupt),
        );
        assert_eq!(Ok(Completion::Interrupted { pending: 1 }), res);
        assert!(!interrupt.is_interrupted());

        open.send(()).expect("open");
        assert_eq!((0, 0), rx.recv_timeout(Duration::from_secs(5)).expect("run"));
        latch.wait();
        dispatcher.shutdown().expect("shutdown");
    }

    #[test]
    fn pool_is_resized_per_dispatch() {
        let dispatcher = Dispatcher::new(default_logger().clone());
        let (tasks, latch, runs) = probes(&[0, 1, 2, 3, 4], false);
        let res = dispatcher.dispatch_tasks(tasks, &latch, 5, &DispatchSettings::default(), None);
        assert_eq!(Ok(Completion::Finished), res);
        assert_eq!(5, dispatcher.pool_size());
        assert_eq!(5, runs.try_iter().count());
        dispatcher.shutdown().expect("shutdown");
    }
}
