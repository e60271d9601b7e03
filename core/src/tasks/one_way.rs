use super::*;
use crate::group::{ExceptionAggregate, ExceptionInGroup};

/// A fire-and-forget call on a single member
///
/// Failures are appended to a shared [ExceptionAggregate](ExceptionAggregate),
/// indexed by the member slot the call ran on.
///
/// A task aimed at a member that had already failed when the call was set up
/// is skipped entirely and accounts for no unit of work on the completion latch.
pub struct OneWayCallTask<R: GroupRuntime> {
    env: Arc<TaskEnv<R>>,
    call: R::Call,
    exceptions: Arc<ExceptionAggregate<R::Member>>,
    target_slot: usize,
    result_position: usize,
    skipped: bool,
}

impl<R: GroupRuntime> OneWayCallTask<R> {
    /// Create a task running `call` on `target_slot`
    pub fn new(
        env: Arc<TaskEnv<R>>,
        call: R::Call,
        exceptions: Arc<ExceptionAggregate<R::Member>>,
        target_slot: usize,
        result_position: usize,
    ) -> Self {
        let skipped = Self::targets_failed_member(&env, target_slot);
        OneWayCallTask {
            env,
            call,
            exceptions,
            target_slot,
            result_position,
            skipped,
        }
    }

    /// Returns `true` if the member at `slot` is a failed placeholder
    pub fn targets_failed_member(env: &TaskEnv<R>, slot: usize) -> bool {
        env.member(slot).is_some_and(|m| m.is_failed())
    }
}

impl<R: GroupRuntime> GroupTask for OneWayCallTask<R> {
    fn target_slot(&self) -> usize {
        self.target_slot
    }

    fn set_target_slot(&mut self, slot: usize) {
        self.target_slot = slot;
    }

    fn result_position(&self) -> usize {
        self.result_position
    }

    fn units_of_work(&self) -> usize {
        if self.skipped {
            0
        } else {
            1
        }
    }

    fn run(self: Box<Self>) {
        if self.skipped {
            trace!(
                self.env.logger,
                "Skipping one-way call on failed member at slot {}",
                self.target_slot
            );
            return;
        }
        {
            let scope = self.env.context.enter();
            let failure = match self.env.member(self.target_slot).as_deref() {
                Some(Member::Live { handle, kind }) => self
                    .env
                    .invoke(&scope, handle, *kind, &self.call)
                    .err()
                    .map(|e| ExceptionInGroup::new(Some(handle.clone()), self.target_slot, e)),
                Some(Member::Failed(e)) => Some(ExceptionInGroup::new(
                    None,
                    self.target_slot,
                    e.clone(),
                )),
                None => Some(ExceptionInGroup::new(
                    None,
                    self.target_slot,
                    Arc::new(NoSuchMember {
                        slot: self.target_slot,
                    }),
                )),
            };
            if let Some(failure) = failure {
                debug!(self.env.logger, "One-way call failed: {}", failure);
                self.exceptions.add(failure);
            }
        }
        self.env.count_down();
    }
}

impl<R: GroupRuntime> fmt::Debug for OneWayCallTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneWayCallTask")
            .field("call", &self.call)
            .field("target_slot", &self.target_slot)
            .field("result_position", &self.result_position)
            .field("skipped", &self.skipped)
            .finish()
    }
}
