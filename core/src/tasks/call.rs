use super::*;
use crate::group::{ExceptionInGroup, GroupOutcome, ResultSink};

/// A result-producing call on a single member
///
/// The outcome is written to its result position in the shared [ResultSink](ResultSink),
/// and the completion latch is counted down exactly once, whatever the outcome.
pub struct AsyncCallTask<R: GroupRuntime> {
    env: Arc<TaskEnv<R>>,
    call: R::Call,
    sink: Arc<ResultSink<R::Member, R::Value>>,
    target_slot: usize,
    result_position: usize,
    reassignable: bool,
}

impl<R: GroupRuntime> AsyncCallTask<R> {
    /// Create a task running `call` on `target_slot`, with its outcome belonging at `result_position`
    pub fn new(
        env: Arc<TaskEnv<R>>,
        call: R::Call,
        sink: Arc<ResultSink<R::Member, R::Value>>,
        target_slot: usize,
        result_position: usize,
        reassignable: bool,
    ) -> Self {
        AsyncCallTask {
            env,
            call,
            sink,
            target_slot,
            result_position,
            reassignable,
        }
    }

    fn outcome(&self) -> GroupOutcome<R::Member, R::Value> {
        let scope = self.env.context.enter();
        match self.env.member(self.target_slot).as_deref() {
            Some(Member::Failed(_)) => {
                trace!(
                    self.env.logger,
                    "Member at slot {} is unavailable", self.target_slot
                );
                GroupOutcome::Unavailable
            }
            Some(Member::Live { handle, kind }) => {
                match self.env.invoke(&scope, handle, *kind, &self.call) {
                    Ok(value) => GroupOutcome::Value(value),
                    Err(e) => {
                        debug!(
                            self.env.logger,
                            "Call on member at slot {} failed: {}", self.target_slot, e
                        );
                        GroupOutcome::Failed(ExceptionInGroup::new(
                            Some(handle.clone()),
                            self.result_position,
                            e,
                        ))
                    }
                }
            }
            None => GroupOutcome::Failed(ExceptionInGroup::new(
                None,
                self.result_position,
                Arc::new(NoSuchMember {
                    slot: self.target_slot,
                }),
            )),
        }
    }
}

impl<R: GroupRuntime> GroupTask for AsyncCallTask<R> {
    fn target_slot(&self) -> usize {
        self.target_slot
    }

    fn set_target_slot(&mut self, slot: usize) {
        self.target_slot = slot;
    }

    fn result_position(&self) -> usize {
        self.result_position
    }

    fn is_dynamically_reassignable(&self) -> bool {
        self.reassignable
    }

    fn run(self: Box<Self>) {
        let outcome = self.outcome();
        if let Err(e) = self.sink.write(self.result_position, outcome) {
            error!(self.env.logger, "Could not record call outcome: {}", e);
        }
        self.env.count_down();
    }
}

impl<R: GroupRuntime> fmt::Debug for AsyncCallTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCallTask")
            .field("call", &self.call)
            .field("target_slot", &self.target_slot)
            .field("result_position", &self.result_position)
            .field("reassignable", &self.reassignable)
            .finish()
    }
}
