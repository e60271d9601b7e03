use super::*;
use crate::group::MemberSpec;

/// Creation of a single group member
///
/// The new member, or a failed placeholder if creation failed,
/// is written into the slot the task targets.
pub struct CreateMemberTask<R: GroupRuntime> {
    env: Arc<TaskEnv<R>>,
    spec: MemberSpec<R::Args>,
    target_slot: usize,
    result_position: usize,
}

impl<R: GroupRuntime> CreateMemberTask<R> {
    /// Create a task that builds a member from `spec` into `target_slot`
    pub fn new(
        env: Arc<TaskEnv<R>>,
        spec: MemberSpec<R::Args>,
        target_slot: usize,
        result_position: usize,
    ) -> Self {
        CreateMemberTask {
            env,
            spec,
            target_slot,
            result_position,
        }
    }

    fn create(&self) -> Member<R::Member> {
        let scope = self.env.context.enter();
        let runtime = &self.env.runtime;
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            runtime.create_member(&scope, &self.spec)
        }));
        let created = res.unwrap_or_else(|e| {
            let message = panic_message(&*e);
            Err(Arc::new(TaskPanicked { message }) as Failure)
        });
        match created {
            Ok(handle) => {
                let kind = runtime.member_kind(&handle);
                debug!(
                    self.env.logger,
                    "Created {} member {:?} at slot {}",
                    self.spec.class_name,
                    handle,
                    self.target_slot
                );
                Member::live(handle, kind)
            }
            Err(e) => {
                warn!(
                    self.env.logger,
                    "Creation of {} member for slot {} failed: {}",
                    self.spec.class_name,
                    self.target_slot,
                    e
                );
                Member::Failed(e)
            }
        }
    }
}

impl<R: GroupRuntime> GroupTask for CreateMemberTask<R> {
    fn target_slot(&self) -> usize {
        self.target_slot
    }

    fn set_target_slot(&mut self, slot: usize) {
        self.target_slot = slot;
    }

    fn result_position(&self) -> usize {
        self.result_position
    }

    fn run(self: Box<Self>) {
        let member = self.create();
        if !self.env.members().set(self.target_slot, member) {
            error!(
                self.env.logger,
                "No slot {} to place the created member in", self.target_slot
            );
        }
        self.env.count_down();
    }
}

impl<R: GroupRuntime> fmt::Debug for CreateMemberTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateMemberTask")
            .field("spec", &self.spec)
            .field("target_slot", &self.target_slot)
            .field("result_position", &self.result_position)
            .finish()
    }
}
