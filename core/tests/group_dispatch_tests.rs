use crossbeam_channel::{unbounded, Receiver};
use groupcall::prelude::*;
use std::{
    borrow::Cow,
    collections::HashSet,
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    thread,
    time::Duration,
};

const GATE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug)]
struct Refused(u32);
impl fmt::Display for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member {} refused the call", self.0)
    }
}
impl Error for Refused {}

/// A runtime over numbered members whose calls return `(member, call)`
#[derive(Debug, Default)]
struct Lab {
    slow_down: Option<u32>,
    failing: HashSet<u32>,
    gate: Option<Receiver<()>>,
    copies: AtomicUsize,
    borrowed: AtomicUsize,
    plain: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    completions: Mutex<Vec<u32>>,
}

impl Lab {
    /// Member `m` of `members` takes longer the lower `m` is.
    fn reversed(members: u32) -> Self {
        Lab {
            slow_down: Some(members),
            ..Default::default()
        }
    }

    fn failing<I>(members: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Lab {
            failing: members.into_iter().collect(),
            ..Default::default()
        }
    }

    fn gated(gate: Receiver<()>) -> Self {
        Lab {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn run(&self, ctx: &ActiveContext, member: u32, call: u32) -> Result<(u32, u32), Failure> {
        assert!(ctx.active_scopes() > 0, "invoked outside of an active scope");
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.recv_timeout(GATE_TIMEOUT).expect("gate");
        }
        if let Some(n) = self.slow_down {
            thread::sleep(Duration::from_millis(
                u64::from(n.saturating_sub(member)) * 15,
            ));
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completions.lock().expect("completions").push(member);
        if self.failing.contains(&member) {
            Err(Arc::new(Refused(member)))
        } else {
            Ok((member, call))
        }
    }

    fn completions(&self) -> Vec<u32> {
        self.completions.lock().expect("completions").clone()
    }
}

impl GroupRuntime for Lab {
    type Member = u32;
    type Call = u32;
    type Value = (u32, u32);
    type Args = u32;

    fn member_kind(&self, member: &u32) -> MemberKind {
        match member % 3 {
            0 => MemberKind::Plain,
            1 => MemberKind::LocalReified,
            _ => MemberKind::RemoteReified,
        }
    }

    fn invoke(&self, ctx: &ActiveContext, member: &u32, call: &u32) -> Result<(u32, u32), Failure> {
        self.plain.fetch_add(1, Ordering::SeqCst);
        self.run(ctx, *member, *call)
    }

    fn reify(
        &self,
        ctx: &ActiveContext,
        member: &u32,
        call: Cow<'_, u32>,
    ) -> Result<(u32, u32), Failure> {
        match call {
            Cow::Owned(_) => self.copies.fetch_add(1, Ordering::SeqCst),
            Cow::Borrowed(_) => self.borrowed.fetch_add(1, Ordering::SeqCst),
        };
        self.run(ctx, *member, *call)
    }

    fn create_member(&self, _ctx: &ActiveContext, spec: &MemberSpec<u32>) -> Result<u32, Failure> {
        if self.failing.contains(&spec.args) {
            Err(Arc::new(Refused(spec.args)))
        } else {
            Ok(spec.args)
        }
    }
}

fn group_of(lab: Lab, members: u32) -> GroupRef<Lab> {
    let group = GroupRef::new(Arc::new(lab), DispatchConfig::default());
    for m in 0..members {
        group.add_member(m);
    }
    group
}

/// Produces the calls `0..calls`, whatever the group size.
fn numbered(calls: u32) -> impl CallPartitioner<u32> {
    Scatter::new(move |_original: &u32, _members: usize| {
        Ok::<Vec<u32>, PartitionError>((0..calls).collect())
    })
}

fn calls_in_order(result: &GroupResult<u32, (u32, u32)>) -> Vec<u32> {
    result
        .values()
        .into_iter()
        .map(|v| v.expect("value").1)
        .collect()
}

#[derive(Debug)]
struct LastMember;
impl AssignmentPolicy<u32> for LastMember {
    fn assign(&self, _original: &u32, generated: &[u32], worker_count: usize) -> Vec<usize> {
        vec![worker_count - 1; generated.len()]
    }
}

#[test]
fn results_follow_call_order_not_completion_order() {
    let members = 6;
    let group = group_of(Lab::reversed(members), members);
    let result = group.invoke(7, &Broadcast, None).expect("result");
    assert!(result.completion().is_finished());

    let values: Vec<(u32, u32)> = result
        .values()
        .into_iter()
        .map(|v| *v.expect("value"))
        .collect();
    let expected: Vec<(u32, u32)> = (0..members).map(|m| (m, 7)).collect();
    assert_eq!(expected, values);

    let completions = group.runtime().completions();
    assert_eq!(members as usize, completions.len());
    assert_eq!(Some(&0), completions.last());
    assert_eq!(0, group.context().active_scopes());
    group.shutdown().expect("shutdown");
}

#[test]
fn members_run_concurrently() {
    let members = 8;
    let group = group_of(Lab::reversed(members), members);
    group.invoke(1, &Broadcast, None).expect("result");
    assert!(group.runtime().max_running.load(Ordering::SeqCst) > 1);
    assert_eq!(5, group.pool_size());
}

#[test]
fn reification_depends_on_member_kind() {
    let group = group_of(Lab::default(), 6);
    group.invoke(1, &Broadcast, None).expect("result");
    let lab = group.runtime();
    assert_eq!(2, lab.plain.load(Ordering::SeqCst));
    assert_eq!(2, lab.copies.load(Ordering::SeqCst));
    assert_eq!(2, lab.borrowed.load(Ordering::SeqCst));
}

#[test]
fn overflow_calls_keep_their_positions() {
    let group = group_of(Lab::reversed(3), 3);
    for buffer_size in 0..3 {
        let call_site = DispatchOverride::with_mode(DispatchMode::StaticRoundRobin, buffer_size);
        let result = group
            .invoke(0, &numbered(10), Some(&call_site))
            .expect("result");
        assert_eq!((0..10).collect::<Vec<u32>>(), calls_in_order(&result));
        for (position, value) in result.values().into_iter().enumerate() {
            assert_eq!(position as u32 % 3, value.expect("value").0);
        }
    }
    assert_eq!(3, group.dispatches());
}

#[test]
fn dynamic_mode_reassigns_overflow() {
    let group = group_of(Lab::reversed(4), 4);
    group.set_dispatch_mode(DispatchMode::Dynamic, 1);
    let result = group.invoke(0, &numbered(12), None).expect("result");
    assert!(result.completion().is_finished());
    assert_eq!((0..12).collect::<Vec<u32>>(), calls_in_order(&result));
    for value in result.values().into_iter().take(4) {
        let (member, call) = *value.expect("value");
        assert_eq!(member, call);
    }
    assert!(result
        .values()
        .into_iter()
        .all(|v| v.expect("value").0 < 4));
}

#[test]
fn static_random_uses_every_member_once() {
    let group = group_of(Lab::default(), 5);
    group.set_dispatch_mode(DispatchMode::StaticRandom, 1);
    let result = group.invoke(3, &Broadcast, None).expect("result");
    let mut members: Vec<u32> = result
        .values()
        .into_iter()
        .map(|v| v.expect("value").0)
        .collect();
    members.sort_unstable();
    assert_eq!(vec![0, 1, 2, 3, 4], members);
}

#[test]
fn static_random_with_more_calls_than_members_is_rejected() {
    let group = group_of(Lab::default(), 2);
    let call_site = DispatchOverride::with_mode(DispatchMode::StaticRandom, 1);
    let err = group
        .invoke(0, &numbered(6), Some(&call_site))
        .expect_err("allocation");
    assert!(matches!(err, DispatchError::SlotOutOfRange { members: 2, .. }));
    assert!(group.runtime().completions().is_empty());
}

#[test]
fn custom_policy_decides_targets() {
    let group = group_of(Lab::default(), 3);
    group.set_custom_policy(Arc::new(LastMember));
    let call_site = DispatchOverride::with_mode(DispatchMode::Custom, 0);
    let result = group
        .invoke(0, &numbered(4), Some(&call_site))
        .expect("result");
    assert!(result.values().into_iter().all(|v| v.expect("value").0 == 2));

    let buffered = DispatchOverride::with_mode(DispatchMode::Custom, 1);
    let err = group
        .invoke(0, &numbered(4), Some(&buffered))
        .expect_err("allocation");
    assert!(matches!(err, DispatchError::IncorrectTaskAllocation { .. }));
}

#[test]
fn failures_are_wrapped_with_their_position() {
    let group = group_of(Lab::failing([1, 3]), 4);
    let result = group.invoke(9, &Broadcast, None).expect("result");
    assert_eq!(4, result.len());
    assert_eq!(Some(&(0, 9)), result.get(0).and_then(GroupOutcome::value));
    assert_eq!(Some(&(2, 9)), result.get(2).and_then(GroupOutcome::value));

    let exceptions = result.exceptions();
    assert_eq!(2, exceptions.len());
    assert_eq!(1, exceptions[0].get_index());
    assert_eq!(Some(&1), exceptions[0].get_object());
    assert_eq!(3, exceptions[1].get_index());
    assert_eq!("member 3 refused the call", exceptions[1].error().to_string());
    assert_eq!(0, group.context().active_scopes());
}

#[test]
fn failed_members_yield_no_value() {
    let group = group_of(Lab::default(), 2);
    group.add_failed_member(Arc::new(Refused(99)));
    let result = group.invoke(1, &Broadcast, None).expect("result");
    assert_eq!(3, result.len());
    assert!(matches!(result.get(2), Some(GroupOutcome::Unavailable)));
    assert_eq!(2, group.runtime().completions().len());
}

#[test]
fn one_way_collects_every_failure() {
    let group = group_of(Lab::failing([0, 2, 4]), 5);
    let exceptions = group
        .invoke_one_way(1, &Broadcast, None)
        .expect("dispatched");
    assert_eq!(3, exceptions.size());
    let mut slots: Vec<usize> = exceptions.iter().map(ExceptionInGroup::get_index).collect();
    slots.sort_unstable();
    assert_eq!(vec![0, 2, 4], slots);

    let err = exceptions.into_result().expect_err("failures");
    assert!(err.source().is_some());
    assert_eq!(5, group.runtime().completions().len());
}

#[test]
fn one_way_skips_failed_members() {
    let group = group_of(Lab::default(), 3);
    group.add_failed_member(Arc::new(Refused(42)));
    let exceptions = group
        .invoke_one_way(1, &Broadcast, None)
        .expect("dispatched");
    assert!(exceptions.is_empty());
    assert!(exceptions.into_result().is_ok());
    assert_eq!(3, group.runtime().completions().len());
}

#[test]
fn created_members_join_the_group() {
    let group = group_of(Lab::failing([11]), 1);
    let specs = vec![
        MemberSpec::new("Lab", 10),
        MemberSpec::new("Lab", 11).with_signature(["u32"]),
        MemberSpec::new("Lab", 12).at("remote-node"),
    ];
    let slots = group.create_members(specs).expect("created");
    assert_eq!(1..4, slots);
    assert_eq!(4, group.size());
    assert!(group.get(2).expect("member").is_failed());

    let result = group.invoke(5, &Broadcast, None).expect("result");
    assert_eq!(Some(&(10, 5)), result.get(1).and_then(GroupOutcome::value));
    assert!(matches!(result.get(2), Some(GroupOutcome::Unavailable)));
    assert_eq!(Some(&(12, 5)), result.get(3).and_then(GroupOutcome::value));
}

#[test]
fn waiting_caller_can_be_interrupted() {
    let (open, gate) = unbounded();
    let group = group_of(Lab::gated(gate), 3);
    let interrupt = group.interrupt_handle();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        interrupt.interrupt();
    });
    let result = group.invoke(1, &Broadcast, None).expect("result");
    interrupter.join().expect("interrupter");
    assert_eq!(Completion::Interrupted { pending: 3 }, result.completion());
    assert!(result.values().into_iter().all(|v| v.is_none()));

    // Three for the interrupted calls, three for the next ones
    for _ in 0..6 {
        open.send(()).expect("open");
    }
    let finished = group.invoke(1, &Broadcast, None).expect("result");
    assert!(finished.completion().is_finished());
    assert_eq!(3, finished.values().into_iter().flatten().count());
}

#[test]
fn group_settings_come_from_config() {
    let config = DispatchConfig::load_config_str(
        r#"
        groupcall.dispatch {
            mode = "dynamic"
            buffer-size = 0
            member-to-thread-ratio = 1
            additional-threads = 0
        }
        "#,
    )
    .expect("config");
    let group = GroupRef::new(Arc::new(Lab::default()), config);
    for m in 0..3 {
        group.add_member(m);
    }
    let result = group.invoke(0, &numbered(6), None).expect("result");
    assert_eq!((0..6).collect::<Vec<u32>>(), calls_in_order(&result));
    assert_eq!(3, group.pool_size());
}
