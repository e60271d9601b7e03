use crate::runtime::{Failure, MemberKind};
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// A group member slot's content
#[derive(Clone, Debug)]
pub enum Member<M> {
    /// A member that can be invoked
    Live {
        /// The runtime's handle for this member
        handle: M,
        /// How calls on this member are routed
        kind: MemberKind,
    },
    /// A placeholder for a member that failed, e.g. during creation
    Failed(Failure),
}

impl<M> Member<M> {
    /// A live member with the given `handle` and `kind`
    pub fn live(handle: M, kind: MemberKind) -> Self {
        Member::Live { handle, kind }
    }

    /// The handle of this member, unless it has failed
    pub fn handle(&self) -> Option<&M> {
        match self {
            Member::Live { handle, .. } => Some(handle),
            Member::Failed(_) => None,
        }
    }

    /// The kind of this member, unless it has failed
    pub fn kind(&self) -> Option<MemberKind> {
        match self {
            Member::Live { kind, .. } => Some(*kind),
            Member::Failed(_) => None,
        }
    }

    /// Returns `true` if this is a failed placeholder
    pub fn is_failed(&self) -> bool {
        matches!(self, Member::Failed(_))
    }

    /// The failure this placeholder stands for, if any
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Member::Live { .. } => None,
            Member::Failed(e) => Some(e),
        }
    }
}

/// The member snapshot a single group call operates on
///
/// Slots are fixed in number for the lifetime of the list.
/// Call tasks only ever read slots, while creation tasks fill exactly one
/// previously empty slot each, so slots are individually swappable
/// instead of guarding the whole list.
#[derive(Debug)]
pub struct MemberList<M> {
    slots: Box<[ArcSwapOption<Member<M>>]>,
}

impl<M> MemberList<M> {
    /// A list holding exactly `members`
    pub fn from_members(members: Vec<Member<M>>) -> Self {
        Self::with_empty_slots(members, 0)
    }

    /// A list holding `members` followed by `extra` empty slots
    pub fn with_empty_slots(members: Vec<Member<M>>, extra: usize) -> Self {
        let slots: Vec<ArcSwapOption<Member<M>>> = members
            .into_iter()
            .map(ArcSwapOption::from_pointee)
            .chain((0..extra).map(|_| ArcSwapOption::empty()))
            .collect();
        MemberList {
            slots: slots.into_boxed_slice(),
        }
    }

    /// The number of slots, filled or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no slots at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The member at `slot`, if the slot exists and is filled
    pub fn get(&self, slot: usize) -> Option<Arc<Member<M>>> {
        self.slots.get(slot).and_then(|s| s.load_full())
    }

    /// Place `member` into `slot`
    ///
    /// Returns `false` if no such slot exists.
    pub fn set(&self, slot: usize, member: Member<M>) -> bool {
        match self.slots.get(slot) {
            Some(s) => {
                s.store(Some(Arc::new(member)));
                true
            }
            None => false,
        }
    }
}

impl<M: Clone> MemberList<M> {
    /// The current content of the slots `from..`, cloned out of the list
    pub fn members_from(&self, from: usize) -> Vec<Option<Member<M>>> {
        self.slots
            .iter()
            .skip(from)
            .map(|s| s.load_full().map(|m| m.as_ref().clone()))
            .collect()
    }
}

/// Everything needed to create a new group member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberSpec<A> {
    /// The type of member to create
    pub class_name: String,
    /// The parameter types of the constructor to use, empty for the default one
    pub constructor_signature: Vec<String>,
    /// The constructor arguments
    pub args: A,
    /// Where to create the member, `None` for the local process
    pub placement: Option<String>,
}

impl<A> MemberSpec<A> {
    /// A spec for a local `class_name` member built from `args`
    pub fn new<S>(class_name: S, args: A) -> Self
    where
        S: Into<String>,
    {
        MemberSpec {
            class_name: class_name.into(),
            constructor_signature: Vec::new(),
            args,
            placement: None,
        }
    }

    /// Use the constructor with the given parameter types
    pub fn with_signature<I, S>(mut self, signature: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constructor_signature = signature.into_iter().map(Into::into).collect();
        self
    }

    /// Create the member at `placement` instead of locally
    pub fn at<S>(mut self, placement: S) -> Self
    where
        S: Into<String>,
    {
        self.placement = Some(placement.into());
        self
    }
}
