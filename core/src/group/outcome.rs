use crate::{dispatch::Completion, runtime::Failure};
use std::{
    error::Error,
    fmt,
    slice,
    sync::{Mutex, MutexGuard},
    vec,
};

/// A failure of one member during a group call
///
/// Carries the member the call ran on (if known) and its index,
/// which is the result position for result-producing calls,
/// and the member slot for one-way calls.
#[derive(Clone, Debug)]
pub struct ExceptionInGroup<M> {
    object: Option<M>,
    index: usize,
    error: Failure,
}

impl<M> ExceptionInGroup<M> {
    /// Wrap `error` raised by `object` at `index`
    pub fn new(object: Option<M>, index: usize, error: Failure) -> Self {
        ExceptionInGroup {
            object,
            index,
            error,
        }
    }

    /// The member that raised the failure, if known
    pub fn get_object(&self) -> Option<&M> {
        self.object.as_ref()
    }

    /// The position of the failure within the group call
    pub fn get_index(&self) -> usize {
        self.index
    }

    /// The underlying failure
    pub fn error(&self) -> &Failure {
        &self.error
    }
}

impl<M> fmt::Display for ExceptionInGroup<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exception in group at index {}: {}", self.index, self.error)
    }
}

impl<M: fmt::Debug> Error for ExceptionInGroup<M> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// The outcome at one position of a result-producing group call
#[derive(Debug)]
pub enum GroupOutcome<M, V> {
    /// The call returned a value.
    Value(V),
    /// The target member had already failed before the call, so there is no value.
    Unavailable,
    /// The call raised a failure.
    Failed(ExceptionInGroup<M>),
}

impl<M, V> GroupOutcome<M, V> {
    /// The value, if the call returned one
    pub fn value(&self) -> Option<&V> {
        match self {
            GroupOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The failure, if the call raised one
    pub fn exception(&self) -> Option<&ExceptionInGroup<M>> {
        match self {
            GroupOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if the call returned a value
    pub fn is_value(&self) -> bool {
        matches!(self, GroupOutcome::Value(_))
    }
}

/// Errors when writing into a [ResultSink](ResultSink)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The position lies outside the sink.
    OutOfRange {
        /// The rejected position
        position: usize,
        /// The number of positions in the sink
        len: usize,
    },
    /// An outcome was already recorded at the position.
    AlreadyWritten {
        /// The rejected position
        position: usize,
    },
}
impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::OutOfRange { position, len } => write!(
                f,
                "Result position {} is outside the result of size {}",
                position, len
            ),
            SinkError::AlreadyWritten { position } => {
                write!(f, "Result position {} was already written", position)
            }
        }
    }
}
impl Error for SinkError {}

/// A fixed-size, positionally indexed collector of call outcomes
///
/// Each position is written at most once, from whichever pool thread ran the matching task.
/// Writes to distinct positions never contend with each other.
#[derive(Debug)]
pub struct ResultSink<M, V> {
    slots: Box<[Mutex<Option<GroupOutcome<M, V>>>]>,
}

impl<M, V> ResultSink<M, V> {
    /// A sink with `len` empty positions
    pub fn new(len: usize) -> Self {
        let slots: Vec<Mutex<Option<GroupOutcome<M, V>>>> =
            (0..len).map(|_| Mutex::new(None)).collect();
        ResultSink {
            slots: slots.into_boxed_slice(),
        }
    }

    /// The number of positions
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no positions
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn lock(
        slot: &Mutex<Option<GroupOutcome<M, V>>>,
    ) -> MutexGuard<'_, Option<GroupOutcome<M, V>>> {
        slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `outcome` at `position`
    ///
    /// Fails if the position does not exist or already holds an outcome,
    /// in which case the existing outcome is kept.
    pub fn write(&self, position: usize, outcome: GroupOutcome<M, V>) -> Result<(), SinkError> {
        let slot = self.slots.get(position).ok_or(SinkError::OutOfRange {
            position,
            len: self.slots.len(),
        })?;
        let mut guard = Self::lock(slot);
        if guard.is_some() {
            Err(SinkError::AlreadyWritten { position })
        } else {
            *guard = Some(outcome);
            Ok(())
        }
    }

    /// The number of positions holding an outcome
    pub fn written(&self) -> usize {
        self.slots.iter().filter(|s| Self::lock(s).is_some()).count()
    }

    /// Move all recorded outcomes out of the sink, in position order
    ///
    /// Positions without an outcome (e.g. after an interrupted wait) yield `None`.
    pub fn take_outcomes(&self) -> Vec<Option<GroupOutcome<M, V>>> {
        self.slots.iter().map(|s| Self::lock(s).take()).collect()
    }
}

/// A thread-safe collector of one-way call failures
#[derive(Debug)]
pub struct ExceptionAggregate<M> {
    exceptions: Mutex<Vec<ExceptionInGroup<M>>>,
}

impl<M> Default for ExceptionAggregate<M> {
    fn default() -> Self {
        ExceptionAggregate {
            exceptions: Mutex::new(Vec::new()),
        }
    }
}

impl<M> ExceptionAggregate<M> {
    /// An empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExceptionInGroup<M>>> {
        self.exceptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `exception`
    pub fn add(&self, exception: ExceptionInGroup<M>) {
        self.lock().push(exception);
    }

    /// The number of collected failures
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no failures were collected
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Move all collected failures into an [ExceptionList](ExceptionList)
    pub fn take(&self) -> ExceptionList<M> {
        ExceptionList {
            exceptions: std::mem::take(&mut *self.lock()),
        }
    }
}

/// The failures of a one-way group call, in the order they were observed
///
/// This is itself an error, whose source is the first failure.
#[derive(Clone, Debug)]
pub struct ExceptionList<M> {
    exceptions: Vec<ExceptionInGroup<M>>,
}

impl<M> Default for ExceptionList<M> {
    fn default() -> Self {
        ExceptionList {
            exceptions: Vec::new(),
        }
    }
}

impl<M> ExceptionList<M> {
    /// The number of failures
    pub fn size(&self) -> usize {
        self.exceptions.len()
    }

    /// Returns `true` if there were no failures
    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    /// Iterate over the failures
    pub fn iter(&self) -> slice::Iter<'_, ExceptionInGroup<M>> {
        self.exceptions.iter()
    }

    /// Turn this into `Err(self)` if there were any failures
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<M> IntoIterator for ExceptionList<M> {
    type Item = ExceptionInGroup<M>;
    type IntoIter = vec::IntoIter<ExceptionInGroup<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.exceptions.into_iter()
    }
}

impl<'a, M> IntoIterator for &'a ExceptionList<M> {
    type Item = &'a ExceptionInGroup<M>;
    type IntoIter = slice::Iter<'a, ExceptionInGroup<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.exceptions.iter()
    }
}

impl<M> fmt::Display for ExceptionList<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} exception(s) in group call", self.exceptions.len())?;
        if let Some(first) = self.exceptions.first() {
            write!(f, ", first: {}", first)?;
        }
        Ok(())
    }
}

impl<M: fmt::Debug + 'static> Error for ExceptionList<M> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.exceptions.first().map(|e| e as &(dyn Error + 'static))
    }
}

/// The outcome of a result-producing group call
///
/// Outcomes are in the order of the generated calls, regardless of
/// the order in which members completed.
#[derive(Debug)]
pub struct GroupResult<M, V> {
    outcomes: Vec<Option<GroupOutcome<M, V>>>,
    completion: Completion,
}

impl<M, V> GroupResult<M, V> {
    /// Assemble a result from the sink's `outcomes`
    pub fn new(outcomes: Vec<Option<GroupOutcome<M, V>>>, completion: Completion) -> Self {
        GroupResult {
            outcomes,
            completion,
        }
    }

    /// The number of generated calls
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` if no calls were generated
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// The outcome at `position`, `None` if there is none (yet)
    pub fn get(&self, position: usize) -> Option<&GroupOutcome<M, V>> {
        self.outcomes.get(position).and_then(Option::as_ref)
    }

    /// All outcomes, in call order
    pub fn outcomes(&self) -> &[Option<GroupOutcome<M, V>>] {
        &self.outcomes
    }

    /// Move out all outcomes, in call order
    pub fn into_outcomes(self) -> Vec<Option<GroupOutcome<M, V>>> {
        self.outcomes
    }

    /// The value at each position, `None` where there is none
    pub fn values(&self) -> Vec<Option<&V>> {
        self.outcomes
            .iter()
            .map(|o| o.as_ref().and_then(GroupOutcome::value))
            .collect()
    }

    /// All failures, in call order
    pub fn exceptions(&self) -> Vec<&ExceptionInGroup<M>> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_ref().and_then(GroupOutcome::exception))
            .collect()
    }

    /// How the wait for this result ended
    pub fn completion(&self) -> Completion {
        self.completion
    }
}
