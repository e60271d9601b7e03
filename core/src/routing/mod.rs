//! Assignment of generated calls to member slots

use crate::dispatch::DispatchError;
use std::{fmt, str::FromStr};

mod monitor;
mod policies;

pub use monitor::*;
pub use policies::*;

/// The policy used to assign generated calls to member slots
///
/// The built-in variants are closed. User strategies plug in via
/// [Custom](DispatchMode::Custom) together with a registered [AssignmentPolicy](AssignmentPolicy).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default)]
pub enum DispatchMode {
    /// No explicit choice, which behaves like [StaticRoundRobin](DispatchMode::StaticRoundRobin).
    #[default]
    Unspecified,
    /// Call `i` targets slot `i mod workers`.
    StaticRoundRobin,
    /// Call targets are a random permutation of the call positions.
    ///
    /// See [RANDOM_SHUFFLES_CALL_POSITIONS](RANDOM_SHUFFLES_CALL_POSITIONS).
    StaticRandom,
    /// Initial targets as for [Unspecified](DispatchMode::Unspecified),
    /// but overflow tasks pick a live slot from the [DispatchMonitor](DispatchMonitor)
    /// when they start executing.
    Dynamic,
    /// Targets are chosen by a user-supplied [AssignmentPolicy](AssignmentPolicy).
    Custom,
}

impl DispatchMode {
    /// All dispatch modes
    pub const ALL: [DispatchMode; 5] = [
        DispatchMode::Unspecified,
        DispatchMode::StaticRoundRobin,
        DispatchMode::StaticRandom,
        DispatchMode::Dynamic,
        DispatchMode::Custom,
    ];

    /// Returns `true` if dispatches in this mode report load to a [DispatchMonitor](DispatchMonitor).
    pub fn is_monitored(&self) -> bool {
        matches!(self, DispatchMode::Dynamic | DispatchMode::StaticRandom)
    }

    /// Assign an initial target slot to each of the `generated` calls.
    ///
    /// `custom` is only consulted in [Custom](DispatchMode::Custom) mode,
    /// where it must be present.
    pub fn assign<C>(
        &self,
        original: &C,
        generated: &[C],
        worker_count: usize,
        custom: Option<&dyn AssignmentPolicy<C>>,
    ) -> Result<Vec<usize>, DispatchError> {
        match self {
            DispatchMode::Unspecified | DispatchMode::StaticRoundRobin | DispatchMode::Dynamic => {
                Ok(RoundRobinAssignment.assign(original, generated, worker_count))
            }
            DispatchMode::StaticRandom => {
                Ok(RandomAssignment.assign(original, generated, worker_count))
            }
            DispatchMode::Custom => {
                let policy = custom.ok_or(DispatchError::MissingCustomPolicy)?;
                let slots = policy.assign(original, generated, worker_count);
                if slots.len() == generated.len() {
                    Ok(slots)
                } else {
                    Err(DispatchError::PolicySizeMismatch {
                        expected: generated.len(),
                        actual: slots.len(),
                    })
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DispatchMode::Unspecified => "unspecified",
            DispatchMode::StaticRoundRobin => "static-round-robin",
            DispatchMode::StaticRandom => "static-random",
            DispatchMode::Dynamic => "dynamic",
            DispatchMode::Custom => "custom",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace('_', "-");
        DispatchMode::ALL
            .iter()
            .find(|mode| mode.name() == normalised)
            .copied()
            .ok_or_else(|| format!("Unknown dispatch mode: {}", s))
    }
}

/// A strategy mapping generated calls onto member slots
///
/// Implementations must return exactly one slot per generated call,
/// and every slot must be a valid index into the member list.
/// Schedules that violate this are rejected by the dispatcher as fatal allocation errors.
pub trait AssignmentPolicy<C>: fmt::Debug + Send + Sync {
    /// Assign a target slot in `0..worker_count` to each of the `generated` calls for `original`.
    fn assign(&self, original: &C, generated: &[C], worker_count: usize) -> Vec<usize>;
}
