//! Download state machine.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle states of a single download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadState {
    /// Waiting to be started.
    #[default]
    Queued,
    /// Actively transferring through either backend.
    Running,
    /// Stopped by the user, resumable.
    Paused,
    /// Paused after a recoverable error until its deadline passes.
    Retrying,
    /// Aborted by the user or by a fatal error.
    Canceled,
    /// Finished successfully.
    Done,
    /// The host download service lost track of the transfer.
    Missing,
}

impl DownloadState {
    pub const ALL: [DownloadState; 7] = [
        Self::Queued,
        Self::Running,
        Self::Paused,
        Self::Retrying,
        Self::Canceled,
        Self::Done,
        Self::Missing,
    ];

    /// Bit used for this state inside a [`StateSet`].
    pub const fn bit(self) -> u8 {
        match self {
            Self::Queued => 1 << 0,
            Self::Running => 1 << 1,
            Self::Paused => 1 << 2,
            Self::Retrying => 1 << 3,
            Self::Canceled => 1 << 4,
            Self::Done => 1 << 5,
            Self::Missing => 1 << 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Retrying => "RETRYING",
            Self::Canceled => "CANCELED",
            Self::Done => "DONE",
            Self::Missing => "MISSING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    pub fn is_in(self, set: StateSet) -> bool {
        set.contains(self)
    }

    /// Terminal states have no exits.
    pub fn is_terminal(&self) -> bool {
        self.is_in(StateSet::TERMINAL)
    }

    /// Validate a state transition against the lifecycle table.
    pub fn can_transition_to(&self, target: DownloadState) -> bool {
        use DownloadState::*;

        match (self, target) {
            (from, to) if *from == to => true,

            (Queued, Running | Canceled) => true,

            (Running, Paused | Retrying | Done | Canceled | Missing) => true,

            (Paused | Retrying, Queued | Canceled) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: DownloadState) -> Result<DownloadState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl BitOr for DownloadState {
    type Output = StateSet;

    fn bitor(self, rhs: Self) -> StateSet {
        StateSet::of(self).with(rhs)
    }
}

/// Bitmask over [`DownloadState`] for capability checks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateSet(u8);

impl StateSet {
    pub const EMPTY: StateSet = StateSet(0);

    /// States in which `pause` has an effect.
    pub const PAUSEABLE: StateSet = StateSet(DownloadState::Running.bit());

    /// States in which `cancel` has an effect.
    pub const CANCELABLE: StateSet = StateSet(
        DownloadState::Queued.bit()
            | DownloadState::Running.bit()
            | DownloadState::Paused.bit()
            | DownloadState::Retrying.bit(),
    );

    /// States in which `resume` has an effect.
    pub const FORCABLE: StateSet =
        StateSet(DownloadState::Paused.bit() | DownloadState::Retrying.bit());

    pub const TERMINAL: StateSet = StateSet(
        DownloadState::Canceled.bit() | DownloadState::Done.bit() | DownloadState::Missing.bit(),
    );

    pub const fn of(state: DownloadState) -> Self {
        Self(state.bit())
    }

    pub const fn with(self, state: DownloadState) -> Self {
        Self(self.0 | state.bit())
    }

    pub const fn union(self, other: StateSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, state: DownloadState) -> bool {
        self.0 & state.bit() != 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = DownloadState> {
        DownloadState::ALL
            .into_iter()
            .filter(move |state| self.contains(*state))
    }
}

impl BitOr for StateSet {
    type Output = StateSet;

    fn bitor(self, rhs: Self) -> StateSet {
        self.union(rhs)
    }
}

impl BitOr<DownloadState> for StateSet {
    type Output = StateSet;

    fn bitor(self, rhs: DownloadState) -> StateSet {
        self.with(rhs)
    }
}

impl fmt::Debug for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
