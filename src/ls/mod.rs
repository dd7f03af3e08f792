//! Lock resolution and lock state changes.
//!
//! [`LockRegistry`] works out which lock applies to a resource, walking
//! up the tree for inherited locks. [`LockMutator`] takes, refreshes
//! and releases locks. Both work inside a [`StoreTxn`](crate::store::StoreTxn)
//! supplied by the caller.
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use crate::store::ResourceId;

pub mod mutator;
pub mod registry;

pub use mutator::LockMutator;
pub use registry::LockRegistry;

/// Depth of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

impl FromStr for LockDepth {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "0" {
            Ok(LockDepth::Zero)
        } else if s.eq_ignore_ascii_case("infinity") {
            Ok(LockDepth::Infinity)
        } else {
            Err(())
        }
    }
}

impl fmt::Display for LockDepth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockDepth::Zero => f.write_str("0"),
            LockDepth::Infinity => f.write_str("infinity"),
        }
    }
}

/// Scope of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockScope::Exclusive => f.write_str("exclusive"),
            LockScope::Shared => f.write_str("shared"),
        }
    }
}

/// Which lock applies to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    /// Exclusive lock held at `origin`: the resource itself, or an
    /// ancestor with an infinite-depth lock.
    Exclusive { token: String, origin: ResourceId },
    /// Shared lock; the participants are in [`LockInfo::shared_tokens`]
    /// and are stored on `origin`.
    Shared { origin: ResourceId },
    /// The lock state could not be worked out. Treated as locked.
    Unresolved,
}

/// Effective lock state of one resource, computed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockInfo {
    pub state: LockState,
    pub shared_tokens: Vec<String>,
    pub depth: Option<LockDepth>,
    /// Only used for reporting.
    pub scope: Option<LockScope>,
}

impl LockInfo {
    pub(crate) fn unresolved() -> LockInfo {
        LockInfo {
            state: LockState::Unresolved,
            ..LockInfo::default()
        }
    }

    /// The exclusive lock token, if exclusively locked.
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            LockState::Exclusive { token, .. } => Some(token),
            _ => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.state, LockState::Shared { .. })
    }

    /// Does any lock apply. A shared lock without participants does not count.
    pub fn is_locked(&self) -> bool {
        match self.state {
            LockState::Unlocked => false,
            LockState::Shared { .. } => !self.shared_tokens.is_empty(),
            LockState::Exclusive { .. } | LockState::Unresolved => true,
        }
    }

    /// Tokens that currently hold this resource.
    pub fn current_tokens(&self) -> Vec<&str> {
        match &self.state {
            LockState::Exclusive { token, .. } => vec![token.as_str()],
            LockState::Shared { .. } => self.shared_tokens.iter().map(|t| t.as_str()).collect(),
            LockState::Unlocked | LockState::Unresolved => Vec::new(),
        }
    }
}

/// A LOCK request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub scope: LockScope,
    pub depth: LockDepth,
    /// Contents of the `<owner>` element, if any.
    pub owner: Option<String>,
    /// `None` is "Infinite".
    pub timeout: Option<Duration>,
}

/// Who is asking, and when.
#[derive(Debug, Clone)]
pub struct Caller {
    pub principal: Option<String>,
    pub now: SystemTime,
}

impl Caller {
    pub fn new(principal: Option<String>) -> Caller {
        Caller {
            principal,
            now: SystemTime::now(),
        }
    }

    pub(crate) fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}
