//! Decides whether a request may touch a resource, given its lock state
//! and the parsed `If` header.
//!
//! The decision has two phases, and both must pass:
//!
//! 1. [`check_lock_token`]: if the resource is locked, one of the submitted
//!    lists must name a token that holds the lock. This fails with
//!    [`DenyReason::Locked`], no matter whether the conditions are true.
//!    `(<wrong-token>) (Not <DAV:no-lock>)` is always true, but it does
//!    not prove ownership.
//! 2. [`check_conditions`]: at least one list must be true for the
//!    resource. This fails with [`DenyReason::PreconditionFailed`].
use std::fmt;

use crate::ifheader::Condition;
use crate::ls::{LockInfo, LockState};

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The resource is locked and the caller did not prove ownership.
    Locked,
    /// No condition in the `If` header was true.
    PreconditionFailed,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DenyReason::Locked => f.write_str("locked"),
            DenyReason::PreconditionFailed => f.write_str("precondition failed"),
        }
    }
}

fn submits_any<'a>(conditions: &[Condition], mut tokens: impl Iterator<Item = &'a str>) -> bool {
    tokens.any(|tok| {
        conditions
            .iter()
            .any(|c| c.lock_tokens_match.iter().any(|t| t == tok))
    })
}

/// Phase one: lock token ownership.
///
/// `ignore_shared` is set by methods that may go ahead on a shared-locked
/// resource without naming a participant token. `is_lock_method` is set
/// for LOCK: a LOCK without any `If` header never joins an existing
/// shared lock.
pub fn check_lock_token(
    info: &LockInfo,
    conditions: Option<&[Condition]>,
    ignore_shared: bool,
    is_lock_method: bool,
) -> Result<(), DenyReason> {
    let result = match (&info.state, conditions) {
        (LockState::Unresolved, _) => Err(DenyReason::Locked),
        _ if !info.is_locked() => Ok(()),

        (LockState::Shared { .. }, None) if is_lock_method => Err(DenyReason::Locked),
        (LockState::Shared { .. }, None) => Ok(()),
        (LockState::Shared { .. }, Some(_)) if ignore_shared => Ok(()),
        (LockState::Shared { .. }, Some(conds)) => {
            if submits_any(conds, info.shared_tokens.iter().map(|t| t.as_str())) {
                Ok(())
            } else {
                Err(DenyReason::Locked)
            }
        }

        (LockState::Exclusive { .. }, None) => Err(DenyReason::Locked),
        (LockState::Exclusive { token, .. }, Some(conds)) => {
            if submits_any(conds, std::iter::once(token.as_str())) {
                Ok(())
            } else {
                Err(DenyReason::Locked)
            }
        }

        (LockState::Unlocked, _) => Ok(()),
    };
    if result.is_err() {
        debug!("lock token check failed: state {:?}", info.state);
    }
    result
}

fn etag_ok(cond: &Condition, etag: Option<&str>) -> bool {
    let matches = |list: &Vec<String>| etag.is_some_and(|e| list.iter().any(|t| t == e));
    cond.etags_match.as_ref().map_or(true, matches)
        && !cond.etags_not_match.as_ref().is_some_and(matches)
}

fn token_ok(cond: &Condition, current: &[&str]) -> bool {
    let matches = |list: &Vec<String>| current.iter().any(|c| list.iter().any(|t| t == c));
    (cond.lock_tokens_match.is_empty() || matches(&cond.lock_tokens_match))
        && (cond.lock_tokens_not_match.is_empty() || !matches(&cond.lock_tokens_not_match))
}

/// Phase two: is any of the conditions true for this resource.
///
/// `etag` is `None` when the resource has no entity tag, which makes
/// every positive entity-tag term false. Lock token terms are compared
/// against the exclusive token or, for a shared lock, the participants.
pub fn check_conditions(
    info: &LockInfo,
    conditions: Option<&[Condition]>,
    etag: Option<&str>,
) -> Result<(), DenyReason> {
    let conditions = match conditions {
        Some(c) => c,
        None => return Ok(()),
    };
    let current = info.current_tokens();
    if conditions
        .iter()
        .any(|c| etag_ok(c, etag) && token_ok(c, &current))
    {
        return Ok(());
    }
    debug!("none of {} If conditions matched (etag {:?})", conditions.len(), etag);
    Err(DenyReason::PreconditionFailed)
}

/// Both phases, in order.
pub fn authorize(
    info: &LockInfo,
    conditions: Option<&[Condition]>,
    etag: Option<&str>,
    ignore_shared: bool,
    is_lock_method: bool,
) -> Result<(), DenyReason> {
    check_lock_token(info, conditions, ignore_shared, is_lock_method)?;
    check_conditions(info, conditions, etag)
}
