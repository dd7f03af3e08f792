//! Takes, refreshes and releases locks.
//!
//! Every operation resolves the current state through the [`LockRegistry`]
//! and writes the result back in the same transaction. Nothing here
//! commits: that is up to the caller, and only on success.
use std::time::Duration;

use uuid::Uuid;

use crate::conditional::{self, DenyReason};
use crate::errors::DavError;
use crate::ifheader::{Condition, OPAQUE_LOCK_TOKEN};
use crate::ls::{Caller, LockDepth, LockInfo, LockRegistry, LockRequest, LockScope, LockState};
use crate::store::{LockStatus, ResourceId, StoreResult, StoreTxn};
use crate::util::systemtime_to_rfc3339;
use crate::DavResult;

/// Applies lock state changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockMutator {
    registry: LockRegistry,
}

fn new_token() -> String {
    format!("{}{}", OPAQUE_LOCK_TOKEN, Uuid::new_v4().hyphenated())
}

fn expiry_str(timeout: Option<Duration>, caller: &Caller) -> String {
    match timeout {
        Some(t) => systemtime_to_rfc3339(caller.now + t),
        None => "never".to_string(),
    }
}

impl LockMutator {
    pub fn new(registry: LockRegistry) -> LockMutator {
        LockMutator { registry }
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    /// Take a new lock on `resource` and return its token.
    ///
    /// An exclusive lock conflicts with every other lock. A shared lock
    /// conflicts with exclusive locks only, and joining an existing shared
    /// lock requires submitting one of its tokens. For an infinite-depth
    /// lock, locks held by descendants conflict as well.
    pub fn acquire(
        &self,
        txn: &mut dyn StoreTxn,
        resource: ResourceId,
        req: &LockRequest,
        conditions: Option<&[Condition]>,
        etag: Option<&str>,
        caller: &Caller,
    ) -> DavResult<String> {
        let info = self.registry.resolve(&*txn, resource, caller);

        let shared = req.scope == LockScope::Shared;
        // joining a shared lock needs one of its tokens, like any other lock.
        conditional::check_lock_token(&info, conditions, false, true).map_err(|r| match r {
            DenyReason::Locked => DavError::AlreadyLocked,
            other => other.into(),
        })?;
        let conflict = match info.state {
            LockState::Unlocked => false,
            LockState::Exclusive { .. } | LockState::Unresolved => true,
            LockState::Shared { .. } => !shared && info.is_locked(),
        };
        if conflict {
            debug!("lock {resource}: {} request conflicts with {:?}", req.scope, info.state);
            return Err(DavError::AlreadyLocked);
        }
        if req.depth == LockDepth::Infinity
            && self.descendant_conflict(&*txn, resource, req.scope, caller)?
        {
            debug!("lock {resource}: conflicting lock below");
            return Err(DavError::AlreadyLocked);
        }
        conditional::check_conditions(&info, conditions, etag)?;

        let token = new_token();
        let mut props = txn.lock_props(resource)?;
        if props.status(caller.principal(), caller.now) == LockStatus::Expired {
            trace!("lock {resource}: dropping expired lock");
            props.clear_exclusive();
        }
        match req.scope {
            LockScope::Exclusive => {
                props.token = Some(token.clone());
                props.principal = caller.principal.clone();
                props.owner = req.owner.clone();
                props.expires = req.timeout.map(|t| caller.now + t);
                props.scope = Some(LockScope::Exclusive);
            }
            LockScope::Shared => {
                props.shared_tokens.push(token.clone());
                if props.token.is_none() {
                    props.scope = Some(LockScope::Shared);
                }
            }
        }
        props.depth = Some(req.depth);
        txn.write_lock_props(resource, props)?;

        debug!(
            "lock {resource}: {} depth {} token {token} expires {}",
            req.scope,
            req.depth,
            expiry_str(req.timeout, caller)
        );
        Ok(token)
    }

    // Look for locks below `resource` that an infinite-depth lock of
    // `scope` would overlap. A tree deeper than the walk bound counts
    // as a conflict.
    fn descendant_conflict(
        &self,
        txn: &dyn StoreTxn,
        resource: ResourceId,
        scope: LockScope,
        caller: &Caller,
    ) -> StoreResult<bool> {
        let mut todo = vec![(resource, 0usize)];
        while let Some((id, level)) = todo.pop() {
            for child in txn.children(id)? {
                if level >= self.registry.max_depth() {
                    return Ok(true);
                }
                let props = txn.lock_props(child)?;
                match props.status(caller.principal(), caller.now) {
                    LockStatus::Locked | LockStatus::LockOwner => return Ok(true),
                    _ => {}
                }
                if scope == LockScope::Exclusive && !props.shared_tokens.is_empty() {
                    return Ok(true);
                }
                todo.push((child, level + 1));
            }
        }
        Ok(false)
    }

    /// Refresh the lock named by one of the submitted tokens.
    ///
    /// The new timeout is set on the resource that holds the lock, which
    /// may be an ancestor. Shared participants do not time out, so
    /// refreshing one only checks the token.
    pub fn refresh(
        &self,
        txn: &mut dyn StoreTxn,
        resource: ResourceId,
        conditions: Option<&[Condition]>,
        timeout: Option<Duration>,
        caller: &Caller,
    ) -> DavResult<LockInfo> {
        let info = self.registry.resolve(&*txn, resource, caller);
        let submitted = |tok: &str| {
            conditions
                .unwrap_or_default()
                .iter()
                .any(|c| c.lock_tokens_match.iter().any(|t| t == tok))
        };

        match &info.state {
            LockState::Unresolved => Err(DavError::Locked),
            LockState::Exclusive { token, origin } if submitted(token) => {
                let mut props = txn.lock_props(*origin)?;
                props.expires = timeout.map(|t| caller.now + t);
                txn.write_lock_props(*origin, props)?;
                debug!(
                    "refresh {resource}: token {token} on {origin} expires {}",
                    expiry_str(timeout, caller)
                );
                Ok(info)
            }
            LockState::Shared { .. } if info.shared_tokens.iter().any(|t| submitted(t)) => {
                debug!("refresh {resource}: shared lock, no timeout");
                Ok(info)
            }
            _ => {
                debug!("refresh {resource}: no submitted token holds {:?}", info.state);
                Err(DavError::PreconditionFailed)
            }
        }
    }

    /// Release the lock identified by `token`.
    ///
    /// The token is resolved to the resource that actually holds the lock,
    /// so an UNLOCK of a member of an infinite-depth locked collection
    /// unlocks the collection. For a shared lock only that one participant
    /// is removed.
    pub fn release(
        &self,
        txn: &mut dyn StoreTxn,
        resource: ResourceId,
        token: &str,
        caller: &Caller,
    ) -> DavResult<()> {
        let info = self.registry.resolve(&*txn, resource, caller);
        let shared_holder = info.shared_tokens.iter().any(|t| t == token);
        let (id, exclusive) = match &info.state {
            LockState::Unresolved => return Err(DavError::Locked),
            LockState::Exclusive { token: t, origin } if t == token => (*origin, true),
            // shared tokens next to an exclusive lock are the resource's own.
            LockState::Exclusive { .. } if shared_holder => (resource, false),
            LockState::Shared { origin } if shared_holder => (*origin, false),
            state => {
                let own = txn.lock_props(resource)?;
                if own.status(caller.principal(), caller.now) == LockStatus::Expired {
                    debug!("unlock {resource}: lock already expired");
                    return Ok(());
                }
                if let LockState::Exclusive { .. } = state {
                    debug!("unlock {resource}: locked with a different token");
                    return Err(DavError::Locked);
                }
                debug!("unlock {resource}: no lock with token {token}");
                return Err(DavError::PreconditionFailed);
            }
        };

        let mut props = txn.lock_props(id)?;
        if exclusive {
            props.clear_exclusive();
        } else {
            props.remove_shared(token);
        }
        txn.write_lock_props(id, props)?;
        debug!("unlock {resource}: released {token} on {id}");
        Ok(())
    }
}
