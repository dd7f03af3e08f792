//! Contains the traits that define the resource `store` backend
//! the lock engine runs against.
//!
//! The engine never caches anything. Every decision reads the lock
//! properties through a [`StoreTxn`], and the same transaction is used
//! for the write that follows, so a check-then-act sequence is atomic
//! as long as the store serializes its transactions.
//!
//! The methods are synchronous; the engine itself never suspends.
use std::error::Error;
use std::fmt;
use std::time::SystemTime;

use crate::davpath::DavPath;
use crate::ls::{LockDepth, LockScope};

#[cfg(any(docsrs, feature = "memstore"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memstore")))]
pub mod memstore;

/// Identifier of a node in the resource tree.
pub type ResourceId = u64;

/// Errors generated by a store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    Exists,
    Conflict,
    GeneralFailure,
}

impl Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StoreError::NotFound => "not found",
            StoreError::Exists => "already exists",
            StoreError::Conflict => "conflict",
            StoreError::GeneralFailure => "general failure",
        };
        f.write_str(s)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lock status of a single resource, judged from its own properties only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No exclusive lock.
    NoLock,
    /// Exclusively locked by someone else.
    Locked,
    /// Exclusively locked by the current principal.
    LockOwner,
    /// There is an exclusive lock, but it timed out.
    Expired,
}

/// The lock properties stored on one resource.
///
/// These are always read and written as a unit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockProps {
    /// Exclusive lock token. Its presence is the "locked" marker.
    pub token: Option<String>,
    /// Principal that took the exclusive lock.
    pub principal: Option<String>,
    /// Contents of the `<owner>` element of the LOCK request.
    pub owner: Option<String>,
    pub depth: Option<LockDepth>,
    pub scope: Option<LockScope>,
    /// Tokens of the participants in a shared lock.
    pub shared_tokens: Vec<String>,
    /// When the exclusive lock times out. `None` is "Infinite".
    pub expires: Option<SystemTime>,
}

impl LockProps {
    /// Status of the exclusive lock as seen by `principal` at time `now`.
    pub fn status(&self, principal: Option<&str>, now: SystemTime) -> LockStatus {
        if self.token.is_none() {
            return LockStatus::NoLock;
        }
        if self.expires.is_some_and(|t| t <= now) {
            return LockStatus::Expired;
        }
        match (self.principal.as_deref(), principal) {
            (Some(owner), Some(p)) if owner == p => LockStatus::LockOwner,
            _ => LockStatus::Locked,
        }
    }

    /// Drop the exclusive lock, keeping any shared participants.
    pub fn clear_exclusive(&mut self) {
        self.token = None;
        self.principal = None;
        self.owner = None;
        self.expires = None;
        if self.shared_tokens.is_empty() {
            self.depth = None;
            self.scope = None;
        } else {
            self.scope = Some(LockScope::Shared);
        }
    }

    /// Remove one shared participant. Returns false if it wasn't there.
    pub fn remove_shared(&mut self, token: &str) -> bool {
        let len = self.shared_tokens.len();
        self.shared_tokens.retain(|t| t != token);
        if self.shared_tokens.len() == len {
            return false;
        }
        if self.shared_tokens.is_empty() && self.token.is_none() {
            self.depth = None;
            self.scope = None;
        }
        true
    }
}

/// The trait that defines a resource store.
pub trait DavResourceStore: Send + Sync {
    /// Start a transaction. Transactions on the same store are serialized.
    fn begin(&self) -> StoreResult<Box<dyn StoreTxn + '_>>;
}

/// A transaction on the resource store.
///
/// Writes become visible to other transactions only after `commit`.
/// Dropping the transaction without committing discards them.
pub trait StoreTxn {
    /// Find the resource at `path`.
    fn lookup(&self, path: &DavPath) -> StoreResult<ResourceId>;

    /// The containing collection, or `None` for the root.
    fn parent(&self, id: ResourceId) -> StoreResult<Option<ResourceId>>;

    /// Direct members of a collection.
    fn children(&self, id: ResourceId) -> StoreResult<Vec<ResourceId>>;

    fn lock_props(&self, id: ResourceId) -> StoreResult<LockProps>;

    fn write_lock_props(&mut self, id: ResourceId, props: LockProps) -> StoreResult<()>;

    /// Entity tag of the resource's current state, without quotes.
    fn etag(&self, id: ResourceId) -> StoreResult<String>;

    /// Record a content change on the resource. Applied on commit, and
    /// the new entity tag is visible to the rest of this transaction.
    fn touch(&mut self, id: ResourceId) -> StoreResult<()>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status() {
        let now = SystemTime::now();
        let mut props = LockProps::default();
        assert_eq!(props.status(None, now), LockStatus::NoLock);

        props.token = Some("opaquelocktoken:1".to_string());
        props.principal = Some("alice".to_string());
        assert_eq!(props.status(None, now), LockStatus::Locked);
        assert_eq!(props.status(Some("bob"), now), LockStatus::Locked);
        assert_eq!(props.status(Some("alice"), now), LockStatus::LockOwner);

        props.expires = Some(now + Duration::from_secs(10));
        assert_eq!(props.status(Some("alice"), now), LockStatus::LockOwner);
        props.expires = Some(now - Duration::from_secs(10));
        assert_eq!(props.status(Some("alice"), now), LockStatus::Expired);
    }

    #[test]
    fn test_clear_and_remove() {
        let mut props = LockProps {
            token: Some("opaquelocktoken:1".to_string()),
            depth: Some(LockDepth::Infinity),
            scope: Some(LockScope::Exclusive),
            shared_tokens: vec!["opaquelocktoken:2".to_string()],
            ..LockProps::default()
        };
        props.clear_exclusive();
        assert_eq!(props.token, None);
        assert_eq!(props.scope, Some(LockScope::Shared));
        assert_eq!(props.depth, Some(LockDepth::Infinity));

        assert!(!props.remove_shared("opaquelocktoken:3"));
        assert!(props.remove_shared("opaquelocktoken:2"));
        assert_eq!(props, LockProps::default());
    }
}
