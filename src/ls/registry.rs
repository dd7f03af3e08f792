//! Resolves the lock that applies to a resource.
//!
//! A resource can be locked directly, or indirectly through an ancestor
//! that holds an infinite-depth lock. The order in which the properties
//! are consulted matters, see [`LockRegistry::resolve`].
use crate::ls::{Caller, LockDepth, LockInfo, LockScope, LockState};
use crate::store::{LockStatus, ResourceId, StoreResult, StoreTxn};

/// Upper bound for the number of ancestors visited.
pub const DEFAULT_MAX_LOCK_DEPTH: usize = 256;

/// Works out the effective [`LockInfo`] of a resource.
#[derive(Debug, Clone, Copy)]
pub struct LockRegistry {
    max_depth: usize,
}

impl Default for LockRegistry {
    fn default() -> Self {
        LockRegistry::new(DEFAULT_MAX_LOCK_DEPTH)
    }
}

fn is_locked(status: LockStatus) -> bool {
    matches!(status, LockStatus::Locked | LockStatus::LockOwner)
}

impl LockRegistry {
    /// `max_depth` bounds the walk up the tree. A tree deeper than that
    /// is considered corrupt and everything below the bound reads as locked.
    pub fn new(max_depth: usize) -> LockRegistry {
        LockRegistry { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve the lock state of `resource`. This never fails: if the
    /// state cannot be determined the result is [`LockState::Unresolved`],
    /// which all checks treat as locked.
    ///
    /// In order:
    ///
    /// 1. the resource's own exclusive lock (together with its own shared tokens);
    /// 2. the resource's own shared tokens;
    /// 3. the closest ancestor with an infinite-depth exclusive lock. The token
    ///    and depth come from the ancestor, the scope and shared tokens from
    ///    the resource itself;
    /// 4. the closest ancestor with shared tokens, but only if the resource's
    ///    own depth property is "infinity".
    pub fn resolve(&self, txn: &dyn StoreTxn, resource: ResourceId, caller: &Caller) -> LockInfo {
        match self.try_resolve(txn, resource, caller) {
            Ok(info) => info,
            Err(e) => {
                warn!("resolve lock for {resource}: store error {e}, assuming locked");
                LockInfo::unresolved()
            }
        }
    }

    fn try_resolve(
        &self,
        txn: &dyn StoreTxn,
        resource: ResourceId,
        caller: &Caller,
    ) -> StoreResult<LockInfo> {
        let props = txn.lock_props(resource)?;

        if is_locked(props.status(caller.principal(), caller.now)) {
            if let Some(token) = &props.token {
                return Ok(LockInfo {
                    state: LockState::Exclusive {
                        token: token.clone(),
                        origin: resource,
                    },
                    shared_tokens: props.shared_tokens,
                    depth: props.depth,
                    scope: props.scope,
                });
            }
        } else if !props.shared_tokens.is_empty() {
            return Ok(LockInfo {
                state: LockState::Shared { origin: resource },
                shared_tokens: props.shared_tokens,
                depth: props.depth,
                scope: props.scope,
            });
        }

        let mut node = resource;
        for _ in 0..self.max_depth {
            let parent = match txn.parent(node)? {
                Some(parent) => parent,
                None => return Ok(LockInfo::default()),
            };
            let pprops = txn.lock_props(parent)?;

            if is_locked(pprops.status(caller.principal(), caller.now)) {
                if let (Some(token), Some(LockDepth::Infinity)) = (&pprops.token, pprops.depth) {
                    trace!("resolve lock for {resource}: inherited from {parent}");
                    return Ok(LockInfo {
                        state: LockState::Exclusive {
                            token: token.clone(),
                            origin: parent,
                        },
                        shared_tokens: props.shared_tokens,
                        depth: pprops.depth,
                        scope: props.scope,
                    });
                }
            } else if !pprops.shared_tokens.is_empty() && props.depth == Some(LockDepth::Infinity) {
                trace!("resolve lock for {resource}: shared with {parent}");
                return Ok(LockInfo {
                    state: LockState::Shared { origin: parent },
                    shared_tokens: pprops.shared_tokens,
                    depth: props.depth,
                    scope: props.scope.or(Some(LockScope::Shared)),
                });
            }
            node = parent;
        }

        warn!(
            "resolve lock for {resource}: more than {} ancestors, assuming locked",
            self.max_depth
        );
        Ok(LockInfo::unresolved())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::davpath::DavPath;
    use crate::store::memstore::MemStore;
    use crate::store::{DavResourceStore, LockProps};

    const T1: &str = "opaquelocktoken:t1";
    const T2: &str = "opaquelocktoken:t2";

    fn setup() -> (Arc<MemStore>, ResourceId, ResourceId, ResourceId) {
        let store = MemStore::new();
        let a = store.create_collection(&DavPath::new("/a/").unwrap()).unwrap();
        let b = store.create_collection(&DavPath::new("/a/b/").unwrap()).unwrap();
        let c = store.create_resource(&DavPath::new("/a/b/c").unwrap()).unwrap();
        (store, a, b, c)
    }

    fn set(store: &MemStore, id: ResourceId, props: LockProps) {
        let mut txn = store.begin().unwrap();
        txn.write_lock_props(id, props).unwrap();
        txn.commit().unwrap();
    }

    fn exclusive(token: &str, depth: LockDepth) -> LockProps {
        LockProps {
            token: Some(token.to_string()),
            principal: Some("alice".to_string()),
            depth: Some(depth),
            scope: Some(LockScope::Exclusive),
            ..LockProps::default()
        }
    }

    fn resolve(store: &MemStore, id: ResourceId) -> LockInfo {
        let txn = store.begin().unwrap();
        LockRegistry::default().resolve(&*txn, id, &Caller::new(None))
    }

    #[test]
    fn test_unlocked() {
        let (store, a, b, c) = setup();
        for id in [a, b, c] {
            assert_eq!(resolve(&store, id), LockInfo::default());
        }
    }

    #[test]
    fn test_direct_exclusive() {
        let (store, _a, b, _c) = setup();
        let mut props = exclusive(T1, LockDepth::Zero);
        props.shared_tokens = vec![T2.to_string()];
        set(&store, b, props);

        let info = resolve(&store, b);
        assert_eq!(info.state, LockState::Exclusive { token: T1.to_string(), origin: b });
        // both the exclusive token and the local shared tokens are surfaced.
        assert_eq!(info.shared_tokens, vec![T2.to_string()]);
        assert_eq!(info.depth, Some(LockDepth::Zero));
    }

    #[test]
    fn test_direct_shared() {
        let (store, a, _b, _c) = setup();
        set(
            &store,
            a,
            LockProps {
                shared_tokens: vec![T1.to_string(), T2.to_string()],
                depth: Some(LockDepth::Zero),
                scope: Some(LockScope::Shared),
                ..LockProps::default()
            },
        );
        let info = resolve(&store, a);
        assert_eq!(info.state, LockState::Shared { origin: a });
        assert_eq!(info.shared_tokens.len(), 2);
        assert_eq!(info.scope, Some(LockScope::Shared));
    }

    #[test]
    fn test_inherited_infinity() {
        let (store, a, _b, c) = setup();
        set(&store, a, exclusive(T1, LockDepth::Infinity));
        let info = resolve(&store, c);
        assert_eq!(info.state, LockState::Exclusive { token: T1.to_string(), origin: a });
        assert_eq!(info.depth, Some(LockDepth::Infinity));
        // scope is the resource's own.
        assert_eq!(info.scope, None);
    }

    #[test]
    fn test_depth_zero_not_inherited() {
        let (store, a, b, c) = setup();
        set(&store, a, exclusive(T1, LockDepth::Zero));
        assert_eq!(resolve(&store, b), LockInfo::default());
        assert_eq!(resolve(&store, c), LockInfo::default());
    }

    #[test]
    fn test_closest_ancestor_wins() {
        let (store, a, b, c) = setup();
        set(&store, a, exclusive(T1, LockDepth::Infinity));
        set(&store, b, exclusive(T2, LockDepth::Infinity));
        assert_eq!(resolve(&store, c).token(), Some(T2));
    }

    #[test]
    fn test_inherited_keeps_local_shared_tokens() {
        let (store, a, _b, c) = setup();
        set(&store, a, exclusive(T1, LockDepth::Infinity));
        // c has shared tokens, but its own shared lock wins over the inherited one.
        set(
            &store,
            c,
            LockProps {
                shared_tokens: vec![T2.to_string()],
                ..LockProps::default()
            },
        );
        assert_eq!(resolve(&store, c).state, LockState::Shared { origin: c });

        // an expired exclusive marker of its own does not hide them.
        let mut props = exclusive("opaquelocktoken:old", LockDepth::Zero);
        props.expires = Some(std::time::SystemTime::now() - Duration::from_secs(1));
        props.shared_tokens = vec![T2.to_string()];
        set(&store, c, props);
        let info = resolve(&store, c);
        assert_eq!(info.state, LockState::Shared { origin: c });
        assert_eq!(info.shared_tokens, vec![T2.to_string()]);
    }

    #[test]
    fn test_expired_ancestor_ignored() {
        let (store, a, _b, c) = setup();
        let mut props = exclusive(T1, LockDepth::Infinity);
        props.expires = Some(std::time::SystemTime::now() - Duration::from_secs(1));
        set(&store, a, props);
        assert_eq!(resolve(&store, c), LockInfo::default());
    }

    #[test]
    fn test_shared_ancestor_needs_local_infinity() {
        let (store, a, _b, c) = setup();
        set(
            &store,
            a,
            LockProps {
                shared_tokens: vec![T1.to_string()],
                depth: Some(LockDepth::Infinity),
                scope: Some(LockScope::Shared),
                ..LockProps::default()
            },
        );
        assert_eq!(resolve(&store, c), LockInfo::default());

        set(
            &store,
            c,
            LockProps {
                depth: Some(LockDepth::Infinity),
                ..LockProps::default()
            },
        );
        let info = resolve(&store, c);
        assert_eq!(info.state, LockState::Shared { origin: a });
        assert_eq!(info.shared_tokens, vec![T1.to_string()]);
    }

    #[test]
    fn test_walk_bound_fails_closed() {
        let (store, _a, _b, c) = setup();
        let txn = store.begin().unwrap();
        let info = LockRegistry::new(2).resolve(&*txn, c, &Caller::new(None));
        assert_eq!(info.state, LockState::Unresolved);
        assert!(info.is_locked());
        // three levels are enough.
        let info = LockRegistry::new(3).resolve(&*txn, c, &Caller::new(None));
        assert_eq!(info, LockInfo::default());
    }

    #[test]
    fn test_missing_resource_fails_closed() {
        let (store, _a, _b, _c) = setup();
        assert_eq!(resolve(&store, 12345).state, LockState::Unresolved);
    }
}
