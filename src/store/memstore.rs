//! Simple in-memory resource store.
//!
//! This implementation has state - if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemStore::new`,
//! and share the returned `Arc` between the `DavLockHandler` and whatever
//! code populates the tree.
//!
//! Transactions take a mutex on the whole tree, so they are fully
//! serialized. Lock property writes are staged and only applied on commit.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::davpath::DavPath;
use crate::store::*;
use crate::tree;

type Tree = tree::Tree<String, MemNode>;

/// Ephemeral in-memory resource store.
#[derive(Debug)]
pub struct MemStore {
    tree: Mutex<Tree>,
}

#[derive(Debug, Default)]
struct MemNode {
    is_dir: bool,
    // bumped on every content change, part of the etag.
    version: u64,
    props: LockProps,
}

struct MemTxn<'a> {
    tree: MutexGuard<'a, Tree>,
    staged: HashMap<ResourceId, LockProps>,
    touched: HashSet<ResourceId>,
}

impl From<tree::Error> for StoreError {
    fn from(e: tree::Error) -> Self {
        match e {
            tree::Error::NotFound => StoreError::NotFound,
            tree::Error::Exists => StoreError::Exists,
        }
    }
}

impl MemStore {
    /// Create a new store with an empty root collection.
    pub fn new() -> Arc<MemStore> {
        let root = MemNode {
            is_dir: true,
            ..MemNode::default()
        };
        Arc::new(MemStore {
            tree: Mutex::new(Tree::new(root)),
        })
    }

    fn create(&self, path: &DavPath, is_dir: bool) -> StoreResult<ResourceId> {
        let parent = path.parent().ok_or(StoreError::Exists)?;
        let name = path
            .segments()
            .last()
            .ok_or(StoreError::Exists)?
            .to_string();
        let mut tree = self.tree.lock();
        let parent_id = tree.lookup(parent.segments())?;
        if !tree.get_node(parent_id)?.is_dir {
            return Err(StoreError::Conflict);
        }
        let node = MemNode {
            is_dir,
            ..MemNode::default()
        };
        trace!("MemStore: create {path:?}");
        Ok(tree.add_child(parent_id, name, node)?)
    }

    /// Create a collection. The parent must exist.
    pub fn create_collection(&self, path: &DavPath) -> StoreResult<ResourceId> {
        self.create(path, true)
    }

    /// Create a non-collection resource. The parent must exist.
    pub fn create_resource(&self, path: &DavPath) -> StoreResult<ResourceId> {
        self.create(path, false)
    }

    /// Record a content change, which changes the etag.
    ///
    /// Takes the tree lock, so do not call this while a transaction on
    /// the same store is open. Use [`StoreTxn::touch`] there.
    pub fn touch(&self, id: ResourceId) -> StoreResult<()> {
        self.tree.lock().get_node_mut(id)?.version += 1;
        Ok(())
    }
}

impl DavResourceStore for MemStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTxn + '_>> {
        Ok(Box::new(MemTxn {
            tree: self.tree.lock(),
            staged: HashMap::new(),
            touched: HashSet::new(),
        }))
    }
}

impl StoreTxn for MemTxn<'_> {
    fn lookup(&self, path: &DavPath) -> StoreResult<ResourceId> {
        Ok(self.tree.lookup(path.segments())?)
    }

    fn parent(&self, id: ResourceId) -> StoreResult<Option<ResourceId>> {
        Ok(self.tree.get_parent(id)?)
    }

    fn children(&self, id: ResourceId) -> StoreResult<Vec<ResourceId>> {
        Ok(self.tree.get_children(id)?)
    }

    fn lock_props(&self, id: ResourceId) -> StoreResult<LockProps> {
        if let Some(props) = self.staged.get(&id) {
            return Ok(props.clone());
        }
        Ok(self.tree.get_node(id)?.props.clone())
    }

    fn write_lock_props(&mut self, id: ResourceId, props: LockProps) -> StoreResult<()> {
        // fail now rather than at commit time.
        self.tree.get_node(id)?;
        trace!("MemStore: stage lock props for {id}: {props:?}");
        self.staged.insert(id, props);
        Ok(())
    }

    fn etag(&self, id: ResourceId) -> StoreResult<String> {
        let node = self.tree.get_node(id)?;
        let version = node.version + u64::from(self.touched.contains(&id));
        Ok(format!("{:x}-{:x}", id, version))
    }

    fn touch(&mut self, id: ResourceId) -> StoreResult<()> {
        self.tree.get_node(id)?;
        trace!("MemStore: stage content change for {id}");
        self.touched.insert(id);
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemTxn {
            mut tree,
            staged,
            touched,
        } = *self;
        for (id, props) in staged {
            tree.get_node_mut(id)?.props = props;
        }
        for id in touched {
            tree.get_node_mut(id)?.version += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> DavPath {
        DavPath::new(p).unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let store = MemStore::new();
        let a = store.create_collection(&path("/a/")).unwrap();
        let b = store.create_resource(&path("/a/b")).unwrap();
        assert_eq!(
            store.create_resource(&path("/a/b")).unwrap_err(),
            StoreError::Exists
        );
        assert_eq!(
            store.create_resource(&path("/a/b/c")).unwrap_err(),
            StoreError::Conflict
        );
        assert_eq!(
            store.create_resource(&path("/x/y")).unwrap_err(),
            StoreError::NotFound
        );

        let txn = store.begin().unwrap();
        assert_eq!(txn.lookup(&path("/a/b")), Ok(b));
        assert_eq!(txn.parent(b), Ok(Some(a)));
        assert_eq!(txn.parent(tree::ROOT_ID), Ok(None));
        assert_eq!(txn.children(a), Ok(vec![b]));
    }

    #[test]
    fn test_etag_changes() {
        let store = MemStore::new();
        let a = store.create_resource(&path("/a")).unwrap();
        let before = store.begin().unwrap().etag(a).unwrap();
        store.touch(a).unwrap();
        let after = store.begin().unwrap().etag(a).unwrap();
        assert_ne!(before, after);

        // staged in a transaction, kept only on commit.
        {
            let mut txn = store.begin().unwrap();
            txn.touch(a).unwrap();
            assert_ne!(txn.etag(a).unwrap(), after);
        }
        assert_eq!(store.begin().unwrap().etag(a).unwrap(), after);

        let mut txn = store.begin().unwrap();
        txn.touch(a).unwrap();
        let staged = txn.etag(a).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.begin().unwrap().etag(a).unwrap(), staged);
        assert_eq!(store.begin().unwrap().touch(999), Err(StoreError::NotFound));
    }

    #[test]
    fn test_commit_and_rollback() {
        let store = MemStore::new();
        let a = store.create_resource(&path("/a")).unwrap();
        let props = LockProps {
            token: Some("opaquelocktoken:1".to_string()),
            ..LockProps::default()
        };

        // dropped without commit: nothing happened.
        {
            let mut txn = store.begin().unwrap();
            txn.write_lock_props(a, props.clone()).unwrap();
            assert_eq!(txn.lock_props(a).unwrap(), props);
        }
        assert_eq!(
            store.begin().unwrap().lock_props(a).unwrap(),
            LockProps::default()
        );

        let mut txn = store.begin().unwrap();
        txn.write_lock_props(a, props.clone()).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.begin().unwrap().lock_props(a).unwrap(), props);

        let mut txn = store.begin().unwrap();
        assert_eq!(
            txn.write_lock_props(999, props),
            Err(StoreError::NotFound)
        );
    }
}
