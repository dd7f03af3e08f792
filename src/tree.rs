//
// A simple id-keyed tree, used by the in-memory store.
//
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

pub const ROOT_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NotFound,
    Exists,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Tree<K, D> {
    nodes: HashMap<u64, Node<K, D>>,
    node_id: u64,
}

#[derive(Debug)]
struct Node<K, D> {
    data: D,
    // 0 for the root.
    parent_id: u64,
    children: HashMap<K, u64>,
}

impl<K: Eq + Hash + Debug, D: Debug> Tree<K, D> {
    /// Create a tree with just a root node.
    pub fn new(data: D) -> Tree<K, D> {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            Node {
                data,
                parent_id: 0,
                children: HashMap::new(),
            },
        );
        Tree {
            nodes,
            node_id: ROOT_ID,
        }
    }

    /// Add a child node to an existing node.
    pub fn add_child(&mut self, parent: u64, key: K, data: D) -> Result<u64> {
        self.node_id += 1;
        let id = self.node_id;
        let pnode = self.nodes.get_mut(&parent).ok_or(Error::NotFound)?;
        if pnode.children.contains_key(&key) {
            return Err(Error::Exists);
        }
        pnode.children.insert(key, id);
        self.nodes.insert(
            id,
            Node {
                data,
                parent_id: parent,
                children: HashMap::new(),
            },
        );
        Ok(id)
    }

    pub fn get_child(&self, parent: u64, key: &K) -> Result<u64> {
        let pnode = self.nodes.get(&parent).ok_or(Error::NotFound)?;
        pnode.children.get(key).copied().ok_or(Error::NotFound)
    }

    /// Follow a path of keys down from the root.
    pub fn lookup<'a, I>(&self, path: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        path.into_iter()
            .try_fold(ROOT_ID, |id, key| self.get_child(id, key))
    }

    pub fn get_parent(&self, id: u64) -> Result<Option<u64>> {
        let node = self.nodes.get(&id).ok_or(Error::NotFound)?;
        Ok(match node.parent_id {
            0 => None,
            p => Some(p),
        })
    }

    pub fn get_children(&self, id: u64) -> Result<Vec<u64>> {
        let node = self.nodes.get(&id).ok_or(Error::NotFound)?;
        Ok(node.children.values().copied().collect())
    }

    pub fn get_node(&self, id: u64) -> Result<&D> {
        self.nodes.get(&id).map(|n| &n.data).ok_or(Error::NotFound)
    }

    pub fn get_node_mut(&mut self, id: u64) -> Result<&mut D> {
        self.nodes
            .get_mut(&id)
            .map(|n| &mut n.data)
            .ok_or(Error::NotFound)
    }
}
