//! TB-002: Construct tree shared by the cloud and provisioning graphs.
//!
//! A tree of `Rc<Node<K>>` where `K` is the graph-specific payload. Children
//! keep insertion order; parents are weak so dropping the root frees the tree.

use super::error::{BridgeError, Result};
use indexmap::IndexMap;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

/// Path separator used in construct paths.
pub const PATH_SEP: char = '/';

/// One construct in a tree.
pub struct Node<K> {
    id: String,
    parent: Weak<Node<K>>,
    children: RefCell<IndexMap<String, Rc<Node<K>>>>,
    kind: RefCell<K>,
}

impl<K> Node<K> {
    /// Create a tree root.
    pub fn root(id: &str, kind: K) -> Rc<Self> {
        Rc::new(Self {
            id: id.to_string(),
            parent: Weak::new(),
            children: RefCell::new(IndexMap::new()),
            kind: RefCell::new(kind),
        })
    }

    /// Add a child under `self`. Ids must be unique among siblings.
    pub fn add_child(self: &Rc<Self>, id: &str, kind: K) -> Result<Rc<Self>> {
        if self.children.borrow().contains_key(id) {
            return Err(BridgeError::DuplicateConstruct {
                parent: self.display_path(),
                id: id.to_string(),
            });
        }
        let child = Rc::new(Self {
            id: id.to_string(),
            parent: Rc::downgrade(self),
            children: RefCell::new(IndexMap::new()),
            kind: RefCell::new(kind),
        });
        self.children
            .borrow_mut()
            .insert(id.to_string(), Rc::clone(&child));
        Ok(child)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<Rc<Self>> {
        self.parent.upgrade()
    }

    pub fn kind(&self) -> Ref<'_, K> {
        self.kind.borrow()
    }

    pub fn kind_mut(&self) -> RefMut<'_, K> {
        self.kind.borrow_mut()
    }

    /// Direct children in insertion order.
    pub fn children(&self) -> Vec<Rc<Self>> {
        self.children.borrow().values().cloned().collect()
    }

    pub fn try_find_child(&self, id: &str) -> Option<Rc<Self>> {
        self.children.borrow().get(id).cloned()
    }

    /// Detach a direct child. Returns false when no such child exists.
    pub fn try_remove_child(&self, id: &str) -> bool {
        self.children.borrow_mut().shift_remove(id).is_some()
    }

    /// Ancestors from the root down to and including `self`.
    pub fn scopes(self: &Rc<Self>) -> Vec<Rc<Self>> {
        let mut out = vec![Rc::clone(self)];
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            cursor = node.parent();
            out.push(node);
        }
        out.reverse();
        out
    }

    /// `self` and all descendants, pre-order.
    pub fn find_all(self: &Rc<Self>) -> Vec<Rc<Self>> {
        let mut out = Vec::new();
        let mut stack = vec![Rc::clone(self)];
        while let Some(node) = stack.pop() {
            let children = node.children();
            out.push(node);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Nearest ancestor (or self) matching `pred`.
    pub fn find_ancestor(self: &Rc<Self>, pred: impl Fn(&K) -> bool) -> Option<Rc<Self>> {
        let mut cursor = Some(Rc::clone(self));
        while let Some(node) = cursor {
            if pred(&node.kind()) {
                return Some(node);
            }
            cursor = node.parent();
        }
        None
    }

    /// Slash-joined ids, skipping empty root ids.
    pub fn path(self: &Rc<Self>) -> String {
        self.scopes()
            .iter()
            .filter(|n| !n.id.is_empty())
            .map(|n| n.id.as_str())
            .collect::<Vec<_>>()
            .join(&PATH_SEP.to_string())
    }

    fn display_path(self: &Rc<Self>) -> String {
        let p = self.path();
        if p.is_empty() {
            "<root>".to_string()
        } else {
            p
        }
    }

    pub fn ptr_eq(a: &Rc<Self>, b: &Rc<Self>) -> bool {
        Rc::ptr_eq(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Rc<Node<&'static str>> {
        let root = Node::root("", "app");
        let stack = root.add_child("stack", "stack").unwrap();
        let a = stack.add_child("a", "group").unwrap();
        a.add_child("leaf", "element").unwrap();
        stack.add_child("b", "element").unwrap();
        root
    }

    #[test]
    fn test_tb002_paths_skip_empty_root() {
        let root = tree();
        let leaf = root.find_all().into_iter().find(|n| n.id() == "leaf").unwrap();
        assert_eq!(leaf.path(), "stack/a/leaf");
        assert_eq!(root.path(), "");
    }

    #[test]
    fn test_tb002_find_all_preorder() {
        let root = tree();
        let ids: Vec<_> = root.find_all().iter().map(|n| n.id().to_string()).collect();
        assert_eq!(ids, vec!["", "stack", "a", "leaf", "b"]);
    }

    #[test]
    fn test_tb002_duplicate_child_rejected() {
        let root = tree();
        let stack = root.try_find_child("stack").unwrap();
        let err = stack.add_child("a", "dup").err().unwrap();
        assert!(err.to_string().contains("already a construct with name 'a'"));
    }

    #[test]
    fn test_tb002_remove_child() {
        let root = tree();
        let stack = root.try_find_child("stack").unwrap();
        assert!(stack.try_remove_child("a"));
        assert!(!stack.try_remove_child("a"));
        assert_eq!(root.find_all().len(), 3);
    }

    #[test]
    fn test_tb002_find_ancestor() {
        let root = tree();
        let leaf = root.find_all().into_iter().find(|n| n.id() == "leaf").unwrap();
        let stack = leaf.find_ancestor(|k| *k == "stack").unwrap();
        assert_eq!(stack.id(), "stack");
        assert!(leaf.find_ancestor(|k| *k == "nothing").is_none());
    }
}
