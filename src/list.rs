//! An intrusive doubly-linked list with stable, checked node handles.
//!
//! [`OrderingList`] stores its nodes in a generational arena and links them by index, so pushing,
//! unlinking and moving a node to the front are all O(1) without any `unsafe` pointer juggling.
//! Pushing a value hands back a [`NodeRef`] that can later be used to find, move or remove that
//! node directly.
//!
//! A [`NodeRef`] never dangles: once its node is removed (or the list is cleared), or when it is
//! used with a different list than the one that created it, operations return [`StaleNode`]
//! instead of touching unrelated nodes.
//!
//! ```
//! use runnel::list::OrderingList;
//!
//! let mut list = OrderingList::new();
//! let a = list.push_front("a");
//! let b = list.push_front("b");
//! list.push_back("c");
//! assert_eq!(list.iter().copied().collect::<Vec<_>>(), ["b", "a", "c"]);
//!
//! list.move_to_front(a).unwrap();
//! assert_eq!(list.remove(b), Ok("b"));
//! assert!(list.remove(b).is_err());
//! assert_eq!(list.iter().copied().collect::<Vec<_>>(), ["a", "c"]);
//! ```

use std::{
    error::Error,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use generational_arena::{Arena, Index};

/// Source of list identities, so that a [`NodeRef`] can't be used with a foreign list.
static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(0);

fn next_list_id() -> u64 {
    NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A handle to a node in an [`OrderingList`].
///
/// Handles are cheap to copy. They stay valid until the node is removed or the list is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    list: u64,
    index: Index,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<Index>,
    next: Option<Index>,
}

/// A doubly-linked list supporting O(1) removal and move-to-front of arbitrary nodes.
///
/// The front of the list is the "head", the back is the "tail". Both are [`None`] exactly when the
/// list is empty.
#[derive(Debug)]
pub struct OrderingList<T> {
    id: u64,
    nodes: Arena<Node<T>>,
    head: Option<Index>,
    tail: Option<Index>,
}

impl<T> Default for OrderingList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrderingList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            id: next_list_id(),
            nodes: Arena::new(),
            head: None,
            tail: None,
        }
    }

    /// Creates an empty list with room for `capacity` nodes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Arena::with_capacity(capacity),
            ..Self::new()
        }
    }

    /// Returns the number of nodes in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a handle to the first node, or [`None`] if the list is empty.
    #[inline]
    pub fn front(&self) -> Option<NodeRef> {
        self.head.map(|index| self.node_ref(index))
    }

    /// Returns a handle to the last node, or [`None`] if the list is empty.
    #[inline]
    pub fn back(&self) -> Option<NodeRef> {
        self.tail.map(|index| self.node_ref(index))
    }

    /// Inserts `value` at the front of the list.
    pub fn push_front(&mut self, value: T) -> NodeRef {
        let index = self.nodes.insert(Node {
            value,
            prev: None,
            next: None,
        });
        self.link_front(index);
        self.node_ref(index)
    }

    /// Inserts `value` at the back of the list.
    pub fn push_back(&mut self, value: T) -> NodeRef {
        let index = self.nodes.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(old_tail) => self.nodes[old_tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.node_ref(index)
    }

    /// Unlinks the node behind `node` and returns its value.
    ///
    /// Every node can be removed once; afterwards `node` is stale.
    pub fn remove(&mut self, node: NodeRef) -> Result<T, StaleNode> {
        let index = self.resolve(node)?;
        self.unlink(index);
        match self.nodes.remove(index) {
            Some(node) => Ok(node.value),
            None => Err(StaleNode),
        }
    }

    /// Removes the last node and returns its value.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.back()?;
        self.remove(tail).ok()
    }

    /// Moves `node` to the front of the list. Does nothing if it already is the front.
    pub fn move_to_front(&mut self, node: NodeRef) -> Result<(), StaleNode> {
        let index = self.resolve(node)?;
        if self.head != Some(index) {
            self.unlink(index);
            self.link_front(index);
        }
        Ok(())
    }

    /// Returns a reference to the value stored in `node`.
    pub fn get(&self, node: NodeRef) -> Option<&T> {
        let index = self.resolve(node).ok()?;
        self.nodes.get(index).map(|node| &node.value)
    }

    /// Returns a mutable reference to the value stored in `node`.
    pub fn get_mut(&mut self, node: NodeRef) -> Option<&mut T> {
        let index = self.resolve(node).ok()?;
        self.nodes.get_mut(index).map(|node| &mut node.value)
    }

    /// Returns the node following `node` (towards the back).
    pub fn next(&self, node: NodeRef) -> Option<NodeRef> {
        let index = self.resolve(node).ok()?;
        self.nodes[index].next.map(|next| self.node_ref(next))
    }

    /// Returns the node preceding `node` (towards the front).
    pub fn prev(&self, node: NodeRef) -> Option<NodeRef> {
        let index = self.resolve(node).ok()?;
        self.nodes[index].prev.map(|prev| self.node_ref(prev))
    }

    /// Removes every node. All previously handed out [`NodeRef`]s become stale.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Iterates over the values from front to back.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
            remaining: self.len(),
        }
    }

    fn node_ref(&self, index: Index) -> NodeRef {
        NodeRef {
            list: self.id,
            index,
        }
    }

    fn resolve(&self, node: NodeRef) -> Result<Index, StaleNode> {
        if node.list == self.id && self.nodes.contains(node.index) {
            Ok(node.index)
        } else {
            Err(StaleNode)
        }
    }

    // Detaches `index` from its neighbors, fixing up head/tail. The node stays in the arena.
    fn unlink(&mut self, index: Index) {
        let (prev, next) = {
            let node = &self.nodes[index];
            (node.prev, node.next)
        };

        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }

        let node = &mut self.nodes[index];
        node.prev = None;
        node.next = None;
    }

    // Links a detached node in as the new head.
    fn link_front(&mut self, index: Index) {
        let old_head = self.head;
        self.nodes[index].prev = None;
        self.nodes[index].next = old_head;
        match old_head {
            Some(old_head) => self.nodes[old_head].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }
}

impl<'a, T> IntoIterator for &'a OrderingList<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Front-to-back iterator returned by [`OrderingList::iter`].
pub struct Iter<'a, T> {
    list: &'a OrderingList<T>,
    cursor: Option<Index>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = &self.list.nodes[self.cursor?];
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}

/// An error returned when a [`NodeRef`] no longer refers to a node of the list it is used with.
///
/// This happens when the node was already removed, the list was cleared, or the handle was created
/// by another list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleNode;

impl Error for StaleNode {}

impl fmt::Display for StaleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("node handle does not belong to this list")
    }
}
