//! Chains
//!
//! A chain is a tree of nodes, rooted at one object, that keeps a dotted
//! path such as `"a.b.c"` observed while the objects along it change.
//!
//! # How Chains Work
//!
//! ```text
//!   root (object R)
//!     └─ "a"   attached to R, watches R.a
//!          └─ "b"   attached to R.a, watches (R.a).b
//!               └─ "c"   attached to R.a.b, watches (R.a.b).c
//! ```
//!
//! Every non-root node registers itself as a *chain watcher* on the object
//! its parent currently resolves to, which also bumps that object's watch
//! count for the node's key. When the key changes, the object's metadata
//! notifies its chain watchers; each node re-resolves its parent's value,
//! moves its registration if the identity changed, and reports the full
//! paths that may have changed as `(root object, path)` pairs.
//!
//! Nodes are reference counted by the paths passing through them and are
//! destroyed (and deregistered) when that count reaches zero.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::graph::watching;
use crate::meta::{meta_for, peek_meta, Meta};
use crate::object::accessors;
use crate::object::path::Path;
use crate::object::{Key, Obj, Value, WeakObj};
use crate::reactive::property::Slot;

// ----------------------------------------------------------------------------
// Chain watchers
// ----------------------------------------------------------------------------

/// Back-references from an object's metadata to the chain nodes attached
/// to it, grouped by key.
#[derive(Default)]
pub(crate) struct ChainWatchers {
    chains: IndexMap<Key, Vec<Weak<ChainNode>>>,
}

impl ChainWatchers {
    pub(crate) fn add(&mut self, key: &Key, node: &Rc<ChainNode>) {
        self.chains
            .entry(Key::clone(key))
            .or_default()
            .push(Rc::downgrade(node));
    }

    /// Remove one registration of `node`. Returns whether it was present.
    pub(crate) fn remove(&mut self, key: &str, node: &ChainNode) -> bool {
        let Some(nodes) = self.chains.get_mut(key) else {
            return false;
        };
        let target: *const ChainNode = node;
        match nodes.iter().position(|weak| weak.as_ptr() == target) {
            Some(index) => {
                nodes.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has(&self, key: &str, node: &ChainNode) -> bool {
        let target: *const ChainNode = node;
        self.chains
            .get(key)
            .is_some_and(|nodes| nodes.iter().any(|weak| weak.as_ptr() == target))
    }

    pub(crate) fn count(&self, key: &str) -> usize {
        self.chains.get(key).map_or(0, Vec::len)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chains.values().all(Vec::is_empty)
    }

    /// Live nodes registered under `key`.
    fn nodes(&self, key: &str) -> Vec<Rc<ChainNode>> {
        self.chains
            .get(key)
            .map(|nodes| nodes.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<Key> {
        self.chains.keys().cloned().collect()
    }

    /// Remove and return every live registration.
    pub(crate) fn drain(&mut self) -> Vec<Rc<ChainNode>> {
        std::mem::take(&mut self.chains)
            .into_values()
            .flatten()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }
}

/// Notify the chain nodes watching `key` on `meta`'s object. Returns the
/// `(root, path)` pairs whose value may have changed.
pub(crate) fn notify_chain_watchers(meta: &Meta, key: &str, revalidate: bool) -> Vec<(Obj, Key)> {
    let nodes = meta.chain_watchers().borrow().nodes(key);
    let mut affected = Vec::new();
    for node in nodes {
        node.notify(revalidate, Some(&mut affected));
    }
    affected
}

/// Re-resolve the nodes watching `key` without reporting anything.
pub(crate) fn revalidate(meta: &Meta, key: &str) {
    let nodes = meta.chain_watchers().borrow().nodes(key);
    for node in nodes {
        node.notify(true, None);
    }
}

pub(crate) fn revalidate_all(meta: &Meta) {
    let keys = meta.chain_watchers().borrow().keys();
    for key in keys {
        revalidate(meta, &key);
    }
}

/// Run once an instance is fully constructed: re-resolve nodes that were
/// attached to it early and give it its own copy of any inherited chains.
pub(crate) fn finish_chains(meta: &Meta) {
    revalidate_all(meta);
    if meta.readable_chains().is_some() {
        if let Err(err) = meta.writable_chains() {
            tracing::warn!(object = %meta.source_id(), error = %err, "failed to copy inherited chains");
        }
    }
}

/// Register `node` as watching `obj.key`. Returns false when `obj` can no
/// longer be watched.
fn add_chain_watcher(obj: &Obj, key: &Key, node: &Rc<ChainNode>) -> bool {
    let meta = meta_for(obj);
    if meta.is_meta_destroyed() {
        return false;
    }
    debug_assert!(!meta.chain_watchers().borrow().has(key, node));
    meta.chain_watchers().borrow_mut().add(key, node);
    if let Err(err) = watching::watch_key(obj, key, &meta) {
        tracing::warn!(object = %obj.id(), key = %key, error = %err, "chain watcher could not watch key");
    }
    tracing::trace!(object = %obj.id(), key = %key, "chain node attached");
    true
}

fn remove_chain_watcher(obj: &Obj, key: &str, node: &ChainNode) {
    let Some(meta) = peek_meta(obj) else {
        return;
    };
    if meta.is_meta_destroyed() {
        return;
    }
    let removed = meta.chain_watchers().borrow_mut().remove(key, node);
    if removed {
        if let Err(err) = watching::unwatch_key(obj, key, &meta) {
            tracing::warn!(object = %obj.id(), key = %key, error = %err, "chain watcher could not unwatch key");
        }
        tracing::trace!(object = %obj.id(), key = %key, "chain node detached");
    }
}

/// The object a node may attach to: not a prototype and not torn down.
fn watchable(value: &Value) -> Option<&Obj> {
    let obj = value.as_object()?;
    if obj.is_prototype() {
        return None;
    }
    if peek_meta(obj).is_some_and(|meta| meta.is_meta_destroyed()) {
        return None;
    }
    Some(obj)
}

/// Read `key` without forcing a cached computed property to compute.
fn lazy_get(value: &Value, key: &str) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Undefined;
    };
    if obj.is_prototype() {
        return Value::Undefined;
    }
    match obj.lookup_slot(key) {
        Some(Slot::Computed(cp)) if !cp.is_volatile() => cached(obj, key),
        Some(Slot::Injected(_)) => cached(obj, key),
        _ => accessors::get(obj, key),
    }
}

fn cached(obj: &Obj, key: &str) -> Value {
    peek_meta(obj)
        .and_then(|meta| meta.read_cache(key))
        .unwrap_or_default()
}

// ----------------------------------------------------------------------------
// Chain nodes
// ----------------------------------------------------------------------------

pub(crate) struct ChainNode {
    parent: Option<Weak<ChainNode>>,
    /// `None` only on a root.
    key: Option<Key>,
    /// Roots never watch; other nodes stop watching once destroyed.
    watching: Cell<bool>,
    /// The object this node is attached to (for a root, the root object).
    object: RefCell<Option<WeakObj>>,
    /// Lazily resolved `parent.value()[key]`.
    value: RefCell<Option<Value>>,
    count: Cell<u32>,
    children: RefCell<IndexMap<Key, Rc<ChainNode>>>,
    /// Root only: full path -> number of registrations.
    paths: RefCell<IndexMap<Key, u32>>,
}

impl ChainNode {
    pub(crate) fn root(obj: &Obj) -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            key: None,
            watching: Cell::new(false),
            object: RefCell::new(Some(obj.downgrade())),
            value: RefCell::new(None),
            count: Cell::new(0),
            children: RefCell::new(IndexMap::new()),
            paths: RefCell::new(IndexMap::new()),
        })
    }

    fn child(parent: &Rc<Self>, key: &Key) -> Rc<Self> {
        let node = Rc::new(Self {
            parent: Some(Rc::downgrade(parent)),
            key: Some(Key::clone(key)),
            watching: Cell::new(true),
            object: RefCell::new(None),
            value: RefCell::new(None),
            count: Cell::new(0),
            children: RefCell::new(IndexMap::new()),
            paths: RefCell::new(IndexMap::new()),
        });

        let parent_value = parent.value();
        if let Some(obj) = watchable(&parent_value) {
            if add_chain_watcher(obj, key, &node) {
                *node.object.borrow_mut() = Some(obj.downgrade());
            }
        }
        node
    }

    fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn parent(&self) -> Option<Rc<ChainNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    #[cfg(test)]
    pub(crate) fn is_watching(&self) -> bool {
        self.watching.get()
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> u32 {
        self.count.get()
    }

    /// The object this node is attached to, if it is still alive.
    pub(crate) fn attached_object(&self) -> Option<Obj> {
        self.object.borrow().as_ref().and_then(WeakObj::upgrade)
    }

    pub(crate) fn children(&self) -> Vec<Rc<ChainNode>> {
        self.children.borrow().values().cloned().collect()
    }

    pub(crate) fn child_for(&self, key: &str) -> Option<Rc<ChainNode>> {
        self.children.borrow().get(key).cloned()
    }

    #[cfg(test)]
    /// Registered paths and their counts (roots only).
    pub(crate) fn paths(&self) -> Vec<(Key, u32)> {
        self.paths
            .borrow()
            .iter()
            .map(|(path, count)| (Key::clone(path), *count))
            .collect()
    }

    pub(crate) fn value(&self) -> Value {
        if self.is_root() {
            return self
                .attached_object()
                .map_or(Value::Undefined, Value::Object);
        }

        if self.watching.get() && self.value.borrow().is_none() {
            let resolved = match (self.parent(), &self.key) {
                (Some(parent), Some(key)) => lazy_get(&parent.value(), key),
                _ => Value::Undefined,
            };
            *self.value.borrow_mut() = Some(resolved);
        }
        self.value.borrow().clone().unwrap_or_default()
    }

    /// Register `path` on this root.
    pub(crate) fn add(self: &Rc<Self>, path: &str) {
        *self.paths.borrow_mut().entry(Key::from(path)).or_insert(0) += 1;
        let parsed = Path::parse(path);
        self.chain(parsed.segments());
    }

    /// Drop one registration of `path` from this root.
    pub(crate) fn remove(self: &Rc<Self>, path: &str) {
        {
            let mut paths = self.paths.borrow_mut();
            match paths.get_mut(path) {
                Some(count) if *count > 0 => *count -= 1,
                _ => return,
            }
        }
        let parsed = Path::parse(path);
        self.unchain(parsed.segments());
    }

    fn chain(self: &Rc<Self>, segments: &[Key]) {
        let Some((key, rest)) = segments.split_first() else {
            return;
        };

        let existing = self.child_for(key);
        let node = match existing {
            Some(node) => node,
            None => {
                // Built outside the borrow: attaching may re-enter this tree.
                let created = ChainNode::child(self, key);
                let mut children = self.children.borrow_mut();
                match children.get(key) {
                    Some(raced) => {
                        let raced = Rc::clone(raced);
                        drop(children);
                        created.destroy();
                        raced
                    }
                    None => {
                        children.insert(Key::clone(key), Rc::clone(&created));
                        created
                    }
                }
            }
        };

        node.count.set(node.count.get() + 1);
        node.chain(rest);
    }

    fn unchain(&self, segments: &[Key]) {
        let Some((key, rest)) = segments.split_first() else {
            return;
        };
        let Some(node) = self.child_for(key) else {
            return;
        };

        if !rest.is_empty() {
            node.unchain(rest);
        }

        node.count.set(node.count.get().saturating_sub(1));
        if node.count.get() == 0 {
            let removed = self.children.borrow_mut().shift_remove(key);
            node.destroy();
            drop(removed);
        }
    }

    /// Stop watching: deregister from the attached object.
    fn destroy(&self) {
        if !self.watching.get() {
            return;
        }
        self.watching.set(false);
        let attached = self.object.borrow_mut().take();
        if let (Some(obj), Some(key)) = (attached.and_then(|weak| weak.upgrade()), &self.key) {
            remove_chain_watcher(&obj, key, self);
        }
    }

    /// Used while the metadata owning this node's tree is destroyed:
    /// deregister from a foreign object unless it is going away as well.
    pub(crate) fn unhook_foreign(&self) {
        if !self.watching.get() {
            return;
        }
        self.watching.set(false);
        let attached = self.object.borrow_mut().take();
        let (Some(obj), Some(key)) = (attached.and_then(|weak| weak.upgrade()), &self.key) else {
            return;
        };
        let foreign_destroying = peek_meta(&obj).is_some_and(|meta| meta.is_source_destroying());
        if !foreign_destroying {
            remove_chain_watcher(&obj, key, self);
        }
    }

    /// Used when the object this node is attached to is destroyed. The node
    /// keeps watching so a later revalidation can attach it elsewhere.
    pub(crate) fn detach(&self) {
        let attached = self.object.borrow_mut().take();
        let stale = self.value.borrow_mut().take();
        drop((attached, stale));
    }

    /// React to a change of this node's key on its attached object.
    pub(crate) fn notify(self: &Rc<Self>, revalidate: bool, mut affected: Option<&mut Vec<(Obj, Key)>>) {
        if revalidate && self.watching.get() {
            if let Some(key) = &self.key {
                self.reattach(key);
            }
            let stale = self.value.borrow_mut().take();
            drop(stale);
        }

        for child in self.children() {
            child.notify(revalidate, affected.as_deref_mut());
        }

        if let (Some(affected), Some(key), Some(parent)) = (affected, &self.key, self.parent()) {
            parent.populate_affected(key.to_string(), 1, affected);
        }
    }

    /// Move this node's registration to whatever its parent resolves to now.
    fn reattach(self: &Rc<Self>, key: &Key) {
        let parent_value = self.parent().map(|parent| parent.value()).unwrap_or_default();
        let next = watchable(&parent_value);
        let current = self.object.borrow().clone();

        let unchanged = match (&current, next) {
            (Some(current), Some(next)) => current.id() == next.id(),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        *self.object.borrow_mut() = None;
        if let Some(old) = current.and_then(|weak| weak.upgrade()) {
            remove_chain_watcher(&old, key, self);
        }
        if let Some(next) = next {
            if add_chain_watcher(next, key, self) {
                *self.object.borrow_mut() = Some(next.downgrade());
            }
        }
    }

    fn populate_affected(&self, path: String, depth: usize, affected: &mut Vec<(Obj, Key)>) {
        let path = match &self.key {
            Some(key) => format!("{key}.{path}"),
            None => path,
        };

        if !self.is_root() {
            if let Some(parent) = self.parent() {
                parent.populate_affected(path, depth + 1, affected);
            }
        } else if depth > 1 {
            if let Value::Object(root) = self.value() {
                affected.push((root, Key::from(path)));
            }
        }
    }

    /// Register every live path of this root on `target`.
    pub(crate) fn copy_paths_into(&self, target: &Rc<ChainNode>) {
        let paths: Vec<Key> = self
            .paths
            .borrow()
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(path, _)| Key::clone(path))
            .collect();
        for path in paths {
            target.add(&path);
        }
    }

    /// A fresh root anchored at `obj` carrying this root's paths.
    #[cfg(test)]
    pub(crate) fn copy(&self, obj: &Obj) -> Rc<ChainNode> {
        let root = ChainNode::root(obj);
        self.copy_paths_into(&root);
        root
    }
}
