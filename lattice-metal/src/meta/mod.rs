//! Per-object Metadata
//!
//! Every tracked object can carry one `Meta` record holding its watch
//! counts, computed-property cache, dependent-key maps, chain links,
//! listeners and invalidation tags.
//!
//! # Association
//!
//! Metadata is looked up through a thread-local table keyed by object
//! identity. The table never owns the object (`Meta::source` is weak) and the
//! object never owns the table entry: dropping the last handle to an object
//! releases and destroys its metadata.
//!
//! # Inheritance
//!
//! Instances inherit declarations from the metadata of their prototypes.
//! Reads of `watching`, `deps`, `chains`, `mixins`, `bindings` and
//! listeners fall back through `parent()`; writes always go to the object's
//! own record. Nothing is copied until an instance needs to diverge.

mod listeners;
pub(crate) mod tags;

pub use listeners::{Invocation, ListenerFlags, MatchedListener, Method, SuspendGuard};
use listeners::Listener;
pub use tags::Tag;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::error::{KernelError, Result};
use crate::graph::chains::{ChainNode, ChainWatchers};
use crate::object::{Key, Obj, ObjectId, Value, WeakObj};
use crate::reactive::binding::{Binding, ConnectedBinding};

thread_local! {
    static METAS: RefCell<HashMap<ObjectId, Rc<Meta>>> = RefCell::new(HashMap::new());
}

/// Metadata for one tracked object.
pub struct Meta {
    source: WeakObj,

    /// Key -> number of active watchers.
    watching: RefCell<HashMap<Key, u32>>,

    /// Memoized computed values. A missing key is "not cached"; a stored
    /// `Value::Undefined` is a cached undefined.
    cache: RefCell<HashMap<Key, Value>>,

    /// Dependency key -> dependent key -> count.
    deps: RefCell<HashMap<Key, IndexMap<Key, u32>>>,

    /// Chain nodes (possibly rooted at other objects) watching keys of this
    /// object.
    chain_watchers: RefCell<ChainWatchers>,

    /// Root of the dotted-path tree anchored at this object.
    chains: RefCell<Option<Rc<ChainNode>>>,

    listeners: RefCell<Vec<Listener>>,
    listeners_finalized: Cell<bool>,
    suspended: RefCell<Vec<listeners::SuspendMarker>>,

    tags: RefCell<HashMap<Key, Tag>>,
    tag: RefCell<Option<Tag>>,

    mixins: RefCell<IndexSet<Key>>,
    bindings: RefCell<IndexMap<Key, Binding>>,
    /// Live bindings whose target is this object.
    connected: RefCell<Vec<ConnectedBinding>>,

    source_destroying: Cell<bool>,
    source_destroyed: Cell<bool>,
    meta_destroyed: Cell<bool>,
}

/// Return the metadata for `obj`, creating it on first use.
pub fn meta_for(obj: &Obj) -> Rc<Meta> {
    let id = obj.id();
    if let Some(meta) = METAS.with(|metas| metas.borrow().get(&id).cloned()) {
        return meta;
    }

    let meta = Rc::new(Meta::new(obj));
    METAS.with(|metas| metas.borrow_mut().insert(id, Rc::clone(&meta)));
    meta
}

/// Return the metadata for `obj` if it already exists. Never allocates.
pub fn peek_meta(obj: &Obj) -> Option<Rc<Meta>> {
    let id = obj.id();
    METAS.with(|metas| metas.borrow().get(&id).cloned())
}

/// Tear down `obj`'s metadata without running the object's destroy
/// lifecycle. Safe to call more than once.
pub fn destroy_meta(obj: &Obj) {
    if let Some(meta) = peek_meta(obj) {
        meta.destroy();
    }
}

/// Number of live metadata records on this thread.
pub fn live_meta_count() -> usize {
    METAS.with(|metas| metas.borrow().len())
}

/// The nearest metadata on `obj`'s prototype chain, excluding `obj` itself.
pub(crate) fn ancestor_meta(obj: &Obj) -> Option<Rc<Meta>> {
    let mut current = obj.proto();
    while let Some(proto) = current {
        if let Some(meta) = peek_meta(proto) {
            return Some(meta);
        }
        current = proto.proto();
    }
    None
}

/// Own metadata if present, else the nearest ancestor's. For reads that
/// must not allocate.
pub(crate) fn readable_meta(obj: &Obj) -> Option<Rc<Meta>> {
    peek_meta(obj).or_else(|| ancestor_meta(obj))
}

/// Called when the last handle to an object is dropped.
pub(crate) fn release(id: ObjectId) {
    let meta = METAS
        .try_with(|metas| metas.borrow_mut().remove(&id))
        .ok()
        .flatten();
    if let Some(meta) = meta {
        meta.destroy();
    }
}

impl Meta {
    fn new(obj: &Obj) -> Self {
        Self {
            source: obj.downgrade(),
            watching: RefCell::new(HashMap::new()),
            cache: RefCell::new(HashMap::new()),
            deps: RefCell::new(HashMap::new()),
            chain_watchers: RefCell::new(ChainWatchers::default()),
            chains: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            listeners_finalized: Cell::new(false),
            suspended: RefCell::new(Vec::new()),
            tags: RefCell::new(HashMap::new()),
            tag: RefCell::new(None),
            mixins: RefCell::new(IndexSet::new()),
            bindings: RefCell::new(IndexMap::new()),
            connected: RefCell::new(Vec::new()),
            source_destroying: Cell::new(false),
            source_destroyed: Cell::new(false),
            meta_destroyed: Cell::new(false),
        }
    }

    pub fn source(&self) -> Option<Obj> {
        self.source.upgrade()
    }

    pub fn source_id(&self) -> ObjectId {
        self.source.id()
    }

    /// Metadata of the nearest prototype that has any.
    pub fn parent(&self) -> Option<Rc<Meta>> {
        let source = self.source.upgrade()?;
        ancestor_meta(&source)
    }

    /// Run `f` on this record, then on each ancestor, until it yields.
    fn find_inherited<T>(&self, mut f: impl FnMut(&Meta) -> Option<T>) -> Option<T> {
        if let Some(found) = f(self) {
            return Some(found);
        }
        let mut parent = self.parent();
        while let Some(meta) = parent {
            if let Some(found) = f(&meta) {
                return Some(found);
            }
            parent = meta.parent();
        }
        None
    }

    /// Own record and every ancestor, nearest first.
    fn lineage(&self, mut f: impl FnMut(&Meta)) {
        self.find_inherited(|meta| {
            f(meta);
            None::<()>
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.source.upgrade().is_some_and(|obj| obj.is_initialized())
    }

    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.meta_destroyed.get() {
            return Err(KernelError::MetaDestroyed {
                object: self.source.id(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle flags
    // ------------------------------------------------------------------

    pub fn is_source_destroying(&self) -> bool {
        self.source_destroying.get()
    }

    pub(crate) fn set_source_destroying(&self) {
        self.source_destroying.set(true);
    }

    pub fn is_source_destroyed(&self) -> bool {
        self.source_destroyed.get()
    }

    pub(crate) fn set_source_destroyed(&self) {
        self.source_destroyed.set(true);
    }

    pub fn is_meta_destroyed(&self) -> bool {
        self.meta_destroyed.get()
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    pub fn peek_watching(&self, key: &str) -> u32 {
        self.find_inherited(|meta| meta.watching.borrow().get(key).copied())
            .unwrap_or(0)
    }

    pub(crate) fn write_watching(&self, key: &str, count: u32) -> Result<()> {
        self.check_alive()?;
        self.watching.borrow_mut().insert(Key::from(key), count);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dependent keys
    // ------------------------------------------------------------------

    pub fn peek_deps(&self, dep_key: &str, key: &str) -> u32 {
        self.find_inherited(|meta| {
            meta.deps
                .borrow()
                .get(dep_key)
                .and_then(|dependents| dependents.get(key).copied())
        })
        .unwrap_or(0)
    }

    pub(crate) fn write_deps(&self, dep_key: &str, key: &str, count: u32) -> Result<()> {
        self.check_alive()?;
        self.deps
            .borrow_mut()
            .entry(Key::from(dep_key))
            .or_default()
            .insert(Key::from(key), count);
        Ok(())
    }

    pub fn has_deps(&self, dep_key: &str) -> bool {
        self.find_inherited(|meta| meta.deps.borrow().get(dep_key).map(|_| ()))
            .is_some()
    }

    /// Keys currently depending on `dep_key`. Own entries shadow inherited
    /// ones, so a local count of zero hides an inherited dependency.
    pub fn dependents_of(&self, dep_key: &str) -> Vec<Key> {
        let mut seen = HashSet::new();
        let mut dependents = Vec::new();
        self.lineage(|meta| {
            if let Some(inner) = meta.deps.borrow().get(dep_key) {
                for (key, count) in inner {
                    if seen.insert(Key::clone(key)) && *count > 0 {
                        dependents.push(Key::clone(key));
                    }
                }
            }
        });
        dependents
    }

    // ------------------------------------------------------------------
    // Computed cache
    // ------------------------------------------------------------------

    pub fn read_cache(&self, key: &str) -> Option<Value> {
        self.cache.borrow().get(key).cloned()
    }

    pub fn has_cache(&self, key: &str) -> bool {
        self.cache.borrow().contains_key(key)
    }

    pub(crate) fn write_cache(&self, key: &str, value: Value) -> Result<()> {
        self.check_alive()?;
        // the previous value is dropped outside the borrow
        let previous = self.cache.borrow_mut().insert(Key::from(key), value);
        drop(previous);
        Ok(())
    }

    pub(crate) fn remove_cache(&self, key: &str) -> Option<Value> {
        self.cache.borrow_mut().remove(key)
    }

    // ------------------------------------------------------------------
    // Chains
    // ------------------------------------------------------------------

    /// This object's chain root, or the nearest inherited one.
    pub(crate) fn readable_chains(&self) -> Option<Rc<ChainNode>> {
        self.find_inherited(|meta| meta.chains.borrow().clone())
    }

    /// This object's own chain root, copying inherited paths onto a fresh
    /// root anchored at the source the first time it is needed.
    pub(crate) fn writable_chains(&self) -> Result<Rc<ChainNode>> {
        self.check_alive()?;
        if let Some(root) = self.chains.borrow().clone() {
            return Ok(root);
        }

        let source = self.source.upgrade().ok_or(KernelError::MetaDestroyed {
            object: self.source.id(),
        })?;
        let inherited = self.parent().and_then(|parent| parent.readable_chains());

        // Store the root before replaying inherited paths so re-entrant
        // watchers find it instead of building a second tree.
        let root = ChainNode::root(&source);
        *self.chains.borrow_mut() = Some(Rc::clone(&root));
        if let Some(inherited) = inherited {
            inherited.copy_paths_into(&root);
        }
        Ok(root)
    }

    pub(crate) fn chain_watchers(&self) -> &RefCell<ChainWatchers> {
        &self.chain_watchers
    }

    // ------------------------------------------------------------------
    // Mixins and bindings
    // ------------------------------------------------------------------

    pub(crate) fn add_mixin(&self, name: &str) -> Result<()> {
        self.check_alive()?;
        self.mixins.borrow_mut().insert(Key::from(name));
        Ok(())
    }

    pub fn has_mixin(&self, name: &str) -> bool {
        self.find_inherited(|meta| meta.mixins.borrow().contains(name).then_some(()))
            .is_some()
    }

    pub(crate) fn write_bindings(&self, key: &str, binding: Binding) -> Result<()> {
        self.check_alive()?;
        self.bindings.borrow_mut().insert(Key::from(key), binding);
        Ok(())
    }

    /// Declared bindings, own entries shadowing inherited ones.
    pub(crate) fn inherited_bindings(&self) -> Vec<(Key, Binding)> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        self.lineage(|meta| {
            for (key, binding) in meta.bindings.borrow().iter() {
                if seen.insert(Key::clone(key)) {
                    found.push((Key::clone(key), binding.clone()));
                }
            }
        });
        found
    }

    pub(crate) fn clear_bindings(&self) {
        let cleared = std::mem::take(&mut *self.bindings.borrow_mut());
        drop(cleared);
    }

    pub(crate) fn retain_connection(&self, binding: ConnectedBinding) -> Result<()> {
        self.check_alive()?;
        self.connected.borrow_mut().push(binding);
        Ok(())
    }

    pub(crate) fn release_connection(&self, binding: &ConnectedBinding) {
        let released: Vec<ConnectedBinding> = {
            let mut connected = self.connected.borrow_mut();
            let (gone, kept) = std::mem::take(&mut *connected)
                .into_iter()
                .partition(|candidate| candidate.ptr_eq(binding));
            *connected = kept;
            gone
        };
        drop(released);
    }

    /// Bindings currently connected to this object.
    pub fn connected_bindings(&self) -> Vec<ConnectedBinding> {
        self.connected.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Break every cross-object reference held through this record, then
    /// seal it. Idempotent.
    pub fn destroy(&self) {
        if self.meta_destroyed.get() {
            return;
        }

        // Bindings unwatch paths through the chain tree, so they go first.
        let connected = std::mem::take(&mut *self.connected.borrow_mut());
        for binding in &connected {
            binding.disconnect();
        }
        drop(connected);

        // Nodes of our own tree registered on other objects.
        let root = self.chains.borrow_mut().take();
        if let Some(root) = root {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                stack.extend(node.children());
                node.unhook_foreign();
            }
        }

        // Nodes of other trees attached to this object.
        let attached = self.chain_watchers.borrow_mut().drain();
        for node in attached {
            node.detach();
        }

        self.meta_destroyed.set(true);
        tracing::debug!(object = %self.source.id(), "metadata destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_is_created_lazily_and_idempotently() {
        let obj = Obj::new();
        assert!(peek_meta(&obj).is_none());

        let first = meta_for(&obj);
        let second = meta_for(&obj);
        assert!(Rc::ptr_eq(&first, &second));
        assert!(peek_meta(&obj).is_some());
    }

    #[test]
    fn dropping_the_object_releases_its_meta() {
        let before = live_meta_count();
        let obj = Obj::new();
        meta_for(&obj);
        assert_eq!(live_meta_count(), before + 1);
        drop(obj);
        assert_eq!(live_meta_count(), before);
    }

    #[test]
    fn reads_fall_back_to_parent_and_writes_stay_local() {
        let proto = Obj::prototype(None);
        meta_for(&proto).write_watching("name", 2).unwrap();

        let instance = Obj::create(&proto);
        let meta = meta_for(&instance);
        assert!(Rc::ptr_eq(&meta.parent().unwrap(), &meta_for(&proto)));
        assert_eq!(meta.peek_watching("name"), 2);

        meta.write_watching("name", 3).unwrap();
        assert_eq!(meta.peek_watching("name"), 3);
        assert_eq!(meta_for(&proto).peek_watching("name"), 2);
    }

    #[test]
    fn own_deps_shadow_inherited_deps() {
        let proto = Obj::prototype(None);
        meta_for(&proto).write_deps("first", "full", 1).unwrap();
        meta_for(&proto).write_deps("first", "initials", 1).unwrap();

        let instance = Obj::create(&proto);
        let meta = meta_for(&instance);
        assert!(meta.has_deps("first"));
        assert_eq!(meta.dependents_of("first").len(), 2);

        meta.write_deps("first", "full", 0).unwrap();
        let dependents = meta.dependents_of("first");
        assert_eq!(dependents, vec![Key::from("initials")]);
        assert_eq!(meta.peek_deps("first", "full"), 0);
    }

    #[test]
    fn cache_distinguishes_undefined_from_absent() {
        let obj = Obj::new();
        let meta = meta_for(&obj);
        assert!(!meta.has_cache("x"));
        meta.write_cache("x", Value::Undefined).unwrap();
        assert!(meta.has_cache("x"));
        assert_eq!(meta.read_cache("x"), Some(Value::Undefined));
    }

    #[test]
    fn writes_after_destroy_are_rejected() {
        let obj = Obj::new();
        let meta = meta_for(&obj);
        meta.destroy();
        meta.destroy();

        assert!(meta.is_meta_destroyed());
        assert!(matches!(
            meta.write_watching("a", 1),
            Err(KernelError::MetaDestroyed { .. })
        ));
        assert!(meta.write_cache("a", Value::Null).is_err());
        assert!(meta.writable_chains().is_err());
    }

    #[test]
    fn mixins_are_inherited() {
        let proto = Obj::prototype(None);
        meta_for(&proto).add_mixin("Evented").unwrap();
        let instance = Obj::create(&proto);
        assert!(meta_for(&instance).has_mixin("Evented"));
        assert!(!meta_for(&instance).has_mixin("Observable"));
    }
}
