//! Object Model
//!
//! Tracked objects are reference-counted handles with a stable identity, an
//! ordered slot table and an optional prototype. The prototype chain plays
//! the role of a class hierarchy: slot lookups and metadata reads fall back
//! through it, writes always land on the object itself.
//!
//! # Kinds
//!
//! - `Instance`: an ordinary object. Changes notify once construction ends.
//! - `Prototype`: a class-level object holding shared slots, observers and
//!   declarations. Changes on a prototype never notify.
//! - `Proxy`: an instance that forwards unknown keys to its `content`.
//!
//! # Ownership
//!
//! An `Obj` owns its slots and its prototype. It never owns its metadata:
//! metadata lives in an identity-keyed table and is released when the last
//! handle to the object is dropped.

pub mod accessors;
pub mod path;
pub(crate) mod proxy;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::Result;
use crate::graph::chains;
use crate::meta;
use crate::reactive::binding;
use crate::reactive::events;
use crate::reactive::property::Slot;

/// Property names and path strings share immutable storage.
pub type Key = Arc<str>;

/// Event sent to an object right before its metadata is torn down.
pub const WILL_DESTROY: &str = "willDestroy";

/// Process-unique identity of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ObjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<object:{}>", self.0)
    }
}

/// The DI container seam. Injected properties resolve `"kind:name"`
/// through the owner attached to an object.
pub trait Owner {
    fn lookup(&self, full_name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Instance,
    Prototype,
    Proxy,
}

struct ObjectInner {
    id: ObjectId,
    kind: ObjectKind,
    proto: Option<Obj>,
    slots: RefCell<IndexMap<Key, Slot>>,
    constructing: Cell<bool>,
    owner: RefCell<Option<Rc<dyn Owner>>>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        meta::release(self.id);
    }
}

/// Strong handle to a tracked object. Cloning shares identity.
#[derive(Clone)]
pub struct Obj(Rc<ObjectInner>);

/// Non-owning handle, used for every cross-object reference the kernel
/// records on its own behalf.
#[derive(Clone)]
pub struct WeakObj {
    id: ObjectId,
    inner: Weak<ObjectInner>,
}

impl WeakObj {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Obj> {
        self.inner.upgrade().map(Obj)
    }
}

impl fmt::Debug for WeakObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObj({})", self.id)
    }
}

impl Obj {
    /// A fresh instance with no prototype.
    pub fn new() -> Self {
        Self::alloc(ObjectKind::Instance, None, false)
    }

    /// A fresh instance inheriting from `proto`.
    ///
    /// Declared bindings are connected and inherited chains are copied onto
    /// the instance before it is returned.
    pub fn create(proto: &Obj) -> Self {
        Self::construct(Some(proto), |_| {})
    }

    /// Build an instance, running `init` before the object counts as
    /// initialized. Declared bindings connect first; neither their initial
    /// copies nor writes made inside `init` notify.
    pub fn construct(proto: Option<&Obj>, init: impl FnOnce(&Obj)) -> Self {
        let obj = Self::alloc(ObjectKind::Instance, proto.cloned(), true);
        obj.connect_declared_bindings();
        init(&obj);
        obj.0.constructing.set(false);
        obj.finish_chains();
        obj
    }

    /// A class-level object. Instances created from it share its slots,
    /// listeners and watch declarations.
    pub fn prototype(parent: Option<&Obj>) -> Self {
        Self::alloc(ObjectKind::Prototype, parent.cloned(), false)
    }

    /// A value proxy forwarding unknown keys to `content`.
    pub fn proxy(content: impl Into<Value>) -> Self {
        let obj = Self::alloc(ObjectKind::Proxy, None, false);
        obj.write_slot(proxy::CONTENT_KEY, Slot::Value(content.into()));
        obj
    }

    /// An instance seeded with plain values.
    pub fn with_props<I, K, V>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let obj = Self::new();
        for (key, value) in props {
            obj.write_slot(key.as_ref(), Slot::Value(value.into()));
        }
        obj
    }

    fn alloc(kind: ObjectKind, proto: Option<Obj>, constructing: bool) -> Self {
        Self(Rc::new(ObjectInner {
            id: ObjectId::next(),
            kind,
            proto,
            slots: RefCell::new(IndexMap::new()),
            constructing: Cell::new(constructing),
            owner: RefCell::new(None),
        }))
    }

    /// Metadata of this object or its prototypes, if any exists yet.
    fn has_any_meta(&self) -> bool {
        meta::peek_meta(self).is_some() || meta::ancestor_meta(self).is_some()
    }

    fn connect_declared_bindings(&self) {
        if !self.has_any_meta() {
            return;
        }
        let meta = meta::meta_for(self);
        if let Err(err) = binding::connect_bindings(self, &meta) {
            tracing::warn!(object = %self.id(), error = %err, "failed to connect declared bindings");
        }
    }

    fn finish_chains(&self) {
        if !self.has_any_meta() {
            return;
        }
        chains::finish_chains(&meta::meta_for(self));
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.0.kind
    }

    pub fn is_prototype(&self) -> bool {
        self.0.kind == ObjectKind::Prototype
    }

    pub fn is_proxy(&self) -> bool {
        self.0.kind == ObjectKind::Proxy
    }

    /// Prototypes and objects still inside `construct` are not initialized;
    /// property changes on them never notify.
    pub fn is_initialized(&self) -> bool {
        !self.is_prototype() && !self.0.constructing.get()
    }

    pub fn proto(&self) -> Option<&Obj> {
        self.0.proto.as_ref()
    }

    pub fn downgrade(&self) -> WeakObj {
        WeakObj {
            id: self.0.id,
            inner: Rc::downgrade(&self.0),
        }
    }

    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Own slot first, then the prototype chain.
    pub fn lookup_slot(&self, key: &str) -> Option<Slot> {
        let mut current = Some(self);
        while let Some(obj) = current {
            if let Some(slot) = obj.0.slots.borrow().get(key) {
                return Some(slot.clone());
            }
            current = obj.proto();
        }
        None
    }

    pub fn own_slot(&self, key: &str) -> Option<Slot> {
        self.0.slots.borrow().get(key).cloned()
    }

    pub fn has_own_property(&self, key: &str) -> bool {
        self.0.slots.borrow().contains_key(key)
    }

    /// Whether `key` resolves anywhere on the prototype chain.
    pub fn has_property(&self, key: &str) -> bool {
        let mut current = Some(self);
        while let Some(obj) = current {
            if obj.has_own_property(key) {
                return true;
            }
            current = obj.proto();
        }
        false
    }

    pub fn own_keys(&self) -> Vec<Key> {
        self.0.slots.borrow().keys().cloned().collect()
    }

    /// Replace the own slot for `key`, returning the previous one. Callers
    /// drop the returned slot after the borrow is released, so a value whose
    /// drop tears down another object cannot re-enter this table.
    pub(crate) fn write_slot(&self, key: &str, slot: Slot) -> Option<Slot> {
        let mut slots = self.0.slots.borrow_mut();
        match slots.get_mut(key) {
            Some(existing) => Some(std::mem::replace(existing, slot)),
            None => {
                slots.insert(Key::from(key), slot);
                None
            }
        }
    }

    pub fn set_owner(&self, owner: Rc<dyn Owner>) {
        *self.0.owner.borrow_mut() = Some(owner);
    }

    /// The owner attached to this object or, failing that, to its prototype
    /// chain.
    pub fn owner(&self) -> Option<Rc<dyn Owner>> {
        let mut current = Some(self);
        while let Some(obj) = current {
            if let Some(owner) = obj.0.owner.borrow().as_ref() {
                return Some(Rc::clone(owner));
            }
            current = obj.proto();
        }
        None
    }

    /// Shorthand for [`accessors::get`].
    pub fn get(&self, key: &str) -> Value {
        accessors::get(self, key)
    }

    /// Shorthand for [`accessors::set`].
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        accessors::set(self, key, value.into())
    }

    /// Tear the object down: `willDestroy` listeners run, chains that cross
    /// into other objects are unhooked and the metadata is sealed.
    pub fn destroy(&self) {
        let meta = meta::meta_for(self);
        if meta.is_source_destroying() {
            return;
        }
        meta.set_source_destroying();
        events::send_event(self, WILL_DESTROY, &[]);
        meta.destroy();
        meta.set_source_destroyed();
        tracing::debug!(object = %self.id(), "object destroyed");
    }

    pub fn is_destroying(&self) -> bool {
        meta::peek_meta(self).is_some_and(|m| m.is_source_destroying())
    }

    pub fn is_destroyed(&self) -> bool {
        meta::peek_meta(self).is_some_and(|m| m.is_source_destroyed())
    }
}

impl Default for Obj {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({})", self.0.id)
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.id, f)
    }
}

/// A property value.
///
/// Primitives compare by value, objects by identity.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(Obj),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&Obj> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::String(s)
    }
}

impl From<Obj> for Value {
    fn from(obj: Obj) -> Self {
        Value::Object(obj)
    }
}

impl From<&Obj> for Value {
    fn from(obj: &Obj) -> Self {
        Value::Object(obj.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Undefined, Into::into)
    }
}
