//! Computed Properties
//!
//! A computed property is a derived value with an explicit list of
//! dependent keys. The descriptor is shared (typically installed on a
//! prototype); the cached value lives in each instance's metadata.
//!
//! # How Caching Works
//!
//! Per (descriptor, instance) pair the cache moves between two states:
//!
//! 1. **Uncached** → first `get` runs the getter, stores the result and
//!    registers the property as a dependent of each dependent key (which
//!    also starts watching those keys).
//! 2. **Cached** → `get` returns the stored value. A change to any dependent
//!    key evicts it and unregisters the dependencies, back to (1).
//!
//! Volatile properties skip all of this and call the getter every time.
//!
//! # Setters
//!
//! While a setter runs, the descriptor is *suspended* for that object:
//! changes the setter triggers do not evict the cache it is about to fill,
//! and dependency invalidation skips the property.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::{KernelError, Result};
use crate::graph::chains;
use crate::meta::{meta_for, peek_meta, Meta};
use crate::object::path::expand_properties;
use crate::object::{accessors, Key, Obj, ObjectId, Value};
use crate::reactive::dependent_keys::{add_dependent_keys, remove_dependent_keys};
use crate::reactive::notify;
use crate::reactive::property::{define_property, Slot};

pub type Getter = Rc<dyn Fn(&Obj, &str) -> Value>;

/// `(object, key, new value, cached value)` → value to cache.
pub type Setter = Rc<dyn Fn(&Obj, &str, Value, Option<Value>) -> Value>;

pub struct ComputedProperty {
    getter: Getter,
    setter: Option<Setter>,
    dependent_keys: Vec<Key>,
    volatile: bool,
    read_only: bool,
    suspended: Cell<Option<ObjectId>>,
    meta: Option<serde_json::Value>,
}

/// A cached computed property depending on `dependent_keys`. Keys may use
/// brace expansion, e.g. `"name.{first,last}"`.
pub fn computed(
    dependent_keys: &[&str],
    getter: impl Fn(&Obj, &str) -> Value + 'static,
) -> Result<ComputedProperty> {
    ComputedProperty::new(getter).property(dependent_keys)
}

/// Value of `key` in `obj`'s computed cache, without computing it.
pub fn cache_for(obj: &Obj, key: &str) -> Option<Value> {
    peek_meta(obj).and_then(|meta| meta.read_cache(key))
}

/// Marks the descriptor as running its setter for one object, restoring the
/// previous marker on drop.
struct Suspension<'a> {
    marker: &'a Cell<Option<ObjectId>>,
    previous: Option<ObjectId>,
}

impl<'a> Suspension<'a> {
    fn enter(marker: &'a Cell<Option<ObjectId>>, obj: &Obj) -> Self {
        let previous = marker.replace(Some(obj.id()));
        Self { marker, previous }
    }
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        self.marker.set(self.previous);
    }
}

impl ComputedProperty {
    pub fn new(getter: impl Fn(&Obj, &str) -> Value + 'static) -> Self {
        Self {
            getter: Rc::new(getter),
            setter: None,
            dependent_keys: Vec::new(),
            volatile: false,
            read_only: false,
            suspended: Cell::new(None),
            meta: None,
        }
    }

    pub fn with_setter(
        mut self,
        setter: impl Fn(&Obj, &str, Value, Option<Value>) -> Value + 'static,
    ) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Replace the dependent keys.
    pub fn property(mut self, keys: &[&str]) -> Result<Self> {
        let mut expanded = Vec::with_capacity(keys.len());
        for key in keys {
            expanded.extend(expand_properties(key)?.into_iter().map(Key::from));
        }
        self.dependent_keys = expanded;
        Ok(self)
    }

    /// Never cache; call the getter on every read.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Attach free-form metadata, e.g. for serializers.
    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    pub fn dependent_keys(&self) -> &[Key] {
        &self.dependent_keys
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn is_suspended_on(&self, obj: &Obj) -> bool {
        self.suspended.get() == Some(obj.id())
    }

    pub(crate) fn get(&self, obj: &Obj, key: &str) -> Value {
        if self.volatile {
            return (self.getter)(obj, key);
        }

        let meta = meta_for(obj);
        if let Some(cached) = meta.read_cache(key) {
            return cached;
        }

        let value = (self.getter)(obj, key);
        if meta.is_meta_destroyed() || meta.write_cache(key, value.clone()).is_err() {
            return value;
        }

        chains::revalidate(&meta, key);
        if let Err(err) = add_dependent_keys(&self.dependent_keys, obj, key, &meta) {
            tracing::warn!(object = %obj.id(), key, error = %err, "failed to register dependent keys");
        }
        value
    }

    pub(crate) fn set(&self, obj: &Obj, key: &str, value: Value) -> Result<Value> {
        if self.read_only {
            return Err(KernelError::ReadOnly {
                key: key.to_string(),
                object: obj.id(),
            });
        }

        let Some(setter) = &self.setter else {
            return self.clobber_set(obj, key, value);
        };
        if self.volatile {
            return Ok(setter(obj, key, value, None));
        }

        let _suspended = Suspension::enter(&self.suspended, obj);
        self.set_cached(obj, key, value, setter)
    }

    /// No setter: the property turns into a plain value and the write is
    /// redone as an ordinary set.
    fn clobber_set(&self, obj: &Obj, key: &str, value: Value) -> Result<Value> {
        let cached = cache_for(obj, key).unwrap_or_default();
        define_property(obj, key, Slot::Value(cached))?;
        accessors::set(obj, key, value)
    }

    fn set_cached(&self, obj: &Obj, key: &str, value: Value, setter: &Setter) -> Result<Value> {
        let meta = meta_for(obj);
        meta.check_alive()?;

        let previous = meta.read_cache(key);
        let had_cached = previous.is_some();
        let ret = setter(obj, key, value, previous.clone());

        // Setting the value that is already cached changes nothing.
        if previous.as_ref() == Some(&ret) {
            return Ok(ret);
        }

        // A setter that read the property populated the cache and
        // registered dependencies already.
        let populated_by_setter = !had_cached && meta.has_cache(key);

        notify::property_will_change(obj, key);
        if !had_cached && !populated_by_setter {
            add_dependent_keys(&self.dependent_keys, obj, key, &meta)?;
        }
        meta.write_cache(key, ret.clone())?;
        notify::property_did_change(obj, key);
        Ok(ret)
    }

    pub(crate) fn did_change(&self, obj: &Obj, key: &str) {
        if self.volatile || self.is_suspended_on(obj) {
            return;
        }
        let Some(meta) = peek_meta(obj) else {
            return;
        };
        if meta.remove_cache(key).is_none() || meta.is_meta_destroyed() {
            return;
        }
        if let Err(err) = remove_dependent_keys(&self.dependent_keys, obj, key, &meta) {
            tracing::warn!(object = %obj.id(), key, error = %err, "failed to unregister dependent keys");
        }
    }

    pub(crate) fn teardown(&self, obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
        if self.volatile {
            return Ok(());
        }
        if meta.remove_cache(key).is_some() {
            remove_dependent_keys(&self.dependent_keys, obj, key, meta)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ComputedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedProperty")
            .field("dependent_keys", &self.dependent_keys)
            .field("volatile", &self.volatile)
            .field("read_only", &self.read_only)
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
