//! Injected properties.
//!
//! `inject("service", Some("session"))` resolves `"service:session"`
//! through the object's [`Owner`](crate::object::Owner) on first read and
//! caches the result. Without an explicit name the property key is used.
//! Writing an injected property replaces it with a plain value.

use crate::error::Result;
use crate::meta::{meta_for, peek_meta, Meta};
use crate::object::{accessors, Key, Obj, Value};
use crate::reactive::computed::cache_for;
use crate::reactive::property::{define_property, Slot};

#[derive(Debug)]
pub struct InjectedProperty {
    kind: Key,
    name: Option<Key>,
}

pub fn inject(kind: &str, name: Option<&str>) -> InjectedProperty {
    InjectedProperty {
        kind: Key::from(kind),
        name: name.map(Key::from),
    }
}

impl InjectedProperty {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The container name resolved for `key`.
    pub fn full_name(&self, key: &str) -> String {
        let name = self.name.as_deref().unwrap_or(key);
        format!("{}:{}", self.kind, name)
    }

    pub(crate) fn get(&self, obj: &Obj, key: &str) -> Value {
        let meta = meta_for(obj);
        if let Some(cached) = meta.read_cache(key) {
            return cached;
        }

        let full_name = self.full_name(key);
        let Some(owner) = obj.owner() else {
            tracing::warn!(object = %obj.id(), key, full_name = %full_name, "injected property has no owner to look up from");
            return Value::Undefined;
        };

        let value = owner.lookup(&full_name).unwrap_or_default();
        if let Err(err) = meta.write_cache(key, value.clone()) {
            tracing::debug!(object = %obj.id(), key, error = %err, "injected value not cached");
        }
        value
    }

    pub(crate) fn set(&self, obj: &Obj, key: &str, value: Value) -> Result<Value> {
        let cached = cache_for(obj, key).unwrap_or_default();
        define_property(obj, key, Slot::Value(cached))?;
        accessors::set(obj, key, value)
    }

    pub(crate) fn did_change(&self, obj: &Obj, key: &str) {
        if let Some(meta) = peek_meta(obj) {
            meta.remove_cache(key);
        }
    }

    pub(crate) fn teardown(&self, key: &str, meta: &Meta) {
        meta.remove_cache(key);
    }
}
