//! Alias properties.
//!
//! An alias reads and writes another key or path of the same object. It
//! only registers the aliased key as a dependency while the alias itself is
//! watched, so an unobserved alias costs nothing.

use std::slice;

use crate::error::{KernelError, Result};
use crate::meta::{meta_for, peek_meta, Meta};
use crate::object::{accessors, Key, Obj, Value};
use crate::reactive::dependent_keys::{add_dependent_keys, remove_dependent_keys};
use crate::reactive::property::{define_property, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliasMode {
    ReadWrite,
    ReadOnly,
    /// The first write replaces the alias with a plain value.
    OneWay,
}

#[derive(Debug)]
pub struct AliasedProperty {
    alt_key: Key,
    mode: AliasMode,
}

/// Alias `alt_key`, which may be a dotted path.
pub fn alias(alt_key: &str) -> AliasedProperty {
    AliasedProperty {
        alt_key: Key::from(alt_key),
        mode: AliasMode::ReadWrite,
    }
}

impl AliasedProperty {
    pub fn read_only(mut self) -> Self {
        self.mode = AliasMode::ReadOnly;
        self
    }

    pub fn one_way(mut self) -> Self {
        self.mode = AliasMode::OneWay;
        self
    }

    pub fn alt_key(&self) -> &str {
        &self.alt_key
    }

    fn dependent_keys(&self) -> &[Key] {
        slice::from_ref(&self.alt_key)
    }

    pub(crate) fn get(&self, obj: &Obj) -> Value {
        accessors::get(obj, &self.alt_key)
    }

    pub(crate) fn set(&self, obj: &Obj, key: &str, value: Value) -> Result<Value> {
        match self.mode {
            AliasMode::ReadWrite => accessors::set(obj, &self.alt_key, value),
            AliasMode::ReadOnly => Err(KernelError::ReadOnly {
                key: key.to_string(),
                object: obj.id(),
            }),
            AliasMode::OneWay => {
                define_property(obj, key, Slot::Value(Value::Undefined))?;
                accessors::set(obj, key, value)
            }
        }
    }

    pub(crate) fn will_watch(&self, obj: &Obj, key: &str) -> Result<()> {
        add_dependent_keys(self.dependent_keys(), obj, key, &meta_for(obj))
    }

    pub(crate) fn did_unwatch(&self, obj: &Obj, key: &str) -> Result<()> {
        match peek_meta(obj) {
            Some(meta) => remove_dependent_keys(self.dependent_keys(), obj, key, &meta),
            None => Ok(()),
        }
    }

    pub(crate) fn setup(&self, obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
        if meta.peek_watching(key) > 0 {
            add_dependent_keys(self.dependent_keys(), obj, key, meta)?;
        }
        Ok(())
    }

    pub(crate) fn teardown(&self, obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
        if meta.peek_watching(key) > 0 {
            remove_dependent_keys(self.dependent_keys(), obj, key, meta)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{watch, watcher_count};
    use crate::reactive::observer::add_observer;
    use crate::meta::Method;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn reads_and_writes_through() {
        let name = Obj::with_props([("first", "Ada")]);
        let obj = Obj::with_props([("name", &name)]);
        define_property(&obj, "first", alias("name.first")).unwrap();

        assert_eq!(obj.get("first"), Value::from("Ada"));
        obj.set("first", "Grace").unwrap();
        assert_eq!(name.get("first"), Value::from("Grace"));
    }

    #[test]
    fn aliased_key_is_watched_only_while_alias_is_watched() {
        let obj = Obj::with_props([("source", 1)]);
        define_property(&obj, "mirror", alias("source")).unwrap();
        assert_eq!(watcher_count(&obj, "source"), 0);

        watch(&obj, "mirror").unwrap();
        assert_eq!(watcher_count(&obj, "source"), 1);
        crate::graph::unwatch(&obj, "mirror").unwrap();
        assert_eq!(watcher_count(&obj, "source"), 0);
    }

    #[test]
    fn changes_to_the_source_notify_alias_observers() {
        let obj = Obj::with_props([("source", 1)]);
        define_property(&obj, "mirror", alias("source")).unwrap();

        let fired = Rc::new(Cell::new(0));
        let seen = fired.clone();
        add_observer(&obj, "mirror", None, Method::observer(move |_, _| seen.set(seen.get() + 1)))
            .unwrap();

        obj.set("source", 2).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(obj.get("mirror"), Value::from(2));
    }

    #[test]
    fn read_only_and_one_way() {
        let obj = Obj::with_props([("source", 1)]);
        define_property(&obj, "locked", alias("source").read_only()).unwrap();
        define_property(&obj, "copy", alias("source").one_way()).unwrap();

        assert!(matches!(obj.set("locked", 5), Err(KernelError::ReadOnly { .. })));

        obj.set("copy", 9).unwrap();
        assert_eq!(obj.get("copy"), Value::from(9));
        assert_eq!(obj.get("source"), Value::from(1));
        assert!(matches!(obj.own_slot("copy"), Some(Slot::Value(_))));
    }
}
