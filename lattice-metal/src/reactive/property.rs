//! Property Slots
//!
//! Every own property of an object is exactly one of four slot kinds. The
//! kernel dispatches descriptor hooks (`get`, `set`, cache invalidation,
//! watch activation, teardown) with a `match` on the slot.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::meta::{meta_for, Meta};
use crate::object::{accessors, Obj, Value};
use crate::reactive::alias::AliasedProperty;
use crate::reactive::computed::ComputedProperty;
use crate::reactive::injected::InjectedProperty;
use crate::reactive::notify;

#[derive(Clone)]
pub enum Slot {
    /// A plain stored value.
    Value(Value),
    /// A memoized derived value.
    Computed(Rc<ComputedProperty>),
    /// Reads and writes another key or path.
    Alias(Rc<AliasedProperty>),
    /// A value looked up through the object's owner.
    Injected(Rc<InjectedProperty>),
}

impl Slot {
    pub fn is_descriptor(&self) -> bool {
        !matches!(self, Slot::Value(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get(&self, obj: &Obj, key: &str) -> Value {
        match self {
            Slot::Value(value) => value.clone(),
            Slot::Computed(cp) => cp.get(obj, key),
            Slot::Alias(alias) => alias.get(obj),
            Slot::Injected(injected) => injected.get(obj, key),
        }
    }

    pub(crate) fn set(&self, obj: &Obj, key: &str, value: Value) -> Result<Value> {
        match self {
            Slot::Value(current) => accessors::write_plain(obj, key, current, value),
            Slot::Computed(cp) => cp.set(obj, key, value),
            Slot::Alias(alias) => alias.set(obj, key, value),
            Slot::Injected(injected) => injected.set(obj, key, value),
        }
    }

    /// Runs on every change of `key`, watched or not.
    pub(crate) fn did_change(&self, obj: &Obj, key: &str) {
        match self {
            Slot::Computed(cp) => cp.did_change(obj, key),
            Slot::Injected(injected) => injected.did_change(obj, key),
            Slot::Value(_) | Slot::Alias(_) => {}
        }
    }

    /// Runs when `key` goes from unwatched to watched.
    pub(crate) fn will_watch(&self, obj: &Obj, key: &str) -> Result<()> {
        match self {
            Slot::Alias(alias) => alias.will_watch(obj, key),
            _ => Ok(()),
        }
    }

    /// Runs when the last watcher of `key` goes away.
    pub(crate) fn did_unwatch(&self, obj: &Obj, key: &str) -> Result<()> {
        match self {
            Slot::Alias(alias) => alias.did_unwatch(obj, key),
            _ => Ok(()),
        }
    }

    fn setup(&self, obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
        match self {
            Slot::Alias(alias) => alias.setup(obj, key, meta),
            _ => Ok(()),
        }
    }

    fn teardown(&self, obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
        match self {
            Slot::Value(_) => Ok(()),
            Slot::Computed(cp) => cp.teardown(obj, key, meta),
            Slot::Alias(alias) => alias.teardown(obj, key, meta),
            Slot::Injected(injected) => {
                injected.teardown(key, meta);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Slot::Computed(cp) => f
                .debug_struct("Computed")
                .field("dependent_keys", &cp.dependent_keys())
                .field("volatile", &cp.is_volatile())
                .finish(),
            Slot::Alias(alias) => f.debug_tuple("Alias").field(&alias.alt_key()).finish(),
            Slot::Injected(injected) => f.debug_tuple("Injected").field(&injected.kind()).finish(),
        }
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Value(value)
    }
}

impl From<ComputedProperty> for Slot {
    fn from(cp: ComputedProperty) -> Self {
        Slot::Computed(Rc::new(cp))
    }
}

impl From<AliasedProperty> for Slot {
    fn from(alias: AliasedProperty) -> Self {
        Slot::Alias(Rc::new(alias))
    }
}

impl From<InjectedProperty> for Slot {
    fn from(injected: InjectedProperty) -> Self {
        Slot::Injected(Rc::new(injected))
    }
}

/// Install `slot` as `obj`'s own property `key`.
///
/// The slot it shadows (own or inherited) is torn down for this object
/// first, and chains that passed through `key` re-resolve afterwards.
pub fn define_property(obj: &Obj, key: &str, slot: impl Into<Slot>) -> Result<()> {
    let meta = meta_for(obj);
    meta.check_alive()?;
    let watching = meta.peek_watching(key) > 0;

    if let Some(existing) = obj.lookup_slot(key) {
        existing.teardown(obj, key, &meta)?;
    }

    let slot = slot.into();
    let previous = obj.write_slot(key, slot.clone());
    drop(previous);
    slot.setup(obj, key, &meta)?;

    if watching {
        notify::override_chains(&meta, key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::computed::computed;

    #[test]
    fn slots_convert_and_classify() {
        let plain: Slot = Value::from(1).into();
        assert!(!plain.is_descriptor());
        assert_eq!(plain.as_value(), Some(&Value::from(1)));

        let cp: Slot = computed(&[], |_, _| Value::from(2)).unwrap().into();
        assert!(cp.is_descriptor());
        assert!(cp.as_value().is_none());
    }

    #[test]
    fn define_property_replaces_computed_with_value() {
        let obj = Obj::new();
        define_property(&obj, "answer", computed(&[], |_, _| Value::from(42)).unwrap()).unwrap();
        assert_eq!(obj.get("answer"), Value::from(42));

        define_property(&obj, "answer", Value::from(7)).unwrap();
        assert_eq!(obj.get("answer"), Value::from(7));
        assert!(!meta_for(&obj).has_cache("answer"));
    }

    #[test]
    fn define_property_on_destroyed_object_fails() {
        let obj = Obj::new();
        obj.destroy();
        assert!(define_property(&obj, "a", Value::Null).is_err());
    }
}
