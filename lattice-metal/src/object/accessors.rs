//! Property Access
//!
//! `get` and `set` are the only ways the kernel reads and writes
//! properties. They dispatch descriptor slots, walk dotted paths, fall back
//! to a proxy's content for unknown keys and bracket plain writes with
//! change notification.

use indexmap::IndexMap;

use crate::error::{KernelError, Result};
use crate::object::path::{is_path, Path};
use crate::object::{proxy, Key, Obj, Value};
use crate::reactive::batch::change_properties;
use crate::reactive::notify::{property_did_change, property_will_change};
use crate::reactive::property::Slot;

/// Read `key`, which may be a dotted path. The empty key is the object
/// itself.
pub fn get(obj: &Obj, key: &str) -> Value {
    if key.is_empty() {
        return Value::from(obj);
    }

    match obj.lookup_slot(key) {
        Some(slot) if slot.is_descriptor() => slot.get(obj, key),
        _ if is_path(key) => get_path(obj, key),
        Some(slot) => slot.get(obj, key),
        None if obj.is_proxy() => proxy::unknown_property(obj, key),
        None => Value::Undefined,
    }
}

/// [`get`] on an arbitrary value. Non-objects have no properties.
pub fn get_value(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(obj) => get(obj, key),
        _ => Value::Undefined,
    }
}

/// [`get`], substituting `default` for an undefined result.
pub fn get_with_default(obj: &Obj, key: &str, default: Value) -> Value {
    match get(obj, key) {
        Value::Undefined => default,
        value => value,
    }
}

/// Walk `path` from `root`. A `null` link yields `null`; any other
/// non-object link, or a destroyed object, yields undefined.
fn get_path(root: &Obj, path: &str) -> Value {
    let parsed = Path::parse(path);
    let mut current = Value::from(root);
    for segment in parsed.segments() {
        let next = match &current {
            Value::Object(obj) => get(obj, segment),
            Value::Null => return Value::Null,
            _ => return Value::Undefined,
        };
        if next.as_object().is_some_and(Obj::is_destroyed) {
            return Value::Undefined;
        }
        current = next;
    }
    current
}

/// Write `key`, which may be a dotted path, and return the stored value.
///
/// Fails on a destroyed object, a read-only descriptor or a path whose
/// parent cannot be resolved.
pub fn set(obj: &Obj, key: &str, value: Value) -> Result<Value> {
    if key.is_empty() {
        return Err(KernelError::EmptyPath);
    }
    if obj.is_destroyed() {
        return Err(KernelError::SetOnDestroyed {
            key: key.to_string(),
            object: obj.id(),
        });
    }

    let slot = obj.lookup_slot(key);
    match slot {
        Some(slot) if slot.is_descriptor() => slot.set(obj, key, value),
        _ if is_path(key) => match set_path(obj, key, value, false)? {
            Some(value) => Ok(value),
            None => Err(KernelError::MissingPathTarget { path: key.to_string() }),
        },
        Some(slot) => slot.set(obj, key, value),
        None if obj.is_proxy() => proxy::set_unknown_property(obj, key, value),
        None => write_plain(obj, key, &Value::Undefined, value),
    }
}

/// Like [`set`], but a missing or destroyed target is not an error:
/// nothing is written and `None` comes back.
pub fn try_set(obj: &Obj, key: &str, value: Value) -> Result<Option<Value>> {
    if obj.is_destroyed() {
        return Ok(None);
    }
    if is_path(key) && !obj.lookup_slot(key).is_some_and(|slot| slot.is_descriptor()) {
        return set_path(obj, key, value, true);
    }
    set(obj, key, value).map(Some)
}

fn set_path(root: &Obj, path: &str, value: Value, tolerant: bool) -> Result<Option<Value>> {
    let (parent_path, key) = match path.rfind('.') {
        Some(index) => (&path[..index], &path[index + 1..]),
        None => (path, path),
    };
    if key.is_empty() {
        return Err(KernelError::EmptyPath);
    }

    let parent = if parent_path == "this" {
        Value::from(root)
    } else {
        get_path(root, parent_path)
    };

    match parent.as_object() {
        Some(target) if !target.is_destroyed() => set(target, key, value).map(Some),
        _ if tolerant => Ok(None),
        _ => Err(KernelError::MissingPathTarget {
            path: parent_path.to_string(),
        }),
    }
}

/// Store a plain value over `current`, notifying around the write. Storing
/// an equal value is a no-op.
pub(crate) fn write_plain(obj: &Obj, key: &str, current: &Value, value: Value) -> Result<Value> {
    if *current == value && obj.has_property(key) {
        return Ok(value);
    }

    property_will_change(obj, key);
    let previous = obj.write_slot(key, Slot::Value(value.clone()));
    property_did_change(obj, key);

    // Released after observers ran, so they never see a half-dropped value.
    drop(previous);
    Ok(value)
}

/// Read several keys at once.
pub fn get_properties(obj: &Obj, keys: &[&str]) -> IndexMap<Key, Value> {
    keys.iter().map(|key| (Key::from(*key), get(obj, key))).collect()
}

/// Write several keys inside one batch, so observers run once at the end.
pub fn set_properties<I, K, V>(obj: &Obj, props: I) -> Result<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Value>,
{
    change_properties(|| {
        for (key, value) in props {
            set(obj, key.as_ref(), value.into())?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Method;
    use crate::reactive::computed::computed;
    use crate::reactive::observer::add_observer;
    use crate::reactive::property::define_property;
    use std::cell::Cell;
    use std::rc::Rc;

    fn tree() -> (Obj, Obj) {
        let leaf = Obj::with_props([("value", 42)]);
        let root = Obj::with_props([("child", Value::from(&leaf)), ("empty", Value::Null)]);
        (root, leaf)
    }

    #[test]
    fn empty_key_returns_the_object() {
        let obj = Obj::new();
        assert_eq!(get(&obj, ""), Value::from(&obj));
    }

    #[test]
    fn paths_stop_at_non_objects() {
        let (root, _) = tree();
        assert_eq!(get(&root, "child.value"), Value::from(42));
        assert_eq!(get(&root, "empty.value"), Value::Null);
        assert!(get(&root, "missing.value").is_undefined());
        assert!(get(&root, "child.value.deeper").is_undefined());
    }

    #[test]
    fn paths_stop_at_destroyed_objects() {
        let (root, leaf) = tree();
        leaf.destroy();
        assert!(get(&root, "child.value").is_undefined());
    }

    #[test]
    fn get_with_default_only_replaces_undefined() {
        let obj = Obj::with_props([("zero", 0)]);
        assert_eq!(get_with_default(&obj, "zero", Value::from(1)), Value::from(0));
        assert_eq!(get_with_default(&obj, "nope", Value::from(1)), Value::from(1));
        assert!(get_value(&Value::from(3), "x").is_undefined());
    }

    #[test]
    fn strict_set_reports_failures() {
        let (root, leaf) = tree();
        set(&root, "child.value", Value::from(7)).unwrap();
        assert_eq!(leaf.get("value"), Value::from(7));

        assert!(matches!(
            set(&root, "missing.value", Value::from(1)),
            Err(KernelError::MissingPathTarget { .. })
        ));
        assert!(matches!(set(&root, "child.", Value::from(1)), Err(KernelError::EmptyPath)));

        leaf.destroy();
        assert!(matches!(
            set(&leaf, "value", Value::from(1)),
            Err(KernelError::SetOnDestroyed { .. })
        ));
    }

    #[test]
    fn try_set_tolerates_missing_targets() {
        let (root, leaf) = tree();
        assert_eq!(try_set(&root, "missing.value", Value::from(1)).unwrap(), None);
        assert_eq!(
            try_set(&root, "this.flag", Value::from(true)).unwrap(),
            Some(Value::from(true))
        );
        assert_eq!(root.get("flag"), Value::from(true));

        leaf.destroy();
        assert_eq!(try_set(&root, "child.value", Value::from(1)).unwrap(), None);
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let obj = Obj::with_props([("a", 1)]);
        let fired = Rc::new(Cell::new(0));
        let count = fired.clone();
        add_observer(&obj, "a", None, Method::observer(move |_, _| count.set(count.get() + 1))).unwrap();

        obj.set("a", 1).unwrap();
        assert_eq!(fired.get(), 0);
        obj.set("a", 2).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn new_keys_notify_even_when_undefined() {
        let obj = Obj::new();
        obj.set("a", Value::Undefined).unwrap();
        assert!(obj.has_own_property("a"));
    }

    #[test]
    fn set_properties_batches_observers() {
        let obj = Obj::with_props([("first", "a"), ("last", "b")]);
        define_property(
            &obj,
            "full",
            computed(&["first", "last"], |o, _| {
                Value::from(format!(
                    "{}{}",
                    o.get("first").as_str().unwrap_or_default(),
                    o.get("last").as_str().unwrap_or_default()
                ))
            })
            .unwrap(),
        )
        .unwrap();
        obj.get("full");

        let fired = Rc::new(Cell::new(0));
        let count = fired.clone();
        add_observer(&obj, "full", None, Method::observer(move |_, _| count.set(count.get() + 1))).unwrap();

        set_properties(&obj, [("first", "x"), ("last", "y")]).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(
            get_properties(&obj, &["full", "first"]),
            IndexMap::from([(Key::from("full"), Value::from("xy")), (Key::from("first"), Value::from("x"))])
        );
    }
}
