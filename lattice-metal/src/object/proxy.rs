//! Value proxies.
//!
//! A proxy answers keys it does not define itself from its `content`
//! object, for reads and writes alike. Watching such a key on the proxy
//! observes `content.<key>` and re-announces those changes as changes of
//! `<key>` on the proxy, so observers never need to know about the content.

use crate::error::{KernelError, Result};
use crate::meta::Method;
use crate::object::accessors::{get, get_value, set};
use crate::object::{Obj, Value};
use crate::reactive::notify::{property_did_change, property_will_change};
use crate::reactive::observer::{
    add_before_observer, add_observer, remove_before_observer, remove_observer,
};

pub(crate) const CONTENT_KEY: &str = "content";
const CONTENT_PREFIX: &str = "content.";

struct Forwarders {
    will_change: Method,
    did_change: Method,
}

thread_local! {
    static FORWARDERS: Forwarders = Forwarders {
        will_change: forwarder(property_will_change),
        did_change: forwarder(property_did_change),
    };
}

/// An observer of `content.<key>` that re-announces the change as `<key>`,
/// unless the proxy defines `<key>` itself.
fn forwarder(announce: fn(&Obj, &str)) -> Method {
    Method::observer(move |proxy, content_key| {
        let Some(key) = content_key.strip_prefix(CONTENT_PREFIX) else {
            return;
        };
        if proxy.has_property(key) {
            return;
        }
        announce(proxy, key);
    })
}

fn forwarders() -> (Method, Method) {
    FORWARDERS.with(|f| (f.will_change.clone(), f.did_change.clone()))
}

fn content(proxy: &Obj) -> Value {
    get(proxy, CONTENT_KEY)
}

pub(crate) fn unknown_property(proxy: &Obj, key: &str) -> Value {
    get_value(&content(proxy), key)
}

pub(crate) fn set_unknown_property(proxy: &Obj, key: &str, value: Value) -> Result<Value> {
    match content(proxy) {
        Value::Object(content) => set(&content, key, value),
        _ => Err(KernelError::ProxyWithoutContent { key: key.to_string() }),
    }
}

pub(crate) fn will_watch_property(proxy: &Obj, key: &str) -> Result<()> {
    if key == CONTENT_KEY {
        return Ok(());
    }
    let path = format!("{CONTENT_PREFIX}{key}");
    let (will_change, did_change) = forwarders();
    add_before_observer(proxy, &path, None, will_change)?;
    add_observer(proxy, &path, None, did_change)
}

pub(crate) fn did_unwatch_property(proxy: &Obj, key: &str) -> Result<()> {
    if key == CONTENT_KEY {
        return Ok(());
    }
    let path = format!("{CONTENT_PREFIX}{key}");
    let (will_change, did_change) = forwarders();
    remove_before_observer(proxy, &path, None, &will_change)?;
    remove_observer(proxy, &path, None, &did_change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{unwatch, watch, watcher_count};
    use crate::reactive::property::Slot;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn reads_and_writes_go_to_content() {
        let content = Obj::with_props([("name", "Tom")]);
        let proxy = Obj::proxy(&content);
        assert_eq!(proxy.get("name"), Value::from("Tom"));

        proxy.set("name", "Huck").unwrap();
        assert_eq!(content.get("name"), Value::from("Huck"));
        assert!(!proxy.has_own_property("name"));
    }

    #[test]
    fn writes_without_content_fail() {
        let proxy = Obj::proxy(Value::Null);
        assert!(proxy.get("name").is_undefined());
        assert!(matches!(
            proxy.set("name", "x"),
            Err(KernelError::ProxyWithoutContent { .. })
        ));
    }

    #[test]
    fn content_changes_are_forwarded() {
        let content = Obj::with_props([("name", "Tom")]);
        let proxy = Obj::proxy(&content);
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = log.clone();
        add_observer(
            &proxy,
            "name",
            None,
            Method::observer(move |sender, key| seen.borrow_mut().push((sender.id(), key.to_string()))),
        )
        .unwrap();

        content.set("name", "Huck").unwrap();
        assert_eq!(*log.borrow(), vec![(proxy.id(), "name".to_string())]);

        // swapping the content counts as a change too
        proxy.set(CONTENT_KEY, Obj::with_props([("name", "Becky")])).unwrap();
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(proxy.get("name"), Value::from("Becky"));
    }

    #[test]
    fn own_properties_are_not_forwarded() {
        let content = Obj::with_props([("name", "content")]);
        let proxy = Obj::proxy(&content);
        proxy.write_slot("name", Slot::Value("own".into()));

        let fired = Rc::new(RefCell::new(0));
        let count = fired.clone();
        add_observer(&proxy, "name", None, Method::observer(move |_, _| *count.borrow_mut() += 1)).unwrap();
        content.set("name", "changed").unwrap();
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(proxy.get("name"), Value::from("own"));
    }

    #[test]
    fn unwatching_releases_the_content_path() {
        let content = Obj::with_props([("name", "Tom")]);
        let proxy = Obj::proxy(&content);
        watch(&proxy, "name").unwrap();
        assert_eq!(watcher_count(&content, "name"), 1);
        unwatch(&proxy, "name").unwrap();
        assert_eq!(watcher_count(&content, "name"), 0);
        assert_eq!(watcher_count(&proxy, "content.name"), 0);
    }
}
