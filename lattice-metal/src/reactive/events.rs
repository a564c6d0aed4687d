//! Events
//!
//! Named events with `(target, method)` listeners, stored on the sender's
//! metadata. Observers are events named `key:change` and `key:before`;
//! everything else (for example [`WILL_DESTROY`](crate::object::WILL_DESTROY))
//! is free-form.
//!
//! # Dispatch
//!
//! [`send_event`] snapshots the matching listeners and invokes them newest
//! first. A once-listener is removed before it runs, so a re-entrant send of
//! the same event cannot invoke it twice. Suspended listeners are skipped.

use crate::error::Result;
use crate::meta::{meta_for, readable_meta, Invocation, ListenerFlags, MatchedListener, Method};
use crate::object::{Key, Obj, Value};

/// Register `method` for `event` on `obj`. With no `target`, listeners are
/// invoked with the sender as their target.
pub fn add_listener(obj: &Obj, event: &str, target: Option<&Obj>, method: Method, once: bool) -> Result<()> {
    let flags = if once { ListenerFlags::ONCE } else { ListenerFlags::empty() };
    meta_for(obj).add_to_listeners(event, target, method, flags)
}

/// Remove listeners for `event`. Without a `method` every listener for the
/// event goes, whatever its target. Returns how many were removed.
pub fn remove_listener(obj: &Obj, event: &str, target: Option<&Obj>, method: Option<&Method>) -> usize {
    if readable_meta(obj).is_none() {
        return 0;
    }
    meta_for(obj).remove_from_listeners(event, target.map(Obj::id), method)
}

/// Fire `event` on `obj`. Returns `false` when nothing was listening.
pub fn send_event(obj: &Obj, event: &str, params: &[Value]) -> bool {
    send_event_with(obj, event, params, None)
}

/// Dispatch to `listeners`, or to the sender's current listeners when none
/// are given.
pub(crate) fn send_event_with(
    obj: &Obj,
    event: &str,
    params: &[Value],
    listeners: Option<Vec<MatchedListener>>,
) -> bool {
    let listeners = match listeners {
        Some(listeners) => listeners,
        None => match readable_meta(obj) {
            Some(meta) => meta.matching_listeners(event),
            None => return false,
        },
    };
    if listeners.is_empty() {
        return false;
    }

    for listener in listeners.iter().rev() {
        if listener.is_suspended() {
            continue;
        }

        let target = match &listener.target {
            Some(weak) => match weak.upgrade() {
                Some(target) => target,
                None => continue,
            },
            None => obj.clone(),
        };

        if listener.is_once() {
            let target_id = listener.target.as_ref().map(|t| t.id());
            meta_for(obj).remove_from_listeners(event, target_id, Some(&listener.method));
        }

        listener.method.call(&Invocation {
            target: &target,
            sender: obj,
            event,
            params,
        });
    }
    true
}

pub fn has_listeners(obj: &Obj, event: &str) -> bool {
    readable_meta(obj).is_some_and(|meta| meta.has_listeners_for(event))
}

/// Deduplicated listeners for `event`, in registration order.
pub fn listeners_for(obj: &Obj, event: &str) -> Vec<MatchedListener> {
    readable_meta(obj).map_or_else(Vec::new, |meta| meta.matching_listeners(event))
}

/// Every event name with at least one listener on `obj`.
pub fn watched_events(obj: &Obj) -> Vec<Key> {
    readable_meta(obj).map_or_else(Vec::new, |meta| meta.watched_events())
}

/// Run `f` with `(target, method)` suspended for `event` on `obj`.
pub fn suspend_listener<R>(
    obj: &Obj,
    event: &str,
    target: Option<&Obj>,
    method: &Method,
    f: impl FnOnce() -> R,
) -> R {
    suspend_listeners(obj, &[event], target, method, f)
}

/// Run `f` with `(target, method)` suspended for each of `events`.
pub fn suspend_listeners<R>(
    obj: &Obj,
    events: &[&str],
    target: Option<&Obj>,
    method: &Method,
    f: impl FnOnce() -> R,
) -> R {
    let _guard = meta_for(obj).suspend_listeners(events, target, method);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<u32>>, Method) {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        (calls, Method::new(move |_| seen.set(seen.get() + 1)))
    }

    #[test]
    fn dispatch_runs_newest_first() {
        let obj = Obj::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second"] {
            let order = order.clone();
            add_listener(&obj, "ping", None, Method::new(move |_| order.borrow_mut().push(label)), false)
                .unwrap();
        }

        assert!(send_event(&obj, "ping", &[]));
        assert_eq!(*order.borrow(), vec!["second", "first"]);
        assert!(!send_event(&obj, "pong", &[]));
    }

    #[test]
    fn once_listeners_fire_once_even_when_reentered() {
        let obj = Obj::new();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let method = Method::new(move |inv| {
            seen.set(seen.get() + 1);
            send_event(inv.sender, "ping", &[]);
        });
        add_listener(&obj, "ping", None, method, true).unwrap();

        send_event(&obj, "ping", &[]);
        assert_eq!(calls.get(), 1);
        assert!(!has_listeners(&obj, "ping"));
    }

    #[test]
    fn target_defaults_to_sender() {
        let sender = Obj::new();
        let target = Obj::new();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let log = hits.clone();
        let method = Method::new(move |inv| log.borrow_mut().push(inv.target.id()));
        add_listener(&sender, "ping", None, method.clone(), false).unwrap();
        add_listener(&sender, "ping", Some(&target), method, false).unwrap();

        send_event(&sender, "ping", &[]);
        assert_eq!(*hits.borrow(), vec![target.id(), sender.id()]);
    }

    #[test]
    fn dead_targets_are_skipped() {
        let sender = Obj::new();
        let (calls, method) = counter();
        {
            let target = Obj::new();
            add_listener(&sender, "ping", Some(&target), method, false).unwrap();
        }
        send_event(&sender, "ping", &[]);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn suspension_is_scoped() {
        let obj = Obj::new();
        let (calls, method) = counter();
        add_listener(&obj, "ping", None, method.clone(), false).unwrap();

        suspend_listener(&obj, "ping", None, &method, || {
            send_event(&obj, "ping", &[]);
        });
        assert_eq!(calls.get(), 0);
        send_event(&obj, "ping", &[]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn instances_inherit_prototype_listeners() {
        let proto = Obj::prototype(None);
        let (calls, method) = counter();
        add_listener(&proto, "ping", None, method.clone(), false).unwrap();

        let instance = Obj::create(&proto);
        assert!(has_listeners(&instance, "ping"));
        assert_eq!(watched_events(&instance), vec![Key::from("ping")]);
        send_event(&instance, "ping", &[]);
        assert_eq!(calls.get(), 1);

        assert_eq!(remove_listener(&instance, "ping", None, Some(&method)), 1);
        assert!(!has_listeners(&instance, "ping"));
        assert!(has_listeners(&proto, "ping"));
    }
}
