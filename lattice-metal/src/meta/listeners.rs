//! Listener storage.
//!
//! Each metadata record keeps one flat, append-only vector of
//! `(event, target, method, flags)` entries. Deduplication happens when
//! listeners are matched for dispatch, not when they are added, so adds are
//! a push and removals only touch the owning record.
//!
//! Instances share their prototypes' listeners until the first removal that
//! hits an inherited entry; at that point the inherited entries are copied
//! down (`finalize_listeners`) and the record stops reading its parents.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use indexmap::IndexSet;

use super::Meta;
use crate::error::Result;
use crate::object::{Key, Obj, ObjectId, Value, WeakObj};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ListenerFlags: u8 {
        /// Remove the listener before its first invocation.
        const ONCE = 0b01;
        /// Set on matched listeners covered by an active suspension.
        const SUSPENDED = 0b10;
    }
}

/// Arguments handed to a listener.
pub struct Invocation<'a> {
    /// The registered target, or the sender when none was given.
    pub target: &'a Obj,
    pub sender: &'a Obj,
    pub event: &'a str,
    pub params: &'a [Value],
}

/// A listener callback. Two methods are the same listener only if they are
/// clones of the same `Method`.
#[derive(Clone)]
pub struct Method(Rc<dyn Fn(&Invocation<'_>)>);

impl Method {
    pub fn new(f: impl Fn(&Invocation<'_>) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, invocation: &Invocation<'_>) {
        (self.0)(invocation)
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Method {}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({:p})", self.addr())
    }
}

#[derive(Clone)]
pub(crate) struct Listener {
    event: Key,
    target: Option<WeakObj>,
    method: Method,
    flags: ListenerFlags,
}

impl Listener {
    fn target_id(&self) -> Option<ObjectId> {
        self.target.as_ref().map(WeakObj::id)
    }
}

/// A deduplicated listener ready for dispatch.
#[derive(Clone, Debug)]
pub struct MatchedListener {
    pub target: Option<WeakObj>,
    pub method: Method,
    pub flags: ListenerFlags,
}

impl MatchedListener {
    fn target_id(&self) -> Option<ObjectId> {
        self.target.as_ref().map(WeakObj::id)
    }

    /// Same `(target, method)` pair, whatever the flags.
    pub(crate) fn same_registration(&self, other: &MatchedListener) -> bool {
        self.method == other.method && self.target_id() == other.target_id()
    }

    pub fn is_suspended(&self) -> bool {
        self.flags.contains(ListenerFlags::SUSPENDED)
    }

    pub fn is_once(&self) -> bool {
        self.flags.contains(ListenerFlags::ONCE)
    }
}

pub(crate) struct SuspendMarker {
    token: u64,
    event: Key,
    target: Option<ObjectId>,
    method: Method,
}

fn next_token() -> u64 {
    static TOKENS: AtomicU64 = AtomicU64::new(1);
    TOKENS.fetch_add(1, Ordering::Relaxed)
}

/// Lifts one suspension when dropped.
///
/// Only the markers pushed by the suspension that created the guard are
/// removed, so nested and overlapping suspensions of the same listener
/// unwind independently.
#[must_use = "the suspension ends when the guard is dropped"]
pub struct SuspendGuard {
    meta: Rc<Meta>,
    token: u64,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        let token = self.token;
        let removed: Vec<SuspendMarker> = {
            let mut suspended = self.meta.suspended.borrow_mut();
            let (gone, kept) = std::mem::take(&mut *suspended)
                .into_iter()
                .partition(|marker| marker.token == token);
            *suspended = kept;
            gone
        };
        drop(removed);
    }
}

impl Meta {
    /// Append a listener. Duplicates are allowed.
    pub(crate) fn add_to_listeners(
        &self,
        event: &str,
        target: Option<&Obj>,
        method: Method,
        flags: ListenerFlags,
    ) -> Result<()> {
        self.check_alive()?;
        self.listeners.borrow_mut().push(Listener {
            event: Key::from(event),
            target: target.map(Obj::downgrade),
            method,
            flags,
        });
        Ok(())
    }

    /// Own record, then ancestors up to and including the first finalized
    /// one.
    fn listener_lineage(&self, mut f: impl FnMut(&Meta)) {
        f(self);
        if self.listeners_finalized.get() {
            return;
        }
        let mut parent = self.parent();
        while let Some(meta) = parent {
            f(&meta);
            if meta.listeners_finalized.get() {
                break;
            }
            parent = meta.parent();
        }
    }

    /// Copy inherited listeners onto this record, detaching it from its
    /// parents' lists from now on.
    pub(crate) fn finalize_listeners(&self) {
        if self.listeners_finalized.get() {
            return;
        }

        let mut inherited = Vec::new();
        let mut parent = self.parent();
        while let Some(meta) = parent {
            inherited.extend(meta.listeners.borrow().iter().cloned());
            if meta.listeners_finalized.get() {
                break;
            }
            parent = meta.parent();
        }

        self.listeners.borrow_mut().extend(inherited);
        self.listeners_finalized.set(true);
    }

    /// Remove listeners for `event`. With no `method`, every listener for
    /// the event goes. Returns the number removed.
    pub(crate) fn remove_from_listeners(
        &self,
        event: &str,
        target: Option<ObjectId>,
        method: Option<&Method>,
    ) -> usize {
        if self.meta_destroyed.get() {
            return 0;
        }

        let matches = |listener: &Listener| {
            &*listener.event == event
                && method.map_or(true, |m| listener.target_id() == target && &listener.method == m)
        };

        let removed: Vec<Listener> = {
            let mut own = self.listeners.borrow_mut();
            let mut removed = Vec::new();
            let mut index = own.len();
            while index > 0 {
                index -= 1;
                if matches(&own[index]) {
                    removed.push(own.remove(index));
                }
            }
            removed
        };
        let count = removed.len();
        drop(removed);

        if self.listeners_finalized.get() {
            return count;
        }

        // An inherited entry matched: copy down and retry on our own list.
        let mut inherited_match = false;
        let mut parent = self.parent();
        while let Some(meta) = parent {
            if meta.listeners.borrow().iter().any(|l| matches(l)) {
                inherited_match = true;
                break;
            }
            if meta.listeners_finalized.get() {
                break;
            }
            parent = meta.parent();
        }

        if inherited_match {
            self.finalize_listeners();
            count + self.remove_from_listeners(event, target, method)
        } else {
            count
        }
    }

    /// Listeners for `event`, deduplicated by `(target, method)`, with
    /// suspended entries flagged.
    pub fn matching_listeners(&self, event: &str) -> Vec<MatchedListener> {
        let mut result: Vec<MatchedListener> = Vec::new();
        self.listener_lineage(|meta| {
            for listener in meta.listeners.borrow().iter() {
                if &*listener.event != event {
                    continue;
                }
                let duplicate = result.iter().any(|matched| {
                    matched.target_id() == listener.target_id() && matched.method == listener.method
                });
                if !duplicate {
                    result.push(MatchedListener {
                        target: listener.target.clone(),
                        method: listener.method.clone(),
                        flags: listener.flags,
                    });
                }
            }
        });

        if result.is_empty() {
            return result;
        }

        for marker in self.suspended.borrow().iter() {
            if &*marker.event != event {
                continue;
            }
            for matched in result.iter_mut() {
                if matched.target_id() == marker.target && matched.method == marker.method {
                    matched.flags |= ListenerFlags::SUSPENDED;
                }
            }
        }
        result
    }

    pub fn has_listeners_for(&self, event: &str) -> bool {
        let mut found = false;
        self.listener_lineage(|meta| {
            found = found || meta.listeners.borrow().iter().any(|l| &*l.event == event);
        });
        found
    }

    /// Distinct event names with at least one listener, in first-seen order.
    pub fn watched_events(&self) -> Vec<Key> {
        let mut names = IndexSet::new();
        self.listener_lineage(|meta| {
            for listener in meta.listeners.borrow().iter() {
                names.insert(Key::clone(&listener.event));
            }
        });
        names.into_iter().collect()
    }

    /// Suspend `(target, method)` for each of `events` until the returned
    /// guard is dropped.
    pub fn suspend_listeners(
        self: &Rc<Self>,
        events: &[&str],
        target: Option<&Obj>,
        method: &Method,
    ) -> SuspendGuard {
        let token = next_token();
        let target = target.map(Obj::id);
        self.suspended
            .borrow_mut()
            .extend(events.iter().map(|event| SuspendMarker {
                token,
                event: Key::from(*event),
                target,
                method: method.clone(),
            }));
        SuspendGuard {
            meta: Rc::clone(self),
            token,
        }
    }

    #[cfg(test)]
    pub(crate) fn suspended_markers(&self) -> &RefCell<Vec<SuspendMarker>> {
        &self.suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::meta_for;
    use std::cell::Cell;

    fn noop() -> Method {
        Method::new(|_| {})
    }

    #[test]
    fn matching_deduplicates_by_target_and_method() {
        let obj = Obj::new();
        let meta = meta_for(&obj);
        let method = noop();
        meta.add_to_listeners("ping", None, method.clone(), ListenerFlags::empty()).unwrap();
        meta.add_to_listeners("ping", None, method.clone(), ListenerFlags::ONCE).unwrap();
        meta.add_to_listeners("ping", None, noop(), ListenerFlags::empty()).unwrap();

        let matched = meta.matching_listeners("ping");
        assert_eq!(matched.len(), 2);
        // the first registration wins
        assert!(!matched[0].is_once());
        assert!(meta.matching_listeners("pong").is_empty());
    }

    #[test]
    fn inherited_listeners_are_copied_down_on_removal() {
        let proto = Obj::prototype(None);
        let method = noop();
        meta_for(&proto)
            .add_to_listeners("ping", None, method.clone(), ListenerFlags::empty())
            .unwrap();

        let a = Obj::create(&proto);
        let b = Obj::create(&proto);
        assert_eq!(meta_for(&a).matching_listeners("ping").len(), 1);

        assert_eq!(meta_for(&a).remove_from_listeners("ping", None, Some(&method)), 1);
        assert!(meta_for(&a).matching_listeners("ping").is_empty());
        assert_eq!(meta_for(&b).matching_listeners("ping").len(), 1);
        assert_eq!(meta_for(&proto).matching_listeners("ping").len(), 1);
    }

    #[test]
    fn removal_without_method_clears_event() {
        let obj = Obj::new();
        let meta = meta_for(&obj);
        meta.add_to_listeners("ping", None, noop(), ListenerFlags::empty()).unwrap();
        meta.add_to_listeners("ping", None, noop(), ListenerFlags::empty()).unwrap();
        meta.add_to_listeners("pong", None, noop(), ListenerFlags::empty()).unwrap();

        assert_eq!(meta.remove_from_listeners("ping", None, None), 2);
        assert_eq!(meta.watched_events(), vec![Key::from("pong")]);
    }

    #[test]
    fn nested_suspensions_unwind_independently() {
        let obj = Obj::new();
        let meta = meta_for(&obj);
        let method = noop();
        meta.add_to_listeners("ping", None, method.clone(), ListenerFlags::empty()).unwrap();

        let outer = meta.suspend_listeners(&["ping"], None, &method);
        {
            let _inner = meta.suspend_listeners(&["ping"], None, &method);
            assert!(meta.matching_listeners("ping")[0].is_suspended());
        }
        // the outer suspension is still active
        assert!(meta.matching_listeners("ping")[0].is_suspended());
        drop(outer);
        assert!(!meta.matching_listeners("ping")[0].is_suspended());
        assert!(meta.suspended_markers().borrow().is_empty());
    }

    #[test]
    fn methods_compare_by_identity() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let method = Method::new(move |_| counter.set(counter.get() + 1));
        assert_eq!(method, method.clone());
        assert_ne!(method, noop());

        let obj = Obj::new();
        method.call(&Invocation {
            target: &obj,
            sender: &obj,
            event: "ping",
            params: &[],
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn adding_after_destroy_fails() {
        let obj = Obj::new();
        let meta = meta_for(&obj);
        meta.destroy();
        assert!(meta
            .add_to_listeners("ping", None, noop(), ListenerFlags::empty())
            .is_err());
        assert_eq!(meta.remove_from_listeners("ping", None, None), 0);
    }
}
