//! Change Notification
//!
//! Every write to a tracked property is bracketed by
//! [`property_will_change`] and [`property_did_change`].
//!
//! # How Propagation Works
//!
//! For a watched key the engine, in order:
//!
//! 1. runs the slot's own hook (a computed property evicts its cache);
//! 2. notifies every key that depends on this one, recursively;
//! 3. notifies chain nodes rooted on other objects whose paths pass
//!    through this key, then re-dispatches the affected full paths;
//! 4. fires `key:before` / `key:change` listeners, or buffers them while a
//!    batch is open.
//!
//! After a did-change the property's invalidation tags are dirtied.
//! Unwatched keys skip steps 2 to 4 entirely.
//!
//! Dependent-key recursion shares one seen-set per top-level change, keyed
//! by `(object, key)`, so cyclic declarations terminate.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::config;
use crate::graph::chains;
use crate::meta::{peek_meta, Meta};
use crate::object::{Key, Obj, ObjectId, Value};
use crate::reactive::batch;
use crate::reactive::events;
use crate::reactive::observer::{before_event, change_event};
use crate::reactive::property::Slot;

#[derive(Default)]
struct Traversal {
    seen: HashSet<(ObjectId, Key)>,
    /// Keys whose dependents are being notified right now.
    active: Vec<(ObjectId, Key)>,
}

thread_local! {
    static WILL_SEEN: RefCell<Option<Traversal>> = const { RefCell::new(None) };
    static DID_SEEN: RefCell<Option<Traversal>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Will,
    Did,
}

impl Phase {
    fn with_traversal<R>(self, f: impl FnOnce(&mut Option<Traversal>) -> R) -> R {
        let cell = match self {
            Phase::Will => &WILL_SEEN,
            Phase::Did => &DID_SEEN,
        };
        cell.with(|traversal| f(&mut traversal.borrow_mut()))
    }

    fn notify(self, obj: &Obj, key: &str) {
        match self {
            Phase::Will => property_will_change(obj, key),
            Phase::Did => property_did_change(obj, key),
        }
    }
}

/// Owns the seen-set for the outermost dependent-key walk of a phase.
struct TraversalGuard {
    phase: Phase,
    top: bool,
}

impl TraversalGuard {
    fn enter(phase: Phase) -> Self {
        let top = phase.with_traversal(|traversal| {
            if traversal.is_none() {
                *traversal = Some(Traversal::default());
                true
            } else {
                false
            }
        });
        Self { phase, top }
    }
}

impl Drop for TraversalGuard {
    fn drop(&mut self) {
        if self.top {
            self.phase.with_traversal(|traversal| *traversal = None);
        }
    }
}

/// Announce that `obj.key` is about to change.
pub fn property_will_change(obj: &Obj, key: &str) {
    let Some(meta) = peek_meta(obj) else {
        return;
    };
    if !obj.is_initialized() || meta.peek_watching(key) == 0 {
        return;
    }

    dependent_keys_change(Phase::Will, obj, key, &meta);
    chains_change(Phase::Will, key, &meta);
    notify_observers(Phase::Will, obj, key, &meta);
}

/// Announce that `obj.key` has changed.
pub fn property_did_change(obj: &Obj, key: &str) {
    let Some(meta) = peek_meta(obj) else {
        return;
    };
    if !obj.is_initialized() {
        return;
    }

    if let Some(slot) = obj.lookup_slot(key) {
        slot.did_change(obj, key);
    }

    if meta.peek_watching(key) > 0 {
        dependent_keys_change(Phase::Did, obj, key, &meta);
        chains_change(Phase::Did, key, &meta);
        notify_observers(Phase::Did, obj, key, &meta);
    }

    if meta.is_source_destroying() {
        return;
    }
    meta.mark_dirty(obj, key);
}

/// Both halves of a change notification, for values changed out of band.
pub fn notify_property_change(obj: &Obj, key: &str) {
    property_will_change(obj, key);
    property_did_change(obj, key);
}

/// Re-resolve chains passing through `key` after its slot was redefined.
pub(crate) fn override_chains(meta: &Meta, key: &str) {
    if meta.is_source_destroying() {
        return;
    }
    chains::revalidate(meta, key);
}

fn dependent_keys_change(phase: Phase, obj: &Obj, dep_key: &str, meta: &Meta) {
    if meta.is_source_destroying() || !meta.has_deps(dep_key) {
        return;
    }
    let _traversal = TraversalGuard::enter(phase);
    iter_deps(phase, obj, dep_key, meta);
}

fn iter_deps(phase: Phase, obj: &Obj, dep_key: &str, meta: &Meta) {
    let entry = (obj.id(), Key::from(dep_key));
    let first_visit = phase.with_traversal(|traversal| {
        let Some(traversal) = traversal.as_mut() else {
            return true;
        };
        if traversal.seen.contains(&entry) {
            if config::cycle_diagnostics() && traversal.active.contains(&entry) {
                tracing::warn!(
                    object = %obj.id(),
                    key = dep_key,
                    phase = ?phase,
                    "dependent key cycle; propagation stops here"
                );
            }
            return false;
        }
        traversal.seen.insert(entry.clone());
        traversal.active.push(entry.clone());
        true
    });
    if !first_visit {
        return;
    }

    for key in meta.dependents_of(dep_key) {
        // A computed property inside its own setter manages its cache itself.
        if let Some(Slot::Computed(cp)) = obj.lookup_slot(&key) {
            if cp.is_suspended_on(obj) {
                continue;
            }
        }
        phase.notify(obj, &key);
    }

    phase.with_traversal(|traversal| {
        if let Some(traversal) = traversal.as_mut() {
            traversal.active.pop();
        }
    });
}

fn chains_change(phase: Phase, key: &str, meta: &Meta) {
    let affected = chains::notify_chain_watchers(meta, key, phase == Phase::Did);
    for (root, path) in affected {
        phase.notify(&root, &path);
    }
}

fn notify_observers(phase: Phase, obj: &Obj, key: &str, meta: &Meta) {
    if meta.is_source_destroying() {
        return;
    }

    let event = match phase {
        Phase::Will => before_event(key),
        Phase::Did => change_event(key),
    };

    if batch::is_deferred() {
        let matched = meta.matching_listeners(&event);
        if matched.is_empty() {
            return;
        }
        match phase {
            Phase::Will => batch::defer_before(obj, key, event, matched),
            Phase::Did => batch::defer_after(obj, key, event, matched),
        }
    } else {
        events::send_event(obj, &event, &[Value::from(obj), Value::from(key)]);
    }
}
