//! Change Batching
//!
//! Between [`begin_property_changes`] and the matching
//! [`end_property_changes`], observer dispatch is buffered instead of
//! immediate. Dependent keys, chains and caches still update eagerly, so
//! reads inside a batch are always current.
//!
//! Buffered notifications are coalesced per `(sender, key)`: a property that
//! changes five times inside a batch notifies each of its observers once.
//! When the outermost batch closes, every before-observer runs, then every
//! after-observer, each set in first-change order.

use std::cell::RefCell;

use indexmap::IndexMap;

use crate::meta::MatchedListener;
use crate::object::{Key, Obj, ObjectId, Value, WeakObj};
use crate::reactive::events;

struct PendingObserver {
    sender: WeakObj,
    key: Key,
    event: String,
    listeners: Vec<MatchedListener>,
}

/// Pending notifications, keyed by `(sender, key)` in first-change order.
#[derive(Default)]
struct ObserverSet {
    entries: IndexMap<(ObjectId, Key), PendingObserver>,
}

impl ObserverSet {
    fn add(&mut self, sender: &Obj, key: &str, event: String, listeners: Vec<MatchedListener>) {
        let pending = self
            .entries
            .entry((sender.id(), Key::from(key)))
            .or_insert_with(|| PendingObserver {
                sender: sender.downgrade(),
                key: Key::from(key),
                event,
                listeners: Vec::new(),
            });

        for listener in listeners {
            match pending.listeners.iter_mut().find(|existing| existing.same_registration(&listener)) {
                // A later unsuspended change still has to reach it.
                Some(existing) if existing.is_suspended() && !listener.is_suspended() => {
                    existing.flags = listener.flags;
                }
                Some(_) => {}
                None => pending.listeners.push(listener),
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver every pending notification whose sender is still alive and
    /// not being torn down. Listeners removed since the change are dropped.
    fn flush(self) {
        for (_, pending) in self.entries {
            let Some(sender) = pending.sender.upgrade() else {
                continue;
            };
            if sender.is_destroying() || sender.is_destroyed() {
                continue;
            }

            let registered = events::listeners_for(&sender, &pending.event);
            let live: Vec<MatchedListener> = pending
                .listeners
                .into_iter()
                .filter(|listener| registered.iter().any(|current| current.same_registration(listener)))
                .collect();
            if live.is_empty() {
                continue;
            }

            events::send_event_with(
                &sender,
                &pending.event,
                &[Value::from(&sender), Value::from(pending.key)],
                Some(live),
            );
        }
    }
}

#[derive(Default)]
struct BatchState {
    depth: u32,
    before: ObserverSet,
    after: ObserverSet,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Open a batch. Batches nest; only the outermost close flushes.
pub fn begin_property_changes() {
    BATCH.with(|batch| batch.borrow_mut().depth += 1);
}

/// Close a batch, flushing buffered observers when it was the outermost.
pub fn end_property_changes() {
    let drained = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        if batch.depth == 0 {
            tracing::warn!("end_property_changes called without a matching begin");
            return None;
        }
        batch.depth -= 1;
        if batch.depth > 0 {
            return None;
        }
        Some((
            std::mem::take(&mut batch.before),
            std::mem::take(&mut batch.after),
        ))
    });

    // Flushing runs user code, which may open batches of its own.
    if let Some((before, after)) = drained {
        tracing::debug!(before = before.len(), after = after.len(), "flushing deferred observers");
        before.flush();
        after.flush();
    }
}

/// Whether observer dispatch is currently buffered.
pub fn is_deferred() -> bool {
    BATCH.with(|batch| batch.borrow().depth > 0)
}

pub(crate) fn defer_before(sender: &Obj, key: &str, event: String, listeners: Vec<MatchedListener>) {
    BATCH.with(|batch| batch.borrow_mut().before.add(sender, key, event, listeners));
}

pub(crate) fn defer_after(sender: &Obj, key: &str, event: String, listeners: Vec<MatchedListener>) {
    BATCH.with(|batch| batch.borrow_mut().after.add(sender, key, event, listeners));
}

/// Run `f` inside a batch. The batch closes even if `f` panics.
pub fn change_properties<R>(f: impl FnOnce() -> R) -> R {
    let _batch = ChangeBatch::begin();
    f()
}

/// RAII form of [`begin_property_changes`] / [`end_property_changes`].
#[must_use = "the batch closes when the guard is dropped"]
pub struct ChangeBatch {
    _private: (),
}

impl ChangeBatch {
    pub fn begin() -> Self {
        begin_property_changes();
        Self { _private: () }
    }
}

impl Drop for ChangeBatch {
    fn drop(&mut self) {
        end_property_changes();
    }
}
