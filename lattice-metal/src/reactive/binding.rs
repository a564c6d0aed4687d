//! Bindings
//!
//! A binding keeps `obj.to` in step with `from` (read relative to `obj`, or
//! to an explicit root object). Changes are not copied immediately: each
//! side's observer schedules a sync, and [`flush_bindings`] runs every
//! scheduled sync. A two-way binding also copies `to` back to `from`.
//!
//! # Direction Merging
//!
//! A binding scheduled several times before a flush syncs once. If both
//! sides changed, the forward direction wins: `from` is the source of truth.
//!
//! # Lifecycle
//!
//! `connect` copies the current `from` value onto `to`, registers the
//! observers and a `willDestroy` listener on the target that disconnects the
//! binding. The target's metadata keeps the connection alive until then.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config;
use crate::error::{KernelError, Result};
use crate::meta::{meta_for, peek_meta, Meta, Method};
use crate::object::{accessors, Key, Obj, WeakObj, WILL_DESTROY};
use crate::reactive::events::{add_listener, remove_listener};
use crate::reactive::observer::{add_observer, remove_observer, suspend_observer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Copy `from` onto `to`.
    Forward,
    /// Copy `to` back onto `from`.
    Back,
}

/// A binding declaration. Cheap to clone; connecting it yields a
/// [`ConnectedBinding`].
#[derive(Clone)]
pub struct Binding {
    to: Key,
    from: Key,
    one_way: bool,
    from_root: Option<WeakObj>,
}

impl Binding {
    pub fn new(to: &str, from: &str) -> Self {
        Self {
            to: Key::from(to),
            from: Key::from(from),
            one_way: false,
            from_root: None,
        }
    }

    pub fn from(mut self, path: &str) -> Self {
        self.from = Key::from(path);
        self
    }

    pub fn to(mut self, path: &str) -> Self {
        self.to = Key::from(path);
        self
    }

    /// Only propagate `from` to `to`.
    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    /// Resolve `from` relative to `root` instead of the bound object.
    pub fn from_root(mut self, root: &Obj) -> Self {
        self.from_root = Some(root.downgrade());
        self
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn from_path(&self) -> &str {
        &self.from
    }

    pub fn to_path(&self) -> &str {
        &self.to
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Connect to `obj`, copying the current `from` value onto `obj.to`.
    pub fn connect(&self, obj: &Obj) -> Result<ConnectedBinding> {
        let from_obj = match &self.from_root {
            Some(root) => root.upgrade().ok_or_else(|| KernelError::MissingPathTarget {
                path: self.from.to_string(),
            })?,
            None => obj.clone(),
        };

        accessors::try_set(obj, &self.to, accessors::get(&from_obj, &self.from))?;

        let connection = Rc::new_cyclic(|weak: &Weak<Connection>| Connection {
            binding: self.clone(),
            to_obj: obj.downgrade(),
            from_obj: from_obj.downgrade(),
            direction: Cell::new(None),
            ready: Cell::new(false),
            from_did_change: schedule_on_change(weak.clone(), SyncDirection::Forward),
            to_did_change: schedule_on_change(weak.clone(), SyncDirection::Back),
            will_destroy: {
                let weak = weak.clone();
                Method::new(move |_| {
                    if let Some(connection) = weak.upgrade() {
                        ConnectedBinding(connection).disconnect();
                    }
                })
            },
        });
        let connected = ConnectedBinding(connection);
        let conn = &connected.0;

        add_observer(&from_obj, &self.from, None, conn.from_did_change.clone())?;
        if !self.one_way {
            add_observer(obj, &self.to, None, conn.to_did_change.clone())?;
        }
        add_listener(obj, WILL_DESTROY, None, conn.will_destroy.clone(), false)?;
        conn.ready.set(true);
        meta_for(obj).retain_connection(connected.clone())?;

        tracing::debug!(object = %obj.id(), binding = %self, "binding connected");
        Ok(connected)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.one_way { "->" } else { "<->" };
        write!(f, "{} {} {}", self.from, arrow, self.to)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({self})")
    }
}

fn schedule_on_change(connection: Weak<Connection>, direction: SyncDirection) -> Method {
    Method::observer(move |_, _| {
        if let Some(connection) = connection.upgrade() {
            ConnectedBinding(connection).schedule_sync(direction);
        }
    })
}

struct Connection {
    binding: Binding,
    to_obj: WeakObj,
    from_obj: WeakObj,
    /// Pending sync, `None` when nothing is scheduled.
    direction: Cell<Option<SyncDirection>>,
    ready: Cell<bool>,
    from_did_change: Method,
    to_did_change: Method,
    will_destroy: Method,
}

thread_local! {
    static PENDING: RefCell<Vec<ConnectedBinding>> = const { RefCell::new(Vec::new()) };
}

/// A live binding.
#[derive(Clone)]
pub struct ConnectedBinding(Rc<Connection>);

impl ConnectedBinding {
    pub fn binding(&self) -> &Binding {
        &self.0.binding
    }

    pub fn is_connected(&self) -> bool {
        self.0.ready.get()
    }

    /// The sync waiting for the next flush, if any.
    pub fn direction(&self) -> Option<SyncDirection> {
        self.0.direction.get()
    }

    pub(crate) fn ptr_eq(&self, other: &ConnectedBinding) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn schedule_sync(&self, direction: SyncDirection) {
        match self.0.direction.get() {
            None => {
                self.0.direction.set(Some(direction));
                PENDING.with(|pending| pending.borrow_mut().push(self.clone()));
            }
            Some(SyncDirection::Back) if direction == SyncDirection::Forward => {
                self.0.direction.set(Some(SyncDirection::Forward));
            }
            Some(_) => {}
        }
    }

    /// Run the scheduled sync now.
    pub fn sync(&self) {
        let Some(direction) = self.0.direction.take() else {
            return;
        };
        if !self.0.ready.get() {
            return;
        }
        let (Some(to_obj), Some(from_obj)) = (self.0.to_obj.upgrade(), self.0.from_obj.upgrade()) else {
            return;
        };
        let binding = &self.0.binding;

        let result = match direction {
            SyncDirection::Forward => {
                let value = accessors::get(&from_obj, &binding.from);
                log_sync(binding, direction, &to_obj);
                if binding.one_way {
                    accessors::try_set(&to_obj, &binding.to, value)
                } else {
                    suspend_observer(&to_obj, &binding.to, None, &self.0.to_did_change, || {
                        accessors::try_set(&to_obj, &binding.to, value)
                    })
                }
            }
            SyncDirection::Back => {
                let value = accessors::get(&to_obj, &binding.to);
                log_sync(binding, direction, &to_obj);
                suspend_observer(&from_obj, &binding.from, None, &self.0.from_did_change, || {
                    accessors::try_set(&from_obj, &binding.from, value)
                })
            }
        };

        if let Err(err) = result {
            tracing::warn!(object = %to_obj.id(), binding = %binding, error = %err, "binding sync failed");
        }
    }

    /// Remove the binding's observers and listener. Idempotent.
    pub fn disconnect(&self) {
        if !self.0.ready.replace(false) {
            return;
        }
        self.0.direction.set(None);
        let binding = &self.0.binding;
        let to_obj = self.0.to_obj.upgrade();

        if let Some(from_obj) = self.0.from_obj.upgrade() {
            if let Err(err) = remove_observer(&from_obj, &binding.from, None, &self.0.from_did_change) {
                tracing::warn!(binding = %binding, error = %err, "failed to remove binding source observer");
            }
        }
        if let Some(to_obj) = &to_obj {
            if !binding.one_way {
                if let Err(err) = remove_observer(to_obj, &binding.to, None, &self.0.to_did_change) {
                    tracing::warn!(binding = %binding, error = %err, "failed to remove binding target observer");
                }
            }
            remove_listener(to_obj, WILL_DESTROY, None, Some(&self.0.will_destroy));
            if let Some(meta) = peek_meta(to_obj) {
                meta.release_connection(self);
            }
        }
        tracing::debug!(binding = %binding, "binding disconnected");
    }
}

impl fmt::Debug for ConnectedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedBinding")
            .field("binding", &self.0.binding)
            .field("connected", &self.is_connected())
            .field("direction", &self.direction())
            .finish()
    }
}

fn log_sync(binding: &Binding, direction: SyncDirection, target: &Obj) {
    if config::log_bindings() {
        tracing::info!(object = %target.id(), binding = %binding, ?direction, "binding sync");
    } else {
        tracing::debug!(object = %target.id(), binding = %binding, ?direction, "binding sync");
    }
}

/// Run every scheduled sync, including ones scheduled by the syncs
/// themselves. Returns the number of syncs run.
pub fn flush_bindings() -> usize {
    let mut ran = 0;
    loop {
        let batch = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        if batch.is_empty() {
            return ran;
        }
        for binding in batch {
            binding.sync();
            ran += 1;
        }
    }
}

/// Connect a two-way binding from `from` to `obj.to`.
pub fn bind(obj: &Obj, to: &str, from: &str) -> Result<ConnectedBinding> {
    Binding::new(to, from).connect(obj)
}

/// Connect the bindings declared on `obj`'s prototypes (and `obj` itself).
pub(crate) fn connect_bindings(obj: &Obj, meta: &Meta) -> Result<()> {
    let declared = meta.inherited_bindings();
    if declared.is_empty() {
        return Ok(());
    }
    for (_, binding) in declared {
        binding.connect(obj)?;
    }
    meta.clear_bindings();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::watcher_count;
    use crate::object::Value;

    #[test]
    fn connect_copies_and_syncs_forward_on_flush() {
        let source = Obj::with_props([("name", "Ada")]);
        let target = Obj::with_props([("source", &source)]);
        bind(&target, "name", "source.name").unwrap();
        assert_eq!(target.get("name"), Value::from("Ada"));

        source.set("name", "Grace").unwrap();
        // nothing moves until the flush
        assert_eq!(target.get("name"), Value::from("Ada"));
        assert_eq!(flush_bindings(), 1);
        assert_eq!(target.get("name"), Value::from("Grace"));
    }

    #[test]
    fn two_way_bindings_sync_back() {
        let source = Obj::with_props([("name", "Ada")]);
        let target = Obj::with_props([("source", &source)]);
        bind(&target, "name", "source.name").unwrap();

        target.set("name", "Lin").unwrap();
        flush_bindings();
        assert_eq!(source.get("name"), Value::from("Lin"));
        // the back-sync did not bounce forward again
        assert_eq!(flush_bindings(), 0);
    }

    #[test]
    fn forward_wins_when_both_sides_change() {
        let source = Obj::with_props([("name", "a")]);
        let target = Obj::with_props([("source", &source)]);
        let connected = bind(&target, "name", "source.name").unwrap();

        target.set("name", "from-target").unwrap();
        assert_eq!(connected.direction(), Some(SyncDirection::Back));
        source.set("name", "from-source").unwrap();
        assert_eq!(connected.direction(), Some(SyncDirection::Forward));

        flush_bindings();
        assert_eq!(target.get("name"), Value::from("from-source"));
        assert_eq!(source.get("name"), Value::from("from-source"));
    }

    #[test]
    fn one_way_ignores_target_changes() {
        let root = Obj::with_props([("value", 1)]);
        let target = Obj::new();
        Binding::new("value", "value").from_root(&root).one_way().connect(&target).unwrap();
        assert_eq!(target.get("value"), Value::from(1));

        target.set("value", 5).unwrap();
        assert_eq!(flush_bindings(), 0);
        assert_eq!(root.get("value"), Value::from(1));
    }

    #[test]
    fn destroying_the_target_disconnects() {
        let source = Obj::with_props([("name", "a")]);
        let target = Obj::with_props([("source", &source)]);
        let connected = bind(&target, "name", "source.name").unwrap();
        assert_eq!(meta_for(&target).connected_bindings().len(), 1);

        target.destroy();
        assert!(!connected.is_connected());
        assert_eq!(watcher_count(&source, "name"), 0);

        source.set("name", "b").unwrap();
        assert_eq!(flush_bindings(), 0);
    }

    #[test]
    fn declared_bindings_connect_on_creation() {
        let source = Obj::with_props([("count", 3)]);
        let proto = Obj::prototype(None);
        meta_for(&proto)
            .write_bindings("count", Binding::new("count", "count").from_root(&source))
            .unwrap();

        let instance = Obj::create(&proto);
        assert_eq!(instance.get("count"), Value::from(3));
        assert_eq!(meta_for(&instance).connected_bindings().len(), 1);

        source.set("count", 4).unwrap();
        flush_bindings();
        assert_eq!(instance.get("count"), Value::from(4));
    }

    #[test]
    fn display_shows_direction() {
        assert_eq!(Binding::new("a", "b").to_string(), "b <-> a");
        assert_eq!(Binding::new("a", "b").one_way().to_string(), "b -> a");
    }
}
