//! Lattice Metal
//!
//! This crate provides the observable-property kernel of the Lattice
//! framework. It implements:
//!
//! - Per-object metadata with prototype inheritance
//! - Reference-counted watching of keys and dotted paths
//! - Computed, alias and injected properties with per-instance caches
//! - Change notification, observers, events and change batching
//! - Bindings, mixins, value proxies and invalidation tags
//!
//! The kernel is single-threaded: every object, metadata record and
//! pending notification lives on the thread that created it.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `object`: tracked objects, values, paths and property access
//! - `meta`: per-object metadata, listeners and tags
//! - `graph`: watch counts and the chain trees behind path watching
//! - `reactive`: descriptors, notification, observers, batching, bindings
//! - `config`: process-wide tunables
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_metal::{computed, define_property, add_observer, Method, Obj, Value};
//!
//! let person = Obj::with_props([("first", "Ada"), ("last", "Lovelace")]);
//! define_property(&person, "full", computed(&["first", "last"], |obj, _| {
//!     let first = obj.get("first");
//!     let last = obj.get("last");
//!     Value::from(format!("{} {}", first.as_str().unwrap_or(""), last.as_str().unwrap_or("")))
//! })?)?;
//!
//! add_observer(&person, "full", None, Method::observer(|obj, key| {
//!     println!("{key} is now {:?}", obj.get(key));
//! }))?;
//!
//! person.set("first", "Augusta")?;
//! // prints: full is now String("Augusta Lovelace")
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod meta;
pub mod object;
pub mod reactive;

pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use graph::{is_watching, unwatch, watch, watch_value, watcher_count};
pub use meta::tags::{current_revision, tag_for, tag_for_property};
pub use meta::{destroy_meta, meta_for, peek_meta, Meta, Method, Tag};
pub use object::accessors::{get, get_properties, get_with_default, set, set_properties, try_set};
pub use object::{Key, Obj, ObjectId, Owner, Value, WeakObj};
pub use reactive::{
    add_before_observer, add_listener, add_observer, alias, begin_property_changes, bind,
    change_properties, computed, define_property, end_property_changes, flush_bindings, inject,
    notify_property_change, property_did_change, property_will_change, remove_before_observer,
    remove_listener, remove_observer, send_event, Binding, ChangeBatch, ComputedProperty, Mixin,
    Slot,
};
