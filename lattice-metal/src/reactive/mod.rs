//! Reactive Properties
//!
//! This module implements everything that reacts to property changes:
//! descriptors, change notification, observers, events, batching,
//! bindings and mixins.
//!
//! # Concepts
//!
//! ## Descriptors
//!
//! A property slot is either a plain value or a descriptor. A computed
//! property derives its value from declared dependent keys and caches it
//! per instance until one of them changes. Aliases forward to another key
//! and injected properties resolve through the object's owner.
//!
//! ## Notification
//!
//! A write to a watched key runs `property_will_change`, stores the value
//! and runs `property_did_change`. The did-change invalidates dependent
//! computed properties, re-resolves chains through the key and notifies
//! observers, immediately or at the end of the current batch.
//!
//! ## Observers and Events
//!
//! Observers are event listeners on `key:change` / `key:before` that also
//! hold a watch on the key. Any other event name is free-form and only
//! delivered by `send_event`.
//!
//! # Implementation Notes
//!
//! All state is thread-local. User callbacks (getters, setters, listeners)
//! may re-enter the kernel freely: no internal borrow is held while they run.

pub mod alias;
pub mod batch;
pub mod binding;
pub mod computed;
mod dependent_keys;
pub mod events;
pub mod injected;
pub mod mixin;
pub mod notify;
pub mod observer;
pub mod property;

pub use alias::{alias, AliasedProperty};
pub use batch::{begin_property_changes, change_properties, end_property_changes, ChangeBatch};
pub use binding::{bind, flush_bindings, Binding, ConnectedBinding, SyncDirection};
pub use computed::{cache_for, computed, ComputedProperty};
pub use events::{add_listener, has_listeners, remove_listener, send_event};
pub use injected::{inject, InjectedProperty};
pub use mixin::Mixin;
pub use notify::{notify_property_change, property_did_change, property_will_change};
pub use observer::{
    add_before_observer, add_observer, remove_before_observer, remove_observer, suspend_observer,
};
pub use property::{define_property, Slot};
