//! Mixins
//!
//! A mixin is a named bundle of declarations applied to an object, most
//! often a prototype: property slots, observers, event listeners and
//! bindings. Applying records the name in the object's metadata so
//! [`Mixin::detect`] works on the object and everything inheriting from it.
//!
//! ```rust,ignore
//! let evented = Mixin::new("Named")
//!     .property("fullName", computed(&["first", "last"], full_name)?)
//!     .observer("fullName", Method::observer(|obj, _| log(obj)))
//!     .binding("title", "owner.title");
//! evented.apply(&proto)?;
//! ```

use crate::error::Result;
use crate::meta::{meta_for, readable_meta, Method};
use crate::object::{Key, Obj};
use crate::reactive::binding::Binding;
use crate::reactive::events::add_listener;
use crate::reactive::observer::{add_before_observer, add_observer};
use crate::reactive::property::{define_property, Slot};

#[derive(Clone)]
pub struct Mixin {
    name: Key,
    properties: Vec<(Key, Slot)>,
    observers: Vec<(Key, Method)>,
    before_observers: Vec<(Key, Method)>,
    listeners: Vec<(Key, Method)>,
    bindings: Vec<Binding>,
}

impl Mixin {
    pub fn new(name: &str) -> Self {
        Self {
            name: Key::from(name),
            properties: Vec::new(),
            observers: Vec::new(),
            before_observers: Vec::new(),
            listeners: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(mut self, key: &str, slot: impl Into<Slot>) -> Self {
        self.properties.push((Key::from(key), slot.into()));
        self
    }

    pub fn observer(mut self, path: &str, method: Method) -> Self {
        self.observers.push((Key::from(path), method));
        self
    }

    pub fn before_observer(mut self, path: &str, method: Method) -> Self {
        self.before_observers.push((Key::from(path), method));
        self
    }

    /// Listen for `event` on the object the mixin is applied to.
    pub fn on(mut self, event: &str, method: Method) -> Self {
        self.listeners.push((Key::from(event), method));
        self
    }

    /// Bind `to` on the object to `from`.
    pub fn binding(self, to: &str, from: &str) -> Self {
        self.with_binding(Binding::new(to, from))
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Apply every declaration to `obj`.
    ///
    /// Bindings connect right away on an initialized object. On a prototype
    /// they are recorded and connected for each instance as it is created.
    pub fn apply(&self, obj: &Obj) -> Result<()> {
        let meta = meta_for(obj);
        meta.add_mixin(&self.name)?;

        for (key, slot) in &self.properties {
            define_property(obj, key, slot.clone())?;
        }
        for binding in &self.bindings {
            if obj.is_initialized() {
                binding.connect(obj)?;
            } else {
                meta.write_bindings(binding.to_path(), binding.clone())?;
            }
        }
        for (path, method) in &self.before_observers {
            add_before_observer(obj, path, None, method.clone())?;
        }
        for (path, method) in &self.observers {
            add_observer(obj, path, None, method.clone())?;
        }
        for (event, method) in &self.listeners {
            add_listener(obj, event, None, method.clone(), false)?;
        }

        tracing::debug!(object = %obj.id(), mixin = %self.name, "mixin applied");
        Ok(())
    }

    /// Whether this mixin was applied to `obj` or one of its prototypes.
    pub fn detect(&self, obj: &Obj) -> bool {
        readable_meta(obj).is_some_and(|meta| meta.has_mixin(&self.name))
    }
}
