//! Property observers.
//!
//! An observer of `path` is a listener for `path:change` (or `path:before`)
//! plus one watch of `path`. Adding and removing keep the two in step.

use crate::error::Result;
use crate::graph::watching::{unwatch, watch};
use crate::meta::{MatchedListener, Method};
use crate::object::Obj;
use crate::reactive::events;

const CHANGE_SUFFIX: &str = ":change";
const BEFORE_SUFFIX: &str = ":before";

pub fn change_event(key: &str) -> String {
    format!("{key}{CHANGE_SUFFIX}")
}

pub fn before_event(key: &str) -> String {
    format!("{key}{BEFORE_SUFFIX}")
}

/// The property key an observer event is about.
fn observed_key(event: &str) -> &str {
    event
        .strip_suffix(CHANGE_SUFFIX)
        .or_else(|| event.strip_suffix(BEFORE_SUFFIX))
        .unwrap_or(event)
}

impl Method {
    /// A listener taking `(sender, key)`, the shape every observer has.
    pub fn observer(f: impl Fn(&Obj, &str) + 'static) -> Self {
        Method::new(move |invocation| {
            let key = invocation
                .params
                .get(1)
                .and_then(|param| param.as_str())
                .unwrap_or_else(|| observed_key(invocation.event));
            f(invocation.sender, key)
        })
    }
}

pub fn add_observer(obj: &Obj, path: &str, target: Option<&Obj>, method: Method) -> Result<()> {
    events::add_listener(obj, &change_event(path), target, method, false)?;
    watch(obj, path)
}

/// Remove an observer. The path is unwatched once per listener removed.
pub fn remove_observer(obj: &Obj, path: &str, target: Option<&Obj>, method: &Method) -> Result<()> {
    let removed = events::remove_listener(obj, &change_event(path), target, Some(method));
    for _ in 0..removed {
        unwatch(obj, path)?;
    }
    Ok(())
}

pub fn add_before_observer(obj: &Obj, path: &str, target: Option<&Obj>, method: Method) -> Result<()> {
    events::add_listener(obj, &before_event(path), target, method, false)?;
    watch(obj, path)
}

pub fn remove_before_observer(obj: &Obj, path: &str, target: Option<&Obj>, method: &Method) -> Result<()> {
    let removed = events::remove_listener(obj, &before_event(path), target, Some(method));
    for _ in 0..removed {
        unwatch(obj, path)?;
    }
    Ok(())
}

pub fn observers_for(obj: &Obj, path: &str) -> Vec<MatchedListener> {
    events::listeners_for(obj, &change_event(path))
}

pub fn before_observers_for(obj: &Obj, path: &str) -> Vec<MatchedListener> {
    events::listeners_for(obj, &before_event(path))
}

/// Run `f` without notifying `(target, method)` about changes to `path`.
pub fn suspend_observer<R>(
    obj: &Obj,
    path: &str,
    target: Option<&Obj>,
    method: &Method,
    f: impl FnOnce() -> R,
) -> R {
    events::suspend_listener(obj, &change_event(path), target, method, f)
}

pub fn suspend_observers<R>(
    obj: &Obj,
    paths: &[&str],
    target: Option<&Obj>,
    method: &Method,
    f: impl FnOnce() -> R,
) -> R {
    let names: Vec<String> = paths.iter().map(|path| change_event(path)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    events::suspend_listeners(obj, &names, target, method, f)
}
