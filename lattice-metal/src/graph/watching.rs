//! Reference-counted watching.
//!
//! A key is *watched* while its count is above zero. Only watched keys pay
//! for change propagation; unwatched writes stop at the metadata check.
//! Plain keys are counted directly, dotted paths additionally register on
//! the object's chain tree the first time they are watched.

use crate::error::Result;
use crate::meta::{meta_for, peek_meta, Meta};
use crate::object::path::is_path;
use crate::object::{proxy, Obj, Value};

/// Watch a single key.
pub(crate) fn watch_key(obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
    let count = meta.peek_watching(key);
    meta.write_watching(key, count + 1)?;
    tracing::trace!(object = %obj.id(), key, count = count + 1, "watch");

    if count == 0 {
        if let Some(slot) = obj.lookup_slot(key) {
            slot.will_watch(obj, key)?;
        }
        if obj.is_proxy() {
            proxy::will_watch_property(obj, key)?;
        }
    }
    Ok(())
}

/// Release one watch of a single key. A no-op once the object is destroyed.
pub(crate) fn unwatch_key(obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
    if meta.is_source_destroyed() || meta.is_meta_destroyed() {
        return Ok(());
    }

    let count = meta.peek_watching(key);
    match count {
        0 => {}
        1 => {
            meta.write_watching(key, 0)?;
            tracing::trace!(object = %obj.id(), key, count = 0, "unwatch");
            if let Some(slot) = obj.lookup_slot(key) {
                slot.did_unwatch(obj, key)?;
            }
            if obj.is_proxy() {
                proxy::did_unwatch_property(obj, key)?;
            }
        }
        _ => {
            meta.write_watching(key, count - 1)?;
            tracing::trace!(object = %obj.id(), key, count = count - 1, "unwatch");
        }
    }
    Ok(())
}

fn watch_path(obj: &Obj, path: &str, meta: &Meta) -> Result<()> {
    let count = meta.peek_watching(path);
    meta.write_watching(path, count + 1)?;
    tracing::trace!(object = %obj.id(), path, count = count + 1, "watch path");
    if count == 0 {
        meta.writable_chains()?.add(path);
    }
    Ok(())
}

fn unwatch_path(obj: &Obj, path: &str, meta: &Meta) -> Result<()> {
    if meta.is_meta_destroyed() {
        return Ok(());
    }

    let count = meta.peek_watching(path);
    match count {
        0 => {}
        1 => {
            meta.write_watching(path, 0)?;
            tracing::trace!(object = %obj.id(), path, count = 0, "unwatch path");
            meta.writable_chains()?.remove(path);
        }
        _ => {
            meta.write_watching(path, count - 1)?;
            tracing::trace!(object = %obj.id(), path, count = count - 1, "unwatch path");
        }
    }
    Ok(())
}

pub(crate) fn watch_in(obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
    if is_path(key) {
        watch_path(obj, key, meta)
    } else {
        watch_key(obj, key, meta)
    }
}

pub(crate) fn unwatch_in(obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
    if is_path(key) {
        unwatch_path(obj, key, meta)
    } else {
        unwatch_key(obj, key, meta)
    }
}

/// Start watching `key`, which may be a dotted path.
pub fn watch(obj: &Obj, key: &str) -> Result<()> {
    watch_in(obj, key, &meta_for(obj))
}

/// Release one watch of `key`.
pub fn unwatch(obj: &Obj, key: &str) -> Result<()> {
    match peek_meta(obj) {
        Some(meta) => unwatch_in(obj, key, &meta),
        None => Ok(()),
    }
}

/// [`watch`] for arbitrary values. Non-objects are ignored.
pub fn watch_value(value: &Value, key: &str) -> Result<()> {
    match value.as_object() {
        Some(obj) => watch(obj, key),
        None => Ok(()),
    }
}

/// [`unwatch`] for arbitrary values. Non-objects are ignored.
pub fn unwatch_value(value: &Value, key: &str) -> Result<()> {
    match value.as_object() {
        Some(obj) => unwatch(obj, key),
        None => Ok(()),
    }
}

pub fn is_watching(obj: &Obj, key: &str) -> bool {
    watcher_count(obj, key) > 0
}

/// Current watch count of `key`, inherited counts included. Never creates
/// metadata.
pub fn watcher_count(obj: &Obj, key: &str) -> u32 {
    peek_meta(obj).map_or(0, |meta| meta.peek_watching(key))
}

/// Number of chain nodes from any tree attached to `obj.key`.
pub fn chain_watcher_count(obj: &Obj, key: &str) -> usize {
    peek_meta(obj).map_or(0, |meta| meta.chain_watchers().borrow().count(key))
}

/// Whether any chain node is attached to `obj`.
pub fn has_chain_watchers(obj: &Obj) -> bool {
    peek_meta(obj).is_some_and(|meta| !meta.chain_watchers().borrow().is_empty())
}
