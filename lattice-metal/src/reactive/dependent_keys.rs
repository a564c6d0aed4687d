//! Dependent-key registration.
//!
//! Registering `key` as depending on `dep` bumps `deps[dep][key]` and
//! watches `dep` (a key or a path) so that changes to it reach `key`.

use crate::error::Result;
use crate::graph::watching::{unwatch_in, watch_in};
use crate::meta::Meta;
use crate::object::{Key, Obj};

pub(crate) fn add_dependent_keys(dependent_keys: &[Key], obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
    for dep in dependent_keys {
        let count = meta.peek_deps(dep, key);
        meta.write_deps(dep, key, count + 1)?;
        watch_in(obj, dep, meta)?;
    }
    Ok(())
}

pub(crate) fn remove_dependent_keys(dependent_keys: &[Key], obj: &Obj, key: &str, meta: &Meta) -> Result<()> {
    for dep in dependent_keys {
        let count = meta.peek_deps(dep, key);
        meta.write_deps(dep, key, count.saturating_sub(1))?;
        unwatch_in(obj, dep, meta)?;
    }
    Ok(())
}
