//! Dependency Graph
//!
//! This module tracks *who is watching what*.
//!
//! # Overview
//!
//! - `watching` keeps a per-object, per-key watch count. A key with a count
//!   of zero costs nothing on write.
//! - `chains` extends watching across objects: watching `"a.b.c"` on `R`
//!   watches `a` on `R`, `b` on whatever `R.a` is, and `c` on whatever
//!   `R.a.b` is, re-wiring itself when any link changes identity.
//!
//! # Design Decisions
//!
//! 1. Chain trees are owned by the metadata of their root object. Objects a
//!    tree passes through only hold weak back-references (chain watchers),
//!    so a tree never keeps a foreign object alive.
//!
//! 2. Intermediate values that are not objects simply leave the rest of the
//!    path unattached until a later change makes it reachable again.

pub(crate) mod chains;
pub mod watching;

pub use watching::{
    chain_watcher_count, has_chain_watchers, is_watching, unwatch, unwatch_value, watch,
    watch_value, watcher_count,
};
