//! Invalidation tags.
//!
//! A tag is a revision stamp. Rendering layers snapshot `tag.value()` and
//! later call `tag.validate(snapshot)` to learn whether anything may have
//! changed. The kernel only ever dirties tags.

use std::cell::Cell;
use std::rc::Rc;

use super::{meta_for, Meta};
use crate::object::{proxy, Key, Obj};

thread_local! {
    static REVISION: Cell<u64> = const { Cell::new(1) };
}

/// The current global revision.
pub fn current_revision() -> u64 {
    REVISION.with(Cell::get)
}

fn bump_revision() -> u64 {
    REVISION.with(|revision| {
        let next = revision.get() + 1;
        revision.set(next);
        next
    })
}

#[derive(Clone, Debug)]
pub struct Tag(Rc<Cell<u64>>);

impl Tag {
    fn new() -> Self {
        Self(Rc::new(Cell::new(current_revision())))
    }

    /// Revision at which this tag last changed.
    pub fn value(&self) -> u64 {
        self.0.get()
    }

    /// Whether nothing changed since `snapshot` was taken.
    pub fn validate(&self, snapshot: u64) -> bool {
        self.0.get() <= snapshot
    }

    pub fn dirty(&self) {
        self.0.set(bump_revision());
    }
}

/// The aggregate tag of `obj`, created on first use.
pub fn tag_for(obj: &Obj) -> Tag {
    meta_for(obj).object_tag()
}

/// The tag for `obj.key`, created on first use.
pub fn tag_for_property(obj: &Obj, key: &str) -> Tag {
    meta_for(obj).property_tag(key)
}

impl Meta {
    pub(crate) fn object_tag(&self) -> Tag {
        self.tag.borrow_mut().get_or_insert_with(Tag::new).clone()
    }

    pub(crate) fn property_tag(&self, key: &str) -> Tag {
        self.tags
            .borrow_mut()
            .entry(Key::from(key))
            .or_insert_with(Tag::new)
            .clone()
    }

    /// Dirty the tags touched by a change of `key`. Only tags that someone
    /// already asked for exist, so this never allocates new ones.
    pub(crate) fn mark_dirty(&self, obj: &Obj, key: &str) {
        if let Some(tag) = self.tag.borrow().as_ref() {
            tag.dirty();
        }
        if let Some(tag) = self.tags.borrow().get(key) {
            tag.dirty();
        }

        // Every key of a proxy may resolve differently once its content
        // changes.
        if obj.is_proxy() && key == proxy::CONTENT_KEY {
            for tag in self.tags.borrow().values() {
                tag.dirty();
            }
        }
    }
}
