//! Revision-stamped tags and the tracking frames that collect them.
//!
//! A [`Revisions`] context owns the revision counter. Nothing here is global:
//! every runtime instance carries its own context and passes it by reference.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

pub type Revision = u64;

/// Revision of constant tags. Valid against every snapshot.
pub const CONSTANT: Revision = 0;
/// Revision a fresh context starts at.
pub const INITIAL: Revision = 1;

#[derive(Debug)]
enum TagKind {
    Constant,
    Dirtyable {
        revision: Cell<Revision>,
    },
    /// A dirtyable tag that can additionally follow another tag.
    Updatable {
        revision: Cell<Revision>,
        subtag: RefCell<Option<Tag>>,
        subtag_buffer: Cell<Option<Revision>>,
        last_checked: Cell<Revision>,
        last_value: Cell<Revision>,
        computing: Cell<bool>,
    },
    Combinator {
        subtags: Vec<Tag>,
        last_checked: Cell<Revision>,
        last_value: Cell<Revision>,
        computing: Cell<bool>,
    },
}

/// Shared handle to a unit of revision-tracked state.
#[derive(Debug, Clone)]
pub struct Tag(Rc<TagKind>);

impl Tag {
    pub fn constant() -> Self {
        Tag(Rc::new(TagKind::Constant))
    }

    pub fn is_constant(&self) -> bool {
        match &*self.0 {
            TagKind::Constant => true,
            TagKind::Combinator { subtags, .. } => subtags.is_empty(),
            _ => false,
        }
    }

    pub fn ptr_eq(&self, other: &Tag) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn id(&self) -> *const TagKind {
        Rc::as_ptr(&self.0)
    }
}

/// The revision counter plus the stack of active tracking frames.
#[derive(Debug)]
pub struct Revisions {
    current: Cell<Revision>,
    frames: RefCell<Vec<Option<TrackFrame>>>,
}

#[derive(Debug, Default)]
struct TrackFrame {
    seen: HashSet<*const TagKind>,
    tags: Vec<Tag>,
}

impl Default for Revisions {
    fn default() -> Self {
        Self::new()
    }
}

impl Revisions {
    pub fn new() -> Self {
        Self {
            current: Cell::new(INITIAL),
            frames: RefCell::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Revision {
        self.current.get()
    }

    fn bump(&self) -> Revision {
        let next = self.current.get() + 1;
        self.current.set(next);
        next
    }

    // ------------------------------------------------------------------
    // Tag construction and mutation
    // ------------------------------------------------------------------

    /// A dirtyable leaf tag stamped with the current revision.
    pub fn create_tag(&self) -> Tag {
        Tag(Rc::new(TagKind::Dirtyable {
            revision: Cell::new(self.current()),
        }))
    }

    pub fn create_updatable_tag(&self) -> Tag {
        Tag(Rc::new(TagKind::Updatable {
            revision: Cell::new(self.current()),
            subtag: RefCell::new(None),
            subtag_buffer: Cell::new(None),
            last_checked: Cell::new(CONSTANT),
            last_value: Cell::new(CONSTANT),
            computing: Cell::new(false),
        }))
    }

    /// A tag whose revision is the maximum of `tags`.
    pub fn combine(&self, tags: Vec<Tag>) -> Tag {
        let mut tags: Vec<Tag> = tags.into_iter().filter(|t| !matches!(*t.0, TagKind::Constant)).collect();
        match tags.len() {
            0 => Tag::constant(),
            1 => tags.remove(0),
            _ => Tag(Rc::new(TagKind::Combinator {
                subtags: tags,
                last_checked: Cell::new(CONSTANT),
                last_value: Cell::new(CONSTANT),
                computing: Cell::new(false),
            })),
        }
    }

    /// Advances the revision counter and stamps `tag` with the new revision.
    pub fn dirty_tag(&self, tag: &Tag) {
        match &*tag.0 {
            TagKind::Dirtyable { revision } | TagKind::Updatable { revision, .. } => {
                revision.set(self.bump());
            }
            _ => {
                debug_assert!(false, "attempted to dirty a tag that is not dirtyable");
                tracing::warn!("ignored dirty_tag on a non-dirtyable tag");
            }
        }
    }

    /// Points an updatable tag at `subtag`. The subtag's current revision is
    /// buffered so that swapping it in does not by itself invalidate `tag`.
    pub fn update_tag(&self, tag: &Tag, subtag: Tag) {
        if let TagKind::Updatable {
            subtag: slot,
            subtag_buffer,
            last_checked,
            ..
        } = &*tag.0
        {
            if subtag.is_constant() {
                *slot.borrow_mut() = None;
                subtag_buffer.set(None);
            } else {
                subtag_buffer.set(Some(self.value_for_tag(&subtag)));
                *slot.borrow_mut() = Some(subtag);
            }
            last_checked.set(CONSTANT);
        } else {
            debug_assert!(false, "attempted to update a tag that is not updatable");
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub fn value_for_tag(&self, tag: &Tag) -> Revision {
        match &*tag.0 {
            TagKind::Constant => CONSTANT,
            TagKind::Dirtyable { revision } => revision.get(),
            TagKind::Updatable {
                revision,
                subtag,
                subtag_buffer,
                last_checked,
                last_value,
                computing,
            } => {
                let current = self.current();
                if last_checked.get() == current || computing.get() {
                    return last_value.get().max(revision.get());
                }
                computing.set(true);
                let mut value = revision.get();
                if let Some(sub) = subtag.borrow().as_ref() {
                    let sub_value = self.value_for_tag(sub);
                    if Some(sub_value) == subtag_buffer.get() {
                        value = value.max(last_value.get());
                    } else {
                        subtag_buffer.set(None);
                        value = value.max(sub_value);
                    }
                }
                computing.set(false);
                last_checked.set(current);
                last_value.set(value);
                value
            }
            TagKind::Combinator {
                subtags,
                last_checked,
                last_value,
                computing,
            } => {
                let current = self.current();
                if last_checked.get() == current || computing.get() {
                    return last_value.get();
                }
                computing.set(true);
                let value = subtags.iter().map(|t| self.value_for_tag(t)).max().unwrap_or(CONSTANT);
                computing.set(false);
                last_checked.set(current);
                last_value.set(value);
                value
            }
        }
    }

    /// True while `tag` has not changed since `snapshot`.
    pub fn validate_tag(&self, tag: &Tag, snapshot: Revision) -> bool {
        self.value_for_tag(tag) <= snapshot
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Records a read of `tag` in the innermost tracking frame, if any.
    pub fn consume_tag(&self, tag: &Tag) {
        if let Some(Some(frame)) = self.frames.borrow_mut().last_mut() {
            if frame.seen.insert(tag.id()) {
                frame.tags.push(tag.clone());
            }
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(Some(_)))
    }

    pub fn begin_track(&self) {
        self.frames.borrow_mut().push(Some(TrackFrame::default()));
    }

    /// Closes the innermost frame and combines what it consumed.
    pub fn end_track(&self) -> Tag {
        let frame = self.frames.borrow_mut().pop();
        match frame {
            Some(Some(frame)) => self.combine(frame.tags),
            _ => {
                debug_assert!(false, "end_track without a matching begin_track");
                Tag::constant()
            }
        }
    }

    /// Runs `f` and returns its result with the tag of everything it read.
    pub fn track<T>(&self, f: impl FnOnce() -> T) -> (T, Tag) {
        self.begin_track();
        let value = f();
        let tag = self.end_track();
        (value, tag)
    }

    /// Runs `f` without recording its reads in the enclosing frame.
    pub fn untrack<T>(&self, f: impl FnOnce() -> T) -> T {
        self.frames.borrow_mut().push(None);
        let value = f();
        self.frames.borrow_mut().pop();
        value
    }
}
