//! Memoized reactive references built over tags.
//!
//! A reference is one of four kinds:
//! - constant: never re-evaluates;
//! - cell: a root of mutable state with its own dirtyable tag;
//! - formula: a cached computation whose tag combines everything it read;
//! - invokable: a formula that also accepts writes.
//!
//! Children created with [`Reference::child`] hold their parent strongly. The
//! parent only keeps a weak lookup table of its children, so a dropped
//! subgraph is never kept alive by its source.

use crate::error::UserError;
use crate::validator::{Revision, Revisions, Tag};
use crate::values::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

pub type ComputeFn = Rc<dyn Fn(&Revisions) -> Result<Value, UserError>>;
pub type UpdateFn = Rc<dyn Fn(&Revisions, Value) -> Result<(), UserError>>;

enum Kind {
    Constant(Value),
    Cell { value: RefCell<Value>, tag: Tag },
    Formula { compute: ComputeFn, fallible: bool },
    Invokable { compute: ComputeFn, update: UpdateFn },
}

struct Cached {
    result: Result<Value, UserError>,
    tag: Tag,
    revision: Revision,
}

struct Inner {
    kind: Kind,
    label: Option<String>,
    cache: RefCell<Option<Cached>>,
    evaluating: Cell<bool>,
    children: RefCell<HashMap<String, Weak<Inner>>>,
}

#[derive(Clone)]
pub struct Reference(Rc<Inner>);

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.0.kind {
            Kind::Constant(_) => "constant",
            Kind::Cell { .. } => "cell",
            Kind::Formula { fallible: false, .. } => "formula",
            Kind::Formula { fallible: true, .. } => "fallible",
            Kind::Invokable { .. } => "invokable",
        };
        write!(f, "Reference({}, {})", kind, self.debug_label())
    }
}

impl Reference {
    fn from_kind(kind: Kind, label: Option<String>) -> Self {
        Reference(Rc::new(Inner {
            kind,
            label,
            cache: RefCell::new(None),
            evaluating: Cell::new(false),
            children: RefCell::new(HashMap::new()),
        }))
    }

    pub fn constant(value: Value) -> Self {
        Self::from_kind(Kind::Constant(value), None)
    }

    pub fn undefined() -> Self {
        Self::constant(Value::Undefined)
    }

    pub fn cell(revs: &Revisions, value: Value) -> Self {
        Self::from_kind(
            Kind::Cell {
                value: RefCell::new(value),
                tag: revs.create_tag(),
            },
            None,
        )
    }

    /// A computation that cannot fail.
    pub fn formula(compute: impl Fn(&Revisions) -> Value + 'static) -> Self {
        Self::from_kind(
            Kind::Formula {
                compute: Rc::new(move |revs| Ok(compute(revs))),
                fallible: false,
            },
            None,
        )
    }

    /// A computation whose error is cached and rethrown until a dependency
    /// changes.
    pub fn fallible(compute: impl Fn(&Revisions) -> Result<Value, UserError> + 'static) -> Self {
        Self::from_kind(
            Kind::Formula {
                compute: Rc::new(compute),
                fallible: true,
            },
            None,
        )
    }

    pub fn invokable(
        compute: impl Fn(&Revisions) -> Result<Value, UserError> + 'static,
        update: impl Fn(&Revisions, Value) -> Result<(), UserError> + 'static,
    ) -> Self {
        Self::from_kind(
            Kind::Invokable {
                compute: Rc::new(compute),
                update: Rc::new(update),
            },
            None,
        )
    }

    /// Attaches a debug label (the binding path) used in error messages.
    pub fn labeled(self, label: impl Into<String>) -> Self {
        match Rc::try_unwrap(self.0) {
            Ok(mut inner) => {
                inner.label = Some(label.into());
                Reference(Rc::new(inner))
            }
            Err(shared) => Reference(shared),
        }
    }

    pub fn debug_label(&self) -> String {
        self.0.label.clone().unwrap_or_else(|| "(anonymous)".to_string())
    }

    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.0.kind, Kind::Constant(_))
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Current value. Consumes this reference's tag in the active frame.
    pub fn value(&self, revs: &Revisions) -> Result<Value, UserError> {
        match &self.0.kind {
            Kind::Constant(v) => Ok(v.clone()),
            Kind::Cell { value, tag } => {
                revs.consume_tag(tag);
                Ok(value.borrow().clone())
            }
            Kind::Formula { compute, .. } | Kind::Invokable { compute, .. } => self.compute(revs, compute),
        }
    }

    fn compute(&self, revs: &Revisions, compute: &ComputeFn) -> Result<Value, UserError> {
        if let Some(cached) = self.0.cache.borrow().as_ref() {
            if revs.validate_tag(&cached.tag, cached.revision) {
                revs.consume_tag(&cached.tag);
                return cached.result.clone();
            }
        }
        if self.0.evaluating.replace(true) {
            return Err(UserError::new("cycle detected while computing a reference").at(self.debug_label()));
        }
        let (result, tag) = revs.track(|| compute(revs));
        self.0.evaluating.set(false);
        let revision = revs.value_for_tag(&tag);
        revs.consume_tag(&tag);
        *self.0.cache.borrow_mut() = Some(Cached {
            result: result.clone(),
            tag,
            revision,
        });
        result
    }

    /// The tag captured at the last evaluation. Constants report a constant
    /// tag; never-evaluated formulas are evaluated first.
    pub fn tag(&self, revs: &Revisions) -> Tag {
        match &self.0.kind {
            Kind::Constant(_) => Tag::constant(),
            Kind::Cell { tag, .. } => tag.clone(),
            Kind::Formula { .. } | Kind::Invokable { .. } => {
                if self.0.cache.borrow().is_none() {
                    let _ = revs.untrack(|| self.value(revs));
                }
                self.0
                    .cache
                    .borrow()
                    .as_ref()
                    .map(|c| c.tag.clone())
                    .unwrap_or_else(Tag::constant)
            }
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Writes a cell, dirtying its tag. Writes of an identical value are
    /// dropped so dependents stay valid.
    pub fn set(&self, revs: &Revisions, new_value: Value) -> bool {
        match &self.0.kind {
            Kind::Cell { value, tag } => {
                if *value.borrow() == new_value {
                    return false;
                }
                *value.borrow_mut() = new_value;
                revs.dirty_tag(tag);
                true
            }
            _ => false,
        }
    }

    /// Writes through an updatable reference.
    pub fn update(&self, revs: &Revisions, new_value: Value) -> Result<(), UserError> {
        match &self.0.kind {
            Kind::Cell { .. } => {
                self.set(revs, new_value);
                Ok(())
            }
            Kind::Invokable { update, .. } => update(revs, new_value),
            _ => Err(UserError::new("cannot update a read-only reference").at(self.debug_label())),
        }
    }

    // ------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------

    /// Reference to property `key` of this reference's value. Repeated
    /// lookups for the same key share one child while it is alive.
    pub fn child(&self, key: &str) -> Reference {
        if let Some(existing) = self.0.children.borrow().get(key).and_then(Weak::upgrade) {
            return Reference(existing);
        }

        let label = match &self.0.label {
            Some(parent) => format!("{}.{}", parent, key),
            None => key.to_string(),
        };
        let child = match &self.0.kind {
            Kind::Constant(v) if v.is_nullish() => Reference::undefined(),
            _ => {
                let parent = self.clone();
                let read_key = key.to_string();
                let write_parent = self.clone();
                let write_key = key.to_string();
                Reference::invokable(
                    move |revs| parent.value(revs)?.get(&read_key, revs),
                    move |revs, value| {
                        let target = revs.untrack(|| write_parent.value(revs))?;
                        match &target {
                            Value::Object(obj) => match obj.fields.get(&write_key) {
                                Some(Value::Tracked(cell)) => cell.update(revs, value),
                                _ => Err(UserError::new(format!("property '{}' is not tracked", write_key))),
                            },
                            Value::Tracked(cell) => cell.child(&write_key).update(revs, value),
                            _ => Err(UserError::new(format!("cannot set '{}' on {}", write_key, target.type_name()))),
                        }
                    },
                )
            }
        }
        .labeled(label);

        self.0.children.borrow_mut().insert(key.to_string(), Rc::downgrade(&child.0));
        child
    }

    /// Follows a dotted path of child references.
    pub fn path(&self, path: &str) -> Reference {
        path.split('.')
            .filter(|k| !k.is_empty())
            .fold(self.clone(), |r, key| r.child(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    fn counting_formula(source: &Reference, calls: Rc<StdCell<u32>>) -> Reference {
        let source = source.clone();
        Reference::formula(move |revs| {
            calls.set(calls.get() + 1);
            Value::string(&format!("<{}>", source.value(revs).unwrap_or_default().to_text()))
        })
    }

    #[test]
    fn formulas_recompute_only_after_a_dependency_changes() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::string("a"));
        let calls = Rc::new(StdCell::new(0));
        let f = counting_formula(&cell, calls.clone());

        assert_eq!(f.value(&revs).unwrap(), Value::string("<a>"));
        assert_eq!(f.value(&revs).unwrap(), Value::string("<a>"));
        assert_eq!(calls.get(), 1);

        cell.set(&revs, Value::string("b"));
        assert_eq!(f.value(&revs).unwrap(), Value::string("<b>"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unrelated_dirtying_does_not_recompute() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::string("a"));
        let other = Reference::cell(&revs, Value::Null);
        let calls = Rc::new(StdCell::new(0));
        let f = counting_formula(&cell, calls.clone());
        f.value(&revs).unwrap();
        other.set(&revs, Value::Bool(true));
        f.value(&revs).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn identical_writes_do_not_dirty() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::string("a"));
        let before = revs.current();
        assert!(!cell.set(&revs, Value::string("a")));
        assert_eq!(revs.current(), before);
    }

    #[test]
    fn fallible_formulas_cache_their_error() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::Bool(true));
        let calls = Rc::new(StdCell::new(0));
        let counter = calls.clone();
        let source = cell.clone();
        let f = Reference::fallible(move |revs| {
            counter.set(counter.get() + 1);
            if source.value(revs)?.is_truthy() {
                Err(UserError::new("boom"))
            } else {
                Ok(Value::string("fine"))
            }
        });

        assert!(f.value(&revs).is_err());
        assert!(f.value(&revs).is_err());
        assert_eq!(calls.get(), 1);

        cell.set(&revs, Value::Bool(false));
        assert_eq!(f.value(&revs).unwrap(), Value::string("fine"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn debug_output_names_the_kind() {
        let f = Reference::fallible(|_| Ok(Value::Null)).labeled("this.x");
        assert!(format!("{:?}", f).starts_with("Reference(fallible, "));
        let g = Reference::formula(|_| Value::Null);
        assert!(format!("{:?}", g).starts_with("Reference(formula, "));
    }

    #[test]
    fn outer_formulas_see_inner_dependencies() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::Number(1.0));
        let inner_src = cell.clone();
        let inner = Reference::formula(move |revs| inner_src.value(revs).unwrap_or_default());
        let outer_src = inner.clone();
        let outer = Reference::formula(move |revs| {
            let n = match outer_src.value(revs).unwrap_or_default() {
                Value::Number(n) => n,
                _ => 0.0,
            };
            Value::Number(n * 10.0)
        });
        assert_eq!(outer.value(&revs).unwrap(), Value::Number(10.0));
        cell.set(&revs, Value::Number(2.0));
        assert_eq!(outer.value(&revs).unwrap(), Value::Number(20.0));
    }

    #[test]
    fn children_are_shared_while_alive_and_labeled_by_path() {
        let revs = Revisions::new();
        let root = Reference::cell(&revs, Value::object([("name", Value::string("Ada"))])).labeled("this");
        let a = root.child("name");
        let b = root.child("name");
        assert!(a.ptr_eq(&b));
        assert_eq!(a.debug_label(), "this.name");
        assert_eq!(a.value(&revs).unwrap(), Value::string("Ada"));
    }

    #[test]
    fn dropped_children_are_not_retained_by_the_parent() {
        let revs = Revisions::new();
        let root = Reference::cell(&revs, Value::Null);
        let weak = {
            let child = root.child("x");
            Rc::downgrade(&child.0)
        };
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn child_writes_reach_tracked_fields() {
        let revs = Revisions::new();
        let count = Reference::cell(&revs, Value::Number(1.0));
        let root = Reference::constant(Value::object([("count", Value::Tracked(count.clone()))]));
        let child = root.child("count");
        child.update(&revs, Value::Number(5.0)).unwrap();
        assert_eq!(count.value(&revs).unwrap(), Value::Number(5.0));
        assert_eq!(child.value(&revs).unwrap(), Value::Number(5.0));
    }

    #[test]
    fn constants_reject_updates() {
        let revs = Revisions::new();
        let k = Reference::constant(Value::Null).labeled("this.fixed");
        let err = k.update(&revs, Value::Bool(true)).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("this.fixed"));
    }
}
