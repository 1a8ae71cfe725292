//! Read-only view of a scope handed to the debugger callback.

use crate::error::UserError;
use crate::reference::Reference;
use crate::validator::Revisions;
use crate::values::Value;

pub struct ScopeInspector<'a> {
    revisions: &'a Revisions,
    this: Reference,
    locals: Vec<(String, Reference)>,
}

impl<'a> ScopeInspector<'a> {
    pub fn new(revisions: &'a Revisions, this: Reference, locals: Vec<(String, Reference)>) -> Self {
        Self { revisions, this, locals }
    }

    pub fn this(&self) -> Result<Value, UserError> {
        self.read(&self.this)
    }

    pub fn locals(&self) -> &[(String, Reference)] {
        &self.locals
    }

    pub fn local(&self, name: &str) -> Option<Result<Value, UserError>> {
        self.locals.iter().find(|(n, _)| n == name).map(|(_, r)| self.read(r))
    }

    /// Resolves a dotted path. A leading `this` or local name picks the
    /// base; anything else is read off `this`.
    pub fn get(&self, path: &str) -> Result<Value, UserError> {
        let mut keys = path.split('.').filter(|k| !k.is_empty());
        let Some(head) = keys.next() else {
            return self.this();
        };
        let rest: Vec<&str> = keys.collect();
        let (base, rest) = if head == "this" {
            (self.this.clone(), rest)
        } else if let Some((_, local)) = self.locals.iter().find(|(n, _)| n == head) {
            (local.clone(), rest)
        } else {
            let mut full = vec![head];
            full.extend(rest);
            (self.this.clone(), full)
        };
        self.read(&base.path(&rest.join(".")))
    }

    /// Reads without subscribing any tracking frame.
    fn read(&self, reference: &Reference) -> Result<Value, UserError> {
        self.revisions.untrack(|| reference.value(self.revisions))
    }
}
