//! Lexical scopes: slot 0 is `this`, the rest are block symbols. A
//! component layout's scope also carries the blocks its caller passed.

use crate::error::EngineError;
use crate::reference::Reference;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A block passed to a component, closed over the caller's scope.
#[derive(Debug)]
pub struct CapturedBlock {
    pub name: String,
    pub address: i64,
    pub scope: Scope,
    /// Caller slots that yielded values bind to.
    pub params: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Scope {
    slots: Vec<Reference>,
    blocks: Option<Rc<BTreeMap<String, Rc<CapturedBlock>>>>,
}

impl Scope {
    /// A scope of `size` slots with `this` bound and the rest undefined.
    pub fn root(self_ref: Reference, size: usize) -> Self {
        let mut slots = vec![Reference::undefined(); size.max(1)];
        slots[0] = self_ref;
        Self { slots, blocks: None }
    }

    pub fn with_blocks(mut self, blocks: Vec<Rc<CapturedBlock>>) -> Self {
        if !blocks.is_empty() {
            let table = blocks.into_iter().map(|b| (b.name.clone(), b)).collect();
            self.blocks = Some(Rc::new(table));
        }
        self
    }

    pub fn block(&self, name: &str) -> Option<&Rc<CapturedBlock>> {
        self.blocks.as_ref().and_then(|blocks| blocks.get(name))
    }

    pub fn self_ref(&self) -> Reference {
        self.slots[0].clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Result<Reference, EngineError> {
        self.slots
            .get(slot)
            .cloned()
            .ok_or_else(|| EngineError::Invariant(format!("scope slot {} is out of range ({} slots)", slot, self.slots.len())))
    }

    /// Binds `slot`, growing the scope if a child block declared more
    /// symbols than its parent.
    pub fn bind(&mut self, slot: usize, reference: Reference) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, Reference::undefined());
        }
        self.slots[slot] = reference;
    }
}

/// The scope stack of one VM run.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new(scope: Scope) -> Self {
        Self { scopes: vec![scope] }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current(&self) -> Result<&Scope, EngineError> {
        self.scopes.last().ok_or(EngineError::Missing("scope"))
    }

    pub fn current_mut(&mut self) -> Result<&mut Scope, EngineError> {
        self.scopes.last_mut().ok_or(EngineError::Missing("scope"))
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    /// Pushes a copy of the current scope.
    pub fn push_child(&mut self) -> Result<(), EngineError> {
        let child = self.current()?.clone();
        self.scopes.push(child);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Scope, EngineError> {
        if self.scopes.len() <= 1 {
            return Err(EngineError::FrameImbalance("cannot pop the root scope"));
        }
        self.scopes.pop().ok_or(EngineError::Missing("scope"))
    }

    pub fn truncate(&mut self, depth: usize) {
        self.scopes.truncate(depth.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Revisions;
    use crate::values::Value;

    fn text(r: &Reference) -> String {
        r.value(&Revisions::new()).unwrap().to_text()
    }

    #[test]
    fn child_scopes_shadow_without_touching_the_parent() {
        let mut stack = ScopeStack::new(Scope::root(Reference::constant(Value::string("self")), 2));
        stack.current_mut().unwrap().bind(1, Reference::constant(Value::string("outer")));
        stack.push_child().unwrap();
        stack.current_mut().unwrap().bind(1, Reference::constant(Value::string("inner")));
        assert_eq!(text(&stack.current().unwrap().get(1).unwrap()), "inner");
        stack.pop().unwrap();
        assert_eq!(text(&stack.current().unwrap().get(1).unwrap()), "outer");
        assert_eq!(text(&stack.current().unwrap().self_ref()), "self");
    }

    #[test]
    fn the_root_scope_cannot_be_popped() {
        let mut stack = ScopeStack::new(Scope::root(Reference::undefined(), 1));
        assert!(stack.pop().is_err());
        assert!(stack.current().unwrap().get(3).is_err());
    }

    #[test]
    fn blocks_are_found_by_name_and_shared_by_copies() {
        let caller = Scope::root(Reference::constant(Value::string("caller")), 2);
        let block = Rc::new(CapturedBlock {
            name: "inverse".into(),
            address: 12,
            scope: caller,
            params: vec![1],
        });
        let layout = Scope::root(Reference::undefined(), 1).with_blocks(vec![block]);
        let copy = layout.clone();
        assert!(copy.block("default").is_none());
        let found = copy.block("inverse").unwrap();
        assert_eq!(found.address, 12);
        assert_eq!(text(&found.scope.self_ref()), "caller");
        assert!(Scope::root(Reference::undefined(), 1).block("inverse").is_none());
    }

    #[test]
    fn binding_past_the_end_grows_the_scope() {
        let mut scope = Scope::root(Reference::undefined(), 1);
        scope.bind(3, Reference::constant(Value::Number(1.0)));
        assert_eq!(scope.len(), 4);
        assert_eq!(text(&scope.get(2).unwrap()), "");
    }
}
