//! Captured invocation arguments.

use crate::error::UserError;
use crate::reference::Reference;
use crate::validator::Revisions;
use crate::values::Value;
use std::collections::BTreeMap;

/// Positional and named argument references as captured by `PushArgs`.
#[derive(Debug, Clone, Default)]
pub struct CapturedArgs {
    pub positional: Vec<Reference>,
    pub named: Vec<(String, Reference)>,
}

impl CapturedArgs {
    pub fn new(positional: Vec<Reference>, named: Vec<(String, Reference)>) -> Self {
        Self { positional, named }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub fn named(&self, name: &str) -> Option<&Reference> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn is_constant(&self) -> bool {
        self.positional.iter().all(Reference::is_constant) && self.named.iter().all(|(_, r)| r.is_constant())
    }

    /// Prepends curried arguments: curried positionals come first, and the
    /// arguments at the call site override curried named arguments.
    pub fn with_curried(&self, positional: &[Reference], named: &[(String, Reference)]) -> CapturedArgs {
        let mut merged_positional = positional.to_vec();
        merged_positional.extend(self.positional.iter().cloned());
        let mut merged_named = named.to_vec();
        for (name, reference) in &self.named {
            match merged_named.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = reference.clone(),
                None => merged_named.push((name.clone(), reference.clone())),
            }
        }
        CapturedArgs::new(merged_positional, merged_named)
    }

    /// Reads every argument. Reads are consumed by the active tracking frame.
    pub fn evaluate(&self, revs: &Revisions) -> Result<EvaluatedArgs, UserError> {
        let positional = self.positional.iter().map(|r| r.value(revs)).collect::<Result<Vec<_>, _>>()?;
        let mut named = BTreeMap::new();
        for (name, reference) in &self.named {
            named.insert(name.clone(), reference.value(revs)?);
        }
        Ok(EvaluatedArgs { positional, named })
    }
}

/// Argument values handed to helper functions and manager hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatedArgs {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

impl EvaluatedArgs {
    pub fn positional(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or_default()
    }

    pub fn named(&self, name: &str) -> Value {
        self.named.get(name).cloned().unwrap_or_default()
    }
}
