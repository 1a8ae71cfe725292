//! Scope, stack and expression opcodes.

use super::low_level::StackValue;
use super::scope::Scope;
use super::Vm;
use crate::args::CapturedArgs;
use crate::error::{EngineError, UserError, VmError};
use crate::reference::Reference;
use crate::validator::Revisions;
use crate::values::{CurriedValue, Value};
use std::rc::Rc;
use weft_program::{CurriedKind, Instruction, OpCode, Register};

impl Vm<'_> {
    pub(super) fn expression(&mut self, ins: Instruction) -> Result<(), VmError> {
        match ins.op {
            OpCode::Primitive => {
                let value = Value::from_constant(self.program.constant(ins.op1)?);
                self.inner.push_ref(Reference::constant(value));
            }
            OpCode::PushInt => self.inner.push(StackValue::Int(i64::from(ins.op1))),
            OpCode::Pop => self.inner.pop_n(operand_count(ins.op1)?)?,
            OpCode::Dup => {
                let register = Register::from_operand(ins.op1).ok_or(EngineError::InvalidRegister(ins.op1))?;
                self.inner.dup(register, i64::from(ins.op2))?;
            }

            OpCode::RootScope => {
                let self_ref = self.inner.pop_ref()?;
                self.scopes.push(Scope::root(self_ref, operand_count(ins.op1)?));
            }
            OpCode::ChildScope => self.scopes.push_child()?,
            OpCode::PopScope => {
                self.scopes.pop()?;
            }
            OpCode::GetVariable => {
                let reference = self.scopes.current()?.get(operand_count(ins.op1)?)?;
                self.inner.push_ref(reference);
            }
            OpCode::SetVariable => {
                let reference = self.inner.pop_ref()?;
                self.scopes.current_mut()?.bind(operand_count(ins.op1)?, reference);
            }
            OpCode::GetProperty => {
                let key = self.program.string(ins.op1)?;
                let parent = self.inner.pop_ref()?;
                self.inner.push_ref(parent.child(key));
            }

            OpCode::PushArgs => self.push_args(ins)?,
            OpCode::Helper => {
                let args = self.inner.pop_args()?;
                let helper = self.env.definitions.helper(self.program.string(ins.op1)?)?;
                let revs = self.revisions();
                let reference = helper.invoke(CapturedArgs::clone(&args), &revs)?;
                self.inner.push_ref(reference);
            }
            OpCode::DynamicHelper => {
                let args = self.inner.pop_args()?;
                let callee = self.inner.pop_ref()?;
                self.inner.push_ref(dynamic_helper(callee, CapturedArgs::clone(&args)));
            }
            OpCode::Curry => {
                let kind = CurriedKind::from_operand(ins.op1)
                    .ok_or_else(|| VmError::invariant(format!("unknown curried kind {}", ins.op1)))?;
                let args = self.inner.pop_args()?;
                let definition = self.inner.pop_ref()?;
                let reference = curry(kind, definition, CapturedArgs::clone(&args), &self.revisions())?;
                self.inner.push_ref(reference);
            }
            OpCode::Resolve => {
                let kind = CurriedKind::from_operand(ins.op1)
                    .ok_or_else(|| VmError::invariant(format!("unknown curried kind {}", ins.op1)))?;
                let name = self.program.string(ins.op2)?;
                let value = self.env.definitions.resolve(kind, name).ok_or_else(|| EngineError::UnknownDefinition {
                    kind: kind_name(kind),
                    name: name.to_string(),
                })?;
                self.inner.push_ref(Reference::constant(value));
            }

            OpCode::Concat => {
                let count = operand_count(ins.op1)?;
                let mut parts = Vec::with_capacity(count);
                for _ in 0..count {
                    parts.push(self.inner.pop_ref()?);
                }
                parts.reverse();
                self.inner.push_ref(concat(parts, &self.revisions())?);
            }
            OpCode::Not => {
                let operand = self.inner.pop_ref()?;
                let reference = map_value(operand, &self.revisions(), |v| Value::Bool(!v.is_truthy()))?;
                self.inner.push_ref(reference);
            }
            OpCode::ToBoolean => {
                let operand = self.inner.pop_ref()?;
                let reference = map_value(operand, &self.revisions(), |v| Value::Bool(v.is_truthy()))?;
                self.inner.push_ref(reference);
            }
            OpCode::IfInline => {
                let falsy = self.inner.pop_ref()?;
                let truthy = self.inner.pop_ref()?;
                let condition = self.inner.pop_ref()?;
                self.inner.push_ref(if_inline(condition, truthy, falsy, &self.revisions())?);
            }
            other => return Err(VmError::invariant(format!("{} is not an expression", other.name()))),
        }
        Ok(())
    }

    /// Pops the named values, then `op2` positional values, pushed in that
    /// order by the caller.
    fn push_args(&mut self, ins: Instruction) -> Result<(), VmError> {
        let names = self.program.strings(ins.op1)?;
        let positional_count = operand_count(ins.op2)?;
        let mut named = Vec::with_capacity(names.len());
        for name in names.iter().rev() {
            named.push((name.clone(), self.inner.pop_ref()?));
        }
        named.reverse();
        let mut positional = Vec::with_capacity(positional_count);
        for _ in 0..positional_count {
            positional.push(self.inner.pop_ref()?);
        }
        positional.reverse();
        self.inner.push(StackValue::Args(Rc::new(CapturedArgs::new(positional, named))));
        Ok(())
    }
}

fn operand_count(operand: i32) -> Result<usize, EngineError> {
    usize::try_from(operand).map_err(|_| EngineError::Invariant(format!("negative operand {}", operand)))
}

fn kind_name(kind: CurriedKind) -> &'static str {
    match kind {
        CurriedKind::Component => "component",
        CurriedKind::Helper => "helper",
        CurriedKind::Modifier => "modifier",
    }
}

/// A formula applying `f` to the value of `operand`, folded to a constant
/// when the operand is constant.
fn map_value(operand: Reference, revs: &Revisions, f: impl Fn(&Value) -> Value + 'static) -> Result<Reference, UserError> {
    if operand.is_constant() {
        return Ok(Reference::constant(f(&operand.value(revs)?)));
    }
    Ok(Reference::fallible(move |revs| Ok(f(&operand.value(revs)?))))
}

fn concat(parts: Vec<Reference>, revs: &Revisions) -> Result<Reference, UserError> {
    let join = |parts: &[Reference], revs: &Revisions| -> Result<Value, UserError> {
        let mut out = String::new();
        for part in parts {
            out.push_str(&part.value(revs)?.to_text());
        }
        Ok(Value::string(&out))
    };
    if parts.iter().all(Reference::is_constant) {
        return Ok(Reference::constant(join(&parts, revs)?));
    }
    Ok(Reference::fallible(move |revs| join(&parts, revs)))
}

fn if_inline(condition: Reference, truthy: Reference, falsy: Reference, revs: &Revisions) -> Result<Reference, UserError> {
    if condition.is_constant() {
        return Ok(if condition.value(revs)?.is_truthy() { truthy } else { falsy });
    }
    Ok(Reference::fallible(move |revs| {
        if condition.value(revs)?.is_truthy() {
            truthy.value(revs)
        } else {
            falsy.value(revs)
        }
    }))
}

/// Calls whatever helper `callee` currently holds. A nullish callee yields
/// `undefined`.
fn dynamic_helper(callee: Reference, args: CapturedArgs) -> Reference {
    let label = callee.debug_label();
    let result_label = format!("({})", label);
    Reference::fallible(move |revs| match callee.value(revs)? {
        Value::Helper(helper) => helper.invoke(args.clone(), revs)?.value(revs),
        Value::Curried(curried) if curried.kind == CurriedKind::Helper => {
            let resolved = curried.resolve();
            match resolved.definition {
                Value::Helper(helper) => helper
                    .invoke(args.with_curried(&resolved.positional, &resolved.named), revs)?
                    .value(revs),
                other => Err(not_a_helper(&other, &label)),
            }
        }
        value if value.is_nullish() => Ok(Value::Undefined),
        other => Err(not_a_helper(&other, &label)),
    })
    .labeled(result_label)
}

fn not_a_helper(value: &Value, label: &str) -> UserError {
    UserError::new(format!(
        "expected a helper definition, but the value of `{}` was {}",
        label,
        value.type_name()
    ))
}

/// Binds `args` to the definition `definition` holds. A nullish definition
/// curries to `undefined`.
fn curry(kind: CurriedKind, definition: Reference, args: CapturedArgs, revs: &Revisions) -> Result<Reference, UserError> {
    let make = move |value: Value| -> Value {
        if value.is_nullish() {
            return Value::Undefined;
        }
        Value::Curried(Rc::new(CurriedValue {
            kind,
            inner: value,
            positional: args.positional.clone(),
            named: args.named.clone(),
        }))
    };
    if definition.is_constant() {
        return Ok(Reference::constant(make(definition.value(revs)?)));
    }
    Ok(Reference::fallible(move |revs| Ok(make(definition.value(revs)?))))
}
