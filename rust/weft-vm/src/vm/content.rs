//! Content, element and attribute opcodes.

use super::update::{snapshot, AssertKind, AssertOpcode, AttributeOpcode, DynamicModifierOpcode, ModifierOpcode, TextOpcode, UpdatingOpcode};
use super::Vm;
use crate::builder::attributes::normalize_value;
use crate::builder::InsertBefore;
use crate::environment::Destructor;
use crate::error::{EngineError, UserError, VmError};
use crate::managers::{ElementModifier, ModifierInstance};
use crate::reference::Reference;
use crate::values::Value;
use std::collections::HashMap;
use weft_program::{ContentType, CurriedKind, Instruction, OpCode};

/// How an appended value is rendered.
pub fn content_type(value: &Value) -> ContentType {
    match value {
        Value::Component(_) => ContentType::Component,
        Value::Helper(_) => ContentType::Helper,
        Value::Curried(curried) => match curried.kind {
            CurriedKind::Component => ContentType::Component,
            CurriedKind::Helper => ContentType::Helper,
            CurriedKind::Modifier => ContentType::String,
        },
        Value::SafeString(_) => ContentType::SafeString,
        Value::Fragment(_) => ContentType::Fragment,
        Value::Node(_) => ContentType::Node,
        _ => ContentType::String,
    }
}

#[derive(Debug, Clone)]
enum AttributeValue {
    Static(String),
    Dynamic { reference: Reference, trusting: bool },
}

#[derive(Debug, Clone)]
struct PendingAttribute {
    name: String,
    value: AttributeValue,
    namespace: Option<String>,
}

/// Attributes and modifiers buffered between `OpenElement` and
/// `FlushElement`.
#[derive(Debug, Default)]
pub struct ElementOperations {
    attributes: Vec<PendingAttribute>,
    modifiers: Vec<ElementModifier>,
}

impl Vm<'_> {
    pub(super) fn content(&mut self, ins: Instruction) -> Result<(), VmError> {
        match ins.op {
            OpCode::ContentType => {
                let reference = self.inner.peek_ref()?;
                let value = reference.value(&self.revisions())?;
                self.inner.push(super::low_level::StackValue::Int(content_type(&value) as i64));
                self.assert(reference, AssertKind::ContentType)?;
            }
            OpCode::DynamicContentType => {
                let reference = self.inner.peek_ref()?;
                let value = reference.value(&self.revisions())?;
                let ty = match content_type(&value) {
                    ContentType::Component => ContentType::Component,
                    ContentType::Helper => ContentType::Helper,
                    _ if value.is_primitive() => ContentType::String,
                    _ => {
                        return Err(UserError::new(format!(
                            "Attempted use a dynamic value as a component or helper, but that value was not a valid component or helper ({})",
                            value.type_name()
                        ))
                        .at(reference.debug_label())
                        .into())
                    }
                };
                self.inner.push(super::low_level::StackValue::Int(ty as i64));
                self.assert(reference, AssertKind::ContentType)?;
            }
            OpCode::AppendText => {
                let reference = self.inner.pop_ref()?;
                let revs = self.revisions();
                let text = reference.value(&revs)?.to_text();
                let node = self.builder.append_dynamic_text(self.dom, &text)?;
                if !reference.is_constant() {
                    let last_revision = snapshot(&reference, &revs);
                    self.register(UpdatingOpcode::Text(TextOpcode {
                        node,
                        reference,
                        last_value: text,
                        last_revision,
                    }))?;
                }
            }
            OpCode::AppendHtml => {
                let reference = self.inner.pop_ref()?;
                let html = reference.value(&self.revisions())?.to_text();
                self.builder.append_dynamic_html(self.dom, &html)?;
            }
            OpCode::AppendSafeHtml => {
                let reference = self.inner.pop_ref()?;
                match reference.value(&self.revisions())? {
                    Value::SafeString(html) => {
                        self.builder.append_dynamic_html(self.dom, &html)?;
                    }
                    other => return Err(misclassified("safe string", &other)),
                }
            }
            OpCode::AppendNode => {
                let reference = self.inner.pop_ref()?;
                match reference.value(&self.revisions())? {
                    Value::Node(node) => {
                        self.builder.append_dynamic_node(self.dom, node)?;
                    }
                    other => return Err(misclassified("node", &other)),
                }
            }
            OpCode::AppendFragment => {
                let reference = self.inner.pop_ref()?;
                match reference.value(&self.revisions())? {
                    Value::Fragment(fragment) => {
                        self.builder.append_dynamic_fragment(self.dom, fragment)?;
                    }
                    other => return Err(misclassified("fragment", &other)),
                }
            }
            OpCode::Text => {
                let text = self.program.string(ins.op1)?;
                self.builder.append_text(self.dom, text)?;
            }
            OpCode::Comment => {
                let text = self.program.string(ins.op1)?;
                self.builder.append_comment(self.dom, text)?;
            }

            OpCode::OpenElement => {
                let tag = self.program.string(ins.op1)?;
                self.builder.open_element(self.dom, tag)?;
                self.element_ops = Some(ElementOperations::default());
            }
            OpCode::OpenDynamicElement => {
                let reference = self.inner.pop_ref()?;
                let tag = reference.value(&self.revisions())?.to_text();
                if tag.is_empty() {
                    return Err(UserError::new("a dynamic element needs a tag name").at(reference.debug_label()).into());
                }
                self.builder.open_element(self.dom, &tag)?;
                self.element_ops = Some(ElementOperations::default());
            }
            OpCode::StaticAttr => {
                let attribute = PendingAttribute {
                    name: self.program.string(ins.op1)?.to_string(),
                    value: AttributeValue::Static(self.program.string(ins.op2)?.to_string()),
                    namespace: self.program.optional_string(ins.op3)?.map(str::to_string),
                };
                self.element_ops()?.attributes.push(attribute);
            }
            OpCode::DynamicAttr => {
                let reference = self.inner.pop_ref()?;
                let attribute = PendingAttribute {
                    name: self.program.string(ins.op1)?.to_string(),
                    value: AttributeValue::Dynamic {
                        reference,
                        trusting: ins.op2 != 0,
                    },
                    namespace: self.program.optional_string(ins.op3)?.map(str::to_string),
                };
                self.element_ops()?.attributes.push(attribute);
            }
            OpCode::Modifier => {
                let args = self.inner.pop_args()?;
                if self.env.is_interactive() {
                    let definition = self.env.definitions.modifier(self.program.string(ins.op1)?)?;
                    let element = self.builder.constructing()?;
                    let instance = ModifierInstance::create(definition, element, (*args).clone(), &self.revisions());
                    self.element_ops()?.modifiers.push(ElementModifier::Static(instance));
                }
            }
            OpCode::DynamicModifier => {
                let args = self.inner.pop_args()?;
                let reference = self.inner.pop_ref()?;
                if self.env.is_interactive() {
                    let revs = self.revisions();
                    let element = self.builder.constructing()?;
                    let value = reference.value(&revs)?;
                    let instance = ModifierInstance::from_value(&value, &reference.debug_label(), element, &args, &revs)?;
                    self.element_ops()?.modifiers.push(ElementModifier::Dynamic {
                        reference,
                        args: (*args).clone(),
                        instance,
                    });
                }
            }
            OpCode::FlushElement => self.flush_element()?,
            OpCode::CloseElement => self.close_element()?,

            OpCode::PushRemoteElement => self.push_remote_element()?,
            OpCode::PopRemoteElement => {
                let block = self.builder.pop_remote_element(self.dom)?;
                self.add_destructor(Destructor::RemoteBlock(block))?;
            }
            other => return Err(VmError::invariant(format!("unhandled opcode {}", other.name()))),
        }
        Ok(())
    }

    fn element_ops(&mut self) -> Result<&mut ElementOperations, EngineError> {
        self.element_ops.as_mut().ok_or(EngineError::Missing("element under construction"))
    }

    /// Registers an assertion on `reference` unless it is constant.
    pub(super) fn assert(&mut self, reference: Reference, kind: AssertKind) -> Result<(), VmError> {
        if reference.is_constant() {
            return Ok(());
        }
        let op = AssertOpcode::new(reference, kind, &self.revisions())?;
        self.register(UpdatingOpcode::Assert(op))?;
        Ok(())
    }

    /// Writes the buffered attributes, one per name. The last write for a
    /// name wins, except that `class` values are joined with spaces.
    fn flush_element(&mut self) -> Result<(), VmError> {
        let ops = self.element_ops.take().ok_or(EngineError::Missing("element under construction"))?;
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<PendingAttribute>> = HashMap::new();
        for attribute in ops.attributes {
            if !groups.contains_key(&attribute.name) {
                order.push(attribute.name.clone());
            }
            groups.entry(attribute.name.clone()).or_default().push(attribute);
        }
        for name in order {
            let mut group = groups.remove(&name).unwrap_or_default();
            let attribute = if name == "class" && group.len() > 1 {
                merge_class(group)
            } else {
                match group.pop() {
                    Some(attribute) => attribute,
                    None => continue,
                }
            };
            self.write_attribute(attribute)?;
        }
        self.builder.flush_element(self.dom, ops.modifiers)?;
        Ok(())
    }

    fn write_attribute(&mut self, attribute: PendingAttribute) -> Result<(), VmError> {
        let namespace = attribute.namespace.as_deref();
        match attribute.value {
            AttributeValue::Static(value) => {
                self.builder.set_static_attribute(self.dom, &attribute.name, &value, namespace)?;
            }
            AttributeValue::Dynamic { reference, trusting } => {
                let revs = self.revisions();
                let trusting = trusting || self.env.config.trusting_urls;
                let value = reference.value(&revs)?;
                let (handle, last) = self.builder.set_dynamic_attribute(self.dom, &attribute.name, &value, trusting, namespace)?;
                if !reference.is_constant() {
                    let last_revision = snapshot(&reference, &revs);
                    self.register(UpdatingOpcode::Attribute(AttributeOpcode {
                        attribute: handle,
                        reference,
                        last,
                        last_revision,
                    }))?;
                }
            }
        }
        Ok(())
    }

    /// Closes the current element and schedules its modifiers.
    fn close_element(&mut self) -> Result<(), VmError> {
        let element = self.builder.element()?;
        let modifiers = self.builder.close_element(self.dom)?;
        let revs = self.revisions();
        for modifier in modifiers {
            match modifier {
                ElementModifier::Dynamic {
                    reference,
                    args,
                    instance,
                } if !reference.is_constant() => {
                    if let Some(instance) = &instance {
                        self.env.schedule_install_modifier(instance.clone())?;
                    }
                    let op = DynamicModifierOpcode::new(element, reference, args, instance, &revs)?;
                    self.register(UpdatingOpcode::DynamicModifier(op))?;
                }
                other => {
                    let Some(instance) = other.instance().cloned() else {
                        continue;
                    };
                    self.env.schedule_install_modifier(instance.clone())?;
                    self.add_destructor(Destructor::Modifier(instance.clone()))?;
                    if instance.tag().is_some() {
                        self.register(UpdatingOpcode::Modifier(ModifierOpcode::new(instance, &revs)))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pops destination, `insertBefore` and guid, in that order, and opens
    /// a remote block inside the destination.
    fn push_remote_element(&mut self) -> Result<(), VmError> {
        let revs = self.revisions();
        let destination = self.inner.pop_ref()?;
        let insert_before = self.inner.pop_ref()?;
        let guid = self.inner.pop_ref()?.value(&revs)?.to_text();

        let element = match destination.value(&revs)? {
            Value::Node(node) => node,
            other => {
                return Err(UserError::new(format!("in-element needs a destination element, but received {}", other.type_name()))
                    .at(destination.debug_label())
                    .into())
            }
        };
        let position = match insert_before.value(&revs)? {
            Value::Undefined => InsertBefore::Replace,
            Value::Null => InsertBefore::Append,
            Value::Node(node) => InsertBefore::Before(node),
            other => {
                return Err(UserError::new(format!("insertBefore must be null, undefined or a node, but received {}", other.type_name()))
                    .at(insert_before.debug_label())
                    .into())
            }
        };
        self.assert(destination, AssertKind::Identity)?;
        self.assert(insert_before, AssertKind::Identity)?;
        self.builder.push_remote_element(self.dom, element, &guid, position)?;
        Ok(())
    }
}

/// These appends only run after a content-type dispatch, so a mismatch is
/// an engine fault.
fn misclassified(expected: &'static str, found: &Value) -> VmError {
    EngineError::UnexpectedStackValue {
        expected,
        found: found.type_name(),
    }
    .into()
}

/// Folds several `class` writes into one. Static parts join directly;
/// otherwise a formula joins the normalized, non-empty parts.
fn merge_class(group: Vec<PendingAttribute>) -> PendingAttribute {
    let namespace = group.last().and_then(|a| a.namespace.clone());
    let all_static = group.iter().all(|a| matches!(a.value, AttributeValue::Static(_)));
    if all_static {
        let joined = group
            .into_iter()
            .filter_map(|a| match a.value {
                AttributeValue::Static(v) if !v.is_empty() => Some(v),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        return PendingAttribute {
            name: "class".into(),
            value: AttributeValue::Static(joined),
            namespace,
        };
    }
    let parts: Vec<Reference> = group
        .into_iter()
        .map(|a| match a.value {
            AttributeValue::Static(v) => Reference::constant(Value::string(&v)),
            AttributeValue::Dynamic { reference, .. } => reference,
        })
        .collect();
    let joined = Reference::fallible(move |revs| {
        let mut out: Vec<String> = Vec::new();
        for part in &parts {
            if let Some(text) = normalize_value(&part.value(revs)?) {
                if !text.is_empty() {
                    out.push(text);
                }
            }
        }
        Ok(if out.is_empty() { Value::Null } else { Value::string(&out.join(" ")) })
    })
    .labeled("class");
    PendingAttribute {
        name: "class".into(),
        value: AttributeValue::Dynamic {
            reference: joined,
            trusting: false,
        },
        namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Revisions;

    fn attr(value: AttributeValue) -> PendingAttribute {
        PendingAttribute {
            name: "class".into(),
            value,
            namespace: None,
        }
    }

    #[test]
    fn content_types_follow_the_value_kind() {
        assert_eq!(content_type(&Value::string("x")), ContentType::String);
        assert_eq!(content_type(&Value::Null), ContentType::String);
        assert_eq!(content_type(&Value::safe("<b>")), ContentType::SafeString);
        assert_eq!(content_type(&Value::Node(crate::dom::NodeId(3))), ContentType::Node);
    }

    #[test]
    fn static_classes_join_with_spaces() {
        let merged = merge_class(vec![
            attr(AttributeValue::Static("a".into())),
            attr(AttributeValue::Static(String::new())),
            attr(AttributeValue::Static("b".into())),
        ]);
        assert!(matches!(merged.value, AttributeValue::Static(ref v) if v == "a b"));
    }

    #[test]
    fn dynamic_classes_join_their_current_values() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::string("active"));
        let merged = merge_class(vec![
            attr(AttributeValue::Static("btn".into())),
            attr(AttributeValue::Dynamic {
                reference: cell.clone(),
                trusting: false,
            }),
        ]);
        let AttributeValue::Dynamic { reference, .. } = merged.value else {
            panic!("expected a dynamic class");
        };
        assert_eq!(reference.value(&revs).unwrap(), Value::string("btn active"));
        cell.set(&revs, Value::Bool(false));
        assert_eq!(reference.value(&revs).unwrap(), Value::string("btn"));
    }
}
