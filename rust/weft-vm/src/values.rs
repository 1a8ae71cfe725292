//! Runtime values flowing through references.

use crate::dom::NodeId;
use crate::error::UserError;
use crate::managers::{ComponentDefinition, HelperDefinition, ModifierDefinition};
use crate::reference::Reference;
use crate::validator::Revisions;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use weft_program::{Constant, CurriedKind};

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// Markup the host trusts; appended as HTML instead of text.
    SafeString(Rc<str>),
    Node(NodeId),
    /// A detached document fragment whose children are moved on append.
    Fragment(NodeId),
    Array(Rc<Vec<Value>>),
    Object(Rc<ObjectValue>),
    /// A reactive slot inside an object; reading it consumes its tag.
    Tracked(Reference),
    Helper(Rc<HelperDefinition>),
    Modifier(Rc<ModifierDefinition>),
    Component(Rc<ComponentDefinition>),
    Curried(Rc<CurriedValue>),
}

#[derive(Debug, Default)]
pub struct ObjectValue {
    pub fields: BTreeMap<String, Value>,
}

/// A definition with some arguments already bound.
pub struct CurriedValue {
    pub kind: CurriedKind,
    pub inner: Value,
    pub positional: Vec<Reference>,
    pub named: Vec<(String, Reference)>,
}

/// The definition at the bottom of a curried chain plus the flattened args.
pub struct ResolvedCurry {
    pub definition: Value,
    pub positional: Vec<Reference>,
    pub named: Vec<(String, Reference)>,
}

impl CurriedValue {
    /// Walks nested curries outside-in. Inner positional arguments come
    /// first; for named arguments outer bindings override inner ones.
    pub fn resolve(&self) -> ResolvedCurry {
        let mut positional: Vec<Reference> = Vec::new();
        let mut named_layers: Vec<&[(String, Reference)]> = Vec::new();
        let mut current = self;
        loop {
            if !current.positional.is_empty() {
                let mut merged = current.positional.clone();
                merged.extend(positional);
                positional = merged;
            }
            named_layers.insert(0, current.named.as_slice());
            match &current.inner {
                Value::Curried(next) => current = next.as_ref(),
                definition => {
                    let mut named: Vec<(String, Reference)> = Vec::new();
                    for layer in named_layers {
                        for (k, v) in layer {
                            match named.iter_mut().find(|(existing, _)| existing == k) {
                                Some(slot) => slot.1 = v.clone(),
                                None => named.push((k.clone(), v.clone())),
                            }
                        }
                    }
                    return ResolvedCurry {
                        definition: definition.clone(),
                        positional,
                        named,
                    };
                }
            }
        }
    }
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn safe(s: &str) -> Value {
        Value::SafeString(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(items))
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Object(Rc::new(ObjectValue {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }))
    }

    pub fn from_constant(constant: &Constant) -> Value {
        match constant {
            Constant::Undefined => Value::Undefined,
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::string(s),
            Constant::Strings(items) => Value::array(items.iter().map(|s| Value::string(s)).collect()),
            Constant::Numbers(items) => Value::array(items.iter().map(|n| Value::Number(*n as f64)).collect()),
        }
    }

    /// Converts plain JSON data; objects become immutable object values.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v)))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::SafeString(_) => "safe string",
            Value::Node(_) => "node",
            Value::Fragment(_) => "fragment",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Tracked(_) => "tracked",
            Value::Helper(_) => "helper",
            Value::Modifier(_) => "modifier",
            Value::Component(_) => "component",
            Value::Curried(_) => "curried",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Values appended as text after string coercion.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
        )
    }

    /// Template truthiness: empty arrays and empty strings are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::SafeString(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// String coercion used for text content; nullish values become "".
    pub fn to_text(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) | Value::SafeString(s) => s.to_string(),
            Value::Array(items) => items.iter().map(Value::to_text).collect::<Vec<_>>().join(","),
            Value::Object(_) => "[object Object]".to_string(),
            other => format!("[{}]", other.type_name()),
        }
    }

    /// Reads `key` off this value. Tracked fields are unwrapped through their
    /// reference so the read is consumed by the active tracking frame.
    pub fn get(&self, key: &str, revs: &Revisions) -> Result<Value, UserError> {
        match self {
            Value::Object(obj) => match obj.fields.get(key) {
                Some(Value::Tracked(r)) => r.value(revs),
                Some(v) => Ok(v.clone()),
                None => Ok(Value::Undefined),
            },
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.len() as f64));
                }
                Ok(key.parse::<usize>().ok().and_then(|i| items.get(i)).cloned().unwrap_or_default())
            }
            Value::String(s) if key == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Tracked(r) => r.value(revs)?.get(key, revs),
            _ => Ok(Value::Undefined),
        }
    }

    /// Identity used for `@identity` keys and reference equality checks.
    pub fn identity(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Number(n) => format!("n:{}", format_number(*n)),
            Value::String(s) => format!("s:{}", s),
            Value::SafeString(s) => format!("h:{}", s),
            Value::Node(id) | Value::Fragment(id) => format!("node:{}", id.0),
            Value::Array(rc) => format!("@{:p}", Rc::as_ptr(rc)),
            Value::Object(rc) => format!("@{:p}", Rc::as_ptr(rc)),
            Value::Tracked(r) => format!("@{}", r.id()),
            Value::Helper(rc) => format!("@{:p}", Rc::as_ptr(rc)),
            Value::Modifier(rc) => format!("@{:p}", Rc::as_ptr(rc)),
            Value::Component(rc) => format!("@{:p}", Rc::as_ptr(rc)),
            Value::Curried(rc) => format!("@{:p}", Rc::as_ptr(rc)),
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Strict equality: primitives by value, everything else by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::SafeString(a), Value::SafeString(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) | (Value::Fragment(a), Value::Fragment(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Tracked(a), Value::Tracked(b)) => a.ptr_eq(b),
            (Value::Helper(a), Value::Helper(b)) => Rc::ptr_eq(a, b),
            (Value::Modifier(a), Value::Modifier(b)) => Rc::ptr_eq(a, b),
            (Value::Component(a), Value::Component(b)) => Rc::ptr_eq(a, b),
            (Value::Curried(a), Value::Curried(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::SafeString(s) => write!(f, "safe({:?})", s),
            Value::Node(id) => write!(f, "node({})", id.0),
            Value::Fragment(id) => write!(f, "fragment({})", id.0),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(obj) => f.debug_map().entries(obj.fields.iter()).finish(),
            Value::Helper(d) => write!(f, "helper({})", d.name),
            Value::Modifier(d) => write!(f, "modifier({})", d.name),
            Value::Component(d) => write!(f, "component({})", d.name),
            Value::Curried(c) => write!(f, "curried({:?})", c.inner),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
