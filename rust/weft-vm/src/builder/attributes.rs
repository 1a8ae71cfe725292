//! Dynamic attributes: value normalization and URL sanitization.

use crate::dom::{Dom, NodeId};
use crate::values::Value;

const BAD_PROTOCOLS: &[&str] = &["javascript:", "vbscript:"];
const BAD_TAGS: &[&str] = &["a", "body", "link", "img", "iframe", "base", "form"];
const BAD_ATTRIBUTES: &[&str] = &["href", "src", "background", "action"];

/// String form of an attribute value, or `None` when the attribute should be
/// absent. `true` is the empty string.
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Undefined | Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(String::new()),
        Value::Helper(_) | Value::Modifier(_) | Value::Component(_) | Value::Curried(_) => None,
        other => Some(other.to_text()),
    }
}

pub fn requires_sanitization(tag: &str, attribute: &str) -> bool {
    let tag = tag.to_ascii_lowercase();
    (BAD_TAGS.contains(&tag.as_str()) && BAD_ATTRIBUTES.contains(&attribute)) || (tag == "embed" && attribute == "src")
}

/// Lower-cased scheme of `url` including the colon, ignoring the whitespace
/// and control characters browsers skip while parsing.
fn protocol_for_url(url: &str) -> Option<String> {
    let cleaned: String = url.chars().filter(|c| !c.is_whitespace() && !c.is_control()).collect();
    let colon = cleaned.find(':')?;
    let scheme = &cleaned[..colon];
    let valid = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| format!("{}:", scheme.to_ascii_lowercase()))
}

/// Prefixes dangerous URLs with `unsafe:`. `embed` sources are always
/// rewritten.
pub fn sanitize_attribute_value(tag: &str, attribute: &str, value: String) -> String {
    let tag = tag.to_ascii_lowercase();
    if BAD_TAGS.contains(&tag.as_str()) && BAD_ATTRIBUTES.contains(&attribute) {
        if let Some(protocol) = protocol_for_url(&value) {
            if BAD_PROTOCOLS.contains(&protocol.as_str()) {
                return format!("unsafe:{}", value);
            }
        }
    }
    if tag == "embed" && attribute == "src" {
        return format!("unsafe:{}", value);
    }
    value
}

/// An attribute bound to a reference on a specific element.
#[derive(Debug, Clone)]
pub struct DynamicAttribute {
    pub element: NodeId,
    pub name: String,
    pub namespace: Option<String>,
    /// Tag name when the value must be sanitized.
    sanitize_for: Option<String>,
}

impl DynamicAttribute {
    pub fn new(element: NodeId, tag: &str, name: &str, namespace: Option<&str>, trusting: bool) -> Self {
        let sanitize_for = (!trusting && namespace.is_none() && requires_sanitization(tag, name)).then(|| tag.to_string());
        Self {
            element,
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            sanitize_for,
        }
    }

    /// The string this attribute should hold for `value`.
    pub fn normalize(&self, value: &Value) -> Option<String> {
        match (&self.sanitize_for, value) {
            (Some(_), Value::SafeString(html)) => Some(html.to_string()),
            (Some(tag), other) => normalize_value(other).map(|s| sanitize_attribute_value(tag, &self.name, s)),
            (None, other) => normalize_value(other),
        }
    }

    /// Writes an already-normalized value straight to the element.
    pub fn apply(&self, dom: &mut dyn Dom, normalized: Option<&str>) {
        match normalized {
            Some(value) => dom.set_attribute(self.element, &self.name, value, self.namespace.as_deref()),
            None => dom.remove_attribute(self.element, &self.name),
        }
    }
}
