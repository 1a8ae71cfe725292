//! Keyed iteration for `{{#each}}`.

use crate::error::UserError;
use crate::validator::Revisions;
use crate::values::Value;
use std::collections::HashMap;

/// How each item of a list is keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    Index,
    Identity,
    /// A dotted property path read off each item.
    Path(String),
}

impl KeySpec {
    pub fn parse(key: &str) -> Self {
        match key {
            "@index" => KeySpec::Index,
            "@identity" | "" => KeySpec::Identity,
            path => KeySpec::Path(path.to_string()),
        }
    }

    fn key_for(&self, value: &Value, index: usize, revs: &Revisions) -> Result<String, UserError> {
        match self {
            KeySpec::Index => Ok(index.to_string()),
            KeySpec::Identity => Ok(value.identity()),
            KeySpec::Path(path) => {
                let mut current = value.clone();
                for key in path.split('.').filter(|k| !k.is_empty()) {
                    current = current.get(key, revs)?;
                }
                Ok(current.identity())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub key: String,
    pub value: Value,
    pub memo: Value,
}

/// Items of an iterable value, with unique keys. `undefined`, `null` and
/// `false` iterate as empty; any other non-array is a user error.
pub fn entries(list: &Value, key: &KeySpec, revs: &Revisions) -> Result<Vec<ListEntry>, UserError> {
    let items = match list {
        Value::Array(items) => items.clone(),
        Value::Undefined | Value::Null | Value::Bool(false) => return Ok(Vec::new()),
        Value::Tracked(r) => return entries(&r.value(revs)?, key, revs),
        other => return Err(not_iterable(other)),
    };
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(items.len());
    for (index, value) in items.iter().enumerate() {
        let base = key.key_for(value, index, revs)?;
        let count = seen.entry(base.clone()).or_insert(0);
        let unique = if *count == 0 { base } else { format!("{}#{}", base, count) };
        *count += 1;
        out.push(ListEntry {
            key: unique,
            value: value.clone(),
            memo: Value::Number(index as f64),
        });
    }
    Ok(out)
}

/// Whether `list` iterates no items, without computing keys.
pub fn is_empty(list: &Value, revs: &Revisions) -> Result<bool, UserError> {
    match list {
        Value::Array(items) => Ok(items.is_empty()),
        Value::Undefined | Value::Null | Value::Bool(false) => Ok(true),
        Value::Tracked(r) => is_empty(&r.value(revs)?, revs),
        other => Err(not_iterable(other)),
    }
}

fn not_iterable(value: &Value) -> UserError {
    UserError::new(format!("{{{{#each}}}} expects an array, but received {}", value.type_name()))
}

/// Cursor over the entries of a list during an append pass.
#[derive(Debug)]
pub struct ListIterator {
    entries: std::vec::IntoIter<ListEntry>,
}

impl ListIterator {
    pub fn new(entries: Vec<ListEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }

    pub fn next_entry(&mut self) -> Option<ListEntry> {
        self.entries.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(list: &Value, key: &str) -> Vec<String> {
        entries(list, &KeySpec::parse(key), &Revisions::new())
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect()
    }

    #[test]
    fn duplicate_keys_are_disambiguated() {
        let list = Value::array(vec![Value::string("a"), Value::string("b"), Value::string("a")]);
        assert_eq!(keys(&list, "@identity"), vec!["s:a", "s:b", "s:a#1"]);
        assert_eq!(keys(&list, "@index"), vec!["0", "1", "2"]);
    }

    #[test]
    fn path_keys_read_item_properties() {
        let list = Value::from_json(&serde_json::json!([{ "id": 7 }, { "id": 9 }]));
        assert_eq!(keys(&list, "id"), vec!["n:7", "n:9"]);
    }

    #[test]
    fn falsy_values_iterate_as_empty_and_others_fail() {
        let revs = Revisions::new();
        assert!(entries(&Value::Null, &KeySpec::Index, &revs).unwrap().is_empty());
        assert!(entries(&Value::Bool(false), &KeySpec::Index, &revs).unwrap().is_empty());
        let err = entries(&Value::Number(3.0), &KeySpec::Index, &revs).unwrap_err();
        assert!(err.message.contains("number"));
    }

    #[test]
    fn memos_are_indices() {
        let list = Value::array(vec![Value::string("x"), Value::string("y")]);
        let mut iter = ListIterator::new(entries(&list, &KeySpec::Identity, &Revisions::new()).unwrap());
        assert_eq!(iter.next_entry().unwrap().memo, Value::Number(0.0));
        assert_eq!(iter.next_entry().unwrap().memo, Value::Number(1.0));
        assert!(iter.next_entry().is_none());
    }
}
