//! Helpers available to every program run from the command line.

use weft_vm::{Definitions, EvaluatedArgs, UserError, Value};

pub const BUILTIN_HELPERS: &[&str] = &["concat", "eq", "html-safe", "join", "len", "lower", "not", "trim", "upper"];

pub fn install(defs: &mut Definitions) {
    defs.add_function("concat", |args| {
        Ok(Value::string(&args.positional.iter().map(Value::to_text).collect::<String>()))
    });
    defs.add_function("eq", |args| Ok(Value::Bool(args.positional(0) == args.positional(1))));
    defs.add_function("not", |args| Ok(Value::Bool(!args.positional(0).is_truthy())));
    defs.add_function("upper", |args| Ok(Value::string(&args.positional(0).to_text().to_uppercase())));
    defs.add_function("lower", |args| Ok(Value::string(&args.positional(0).to_text().to_lowercase())));
    defs.add_function("trim", |args| Ok(Value::string(args.positional(0).to_text().trim())));
    defs.add_function("html-safe", |args| Ok(Value::safe(&args.positional(0).to_text())));
    defs.add_function("join", join);
    defs.add_function("len", len);
}

fn join(args: &EvaluatedArgs) -> Result<Value, UserError> {
    let separator = match args.named("separator") {
        Value::Undefined => ", ".to_string(),
        other => other.to_text(),
    };
    match args.positional(0) {
        Value::Array(items) => Ok(Value::string(
            &items.iter().map(Value::to_text).collect::<Vec<_>>().join(&separator),
        )),
        other if other.is_nullish() => Ok(Value::string("")),
        other => Err(UserError::new(format!("join expects a list, got {}", other.type_name()))),
    }
}

fn len(args: &EvaluatedArgs) -> Result<Value, UserError> {
    match args.positional(0) {
        Value::Array(items) => Ok(Value::Number(items.len() as f64)),
        Value::String(s) | Value::SafeString(s) => Ok(Value::Number(s.chars().count() as f64)),
        other if other.is_nullish() => Ok(Value::Number(0.0)),
        other => Err(UserError::new(format!("len expects a list or string, got {}", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn positional(values: Vec<Value>) -> EvaluatedArgs {
        EvaluatedArgs {
            positional: values,
            ..Default::default()
        }
    }

    #[test]
    fn join_uses_the_separator_argument() {
        let mut args = positional(vec![Value::array(vec![Value::string("a"), Value::Number(2.0)])]);
        assert_eq!(join(&args).unwrap(), Value::string("a, 2"));
        args.named.insert("separator".into(), Value::string("/"));
        assert_eq!(join(&args).unwrap(), Value::string("a/2"));
        assert!(join(&positional(vec![Value::Bool(true)])).is_err());
    }

    #[test]
    fn len_counts_characters_and_items() {
        assert_eq!(len(&positional(vec![Value::string("héllo")])).unwrap(), Value::Number(5.0));
        assert_eq!(len(&positional(vec![Value::array(vec![Value::Null])])).unwrap(), Value::Number(1.0));
        assert_eq!(len(&positional(Vec::new())).unwrap(), Value::Number(0.0));
    }
}
