use pretty_assertions::assert_eq;
use weft_program::assembler::STD_APPEND;
use weft_program::{Constant, Expr, OpCode, Program, ProgramBuilder, ProgramError};

const HAND_WRITTEN: &str = r#"{
  "version": "1",
  "instructions": [
    { "op": "Text", "op1": 0 },
    { "op": "Return" }
  ],
  "constants": [{ "String": "hi" }],
  "blocks": [{ "name": "main", "address": 0 }]
}"#;

#[test]
fn hand_written_programs_load_with_defaulted_operands() {
    let program = Program::from_json(HAND_WRITTEN).unwrap();
    assert_eq!(program.len(), 2);
    let ret = program.fetch(1).unwrap();
    assert_eq!((ret.op, ret.op1, ret.op2, ret.op3), (OpCode::Return, 0, 0, 0));
    assert_eq!(program.string(0).unwrap(), "hi");
    let main = program.block("main").unwrap();
    assert_eq!(main.scope_size(), 1);
    assert!(program.fetch(2).is_none());
    assert!(program.fetch(-1).is_none());
}

#[test]
fn unsupported_versions_are_rejected() {
    let source = HAND_WRITTEN.replace(r#""version": "1""#, r#""version": "0""#);
    assert!(matches!(
        Program::from_json(&source),
        Err(ProgramError::VersionMismatch { found, .. }) if found == "0"
    ));
    assert!(matches!(Program::from_json("{"), Err(ProgramError::Json(_))));
}

#[test]
fn constant_accessors_check_the_kind() {
    let program = Program::new(
        Vec::new(),
        vec![Constant::Number(1.0), Constant::Strings(vec!["a".into()]), Constant::Null],
        Vec::new(),
    );
    assert!(matches!(
        program.string(0),
        Err(ProgramError::ConstantKind { index: 0, expected: "string" })
    ));
    assert_eq!(program.strings(1).unwrap(), ["a".to_string()]);
    assert_eq!(program.optional_string(-1).unwrap(), None);
    assert!(program.optional_string(2).is_err());
    assert!(matches!(program.constant(7), Err(ProgramError::InvalidConstant { index: 7 })));
    assert!(matches!(program.block("main"), Err(ProgramError::UnknownBlock(_))));
}

#[test]
fn assembled_programs_survive_json() {
    let mut b = ProgramBuilder::new();
    b.block("main", &["item", "index"], |b| {
        b.each(
            &Expr::this_path("rows"),
            "id",
            1,
            2,
            |b| b.append(&Expr::local(1).path("label")),
            |b| b.text("empty"),
        );
    });
    let program = b.finish().unwrap();
    let reloaded = Program::from_json(&program.to_json().unwrap()).unwrap();
    assert_eq!(reloaded, program);
}

#[test]
fn disassembly_names_blocks_and_resolves_targets() {
    let mut b = ProgramBuilder::new();
    b.block("main", &[], |b| {
        b.if_(&Expr::this_path("ok"), |b| b.text("yes"));
        b.append(&Expr::this_path("name"));
    });
    let program = b.finish().unwrap();
    let listing = program.disassemble();
    assert!(listing.contains(&format!("{}:\n", STD_APPEND)), "{}", listing);
    assert!(listing.contains("main:\n"), "{}", listing);
    assert!(listing.contains(&format!("({})", STD_APPEND)), "{}", listing);
    assert!(listing.contains("\"yes\""), "{}", listing);
}
