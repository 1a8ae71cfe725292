use pretty_assertions::assert_eq;
use serde_json::json;
use weft_cli::commands::{self, CliError};
use weft_cli::config::WeftConfig;
use weft_program::{Expr, Program, ProgramBuilder};
use weft_vm::RenderMode;

fn greeting_card() -> Program {
    let mut b = ProgramBuilder::new();
    b.block("main", &[], |b| {
        b.element("p", &[], |b| b.append(&Expr::this_path("name")));
        b.if_(&Expr::this_path("admin"), |b| b.element("b", &[], |b| b.text("admin")));
    });
    b.finish().unwrap()
}

#[test]
fn render_then_update_reports_each_pass() {
    let program = greeting_card();
    let report = commands::render_program(
        &program,
        &WeftConfig::default(),
        &json!({ "name": "Ann", "admin": false }),
        &[json!({ "name": "Bo", "admin": false })],
        RenderMode::Client,
    )
    .unwrap();

    assert_eq!(report.passes.len(), 2);
    assert_eq!(report.passes[0].label, "render");
    assert_eq!(report.passes[0].html, "<p>Ann</p><!---->");
    assert_eq!(report.passes[1].label, "update 1");
    assert_eq!(report.final_html(), "<p>Bo</p><!---->");
    assert_eq!(report.passes[1].stats.text_updates, 1);
    assert_eq!(report.passes[1].stats.nodes_created(), 0);
}

#[test]
fn serialized_markup_rehydrates_without_new_nodes() {
    let program = greeting_card();
    let data = json!({ "name": "Ann", "admin": true });
    let config = WeftConfig::default();
    let serialized = commands::render_program(&program, &config, &data, &[], RenderMode::Serialize).unwrap();
    let client = commands::render_program(&program, &config, &data, &[], RenderMode::Client).unwrap();

    let report = commands::rehydrate_program(&program, &config, serialized.final_html(), &data).unwrap();
    assert_eq!(report.passes[0].label, "rehydrate");
    assert_eq!(report.final_html(), client.final_html());
    assert_eq!(report.passes[0].stats.nodes_created(), 0);
}

#[test]
fn configured_components_and_builtins_are_available() {
    let mut b = ProgramBuilder::new();
    b.block("badge", &["@label"], |b| {
        b.element("span", &[], |b| b.append(&Expr::local(1)));
    });
    b.block("main", &[], |b| {
        b.component(
            "Badge",
            &[("label".to_string(), Expr::helper("upper", vec![Expr::this_path("role")]))],
        );
    });
    let program = b.finish().unwrap();
    let config = WeftConfig::parse("[components]\nBadge = \"badge\"\n").unwrap();

    let report =
        commands::render_program(&program, &config, &json!({ "role": "editor" }), &[], RenderMode::Client).unwrap();
    assert_eq!(report.final_html(), "<span>EDITOR</span>");
}

#[test]
fn log_lines_are_collected() {
    let mut b = ProgramBuilder::new();
    b.block("main", &[], |b| b.log(&[Expr::string("items"), Expr::this_path("count")]));
    let program = b.finish().unwrap();
    let report =
        commands::render_program(&program, &WeftConfig::default(), &json!({ "count": 2 }), &[], RenderMode::Client)
            .unwrap();
    assert_eq!(report.output, vec!["items 2".to_string()]);
}

#[test]
fn instruction_budget_comes_from_config() {
    let program = greeting_card();
    let config = WeftConfig::parse("[runtime]\nmax_instructions = 3\n").unwrap();
    let err = commands::render_program(&program, &config, &json!({ "name": "x" }), &[], RenderMode::Client)
        .err()
        .unwrap();
    assert!(matches!(err, CliError::Render(ref e) if e.is_fatal()), "{}", err);
}

#[test]
fn inspect_lists_blocks() {
    let listing = commands::inspect_program(&greeting_card());
    assert!(listing.contains("main:\n"), "{}", listing);
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = std::env::temp_dir().join(format!("weft-cli-init-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = commands::init_config(&dir).unwrap();
    assert_eq!(WeftConfig::load_from(&path).unwrap(), WeftConfig::default());
    assert!(matches!(commands::init_config(&dir), Err(CliError::AlreadyExists(_))));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_files_name_the_path() {
    let err = commands::read_program(std::path::Path::new("/nonexistent/weft/program.json")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/weft/program.json"), "{}", err);
}
