use pretty_assertions::assert_eq;
use weft_program::{Expr, Program, ProgramBuilder};
use weft_vm::{render, Definitions, Document, Environment, Reference, RenderMode, RuntimeConfig, Value};

fn page() -> Program {
    let mut b = ProgramBuilder::new();
    b.block("main", &["item", "index"], |b| {
        b.open_element("article");
        b.dynamic_attr("title", &Expr::this_path("title"), false);
        b.flush_element();
        b.element("h1", &[], |b| b.append(&Expr::this_path("title")));
        b.if_else(
            &Expr::this_path("signed_in"),
            |b| b.element("p", &[], |b| b.text("Welcome back")),
            |b| b.element("a", &[("href", "/login")], |b| b.text("Sign in")),
        );
        b.element("ul", &[], |b| {
            b.each(
                &Expr::this_path("tags"),
                "@identity",
                1,
                2,
                |b| b.element("li", &[], |b| b.append(&Expr::local(1))),
                |_| {},
            );
        });
        b.append_trusting(&Expr::this_path("footer"));
        b.close_element();
    });
    b.finish().unwrap()
}

fn state(env: &Environment, signed_in: bool) -> (Reference, Reference) {
    let title = Reference::cell(&env.revisions, Value::string("News"));
    let this = Reference::constant(Value::object([
        ("title", Value::Tracked(title.clone())),
        ("signed_in", Value::Bool(signed_in)),
        ("tags", Value::array(vec![Value::string("rust"), Value::string("vm")])),
        ("footer", Value::string("<small>fin</small>")),
    ]));
    (this, title)
}

fn serialized(program: &Program, signed_in: bool) -> String {
    let config = RuntimeConfig {
        interactive: false,
        ..Default::default()
    };
    let mut env = Environment::with_config(Definitions::new(), config);
    let (this, _) = state(&env, signed_in);
    let mut doc = Document::new();
    let root = doc.create_root("div");
    render(program, &mut env, &mut doc, root, this, RenderMode::Serialize).unwrap();
    doc.inner_html(root)
}

fn client(program: &Program, signed_in: bool) -> String {
    let mut env = Environment::new(Definitions::new());
    let (this, _) = state(&env, signed_in);
    let mut doc = Document::new();
    let root = doc.create_root("div");
    render(program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    doc.inner_html(root)
}

#[test]
fn serialized_output_carries_block_markers() {
    let html = serialized(&page(), true);
    assert!(html.starts_with("<!--%+b:0%-->"), "{}", html);
    assert!(html.ends_with("<!--%-b:0%-->"), "{}", html);
    assert!(html.contains("<!--%glmr%--><small>fin</small><!--%glmr%-->"), "{}", html);
}

#[test]
fn rehydration_adopts_every_node() {
    let program = page();
    let html = serialized(&program, true);

    let mut env = Environment::new(Definitions::new());
    let (this, title) = state(&env, true);
    let mut doc = Document::new();
    let root = doc.create_root("div");
    doc.set_inner_html(root, &html).unwrap();
    doc.reset_stats();
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Rehydrate).unwrap();
    assert_eq!(doc.stats().nodes_created(), 0);
    assert_eq!(doc.inner_html(root), client(&program, true));

    // The adopted tree is live.
    title.set(&env.revisions, Value::string("Updates"));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert!(doc.inner_html(root).starts_with(r#"<article title="Updates"><h1>Updates</h1>"#));
}

#[test]
fn mismatched_markup_is_repaired() {
    let program = page();
    let html = serialized(&program, false);

    let mut env = Environment::new(Definitions::new());
    let (this, _) = state(&env, true);
    let mut doc = Document::new();
    let root = doc.create_root("div");
    doc.set_inner_html(root, &html).unwrap();
    render(&program, &mut env, &mut doc, root, this, RenderMode::Rehydrate).unwrap();
    assert_eq!(doc.inner_html(root), client(&program, true));
}
