use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use weft_program::{CurriedKind, Expr, Program, ProgramBuilder};
use weft_vm::{
    render, ComponentHooks, ComponentManager, Definitions, Document, Environment, ModifierHooks, ModifierManager, Reference,
    RenderMode, RuntimeConfig, Value,
};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn recording_modifier(log: &Log) -> ModifierManager {
    let (installs, updates, destroys) = (log.clone(), log.clone(), log.clone());
    ModifierManager::Tracked(
        ModifierHooks::new(move |cx| {
            installs.borrow_mut().push(format!("install {}", cx.args.positional(0).to_text()));
            Ok(())
        })
        .on_update(move |cx| {
            updates.borrow_mut().push(format!("update {}", cx.args.positional(0).to_text()));
            Ok(())
        })
        .on_destroy(move |_| {
            destroys.borrow_mut().push("destroy".into());
            Ok(())
        }),
    )
}

fn modified_element_program(show: bool) -> Program {
    let mut b = ProgramBuilder::new();
    b.block("main", &[], |b| {
        let body = |b: &mut ProgramBuilder| {
            b.open_element("div");
            b.modifier("track", &[Expr::this_path("color")], &[]);
            b.flush_element();
            b.close_element();
        };
        if show {
            b.if_(&Expr::this_path("show"), body);
        } else {
            body(b);
        }
    });
    b.finish().unwrap()
}

#[test]
fn modifiers_install_update_and_destroy() {
    let log = new_log();
    let mut defs = Definitions::new();
    defs.add_modifier("track", recording_modifier(&log));
    let program = modified_element_program(true);
    let mut env = Environment::new(defs);
    let color = Reference::cell(&env.revisions, Value::string("red"));
    let show = Reference::cell(&env.revisions, Value::Bool(true));
    let this = Reference::constant(Value::object([
        ("color", Value::Tracked(color.clone())),
        ("show", Value::Tracked(show.clone())),
    ]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(*log.borrow(), vec!["install red"]);

    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(log.borrow().len(), 1);

    color.set(&env.revisions, Value::string("blue"));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(*log.borrow(), vec!["install red", "update blue"]);

    show.set(&env.revisions, Value::Bool(false));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(*log.borrow(), vec!["install red", "update blue", "destroy"]);
    assert_eq!(doc.inner_html(root), "<!---->");
}

#[test]
fn non_interactive_renders_skip_modifiers() {
    let log = new_log();
    let mut defs = Definitions::new();
    defs.add_modifier("track", recording_modifier(&log));
    let program = modified_element_program(false);
    let config = RuntimeConfig {
        interactive: false,
        ..Default::default()
    };
    let mut env = Environment::with_config(defs, config);
    let this = Reference::constant(Value::object([("color", Value::string("red"))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(doc.inner_html(root), "<div></div>");
}

#[test]
fn dynamic_modifiers_swap_instances_when_the_definition_changes() {
    let first = new_log();
    let second = new_log();
    let mut defs = Definitions::new();
    let one = defs.add_modifier("one", recording_modifier(&first));
    let two = defs.add_modifier("two", recording_modifier(&second));
    let mut b = ProgramBuilder::new();
    b.block("main", &[], |b| {
        b.open_element("div");
        b.dynamic_modifier(&Expr::this_path("modifier"), &[Expr::string("x")], &[]);
        b.flush_element();
        b.close_element();
    });
    let program = b.finish().unwrap();
    let mut env = Environment::new(defs);
    let current = Reference::cell(&env.revisions, Value::Modifier(one));
    let this = Reference::constant(Value::object([("modifier", Value::Tracked(current.clone()))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(*first.borrow(), vec!["install x"]);

    current.set(&env.revisions, Value::Modifier(two));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(*first.borrow(), vec!["install x", "destroy"]);
    assert_eq!(*second.borrow(), vec!["install x"]);

    current.set(&env.revisions, Value::Null);
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(*second.borrow(), vec!["install x", "destroy"]);
}

fn greeting_program() -> Program {
    let mut b = ProgramBuilder::new();
    b.block("greeting", &["@name"], |b| {
        b.element("p", &[], |b| {
            b.append(&Expr::This.path("salutation"));
            b.text(" ");
            b.append(&Expr::local(1));
        });
    });
    b.block("main", &[], |b| {
        b.if_(&Expr::this_path("show"), |b| {
            b.component("Greeting", &[("name".to_string(), Expr::this_path("name"))]);
        });
    });
    b.finish().unwrap()
}

#[test]
fn components_render_their_layout_and_run_lifecycle_hooks() {
    let log = new_log();
    let (created, destroyed) = (log.clone(), log.clone());
    let mut defs = Definitions::new();
    defs.add_component(
        "Greeting",
        "greeting",
        ComponentManager::Stateful(
            ComponentHooks::new(|args| {
                assert_eq!(args.named("name"), Value::string("Ann"));
                Ok(Value::object([("salutation", Value::string("Hello"))]))
            })
            .on_did_create(move |_| {
                created.borrow_mut().push("did_create".into());
                Ok(())
            })
            .on_destroy(move |_| {
                destroyed.borrow_mut().push("destroy".into());
                Ok(())
            }),
        ),
    );
    let program = greeting_program();
    let mut env = Environment::new(defs);
    let name = Reference::cell(&env.revisions, Value::string("Ann"));
    let show = Reference::cell(&env.revisions, Value::Bool(true));
    let this = Reference::constant(Value::object([
        ("name", Value::Tracked(name.clone())),
        ("show", Value::Tracked(show.clone())),
    ]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(doc.inner_html(root), "<p>Hello Ann</p>");
    assert_eq!(*log.borrow(), vec!["did_create"]);

    // Named arguments stay live inside the layout.
    name.set(&env.revisions, Value::string("Bo"));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "<p>Hello Bo</p>");
    assert_eq!(log.borrow().len(), 1);

    show.set(&env.revisions, Value::Bool(false));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(*log.borrow(), vec!["did_create", "destroy"]);
    assert_eq!(doc.inner_html(root), "<!---->");
}

#[test]
fn template_only_components_have_no_this() {
    let mut defs = Definitions::new();
    defs.add_component("Greeting", "greeting", ComponentManager::TemplateOnly);
    let program = greeting_program();
    let mut env = Environment::new(defs);
    let this = Reference::constant(Value::object([("name", Value::string("Ann")), ("show", Value::Bool(true))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(doc.inner_html(root), "<p> Ann</p>");
    result.destroy(&mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "");
}

#[test]
fn curried_components_and_nullish_definitions() {
    let mut defs = Definitions::new();
    defs.add_component("Greeting", "greeting", ComponentManager::TemplateOnly);
    let mut b = ProgramBuilder::new();
    b.block("greeting", &["@name"], |b| b.append(&Expr::local(1)));
    b.block("main", &[], |b| {
        let curried = Expr::Curry {
            kind: CurriedKind::Component,
            definition: Box::new(Expr::Resolve(CurriedKind::Component, "Greeting".into())),
            positional: Vec::new(),
            named: vec![("name".into(), Expr::string("curried"))],
        };
        b.invoke_component(&curried, &[], &[]);
        b.invoke_component(&Expr::this_path("missing"), &[], &[]);
    });
    let program = b.finish().unwrap();
    let mut env = Environment::new(defs);
    let mut doc = Document::new();
    let root = doc.create_root("div");
    render(&program, &mut env, &mut doc, root, Reference::constant(Value::object([("x", Value::Null)])), RenderMode::Client)
        .unwrap();
    assert_eq!(doc.inner_html(root), "curried<!---->");
}

#[test]
fn appending_a_non_component_object_as_a_component_fails() {
    let mut b = ProgramBuilder::new();
    b.block("main", &[], |b| b.invoke_component(&Expr::string("nope"), &[], &[]));
    let program = b.finish().unwrap();
    let mut env = Environment::new(Definitions::new());
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let err = render(&program, &mut env, &mut doc, root, Reference::undefined(), RenderMode::Client)
        .err()
        .unwrap();
    assert!(err.to_string().contains("expected a component definition"), "{}", err);
}
