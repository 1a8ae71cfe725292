use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use weft_program::{Expr, Program, ProgramBuilder};
use weft_vm::{render, DebugEvent, Definitions, Document, Environment, Reference, RenderMode, Value};

fn list_program(key: &str) -> Program {
    let mut b = ProgramBuilder::new();
    b.block("main", &["item", "index"], |b| {
        b.element("ul", &[], |b| {
            b.each(
                &Expr::this_path("items"),
                key,
                1,
                2,
                |b| b.element("li", &[], |b| b.append(&Expr::local(1).path("name"))),
                |b| b.element("li", &[], |b| b.text("none")),
            );
        });
    });
    b.finish().unwrap()
}

fn item(id: &str, name: &str) -> Value {
    Value::object([("id", Value::string(id)), ("name", Value::string(name))])
}

fn items(pairs: &[(&str, &str)]) -> Value {
    Value::array(pairs.iter().map(|(id, name)| item(id, name)).collect())
}

fn sync_events(env: &mut Environment) -> Rc<RefCell<Vec<DebugEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    env.set_debug_callback(move |event| {
        if matches!(event, DebugEvent::ListSync { .. }) {
            sink.borrow_mut().push(event.clone());
        }
    });
    events
}

#[test]
fn keyed_lists_move_insert_and_delete_items() {
    let program = list_program("id");
    let mut env = Environment::new(Definitions::new());
    let events = sync_events(&mut env);
    let list = Reference::cell(&env.revisions, items(&[("a", "A"), ("b", "B"), ("c", "C")]));
    let this = Reference::constant(Value::object([("items", Value::Tracked(list.clone()))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>A</li><li>B</li><li>C</li></ul>");
    let ul = doc.children(root)[0];
    let original = doc.children(ul);

    list.set(&env.revisions, items(&[("c", "C"), ("a", "A"), ("b", "B"), ("d", "D")]));
    doc.reset_stats();
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>C</li><li>A</li><li>B</li><li>D</li></ul>");
    assert_eq!(
        events.borrow().last(),
        Some(&DebugEvent::ListSync {
            retained: 2,
            moved: 1,
            inserted: 1,
            deleted: 0
        })
    );
    // Existing items keep their nodes.
    let reordered = doc.children(ul);
    assert_eq!(reordered[0], original[2]);
    assert_eq!(reordered[1], original[0]);
    assert_eq!(reordered[2], original[1]);
    assert_eq!(doc.stats().text_updates, 0);

    list.set(&env.revisions, items(&[("a", "A"), ("d", "D")]));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>A</li><li>D</li></ul>");
    assert_eq!(
        events.borrow().last(),
        Some(&DebugEvent::ListSync {
            retained: 2,
            moved: 0,
            inserted: 0,
            deleted: 2
        })
    );
}

#[test]
fn retained_items_pick_up_new_values() {
    let program = list_program("id");
    let mut env = Environment::new(Definitions::new());
    let list = Reference::cell(&env.revisions, items(&[("a", "A"), ("b", "B")]));
    let this = Reference::constant(Value::object([("items", Value::Tracked(list.clone()))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();

    list.set(&env.revisions, items(&[("a", "A"), ("b", "Bee")]));
    doc.reset_stats();
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>A</li><li>Bee</li></ul>");
    assert_eq!(doc.stats().text_updates, 1);
    assert_eq!(doc.stats().nodes_created(), 0);
}

#[test]
fn emptying_a_list_switches_to_the_else_branch_and_back() {
    let program = list_program("@index");
    let mut env = Environment::new(Definitions::new());
    let list = Reference::cell(&env.revisions, Value::Null);
    let this = Reference::constant(Value::object([("items", Value::Tracked(list.clone()))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let mut result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>none</li></ul>");

    list.set(&env.revisions, items(&[("x", "X")]));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>X</li></ul>");

    list.set(&env.revisions, Value::array(Vec::new()));
    result.rerender(&program, &mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>none</li></ul>");
}

#[test]
fn duplicate_keys_are_disambiguated() {
    let program = list_program("id");
    let mut env = Environment::new(Definitions::new());
    let list = Reference::cell(&env.revisions, items(&[("a", "first"), ("a", "second")]));
    let this = Reference::constant(Value::object([("items", Value::Tracked(list.clone()))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    assert_eq!(doc.inner_html(root), "<ul><li>first</li><li>second</li></ul>");
}

#[test]
fn iterating_a_non_list_is_a_user_error() {
    let program = list_program("@identity");
    let mut env = Environment::new(Definitions::new());
    let this = Reference::constant(Value::object([("items", Value::Number(4.0))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let err = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).err().unwrap();
    assert!(!err.is_fatal(), "{}", err);
}

#[test]
fn destroying_the_render_clears_every_item() {
    let program = list_program("id");
    let mut env = Environment::new(Definitions::new());
    let this = Reference::constant(Value::object([("items", items(&[("a", "A"), ("b", "B")]))]));
    let mut doc = Document::new();
    let root = doc.create_root("div");
    let result = render(&program, &mut env, &mut doc, root, this, RenderMode::Client).unwrap();
    result.destroy(&mut env, &mut doc).unwrap();
    assert_eq!(doc.inner_html(root), "");
}
