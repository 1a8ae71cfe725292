//! Helper, modifier and component managers, and the registry that names them.
//!
//! Managers are how host code plugs behavior into a render. Each definition
//! pairs a name with a manager; instances created from a definition carry the
//! per-invocation state the manager hooks operate on.

use crate::args::{CapturedArgs, EvaluatedArgs};
use crate::dom::{Dom, NodeId};
use crate::error::{EngineError, UserError};
use crate::reference::Reference;
use crate::validator::{Revisions, Tag};
use crate::values::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use weft_program::CurriedKind;

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

pub type HelperFn = dyn Fn(&EvaluatedArgs) -> Result<Value, UserError>;
pub type ReactiveHelperFn = dyn Fn(&Revisions, &CapturedArgs) -> Result<Reference, UserError>;

#[derive(Clone)]
pub enum HelperManager {
    /// Receives evaluated arguments; the result is a formula over them.
    Function(Rc<HelperFn>),
    /// Receives the argument references and returns its own reference.
    Reactive(Rc<ReactiveHelperFn>),
}

pub struct HelperDefinition {
    pub name: String,
    pub manager: HelperManager,
}

impl HelperDefinition {
    pub fn invoke(&self, args: CapturedArgs, revs: &Revisions) -> Result<Reference, UserError> {
        match &self.manager {
            HelperManager::Function(f) => {
                let f = f.clone();
                Ok(Reference::fallible(move |revs| {
                    let evaluated = args.evaluate(revs)?;
                    f(&evaluated)
                })
                .labeled(format!("({})", self.name)))
            }
            HelperManager::Reactive(f) => f(revs, &args),
        }
    }
}

// ----------------------------------------------------------------------
// Modifiers
// ----------------------------------------------------------------------

/// What a modifier hook sees: the element, its arguments and its own state.
pub struct ModifierContext<'a> {
    pub dom: &'a mut dyn Dom,
    pub element: NodeId,
    pub args: &'a EvaluatedArgs,
    pub state: &'a mut Value,
}

pub type ModifierHook = dyn Fn(&mut ModifierContext<'_>) -> Result<(), UserError>;

#[derive(Clone)]
pub struct ModifierHooks {
    pub install: Rc<ModifierHook>,
    pub update: Option<Rc<ModifierHook>>,
    pub destroy: Option<Rc<ModifierHook>>,
}

impl ModifierHooks {
    pub fn new(install: impl Fn(&mut ModifierContext<'_>) -> Result<(), UserError> + 'static) -> Self {
        Self {
            install: Rc::new(install),
            update: None,
            destroy: None,
        }
    }

    pub fn on_update(mut self, hook: impl Fn(&mut ModifierContext<'_>) -> Result<(), UserError> + 'static) -> Self {
        self.update = Some(Rc::new(hook));
        self
    }

    pub fn on_destroy(mut self, hook: impl Fn(&mut ModifierContext<'_>) -> Result<(), UserError> + 'static) -> Self {
        self.destroy = Some(Rc::new(hook));
        self
    }
}

#[derive(Clone)]
pub enum ModifierManager {
    /// Argument reads during install and update are tracked; the modifier
    /// updates when any of them changes.
    Tracked(ModifierHooks),
    /// Installed once and never updated.
    Static(ModifierHooks),
}

impl ModifierManager {
    fn hooks(&self) -> &ModifierHooks {
        match self {
            ModifierManager::Tracked(h) | ModifierManager::Static(h) => h,
        }
    }
}

pub struct ModifierDefinition {
    pub name: String,
    pub manager: ModifierManager,
}

struct ModifierState {
    definition: Rc<ModifierDefinition>,
    element: NodeId,
    args: CapturedArgs,
    tag: Option<Tag>,
    state: RefCell<Value>,
    destroyed: Cell<bool>,
}

/// One modifier attached to one element.
#[derive(Clone)]
pub struct ModifierInstance(Rc<ModifierState>);

impl fmt::Debug for ModifierInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModifierInstance({} on {:?})", self.0.definition.name, self.0.element)
    }
}

impl ModifierInstance {
    pub fn create(definition: Rc<ModifierDefinition>, element: NodeId, args: CapturedArgs, revs: &Revisions) -> Self {
        let tag = match definition.manager {
            ModifierManager::Tracked(_) => Some(revs.create_updatable_tag()),
            ModifierManager::Static(_) => None,
        };
        ModifierInstance(Rc::new(ModifierState {
            definition,
            element,
            args,
            tag,
            state: RefCell::new(Value::Undefined),
            destroyed: Cell::new(false),
        }))
    }

    /// Resolves a dynamic modifier value into an instance. Nullish values
    /// mean no modifier.
    pub fn from_value(
        value: &Value,
        label: &str,
        element: NodeId,
        args: &CapturedArgs,
        revs: &Revisions,
    ) -> Result<Option<Self>, UserError> {
        match value {
            Value::Undefined | Value::Null => Ok(None),
            Value::Modifier(definition) => Ok(Some(Self::create(definition.clone(), element, args.clone(), revs))),
            Value::Curried(curried) if curried.kind == CurriedKind::Modifier => {
                let resolved = curried.resolve();
                match resolved.definition {
                    Value::Modifier(definition) => {
                        let merged = args.with_curried(&resolved.positional, &resolved.named);
                        Ok(Some(Self::create(definition, element, merged, revs)))
                    }
                    other => Err(not_a_modifier(&other, label)),
                }
            }
            other => Err(not_a_modifier(other, label)),
        }
    }

    pub fn name(&self) -> &str {
        &self.0.definition.name
    }

    pub fn element(&self) -> NodeId {
        self.0.element
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.0.tag.as_ref()
    }

    pub fn ptr_eq(&self, other: &ModifierInstance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn install(&self, dom: &mut dyn Dom, revs: &Revisions) -> Result<(), UserError> {
        let hook = self.0.definition.manager.hooks().install.clone();
        self.run_tracked(dom, revs, &hook)
    }

    pub fn update(&self, dom: &mut dyn Dom, revs: &Revisions) -> Result<(), UserError> {
        match self.0.definition.manager.hooks().update.clone() {
            Some(hook) => self.run_tracked(dom, revs, &hook),
            None => Ok(()),
        }
    }

    /// Runs the destroy hook at most once.
    pub fn destroy(&self, dom: &mut dyn Dom, revs: &Revisions) -> Result<(), UserError> {
        if self.0.destroyed.replace(true) {
            return Ok(());
        }
        match self.0.definition.manager.hooks().destroy.clone() {
            Some(hook) => revs.untrack(|| self.run(dom, revs, &hook)),
            None => Ok(()),
        }
    }

    fn run_tracked(&self, dom: &mut dyn Dom, revs: &Revisions, hook: &Rc<ModifierHook>) -> Result<(), UserError> {
        if self.is_destroyed() {
            return Ok(());
        }
        match &self.0.tag {
            Some(tag) => {
                let (result, consumed) = revs.track(|| self.run(dom, revs, hook));
                revs.update_tag(tag, consumed);
                result
            }
            None => revs.untrack(|| self.run(dom, revs, hook)),
        }
    }

    fn run(&self, dom: &mut dyn Dom, revs: &Revisions, hook: &Rc<ModifierHook>) -> Result<(), UserError> {
        let args = self.0.args.evaluate(revs)?;
        let mut state = self.0.state.borrow_mut();
        hook(&mut ModifierContext {
            dom,
            element: self.0.element,
            args: &args,
            state: &mut state,
        })
    }
}

/// A modifier buffered on an element until the element closes.
#[derive(Debug, Clone)]
pub enum ElementModifier {
    /// Named statically in the template.
    Static(ModifierInstance),
    /// Chosen by a reference; re-resolved whenever the reference changes.
    Dynamic {
        reference: Reference,
        args: CapturedArgs,
        instance: Option<ModifierInstance>,
    },
}

impl ElementModifier {
    pub fn instance(&self) -> Option<&ModifierInstance> {
        match self {
            ElementModifier::Static(instance) => Some(instance),
            ElementModifier::Dynamic { instance, .. } => instance.as_ref(),
        }
    }
}

fn not_a_modifier(value: &Value, label: &str) -> UserError {
    UserError::new(format!(
        "expected a modifier definition, but the value of `{}` was {}",
        label,
        value.type_name()
    ))
    .at(label)
}

// ----------------------------------------------------------------------
// Components
// ----------------------------------------------------------------------

pub type CreateHook = dyn Fn(&EvaluatedArgs) -> Result<Value, UserError>;
pub type LifecycleHook = dyn Fn(&Value) -> Result<(), UserError>;

#[derive(Clone)]
pub struct ComponentHooks {
    pub create: Rc<CreateHook>,
    pub did_create: Option<Rc<LifecycleHook>>,
    pub destroy: Option<Rc<LifecycleHook>>,
}

impl ComponentHooks {
    pub fn new(create: impl Fn(&EvaluatedArgs) -> Result<Value, UserError> + 'static) -> Self {
        Self {
            create: Rc::new(create),
            did_create: None,
            destroy: None,
        }
    }

    pub fn on_did_create(mut self, hook: impl Fn(&Value) -> Result<(), UserError> + 'static) -> Self {
        self.did_create = Some(Rc::new(hook));
        self
    }

    pub fn on_destroy(mut self, hook: impl Fn(&Value) -> Result<(), UserError> + 'static) -> Self {
        self.destroy = Some(Rc::new(hook));
        self
    }
}

#[derive(Clone)]
pub enum ComponentManager {
    /// No state; `this` is undefined inside the layout.
    TemplateOnly,
    /// State produced by `create`; `this` is that state.
    Stateful(ComponentHooks),
}

pub struct ComponentDefinition {
    pub name: String,
    /// Name of the program block rendered as the component's layout.
    pub layout: String,
    pub manager: ComponentManager,
}

pub struct ComponentInstance {
    pub definition: Rc<ComponentDefinition>,
    pub state: Value,
    destroyed: Cell<bool>,
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentInstance({})", self.definition.name)
    }
}

impl ComponentInstance {
    /// Runs the manager's `create` hook with untracked argument reads.
    pub fn create(definition: Rc<ComponentDefinition>, args: &CapturedArgs, revs: &Revisions) -> Result<Rc<Self>, UserError> {
        let state = match &definition.manager {
            ComponentManager::TemplateOnly => Value::Undefined,
            ComponentManager::Stateful(hooks) => {
                let evaluated = revs.untrack(|| args.evaluate(revs))?;
                (hooks.create)(&evaluated)?
            }
        };
        Ok(Rc::new(ComponentInstance {
            definition,
            state,
            destroyed: Cell::new(false),
        }))
    }

    pub fn self_ref(&self) -> Reference {
        Reference::constant(self.state.clone()).labeled("this")
    }

    pub fn has_lifecycle(&self) -> bool {
        matches!(self.definition.manager, ComponentManager::Stateful(_))
    }

    pub fn did_create(&self) -> Result<(), UserError> {
        match &self.definition.manager {
            ComponentManager::Stateful(ComponentHooks {
                did_create: Some(hook), ..
            }) => hook(&self.state),
            _ => Ok(()),
        }
    }

    pub fn destroy(&self) -> Result<(), UserError> {
        if self.destroyed.replace(true) {
            return Ok(());
        }
        match &self.definition.manager {
            ComponentManager::Stateful(ComponentHooks { destroy: Some(hook), .. }) => hook(&self.state),
            _ => Ok(()),
        }
    }
}

// ----------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------

/// Named helpers, modifiers and components available to a program.
#[derive(Clone, Default)]
pub struct Definitions {
    helpers: HashMap<String, Rc<HelperDefinition>>,
    modifiers: HashMap<String, Rc<ModifierDefinition>>,
    components: HashMap<String, Rc<ComponentDefinition>>,
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_helper(&mut self, name: &str, manager: HelperManager) -> Rc<HelperDefinition> {
        let def = Rc::new(HelperDefinition {
            name: name.to_string(),
            manager,
        });
        self.helpers.insert(name.to_string(), def.clone());
        def
    }

    /// Shorthand for a [`HelperManager::Function`] helper.
    pub fn add_function(
        &mut self,
        name: &str,
        f: impl Fn(&EvaluatedArgs) -> Result<Value, UserError> + 'static,
    ) -> Rc<HelperDefinition> {
        self.add_helper(name, HelperManager::Function(Rc::new(f)))
    }

    pub fn add_modifier(&mut self, name: &str, manager: ModifierManager) -> Rc<ModifierDefinition> {
        let def = Rc::new(ModifierDefinition {
            name: name.to_string(),
            manager,
        });
        self.modifiers.insert(name.to_string(), def.clone());
        def
    }

    pub fn add_component(&mut self, name: &str, layout: &str, manager: ComponentManager) -> Rc<ComponentDefinition> {
        let def = Rc::new(ComponentDefinition {
            name: name.to_string(),
            layout: layout.to_string(),
            manager,
        });
        self.components.insert(name.to_string(), def.clone());
        def
    }

    pub fn helper(&self, name: &str) -> Result<Rc<HelperDefinition>, EngineError> {
        self.helpers.get(name).cloned().ok_or_else(|| EngineError::UnknownDefinition {
            kind: "helper",
            name: name.to_string(),
        })
    }

    pub fn modifier(&self, name: &str) -> Result<Rc<ModifierDefinition>, EngineError> {
        self.modifiers.get(name).cloned().ok_or_else(|| EngineError::UnknownDefinition {
            kind: "modifier",
            name: name.to_string(),
        })
    }

    pub fn component(&self, name: &str) -> Result<Rc<ComponentDefinition>, EngineError> {
        self.components.get(name).cloned().ok_or_else(|| EngineError::UnknownDefinition {
            kind: "component",
            name: name.to_string(),
        })
    }

    /// Looks a definition up by kind, as a value.
    pub fn resolve(&self, kind: CurriedKind, name: &str) -> Option<Value> {
        match kind {
            CurriedKind::Component => self.components.get(name).cloned().map(Value::Component),
            CurriedKind::Helper => self.helpers.get(name).cloned().map(Value::Helper),
            CurriedKind::Modifier => self.modifiers.get(name).cloned().map(Value::Modifier),
        }
    }
}
