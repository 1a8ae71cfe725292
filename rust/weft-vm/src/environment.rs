//! The runtime environment: revisions, definitions, configuration and the
//! transaction that batches lifecycle work until a render pass finishes.

use crate::bounds::{clear, BlockRef};
use crate::dom::Dom;
use crate::error::{EngineError, VmError};
use crate::managers::{ComponentInstance, Definitions, ModifierInstance};
use crate::validator::Revisions;
use crate::vm::ScopeInspector;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, trace};

/// Default cap on instructions executed by a single VM run.
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 10_000_000;

/// How output is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Build nodes directly.
    #[default]
    Client,
    /// Build nodes annotated with block markers for later rehydration.
    Serialize,
    /// Adopt nodes produced by a serializing render.
    Rehydrate,
}

/// Runtime settings, usually read from the `[runtime]` table of `weft.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_instructions: u64,
    /// Whether modifiers are installed. Serializing renders usually run
    /// non-interactive.
    pub interactive: bool,
    /// Skip URL sanitization of dynamic attributes.
    pub trusting_urls: bool,
    /// Filter directive for the log subscriber, e.g. `"weft_vm=debug"`.
    pub log_level: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            interactive: true,
            trusting_urls: false,
            log_level: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

/// Events delivered to the debug callback.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    /// About to execute the instruction at `pc`.
    Step { pc: i64, opcode: &'static str },
    /// A block is being cleared and re-executed.
    Rerender { pc: i64 },
    /// A list reconciled its items.
    ListSync { retained: usize, moved: usize, inserted: usize, deleted: usize },
}

pub type DebugCallback = Option<Box<dyn FnMut(&DebugEvent)>>;

/// Called by the `Debugger` opcode with a view of the current scope.
pub type DebuggerCallback = Option<Box<dyn FnMut(&ScopeInspector<'_>)>>;

/// Deferred teardown work.
#[derive(Debug, Clone)]
pub enum Destructor {
    Modifier(ModifierInstance),
    Component(Rc<ComponentInstance>),
    /// Clears the content of a remote block unless it was already removed
    /// together with an enclosing block.
    RemoteBlock(BlockRef),
    /// Clears a block that is still in the tree.
    Bounds(BlockRef),
}

impl Destructor {
    fn run(&self, dom: &mut dyn Dom, revs: &Revisions) -> Result<(), VmError> {
        match self {
            Destructor::Modifier(instance) => instance.destroy(dom, revs)?,
            Destructor::Component(instance) => instance.destroy()?,
            Destructor::RemoteBlock(block) | Destructor::Bounds(block) => {
                let block = block.borrow();
                if block.is_empty() {
                    return Ok(());
                }
                let first = block.first_node()?;
                if dom.parent_node(first) == Some(block.parent_element()) {
                    clear(dom, &block)?;
                } else {
                    trace!(?first, "block content already detached");
                }
            }
        }
        Ok(())
    }
}

/// Work scheduled during a render pass.
#[derive(Debug, Default)]
pub struct Transaction {
    destructors: Vec<Destructor>,
    created: Vec<Rc<ComponentInstance>>,
    installs: Vec<ModifierInstance>,
    updates: Vec<ModifierInstance>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.destructors.is_empty() && self.created.is_empty() && self.installs.is_empty() && self.updates.is_empty()
    }
}

pub struct Environment {
    pub revisions: Rc<Revisions>,
    pub definitions: Rc<Definitions>,
    pub config: RuntimeConfig,
    pub debug_callback: DebugCallback,
    pub debugger: DebuggerCallback,
    /// Lines written by the `Log` opcode.
    pub output: Vec<String>,
    transaction: Option<Transaction>,
}

impl Environment {
    pub fn new(definitions: Definitions) -> Self {
        Self::with_config(definitions, RuntimeConfig::default())
    }

    pub fn with_config(definitions: Definitions, config: RuntimeConfig) -> Self {
        Self {
            revisions: Rc::new(Revisions::new()),
            definitions: Rc::new(definitions),
            config,
            debug_callback: None,
            debugger: None,
            output: Vec::new(),
            transaction: None,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.config.interactive
    }

    pub fn set_debug_callback(&mut self, callback: impl FnMut(&DebugEvent) + 'static) {
        self.debug_callback = Some(Box::new(callback));
    }

    pub fn set_debugger(&mut self, callback: impl FnMut(&ScopeInspector<'_>) + 'static) {
        self.debugger = Some(Box::new(callback));
    }

    pub(crate) fn emit(&mut self, event: DebugEvent) {
        if let Some(cb) = self.debug_callback.as_mut() {
            cb(&event);
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn begin(&mut self) -> Result<(), EngineError> {
        if self.transaction.is_some() {
            return Err(EngineError::TransactionActive);
        }
        self.transaction = Some(Transaction::default());
        Ok(())
    }

    fn transaction_mut(&mut self) -> Result<&mut Transaction, EngineError> {
        self.transaction.as_mut().ok_or(EngineError::NoTransaction)
    }

    pub fn schedule_install_modifier(&mut self, modifier: ModifierInstance) -> Result<(), EngineError> {
        self.transaction_mut()?.installs.push(modifier);
        Ok(())
    }

    pub fn schedule_update_modifier(&mut self, modifier: ModifierInstance) -> Result<(), EngineError> {
        self.transaction_mut()?.updates.push(modifier);
        Ok(())
    }

    pub fn did_create(&mut self, component: Rc<ComponentInstance>) -> Result<(), EngineError> {
        self.transaction_mut()?.created.push(component);
        Ok(())
    }

    pub fn schedule_destroy(&mut self, destructor: Destructor) -> Result<(), EngineError> {
        self.transaction_mut()?.destructors.push(destructor);
        Ok(())
    }

    /// Runs the scheduled work: destructors, component `did_create` hooks,
    /// modifier installs, then modifier updates. Every step runs even if an
    /// earlier one fails; the first failure is returned.
    pub fn commit(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        let transaction = self.transaction.take().ok_or(EngineError::NoTransaction)?;
        debug!(
            destructors = transaction.destructors.len(),
            created = transaction.created.len(),
            installs = transaction.installs.len(),
            updates = transaction.updates.len(),
            "committing transaction"
        );
        let revs = self.revisions.clone();
        let mut first_error: Option<VmError> = None;
        let mut record = |result: Result<(), VmError>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        for destructor in &transaction.destructors {
            record(destructor.run(dom, &revs));
        }
        for component in &transaction.created {
            record(component.did_create().map_err(VmError::from));
        }
        for modifier in &transaction.installs {
            record(modifier.install(dom, &revs).map_err(VmError::from));
        }
        for modifier in &transaction.updates {
            record(modifier.update(dom, &revs).map_err(VmError::from));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs `f` inside a transaction and commits it. The transaction is
    /// committed even when `f` fails; `f`'s error wins.
    pub fn transaction<T>(
        &mut self,
        dom: &mut dyn Dom,
        f: impl FnOnce(&mut Self, &mut dyn Dom) -> Result<T, VmError>,
    ) -> Result<T, VmError> {
        self.begin()?;
        let result = f(self, dom);
        let committed = self.commit(dom);
        let value = result?;
        committed?;
        Ok(value)
    }
}
