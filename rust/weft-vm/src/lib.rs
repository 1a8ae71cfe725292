//! Weft VM
//!
//! Executes weft programs against a host tree: an append VM that builds the
//! initial tree, revision tags and references for change tracking, and an
//! updating pass that patches only what changed.

pub mod args;
pub mod bounds;
pub mod builder;
pub mod dom;
pub mod environment;
pub mod error;
pub mod managers;
pub mod reference;
pub mod validator;
pub mod values;
pub mod vm;

pub use args::{CapturedArgs, EvaluatedArgs};
pub use dom::{Document, Dom, NodeId};
pub use environment::{DebugEvent, Environment, RenderMode, RuntimeConfig};
pub use error::{EngineError, UserError, VmError};
pub use managers::{ComponentHooks, ComponentManager, Definitions, HelperManager, ModifierHooks, ModifierManager};
pub use reference::Reference;
pub use validator::Revisions;
pub use values::Value;
pub use vm::{render, RenderResult, ScopeInspector};
