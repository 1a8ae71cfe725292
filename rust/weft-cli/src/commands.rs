//! The `weft` subcommands, independent of argument parsing and terminal
//! output so they can be driven from tests.

use crate::builtins;
use crate::config::WeftConfig;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use weft_program::{Program, ProgramError};
use weft_vm::dom::{DomError, MutationStats};
use weft_vm::{render, ComponentManager, Definitions, Document, Environment, Reference, RenderMode, Value, VmError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("render failed: {0}")]
    Render(#[from] VmError),
    #[error("cannot load markup: {0}")]
    Markup(#[from] DomError),
    #[error("{0} already exists")]
    AlreadyExists(String),
}

/// One VM pass: the initial render or a rerender after new data.
#[derive(Debug, Clone, Serialize)]
pub struct Pass {
    pub label: String,
    pub html: String,
    pub stats: MutationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub passes: Vec<Pass>,
    /// Lines written by `{{log}}`.
    pub output: Vec<String>,
}

impl RenderReport {
    pub fn final_html(&self) -> &str {
        self.passes.last().map(|p| p.html.as_str()).unwrap_or("")
    }
}

pub fn read_program(path: &Path) -> Result<Program, CliError> {
    let source = read_file(path)?;
    Ok(Program::from_json(&source)?)
}

pub fn read_json(path: &Path) -> Result<serde_json::Value, CliError> {
    let source = read_file(path)?;
    serde_json::from_str(&source).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Builtin helpers plus the template-only components named in config.
pub fn definitions(config: &WeftConfig) -> Definitions {
    let mut defs = Definitions::new();
    builtins::install(&mut defs);
    for (name, layout) in &config.components {
        defs.add_component(name, layout, ComponentManager::TemplateOnly);
    }
    defs
}

/// Renders `program` with `data` as `this`, then applies each entry of
/// `updates` as new data followed by a rerender.
pub fn render_program(
    program: &Program,
    config: &WeftConfig,
    data: &serde_json::Value,
    updates: &[serde_json::Value],
    mode: RenderMode,
) -> Result<RenderReport, CliError> {
    let mut env = Environment::with_config(definitions(config), config.runtime.clone());
    let this = Reference::cell(&env.revisions, Value::from_json(data));
    let mut doc = Document::new();
    let root = doc.create_root(&config.render.root_tag);

    let mut result = render(program, &mut env, &mut doc, root, this.clone(), mode)?;
    let mut passes = vec![Pass {
        label: mode_label(mode).to_string(),
        html: doc.inner_html(root),
        stats: doc.stats().clone(),
    }];
    tracing::debug!(opcodes = result.opcode_count(), "initial render complete");

    for (index, update) in updates.iter().enumerate() {
        doc.reset_stats();
        this.set(&env.revisions, Value::from_json(update));
        result.rerender(program, &mut env, &mut doc)?;
        passes.push(Pass {
            label: format!("update {}", index + 1),
            html: doc.inner_html(root),
            stats: doc.stats().clone(),
        });
    }

    Ok(RenderReport {
        passes,
        output: std::mem::take(&mut env.output),
    })
}

/// Loads server markup into the root and rehydrates it against `data`.
pub fn rehydrate_program(
    program: &Program,
    config: &WeftConfig,
    html: &str,
    data: &serde_json::Value,
) -> Result<RenderReport, CliError> {
    let mut env = Environment::with_config(definitions(config), config.runtime.clone());
    let this = Reference::cell(&env.revisions, Value::from_json(data));
    let mut doc = Document::new();
    let root = doc.create_root(&config.render.root_tag);
    doc.set_inner_html(root, html)?;
    doc.reset_stats();

    render(program, &mut env, &mut doc, root, this, RenderMode::Rehydrate)?;
    Ok(RenderReport {
        passes: vec![Pass {
            label: mode_label(RenderMode::Rehydrate).to_string(),
            html: doc.inner_html(root),
            stats: doc.stats().clone(),
        }],
        output: std::mem::take(&mut env.output),
    })
}

pub fn inspect_program(program: &Program) -> String {
    program.disassemble()
}

/// Writes a starter `weft.toml` into `dir`.
pub fn init_config(dir: &Path) -> Result<std::path::PathBuf, CliError> {
    let path = dir.join(crate::config::CONFIG_FILE);
    if path.exists() {
        return Err(CliError::AlreadyExists(path.display().to_string()));
    }
    std::fs::write(&path, WeftConfig::default_template()).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

pub fn mode_label(mode: RenderMode) -> &'static str {
    match mode {
        RenderMode::Client => "render",
        RenderMode::Serialize => "serialize",
        RenderMode::Rehydrate => "rehydrate",
    }
}

/// One-line summary of a pass's mutation counts.
pub fn summarize(stats: &MutationStats) -> String {
    format!(
        "{} nodes created, {} inserts, {} removals, {} attributes set, {} attributes removed, {} text updates, {} html inserts",
        stats.nodes_created(),
        stats.inserts,
        stats.removals,
        stats.attributes_set,
        stats.attributes_removed,
        stats.text_updates,
        stats.html_inserts,
    )
}
