//! Weft CLI: render, serialize, rehydrate and inspect compiled programs.

use clap::{Parser as ClapParser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use weft_cli::colors::{gray, green, red, status_label};
use weft_cli::commands::{self, CliError, RenderReport};
use weft_cli::config::WeftConfig;
use weft_vm::RenderMode;

#[derive(ClapParser)]
#[command(name = "weft", version, about = "Render weft programs against JSON data")]
struct Cli {
    /// Use this config file instead of searching for weft.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a program and print the resulting HTML
    Render {
        /// Path to the program JSON
        #[arg()]
        program: PathBuf,

        /// JSON file used as `this`
        #[arg(long)]
        data: Option<PathBuf>,

        /// Emit block markers for later rehydration
        #[arg(long)]
        serialize: bool,

        /// Replace the data with this file and rerender (repeatable)
        #[arg(long = "then")]
        updates: Vec<PathBuf>,

        /// Override the instruction budget
        #[arg(long)]
        max_instructions: Option<u64>,

        /// Skip installing modifiers
        #[arg(long)]
        static_only: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Adopt serialized markup and print the repaired HTML
    Rehydrate {
        /// Path to the program JSON
        #[arg()]
        program: PathBuf,

        /// Serialized HTML produced by `weft render --serialize`
        #[arg(long)]
        html: PathBuf,

        /// JSON file used as `this`
        #[arg(long)]
        data: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a program's disassembly
    Inspect {
        #[arg()]
        program: PathBuf,
    },
    /// Write a starter weft.toml in the current directory
    Init,
}

fn main() {
    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{} {}", red("error:"), message);
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let outcome = match cli.command {
        Commands::Render {
            program,
            data,
            serialize,
            updates,
            max_instructions,
            static_only,
            json,
        } => {
            let mut config = config;
            if let Some(limit) = max_instructions {
                config.runtime.max_instructions = limit;
            }
            if static_only || serialize {
                config.runtime.interactive = false;
            }
            let mode = if serialize { RenderMode::Serialize } else { RenderMode::Client };
            cmd_render(&program, data.as_deref(), &updates, mode, &config, json)
        }
        Commands::Rehydrate {
            program,
            html,
            data,
            json,
        } => cmd_rehydrate(&program, &html, data.as_deref(), &config, json),
        Commands::Inspect { program } => cmd_inspect(&program),
        Commands::Init => cmd_init(),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", red("error:"), e);
        std::process::exit(1);
    }
}

fn load_config(explicit: Option<&Path>) -> Result<WeftConfig, String> {
    match explicit {
        Some(path) => WeftConfig::load_from(path),
        None => Ok(WeftConfig::load()),
    }
}

/// `RUST_LOG` wins over the configured `log_level`.
fn init_tracing(config: &WeftConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.runtime.log_level.as_deref().unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn data_or_null(path: Option<&Path>) -> Result<serde_json::Value, CliError> {
    match path {
        Some(path) => commands::read_json(path),
        None => Ok(serde_json::Value::Null),
    }
}

fn cmd_render(
    program: &Path,
    data: Option<&Path>,
    updates: &[PathBuf],
    mode: RenderMode,
    config: &WeftConfig,
    json: bool,
) -> Result<(), CliError> {
    let program = commands::read_program(program)?;
    let data = data_or_null(data)?;
    let updates = updates
        .iter()
        .map(|path| commands::read_json(path))
        .collect::<Result<Vec<_>, _>>()?;
    let report = commands::render_program(&program, config, &data, &updates, mode)?;
    print_report(&report, config, json)
}

fn cmd_rehydrate(
    program: &Path,
    html: &Path,
    data: Option<&Path>,
    config: &WeftConfig,
    json: bool,
) -> Result<(), CliError> {
    let program = commands::read_program(program)?;
    let markup = commands::read_file(html)?;
    let data = data_or_null(data)?;
    let report = commands::rehydrate_program(&program, config, &markup, &data)?;
    print_report(&report, config, json)
}

fn cmd_inspect(program: &Path) -> Result<(), CliError> {
    let program = commands::read_program(program)?;
    print!("{}", commands::inspect_program(&program));
    Ok(())
}

fn cmd_init() -> Result<(), CliError> {
    let dir = std::env::current_dir().map_err(|source| CliError::Io {
        path: ".".to_string(),
        source,
    })?;
    let path = commands::init_config(&dir)?;
    eprintln!("{} {}", status_label("Created"), path.display());
    Ok(())
}

fn print_report(report: &RenderReport, config: &WeftConfig, json: bool) -> Result<(), CliError> {
    if json {
        let rendered = serde_json::to_string_pretty(report).map_err(|source| CliError::Json {
            path: "<report>".to_string(),
            source,
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    for line in &report.output {
        eprintln!("{} {}", gray("log:"), line);
    }
    for pass in &report.passes {
        println!("{}", pass.html);
        if config.render.json_stats {
            let stats = serde_json::to_string(&pass.stats).map_err(|source| CliError::Json {
                path: "<stats>".to_string(),
                source,
            })?;
            eprintln!("{} {}", status_label(&pass.label), stats);
        } else {
            eprintln!(
                "{} {} {}",
                status_label(&pass.label),
                green(&format!("{} mutations", pass.stats.total())),
                gray(&commands::summarize(&pass.stats))
            );
        }
    }
    Ok(())
}
