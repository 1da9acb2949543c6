//! Schema Compiler CLI
//!
//! Compiles JSON schemas, validates instances against them, and reports on
//! cross-schema references.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use schemac::{Compiler, ReferenceGraph, SchemacConfig, Validator};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "schemac")]
#[command(about = "Compile JSON schemas and validate instances")]
struct Cli {
    /// Path to a schemac.toml config file
    #[arg(short, long)]
    config: Option<String>,

    /// Directory of *.json schemas to register (repeatable)
    #[arg(short = 'd', long = "schemas")]
    schema_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a schema and report the result
    Compile {
        /// Schema file, or the id of a registered schema
        schema: String,

        /// Print the compiled rule trace
        #[arg(long)]
        source: bool,
    },

    /// Validate JSON instance files against a schema
    Validate {
        /// Schema file, or the id of a registered schema
        schema: String,

        /// Instance files to validate
        instances: Vec<PathBuf>,
    },

    /// Report reference cycles and missing targets across registered schemas
    Refs {
        /// Output file (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List registered schema ids
    Ids,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SchemacConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    let compiler = Compiler::new(config.compile.clone());

    let mut dirs = config.sources.paths.clone();
    dirs.extend(cli.schema_dirs.iter().cloned());
    for dir in &dirs {
        register_dir(&compiler, dir)?;
    }

    match cli.command {
        Commands::Compile { schema, source } => {
            let validator = compile_target(&compiler, &schema)?;
            println!("✅ compiled {}", schema);
            if source {
                match validator.source() {
                    Some(trace) => println!("{}", trace),
                    None => println!("(no trace retained; enable compile.retain_source)"),
                }
            }
            Ok(())
        }

        Commands::Validate { schema, instances } => {
            let validator = compile_target(&compiler, &schema)?;

            let mut all_valid = true;
            for path in &instances {
                let instance = read_json(path)?;
                if validator.validate(&instance) {
                    println!("✅ {} - valid", path.display());
                } else {
                    all_valid = false;
                    println!("❌ {} - INVALID", path.display());
                    for error in validator.errors() {
                        println!("   └─ {}", error);
                    }
                }
            }

            if !all_valid {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Refs { output } => {
            let report = ReferenceGraph::from_registry(compiler.registry()).report();
            let report_json = serde_json::to_string_pretty(&report)?;

            if let Some(path) = output {
                std::fs::write(&path, &report_json)?;
                println!("✅ Report written to {:?}", path);
            } else {
                println!("{}", report_json);
            }

            if !report.cycles.is_empty() {
                info!(cycles = report.cycles.len(), "reference cycles detected");
            }
            Ok(())
        }

        Commands::Ids => {
            let mut ids = compiler.registry().ids();
            ids.sort();
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
    }
}

/// Register every *.json file under `dir`, keyed by its declared `$id` or,
/// failing that, a file:// id derived from its path.
fn register_dir(compiler: &Compiler, dir: &Path) -> anyhow::Result<()> {
    let mut count = 0usize;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let schema = read_json(path)?;
        let fallback = format!("file://{}", path.display());
        let declared = schema
            .get("$id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        let id = match declared {
            Some(_) => compiler.add_schema(None, schema),
            None => compiler.add_schema(Some(&fallback), schema),
        }
        .with_context(|| format!("failed to register {}", path.display()))?;
        debug!(%id, path = %path.display(), "registered schema");
        count += 1;
    }
    info!(count, dir = %dir.display(), "loaded schema directory");
    Ok(())
}

/// Interpret `target` as a schema file if it exists on disk, otherwise as a
/// registered schema id.
fn compile_target(compiler: &Compiler, target: &str) -> anyhow::Result<Validator> {
    let path = Path::new(target);
    if path.is_file() {
        let schema = read_json(path)?;
        compiler
            .compile(schema)
            .map_err(|e| anyhow!("failed to compile {}: {}", target, e))
    } else {
        compiler
            .compile_id(target)
            .map_err(|e| anyhow!("failed to compile {}: {}", target, e))
    }
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}
