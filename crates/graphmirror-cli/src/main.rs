//! Graphmirror CLI
//!
//! Command-line interface for:
//! - Compiling catalog records into JSON-LD documents (value or probe mode)
//! - Planning update/delete reconciliation against a SPARQL endpoint
//! - Applying plans (delete program, then insert program)
//! - Resolving the instance URIs a previous projection minted

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use graphmirror_rdf::PrefixTable;
use graphmirror_reconcile::Reconciler;
use graphmirror_store::HttpStore;
use graphmirror_template::{
    compile, Elide, HelperCaches, HelperRegistry, Record, SubstitutePlaceholder,
};

#[derive(Parser)]
#[command(name = "graphmirror")]
#[command(
    author,
    version,
    about = "Graphmirror: mirror catalog records into a knowledge graph"
)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a record against a template and print the JSON-LD document.
    Compile {
        /// Record JSON file (`-` for stdin)
        record: PathBuf,
        /// Template JSON file
        #[arg(short, long)]
        template: PathBuf,
        /// Probe mode: substitute placeholders instead of eliding
        #[arg(long)]
        probe: bool,
    },

    /// Reconcile an updated (or new) record into the store.
    Update {
        /// Record JSON file (`-` for stdin)
        record: PathBuf,
        /// Config JSON (endpoint, template, prefixes)
        #[arg(short, long, default_value = "graphmirror.json")]
        config: PathBuf,
        /// Print the plan without sending updates to the store
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove a record's projection from the store.
    Delete {
        /// Record JSON file (`-` for stdin)
        record: PathBuf,
        #[arg(short, long, default_value = "graphmirror.json")]
        config: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },

    /// Show which instance URIs a previous projection of the record minted.
    Resolve {
        /// Record JSON file (`-` for stdin)
        record: PathBuf,
        #[arg(short, long, default_value = "graphmirror.json")]
        config: PathBuf,
    },
}

/// Endpoint and template wiring, loaded from a JSON config file. Relative
/// paths are resolved against the config file's directory.
#[derive(Debug, Deserialize)]
struct Config {
    /// SPARQL query endpoint URL
    endpoint: String,
    /// Update endpoint, when distinct from the query endpoint
    update_endpoint: Option<String>,
    /// Path to the mapping template
    template: PathBuf,
    /// Extra namespace prefixes on top of the built-in table
    #[serde(default)]
    prefixes: BTreeMap<String, String>,
    /// Path-walk hop bound
    max_hops: Option<usize>,
}

impl Config {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if config.template.is_relative() {
            if let Some(dir) = path.parent() {
                config.template = dir.join(&config.template);
            }
        }
        Ok(config)
    }

    fn prefix_table(&self) -> PrefixTable {
        let mut table = PrefixTable::default();
        for (prefix, namespace) in &self.prefixes {
            table.insert(prefix.clone(), namespace.clone());
        }
        table
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compile {
            record,
            template,
            probe,
        } => cmd_compile(&record, &template, probe),
        Commands::Update {
            record,
            config,
            dry_run,
        } => cmd_update(&record, &config, dry_run),
        Commands::Delete {
            record,
            config,
            dry_run,
        } => cmd_delete(&record, &config, dry_run),
        Commands::Resolve { record, config } => cmd_resolve(&record, &config),
    }
}

fn load_json(path: &Path) -> Result<serde_json::Value> {
    let text = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading stdin")?
    } else {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_record(path: &Path) -> Result<Record> {
    let value = load_json(path)?;
    let mut record = Record::from_value(value)?;
    record.canonicalize();
    record.strip_empty();
    Ok(record)
}

fn record_label(record: &Record) -> String {
    record.canonical_id().unwrap_or("<no id>").to_string()
}

fn cmd_compile(record_path: &Path, template_path: &Path, probe: bool) -> Result<()> {
    let template = load_json(template_path)?;
    let record = load_record(record_path)?;
    let registry = HelperRegistry::default();
    let caches = HelperCaches::new();

    let document = if probe {
        compile(
            &template,
            &record,
            &registry,
            &caches,
            &SubstitutePlaceholder::default(),
        )?
    } else {
        compile(&template, &record, &registry, &caches, &Elide)?
    };
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn open_store(config: &Config) -> Result<HttpStore> {
    let store = HttpStore::new(&config.endpoint)?;
    match &config.update_endpoint {
        Some(update) => Ok(store.with_update_endpoint(update)?),
        None => Ok(store),
    }
}

fn print_program(title: &str, program: &str) {
    eprintln!("{}", title.cyan().bold());
    println!("{program}");
}

fn cmd_update(record_path: &Path, config_path: &Path, dry_run: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let template = load_json(&config.template)?;
    let record = load_record(record_path)?;
    let store = open_store(&config)?;

    let mut reconciler =
        Reconciler::new(&store, template).with_prefixes(config.prefix_table());
    if let Some(max_hops) = config.max_hops {
        reconciler = reconciler.with_max_hops(max_hops);
    }

    let plan = reconciler.plan_update(&record)?;
    if dry_run {
        print_program("delete program:", &plan.delete_program);
        print_program("insert program:", &plan.insert_program);
        return Ok(());
    }
    reconciler.apply_update(&plan)?;
    eprintln!(
        "{} updated {} ({} delete clauses)",
        "ok".green().bold(),
        record_label(&record).bold(),
        plan.clauses.len(),
    );
    Ok(())
}

fn cmd_delete(record_path: &Path, config_path: &Path, dry_run: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let template = load_json(&config.template)?;
    let record = load_record(record_path)?;
    let store = open_store(&config)?;

    let mut reconciler =
        Reconciler::new(&store, template).with_prefixes(config.prefix_table());
    if let Some(max_hops) = config.max_hops {
        reconciler = reconciler.with_max_hops(max_hops);
    }

    let plan = reconciler.plan_delete(&record)?;
    if dry_run {
        print_program("delete program:", &plan.program);
        return Ok(());
    }
    reconciler.apply_delete(&plan)?;
    eprintln!(
        "{} deleted {} ({} delete clauses)",
        "ok".green().bold(),
        record_label(&record).bold(),
        plan.clauses.len(),
    );
    Ok(())
}

fn cmd_resolve(record_path: &Path, config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let template = load_json(&config.template)?;
    let record = load_record(record_path)?;
    if record.canonical_id().is_none() {
        return Err(anyhow!("record has no identity field"));
    }
    let store = open_store(&config)?;

    let reconciler = Reconciler::new(&store, template).with_prefixes(config.prefix_table());
    let resolved = reconciler.resolve(&record)?;
    if resolved.uris.is_empty() {
        eprintln!(
            "{} no prior projection for {}",
            "info:".yellow().bold(),
            record_label(&record).bold(),
        );
        return Ok(());
    }
    for uri in &resolved.uris {
        println!("{uri}");
    }
    Ok(())
}
