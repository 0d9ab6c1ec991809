//! DC Provisioner
//!
//! Command-line front end for the provisioning registry: seeds a registry
//! from a topology file and prints the resulting inventory, the topology
//! schema or the action catalog.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dc_provisioner::{
    ActionCatalog, Entity, EntityType, LifecycleState, ProvisioningRegistry, ProvisioningService,
    RegistryStatsSnapshot, TopologyConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// DC Provisioner - Registry for zones, pods, clusters, hosts and storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Output format for printed documents
    #[arg(long, env = "OUTPUT_FORMAT", value_enum, default_value = "yaml", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a topology file and print the resulting inventory
    Apply {
        /// Topology file (.yaml, .yml or .json)
        #[arg(long, env = "TOPOLOGY_FILE")]
        topology: PathBuf,

        /// Drive entities to the desired states declared in the topology
        #[arg(long)]
        desired: bool,
    },

    /// Print the JSON Schema of the topology file
    Schema,

    /// Print the actions declared for an entity type
    Actions {
        /// Entity type (zone, pod, cluster, host, storage)
        #[arg(long = "type")]
        entity_type: String,

        /// Only list actions legal in this state
        #[arg(long)]
        state: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    debug!("{} {}", dc_provisioner::NAME, dc_provisioner::VERSION);

    match &args.command {
        Command::Apply { topology, desired } => apply(topology, *desired, args.output).await,
        Command::Schema => {
            println!("{}", TopologyConfig::json_schema()?);
            Ok(())
        }
        Command::Actions { entity_type, state } => {
            actions(entity_type, state.as_deref(), args.output)
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Serialize)]
struct Inventory {
    zones: Vec<Entity>,
    pods: Vec<Entity>,
    clusters: Vec<Entity>,
    hosts: Vec<Entity>,
    storage: Vec<Entity>,
    stats: RegistryStatsSnapshot,
}

async fn apply(path: &Path, desired: bool, output: OutputFormat) -> anyhow::Result<()> {
    let topology = TopologyConfig::load(path)
        .with_context(|| format!("failed to load topology {}", path.display()))?;

    info!("Applying topology");
    info!("  File: {}", path.display());
    info!("  Entities: {}", topology.entity_count());
    info!("  Reconcile: {}", desired);

    let registry = ProvisioningRegistry::new(topology.registry.clone());

    // Log registry events as they happen
    let mut events = registry.watch();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            debug!(event = %event, "Registry event");
        }
    });

    let report = registry
        .apply_topology(&topology)
        .context("failed to register topology")?;
    info!("Registered {} entities", report.total());

    if desired {
        let outcome = registry.reconcile_all();
        info!(
            steps = outcome.steps,
            converged = outcome.converged.len(),
            "Reconciliation finished"
        );
        for (uuid, err) in &outcome.failed {
            warn!(uuid = %uuid, error = %err, "Entity did not converge");
        }
    }

    let inventory = Inventory {
        zones: registry.list_zones(),
        pods: registry.list_pods(),
        clusters: registry.list_clusters(),
        hosts: registry.list_hosts(),
        storage: registry.list_storage(),
        stats: registry.stats(),
    };
    print_document(&inventory, output)?;

    watcher.abort();
    Ok(())
}

#[derive(Serialize)]
struct ActionEntry {
    action: &'static str,
    target: Option<&'static str>,
}

fn actions(entity_type: &str, state: Option<&str>, output: OutputFormat) -> anyhow::Result<()> {
    let entity_type: EntityType = entity_type.parse()?;

    let actions = match state {
        Some(state) => {
            let state = LifecycleState::parse(entity_type, state)?;
            ActionCatalog::applicable(entity_type, state)
        }
        None => ActionCatalog::all(entity_type),
    };

    let entries: Vec<_> = actions
        .iter()
        .map(|action| ActionEntry {
            action: action.name(),
            target: action.target().map(|state| state.name()),
        })
        .collect();
    print_document(&entries, output)
}

fn print_document<T: Serialize>(value: &T, output: OutputFormat) -> anyhow::Result<()> {
    let rendered = match output {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
    };
    println!("{}", rendered);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // logs go to stderr so printed documents stay parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
