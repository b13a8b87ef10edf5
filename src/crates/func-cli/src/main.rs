//! Thin CLI shell driving `func-core` from a JSON graph description
//! (SPEC_FULL.md §6) — not the DSL itself, a stand-in loader format.
//! Shaped after the teacher's `langgraph-cli`: `clap` subcommands,
//! human-readable `println!` output, `Result<(), Box<dyn Error>>` returns.

mod loader;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use func_core::{new_engine, EngineConfig};
use func_world::InMemoryWorld;
use loader::GraphDef;

#[derive(Parser)]
#[command(name = "func-cli")]
#[command(about = "Drive the func-core reactive function runtime from a JSON graph description")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// This host's name, used for world-coupled nodes that key state per host.
    #[arg(long, global = true, default_value = "localhost")]
    hostname: String,

    /// Reject JSON object fields not declared on their target struct type.
    #[arg(long, global = true)]
    strict_unknown_keys: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and topologically order a JSON graph description, without running it.
    Validate {
        /// Path to the JSON graph file
        file: PathBuf,
    },

    /// Load a JSON graph description and run it until interrupted.
    Run {
        /// Path to the JSON graph file
        file: PathBuf,
    },

    /// Load a JSON graph description and print a summary of the live graph.
    GraphInfo {
        /// Path to the JSON graph file
        file: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn load_graph_def(file: &PathBuf) -> Result<GraphDef, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&text)?)
}

fn engine_config(cli: &Cli) -> EngineConfig {
    EngineConfig {
        hostname: cli.hostname.clone(),
        strict_unknown_keys: cli.strict_unknown_keys,
        ..EngineConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate { file } => {
            println!("Validating: {}", file.display());
            let def = load_graph_def(file)?;
            let config = engine_config(&cli);
            let world: Arc<dyn func_core::World> = Arc::new(InMemoryWorld::new(config.hostname.clone()));
            let engine = new_engine(world, config);
            loader::load_graph(&def, &engine).await?;
            println!("✓ graph is valid");
            println!("  nodes: {}", def.nodes.len());
            println!("  edges: {}", def.edges.len());
        }
        Commands::Run { file } => {
            println!("Running: {}", file.display());
            let def = load_graph_def(file)?;
            let config = engine_config(&cli);
            let world: Arc<dyn func_core::World> = Arc::new(InMemoryWorld::new(config.hostname.clone()));
            let engine = new_engine(world, config);
            loader::load_graph(&def, &engine).await?;
            println!("✓ graph seeded, running until Ctrl-C");
            engine.run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
            println!("shutdown complete");
        }
        Commands::GraphInfo { file } => {
            println!("Graph info: {}", file.display());
            let def = load_graph_def(file)?;
            let config = engine_config(&cli);
            let world: Arc<dyn func_core::World> = Arc::new(InMemoryWorld::new(config.hostname.clone()));
            let engine = new_engine(world, config);
            loader::load_graph(&def, &engine).await?;
            let summaries = engine.describe().await;
            println!("\nNodes ({}):", summaries.len());
            for node in &summaries {
                println!(
                    "  [{}] {} : {} (pure={})",
                    node.index, node.name, node.sig, node.pure
                );
                for (from, arg) in &node.in_edges {
                    println!("      <- [{from}] as {arg:?}");
                }
            }
        }
    }

    Ok(())
}
