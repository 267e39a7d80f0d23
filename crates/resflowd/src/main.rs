mod commands;
mod output;
mod runtime;

use anyhow::Context;
use clap::{Parser, Subcommand};
use runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resflowd")]
#[command(about = "Keeps logical resources in step with their remote platforms", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile on the configured interval until Ctrl-C
    Run,
    /// Run a single reconciliation pass
    Sync {
        /// Only this container
        #[arg(short, long)]
        container: Option<u64>,
        /// Only these resource types (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,
        /// Report what would change without touching the store
        #[arg(long)]
        dry_run: bool,
    },
    /// List workflow jobs from the saved state
    Jobs {
        /// Only this container
        #[arg(short, long)]
        container: Option<u64>,
        /// Only failed jobs
        #[arg(long)]
        failed: bool,
    },
    /// Create an entity on a memory platform out of band
    Seed {
        /// Target container
        #[arg(short, long)]
        container: u64,
        /// Remote kind, e.g. domain or project
        kind: String,
        name: String,
        /// Remote id of the parent entity
        #[arg(short, long)]
        parent: Option<String>,
        /// Attributes as a JSON object
        #[arg(long, default_value = "{}")]
        attribs: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = resflow_config::load_settings().context("failed to load settings")?;

    match cli.command {
        Commands::Run => {
            let runtime = Runtime::open(&settings).await?;
            commands::run::handle(runtime).await?;
        }
        Commands::Sync {
            container,
            types,
            dry_run,
        } => {
            let runtime = Runtime::open(&settings).await?;
            commands::sync::handle(runtime, container, types, dry_run).await?;
        }
        Commands::Jobs { container, failed } => {
            commands::jobs::handle(&settings, container, failed).await?;
        }
        Commands::Seed {
            container,
            kind,
            name,
            parent,
            attribs,
        } => {
            let runtime = Runtime::open(&settings).await?;
            commands::seed::handle(runtime, container, &kind, &name, parent.as_deref(), &attribs)
                .await?;
        }
    }

    Ok(())
}
