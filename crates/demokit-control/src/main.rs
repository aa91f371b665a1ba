//! Demokit administrative CLI.
//!
//! Runs single lifecycle operations against the configured store and compute
//! API and prints the result as JSON.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use demokit_control::{DemoId, DemoService, DemoStatus, DemokitConfig, Username};

#[derive(Parser)]
#[command(name = "demokit")]
#[command(about = "Manage demo lifecycles")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to demokit.toml)
    #[arg(short, long, env = "DEMOKIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a demo
    Create {
        /// Acting user; an @domain suffix is ignored
        #[arg(short, long)]
        user: String,

        /// Free-text description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show a demo, refreshed from remote state
    Get {
        #[arg(short, long)]
        user: String,
        id: i64,
    },

    /// List a user's active demos, newest first
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Launch a demo
    Launch {
        #[arg(short, long)]
        user: String,
        id: i64,
    },

    /// Tear a demo down
    Teardown {
        #[arg(short, long)]
        user: String,
        id: i64,
    },

    /// Delete a demo record without touching remote resources
    Delete {
        #[arg(short, long)]
        user: String,
        id: i64,
    },

    /// Reserve instance names and record them on a demo
    CreateInstances {
        #[arg(short, long)]
        user: String,
        id: i64,

        /// Number of instances
        #[arg(short, long, default_value_t = 1)]
        count: u64,
    },

    /// List every user's demos with a status
    ListStatus {
        /// CREATED, LAUNCHED or DELETING
        status: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => DemokitConfig::from_file(path),
        None => DemokitConfig::load(),
    }
    .context("failed to load configuration")?;

    info!(
        backend = ?config.datastore.backend,
        gateway = ?config.compute.gateway_type,
        project = %config.compute.project_id,
        "configuration loaded"
    );

    let service = DemoService::from_config(&config).await?;
    let user = |nickname: &str| Username::from_nickname(nickname);

    match cli.command {
        Commands::Create { user: nickname, description } => {
            print_json(&service.create_demo(&user(&nickname)?, description).await?)
        }
        Commands::Get { user: nickname, id } => {
            print_json(&service.get_demo(&user(&nickname)?, DemoId::new(id)).await?)
        }
        Commands::List { user: nickname } => {
            print_json(&service.list_active_demos(&user(&nickname)?).await?)
        }
        Commands::Launch { user: nickname, id } => {
            print_json(&service.launch_demo(&user(&nickname)?, DemoId::new(id)).await?)
        }
        Commands::Teardown { user: nickname, id } => {
            print_json(&service.teardown_demo(&user(&nickname)?, DemoId::new(id)).await?)
        }
        Commands::Delete { user: nickname, id } => {
            service.delete_demo(&user(&nickname)?, DemoId::new(id)).await?;
            Ok(())
        }
        Commands::CreateInstances { user: nickname, id, count } => print_json(
            &service
                .create_instances(&user(&nickname)?, DemoId::new(id), count)
                .await?,
        ),
        Commands::ListStatus { status } => {
            let status: DemoStatus = status.parse()?;
            print_json(&service.repository().list_all_with_status(status).await?)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "demokit_control=info"
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            ),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
