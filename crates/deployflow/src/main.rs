mod commands;
mod kube;
mod platform;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "deployflow")]
#[command(about = "Provision and operate EKS environments from one config file", long_about = None)]
struct Cli {
    /// Path to the environment config file
    #[arg(
        short,
        long,
        default_value = "deploy.yaml",
        env = "DEPLOYFLOW_CONFIG",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset install progress so the next install starts from scratch
    Init,
    /// Check the config file without touching the platform
    Validate,
    /// Bring the environment up, resuming a previously failed install
    Install,
    /// Roll the environment forward to the configured Kubernetes version
    Upgrade {
        /// Also apply the configured downscaler manifest
        #[arg(long)]
        upgrade_downscaler: bool,
    },
    /// Undo a node group replacement using the stored snapshot
    Rollback,
    /// Delete the pre-upgrade node groups once the replacement is verified
    Cleanup,
    /// Tear the whole environment down
    Delete {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::Init => {
            let config = deployflow_core::DeployConfig::load(&cli.config)?;
            commands::init::handle(config).await
        }
        Commands::Validate => commands::validate::handle(&cli.config).await,
        Commands::Install => commands::install::handle(&cli.config).await,
        Commands::Upgrade { upgrade_downscaler } => {
            commands::upgrade::handle(&cli.config, upgrade_downscaler).await
        }
        Commands::Rollback => commands::rollback::handle(&cli.config).await,
        Commands::Cleanup => commands::cleanup::handle(&cli.config).await,
        Commands::Delete { yes } => commands::delete::handle(&cli.config, yes).await,
    }
}
