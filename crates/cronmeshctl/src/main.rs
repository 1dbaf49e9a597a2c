//! cronmeshctl — CronMesh operations CLI.
//!
//! Inspects a coordination registry and publishes control commands to
//! live nodes, without joining any job group itself.
//!
//! # Usage
//!
//! ```text
//! cronmeshctl groups --format json
//! cronmeshctl publish trigger-now --group etl --job nightly-sync
//! cronmeshctl publish update-cron --group etl --job nightly-sync --cron "0 0 3 * * *"
//! cronmeshctl publish set-active --group etl --job nightly-sync --active false
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cronmesh_registry::CommandAction;

mod commands;

#[derive(Parser)]
#[command(
    name = "cronmeshctl",
    about = "CronMesh — distributed cron coordination",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path of the embedded registry file.
    #[arg(long, global = true, default_value = "/var/lib/cronmesh/registry.redb")]
    registry: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List job groups that have live nodes, with their job state
    Groups {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Publish a control command to one live node of a group
    Publish {
        #[command(subcommand)]
        action: PublishAction,
    },
}

#[derive(Subcommand)]
enum PublishAction {
    /// Fire a job immediately on the receiving node
    TriggerNow {
        /// Job group
        #[arg(short, long)]
        group: String,
        /// Job name within the group
        #[arg(short, long)]
        job: String,
    },
    /// Replace a job's cron expression cluster-wide
    UpdateCron {
        /// Job group
        #[arg(short, long)]
        group: String,
        /// Job name within the group
        #[arg(short, long)]
        job: String,
        /// New cron expression (sec min hour day-of-month month day-of-week)
        #[arg(short, long)]
        cron: String,
    },
    /// Activate or deactivate a job on every fire cycle
    SetActive {
        /// Job group
        #[arg(short, long)]
        group: String,
        /// Job name within the group
        #[arg(short, long)]
        job: String,
        /// true to activate, false to deactivate
        #[arg(short, long, action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cronmesh=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Groups { format } => commands::groups::list(&cli.registry, &format).await,
        Commands::Publish { action } => match action {
            PublishAction::TriggerNow { group, job } => {
                commands::publish::publish(&cli.registry, &group, &job, CommandAction::TriggerNow)
                    .await
            }
            PublishAction::UpdateCron { group, job, cron } => {
                commands::publish::publish(
                    &cli.registry,
                    &group,
                    &job,
                    CommandAction::UpdateCron { cron_expr: cron },
                )
                .await
            }
            PublishAction::SetActive { group, job, active } => {
                commands::publish::publish(
                    &cli.registry,
                    &group,
                    &job,
                    CommandAction::SetActive { active },
                )
                .await
            }
        },
    }
}
