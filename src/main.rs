// kforge CLI - Kubernetes cluster bring-up automation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kforge::action::ExecutorRegistry;
use kforge::cluster::DeploySpec;
use kforge::report::{print_json, print_summary};
use kforge::task::{TaskPlanner, TaskRunner, TaskStatus};

#[derive(Parser)]
#[command(
    name = "kforge",
    about = "Kubernetes cluster bring-up automation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    output_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full bring-up: pre-flight checks, node init, joins
    Deploy {
        /// Path to the deploy spec file
        spec: PathBuf,

        /// Directory action logs are written under
        #[arg(long, default_value = "/var/log/kforge")]
        log_dir: String,
    },

    /// Run the pre-flight checks only
    Check {
        /// Path to the deploy spec file
        spec: PathBuf,

        /// Directory action logs are written under
        #[arg(long, default_value = "/var/log/kforge")]
        log_dir: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Deploy {
            ref spec,
            ref log_dir,
        } => run(spec, log_dir, &cli.output_format, false).await,
        Commands::Check {
            ref spec,
            ref log_dir,
        } => run(spec, log_dir, &cli.output_format, true).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    spec_path: &Path,
    log_dir: &str,
    output_format: &str,
    check_only: bool,
) -> anyhow::Result<i32> {
    let spec = DeploySpec::from_file(spec_path)
        .with_context(|| format!("loading deploy spec {}", spec_path.display()))?;

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let planner = TaskPlanner::new(log_dir);

    let root = if check_only {
        planner.plan_check(&spec)
    } else {
        planner.plan_deploy(&spec)
    };

    let runner = TaskRunner::new(registry);
    runner.run(&root).await;

    match output_format {
        "json" => print_json(&root).context("writing json report")?,
        _ => print_summary(&root),
    }

    let status = root.lock().status;
    Ok(if status == TaskStatus::Successful { 0 } else { 1 })
}
