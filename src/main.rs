use clap::{Parser, Subcommand};
use sdprovision::config::Config;
use sdprovision::error::{ProvisionError, Result};
use sdprovision::models::provisioner::{plan, verify};
use sdprovision::models::{
    AppLayout, Manifest, Mode, ProvisionReport, Provisioner, RegistryClient, SymlinkCreator,
    Target,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sdprovision")]
#[command(about = "Provision Stable Diffusion models into a durable volume", long_about = None)]
struct Cli {
    /// Model manifest (JSON)
    #[arg(short, long, global = true, default_value = "config.json")]
    manifest: PathBuf,

    /// Config file (TOML), defaults to ~/.config/sdprovision/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Durable volume for model weights (overrides storage.data_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every model and link it into the application's model directory
    Run {
        /// Application layout: a1111 or comfyui
        #[arg(short, long)]
        target: Target,
        /// Application install root (overrides the configured default)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Write a JSON report of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Fetch every model into the data volume without linking
    Warm {
        /// Write a JSON report of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show the steps a run would take, without downloading anything
    Plan {
        /// Application layout; omit for a cache-only plan
        #[arg(short, long)]
        target: Option<Target>,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Check that every model link exists and resolves to a file
    Verify {
        #[arg(short, long)]
        target: Target,
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        tracing::error!("Provisioning failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "sdprovision=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    // Read once, shared by reference from here on
    let manifest = Manifest::load(&cli.manifest)?;

    match cli.command {
        Commands::Run {
            target,
            root,
            report,
        } => {
            let mode = Mode::Link(layout(target, root, &config));
            provision(&config, &manifest, &mode, report.as_deref()).await
        }
        Commands::Warm { report } => {
            provision(&config, &manifest, &Mode::Warm, report.as_deref()).await
        }
        Commands::Plan { target, root } => {
            let mode = target.map_or(Mode::Warm, |t| Mode::Link(layout(t, root, &config)));
            print_plan(&manifest, &mode)
        }
        Commands::Verify { target, root } => {
            let layout = layout(target, root, &config);
            let problems = verify(&manifest, &layout)?;

            if problems.is_empty() {
                println!("✓ All model links for {target} resolve");
                return Ok(());
            }

            for problem in &problems {
                println!("✗ {}: {}", problem.link.display(), problem.reason);
            }
            Err(ProvisionError::Verify(problems.len()))
        }
    }
}

fn layout(target: Target, root: Option<PathBuf>, config: &Config) -> AppLayout {
    match root {
        Some(root) => AppLayout::new(target, root),
        None => AppLayout::from_config(target, config),
    }
}

async fn provision(
    config: &Config,
    manifest: &Manifest,
    mode: &Mode,
    report_path: Option<&Path>,
) -> Result<()> {
    if manifest.is_empty() {
        tracing::warn!("Manifest lists no models, nothing to do");
    }

    let client = RegistryClient::new(config, manifest)?;
    let provisioner = Provisioner::new(manifest, client, SymlinkCreator)
        .with_verify_target(config.link.verify_target);

    let report = provisioner.run(mode).await?;
    print_summary(&report);

    if let Some(path) = report_path {
        report.save(path)?;
        tracing::info!("Wrote report to {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &ProvisionReport) {
    println!(
        "✓ Provisioned {} model(s) for {}: {} downloaded, {} cached, {} linked",
        report.models.len(),
        report.mode,
        report.downloaded(),
        report.cached(),
        report.linked()
    );
}

fn print_plan(manifest: &Manifest, mode: &Mode) -> Result<()> {
    let steps = plan(manifest, mode)?;

    match mode {
        Mode::Link(layout) => println!(
            "Plan for {} at {}",
            layout.target().info().description,
            layout.root().display()
        ),
        Mode::Warm => println!("Plan for cache warm-up"),
    }

    if steps.is_empty() {
        println!("Manifest lists no models");
        return Ok(());
    }

    for (i, step) in steps.iter().enumerate() {
        let link = step
            .link
            .as_ref()
            .map_or_else(|| "(cache only)".to_string(), |l| l.display().to_string());
        println!(
            "{:>3}. [{}] {} -> {link}",
            i + 1,
            step.model.source(),
            step.model.name()
        );
    }

    Ok(())
}
