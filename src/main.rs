mod collectors;
mod config;
mod render;
mod report;
mod snapshot;

use clap::Parser;
use collectors::Sources;
use config::Config;
use render::Palette;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostpulse")]
#[command(version, about = "Point-in-time health report for this host")]
struct Cli {
    /// YAML configuration; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Print the report as JSON instead of colored text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    info!(backend = ?cfg.backend, "collecting host report");

    let sources = Sources::for_config(&cfg);
    let report = report::collect(&sources, &cfg).await;

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "failed to serialize report");
                std::process::exit(1);
            }
        }
    } else {
        println!("{}", report::render_report(&report, Palette::detect()));
    }
}

/// Diagnostics go to stderr so they never mix with the report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
