use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use drillroom_bus::EventBus;
use drillroom_core::{load_config, Generators, Orchestrator};
use drillroom_scheduler::TurnPlan;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const BUS_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "drillroom", version, about = "Incident-response interview simulator")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Project root directory (contains config/ and logs/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides server.port)")]
        port: Option<u16>,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(about = "Print the turn plan a session of the given length would use")]
    Plan {
        #[arg(long, default_value = "600", help = "Session duration in seconds")]
        duration: u64,
        #[arg(long, help = "Seed for the planned offsets")]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "drillroom.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Serve { port } => serve(&cli.config_root, port).await?,
        Commands::Validate => {
            let config = load_config(&cli.config_root.join("config"))?;
            let generators = Generators::from_config(&config);
            println!(
                "Config valid. {} providers, delivery {:?}, {}.",
                config.providers.len(),
                config.main.delivery.mode,
                if generators.is_offline() {
                    "heuristic replies only"
                } else {
                    "generative replies enabled"
                }
            );
        }
        Commands::Plan { duration, seed } => print_plan(&cli.config_root, duration, seed)?,
    }

    Ok(())
}

async fn serve(root: &Path, port: Option<u16>) -> Result<()> {
    let config = load_config(&root.join("config"))?;
    let bus = Arc::new(EventBus::new(BUS_CAPACITY));
    let orchestrator = Arc::new(Orchestrator::from_config(&config, bus.publisher())?);
    let state = drillroom_server::state::AppState::new(orchestrator, Arc::clone(&bus), &config);

    let server = &config.main.server;
    let addr = format!("{}:{}", server.host, port.unwrap_or(server.port));
    drillroom_server::serve(state, &addr).await
}

fn print_plan(root: &Path, duration: u64, seed: Option<u64>) -> Result<()> {
    let scheduler = match load_config(&root.join("config")) {
        Ok(config) => config.main.orchestrator,
        Err(e) => {
            tracing::warn!(error = %e, "config not loaded, using scheduler defaults");
            Default::default()
        }
    };
    let duration = scheduler.effective_duration(Some(duration));
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let plan = TurnPlan::materialize(duration, scheduler.compressed_max_duration_sec, &mut rng);

    println!(
        "{} beats over {}s ({})",
        plan.len(),
        plan.duration_sec(),
        if plan.is_compressed() { "compressed" } else { "full" }
    );
    for (index, beat) in plan.beats().iter().enumerate() {
        println!(
            "{:>2}  {:<10} {:<32} {}{}",
            index,
            beat.role.as_str(),
            beat.intent,
            beat.window_label(),
            if beat.anchor { "  anchor" } else { "" }
        );
    }
    Ok(())
}
