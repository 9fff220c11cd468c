#![forbid(unsafe_code)]

use std::env;
use std::ops::Range;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use otter_sim::{CampaignConfig, StorageFaults, load_campaign_config, replay_seed, run_campaign};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "otter-sim: seeded convergence campaigns for otter",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run a campaign over a seed range",
        after_help = "EXAMPLES:\n    otter-sim run --seeds 0..500\n    otter-sim run --config campaign.toml --json"
    )]
    Run(RunArgs),

    #[command(
        about = "Replay one seed with its full trace",
        after_help = "EXAMPLES:\n    otter-sim replay 17\n    otter-sim replay 17 --dot | dot -Tsvg > seed17.svg"
    )]
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct CampaignArgs {
    /// TOML campaign file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated replicas per seed.
    #[arg(long)]
    replicas: Option<usize>,

    /// Scripted steps per seed.
    #[arg(long)]
    steps: Option<u64>,

    /// Disable storage fault injection.
    #[arg(long)]
    no_faults: bool,
}

impl CampaignArgs {
    fn load(&self) -> Result<CampaignConfig> {
        let mut config = match &self.config {
            Some(path) => load_campaign_config(path)?,
            None => CampaignConfig::default(),
        };
        if let Some(replicas) = self.replicas {
            config.replicas = replicas;
        }
        if let Some(steps) = self.steps {
            config.steps = steps;
        }
        if self.no_faults {
            config.faults = StorageFaults::none();
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Seed range, `start..end` (end exclusive).
    #[arg(long, value_parser = parse_seed_range)]
    seeds: Option<Range<u64>>,

    #[command(flatten)]
    campaign: CampaignArgs,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    seed: u64,

    /// Print only the final commit graph in Graphviz DOT.
    #[arg(long)]
    dot: bool,

    #[command(flatten)]
    campaign: CampaignArgs,
}

fn parse_seed_range(raw: &str) -> Result<Range<u64>, String> {
    let (start, end) = raw
        .split_once("..")
        .ok_or_else(|| format!("expected start..end, got {raw:?}"))?;
    let start = start.trim().parse::<u64>().map_err(|err| err.to_string())?;
    let end = end.trim().parse::<u64>().map_err(|err| err.to_string())?;
    if start >= end {
        return Err(format!("empty seed range {raw:?}"));
    }
    Ok(start..end)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(&args, cli.json),
        Commands::Replay(args) => replay(&args, cli.json),
    }
}

fn run(args: &RunArgs, json: bool) -> Result<()> {
    let mut config = args.campaign.load()?;
    if let Some(seeds) = &args.seeds {
        config.seed_range = seeds.clone();
    }
    info!(seeds = ?config.seed_range, replicas = config.replicas, "starting campaign");

    let report = run_campaign(&config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "seeds: {} run, {} passed; faults injected: {}; interesting: {}",
            report.seeds_run,
            report.seeds_passed,
            report.faults_injected,
            report.interesting_states_reached
        );
        for failure in &report.failures {
            println!("seed {} failed:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if let Some(seed) = report.first_failure {
        bail!("campaign failed; replay with `otter-sim replay {seed}`");
    }
    Ok(())
}

fn replay(args: &ReplayArgs, json: bool) -> Result<()> {
    let mut config = args.campaign.load()?;
    config.seed_range = args.seed..args.seed.saturating_add(1);
    let trace = replay_seed(args.seed, &config)?;

    if args.dot {
        print!("{}", trace.graphviz);
    } else if json {
        let events = serde_json::to_string_pretty(&trace.result.trace)
            .context("failed to encode trace")?;
        println!("{events}");
    } else {
        for event in &trace.result.trace {
            println!("#{:<4} r{} {:?}", event.step, event.replica, event.kind);
        }
        println!(
            "head: {:?}; merges: {}; faults: {}",
            trace.result.head(),
            trace.result.merges,
            trace.result.faults.total()
        );
        for violation in &trace.oracle.violations {
            println!("violation: {violation}");
        }
    }

    if trace.oracle.passed {
        Ok(())
    } else {
        bail!("seed {} violates {} invariant(s)", args.seed, trace.oracle.violations.len())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("OTTER_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "otter_core=debug,otter_sim=debug,info"
        } else {
            "otter_sim=info,warn"
        })
    });

    let format = env::var("OTTER_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}
