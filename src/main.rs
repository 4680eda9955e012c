use anyhow::Context;
use clap::Parser;
use lanesim::{
    demand, load_agents, output, DijkstraRouter, Lanemap, RoadNetwork, RouteAssigner, Simulation,
    SimulationConfig,
};
use log::info;
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "lanesim")]
#[command(about = "Lane-level traffic microsimulation")]
struct Cli {
    /// Road network CSV: source,target,length,lanes,speed_limit
    #[arg(long)]
    network: PathBuf,

    /// Trip demand CSV: origin,destination,departure
    #[arg(long)]
    demand: PathBuf,

    /// JSON simulation parameters; defaults are used for missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulation start time in seconds
    #[arg(long, default_value = "0")]
    start: f64,

    /// Simulation end time in seconds
    #[arg(long, default_value = "86400")]
    end: f64,

    /// Standard deviation of the agents' velocity factors; 0 disables
    #[arg(long, default_value = "0")]
    velocity_stddev: f64,

    /// Seed for the velocity factors
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Directory the result files are written to
    #[arg(long, default_value = "results")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SimulationConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    let network = RoadNetwork::from_csv_reader(
        File::open(&cli.network).with_context(|| format!("opening {}", cli.network.display()))?,
    )
    .context("reading road network")?;
    let trips = demand::load_csv(
        File::open(&cli.demand).with_context(|| format!("opening {}", cli.demand.display()))?,
    )
    .context("reading demand")?;

    let lanemap = Lanemap::build(&network, &config)?;
    let mut agents = load_agents(&trips);
    RouteAssigner::new(&network, &lanemap, &config)
        .assign(&mut agents, &DijkstraRouter::new(&network))?;

    let mut sim = Simulation::new(lanemap, agents, config)?;
    if cli.velocity_stddev > 0.0 {
        sim.randomise_velocity_factors(cli.velocity_stddev, cli.seed)?;
    }

    let started = Instant::now();
    let summary = sim.run(cli.start, cli.end)?;
    info!(
        "Run took {:.2?} for {} steps ({} arrived)",
        started.elapsed(),
        summary.steps,
        summary.arrived
    );

    output::save_all(&cli.output, &sim).context("saving results")?;
    Ok(())
}
