//! Master entry point: validate the configuration, host the lobby, run the
//! simulation, dump the final positions.

use clap::Parser;
use tracing::{error, info};

use universe::config::{self, ConfigError, SimConfig};
use universe::robot::millidegrees_to_milliradians;
use universe::Master;

#[derive(Parser)]
#[command(name = "universe-master", version, about = "Distributed universe master node")]
struct Args {
    /// The number of worker nodes to use
    #[arg(short = 'n', long)]
    num_workers: u32,

    /// The number of robots in the universe
    #[arg(short = 'p', long)]
    population: u32,

    /// The number of updates to run before quitting [default: no limit]
    #[arg(short = 'u', long)]
    num_updates: Option<i32>,

    /// The side length of the (square) world
    #[arg(short = 's', long, default_value_t = config::DEFAULT_WORLD_SIZE)]
    world_size: i32,

    /// A robot's sensor field of view range
    #[arg(short = 'r', long, default_value_t = config::DEFAULT_ROBOT_RANGE)]
    robot_range: i32,

    /// The number of blocks to subdivide the 2D space into (NxN)
    /// [default: maximum possible]
    #[arg(short = 'b', long)]
    num_blocks: Option<u32>,

    /// The field of view of a robot's sensors in degrees
    #[arg(short = 'f', long, default_value_t = config::DEFAULT_FOV_DEGREES)]
    fov: i32,

    /// Invert robot direction behavior: move toward others instead of away
    #[arg(short = 'i', long)]
    invert: bool,

    /// Enable worker debugging to identify a slow worker (with '-u')
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable the visualization feed
    #[arg(short = 'v', long)]
    visualization: bool,
}

fn build_config(args: Args) -> Result<SimConfig, ConfigError> {
    if matches!(args.num_updates, Some(updates) if updates < 0) {
        return Err(ConfigError::NegativeUpdates);
    }

    let mut config = SimConfig::new(args.num_workers, args.population);
    config.num_updates = args.num_updates.unwrap_or(-1);
    config.world_size = args.world_size;
    config.robot_range = args.robot_range;
    config.num_blocks = args
        .num_blocks
        .unwrap_or_else(|| config::max_num_blocks(args.world_size, args.robot_range.max(1)));
    config.fov = millidegrees_to_milliradians(args.fov.saturating_mul(1000));
    config.invert_direction = args.invert;
    config.worker_debug = args.debug;
    config.visualization = args.visualization;

    if let Err(err) = config.validate() {
        if matches!(
            err,
            ConfigError::IndivisibleSlices { .. } | ConfigError::MisalignedSlices { .. }
        ) {
            let counts: Vec<String> = config
                .valid_worker_counts()
                .iter()
                .map(u32::to_string)
                .collect();
            error!(
                "Valid number of workers for the desired configuration are: {}",
                counts.join(", ")
            );
        }
        return Err(err);
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("universe=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = match build_config(args) {
        Ok(config) => config,
        Err(error) => {
            error!("{}", error);
            eprintln!("Usage: universe-master [OPTIONS] -n <num_workers> -p <population>");
            std::process::exit(1);
        }
    };

    for line in config.summary().lines() {
        info!("{}", line);
    }

    let master = match Master::bind(config).await {
        Ok(master) => master,
        Err(error) => {
            error!("Failed to start master: {}", error);
            std::process::exit(1);
        }
    };

    if let Err(error) = master.run().await {
        error!("Master failed: {}", error);
        std::process::exit(1);
    }
}
