//! Worker entry point: join the master, run the simulation, exit.

use clap::Parser;
use tracing::error;

use universe::{Worker, WorkerOptions, BASE_NEIGHBOUR_PORT, SERVER_PORT};

#[derive(Parser)]
#[command(name = "universe-worker", version, about = "Distributed universe worker node")]
struct Args {
    /// Master hostname or IP address
    master: String,

    /// Port the master's lobby listens on
    #[arg(long, default_value_t = SERVER_PORT)]
    master_port: u16,

    /// Base port for worker-to-worker connections (base + worker id)
    #[arg(long, default_value_t = BASE_NEIGHBOUR_PORT)]
    neighbour_port_base: u16,
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
    let options = WorkerOptions {
        master_port: args.master_port,
        neighbour_port_base: args.neighbour_port_base,
    };

    let worker = match Worker::connect(&args.master, options).await {
        Ok(worker) => worker,
        Err(err) => {
            error!("Failed to connect to master: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = worker.run().await {
        error!("Worker failed: {}", err);
        std::process::exit(1);
    }
}
