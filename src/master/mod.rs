//! The master process: lobby, ring wiring, barrier-phased setup, frame
//! accounting, and the final position dump.

mod connection;
pub mod viz;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::net::message::BlockStat;
use crate::net::NetError;
use crate::rng::Rand48;
use crate::robot::Robot;
use crate::sync::Rendezvous;
use viz::{DensityFeed, DensityFrame};

/// How many completed ticks between FPS reports.
const UPDATE_FRAME_COUNT_PERIOD: u32 = 10;

/// State shared between the master main task and its connection tasks.
pub(crate) struct MasterShared {
    pub config: SimConfig,
    /// Worker addresses in join order; a worker's id is its position + 1.
    lobby: Mutex<Vec<String>>,
    /// All robots: generated up front, overwritten by final positions.
    robots: Mutex<Vec<Robot>>,
    /// Per-worker initial robot shares, filled while the workers wait.
    shares: Mutex<Vec<Vec<Robot>>>,
    clock: Mutex<FrameClock>,
    /// Per-worker count of ticks this worker closed (debug mode).
    slowest: Mutex<Vec<u32>>,
    viz: Option<Mutex<DensityFeed>>,
    frames: watch::Sender<DensityFrame>,
}

struct FrameClock {
    frames: u32,
    last_fps: Instant,
}

impl MasterShared {
    async fn worker_joined(&self, ip: String) -> u32 {
        let mut lobby = self.lobby.lock().await;
        lobby.push(ip);
        lobby.len() as u32
    }

    async fn take_share(&self, id: u32) -> Vec<Robot> {
        let mut shares = self.shares.lock().await;
        std::mem::take(&mut shares[(id - 1) as usize])
    }

    /// Count one FRAME_FINISHED. Every `num_workers` frames completes a tick;
    /// the worker closing a tick is the slowest of that tick.
    async fn frame_completed(&self, id: u32) {
        let mut clock = self.clock.lock().await;
        clock.frames += 1;
        if clock.frames % self.config.num_workers == 0 {
            let ticks = clock.frames / self.config.num_workers;
            if ticks % UPDATE_FRAME_COUNT_PERIOD == 0 {
                let now = Instant::now();
                let interval = now.duration_since(clock.last_fps).as_secs_f64();
                info!(
                    "[{}] FPS {:.1}",
                    ticks,
                    UPDATE_FRAME_COUNT_PERIOD as f64 / interval
                );
                clock.last_fps = now;
            }
            if self.config.worker_debug {
                self.slowest.lock().await[(id - 1) as usize] += 1;
            }
        }
    }

    async fn record_frame_stats(&self, stats: &[BlockStat]) {
        if let Some(feed) = &self.viz {
            let mut feed = feed.lock().await;
            for stat in stats {
                if let Some(frame) = feed.set_block_stat(stat.x, stat.y, stat.count) {
                    let _ = self.frames.send(frame);
                }
            }
        }
    }

    async fn apply_final_positions(&self, reported: &[Robot]) -> Result<(), NetError> {
        let mut robots = self.robots.lock().await;
        for report in reported {
            let index = report
                .id
                .checked_sub(1)
                .map(|i| i as usize)
                .filter(|&i| i < robots.len())
                .ok_or(NetError::UnknownRobot(report.id))?;
            let robot = &mut robots[index];
            robot.x = report.x;
            robot.y = report.y;
            robot.heading = report.heading;
        }
        Ok(())
    }
}

/// The master node. Bind first, then run to completion; `run` returns every
/// robot with its final position once all workers have reported.
pub struct Master {
    config: SimConfig,
    listener: TcpListener,
    frames: watch::Sender<DensityFrame>,
    frames_rx: watch::Receiver<DensityFrame>,
}

impl Master {
    /// Bind the lobby listener. The configuration must already be validated.
    pub async fn bind(config: SimConfig) -> Result<Self, NetError> {
        let listener = TcpListener::bind(("0.0.0.0", config.master_port)).await?;
        let (frames, frames_rx) = watch::channel(DensityFrame::default());
        Ok(Self { config, listener, frames, frames_rx })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }

    /// Completed density frames, for an external visualization consumer.
    pub fn density_frames(&self) -> watch::Receiver<DensityFrame> {
        self.frames_rx.clone()
    }

    pub async fn run(self) -> Result<Vec<Robot>, NetError> {
        let Master { config, listener, frames, .. } = self;
        let num_workers = config.num_workers as usize;

        info!("Universe master on {}", listener.local_addr()?);
        info!("Waiting for workers to join ({})...", config.num_workers);

        // The whole population, placed up front by the seeded generator.
        let universe = config.universe();
        let mut rng = Rand48::new(0);
        let robots: Vec<Robot> = (1..=config.population)
            .map(|id| Robot::spawn(&mut rng, &universe, id))
            .collect();

        let viz = config
            .visualization
            .then(|| Mutex::new(DensityFeed::new(config.num_blocks, config.population)));

        let (mut barrier, barrier_handle) = Rendezvous::new(num_workers);
        let (ring_tx, ring_rx) = watch::channel(Vec::<String>::new());
        let (join_tx, mut join_rx) = mpsc::channel(num_workers);

        let shared = Arc::new(MasterShared {
            lobby: Mutex::new(Vec::with_capacity(num_workers)),
            robots: Mutex::new(robots),
            shares: Mutex::new(Vec::new()),
            clock: Mutex::new(FrameClock { frames: 0, last_fps: Instant::now() }),
            slowest: Mutex::new(vec![0; num_workers]),
            viz,
            frames,
            config,
        });
        let config = &shared.config;

        // Lobby: accept until every worker has joined, then stop listening.
        let mut joined = 0;
        while joined < num_workers {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    stream.set_nodelay(true)?;
                    debug!("New TCP connection with '{}'", addr);
                    tokio::spawn(connection::handle_connection(
                        stream,
                        addr,
                        shared.clone(),
                        barrier_handle.clone(),
                        ring_rx.clone(),
                        join_tx.clone(),
                    ));
                }
                Some(()) = join_rx.recv() => joined += 1,
            }
        }
        drop(listener);
        info!("All workers have joined, initializing...");

        // Reveal to each worker where its right neighbour listens.
        let ips = shared.lobby.lock().await.clone();
        let ring: Vec<String> = (0..num_workers).map(|i| ips[(i + 1) % num_workers].clone()).collect();
        let _ = ring_tx.send(ring);

        barrier.release_and_wait().await?;
        info!("   Peer worker connections established");

        barrier.release_and_wait().await?;
        info!("   Universe parameters set");

        // Split the population by slice while the workers wait for it.
        {
            let robots = shared.robots.lock().await;
            let slice_size = config.slice_size();
            let mut shares = vec![Vec::new(); num_workers];
            for robot in robots.iter() {
                shares[(robot.x / slice_size) as usize].push(robot.clone());
            }
            *shared.shares.lock().await = shares;
        }

        barrier.release_and_wait().await?;
        info!("   Data structures set");
        info!("Universe is ready, beginning simulation");

        let started = Instant::now();

        // Workers run free until every one has delivered FINAL_POSITIONS.
        barrier.release_and_wait().await?;

        let elapsed = started.elapsed().as_secs_f64();
        let robots = shared.robots.lock().await.clone();
        dump_robot_positions(&config.dump_path, &robots)?;
        info!("All done. Elapsed time: {:.2} seconds", elapsed);

        if config.worker_debug {
            let slowest = shared.slowest.lock().await;
            info!("Worker debug info. Slowest for {} updates:", config.num_updates);
            for (i, ip) in ips.iter().enumerate() {
                info!("   {} ({}): {}", ip, i + 1, slowest[i]);
            }
        }

        Ok(robots)
    }
}

fn dump_robot_positions(path: &Path, robots: &[Robot]) -> Result<(), NetError> {
    let mut file = std::fs::File::create(path)?;
    for robot in robots {
        writeln!(file, "{}", robot.dump_line())?;
    }
    Ok(())
}
