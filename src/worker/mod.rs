//! The worker process: join the master, wire into the ring, then run the
//! per-tick pipeline until the update limit is reached.

mod peer;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::grid::RobotGrid;
use crate::net::message;
use crate::net::{
    bind_peer_listener, connect_peer, Connection, Message, NetError, BASE_NEIGHBOUR_PORT,
    SERVER_PORT,
};
use crate::robot::Universe;
use crate::sync::{Rendezvous, RendezvousHandle};
use peer::PeerConnection;

/// Connection options; the defaults are the well-known ports.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub master_port: u16,
    pub neighbour_port_base: u16,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self { master_port: SERVER_PORT, neighbour_port_base: BASE_NEIGHBOUR_PORT }
    }
}

/// Everything created once the universe parameters arrive.
pub(crate) struct SimState {
    pub universe: Universe,
    pub grid: RobotGrid,
}

#[derive(Default)]
struct NeighbourSlots {
    left: bool,
    right: bool,
}

/// State shared between the worker main task, the transient listener, and
/// the two peer-connection tasks. The barrier serializes all access to the
/// simulation state; the mutex only makes that safe to express.
pub(crate) struct WorkerShared {
    state: Mutex<Option<SimState>>,
    neighbours: StdMutex<NeighbourSlots>,
    left_set: watch::Sender<bool>,
}

impl WorkerShared {
    fn new() -> Self {
        let (left_set, _) = watch::channel(false);
        Self {
            state: Mutex::new(None),
            neighbours: StdMutex::new(NeighbourSlots::default()),
            left_set,
        }
    }

    /// First NEIGHBOUR_REQUEST wins the left slot; a second is a protocol
    /// violation.
    fn claim_left(&self) -> Result<(), NetError> {
        let mut slots = self.neighbours.lock().unwrap_or_else(|e| e.into_inner());
        if slots.left {
            return Err(NetError::NeighbourAlreadySet("left"));
        }
        slots.left = true;
        let _ = self.left_set.send(true);
        Ok(())
    }

    fn claim_right(&self) -> Result<(), NetError> {
        let mut slots = self.neighbours.lock().unwrap_or_else(|e| e.into_inner());
        if slots.right {
            return Err(NetError::NeighbourAlreadySet("right"));
        }
        slots.right = true;
        Ok(())
    }

    async fn with_state<F, T>(&self, f: F) -> Result<T, NetError>
    where
        F: FnOnce(&mut SimState) -> T,
    {
        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(state) => Ok(f(state)),
            None => Err(NetError::UniverseNotSet),
        }
    }

    async fn install(&self, state: SimState) {
        *self.state.lock().await = Some(state);
    }
}

/// A worker node. Connect to the master, then run to completion.
pub struct Worker {
    master: Connection,
    options: WorkerOptions,
}

impl Worker {
    pub async fn connect(host: &str, options: WorkerOptions) -> Result<Self, NetError> {
        let stream = tokio::net::TcpStream::connect((host, options.master_port)).await?;
        stream.set_nodelay(true)?;
        debug!("Created TCP connection to master at '{}'", host);
        Ok(Self { master: Connection::new(stream)?, options })
    }

    pub async fn run(mut self) -> Result<(), NetError> {
        self.master.send(&Message::Join).await?;
        let Message::JoinAck { id, num_workers } = self.master.expect(message::JOIN_ACK).await?
        else {
            return Err(NetError::MalformedPayload("JOIN_ACK"));
        };
        info!("Connected to master as worker {} of {}", id, num_workers);

        let shared = Arc::new(WorkerShared::new());
        let (mut barrier, barrier_handle) = Rendezvous::new(2);

        // Listen for our left neighbour before telling the master we do.
        let listener = bind_peer_listener(self.options.neighbour_port_base + id as u16)?;
        let left_id = if id == 1 { num_workers } else { id - 1 };
        debug!(
            "Listening for our left neighbour at port {}",
            self.options.neighbour_port_base + id as u16
        );
        tokio::spawn(listen_for_neighbour(
            listener,
            shared.clone(),
            barrier_handle.clone(),
            left_id,
        ));
        self.master.send(&Message::ListeningForNeighbour).await?;

        // Discover and dial our right neighbour.
        let Message::RightNeighbourDiscover { address } =
            self.master.expect(message::RIGHT_NEIGHBOUR_DISCOVER).await?
        else {
            return Err(NetError::MalformedPayload("RIGHT_NEIGHBOUR_DISCOVER"));
        };
        let right_id = if id == num_workers { 1 } else { id + 1 };
        let ip: IpAddr = address
            .parse()
            .map_err(|_| NetError::InvalidAddress(address.clone()))?;
        let port = self.options.neighbour_port_base + right_id as u16;
        debug!("Connecting to our right neighbour '{}'({}) at port {}", address, right_id, port);
        let stream = connect_peer(SocketAddr::new(ip, port)).await?;
        let mut right = Connection::new(stream)?;
        right.send(&Message::NeighbourRequest).await?;
        tokio::spawn(
            PeerConnection::new(
                right,
                shared.clone(),
                barrier_handle.clone(),
                right_id,
                message::NEIGHBOUR_REQUEST_ACK,
            )
            .run(),
        );

        // Both peer channels report in once their handshake lands.
        barrier.release_and_wait().await?;
        info!("Peer worker connections established");
        self.master.send(&Message::NeighboursSet).await?;

        // Universe parameters, then our data structures.
        let Message::SetUniverseParameters(params) =
            self.master.expect(message::SET_UNIVERSE_PARAMETERS).await?
        else {
            return Err(NetError::MalformedPayload("SET_UNIVERSE_PARAMETERS"));
        };
        let universe = Universe::new(
            params.world_size,
            params.robot_range,
            params.fov,
            params.invert_direction,
        );
        let blocks_per_slice = params.num_blocks / num_workers;
        let leftmost = blocks_per_slice * (id - 1);
        let rightmost = blocks_per_slice * id - 1;
        shared
            .install(SimState { universe, grid: RobotGrid::new(params.num_blocks, leftmost, rightmost) })
            .await;
        self.master.send(&Message::UniverseParametersSet).await?;

        // Our share of the population.
        let Message::SetRobots(robots) = self.master.expect(message::SET_ROBOTS).await? else {
            return Err(NetError::MalformedPayload("SET_ROBOTS"));
        };
        shared
            .with_state(|state| {
                let universe = state.universe;
                for robot in robots {
                    if !state.grid.insert(robot, &universe) {
                        return Err(NetError::MalformedPayload("SET_ROBOTS"));
                    }
                }
                Ok(())
            })
            .await??;
        info!("Created and populated data structures");
        self.master.send(&Message::RobotsSet).await?;

        info!("Waiting for master to initiate simulation...");
        self.master.expect(message::START_SIMULATION).await?;
        info!("Running");

        self.simulation_loop(
            &shared,
            &mut barrier,
            params.num_updates,
            params.visualization_enabled,
        )
        .await?;
        info!("Done simulation");
        Ok(())
    }

    async fn simulation_loop(
        &mut self,
        shared: &Arc<WorkerShared>,
        barrier: &mut Rendezvous,
        num_updates: i32,
        visualization: bool,
    ) -> Result<(), NetError> {
        let mut update_count: i32 = 0;

        if num_updates != 0 {
            loop {
                if num_updates > 0 && update_count > num_updates {
                    break;
                }

                shared
                    .with_state(|state| {
                        let universe = state.universe;
                        state.grid.clear_ghost_strips();
                        state.grid.advance_robots(&universe);
                    })
                    .await?;

                // While we wait, each peer channel sends our ghost strip,
                // takes the peer's strip into our halo, sends our moved
                // robots, and takes the peer's moved robots into our cells.
                barrier.release_and_wait().await?;

                shared
                    .with_state(|state| {
                        let universe = state.universe;
                        state.grid.refresh_sensors(&universe);
                        state.grid.choose_motions(&universe);
                    })
                    .await?;

                if num_updates < 0 || update_count <= num_updates - 1 {
                    let frame = if visualization {
                        shared.with_state(|state| state.grid.frame_stats_message()).await?
                    } else {
                        Message::FrameFinished
                    };
                    self.master.send(&frame).await?;
                }
                update_count += 1;
            }
        }

        let final_positions = shared
            .with_state(|state| state.grid.final_positions_message())
            .await?;
        self.master.send(&final_positions).await?;
        Ok(())
    }
}

/// Accept inbound connections until one of them claims the left-neighbour
/// slot, then stop listening.
async fn listen_for_neighbour(
    listener: TcpListener,
    shared: Arc<WorkerShared>,
    barrier: RendezvousHandle,
    left_id: u32,
) {
    let mut left_set = shared.left_set.subscribe();
    loop {
        tokio::select! {
            changed = left_set.changed() => {
                if changed.is_err() || *left_set.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        if stream.set_nodelay(true).is_err() {
                            continue;
                        }
                        debug!("Inbound peer connection from {}", addr);
                        match Connection::new(stream) {
                            Ok(conn) => {
                                tokio::spawn(
                                    PeerConnection::new(
                                        conn,
                                        shared.clone(),
                                        barrier.clone(),
                                        left_id,
                                        message::NEIGHBOUR_REQUEST,
                                    )
                                    .run(),
                                );
                            }
                            Err(error) => debug!("Dropping inbound connection: {}", error),
                        }
                    }
                    Err(error) => debug!("Accept failed: {}", error),
                }
            }
        }
    }
    debug!("Stopped listening for our left neighbour");
}
