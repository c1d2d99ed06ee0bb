//! Per-worker connection handling on the master.
//!
//! One task per worker drives that worker through the setup state machine and
//! then consumes its frame reports, rendezvousing with the master main task
//! between phases. Receiving anything but the next expected message is fatal
//! for the whole run.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use super::MasterShared;
use crate::net::message::{self, UniverseParameters};
use crate::net::{Connection, Message, NetError};
use crate::sync::RendezvousHandle;

/// Accept-side entry point: field the JOIN, assign the next worker id, then
/// run the connection until the simulation ends.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<MasterShared>,
    barrier: RendezvousHandle,
    ring: watch::Receiver<Vec<String>>,
    joined: mpsc::Sender<()>,
) {
    let ip = addr.ip().to_string();
    let mut conn = match Connection::new(stream) {
        Ok(conn) => conn,
        Err(error) => {
            debug!("Dropping connection from {}: {}", addr, error);
            return;
        }
    };

    // Anything other than a JOIN means this is not a worker; drop it
    // without disturbing the run.
    if let Err(error) = conn.expect(message::JOIN).await {
        debug!("Dropping connection from {}: {}", addr, error);
        return;
    }

    let id = shared.worker_joined(ip.clone()).await;
    let ack = Message::JoinAck { id, num_workers: shared.config.num_workers };
    if let Err(error) = conn.send(&ack).await {
        error!("Worker '{}'({}) connection failed: {}", ip, id, error);
        barrier.fail(error).await;
        return;
    }
    info!("   ({}) '{}' has joined", id, ip);
    let _ = joined.send(()).await;

    let mut connection = WorkerConnection {
        conn,
        shared,
        barrier,
        ring,
        id,
        ip,
        update_count: 0,
        next_expected: message::LISTENING_FOR_NEIGHBOUR,
    };

    if let Err(error) = connection.drive().await {
        error!(
            "Worker '{}'({}) connection failed: {}",
            connection.ip, connection.id, error
        );
        connection.barrier.fail(error).await;
    }
}

struct WorkerConnection {
    conn: Connection,
    shared: Arc<MasterShared>,
    barrier: RendezvousHandle,
    ring: watch::Receiver<Vec<String>>,
    id: u32,
    ip: String,
    update_count: i32,
    next_expected: u8,
}

impl WorkerConnection {
    async fn drive(&mut self) -> Result<(), NetError> {
        // Hold off until the lobby is closed and the ring is wired.
        if self.ring.wait_for(|ring| !ring.is_empty()).await.is_err() {
            return Ok(());
        }

        loop {
            let msg = self.conn.expect(self.next_expected).await?;
            match msg {
                Message::ListeningForNeighbour => self.handle_listening_for_neighbour().await?,
                Message::NeighboursSet => {
                    if self.handle_neighbours_set().await? {
                        return Ok(());
                    }
                }
                Message::UniverseParametersSet => {
                    if self.barrier.done_and_wait().await.is_err() {
                        return Ok(());
                    }
                    self.send_robots().await?;
                    self.next_expected = message::ROBOTS_SET;
                }
                Message::RobotsSet => {
                    if self.handle_robots_set().await? {
                        return Ok(());
                    }
                }
                Message::FrameFinished => self.handle_frame_finished().await,
                Message::FrameFinishedWithStats(stats) => {
                    self.shared.record_frame_stats(&stats).await;
                    self.handle_frame_finished().await;
                }
                Message::FinalPositions(robots) => {
                    self.shared.apply_final_positions(&robots).await?;
                    let _ = self.barrier.done_and_wait().await;
                    return Ok(());
                }
                other => {
                    return Err(NetError::UnexpectedMessage {
                        got: other.name(),
                        expected: Message::name_of(self.next_expected),
                    });
                }
            }
        }
    }

    async fn handle_listening_for_neighbour(&mut self) -> Result<(), NetError> {
        let address = self.ring.borrow()[(self.id - 1) as usize].clone();
        self.conn
            .send(&Message::RightNeighbourDiscover { address })
            .await?;
        self.next_expected = message::NEIGHBOURS_SET;
        Ok(())
    }

    /// Returns true when the run is over (master went away mid-phase).
    async fn handle_neighbours_set(&mut self) -> Result<bool, NetError> {
        if self.barrier.done_and_wait().await.is_err() {
            return Ok(true);
        }
        let config = &self.shared.config;
        self.conn
            .send(&Message::SetUniverseParameters(UniverseParameters {
                world_size: config.world_size,
                robot_range: config.robot_range,
                num_updates: config.num_updates,
                num_blocks: config.num_blocks,
                visualization_enabled: config.visualization,
                fov: config.fov,
                invert_direction: config.invert_direction,
            }))
            .await?;
        self.next_expected = message::UNIVERSE_PARAMETERS_SET;
        Ok(false)
    }

    async fn send_robots(&mut self) -> Result<(), NetError> {
        let robots = self.shared.take_share(self.id).await;
        self.conn.send(&Message::SetRobots(robots)).await
    }

    async fn handle_robots_set(&mut self) -> Result<bool, NetError> {
        if self.barrier.done_and_wait().await.is_err() {
            return Ok(true);
        }
        self.conn.send(&Message::StartSimulation).await?;
        self.next_expected = if self.shared.config.num_updates != 0 {
            if self.shared.config.visualization {
                message::FRAME_FINISHED_WITH_STATS
            } else {
                message::FRAME_FINISHED
            }
        } else {
            message::FINAL_POSITIONS
        };
        Ok(false)
    }

    async fn handle_frame_finished(&mut self) {
        self.shared.frame_completed(self.id).await;
        let num_updates = self.shared.config.num_updates;
        if num_updates >= 0 && self.update_count == num_updates - 1 {
            self.next_expected = message::FINAL_POSITIONS;
        }
        self.update_count += 1;
    }
}
