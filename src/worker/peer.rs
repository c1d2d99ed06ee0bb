//! Worker-to-worker peer connections.
//!
//! Each worker holds two of these, one per ring neighbour, each driven by its
//! own task. The accepted side becomes the left peer on NEIGHBOUR_REQUEST;
//! the dialing side becomes the right peer on NEIGHBOUR_REQUEST_ACK. After
//! the handshake a channel settles into the per-tick rhythm: send our ghost
//! strip, take the peer's ghost strip into our halo, send our moved robots,
//! take the peer's moved robots into our owned cells, then park on the
//! barrier until the main task finishes the next move phase.

use std::sync::Arc;

use tracing::{debug, error};

use super::WorkerShared;
use crate::grid::Side;
use crate::net::{message, Connection, Message, NetError};
use crate::sync::RendezvousHandle;

pub(crate) struct PeerConnection {
    conn: Connection,
    shared: Arc<WorkerShared>,
    barrier: RendezvousHandle,
    neighbour_id: u32,
    next_expected: u8,
    side: Option<Side>,
    neighboured: bool,
}

impl PeerConnection {
    pub fn new(
        conn: Connection,
        shared: Arc<WorkerShared>,
        barrier: RendezvousHandle,
        neighbour_id: u32,
        first_expected: u8,
    ) -> Self {
        Self {
            conn,
            shared,
            barrier,
            neighbour_id,
            next_expected: first_expected,
            side: None,
            neighboured: false,
        }
    }

    pub async fn run(mut self) {
        if let Err(err) = self.drive().await {
            // Only fail loudly for a functioning neighbour; anything else is
            // a stray connection we can drop on the floor.
            if self.neighboured {
                error!(
                    "Peer '{}'({}) connection failed: {}",
                    self.conn.peer_addr, self.neighbour_id, err
                );
                self.barrier.fail(err).await;
            } else {
                debug!(
                    "Closing non-neighbour connection from {}: {}",
                    self.conn.peer_addr, err
                );
            }
        }
    }

    async fn drive(&mut self) -> Result<(), NetError> {
        loop {
            let msg = self.conn.expect(self.next_expected).await?;
            match msg {
                Message::NeighbourRequest => {
                    self.shared.claim_left()?;
                    self.side = Some(Side::Left);
                    self.conn.send(&Message::NeighbourRequestAck).await?;
                    self.neighboured = true;
                    debug!(
                        "Connected to left neighbour '{}'({})",
                        self.conn.peer_addr, self.neighbour_id
                    );
                    if self.barrier.done_and_wait().await.is_err() {
                        return Ok(());
                    }
                    self.send_ghost_strip().await?;
                    self.next_expected = message::GHOST_STRIP;
                }

                Message::NeighbourRequestAck => {
                    self.shared.claim_right()?;
                    self.side = Some(Side::Right);
                    self.neighboured = true;
                    debug!(
                        "Connected to right neighbour '{}'({})",
                        self.conn.peer_addr, self.neighbour_id
                    );
                    if self.barrier.done_and_wait().await.is_err() {
                        return Ok(());
                    }
                    self.send_ghost_strip().await?;
                    self.next_expected = message::GHOST_STRIP;
                }

                Message::GhostStrip(rows) => {
                    let side = self.side()?;
                    let moved = self
                        .shared
                        .with_state(|state| {
                            for row in rows {
                                for ghost in row.ghosts {
                                    if !state.grid.add_ghost(side, row.y, ghost) {
                                        return Err(NetError::MalformedPayload("GHOST_STRIP"));
                                    }
                                }
                            }
                            Ok(state.grid.take_moved_robots(side))
                        })
                        .await??;
                    self.conn.send(&moved).await?;
                    self.next_expected = message::ADD_ROBOTS;
                }

                Message::AddRobots(robots) => {
                    self.shared
                        .with_state(|state| {
                            let universe = state.universe;
                            for robot in robots {
                                if !state.grid.insert(robot, &universe) {
                                    return Err(NetError::MalformedPayload("ADD_ROBOTS"));
                                }
                            }
                            Ok(())
                        })
                        .await??;
                    if self.barrier.done_and_wait().await.is_err() {
                        return Ok(());
                    }
                    self.send_ghost_strip().await?;
                    self.next_expected = message::GHOST_STRIP;
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

    fn side(&self) -> Result<Side, NetError> {
        self.side.ok_or(NetError::NotNeighboured)
    }

    async fn send_ghost_strip(&mut self) -> Result<(), NetError> {
        let side = self.side()?;
        let strip = self
            .shared
            .with_state(|state| state.grid.ghost_strip_message(side))
            .await?;
        self.conn.send(&strip).await
    }
}
