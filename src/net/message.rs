//! Typed wire messages and their exact binary layout.
//!
//! A frame payload is a one-byte type tag followed by the fields listed per
//! variant. All multi-byte integers are 32-bit big-endian; robots travel in
//! their NORMAL (16 B), LONG (24 B), or GHOST (8 B) encodings.

use super::{NetError, IP_ADDRESS_LENGTH};
use crate::robot::{Ghost, Robot, GHOST_ENCODED_LEN, LONG_ENCODED_LEN, NORMAL_ENCODED_LEN};

// =============================================================================
// MESSAGE TAGS
// =============================================================================

pub const JOIN: u8 = 0x00;
pub const JOIN_ACK: u8 = 0x01;
pub const LISTENING_FOR_NEIGHBOUR: u8 = 0x02;
pub const RIGHT_NEIGHBOUR_DISCOVER: u8 = 0x03;
pub const NEIGHBOURS_SET: u8 = 0x04;
pub const NEIGHBOUR_REQUEST: u8 = 0x05;
pub const NEIGHBOUR_REQUEST_ACK: u8 = 0x06;
pub const SET_UNIVERSE_PARAMETERS: u8 = 0x07;
pub const UNIVERSE_PARAMETERS_SET: u8 = 0x08;
pub const SET_ROBOTS: u8 = 0x09;
pub const ROBOTS_SET: u8 = 0x0A;
pub const START_SIMULATION: u8 = 0x0B;
pub const GHOST_STRIP: u8 = 0x0C;
pub const ADD_ROBOTS: u8 = 0x0D;
pub const FRAME_FINISHED: u8 = 0x0E;
pub const FRAME_FINISHED_WITH_STATS: u8 = 0x0F;
pub const FINAL_POSITIONS: u8 = 0x10;

/// Universe parameters the master distributes to every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniverseParameters {
    pub world_size: i32,
    pub robot_range: i32,
    /// -1 means no update limit.
    pub num_updates: i32,
    pub num_blocks: u32,
    pub visualization_enabled: bool,
    pub fov: i32,
    pub invert_direction: bool,
}

/// One row of a ghost strip: the world block coordinate of the edge column
/// cell and the ghosts it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostStripRow {
    pub x: u32,
    pub y: u32,
    pub ghosts: Vec<Ghost>,
}

/// Robot count of one block, for the visualization feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStat {
    pub x: u32,
    pub y: u32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub enum Message {
    Join,
    JoinAck { id: u32, num_workers: u32 },
    ListeningForNeighbour,
    RightNeighbourDiscover { address: String },
    NeighboursSet,
    NeighbourRequest,
    NeighbourRequestAck,
    SetUniverseParameters(UniverseParameters),
    UniverseParametersSet,
    SetRobots(Vec<Robot>),
    RobotsSet,
    StartSimulation,
    GhostStrip(Vec<GhostStripRow>),
    AddRobots(Vec<Robot>),
    FrameFinished,
    FrameFinishedWithStats(Vec<BlockStat>),
    FinalPositions(Vec<Robot>),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Join => JOIN,
            Message::JoinAck { .. } => JOIN_ACK,
            Message::ListeningForNeighbour => LISTENING_FOR_NEIGHBOUR,
            Message::RightNeighbourDiscover { .. } => RIGHT_NEIGHBOUR_DISCOVER,
            Message::NeighboursSet => NEIGHBOURS_SET,
            Message::NeighbourRequest => NEIGHBOUR_REQUEST,
            Message::NeighbourRequestAck => NEIGHBOUR_REQUEST_ACK,
            Message::SetUniverseParameters(_) => SET_UNIVERSE_PARAMETERS,
            Message::UniverseParametersSet => UNIVERSE_PARAMETERS_SET,
            Message::SetRobots(_) => SET_ROBOTS,
            Message::RobotsSet => ROBOTS_SET,
            Message::StartSimulation => START_SIMULATION,
            Message::GhostStrip(_) => GHOST_STRIP,
            Message::AddRobots(_) => ADD_ROBOTS,
            Message::FrameFinished => FRAME_FINISHED,
            Message::FrameFinishedWithStats(_) => FRAME_FINISHED_WITH_STATS,
            Message::FinalPositions(_) => FINAL_POSITIONS,
        }
    }

    pub fn name(&self) -> &'static str {
        Self::name_of(self.tag())
    }

    pub fn name_of(tag: u8) -> &'static str {
        match tag {
            JOIN => "JOIN",
            JOIN_ACK => "JOIN_ACK",
            LISTENING_FOR_NEIGHBOUR => "LISTENING_FOR_NEIGHBOUR",
            RIGHT_NEIGHBOUR_DISCOVER => "RIGHT_NEIGHBOUR_DISCOVER",
            NEIGHBOURS_SET => "NEIGHBOURS_SET",
            NEIGHBOUR_REQUEST => "NEIGHBOUR_REQUEST",
            NEIGHBOUR_REQUEST_ACK => "NEIGHBOUR_REQUEST_ACK",
            SET_UNIVERSE_PARAMETERS => "SET_UNIVERSE_PARAMETERS",
            UNIVERSE_PARAMETERS_SET => "UNIVERSE_PARAMETERS_SET",
            SET_ROBOTS => "SET_ROBOTS",
            ROBOTS_SET => "ROBOTS_SET",
            START_SIMULATION => "START_SIMULATION",
            GHOST_STRIP => "GHOST_STRIP",
            ADD_ROBOTS => "ADD_ROBOTS",
            FRAME_FINISHED => "FRAME_FINISHED",
            FRAME_FINISHED_WITH_STATS => "FRAME_FINISHED_WITH_STATS",
            FINAL_POSITIONS => "FINAL_POSITIONS",
            _ => "UNKNOWN",
        }
    }

    /// Encode into a frame payload (tag byte first).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Message::Join
            | Message::ListeningForNeighbour
            | Message::NeighboursSet
            | Message::NeighbourRequest
            | Message::NeighbourRequestAck
            | Message::UniverseParametersSet
            | Message::RobotsSet
            | Message::StartSimulation
            | Message::FrameFinished => {}

            Message::JoinAck { id, num_workers } => {
                put_u32(&mut out, *id);
                put_u32(&mut out, *num_workers);
            }

            Message::RightNeighbourDiscover { address } => {
                put_u32(&mut out, IP_ADDRESS_LENGTH as u32);
                let bytes = address.as_bytes();
                let take = bytes.len().min(IP_ADDRESS_LENGTH);
                out.extend_from_slice(&bytes[..take]);
                out.resize(out.len() + IP_ADDRESS_LENGTH - take, 0);
            }

            Message::SetUniverseParameters(p) => {
                put_u32(&mut out, p.world_size as u32);
                put_u32(&mut out, p.robot_range as u32);
                put_u32(&mut out, p.num_updates as u32);
                put_u32(&mut out, p.num_blocks);
                put_u32(&mut out, p.visualization_enabled as u32);
                put_u32(&mut out, p.fov as u32);
                put_u32(&mut out, p.invert_direction as u32);
            }

            Message::SetRobots(robots) | Message::AddRobots(robots) => {
                put_u32(&mut out, robots.len() as u32);
                for robot in robots {
                    robot.encode_long(&mut out);
                }
            }

            Message::GhostStrip(rows) => {
                for row in rows {
                    put_u32(&mut out, row.x);
                    put_u32(&mut out, row.y);
                    put_u32(&mut out, row.ghosts.len() as u32);
                    for ghost in &row.ghosts {
                        ghost.encode(&mut out);
                    }
                }
            }

            Message::FrameFinishedWithStats(stats) => {
                put_u32(&mut out, stats.len() as u32);
                for stat in stats {
                    put_u32(&mut out, stat.x);
                    put_u32(&mut out, stat.y);
                    put_u32(&mut out, stat.count);
                }
            }

            Message::FinalPositions(robots) => {
                put_u32(&mut out, robots.len() as u32);
                for robot in robots {
                    robot.encode_normal(&mut out);
                }
            }
        }
        out
    }

    /// Decode a frame payload. Any length mismatch is fatal for the
    /// connection that produced it.
    pub fn decode(payload: &[u8]) -> Result<Message, NetError> {
        let (&tag, rest) = payload
            .split_first()
            .ok_or(NetError::MalformedPayload("empty"))?;

        match tag {
            JOIN => expect_empty(rest, Message::Join),
            LISTENING_FOR_NEIGHBOUR => expect_empty(rest, Message::ListeningForNeighbour),
            NEIGHBOURS_SET => expect_empty(rest, Message::NeighboursSet),
            NEIGHBOUR_REQUEST => expect_empty(rest, Message::NeighbourRequest),
            NEIGHBOUR_REQUEST_ACK => expect_empty(rest, Message::NeighbourRequestAck),
            UNIVERSE_PARAMETERS_SET => expect_empty(rest, Message::UniverseParametersSet),
            ROBOTS_SET => expect_empty(rest, Message::RobotsSet),
            START_SIMULATION => expect_empty(rest, Message::StartSimulation),
            FRAME_FINISHED => expect_empty(rest, Message::FrameFinished),

            JOIN_ACK => {
                if rest.len() != 8 {
                    return Err(NetError::MalformedPayload("JOIN_ACK"));
                }
                Ok(Message::JoinAck {
                    id: get_u32(rest, 0),
                    num_workers: get_u32(rest, 4),
                })
            }

            RIGHT_NEIGHBOUR_DISCOVER => {
                if rest.len() < 4 {
                    return Err(NetError::MalformedPayload("RIGHT_NEIGHBOUR_DISCOVER"));
                }
                let len = get_u32(rest, 0) as usize;
                if rest.len() != 4 + len {
                    return Err(NetError::MalformedPayload("RIGHT_NEIGHBOUR_DISCOVER"));
                }
                let text = &rest[4..4 + len];
                let end = text.iter().position(|&b| b == 0).unwrap_or(len);
                let address = std::str::from_utf8(&text[..end])
                    .map_err(|_| NetError::MalformedPayload("RIGHT_NEIGHBOUR_DISCOVER"))?
                    .to_string();
                Ok(Message::RightNeighbourDiscover { address })
            }

            SET_UNIVERSE_PARAMETERS => {
                if rest.len() != 28 {
                    return Err(NetError::MalformedPayload("SET_UNIVERSE_PARAMETERS"));
                }
                Ok(Message::SetUniverseParameters(UniverseParameters {
                    world_size: get_u32(rest, 0) as i32,
                    robot_range: get_u32(rest, 4) as i32,
                    num_updates: get_u32(rest, 8) as i32,
                    num_blocks: get_u32(rest, 12),
                    visualization_enabled: get_u32(rest, 16) == 1,
                    fov: get_u32(rest, 20) as i32,
                    invert_direction: get_u32(rest, 24) == 1,
                }))
            }

            SET_ROBOTS => Ok(Message::SetRobots(decode_long_robots(rest, "SET_ROBOTS")?)),
            ADD_ROBOTS => Ok(Message::AddRobots(decode_long_robots(rest, "ADD_ROBOTS")?)),

            GHOST_STRIP => {
                let mut rows = Vec::new();
                let mut at = 0;
                while at < rest.len() {
                    if rest.len() - at < 12 {
                        return Err(NetError::MalformedPayload("GHOST_STRIP"));
                    }
                    let x = get_u32(rest, at);
                    let y = get_u32(rest, at + 4);
                    let count = get_u32(rest, at + 8) as usize;
                    at += 12;
                    if rest.len() - at < count * GHOST_ENCODED_LEN {
                        return Err(NetError::MalformedPayload("GHOST_STRIP"));
                    }
                    let mut ghosts = Vec::with_capacity(count);
                    for _ in 0..count {
                        ghosts.push(Ghost::decode(&rest[at..at + GHOST_ENCODED_LEN]));
                        at += GHOST_ENCODED_LEN;
                    }
                    rows.push(GhostStripRow { x, y, ghosts });
                }
                Ok(Message::GhostStrip(rows))
            }

            FRAME_FINISHED_WITH_STATS => {
                if rest.len() < 4 {
                    return Err(NetError::MalformedPayload("FRAME_FINISHED_WITH_STATS"));
                }
                let count = get_u32(rest, 0) as usize;
                if rest.len() != 4 + count * 12 {
                    return Err(NetError::MalformedPayload("FRAME_FINISHED_WITH_STATS"));
                }
                let mut stats = Vec::with_capacity(count);
                for i in 0..count {
                    let at = 4 + i * 12;
                    stats.push(BlockStat {
                        x: get_u32(rest, at),
                        y: get_u32(rest, at + 4),
                        count: get_u32(rest, at + 8),
                    });
                }
                Ok(Message::FrameFinishedWithStats(stats))
            }

            FINAL_POSITIONS => {
                if rest.len() < 4 {
                    return Err(NetError::MalformedPayload("FINAL_POSITIONS"));
                }
                let count = get_u32(rest, 0) as usize;
                if rest.len() != 4 + count * NORMAL_ENCODED_LEN {
                    return Err(NetError::MalformedPayload("FINAL_POSITIONS"));
                }
                let mut robots = Vec::with_capacity(count);
                for i in 0..count {
                    let at = 4 + i * NORMAL_ENCODED_LEN;
                    robots.push(Robot::from_normal(&rest[at..at + NORMAL_ENCODED_LEN]));
                }
                Ok(Message::FinalPositions(robots))
            }

            other => Err(NetError::UnknownTag(other)),
        }
    }
}

fn decode_long_robots(rest: &[u8], what: &'static str) -> Result<Vec<Robot>, NetError> {
    if rest.len() < 4 {
        return Err(NetError::MalformedPayload(what));
    }
    let count = get_u32(rest, 0) as usize;
    if rest.len() != 4 + count * LONG_ENCODED_LEN {
        return Err(NetError::MalformedPayload(what));
    }
    let mut robots = Vec::with_capacity(count);
    for i in 0..count {
        let at = 4 + i * LONG_ENCODED_LEN;
        robots.push(Robot::from_long(&rest[at..at + LONG_ENCODED_LEN]));
    }
    Ok(robots)
}

fn expect_empty(rest: &[u8], msg: Message) -> Result<Message, NetError> {
    if rest.is_empty() {
        Ok(msg)
    } else {
        Err(NetError::MalformedPayload(msg.name()))
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        Message::decode(&msg.encode()).unwrap()
    }

    #[test]
    fn test_bare_messages_are_one_byte() {
        for msg in [Message::Join, Message::NeighbourRequest, Message::FrameFinished] {
            let payload = msg.encode();
            assert_eq!(payload.len(), 1);
            assert_eq!(Message::decode(&payload).unwrap().tag(), msg.tag());
        }
    }

    #[test]
    fn test_join_ack_layout() {
        let payload = Message::JoinAck { id: 3, num_workers: 4 }.encode();
        assert_eq!(payload, vec![0x01, 0, 0, 0, 3, 0, 0, 0, 4]);
        match round_trip(Message::JoinAck { id: 3, num_workers: 4 }) {
            Message::JoinAck { id, num_workers } => assert_eq!((id, num_workers), (3, 4)),
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn test_neighbour_discover_pads_and_trims() {
        let payload = Message::RightNeighbourDiscover { address: "10.0.0.7".into() }.encode();
        assert_eq!(payload.len(), 1 + 4 + IP_ADDRESS_LENGTH);
        match Message::decode(&payload).unwrap() {
            Message::RightNeighbourDiscover { address } => assert_eq!(address, "10.0.0.7"),
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn test_universe_parameters_round_trip() {
        let params = UniverseParameters {
            world_size: 1000,
            robot_range: 100,
            num_updates: -1,
            num_blocks: 10,
            visualization_enabled: true,
            fov: 4713,
            invert_direction: false,
        };
        let payload = Message::SetUniverseParameters(params).encode();
        assert_eq!(payload.len(), 29);
        match Message::decode(&payload).unwrap() {
            Message::SetUniverseParameters(p) => assert_eq!(p, params),
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn test_ghost_strip_rows() {
        let rows = vec![
            GhostStripRow { x: 4, y: 0, ghosts: vec![Ghost { x: 450, y: 12 }] },
            GhostStripRow { x: 4, y: 1, ghosts: vec![] },
        ];
        match round_trip(Message::GhostStrip(rows.clone())) {
            Message::GhostStrip(back) => assert_eq!(back, rows),
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn test_add_robots_carries_speeds() {
        let mut robot = Robot::from_long(&[0; 24]);
        robot.id = 9;
        robot.x = 501;
        robot.heading = -3000;
        robot.linear_speed = 5;
        robot.angular_speed = -40;
        match round_trip(Message::AddRobots(vec![robot.clone()])) {
            Message::AddRobots(robots) => {
                assert_eq!(robots[0].heading, -3000);
                assert_eq!(robots[0].angular_speed, -40);
            }
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_tag_and_truncation() {
        assert!(matches!(Message::decode(&[0x77]), Err(NetError::UnknownTag(0x77))));
        assert!(matches!(Message::decode(&[]), Err(NetError::MalformedPayload(_))));

        // SET_ROBOTS claiming two robots but carrying bytes for one.
        let mut payload = vec![SET_ROBOTS, 0, 0, 0, 2];
        payload.extend_from_slice(&[0; 24]);
        assert!(matches!(
            Message::decode(&payload),
            Err(NetError::MalformedPayload("SET_ROBOTS"))
        ));
    }
}
