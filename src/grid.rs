//! The slice of the world grid a worker owns, plus its ghost halos.
//!
//! A worker owns a vertical strip of blocks, `width` columns wide and
//! `num_blocks` rows tall. Two extra columns of ghosts flank it: the left
//! halo mirrors the left neighbour's rightmost column and the right halo the
//! right neighbour's leftmost, refreshed every tick. Every robot lives in
//! exactly one owned cell of exactly one worker; ghosts are positional copies
//! with no identity.

use std::mem;

use crate::net::message::{BlockStat, GhostStripRow, Message};
use crate::robot::{BlockCoord, Ghost, Robot, Universe};

/// Which neighbour a halo column or outbound set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

pub struct RobotGrid {
    num_blocks: u32,
    left_x_bound: u32,
    right_x_bound: u32,
    width: u32,
    /// Owned cells, row-major: `cells[y * width + x]`.
    cells: Vec<Vec<Robot>>,
    left_halo: Vec<Vec<Ghost>>,
    right_halo: Vec<Vec<Ghost>>,
    /// Robots that left the slice this tick, keyed by their new block,
    /// waiting to be shipped to a neighbour.
    outbound_left: Vec<(BlockCoord, Robot)>,
    outbound_right: Vec<(BlockCoord, Robot)>,
}

impl RobotGrid {
    pub fn new(num_blocks: u32, left_x_bound: u32, right_x_bound: u32) -> Self {
        let width = right_x_bound - left_x_bound + 1;
        Self {
            num_blocks,
            left_x_bound,
            right_x_bound,
            width,
            cells: vec![Vec::new(); (num_blocks * width) as usize],
            left_halo: vec![Vec::new(); num_blocks as usize],
            right_halo: vec![Vec::new(); num_blocks as usize],
            outbound_left: Vec::new(),
            outbound_right: Vec::new(),
        }
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn cell_index(&self, local_x: u32, y: u32) -> usize {
        (y * self.width + local_x) as usize
    }

    /// Insert a robot by its current position, resetting its sensors for the
    /// tick in progress. This is the path for robots arriving off the wire;
    /// returns false when the position falls outside the slice.
    pub fn insert(&mut self, mut robot: Robot, universe: &Universe) -> bool {
        robot.reset_sensors(universe);
        let coord = robot.block_coord(universe, self.num_blocks);
        if coord.x < self.left_x_bound || coord.x > self.right_x_bound || coord.y >= self.num_blocks
        {
            return false;
        }
        self.insert_at(robot, coord);
        true
    }

    /// Insert a robot at an already-computed block within the slice.
    pub fn insert_at(&mut self, robot: Robot, coord: BlockCoord) {
        let local_x = coord.x - self.left_x_bound;
        let index = self.cell_index(local_x, coord.y);
        self.cells[index].push(robot);
    }

    /// Drop all ghosts from both halo columns.
    pub fn clear_ghost_strips(&mut self) {
        for column in self.left_halo.iter_mut().chain(self.right_halo.iter_mut()) {
            column.clear();
        }
    }

    /// Add a received (or handed-off) ghost to a halo column. Returns false
    /// when the row is outside the grid.
    pub fn add_ghost(&mut self, side: Side, y: u32, ghost: Ghost) -> bool {
        if y >= self.num_blocks {
            return false;
        }
        match side {
            Side::Left => self.left_halo[y as usize].push(ghost),
            Side::Right => self.right_halo[y as usize].push(ghost),
        }
        true
    }

    /// Move every owned robot one tick and reset its sensors. Robots whose
    /// new block lies outside the slice land in the left or right outbound
    /// set; the rest are reinserted locally.
    pub fn advance_robots(&mut self, universe: &Universe) {
        let mut moved: Vec<(BlockCoord, Robot)> = Vec::new();

        for y in 0..self.num_blocks {
            for x in 0..self.width {
                let index = self.cell_index(x, y);
                let mut i = 0;
                while i < self.cells[index].len() {
                    let old = self.cells[index][i].block_coord(universe, self.num_blocks);
                    let new = self.cells[index][i].advance_and_reset_sensors(universe, self.num_blocks);
                    if old != new {
                        let robot = self.cells[index].remove(i);
                        moved.push((new, robot));
                    } else {
                        i += 1;
                    }
                }
            }
        }

        self.outbound_left.clear();
        self.outbound_right.clear();
        for (coord, robot) in moved {
            if coord.x < self.left_x_bound {
                // Unless it wrapped off our right edge onto block zero.
                if self.right_x_bound == self.num_blocks - 1 && coord.x == 0 {
                    self.outbound_right.push((coord, robot));
                } else {
                    self.outbound_left.push((coord, robot));
                }
            } else if coord.x > self.right_x_bound {
                // Unless it wrapped off our left edge onto the last block.
                if self.left_x_bound == 0 && coord.x == self.num_blocks - 1 {
                    self.outbound_left.push((coord, robot));
                } else {
                    self.outbound_right.push((coord, robot));
                }
            } else {
                self.insert_at(robot, coord);
            }
        }
    }

    /// Run the sensor pass: every owned robot against every robot and ghost
    /// in its 3×3 block neighbourhood, with halo columns standing in for the
    /// neighbours' edges and rows wrapping around the torus.
    pub fn refresh_sensors(&mut self, universe: &Universe) {
        let mut candidates: Vec<(u32, i32, i32)> = Vec::new();

        for y in 0..self.num_blocks {
            for local_x in 0..self.width {
                // Halo-inclusive column index: 0 is the left halo, width + 1
                // the right halo, owned columns sit in between.
                let x = local_x + 1;
                let top = self.wrap_y(y as i64 - 1);
                let bottom = self.wrap_y(y as i64 + 1);

                candidates.clear();
                for (cx, cy) in [
                    (x - 1, top),
                    (x, top),
                    (x + 1, top),
                    (x - 1, y),
                    (x, y),
                    (x + 1, y),
                    (x - 1, bottom),
                    (x, bottom),
                    (x + 1, bottom),
                ] {
                    self.gather_candidates(cx, cy, &mut candidates);
                }

                let index = self.cell_index(local_x, y);
                for robot in &mut self.cells[index] {
                    for &(id, cx, cy) in &candidates {
                        robot.sense(universe, id, cx, cy);
                    }
                }
            }
        }
    }

    fn gather_candidates(&self, column: u32, y: u32, out: &mut Vec<(u32, i32, i32)>) {
        if column == 0 {
            for ghost in &self.left_halo[y as usize] {
                out.push((0, ghost.x, ghost.y));
            }
        } else if column == self.width + 1 {
            for ghost in &self.right_halo[y as usize] {
                out.push((0, ghost.x, ghost.y));
            }
        } else {
            let index = self.cell_index(column - 1, y);
            for robot in &self.cells[index] {
                out.push((robot.id, robot.x, robot.y));
            }
        }
    }

    fn wrap_y(&self, y: i64) -> u32 {
        let last = self.num_blocks as i64 - 1;
        if y < 0 {
            last as u32
        } else if y > last {
            0
        } else {
            y as u32
        }
    }

    /// Pick new speeds for every owned robot from its sensor state.
    pub fn choose_motions(&mut self, universe: &Universe) {
        for cell in &mut self.cells {
            for robot in cell {
                robot.choose_motion(universe);
            }
        }
    }

    /// Build the GHOST_STRIP message for one edge column: for every row, the
    /// world block coordinate and the ghost form of each robot in it.
    pub fn ghost_strip_message(&self, side: Side) -> Message {
        let (local_x, world_x) = match side {
            Side::Left => (0, self.left_x_bound),
            Side::Right => (self.width - 1, self.right_x_bound),
        };
        let rows = (0..self.num_blocks)
            .map(|y| GhostStripRow {
                x: world_x,
                y,
                ghosts: self.cells[self.cell_index(local_x, y)]
                    .iter()
                    .map(Ghost::of)
                    .collect(),
            })
            .collect();
        Message::GhostStrip(rows)
    }

    /// Build the ADD_ROBOTS message for one side, consuming that outbound
    /// set. Each handed-off robot is also inserted as a ghost into our own
    /// halo on that side, so the sensor pass of this tick still sees it
    /// without waiting for it to come back in the next ghost strip.
    pub fn take_moved_robots(&mut self, side: Side) -> Message {
        let moved = match side {
            Side::Left => mem::take(&mut self.outbound_left),
            Side::Right => mem::take(&mut self.outbound_right),
        };
        let mut robots = Vec::with_capacity(moved.len());
        for (coord, robot) in moved {
            let ghost = Ghost::of(&robot);
            match side {
                Side::Left => self.left_halo[coord.y as usize].push(ghost),
                Side::Right => self.right_halo[coord.y as usize].push(ghost),
            }
            robots.push(robot);
        }
        Message::AddRobots(robots)
    }

    /// Per-block robot counts for the visualization feed.
    pub fn frame_stats_message(&self) -> Message {
        let mut stats = Vec::with_capacity((self.num_blocks * self.width) as usize);
        for y in 0..self.num_blocks {
            for x in 0..self.width {
                stats.push(BlockStat {
                    x: self.left_x_bound + x,
                    y,
                    count: self.cells[self.cell_index(x, y)].len() as u32,
                });
            }
        }
        Message::FrameFinishedWithStats(stats)
    }

    /// Every owned robot in NORMAL form, for the end of the run.
    pub fn final_positions_message(&self) -> Message {
        let robots = self.cells.iter().flatten().cloned().collect();
        Message::FinalPositions(robots)
    }

    /// Number of robots currently owned (halos excluded).
    pub fn robot_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    #[cfg(test)]
    fn outbound(&self, side: Side) -> &[(BlockCoord, Robot)] {
        match side {
            Side::Left => &self.outbound_left,
            Side::Right => &self.outbound_right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{millidegrees_to_milliradians, NORMAL_ENCODED_LEN};

    fn universe() -> Universe {
        Universe::new(100, 10, millidegrees_to_milliradians(270_000), false)
    }

    fn robot(id: u32, x: i32, y: i32, heading: i32) -> Robot {
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.id = id;
        r.x = x;
        r.y = y;
        r.heading = heading;
        r
    }

    // Worker 1 of 2 in a 10x10 grid over a 100-unit world: blocks 0..=4.
    fn left_slice() -> RobotGrid {
        RobotGrid::new(10, 0, 4)
    }

    // Worker 2 of 2: blocks 5..=9.
    fn right_slice() -> RobotGrid {
        RobotGrid::new(10, 5, 9)
    }

    #[test]
    fn test_local_move_stays_owned() {
        let u = universe();
        let mut grid = left_slice();
        let mut r = robot(1, 9, 50, 0);
        r.linear_speed = 5;
        grid.insert(r, &u);

        // 9 -> 14 crosses from block 0 into block 1, still inside the slice.
        grid.advance_robots(&u);
        assert_eq!(grid.robot_count(), 1);
        assert!(grid.outbound(Side::Left).is_empty());
        assert!(grid.outbound(Side::Right).is_empty());
    }

    #[test]
    fn test_rightward_exit_is_outbound_right() {
        let u = universe();
        let mut grid = left_slice();
        let mut r = robot(1, 48, 50, 0);
        r.linear_speed = 5;
        grid.insert(r, &u);

        // 48 -> 53: block 5 belongs to the right neighbour.
        grid.advance_robots(&u);
        assert_eq!(grid.robot_count(), 0);
        assert_eq!(grid.outbound(Side::Right).len(), 1);
        assert_eq!(grid.outbound(Side::Right)[0].0, BlockCoord { x: 5, y: 5 });
    }

    #[test]
    fn test_left_wrap_routes_to_left_neighbour() {
        let u = universe();
        let mut grid = left_slice();
        // Facing -x at x=2: wraps to 98, block 9. Block 9 is far beyond our
        // right bound, but it wrapped off our left edge.
        let mut r = robot(1, 2, 50, 3142);
        r.linear_speed = 5;
        grid.insert(r, &u);

        grid.advance_robots(&u);
        assert_eq!(grid.outbound(Side::Left).len(), 1);
        assert_eq!(grid.outbound(Side::Left)[0].0.x, 9);
        assert!(grid.outbound(Side::Right).is_empty());
    }

    #[test]
    fn test_right_wrap_routes_to_right_neighbour() {
        let u = universe();
        let mut grid = right_slice();
        // Facing +x at x=97: wraps to 2, block 0, off our right edge.
        let mut r = robot(1, 97, 50, 0);
        r.linear_speed = 5;
        grid.insert(r, &u);

        grid.advance_robots(&u);
        assert_eq!(grid.outbound(Side::Right).len(), 1);
        assert_eq!(grid.outbound(Side::Right)[0].0.x, 0);
        assert!(grid.outbound(Side::Left).is_empty());
    }

    #[test]
    fn test_ghost_strip_carries_edge_column() {
        let u = universe();
        let mut grid = right_slice();
        grid.insert(robot(1, 52, 13, 0), &u);
        grid.insert(robot(2, 53, 17, 0), &u);
        grid.insert(robot(3, 97, 13, 0), &u);

        match grid.ghost_strip_message(Side::Left) {
            Message::GhostStrip(rows) => {
                assert_eq!(rows.len(), 10);
                assert!(rows.iter().all(|row| row.x == 5));
                assert_eq!(rows[1].ghosts.len(), 2);
                assert_eq!(rows[1].y, 1);
            }
            other => panic!("built {:?}", other),
        }

        match grid.ghost_strip_message(Side::Right) {
            Message::GhostStrip(rows) => {
                assert_eq!(rows[1].ghosts.len(), 1);
                assert_eq!(rows[1].ghosts[0].x, 97);
            }
            other => panic!("built {:?}", other),
        }
    }

    #[test]
    fn test_handed_off_robot_shadows_own_halo() {
        let u = universe();
        let mut grid = left_slice();
        let mut r = robot(1, 48, 50, 0);
        r.linear_speed = 5;
        grid.insert(r, &u);
        grid.advance_robots(&u);

        let message = grid.take_moved_robots(Side::Right);
        match message {
            Message::AddRobots(robots) => {
                assert_eq!(robots.len(), 1);
                assert_eq!(robots[0].x, 53);
            }
            other => panic!("built {:?}", other),
        }

        // The departed robot is still visible to our sensor pass through the
        // right halo this tick.
        grid.insert(robot(2, 47, 53, 0), &u);
        grid.refresh_sensors(&u);
        let watcher = grid.cells.iter().flatten().find(|r| r.id == 2).unwrap();
        assert!(watcher.closest_pixel() >= 0);
    }

    #[test]
    fn test_sensing_across_halo_and_row_wrap() {
        let u = universe();
        let mut grid = left_slice();
        let mut r = robot(1, 48, 2, 0);
        r.reset_sensors(&u);
        grid.insert_at(r, BlockCoord { x: 4, y: 0 });

        // Neighbour-owned robot one block to the right, one row up across
        // the y wrap.
        grid.add_ghost(Side::Right, 9, Ghost { x: 53, y: 97 });

        grid.refresh_sensors(&u);
        let sensed = grid.cells.iter().flatten().find(|r| r.id == 1).unwrap();
        assert!(sensed.closest_range() < 10);
    }

    #[test]
    fn test_clear_ghost_strips_drops_all_ghosts() {
        let mut grid = left_slice();
        grid.add_ghost(Side::Left, 3, Ghost { x: 99, y: 30 });
        grid.add_ghost(Side::Right, 4, Ghost { x: 50, y: 40 });
        grid.clear_ghost_strips();
        assert!(grid.left_halo.iter().all(Vec::is_empty));
        assert!(grid.right_halo.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_ghost_row_out_of_range_is_rejected() {
        let mut grid = left_slice();
        assert!(!grid.add_ghost(Side::Left, 10, Ghost { x: 0, y: 0 }));
    }

    #[test]
    fn test_frame_stats_cover_every_owned_block() {
        let u = universe();
        let mut grid = left_slice();
        grid.insert(robot(1, 12, 12, 0), &u);
        grid.insert(robot(2, 12, 13, 0), &u);

        match grid.frame_stats_message() {
            Message::FrameFinishedWithStats(stats) => {
                assert_eq!(stats.len(), 50);
                let total: u32 = stats.iter().map(|s| s.count).sum();
                assert_eq!(total, 2);
                let busy = stats.iter().find(|s| s.count == 2).unwrap();
                assert_eq!((busy.x, busy.y), (1, 1));
            }
            other => panic!("built {:?}", other),
        }
    }

    #[test]
    fn test_final_positions_list_every_owned_robot() {
        let u = universe();
        let mut grid = right_slice();
        grid.insert(robot(4, 60, 60, -3000), &u);
        grid.insert(robot(5, 70, 70, 0), &u);

        match grid.final_positions_message() {
            Message::FinalPositions(robots) => {
                assert_eq!(robots.len(), 2);
                assert!(robots.iter().any(|r| r.id == 4 && r.heading == -3000));
            }
            other => panic!("built {:?}", other),
        }
    }

    #[test]
    fn test_conservation_under_advance() {
        let u = universe();
        let mut grid = left_slice();
        for id in 1..=20 {
            let mut r = robot(id, (id as i32 * 7) % 50, (id as i32 * 13) % 100, (id as i32 * 500) % 3000);
            r.linear_speed = 5;
            grid.insert(r, &u);
        }

        grid.advance_robots(&u);
        let owned = grid.robot_count();
        let outbound =
            grid.outbound(Side::Left).len() + grid.outbound(Side::Right).len();
        assert_eq!(owned + outbound, 20);
    }
}
