//! Robots moving on a square toroidal world.
//!
//! All angle and distance arithmetic is 32-bit integer math with float used
//! only for trigonometry, results truncated toward zero. Angles are in
//! milliradians with π approximated as 3142/1000; that approximation decides
//! which sensor pixel a bearing falls in, and therefore the whole simulation
//! trajectory, so it is part of the wire-visible contract.

use crate::rng::Rand48;

/// π in milliradians. Sensor discretization depends on this exact value.
pub const THOUSAND_TIMES_PI: i32 = 3142;

/// Number of bins a robot's field of view is split into.
pub const NUM_PIXELS: i32 = 8;

/// Encoded sizes in bytes for the three wire forms of a robot.
pub const NORMAL_ENCODED_LEN: usize = 16;
pub const LONG_ENCODED_LEN: usize = 24;
pub const GHOST_ENCODED_LEN: usize = 8;

pub fn millidegrees_to_milliradians(millidegrees: i32) -> i32 {
    millidegrees * THOUSAND_TIMES_PI / 180_000
}

pub fn milliradians_to_millidegrees(milliradians: i32) -> i32 {
    milliradians * 180_000 / THOUSAND_TIMES_PI
}

/// Position of a block within the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCoord {
    pub x: u32,
    pub y: u32,
}

/// Immutable universe parameters threaded through every robot and grid
/// operation. Created once per process when the master distributes
/// SET_UNIVERSE_PARAMETERS (or from the CLI on the master itself).
#[derive(Debug, Clone, Copy)]
pub struct Universe {
    pub world_size: i32,
    pub half_world_size: i32,
    pub robot_range: i32,
    pub fov: i32,
    pub milliradians_per_pixel: i32,
    pub invert_direction: bool,
}

impl Universe {
    pub fn new(world_size: i32, robot_range: i32, fov: i32, invert_direction: bool) -> Self {
        Self {
            world_size,
            half_world_size: world_size / 2,
            robot_range,
            fov,
            milliradians_per_pixel: fov / NUM_PIXELS,
            invert_direction,
        }
    }

    /// Normalize an angle into (-π·1000, π·1000].
    pub fn normalize_angle(mut angle: i32) -> i32 {
        while angle < -THOUSAND_TIMES_PI {
            angle += 2 * THOUSAND_TIMES_PI;
        }
        while angle > THOUSAND_TIMES_PI {
            angle -= 2 * THOUSAND_TIMES_PI;
        }
        angle
    }

    /// Normalize a coordinate onto the torus. Leaves `world_size` itself in
    /// range; the block mapping special-cases it.
    pub fn normalize_distance(&self, mut distance: i32) -> i32 {
        while distance < 0 {
            distance += self.world_size;
        }
        while distance > self.world_size {
            distance -= self.world_size;
        }
        distance
    }

    /// Wrap an X or Y delta around the torus so |delta| ≤ half the world.
    pub fn wrap_coordinate(&self, coordinate: i32) -> i32 {
        if coordinate > self.half_world_size {
            coordinate - self.world_size
        } else if coordinate < -self.half_world_size {
            coordinate + self.world_size
        } else {
            coordinate
        }
    }
}

/// A copy of a neighbour-owned robot living in a halo column. Position only;
/// ghosts have no identity and never sense anything themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ghost {
    pub x: i32,
    pub y: i32,
}

impl Ghost {
    pub fn of(robot: &Robot) -> Self {
        Self { x: robot.x, y: robot.y }
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            x: read_i32(buf, 0),
            y: read_i32(buf, 4),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.x as u32).to_be_bytes());
        out.extend_from_slice(&(self.y as u32).to_be_bytes());
    }
}

/// A robot: a point with position, heading, speeds, and transient sensor
/// state that is reset every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Robot {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    /// Heading in milliradians, always normalized to (-π·1000, π·1000].
    pub heading: i32,
    pub linear_speed: i32,
    pub angular_speed: i32,
    pub(crate) closest_range: i32,
    pub(crate) closest_pixel: i32,
}

impl Robot {
    /// Create a robot at a random position and heading, drawing three values
    /// from the generator in x, y, heading order.
    pub fn spawn(rng: &mut Rand48, universe: &Universe, id: u32) -> Self {
        let x = (rng.next_f64() * universe.world_size as f64) as i32;
        let y = (rng.next_f64() * universe.world_size as f64) as i32;
        let heading =
            Universe::normalize_angle((rng.next_f64() * (THOUSAND_TIMES_PI as f64 * 2.0)) as i32);
        Self {
            id,
            x,
            y,
            heading,
            linear_speed: 0,
            angular_speed: 0,
            closest_range: universe.robot_range,
            closest_pixel: -1,
        }
    }

    /// Decode the NORMAL form: id, x, y, heading. Speeds come back zero.
    pub fn from_normal(buf: &[u8]) -> Self {
        Self {
            id: read_u32(buf, 0),
            x: read_i32(buf, 4),
            y: read_i32(buf, 8),
            heading: read_i32(buf, 12),
            linear_speed: 0,
            angular_speed: 0,
            closest_range: 0,
            closest_pixel: -1,
        }
    }

    /// Decode the LONG form: NORMAL plus both speeds.
    pub fn from_long(buf: &[u8]) -> Self {
        Self {
            id: read_u32(buf, 0),
            x: read_i32(buf, 4),
            y: read_i32(buf, 8),
            heading: read_i32(buf, 12),
            linear_speed: read_i32(buf, 16),
            angular_speed: read_i32(buf, 20),
            closest_range: 0,
            closest_pixel: -1,
        }
    }

    pub fn encode_normal(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&(self.x as u32).to_be_bytes());
        out.extend_from_slice(&(self.y as u32).to_be_bytes());
        out.extend_from_slice(&(self.heading as u32).to_be_bytes());
    }

    pub fn encode_long(&self, out: &mut Vec<u8>) {
        self.encode_normal(out);
        out.extend_from_slice(&(self.linear_speed as u32).to_be_bytes());
        out.extend_from_slice(&(self.angular_speed as u32).to_be_bytes());
    }

    pub fn closest_range(&self) -> i32 {
        self.closest_range
    }

    pub fn closest_pixel(&self) -> i32 {
        self.closest_pixel
    }

    pub(crate) fn reset_sensors(&mut self, universe: &Universe) {
        self.closest_range = universe.robot_range;
        self.closest_pixel = -1;
    }

    /// Which block this robot currently falls in. Single-precision float
    /// division, with the `x == world_size` edge mapped to the last block.
    pub fn block_coord(&self, universe: &Universe, num_blocks: u32) -> BlockCoord {
        let key = |position: i32| -> u32 {
            if position == universe.world_size {
                num_blocks - 1
            } else {
                ((position as f32 / universe.world_size as f32) * num_blocks as f32) as u32
            }
        };
        BlockCoord { x: key(self.x), y: key(self.y) }
    }

    /// Apply one tick of motion from the current speeds, normalize position
    /// and heading, and reset the sensors. Returns the block the robot now
    /// falls in.
    pub fn advance_and_reset_sensors(&mut self, universe: &Universe, num_blocks: u32) -> BlockCoord {
        let dx = (self.linear_speed as f64 * (self.heading as f64 / 1000.0).cos()) as i32;
        let dy = (self.linear_speed as f64 * (self.heading as f64 / 1000.0).sin()) as i32;
        let da = self.angular_speed;
        self.x = universe.normalize_distance(self.x + dx);
        self.y = universe.normalize_distance(self.y + dy);
        self.heading = Universe::normalize_angle(self.heading + da);

        self.reset_sensors(universe);

        self.block_coord(universe, num_blocks)
    }

    /// Compare against one candidate (robot or ghost) and keep it if it is
    /// the closest seen this tick. On exactly equal range, only a candidate
    /// in a lower pixel replaces the current one.
    pub fn sense(&mut self, universe: &Universe, other_id: u32, other_x: i32, other_y: i32) {
        if self.id == other_id {
            return;
        }

        let dx = universe.wrap_coordinate(other_x - self.x);
        if dx.abs() > self.closest_range {
            return;
        }

        let dy = universe.wrap_coordinate(other_y - self.y);
        if dy.abs() > self.closest_range {
            return;
        }

        let range = (dx as f64).hypot(dy as f64) as i32;
        if range > self.closest_range {
            return;
        }

        // Is it in our field of view?
        let absolute_heading = ((dy as f64).atan2(dx as f64) * 1000.0) as i32;
        let relative_heading = Universe::normalize_angle(absolute_heading - self.heading);
        if relative_heading.abs() > universe.fov / 2 {
            return;
        }

        // Which pixel does it fall into?
        let shifted = relative_heading + universe.fov / 2;
        let pixel = (shifted / universe.milliradians_per_pixel) % NUM_PIXELS;

        if self.closest_range == range && pixel > self.closest_pixel {
            return;
        }

        self.closest_range = range;
        self.closest_pixel = pixel;
    }

    /// Choose speeds from the sensor state: cruise straight when nothing is
    /// nearby, otherwise turn away from the closest pixel (or toward it when
    /// inverted).
    pub fn choose_motion(&mut self, universe: &Universe) {
        self.linear_speed = 5;
        self.angular_speed = 0;

        if self.closest_pixel < 0 {
            return;
        }
        if self.closest_pixel < NUM_PIXELS / 2 {
            self.angular_speed = 40;
        } else {
            self.angular_speed = -40;
        }

        if universe.invert_direction {
            self.angular_speed = -self.angular_speed;
        }
    }

    /// One dump-file line: `x,y,heading`.
    pub fn dump_line(&self) -> String {
        format!("{},{},{}", self.x, self.y, self.heading)
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    read_u32(buf, offset) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> Universe {
        Universe::new(1000, 100, millidegrees_to_milliradians(270_000), false)
    }

    #[test]
    fn test_fov_conversion() {
        assert_eq!(millidegrees_to_milliradians(270_000), 4713);
        assert_eq!(millidegrees_to_milliradians(180_000), THOUSAND_TIMES_PI);
    }

    #[test]
    fn test_normalize_angle_bounds() {
        assert_eq!(Universe::normalize_angle(THOUSAND_TIMES_PI), THOUSAND_TIMES_PI);
        assert_eq!(Universe::normalize_angle(THOUSAND_TIMES_PI + 1), -THOUSAND_TIMES_PI + 1);
        assert_eq!(Universe::normalize_angle(-THOUSAND_TIMES_PI), -THOUSAND_TIMES_PI);
        assert_eq!(Universe::normalize_angle(-THOUSAND_TIMES_PI - 1), THOUSAND_TIMES_PI - 1);
        assert_eq!(Universe::normalize_angle(2 * THOUSAND_TIMES_PI), 0);
    }

    #[test]
    fn test_normalize_distance_keeps_world_size() {
        let u = universe();
        assert_eq!(u.normalize_distance(-1), 999);
        assert_eq!(u.normalize_distance(1001), 1);
        assert_eq!(u.normalize_distance(1000), 1000);
        assert_eq!(u.normalize_distance(0), 0);
    }

    #[test]
    fn test_wrap_coordinate() {
        let u = universe();
        assert_eq!(u.wrap_coordinate(501), -499);
        assert_eq!(u.wrap_coordinate(-501), 499);
        assert_eq!(u.wrap_coordinate(500), 500);
        assert_eq!(u.wrap_coordinate(-500), -500);
    }

    #[test]
    fn test_block_coord_edges() {
        let u = universe();
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.x = 5;
        r.y = 999;
        let c = r.block_coord(&u, 10);
        assert_eq!(c, BlockCoord { x: 0, y: 9 });

        r.x = 1000;
        assert_eq!(r.block_coord(&u, 10).x, 9);
    }

    #[test]
    fn test_advance_truncates_toward_zero() {
        let u = universe();
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.x = 5;
        r.y = 5;
        r.linear_speed = 5;

        r.advance_and_reset_sensors(&u, 10);
        assert_eq!((r.x, r.y), (10, 5));

        // cos(3.142) ≈ -0.9999998 so the step back is truncated to 4 units.
        r.heading = THOUSAND_TIMES_PI;
        r.advance_and_reset_sensors(&u, 10);
        assert_eq!((r.x, r.y), (6, 5));
    }

    #[test]
    fn test_advance_wraps_around_world() {
        let u = Universe::new(100, 10, millidegrees_to_milliradians(270_000), false);
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.x = 5;
        r.y = 5;
        r.linear_speed = 5;
        for _ in 0..20 {
            r.advance_and_reset_sensors(&u, 10);
        }
        assert_eq!((r.x, r.y, r.heading), (5, 5, 0));
    }

    #[test]
    fn test_sense_detects_in_fov() {
        let u = universe();
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.id = 1;
        r.x = 100;
        r.y = 100;
        r.reset_sensors(&u);

        // Dead ahead at heading 0.
        r.sense(&u, 2, 150, 100);
        assert_eq!(r.closest_range, 50);
        assert_eq!(r.closest_pixel, (u.fov / 2) / u.milliradians_per_pixel);

        // Out of range is ignored.
        let before = r.closest_range;
        r.sense(&u, 3, 400, 100);
        assert_eq!(r.closest_range, before);
    }

    #[test]
    fn test_sense_ignores_self_and_behind() {
        let u = universe();
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.id = 7;
        r.x = 100;
        r.y = 100;
        r.reset_sensors(&u);

        r.sense(&u, 7, 100, 100);
        assert_eq!(r.closest_pixel, -1);

        // 270° FOV leaves a 90° blind cone behind; heading 0 means directly
        // behind is at relative π.
        r.sense(&u, 8, 50, 100);
        assert_eq!(r.closest_pixel, -1);
    }

    #[test]
    fn test_sense_across_torus_seam() {
        let u = Universe::new(100, 100, millidegrees_to_milliradians(270_000), false);
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.id = 1;
        r.x = 10;
        r.y = 50;
        r.heading = THOUSAND_TIMES_PI;
        r.reset_sensors(&u);

        // Other robot at x=90 is 20 units away across the wrap, straight
        // ahead of a robot facing -x.
        r.sense(&u, 2, 90, 50);
        assert_eq!(r.closest_range, 20);
    }

    #[test]
    fn test_equal_range_keeps_lower_pixel() {
        let u = universe();
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.id = 1;
        r.x = 500;
        r.y = 500;
        r.reset_sensors(&u);

        // Same range on opposite bearings: ahead-left lands in a lower pixel
        // than ahead-right for heading 0.
        r.sense(&u, 2, 500, 560);
        let high = r.closest_pixel;
        r.sense(&u, 3, 500, 440);
        let low = r.closest_pixel;
        assert!(low < high);

        // The higher pixel no longer wins at equal range.
        r.sense(&u, 2, 500, 560);
        assert_eq!(r.closest_pixel, low);
    }

    #[test]
    fn test_choose_motion_and_invert() {
        let u = universe();
        let mut r = Robot::from_normal(&[0; NORMAL_ENCODED_LEN]);
        r.reset_sensors(&u);

        r.choose_motion(&u);
        assert_eq!((r.linear_speed, r.angular_speed), (5, 0));

        r.closest_pixel = 1;
        r.choose_motion(&u);
        assert_eq!(r.angular_speed, 40);

        r.closest_pixel = 6;
        r.choose_motion(&u);
        assert_eq!(r.angular_speed, -40);

        let inverted = Universe::new(1000, 100, u.fov, true);
        r.choose_motion(&inverted);
        assert_eq!(r.angular_speed, 40);
    }

    #[test]
    fn test_wire_round_trips_preserve_sign_bits() {
        let r = Robot {
            id: 42,
            x: 17,
            y: 950,
            heading: -3000,
            linear_speed: 5,
            angular_speed: -40,
            closest_range: 0,
            closest_pixel: -1,
        };

        let mut buf = Vec::new();
        r.encode_long(&mut buf);
        assert_eq!(buf.len(), LONG_ENCODED_LEN);
        let back = Robot::from_long(&buf);
        assert_eq!((back.id, back.x, back.y, back.heading), (42, 17, 950, -3000));
        assert_eq!((back.linear_speed, back.angular_speed), (5, -40));

        let mut buf = Vec::new();
        r.encode_normal(&mut buf);
        assert_eq!(buf.len(), NORMAL_ENCODED_LEN);
        let back = Robot::from_normal(&buf);
        assert_eq!(back.heading, -3000);
        assert_eq!(back.linear_speed, 0);
    }
}
