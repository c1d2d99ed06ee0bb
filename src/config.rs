//! Validated simulation configuration for the master process.

use std::path::PathBuf;

use thiserror::Error;

use crate::net::SERVER_PORT;
use crate::robot::{milliradians_to_millidegrees, Universe};

pub const DEFAULT_WORLD_SIZE: i32 = 1000;
pub const DEFAULT_ROBOT_RANGE: i32 = 100;
pub const DEFAULT_FOV_DEGREES: i32 = 270;
pub const POSITIONS_DUMP_FILE: &str = "robot_positions.txt";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("number of workers must be >= 2")]
    TooFewWorkers,

    #[error("population size must be >= 1")]
    EmptyPopulation,

    #[error("number of updates must be >= 0")]
    NegativeUpdates,

    #[error("world size must be >= 100")]
    WorldTooSmall,

    #[error("robot range must be >= 1")]
    RangeTooSmall,

    #[error("field of view must be > 0")]
    EmptyFov,

    #[error("the 2D space (world size) of '{world_size}' cannot be evenly divided into '{num_blocks}x{num_blocks}' blocks")]
    IndivisibleBlocks { world_size: i32, num_blocks: u32 },

    #[error("the number of blocks can be no greater than {max} for the desired configuration")]
    TooManyBlocks { max: u32 },

    #[error("the 2D space (world size) of '{world_size}' cannot be evenly divided into '{num_workers}' worker slices")]
    IndivisibleSlices { world_size: i32, num_workers: u32 },

    #[error("a worker slice of size '{slice_size}' (for '{num_workers}' workers) is not evenly divisible by a block of size '{block_size}'")]
    MisalignedSlices {
        slice_size: i32,
        num_workers: u32,
        block_size: i32,
    },
}

/// The full, validated configuration of a run. Produced from the master CLI
/// and partially shipped to workers as SET_UNIVERSE_PARAMETERS.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub num_workers: u32,
    pub population: u32,
    /// -1 means no update limit.
    pub num_updates: i32,
    pub world_size: i32,
    pub robot_range: i32,
    pub num_blocks: u32,
    /// Field of view in milliradians.
    pub fov: i32,
    pub invert_direction: bool,
    pub worker_debug: bool,
    pub visualization: bool,
    /// Port the lobby listens on; 0 picks an ephemeral port.
    pub master_port: u16,
    pub dump_path: PathBuf,
}

impl SimConfig {
    pub fn new(num_workers: u32, population: u32) -> Self {
        Self {
            num_workers,
            population,
            num_updates: -1,
            world_size: DEFAULT_WORLD_SIZE,
            robot_range: DEFAULT_ROBOT_RANGE,
            num_blocks: max_num_blocks(DEFAULT_WORLD_SIZE, DEFAULT_ROBOT_RANGE),
            fov: crate::robot::millidegrees_to_milliradians(DEFAULT_FOV_DEGREES * 1000),
            invert_direction: false,
            worker_debug: false,
            visualization: false,
            master_port: SERVER_PORT,
            dump_path: PathBuf::from(POSITIONS_DUMP_FILE),
        }
    }

    /// Check every constraint the grid decomposition depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers < 2 {
            return Err(ConfigError::TooFewWorkers);
        }
        if self.population < 1 {
            return Err(ConfigError::EmptyPopulation);
        }
        if self.num_updates < -1 {
            return Err(ConfigError::NegativeUpdates);
        }
        if self.world_size < 100 {
            return Err(ConfigError::WorldTooSmall);
        }
        if self.robot_range < 1 {
            return Err(ConfigError::RangeTooSmall);
        }
        if self.fov <= 0 {
            return Err(ConfigError::EmptyFov);
        }

        // A block must be at least a sensor range wide, and the world must
        // divide evenly into blocks.
        if self.world_size % self.num_blocks as i32 != 0 {
            return Err(ConfigError::IndivisibleBlocks {
                world_size: self.world_size,
                num_blocks: self.num_blocks,
            });
        }
        let max = max_num_blocks(self.world_size, self.robot_range);
        if self.num_blocks > max {
            return Err(ConfigError::TooManyBlocks { max });
        }

        // Slices must fall on block boundaries.
        if self.world_size % self.num_workers as i32 != 0 {
            return Err(ConfigError::IndivisibleSlices {
                world_size: self.world_size,
                num_workers: self.num_workers,
            });
        }
        if self.slice_size() % self.block_size() != 0 {
            return Err(ConfigError::MisalignedSlices {
                slice_size: self.slice_size(),
                num_workers: self.num_workers,
                block_size: self.block_size(),
            });
        }

        Ok(())
    }

    pub fn block_size(&self) -> i32 {
        self.world_size / self.num_blocks as i32
    }

    pub fn slice_size(&self) -> i32 {
        self.world_size / self.num_workers as i32
    }

    pub fn universe(&self) -> Universe {
        Universe::new(self.world_size, self.robot_range, self.fov, self.invert_direction)
    }

    /// Worker counts that would decompose this world cleanly, for the
    /// usage hint printed alongside a slicing error.
    pub fn valid_worker_counts(&self) -> Vec<u32> {
        let block_size = self.block_size();
        (2..=self.num_blocks)
            .filter(|&n| {
                self.world_size % n as i32 == 0 && (self.world_size / n as i32) % block_size == 0
            })
            .collect()
    }

    /// Multi-line banner describing the run, logged by the master at start.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push("Universe Parameters:".to_string());
        lines.push(format!("   Population size:    {}", self.population));
        lines.push(format!("   World size:         {}", self.world_size));
        lines.push(format!("   Robot range:        {}", self.robot_range));
        lines.push(format!(
            "   Robot FOV:          {} mrad ({} deg)",
            self.fov,
            milliradians_to_millidegrees(self.fov) / 1000
        ));
        lines.push(format!(
            "   Inverted:           {}",
            if self.invert_direction { "Yes" } else { "No" }
        ));
        if self.num_updates < 0 {
            lines.push("   Number of updates:  No limit".to_string());
        } else {
            lines.push(format!("   Number of updates:  {}", self.num_updates));
        }
        lines.push("Distribution Configuration:".to_string());
        lines.push(format!("   Grid size:          {0}x{0}", self.num_blocks));
        lines.push(format!("   Number of workers:  {}", self.num_workers));
        lines.push(format!(
            "   Worker slice size:  {} ({}x{} blocks)",
            self.slice_size(),
            self.slice_size() / self.block_size(),
            self.num_blocks
        ));
        lines.push(format!(
            "   Worker debugging:   {}",
            if self.worker_debug { "Yes" } else { "No" }
        ));
        lines.push(format!(
            "   Visualization:      {}",
            if self.visualization { "Yes" } else { "No" }
        ));
        lines.join("\n")
    }
}

/// The most blocks the world can be divided into such that blocks divide the
/// world evenly and are no smaller than the sensor range.
pub fn max_num_blocks(world_size: i32, robot_range: i32) -> u32 {
    let mut blocks = (world_size / robot_range).max(1);
    while world_size % blocks != 0 {
        blocks -= 1;
    }
    blocks as u32
}
