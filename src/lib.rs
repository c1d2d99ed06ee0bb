//! Distributed multi-agent universe.
//!
//! A population of reactive robots moves on a square toroidal world that is
//! partitioned into vertical slices across a ring of worker processes, all
//! coordinated by a single master. Workers exchange one-block ghost strips
//! with their ring neighbours every tick so sensing works across slice
//! boundaries, and hand robots over as they cross.

pub mod config;
pub mod grid;
pub mod master;
pub mod net;
pub mod rng;
pub mod robot;
pub mod sync;
pub mod worker;

pub use config::{ConfigError, SimConfig};
pub use grid::{RobotGrid, Side};
pub use master::viz::{DensityFeed, DensityFrame};
pub use master::Master;
pub use net::{Message, NetError, BASE_NEIGHBOUR_PORT, SERVER_PORT};
pub use rng::Rand48;
pub use robot::{Ghost, Robot, Universe};
pub use worker::{Worker, WorkerOptions};
