//! In-process cluster tests: a master and its workers over loopback.
//!
//! Each test binds the master to an ephemeral port and gives the workers a
//! test-unique neighbour port base so tests can run concurrently.

use std::path::PathBuf;

use universe::{Master, Rand48, Robot, SimConfig, Universe, Worker, WorkerOptions};

/// Boot a master plus `config.num_workers` workers, run to completion, and
/// return the master's final robots.
async fn run_cluster(mut config: SimConfig, neighbour_port_base: u16) -> Vec<Robot> {
    config.master_port = 0;
    config.validate().expect("test configuration must be valid");

    let master = Master::bind(config.clone()).await.expect("bind master");
    let master_port = master.local_addr().expect("local addr").port();
    let master_task = tokio::spawn(master.run());

    let mut worker_tasks = Vec::new();
    for _ in 0..config.num_workers {
        let options = WorkerOptions { master_port, neighbour_port_base };
        worker_tasks.push(tokio::spawn(async move {
            let worker = Worker::connect("127.0.0.1", options).await?;
            worker.run().await
        }));
    }

    for task in worker_tasks {
        task.await.expect("worker task").expect("worker run");
    }
    master_task.await.expect("master task").expect("master run")
}

/// The population the master generates for a given configuration.
fn expected_population(config: &SimConfig) -> Vec<Robot> {
    let universe = config.universe();
    let mut rng = Rand48::new(0);
    (1..=config.population)
        .map(|id| Robot::spawn(&mut rng, &universe, id))
        .collect()
}

fn dump_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("robot_positions.txt")
}

#[tokio::test]
async fn test_zero_updates_dumps_initial_positions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new(2, 2);
    config.num_updates = 0;
    config.dump_path = dump_path(&dir);

    let robots = run_cluster(config.clone(), 41000).await;
    let expected = expected_population(&config);

    assert_eq!(robots.len(), 2);
    for (robot, initial) in robots.iter().zip(&expected) {
        assert_eq!(robot.id, initial.id);
        assert_eq!((robot.x, robot.y, robot.heading), (initial.x, initial.y, initial.heading));
    }

    let dump = std::fs::read_to_string(dump_path(&dir)).unwrap();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 2);
    for (line, robot) in lines.iter().zip(&expected) {
        assert_eq!(*line, format!("{},{},{}", robot.x, robot.y, robot.heading));
    }
}

#[tokio::test]
async fn test_population_is_conserved_across_updates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new(2, 40);
    config.num_updates = 12;
    config.dump_path = dump_path(&dir);

    let robots = run_cluster(config.clone(), 41100).await;

    assert_eq!(robots.len(), 40);
    let mut ids: Vec<u32> = robots.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 40);

    // Positions stay on the torus, headings stay normalized.
    for robot in &robots {
        assert!((0..=config.world_size).contains(&robot.x));
        assert!((0..=config.world_size).contains(&robot.y));
        assert!((-3142..=3142).contains(&robot.heading));
    }

    let dump = std::fs::read_to_string(dump_path(&dir)).unwrap();
    assert_eq!(dump.lines().count(), 40);
}

#[tokio::test]
async fn test_runs_are_deterministic_for_fixed_worker_count() {
    let dir = tempfile::tempdir().unwrap();

    let mut first = SimConfig::new(2, 25);
    first.num_updates = 8;
    first.dump_path = dir.path().join("first.txt");
    let first_robots = run_cluster(first, 41200).await;

    let mut second = SimConfig::new(2, 25);
    second.num_updates = 8;
    second.dump_path = dir.path().join("second.txt");
    let second_robots = run_cluster(second, 41300).await;

    for (a, b) in first_robots.iter().zip(&second_robots) {
        assert_eq!((a.id, a.x, a.y, a.heading), (b.id, b.x, b.y, b.heading));
    }
}

#[tokio::test]
async fn test_robots_moved_after_updates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new(2, 5);
    config.num_updates = 3;
    config.dump_path = dump_path(&dir);

    let robots = run_cluster(config.clone(), 41400).await;
    let initial = expected_population(&config);

    // Every robot cruises at speed 5 once the simulation starts, so at
    // least one coordinate must have changed for each of them.
    for (robot, start) in robots.iter().zip(&initial) {
        assert!(
            robot.x != start.x || robot.y != start.y,
            "robot {} never moved",
            robot.id
        );
    }
}

#[tokio::test]
async fn test_four_workers_share_one_world() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new(4, 30);
    // 4 workers over a 1000-unit world need slices aligned to blocks:
    // 8x8 blocks of 125 give each worker two columns.
    config.num_blocks = 8;
    config.num_updates = 6;
    config.dump_path = dump_path(&dir);

    let robots = run_cluster(config, 41500).await;
    assert_eq!(robots.len(), 30);
}

#[tokio::test]
async fn test_visualization_feed_publishes_density_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new(2, 12);
    config.num_updates = 4;
    config.visualization = true;
    config.master_port = 0;
    config.dump_path = dump_path(&dir);
    config.validate().unwrap();

    let master = Master::bind(config.clone()).await.unwrap();
    let master_port = master.local_addr().unwrap().port();
    let mut frames = master.density_frames();
    let master_task = tokio::spawn(master.run());

    let mut worker_tasks = Vec::new();
    for _ in 0..config.num_workers {
        let options = WorkerOptions { master_port, neighbour_port_base: 41600 };
        worker_tasks.push(tokio::spawn(async move {
            let worker = Worker::connect("127.0.0.1", options).await?;
            worker.run().await
        }));
    }
    for task in worker_tasks {
        task.await.unwrap().unwrap();
    }
    master_task.await.unwrap().unwrap();

    // The feed saw at least one completed frame covering the whole grid,
    // and every robot is in some block.
    let frame = frames.borrow();
    assert_eq!(frame.values.len(), (config.num_blocks * config.num_blocks) as usize);
    let total: u32 = frame.values.iter().sum();
    assert_eq!(total, 12);
}

#[tokio::test]
async fn test_single_robot_walks_its_expected_path() {
    // One robot, no neighbours in range: it cruises straight at speed 5.
    // Mirror the sequential rules locally and check the cluster agrees.
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new(2, 1);
    config.num_updates = 7;
    config.dump_path = dump_path(&dir);

    let robots = run_cluster(config.clone(), 41700).await;

    let universe: Universe = config.universe();
    let mut reference = expected_population(&config).remove(0);
    let mut update_count = 0;
    while update_count <= config.num_updates {
        reference.advance_and_reset_sensors(&universe, config.num_blocks);
        reference.choose_motion(&universe);
        update_count += 1;
    }

    assert_eq!(robots.len(), 1);
    assert_eq!((robots[0].x, robots[0].y), (reference.x, reference.y));
    assert_eq!(robots[0].heading, reference.heading);
}
