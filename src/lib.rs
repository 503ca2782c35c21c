// On-robot agent: chassis and UWB serial I/O in worker processes, shared
// state blocks, and the UDP command/telemetry control loop.

pub mod chassis;
pub mod config;
pub mod frame;
pub mod messages;
pub mod net;
pub mod runtime;
pub mod safety;
pub mod schedule;
pub mod session;
pub mod shm;
pub mod transport;
pub mod uwb;
pub mod worker;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the Unix epoch
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
