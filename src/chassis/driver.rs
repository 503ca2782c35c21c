// Control-process side of the chassis: owns the worker session, writes the
// command slots and reads state snapshots.

use std::time::{Duration, Instant};

use tracing::warn;

use super::{CMD_RANGE, ERR_IDX, STATE_RANGE};
use crate::session::{DeviceSession, SessionError, Worker};
use crate::shm::FLAG_FAULT;
use crate::unix_time;
use crate::worker::ChassisWorker;

/// vy below this is treated as zero
const VY_EPSILON: f64 = 1e-4;
/// Minimum gap between "vy ignored" warnings
const VY_WARN_INTERVAL: Duration = Duration::from_secs(2);

/// Chassis state as seen by the control process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChassisState {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
    /// 0 = ok, 1 = fault or not ready
    pub err: u8,
    /// Wall-clock time of the read
    pub stamp: f64,
}

impl ChassisState {
    fn fault() -> Self {
        Self {
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            ax: 0.0,
            ay: 0.0,
            az: 0.0,
            wx: 0.0,
            wy: 0.0,
            wz: 0.0,
            err: 1,
            stamp: unix_time(),
        }
    }
}

/// Differential-drive chassis driver
pub struct ChassisDriver<W: Worker = ChassisWorker> {
    session: DeviceSession<W>,
    vy_warned_at: Option<Instant>,
}

impl ChassisDriver<ChassisWorker> {
    pub fn new(serial_port: &str, baudrate: u32, control_hz: f64) -> Self {
        Self::with_worker(ChassisWorker {
            port: serial_port.to_string(),
            baudrate,
            control_hz,
        })
    }
}

impl<W: Worker> ChassisDriver<W> {
    /// Driver around any worker that speaks the chassis shared layout
    pub fn with_worker(worker: W) -> Self {
        Self {
            session: DeviceSession::new(worker),
            vy_warned_at: None,
        }
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        self.session.start()
    }

    pub fn is_alive(&mut self) -> bool {
        self.session.is_alive()
    }

    pub fn session(&self) -> &DeviceSession<W> {
        &self.session
    }

    /// Write the command slots. vy is dropped: the base cannot strafe.
    pub fn set_cmd(&mut self, vx: f64, vy: f64, wz: f64) {
        if vy.abs() > VY_EPSILON {
            let due = self
                .vy_warned_at
                .is_none_or(|at| at.elapsed() > VY_WARN_INTERVAL);
            if due {
                warn!("vy command ignored on differential drive: vy={:.4}", vy);
                self.vy_warned_at = Some(Instant::now());
            }
        }

        let Some(channel) = self.session.channel() else {
            return;
        };
        if let Err(e) = channel.write_range(CMD_RANGE, &[vx, 0.0, wz]) {
            warn!("Failed to write chassis command: {}", e);
        }
    }

    /// Snapshot of the shared state. A dead or missing worker reads as a fault.
    pub fn get_state(&mut self) -> ChassisState {
        let alive = self.session.is_alive();
        let Some(channel) = self.session.channel() else {
            return ChassisState::fault();
        };

        let snap = channel.read_snapshot();
        let s = &snap[STATE_RANGE];
        let err = if !alive || snap[ERR_IDX] >= FLAG_FAULT { 1 } else { 0 };

        ChassisState {
            vx: s[0],
            vy: s[1],
            vz: s[2],
            ax: s[3],
            ay: s[4],
            az: s[5],
            wx: s[6],
            wy: s[7],
            wz: s[8],
            err,
            stamp: unix_time(),
        }
    }

    pub fn stop(&mut self) {
        self.session.stop();
    }
}
