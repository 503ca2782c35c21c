// Control-process side of the UWB beacon

use super::{ERR_IDX, SHM_LEN, STAMP_IDX};
use crate::session::{DeviceSession, SessionError, Worker};
use crate::shm::FLAG_FAULT;
use crate::unix_time;
use crate::worker::UwbWorker;

/// Age reported before the first fix
pub const NEVER_AGE_S: f64 = 1e9;

/// Latest beacon reading as seen by the control process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UwbState {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Wall-clock time of the last fix, 0 if none yet
    pub stamp: f64,
    pub err: u8,
    /// Seconds since the last fix
    pub rx_age_s: f64,
}

impl Default for UwbState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            stamp: 0.0,
            err: 1,
            rx_age_s: NEVER_AGE_S,
        }
    }
}

impl UwbState {
    /// Build from a raw shared-memory snapshot taken at `now`
    pub fn from_snapshot(snap: &[f64], now: f64) -> Self {
        debug_assert_eq!(snap.len(), SHM_LEN);
        let stamp = snap[STAMP_IDX];
        let rx_age_s = if stamp > 1e-6 {
            (now - stamp).max(0.0)
        } else {
            NEVER_AGE_S
        };

        Self {
            x: snap[0],
            y: snap[1],
            vx: snap[2],
            vy: snap[3],
            stamp,
            err: if snap[ERR_IDX] >= FLAG_FAULT { 1 } else { 0 },
            rx_age_s,
        }
    }
}

pub struct UwbAdapter<W: Worker = UwbWorker> {
    session: DeviceSession<W>,
}

impl UwbAdapter<UwbWorker> {
    pub fn new(serial_port: &str, baudrate: u32) -> Self {
        Self::with_worker(UwbWorker {
            port: serial_port.to_string(),
            baudrate,
        })
    }
}

impl<W: Worker> UwbAdapter<W> {
    pub fn with_worker(worker: W) -> Self {
        Self {
            session: DeviceSession::new(worker),
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

    /// Latest reading; callers judge freshness from `rx_age_s`.
    /// A dead worker reads as a fault whatever the shared flag says.
    pub fn get_latest(&mut self) -> UwbState {
        let alive = self.session.is_alive();
        let Some(channel) = self.session.channel() else {
            return UwbState::default();
        };

        let mut state = UwbState::from_snapshot(&channel.read_snapshot(), unix_time());
        if !alive {
            state.err = 1;
        }
        state
    }

    pub fn stop(&mut self) {
        self.session.stop();
    }
}
