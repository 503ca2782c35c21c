// Device session: one worker process plus the shared state block it is bound to
//
// Lifecycle: Stopped -> Starting -> Running -> Stopped. A session has a single
// owner; start/stop are not meant to race.

use std::io;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{STOP_POLL_INTERVAL, STOP_TIMEOUT};
use crate::shm::{SharedStateChannel, ShmError};

/// Builds the command that runs a device I/O loop bound to `shm_name`
pub trait Worker {
    /// Short name used for logs and shared memory names
    fn label(&self) -> &'static str;

    /// Number of f64 slots in this device's shared block
    fn slots(&self) -> usize;

    fn command(&self, shm_name: &str) -> io::Result<Command>;
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to spawn {label} worker: {source}")]
    Spawn {
        label: &'static str,
        source: io::Error,
    },

    #[error(transparent)]
    Shm(#[from] ShmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
}

pub struct DeviceSession<W: Worker> {
    worker: W,
    state: SessionState,
    child: Option<Child>,
    channel: Option<SharedStateChannel>,
}

impl<W: Worker> DeviceSession<W> {
    pub fn new(worker: W) -> Self {
        Self {
            worker,
            state: SessionState::Stopped,
            child: None,
            channel: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Create the shared block and launch the worker. No-op while a live worker is running.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Running {
            if self.is_alive() {
                return Ok(());
            }
            // Worker died on its own; clean up before relaunching
            warn!("{} worker exited, restarting", self.worker.label());
            self.stop();
        }

        self.state = SessionState::Starting;
        let label = self.worker.label();

        let mut channel = match SharedStateChannel::create(label, self.worker.slots()) {
            Ok(channel) => channel,
            Err(e) => {
                self.state = SessionState::Stopped;
                return Err(e.into());
            }
        };

        let spawned = self
            .worker
            .command(channel.name())
            .and_then(|mut cmd| cmd.stdin(Stdio::null()).spawn());

        match spawned {
            Ok(child) => {
                info!(
                    "Started {} worker (pid {}) on {}",
                    label,
                    child.id(),
                    channel.name()
                );
                self.child = Some(child);
                self.channel = Some(channel);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(source) => {
                channel.destroy();
                self.state = SessionState::Stopped;
                Err(SessionError::Spawn { label, source })
            }
        }
    }

    /// Whether the worker process is still running
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Worker pid while a process is held
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Shared block of the running session
    pub fn channel(&self) -> Option<&SharedStateChannel> {
        self.channel.as_ref()
    }

    /// Terminate the worker (bounded wait) and always tear down the shared block
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(self.worker.label(), &mut child);
        }

        if let Some(mut channel) = self.channel.take() {
            channel.destroy();
            debug!("Released shared state {}", channel.name());
        }

        if self.state != SessionState::Stopped {
            info!("Stopped {} session", self.worker.label());
        }
        self.state = SessionState::Stopped;
    }
}

impl<W: Worker> Drop for DeviceSession<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// SIGTERM, wait up to STOP_TIMEOUT, then SIGKILL and reap
fn terminate(label: &str, child: &mut Child) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!("{} worker already exited: {}", label, status);
        return;
    }

    let pid = child.id() as libc::pid_t;
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        debug!(
            "SIGTERM to {} worker failed: {}",
            label,
            io::Error::last_os_error()
        );
    }

    let deadline = Instant::now() + STOP_TIMEOUT;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} worker exited: {}", label, status);
                return;
            }
            Ok(None) => sleep(STOP_POLL_INTERVAL),
            Err(e) => {
                warn!("Failed to poll {} worker: {}", label, e);
                break;
            }
        }
    }

    warn!(
        "{} worker did not exit within {:?}, killing",
        label, STOP_TIMEOUT
    );
    if let Err(e) = child.kill() {
        debug!("Kill {} worker: {}", label, e);
    }
    let _ = child.wait();
}

