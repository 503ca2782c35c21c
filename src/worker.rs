// Device worker processes
//
// The control process re-executes its own binary with the hidden `io`
// subcommand; the shared memory name is the only handle passed across.

use std::io;
use std::process::Command;
use std::time::Instant;

use tracing::{error, info};

use crate::chassis::{self, ChassisIoLoop};
use crate::schedule::TransmitSchedule;
use crate::session::Worker;
use crate::shm::SharedStateChannel;
use crate::transport::{DeviceError, SerialTransport};
use crate::uwb::{self, UwbIoLoop};

/// Launches `<agent> io chassis ...`
#[derive(Debug, Clone)]
pub struct ChassisWorker {
    pub port: String,
    pub baudrate: u32,
    pub control_hz: f64,
}

/// Launches `<agent> io uwb ...`
#[derive(Debug, Clone)]
pub struct UwbWorker {
    pub port: String,
    pub baudrate: u32,
}

fn self_command(device: &str, shm_name: &str, port: &str, baudrate: u32) -> io::Result<Command> {
    let mut cmd = Command::new(std::env::current_exe()?);
    cmd.args(["io", device, "--shm", shm_name, "--port", port])
        .arg("--baud")
        .arg(baudrate.to_string());
    Ok(cmd)
}

impl Worker for ChassisWorker {
    fn label(&self) -> &'static str {
        "chassis"
    }

    fn slots(&self) -> usize {
        chassis::SHM_LEN
    }

    fn command(&self, shm_name: &str) -> io::Result<Command> {
        let mut cmd = self_command("chassis", shm_name, &self.port, self.baudrate)?;
        cmd.arg("--hz").arg(self.control_hz.to_string());
        Ok(cmd)
    }
}

impl Worker for UwbWorker {
    fn label(&self) -> &'static str {
        "uwb"
    }

    fn slots(&self) -> usize {
        uwb::SHM_LEN
    }

    fn command(&self, shm_name: &str) -> io::Result<Command> {
        self_command("uwb", shm_name, &self.port, self.baudrate)
    }
}

/// Ask the kernel to SIGTERM us when the control process goes away
fn exit_with_parent() {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
    }
}

/// Open the serial port, raising the error flag if that fails
fn open_transport(
    channel: &SharedStateChannel,
    port: &str,
    baudrate: u32,
) -> Result<SerialTransport, DeviceError> {
    SerialTransport::open(port, baudrate).inspect_err(|e| {
        error!("Failed to open {}: {}", port, e);
        channel.set_error(true);
    })
}

/// Body of `io chassis`: runs until killed or the port fails
pub fn run_chassis(shm_name: &str, port: &str, baudrate: u32, control_hz: f64) -> Result<(), DeviceError> {
    exit_with_parent();
    let channel = SharedStateChannel::attach(shm_name, chassis::SHM_LEN)?;
    channel.set_error(true);

    info!(
        "Chassis worker starting: port={} baud={} tx={}Hz shm={}",
        port, baudrate, control_hz, shm_name
    );
    let transport = open_transport(&channel, port, baudrate)?;

    let period = TransmitSchedule::period_for_hz(control_hz);
    let io_loop = ChassisIoLoop::new(transport, channel, period, Instant::now());
    match io_loop.run() {
        Ok(never) => match never {},
        Err(e) => Err(e),
    }
}

/// Body of `io uwb`: runs until killed or the port fails
pub fn run_uwb(shm_name: &str, port: &str, baudrate: u32) -> Result<(), DeviceError> {
    exit_with_parent();
    let channel = SharedStateChannel::attach(shm_name, uwb::SHM_LEN)?;
    channel.set_error(true);

    info!(
        "UWB worker starting: port={} baud={} shm={}",
        port, baudrate, shm_name
    );
    let transport = open_transport(&channel, port, baudrate)?;

    match UwbIoLoop::new(transport, channel).run() {
        Ok(never) => match never {},
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chassis_command_line() {
        let worker = ChassisWorker {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 115_200,
            control_hz: 50.0,
        };
        let cmd = worker.command("/car-chassis-1-0").unwrap();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "io", "chassis", "--shm", "/car-chassis-1-0", "--port", "/dev/ttyUSB0", "--baud",
                "115200", "--hz", "50"
            ]
        );
    }

    #[test]
    fn test_uwb_layout() {
        let worker = UwbWorker {
            port: "/dev/ttyUSB1".to_string(),
            baudrate: 921_600,
        };
        assert_eq!(worker.slots(), 6);
        assert_eq!(worker.label(), "uwb");
    }
}
