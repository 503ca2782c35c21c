// Chassis serial loop: decode motion frames into shared state, send the
// current command on a fixed schedule
//
// Runs inside the worker process until it is killed or the transport fails.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::codec::{decode_state, encode_command, ChassisFrame};
use super::{CMD_VX_IDX, CMD_WZ_IDX, STATE_RANGE};
use crate::config::CHASSIS_READ_CHUNK;
use crate::frame::Resynchronizer;
use crate::schedule::TransmitSchedule;
use crate::shm::SharedStateChannel;
use crate::transport::{DeviceError, Transport};

/// What one loop pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub frames: usize,
    pub transmitted: bool,
}

pub struct ChassisIoLoop<T: Transport> {
    transport: T,
    channel: SharedStateChannel,
    resync: Resynchronizer<ChassisFrame>,
    schedule: TransmitSchedule,
    read_buf: [u8; CHASSIS_READ_CHUNK],
}

impl<T: Transport> ChassisIoLoop<T> {
    pub fn new(transport: T, channel: SharedStateChannel, period: Duration, now: Instant) -> Self {
        Self {
            transport,
            channel,
            resync: Resynchronizer::new(),
            schedule: TransmitSchedule::new(period, now),
            read_buf: [0u8; CHASSIS_READ_CHUNK],
        }
    }

    /// One pass: read, publish decoded frames, transmit if due
    pub fn step(&mut self, now: Instant) -> Result<StepReport, DeviceError> {
        let mut report = StepReport::default();

        let n = self.transport.read_into(&mut self.read_buf)?;
        if n > 0 {
            self.resync.push(&self.read_buf[..n]);

            let channel = &self.channel;
            let mut published = Ok(());
            report.frames = self.resync.drain_frames(|frame| match decode_state(frame) {
                Ok(sample) => {
                    if published.is_ok() {
                        published = channel
                            .write_range(STATE_RANGE, &sample.as_array())
                            .map(|()| channel.set_error(false));
                    }
                }
                Err(e) => debug!("Dropping chassis frame: {}", e),
            });
            published?;
        }

        if self.schedule.poll(now) {
            self.transmit()?;
            report.transmitted = true;
        }

        Ok(report)
    }

    fn transmit(&mut self) -> Result<(), DeviceError> {
        // One copy of the block per frame so vx and wz come from the same command
        let snap = self.channel.read_snapshot();
        let vx = snap.get(CMD_VX_IDX).copied().unwrap_or(0.0);
        let wz = snap.get(CMD_WZ_IDX).copied().unwrap_or(0.0);

        match encode_command(vx, wz) {
            Ok(frame) => self.transport.write_frame(&frame)?,
            // The frame is skipped; the next tick retries with whatever is in the slot then
            Err(e) => warn!("Skipping chassis command: {}", e),
        }
        Ok(())
    }

    /// Raise the shared error flag
    pub fn mark_fault(&self) {
        self.channel.set_error(true);
    }

    pub fn channel(&self) -> &SharedStateChannel {
        &self.channel
    }

    /// Loop until the transport fails. The error flag is raised before returning.
    pub fn run(mut self) -> Result<Infallible, DeviceError> {
        loop {
            if let Err(e) = self.step(Instant::now()) {
                error!("Chassis serial loop failed: {}", e);
                self.mark_fault();
                return Err(e);
            }
        }
    }
}
