// UWB serial loop: decode beacon frames into shared state. No transmit side.

use std::convert::Infallible;

use tracing::{debug, error};

use super::codec::{decode_fix, UwbFrame};
use super::SHM_LEN;
use crate::config::UWB_READ_CHUNK;
use crate::frame::Resynchronizer;
use crate::shm::{SharedStateChannel, FLAG_OK};
use crate::transport::{DeviceError, Transport};
use crate::unix_time;

pub struct UwbIoLoop<T: Transport> {
    transport: T,
    channel: SharedStateChannel,
    resync: Resynchronizer<UwbFrame>,
    read_buf: [u8; UWB_READ_CHUNK],
}

impl<T: Transport> UwbIoLoop<T> {
    pub fn new(transport: T, channel: SharedStateChannel) -> Self {
        Self {
            transport,
            channel,
            resync: Resynchronizer::new(),
            read_buf: [0u8; UWB_READ_CHUNK],
        }
    }

    /// One read/decode/publish pass; returns the number of frames published
    pub fn step(&mut self) -> Result<usize, DeviceError> {
        let n = self.transport.read_into(&mut self.read_buf)?;
        if n == 0 {
            return Ok(0);
        }
        self.resync.push(&self.read_buf[..n]);

        let channel = &self.channel;
        let mut published = Ok(());
        let frames = self.resync.drain_frames(|frame| match decode_fix(frame) {
            Ok(fix) => {
                if published.is_ok() {
                    let [x, y, vx, vy] = fix.as_array();
                    // Fix, stamp and flag land in one range write
                    published = channel.write_range(0..SHM_LEN, &[x, y, vx, vy, unix_time(), FLAG_OK]);
                }
            }
            Err(e) => debug!("Dropping UWB frame: {}", e),
        });
        published?;
        Ok(frames)
    }

    pub fn mark_fault(&self) {
        self.channel.set_error(true);
    }

    pub fn channel(&self) -> &SharedStateChannel {
        &self.channel
    }

    /// Loop until the transport fails. The error flag is raised before returning.
    pub fn run(mut self) -> Result<Infallible, DeviceError> {
        loop {
            if let Err(e) = self.step() {
                error!("UWB serial loop crashed: {}", e);
                self.mark_fault();
                return Err(e);
            }
        }
    }
}
