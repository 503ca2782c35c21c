// Chassis (wheel-drive controller) support
//
// Provides:
// - Motion/command frame codec
// - The realtime serial loop run inside the worker process
// - The control-process driver that owns the worker session

use std::ops::Range;

pub mod codec;
mod driver;
pub mod io_loop;

pub use codec::{decode_command, decode_state, encode_command, ChassisCommand, MotionSample};
pub use driver::{ChassisDriver, ChassisState};
pub use io_loop::ChassisIoLoop;

// Shared block layout: [cmd vx, vy, wz | vx, vy, vz, ax, ay, az, wx, wy, wz | err]
pub const SHM_LEN: usize = 13;
/// Written by the control process only
pub const CMD_RANGE: Range<usize> = 0..3;
/// Written by the I/O loop only
pub const STATE_RANGE: Range<usize> = 3..12;
/// Written by the I/O loop only
pub const ERR_IDX: usize = 12;

pub const CMD_VX_IDX: usize = 0;
pub const CMD_WZ_IDX: usize = 2;
