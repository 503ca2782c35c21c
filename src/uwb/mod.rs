// UWB positioning beacon support (read-only device)

use std::ops::Range;

mod adapter;
pub mod codec;
pub mod io_loop;

pub use adapter::{UwbAdapter, UwbState, NEVER_AGE_S};
pub use codec::{decode_fix, UwbFix};
pub use io_loop::UwbIoLoop;

// Shared block layout: [x, y, vx, vy, stamp, err], all written by the I/O loop
pub const SHM_LEN: usize = 6;
pub const FIX_RANGE: Range<usize> = 0..4;
pub const STAMP_IDX: usize = 4;
pub const ERR_IDX: usize = 5;
