// Fixed-length frame recovery shared by the chassis and UWB serial protocols
//
// Neither device sends a length field, so frames are located purely by a
// per-device predicate. After a dropped or inserted byte the scan slips one
// byte at a time until the predicate matches again.

use std::marker::PhantomData;

use tracing::trace;

/// A fixed-length frame format on a byte stream
pub trait FrameFormat {
    /// Total frame length in bytes
    const FRAME_LEN: usize;

    /// Scanning only continues while more than this many bytes remain.
    /// Must be at least `FRAME_LEN` so a candidate window is always complete.
    const SCAN_THRESHOLD: usize;

    /// Whether a frame starts at `window[0]`. `window` is exactly `FRAME_LEN` bytes.
    fn is_frame_start(window: &[u8]) -> bool;
}

/// Error types for frame encoding and decoding
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CodecError {
    #[error("{axis} command {value} is outside the int16 wire range")]
    RangeFault { axis: Axis, value: f64 },

    #[error("Expected a {expected}-byte frame, got {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("Invalid frame header: {0:02X?}")]
    BadHeader(Vec<u8>),

    #[error("Invalid frame terminator: 0x{0:02X}")]
    BadTerminator(u8),

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Command axis, used to report which value failed to encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

/// Check that `frame` is exactly `expected` bytes long
pub(crate) fn check_len(frame: &[u8], expected: usize) -> Result<(), CodecError> {
    if frame.len() != expected {
        return Err(CodecError::BadLength {
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// Byte accumulator plus sliding-window scan for one frame format
///
/// Bytes are appended with [`push`](Self::push); [`drain_frames`](Self::drain_frames)
/// hands every aligned frame to a callback and keeps only the unconsumed
/// suffix. The buffer is not capped: a stream that never matches keeps at
/// most `SCAN_THRESHOLD` bytes after each scan, but one huge read is held in
/// full until it is scanned.
pub struct Resynchronizer<S: FrameFormat> {
    buf: Vec<u8>,
    slipped: u64,
    _format: PhantomData<S>,
}

impl<S: FrameFormat> Default for Resynchronizer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FrameFormat> Resynchronizer<S> {
    pub fn new() -> Self {
        const { assert!(S::SCAN_THRESHOLD >= S::FRAME_LEN) };
        Self {
            buf: Vec::with_capacity(S::SCAN_THRESHOLD * 2),
            slipped: 0,
            _format: PhantomData,
        }
    }

    /// Append freshly read bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Scan the buffer and call `on_frame` for each frame found, in stream order.
    ///
    /// Returns the number of frames emitted.
    pub fn drain_frames<F: FnMut(&[u8])>(&mut self, mut on_frame: F) -> usize {
        let mut cursor = 0;
        let mut frames = 0;
        let mut slipped = 0u64;

        while self.buf.len() - cursor > S::SCAN_THRESHOLD {
            let window = &self.buf[cursor..cursor + S::FRAME_LEN];
            if S::is_frame_start(window) {
                on_frame(window);
                cursor += S::FRAME_LEN;
                frames += 1;
            } else {
                cursor += 1;
                slipped += 1;
            }
        }

        if slipped > 0 {
            trace!("Resync slipped {} bytes", slipped);
            self.slipped += slipped;
        }
        self.buf.drain(..cursor);
        frames
    }

    /// Bytes held for the next scan
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Total bytes discarded while searching for alignment
    pub fn slipped(&self) -> u64 {
        self.slipped
    }
}
