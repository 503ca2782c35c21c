// UWB beacon frame decoding
//
// 128-byte frames starting 0x55 0x01. No length or checksum field, so only the
// two-byte sync is checked.
// TODO: the sync alone admits false frames in noisy streams; harden once the
// beacon's checksum field is identified from the datasheet.

use crate::frame::{check_len, CodecError, FrameFormat};

pub const FRAME_LEN: usize = 128;
pub const SYNC: [u8; 2] = [0x55, 0x01];

const POSITION_SCALE: f64 = 1000.0; // mm -> m
const VELOCITY_SCALE: f64 = 10000.0;

pub struct UwbFrame;

impl FrameFormat for UwbFrame {
    const FRAME_LEN: usize = FRAME_LEN;
    const SCAN_THRESHOLD: usize = 200;

    fn is_frame_start(window: &[u8]) -> bool {
        window[0] == SYNC[0] && window[1] == SYNC[1]
    }
}

/// Position (m) and velocity (m/s) from one frame, unfiltered
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UwbFix {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

impl UwbFix {
    pub fn as_array(&self) -> [f64; 4] {
        [self.x, self.y, self.vx, self.vy]
    }
}

/// 24-bit two's complement, least significant byte first on the wire
fn read_i24(bytes: &[u8]) -> i32 {
    let raw = (i32::from(bytes[2]) << 16) | (i32::from(bytes[1]) << 8) | i32::from(bytes[0]);
    if raw & 0x80_0000 != 0 {
        raw - 0x100_0000
    } else {
        raw
    }
}

pub fn decode_fix(frame: &[u8]) -> Result<UwbFix, CodecError> {
    check_len(frame, FRAME_LEN)?;

    Ok(UwbFix {
        x: f64::from(read_i24(&frame[4..7])) / POSITION_SCALE,
        y: f64::from(read_i24(&frame[7..10])) / POSITION_SCALE,
        vx: f64::from(read_i24(&frame[13..16])) / VELOCITY_SCALE,
        vy: f64::from(read_i24(&frame[16..19])) / VELOCITY_SCALE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(fields: &[(usize, [u8; 3])]) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..2].copy_from_slice(&SYNC);
        for (offset, bytes) in fields {
            frame[*offset..*offset + 3].copy_from_slice(bytes);
        }
        frame
    }

    #[test]
    fn test_read_i24() {
        assert_eq!(read_i24(&[0xE8, 0x03, 0x00]), 1000);
        assert_eq!(read_i24(&[0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(read_i24(&[0x00, 0x00, 0x80]), -0x80_0000);
        assert_eq!(read_i24(&[0xFF, 0xFF, 0x7F]), 0x7F_FFFF);
    }

    #[test]
    fn test_decode_position() {
        let frame = frame_with(&[(4, [0xE8, 0x03, 0x00]), (7, [0x18, 0xFC, 0xFF])]);
        let fix = decode_fix(&frame).unwrap();
        assert!((fix.x - 1.0).abs() < 1e-12);
        assert!((fix.y + 1.0).abs() < 1e-12);
        assert_eq!(fix.vx, 0.0);
    }

    #[test]
    fn test_decode_velocity_scale() {
        // 2500 / 10000 = 0.25 m/s; -5000 / 10000 = -0.5 m/s
        let frame = frame_with(&[(13, [0xC4, 0x09, 0x00]), (16, [0x78, 0xEC, 0xFF])]);
        let fix = decode_fix(&frame).unwrap();
        assert!((fix.vx - 0.25).abs() < 1e-12);
        assert!((fix.vy + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_predicate_checks_sync_only() {
        let mut frame = [0u8; FRAME_LEN];
        assert!(!UwbFrame::is_frame_start(&frame));
        frame[..2].copy_from_slice(&SYNC);
        frame[127] = 0xAB;
        assert!(UwbFrame::is_frame_start(&frame));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            decode_fix(&[0x55, 0x01, 0x00]),
            Err(CodecError::BadLength { expected: 128, actual: 3 })
        ));
    }
}
