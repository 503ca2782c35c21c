// Wheeltec-style chassis serial protocol
//
// Inbound motion frame (24 bytes):
//   [0x7B, flag, vx, vy, vz, ax, ay, az, wx, wy, wz, ..., 0x7D]
//   nine big-endian i16 values starting at byte 2
// Outbound command frame (11 bytes):
//   [0x7B, 0x00, 0x00, X_hi, X_lo, Y_hi, Y_lo, Z_hi, Z_lo, BCC, 0x7D]

use crate::frame::{check_len, Axis, CodecError, FrameFormat};

pub const FRAME_HEADER: u8 = 0x7B;
pub const FRAME_TAIL: u8 = 0x7D;

/// Motion feedback frame length
pub const STATE_FRAME_LEN: usize = 24;
/// Velocity command frame length
pub const CMD_FRAME_LEN: usize = 11;

/// Raw velocity unit is mm/s
const VELOCITY_SCALE: f64 = 1000.0;
/// Raw accelerometer unit per m/s^2
const ACCEL_SCALE: f64 = 1672.0;
/// Raw gyro unit per rad/s
const GYRO_SCALE: f64 = 3753.0;
/// Command values go out in thousandths (mm/s, mrad/s)
const COMMAND_SCALE: f64 = 1000.0;

/// Motion feedback frame marker
pub struct ChassisFrame;

impl FrameFormat for ChassisFrame {
    const FRAME_LEN: usize = STATE_FRAME_LEN;
    const SCAN_THRESHOLD: usize = 50;

    fn is_frame_start(window: &[u8]) -> bool {
        window[0] == FRAME_HEADER && window[STATE_FRAME_LEN - 1] == FRAME_TAIL
    }
}

/// One decoded motion frame in SI units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionSample {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
}

impl MotionSample {
    /// Values in shared-memory order
    pub fn as_array(&self) -> [f64; 9] {
        [
            self.vx, self.vy, self.vz, self.ax, self.ay, self.az, self.wx, self.wy, self.wz,
        ]
    }
}

/// Velocity command recovered from an outbound frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChassisCommand {
    pub vx: f64,
    pub vy: f64,
    pub wz: f64,
}

/// BCC: running XOR over `data`
pub fn bcc_xor(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

fn read_i16(frame: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([frame[offset], frame[offset + 1]])
}

/// Scale a command value to the wire integer, refusing anything that would wrap
fn to_wire(axis: Axis, value: f64) -> Result<[u8; 2], CodecError> {
    let scaled = (value * COMMAND_SCALE).round();
    // NaN fails the range check too
    if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&scaled) {
        return Err(CodecError::RangeFault { axis, value });
    }
    Ok((scaled as i16).to_be_bytes())
}

/// Decode a 24-byte motion frame
pub fn decode_state(frame: &[u8]) -> Result<MotionSample, CodecError> {
    check_len(frame, STATE_FRAME_LEN)?;

    let raw: [i16; 9] = std::array::from_fn(|i| read_i16(frame, 2 + 2 * i));

    Ok(MotionSample {
        vx: f64::from(raw[0]) / VELOCITY_SCALE,
        vy: f64::from(raw[1]) / VELOCITY_SCALE,
        vz: f64::from(raw[2]) / VELOCITY_SCALE,
        ax: f64::from(raw[3]) / ACCEL_SCALE,
        ay: f64::from(raw[4]) / ACCEL_SCALE,
        az: f64::from(raw[5]) / ACCEL_SCALE,
        wx: f64::from(raw[6]) / GYRO_SCALE,
        wy: f64::from(raw[7]) / GYRO_SCALE,
        wz: f64::from(raw[8]) / GYRO_SCALE,
    })
}

/// Encode a velocity command (m/s, rad/s). Y is always sent as zero on this base.
pub fn encode_command(vx: f64, wz: f64) -> Result<[u8; CMD_FRAME_LEN], CodecError> {
    let x = to_wire(Axis::X, vx)?;
    let y = to_wire(Axis::Y, 0.0)?;
    let z = to_wire(Axis::Z, wz)?;

    let mut frame = [0u8; CMD_FRAME_LEN];
    frame[0] = FRAME_HEADER;
    frame[3..5].copy_from_slice(&x);
    frame[5..7].copy_from_slice(&y);
    frame[7..9].copy_from_slice(&z);
    frame[9] = bcc_xor(&frame[..9]);
    frame[10] = FRAME_TAIL;
    Ok(frame)
}

/// Parse an outbound command frame back into SI units, checking every fixed byte
pub fn decode_command(frame: &[u8]) -> Result<ChassisCommand, CodecError> {
    check_len(frame, CMD_FRAME_LEN)?;

    if frame[..3] != [FRAME_HEADER, 0x00, 0x00] {
        return Err(CodecError::BadHeader(frame[..3].to_vec()));
    }
    if frame[10] != FRAME_TAIL {
        return Err(CodecError::BadTerminator(frame[10]));
    }
    let expected = bcc_xor(&frame[..9]);
    if frame[9] != expected {
        return Err(CodecError::ChecksumMismatch {
            expected,
            actual: frame[9],
        });
    }

    Ok(ChassisCommand {
        vx: f64::from(read_i16(frame, 3)) / COMMAND_SCALE,
        vy: f64::from(read_i16(frame, 5)) / COMMAND_SCALE,
        wz: f64::from(read_i16(frame, 7)) / COMMAND_SCALE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Resynchronizer;
    use proptest::prelude::*;

    fn motion_frame() -> Vec<u8> {
        let mut frame = vec![0x7B, 0x00, 0x00, 0x64, 0x00, 0x00, 0xFF, 0x9F];
        frame.extend_from_slice(&[0x00; 15]);
        frame.push(0x7D);
        frame
    }

    #[test]
    fn test_decode_state_scaling() {
        // Bytes 2..4 carry vx, bytes 12..14 carry az
        let mut frame = vec![0u8; STATE_FRAME_LEN];
        frame[0] = FRAME_HEADER;
        frame[2..4].copy_from_slice(&100i16.to_be_bytes());
        frame[12..14].copy_from_slice(&(-97i16).to_be_bytes());
        frame[18..20].copy_from_slice(&3753i16.to_be_bytes());
        frame[23] = FRAME_TAIL;

        let s = decode_state(&frame).unwrap();
        assert!((s.vx - 0.100).abs() < 1e-12);
        assert!((s.az - (-97.0 / 1672.0)).abs() < 1e-12);
        assert!((s.wz - 1.0).abs() < 1e-12);
        assert_eq!(s.vy, 0.0);
        assert_eq!(s.ax, 0.0);
        assert_eq!(s.wx, 0.0);
    }

    #[test]
    fn test_decode_reference_bytes() {
        // 7B 00 | 00 64 | 00 00 | FF 9F | 00.. | 7D
        let frame = motion_frame();
        assert_eq!(frame.len(), STATE_FRAME_LEN);
        let s = decode_state(&frame).unwrap();
        assert!((s.vx - 0.100).abs() < 1e-12);
        assert_eq!(s.vy, 0.0);
        assert!((s.vz - (-97.0 / 1000.0)).abs() < 1e-12);
        assert_eq!(s.ax, 0.0);
        assert_eq!(s.az, 0.0);
        assert_eq!(s.wz, 0.0);
    }

    #[test]
    fn test_decode_state_rejects_short_frame() {
        assert_eq!(
            decode_state(&[0x7B; 10]),
            Err(CodecError::BadLength {
                expected: 24,
                actual: 10
            })
        );
    }

    #[test]
    fn test_encode_known_frame() {
        let frame = encode_command(0.1, 0.3).unwrap();
        assert_eq!(
            frame,
            [0x7B, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x01, 0x2C, 0x32, 0x7D]
        );
    }

    #[test]
    fn test_encode_negative_twos_complement() {
        let frame = encode_command(-0.033, 0.0).unwrap();
        assert_eq!(&frame[3..5], &[0xFF, 0xDF]);
    }

    #[test]
    fn test_encode_zero_checksum_is_header() {
        let frame = encode_command(0.0, 0.0).unwrap();
        assert_eq!(frame[9], 0x7B);
    }

    #[test]
    fn test_encode_range_fault() {
        assert!(encode_command(32.767, -32.768).is_ok());
        assert!(matches!(
            encode_command(33.0, 0.0),
            Err(CodecError::RangeFault { axis: Axis::X, .. })
        ));
        assert!(matches!(
            encode_command(0.0, -40.0),
            Err(CodecError::RangeFault { axis: Axis::Z, .. })
        ));
        assert!(encode_command(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_decode_command_checks_bcc() {
        let mut frame = encode_command(0.2, -0.1).unwrap();
        frame[4] ^= 0x01;
        assert!(matches!(
            decode_command(&frame),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_command_checks_terminator() {
        let mut frame = encode_command(0.2, -0.1).unwrap();
        frame[10] = 0x00;
        assert_eq!(decode_command(&frame), Err(CodecError::BadTerminator(0x00)));
    }

    #[test]
    fn test_frame_predicate_needs_both_ends() {
        let mut frame = [0u8; STATE_FRAME_LEN];
        frame[0] = FRAME_HEADER;
        assert!(!ChassisFrame::is_frame_start(&frame));
        frame[23] = FRAME_TAIL;
        assert!(ChassisFrame::is_frame_start(&frame));
    }

    proptest! {
        #[test]
        fn command_roundtrip(vx in -32.767..32.767f64, wz in -32.767..32.767f64) {
            let frame = encode_command(vx, wz).unwrap();
            let cmd = decode_command(&frame).unwrap();
            prop_assert!((cmd.vx - vx).abs() <= 0.0005 + 1e-9);
            prop_assert!((cmd.wz - wz).abs() <= 0.0005 + 1e-9);
            prop_assert_eq!(cmd.vy, 0.0);
        }

        #[test]
        fn one_frame_survives_surrounding_noise(
            lead in prop::collection::vec(any::<u8>().prop_filter("no header", |b| *b != FRAME_HEADER), 0..80),
            trail in prop::collection::vec(any::<u8>().prop_filter("no header", |b| *b != FRAME_HEADER), 27..80),
        ) {
            let mut stream = lead.clone();
            stream.extend_from_slice(&motion_frame());
            stream.extend_from_slice(&trail);

            let mut resync = Resynchronizer::<ChassisFrame>::new();
            resync.push(&stream);
            let mut frames = Vec::new();
            resync.drain_frames(|f| frames.push(f.to_vec()));

            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0], &motion_frame());
            prop_assert_eq!(resync.slipped(), (stream.len() - resync.buffered().len() - STATE_FRAME_LEN) as u64);
            prop_assert!(resync.buffered().len() <= ChassisFrame::SCAN_THRESHOLD);
        }
    }
}
