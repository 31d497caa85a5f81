//! Muse GATT layout, sampling constants, and control-channel framing.
//!
//! Vendor characteristics live in the `273eXXXX-4c4d-454d-96be-f03bac821358`
//! namespace; only the Classic per-sensor layout is used here.

use uuid::Uuid;

const fn muse_char(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x4c4d_454d_96be_f03bac821358)
}

/// Control channel: length-prefixed ASCII commands in, JSON fragments out.
pub const CONTROL_CHARACTERISTIC: Uuid = muse_char(0x273e_0001);

/// Battery / fuel gauge / temperature, about once per second.
pub const TELEMETRY_CHARACTERISTIC: Uuid = muse_char(0x273e_000b);

pub const GYROSCOPE_CHARACTERISTIC: Uuid = muse_char(0x273e_0009);

pub const ACCELEROMETER_CHARACTERISTIC: Uuid = muse_char(0x273e_000a);

/// EEG characteristics in electrode order: TP9, AF7, AF8, TP10, AUX.
pub const EEG_CHARACTERISTICS: [Uuid; 5] = [
    muse_char(0x273e_0003),
    muse_char(0x273e_0004),
    muse_char(0x273e_0005),
    muse_char(0x273e_0006),
    muse_char(0x273e_0007),
];

/// PPG characteristics in channel order: ambient, infrared, red.
pub const PPG_CHARACTERISTICS: [Uuid; 3] = [
    muse_char(0x273e_000f),
    muse_char(0x273e_0010),
    muse_char(0x273e_0011),
];

// ── Sampling ─────────────────────────────────────────────────────────────────

pub const EEG_FREQUENCY: f64 = 256.0;
pub const EEG_SAMPLES_PER_READING: usize = 12;
pub const PPG_FREQUENCY: f64 = 64.0;
pub const PPG_SAMPLES_PER_READING: usize = 6;
/// Accelerometer and gyroscope notification rate (3 samples each).
pub const IMU_FREQUENCY: f64 = 52.0;

// ── Channels ─────────────────────────────────────────────────────────────────

pub const EEG_CHANNEL_NAMES: [&str; 5] = ["TP9", "AF7", "AF8", "TP10", "AUX"];

/// Standard EEG channel count without the AUX input.
pub const EEG_CHANNELS: usize = 4;

pub const PPG_CHANNEL_NAMES: [&str; 3] = ["ambient", "infrared", "red"];

/// Electrode used for blink classification and frame-rate timing (AF7).
///
/// AF7 sits above the left eye, so eye blinks dominate its signal.
pub const REFERENCE_ELECTRODE: usize = 1;

// ── Control framing ──────────────────────────────────────────────────────────

/// Frame a command for the control characteristic.
///
/// ```text
/// byte 0     : payload length (command + trailing '\n')
/// bytes 1..N : ASCII command
/// byte N+1   : '\n'
/// ```
///
/// ```
/// # use muse_recorder::protocol::encode_command;
/// assert_eq!(encode_command("p21"), b"\x04p21\n");
/// ```
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(cmd.len() + 2);
    frame.push((cmd.len() + 1) as u8);
    frame.extend_from_slice(cmd.as_bytes());
    frame.push(b'\n');
    frame
}

/// Strip the length prefix from a control notification.
///
/// The declared length is clamped to the bytes actually present. Empty input
/// yields an empty string.
pub fn decode_response(bytes: &[u8]) -> String {
    let Some((&len, body)) = bytes.split_first() else {
        return String::new();
    };
    let end = (len as usize).min(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_uuids_match_vendor_namespace() {
        assert_eq!(
            CONTROL_CHARACTERISTIC.to_string(),
            "273e0001-4c4d-454d-96be-f03bac821358"
        );
        assert_eq!(
            EEG_CHARACTERISTICS[1].to_string(),
            "273e0004-4c4d-454d-96be-f03bac821358"
        );
        assert_eq!(
            PPG_CHARACTERISTICS[2].to_string(),
            "273e0011-4c4d-454d-96be-f03bac821358"
        );
    }

    #[test]
    fn decode_clamps_declared_length() {
        assert_eq!(decode_response(&[9, b'{', b'}']), "{}");
        assert_eq!(decode_response(&[1, b'a', b'b']), "a");
        assert_eq!(decode_response(&[]), "");
    }

    #[test]
    fn reference_electrode_is_af7() {
        assert_eq!(EEG_CHANNEL_NAMES[REFERENCE_ELECTRODE], "AF7");
    }
}
