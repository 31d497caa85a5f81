//! Decoders for Classic-firmware Muse notification payloads.
//!
//! Pure functions, no I/O. Every multi-byte field is big-endian.
//!
//! | Function | Sensor | Layout |
//! |---|---|---|
//! | [`decode_eeg_samples`] | EEG | 12-bit packed, centred at 0x800, 0.48828125 µV/LSB |
//! | [`parse_ppg_reading`] | PPG | u16 index + 24-bit unsigned samples |
//! | [`parse_telemetry`] | Battery | 5 × u16 |
//! | [`parse_accelerometer`] / [`parse_gyroscope`] | IMU | u16 seq + 3 × (x, y, z) i16 |

use crate::types::{ImuData, PpgReading, TelemetryData, XyzSample};

const EEG_SCALE: f64 = 1000.0 / 2048.0;
const EEG_OFFSET: f64 = 2048.0;
const ACCEL_SCALE: f32 = 0.0000610352;
const GYRO_SCALE: f32 = 0.0074768;

/// Read the leading big-endian u16 packet index.
pub fn packet_index(data: &[u8]) -> Option<u16> {
    match data {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Unpack 12-bit values, two per 3-byte group.
///
/// `[AA BB CC]` → `AAB`, `BCC`. A trailing partial group contributes the
/// values it fully covers.
pub fn decode_unsigned_12bit(data: &[u8]) -> Vec<u16> {
    let mut out = Vec::with_capacity(data.len() * 2 / 3 + 1);
    for group in data.chunks(3) {
        if let [a, b, ..] = group {
            out.push((u16::from(*a) << 4) | (u16::from(*b) >> 4));
        }
        if let [_, b, c] = group {
            out.push(((u16::from(*b) & 0x0f) << 8) | u16::from(*c));
        }
    }
    out
}

/// Convert an EEG payload (bytes after the packet index) into µV.
pub fn decode_eeg_samples(data: &[u8]) -> Vec<f64> {
    decode_unsigned_12bit(data)
        .into_iter()
        .map(|raw| (f64::from(raw) - EEG_OFFSET) * EEG_SCALE)
        .collect()
}

/// Unpack 24-bit unsigned values; a partial trailing group is dropped.
pub fn decode_unsigned_24bit(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(3)
        .map(|c| u32::from_be_bytes([0, c[0], c[1], c[2]]))
        .collect()
}

/// Decode a whole PPG notification for `ppg_channel`.
pub fn parse_ppg_reading(data: &[u8], ppg_channel: usize, timestamp: f64) -> Option<PpgReading> {
    let index = packet_index(data)?;
    Some(PpgReading {
        index,
        ppg_channel,
        timestamp,
        samples: decode_unsigned_24bit(&data[2..]),
    })
}

/// Decode a telemetry notification; `None` when shorter than 10 bytes.
///
/// | Bytes | Field |
/// |---|---|
/// | 0–1 | sequence id |
/// | 2–3 | battery ÷ 512 → % |
/// | 4–5 | fuel gauge × 2.2 → mV |
/// | 8–9 | temperature (raw) |
pub fn parse_telemetry(data: &[u8]) -> Option<TelemetryData> {
    let word = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
    (data.len() >= 10).then(|| TelemetryData {
        sequence_id: word(0),
        battery_level: f32::from(word(2)) / 512.0,
        fuel_gauge_voltage: f32::from(word(4)) * 2.2,
        temperature: word(8),
    })
}

fn parse_imu(data: &[u8], scale: f32) -> Option<ImuData> {
    if data.len() < 20 {
        return None;
    }
    let axis = |i: usize| scale * f32::from(i16::from_be_bytes([data[i], data[i + 1]]));
    let xyz = |base: usize| XyzSample {
        x: axis(base),
        y: axis(base + 2),
        z: axis(base + 4),
    };
    Some(ImuData {
        sequence_id: u16::from_be_bytes([data[0], data[1]]),
        samples: [xyz(2), xyz(8), xyz(14)],
    })
}

/// Accelerometer notification in g; `None` when shorter than 20 bytes.
pub fn parse_accelerometer(data: &[u8]) -> Option<ImuData> {
    parse_imu(data, ACCEL_SCALE)
}

/// Gyroscope notification in °/s; `None` when shorter than 20 bytes.
pub fn parse_gyroscope(data: &[u8]) -> Option<ImuData> {
    parse_imu(data, GYRO_SCALE)
}

/// Reassembles control-channel JSON split across notifications.
///
/// ```
/// # use muse_recorder::parse::ControlAccumulator;
/// let mut acc = ControlAccumulator::default();
/// assert!(acc.push(r#"{"hw":"7."#).is_none());
/// assert_eq!(acc.push(r#"3"}"#).as_deref(), Some(r#"{"hw":"7.3"}"#));
/// ```
#[derive(Debug, Default)]
pub struct ControlAccumulator {
    buffer: String,
    depth: usize,
}

impl ControlAccumulator {
    /// Feed one fragment; returns a complete top-level object once its closing
    /// brace arrives. Text outside an object is discarded.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        for ch in fragment.chars() {
            match ch {
                '{' => {
                    if self.depth == 0 {
                        self.buffer.clear();
                    }
                    self.depth += 1;
                    self.buffer.push(ch);
                }
                '}' if self.depth > 0 => {
                    self.buffer.push(ch);
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(std::mem::take(&mut self.buffer));
                    }
                }
                _ if self.depth > 0 => self.buffer.push(ch),
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_bit_unpacking() {
        assert_eq!(decode_unsigned_12bit(&[0xab, 0xcd, 0xef]), vec![0xabc, 0xdef]);
        assert_eq!(decode_unsigned_12bit(&[0x12, 0x34]), vec![0x123]);
    }

    #[test]
    fn eeg_midscale_is_zero_microvolts() {
        // 0x800 0x800 packs as 80 08 00
        let uv = decode_eeg_samples(&[0x80, 0x08, 0x00]);
        assert_eq!(uv, vec![0.0, 0.0]);
        let full = decode_eeg_samples(&[0xff, 0xf0, 0x00]);
        assert!((full[0] - 999.51171875).abs() < 1e-9);
        assert!((full[1] + 1000.0).abs() < 1e-9);
    }

    #[test]
    fn ppg_reading_keeps_index_and_channel() {
        let r = parse_ppg_reading(&[0x00, 0x07, 0x01, 0x02, 0x03, 0xff], 2, 5.0).unwrap();
        assert_eq!(r.index, 7);
        assert_eq!(r.ppg_channel, 2);
        assert_eq!(r.samples, vec![0x010203]);
        assert!(parse_ppg_reading(&[0x01], 0, 0.0).is_none());
    }

    #[test]
    fn telemetry_fields() {
        let data = [0, 3, 0xc8, 0x00, 0x03, 0xe8, 0, 0, 0x01, 0x2c];
        let t = parse_telemetry(&data).unwrap();
        assert_eq!(t.sequence_id, 3);
        assert_eq!(t.battery_level, 100.0);
        assert!((t.fuel_gauge_voltage - 2200.0).abs() < 1e-3);
        assert_eq!(t.temperature, 300);
        assert!(parse_telemetry(&data[..9]).is_none());
    }

    #[test]
    fn imu_samples_in_order() {
        let mut data = [0u8; 20];
        data[1] = 9;
        // newest sample x = -1 raw
        data[14] = 0xff;
        data[15] = 0xff;
        let g = parse_gyroscope(&data).unwrap();
        assert_eq!(g.sequence_id, 9);
        assert_eq!(g.samples[0], XyzSample::default());
        assert!((g.latest().x + GYRO_SCALE).abs() < 1e-9);
        assert!(parse_accelerometer(&data[..19]).is_none());
    }

    #[test]
    fn accumulator_handles_nesting_and_garbage() {
        let mut acc = ControlAccumulator::default();
        assert!(acc.push("}noise{\"a\":{\"b\":1}").is_none());
        assert_eq!(acc.push("}").as_deref(), Some(r#"{"a":{"b":1}}"#));
        assert!(acc.push("tail").is_none());
    }
}
