//! Datagram encoding for feature frames.
//!
//! A packet is a compact JSON object followed by `|` and the CRC32 of the
//! JSON bytes as eight lowercase hex digits:
//!
//! ```text
//! {"node_id":1,"seq":42,"ts_us":1700000000000000,...}|3f2a9c01
//! ```
//!
//! Undefined directions travel as `[0, 0, 0]`, `net_energy` is not
//! transmitted and is recomputed from `mic_rms` and `noise_rms` on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PacketError;
use crate::geometry::Vec3;
use crate::types::{net_energy, FeatureFrame, NodeId};

/// Byte separating payload from CRC trailer.
pub const TRAILER_SEPARATOR: u8 = b'|';

/// Largest datagram the receiver accepts.
pub const MAX_PACKET_BYTES: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct Packet {
    node_id: NodeId,
    seq: u64,
    ts_us: i64,
    present: bool,
    mic_rms: Vec<f64>,
    noise_rms: Vec<f64>,
    #[serde(default)]
    crest: Vec<f64>,
    #[serde(default)]
    bandpower: Vec<f64>,
    #[serde(default)]
    dir_local: Vec<f64>,
    #[serde(default)]
    dir_conf: f64,
    #[serde(default)]
    total_energy: Option<f64>,
    #[serde(default)]
    heartbeat: bool,
}

/// Encode a frame into a datagram.
#[must_use]
pub fn encode(frame: &FeatureFrame) -> Vec<u8> {
    let direction = frame.direction_local.unwrap_or(Vec3::ZERO);
    let packet = Packet {
        node_id: frame.node_id,
        seq: frame.sequence,
        ts_us: frame.timestamp.timestamp_micros(),
        present: frame.present,
        mic_rms: frame.mic_rms.clone(),
        noise_rms: frame.noise_rms.clone(),
        crest: frame.crest.clone(),
        bandpower: frame.bandpower.clone(),
        dir_local: vec![direction.x, direction.y, direction.z],
        dir_conf: frame.direction_confidence,
        total_energy: Some(frame.total_energy),
        heartbeat: frame.heartbeat,
    };

    // Serializing plain numbers and vectors into memory cannot fail.
    let mut bytes = serde_json::to_vec(&packet).unwrap_or_default();
    let crc = crc32fast::hash(&bytes);
    bytes.push(TRAILER_SEPARATOR);
    bytes.extend_from_slice(format!("{crc:08x}").as_bytes());
    bytes
}

/// Decode a datagram into a frame, verifying the CRC.
///
/// # Errors
///
/// Returns a [`PacketError`] when the trailer is missing or wrong, the
/// payload is not a packet, or the timestamp is out of range.
pub fn decode(data: &[u8]) -> Result<FeatureFrame, PacketError> {
    let split = data
        .iter()
        .rposition(|b| *b == TRAILER_SEPARATOR)
        .ok_or(PacketError::MissingTrailer)?;
    let (payload, trailer) = (&data[..split], &data[split + 1..]);

    let trailer = std::str::from_utf8(trailer).map_err(|_| PacketError::MalformedTrailer)?;
    let got = u32::from_str_radix(trailer.trim(), 16).map_err(|_| PacketError::MalformedTrailer)?;
    let expected = crc32fast::hash(payload);
    if expected != got {
        return Err(PacketError::CrcMismatch { expected, got });
    }

    let packet: Packet = serde_json::from_slice(payload)?;
    let timestamp: DateTime<Utc> = DateTime::from_timestamp_micros(packet.ts_us)
        .ok_or(PacketError::Timestamp { ts_us: packet.ts_us })?;

    let direction_local = match packet.dir_local.as_slice() {
        [x, y, z] => Vec3::new(*x, *y, *z).normalized(),
        _ => None,
    };
    let mic_rms: Vec<f64> = packet.mic_rms.iter().map(|v| v.max(0.0)).collect();
    let noise_rms: Vec<f64> = packet.noise_rms.iter().map(|v| v.max(0.0)).collect();
    let total_energy = packet.total_energy.unwrap_or_else(|| mic_rms.iter().sum());

    Ok(FeatureFrame {
        node_id: packet.node_id,
        sequence: packet.seq,
        timestamp,
        net_energy: net_energy(&mic_rms, &noise_rms),
        mic_rms,
        noise_rms,
        crest: packet.crest,
        bandpower: packet.bandpower,
        total_energy,
        present: packet.present,
        direction_local,
        direction_confidence: packet.dir_conf.clamp(0.0, 1.0),
        heartbeat: packet.heartbeat,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame() -> FeatureFrame {
        FeatureFrame {
            node_id: 2,
            sequence: 17,
            timestamp: Utc.timestamp_micros(1_700_000_000_123_456).unwrap(),
            mic_rms: vec![0.9, 0.4, 0.1],
            noise_rms: vec![0.05, 0.05, 0.05],
            net_energy: vec![0.85, 0.35, 0.05],
            crest: vec![1.4, 1.4, 1.5],
            bandpower: vec![0.2, 0.1],
            total_energy: 1.4,
            present: true,
            direction_local: Some(Vec3::new(0.0, 0.6, 0.8)),
            direction_confidence: 1.0,
            heartbeat: false,
        }
    }

    #[test]
    fn decode_recovers_frame_fields() {
        let original = frame();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded.node_id, 2);
        assert_eq!(decoded.sequence, 17);
        assert_eq!(decoded.timestamp, original.timestamp);
        assert_eq!(decoded.mic_rms, original.mic_rms);
        assert!(decoded.present);
        let d = decoded.direction_local.unwrap();
        assert!((d.y - 0.6).abs() < 1e-9 && (d.z - 0.8).abs() < 1e-9);
        for (a, b) in decoded.net_energy.iter().zip(&original.net_energy) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_direction_decodes_as_none() {
        let mut f = frame();
        f.direction_local = None;
        let decoded = decode(&encode(&f)).unwrap();
        assert!(decoded.direction_local.is_none());
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut bytes = encode(&frame());
        bytes[5] ^= 0x01;
        assert!(matches!(decode(&bytes), Err(PacketError::CrcMismatch { .. })));
    }

    #[test]
    fn missing_trailer_is_rejected() {
        assert!(matches!(decode(b"{\"node_id\":1}"), Err(PacketError::MissingTrailer)));
    }

    #[test]
    fn bad_hex_trailer_is_rejected() {
        assert!(matches!(decode(b"{}|zzzz"), Err(PacketError::MalformedTrailer)));
    }

    #[test]
    fn decodes_packet_without_optional_fields() {
        let payload = br#"{"node_id":4,"seq":1,"ts_us":1700000000000000,"present":false,"mic_rms":[0.1,0.2,0.3],"noise_rms":[0.05,0.05,0.05]}"#;
        let mut bytes = payload.to_vec();
        bytes.push(b'|');
        bytes.extend_from_slice(format!("{:08x}", crc32fast::hash(payload)).as_bytes());
        let f = decode(&bytes).unwrap();
        assert_eq!(f.node_id, 4);
        assert!((f.total_energy - 0.6).abs() < 1e-12);
        assert!(f.direction_local.is_none());
    }
}
