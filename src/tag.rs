/*! Tag-notification parsing (`CMD=0x12`).

During inventory the RF module pushes one notification per tag read:
a Protocol-Control word, the EPC (its length encoded in the PC's top
five bits), then a run of TLV extensions for antenna, RSSI, TID and
friends. Stored-tag records retrieved with `(0x01, 0x1B)` are the same
layout plus firmware-appended timestamp and index TLVs.

TLVs arrive truncated in the wild, so the parser never fails: bounds
trouble produces a partial record with the `error` field set.
*/
use serde::Serialize;

use crate::proto::hex;

/// TLV type numbers.
mod tlv {
    /// `[0x01][ant_num][sub_ant]`.
    pub const ANTENNA: u8 = 0x01;
    /// `[0x02][rssi][rssi2]`.
    pub const RSSI: u8 = 0x02;
    /// `[0x03][flag][len_hi][len_lo][data…]`.
    pub const TID: u8 = 0x03;
    /// Extra data block, same shape as TID.
    pub const EXTRA1: u8 = 0x04;
    /// Extra data block, same shape as TID.
    pub const EXTRA2: u8 = 0x05;
    /// `[0x06][sub_ant]`, alternative sub-antenna carrier.
    pub const SUB_ANT: u8 = 0x06;
    /// `[0x07][sec u32][usec u32]`, appended to stored records.
    pub const TIMESTAMP: u8 = 0x07;
    /// `[0x08][index u32]`, appended to stored records.
    pub const INDEX: u8 = 0x08;
}

/// One decoded tag read, shaped for JSON delivery.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TagReport {
    /// Event type discriminator, always `"tag"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Running count assigned by the streamer.
    pub count: u64,
    /// Unix timestamp (fractional seconds) of reception.
    pub timestamp: f64,
    /// EPC, uppercase hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epc: Option<String>,
    /// Protocol Control word, `0x`-prefixed hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pc: Option<String>,
    /// Physical antenna 1..=8, derived `ant_num*2 + sub_ant + 1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antenna: Option<u8>,
    /// RF port 0..=3.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ant_num: Option<u8>,
    /// Mux position 0..=1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_ant: Option<u8>,
    /// Signal strength byte.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<u8>,
    /// Second signal byte.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi2: Option<u8>,
    /// TID, uppercase hex, when the tag reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// Stored-record timestamp seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_seconds: Option<u32>,
    /// Stored-record timestamp microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_micros: Option<u32>,
    /// Stored-record auto-increment index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_index: Option<u32>,
    /// The notification payload, lowercase hex.
    pub raw_hex: String,
    /// Notification subcommand, `0x`-prefixed hex.
    pub sub_cmd: String,
    /// Set when the payload was malformed or truncated; the fields
    /// parsed before the trouble are still populated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TagReport {
    /// Parse a notification payload. Infallible: malformed input
    /// yields a partial record with `error` set.
    #[must_use]
    pub fn parse(sub_cmd: u8, payload: &[u8]) -> Self {
        let mut r = TagReport {
            kind: "tag",
            raw_hex: hex(payload),
            sub_cmd: format!("{sub_cmd:#04x}"),
            ..TagReport::default()
        };

        if payload.len() < 2 {
            r.error = Some("payload shorter than the PC word".into());
            return r;
        }
        let pc = u16::from_be_bytes([payload[0], payload[1]]);
        r.pc = Some(format!("{pc:#06x}"));
        let epc_len = usize::from((pc >> 11) & 0x1F) * 2;
        let mut pos = 2;
        if payload.len() < pos + epc_len {
            r.epc = Some(hex(&payload[pos..]).to_uppercase());
            r.error = Some(format!(
                "EPC truncated: PC promises {epc_len} bytes, {} present",
                payload.len() - pos
            ));
            return r;
        }
        r.epc = Some(hex(&payload[pos..pos + epc_len]).to_uppercase());
        pos += epc_len;

        while pos < payload.len() {
            let t = payload[pos];
            let rest = payload.len() - pos - 1;
            match t {
                tlv::ANTENNA => {
                    if rest < 2 {
                        r.error = Some("antenna TLV truncated".into());
                        break;
                    }
                    r.ant_num = Some(payload[pos + 1]);
                    r.sub_ant = Some(payload[pos + 2]);
                    pos += 3;
                }
                tlv::RSSI => {
                    if rest == 0 {
                        r.error = Some("RSSI TLV truncated".into());
                        break;
                    }
                    r.rssi = Some(payload[pos + 1]);
                    if rest >= 2 {
                        r.rssi2 = Some(payload[pos + 2]);
                        pos += 3;
                    } else {
                        // A single trailing signal byte shows up in
                        // live captures; accept it.
                        pos = payload.len();
                    }
                }
                tlv::TID | tlv::EXTRA1 | tlv::EXTRA2 => {
                    if rest < 3 {
                        r.error = Some(format!("TLV {t:#04x} header truncated"));
                        break;
                    }
                    let len =
                        usize::from(u16::from_be_bytes([payload[pos + 2], payload[pos + 3]]));
                    let start = pos + 4;
                    let have = payload.len().saturating_sub(start).min(len);
                    if t == tlv::TID {
                        r.tid = Some(hex(&payload[start..start + have]).to_uppercase());
                    }
                    if have < len {
                        r.error = Some(format!(
                            "TLV {t:#04x} data truncated: {have} of {len} bytes"
                        ));
                        break;
                    }
                    pos = start + len;
                }
                tlv::SUB_ANT => {
                    if rest == 0 {
                        r.error = Some("sub-antenna TLV truncated".into());
                        break;
                    }
                    r.sub_ant = Some(payload[pos + 1]);
                    pos += 2;
                }
                tlv::TIMESTAMP => {
                    if rest < 8 {
                        r.error = Some("timestamp TLV truncated".into());
                        break;
                    }
                    r.time_seconds = Some(u32::from_be_bytes(
                        payload[pos + 1..pos + 5].try_into().unwrap(),
                    ));
                    r.time_micros = Some(u32::from_be_bytes(
                        payload[pos + 5..pos + 9].try_into().unwrap(),
                    ));
                    pos += 9;
                }
                tlv::INDEX => {
                    if rest < 4 {
                        r.error = Some("index TLV truncated".into());
                        break;
                    }
                    r.tag_index = Some(u32::from_be_bytes(
                        payload[pos + 1..pos + 5].try_into().unwrap(),
                    ));
                    pos += 5;
                }
                _ => {
                    // The firmware skips a single unknown byte and
                    // keeps scanning; mirror that.
                    pos += 1;
                }
            }
        }

        if let Some(ant) = r.ant_num {
            let sub = r.sub_ant.unwrap_or(0);
            r.antenna = Some(ant * 2 + sub + 1);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // PC for a 6-word (12-byte) EPC.
    const PC6: [u8; 2] = [0x30, 0x00];
    const EPC12: [u8; 12] = [
        0xE2, 0x80, 0x11, 0x06, 0x00, 0x00, 0x02, 0x12, 0x34, 0x56, 0x78, 0x9A,
    ];

    fn payload(tlvs: &[u8]) -> Vec<u8> {
        let mut p = PC6.to_vec();
        p.extend_from_slice(&EPC12);
        p.extend_from_slice(tlvs);
        p
    }

    #[test]
    fn epc_and_antenna_and_rssi() {
        let p = payload(&[0x01, 0x00, 0x00, 0x02, 0x12, 0x34]);
        let r = TagReport::parse(0x30, &p);
        assert_eq!(r.epc.as_deref(), Some("E2801106000002123456789A"));
        assert_eq!(r.pc.as_deref(), Some("0x3000"));
        assert_eq!(r.ant_num, Some(0));
        assert_eq!(r.sub_ant, Some(0));
        assert_eq!(r.antenna, Some(1));
        assert_eq!(r.rssi, Some(0x12));
        assert_eq!(r.rssi2, Some(0x34));
        assert_eq!(r.sub_cmd, "0x30");
        assert!(r.error.is_none());
    }

    #[test]
    fn trailing_single_rssi_byte_tolerated() {
        // Live captures end some notifications with [02][rssi] only.
        let p = payload(&[0x01, 0x01, 0x01, 0x02, 0x55]);
        let r = TagReport::parse(0x00, &p);
        assert_eq!(r.rssi, Some(0x55));
        assert_eq!(r.rssi2, None);
        assert_eq!(r.antenna, Some(4)); // port 1, sub 1 -> antenna 4
        assert!(r.error.is_none());
    }

    #[test]
    fn tid_block() {
        let tid = [0xE2, 0x00, 0x34, 0x12];
        let mut tlvs = vec![0x03, 0x01, 0x00, tid.len() as u8];
        tlvs.extend_from_slice(&tid);
        let r = TagReport::parse(0x30, &payload(&tlvs));
        assert_eq!(r.tid.as_deref(), Some("E2003412"));
        assert!(r.error.is_none());
    }

    #[test]
    fn truncated_tid_is_partial_not_fatal() {
        // Header claims 8 data bytes, only 2 follow.
        let tlvs = [0x03, 0x01, 0x00, 0x08, 0xE2, 0x00];
        let r = TagReport::parse(0x30, &payload(&tlvs));
        assert_eq!(r.tid.as_deref(), Some("E200"));
        assert!(r.error.is_some());
        assert!(r.epc.is_some());
    }

    #[test]
    fn truncated_epc() {
        let r = TagReport::parse(0x00, &[0x30, 0x00, 0xE2, 0x80]);
        assert!(r.error.is_some());
        assert_eq!(r.epc.as_deref(), Some("E280"));
    }

    #[test]
    fn sub_ant_alternative_carrier() {
        let p = payload(&[0x01, 0x01, 0x00, 0x06, 0x01]);
        let r = TagReport::parse(0x20, &p);
        // TLV 6 overrides the sub-antenna from TLV 1.
        assert_eq!(r.sub_ant, Some(1));
        assert_eq!(r.antenna, Some(4));
    }

    #[test]
    fn stored_record_extensions() {
        let mut tlvs = vec![0x07];
        tlvs.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        tlvs.extend_from_slice(&123_456u32.to_be_bytes());
        tlvs.push(0x08);
        tlvs.extend_from_slice(&42u32.to_be_bytes());
        let r = TagReport::parse(0x30, &payload(&tlvs));
        assert_eq!(r.time_seconds, Some(1_700_000_000));
        assert_eq!(r.time_micros, Some(123_456));
        assert_eq!(r.tag_index, Some(42));
    }

    #[test]
    fn unknown_tlv_skipped() {
        let p = payload(&[0x5A, 0x01, 0x02, 0x03]);
        let r = TagReport::parse(0x30, &p);
        // 0x5A is skipped; 0x01 then parses as an antenna TLV.
        assert_eq!(r.ant_num, Some(0x02));
        assert_eq!(r.sub_ant, Some(0x03));
    }

    #[test]
    fn empty_payload() {
        let r = TagReport::parse(0x00, &[]);
        assert!(r.error.is_some());
        assert!(r.epc.is_none());
    }
}
