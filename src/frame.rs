/*! Wire framing for the reader protocol.

Every exchange is a frame:

```text
[0xAA] [CMD] [SUB] [LEN_H] [LEN_L] [payload…] [CRC_H] [CRC_L]
```

The CRC-16 covers every byte after the sync and before the CRC field.
Length is big-endian and counts payload bytes only; the firmware
rejects lengths of 0x400 and up.

The RS-485 variant sets bit 5 of the command byte and inserts an
address byte between `SUB` and the length:

```text
[0xAA] [CMD|0x20] [SUB] [ADDR] [LEN_H] [LEN_L] [payload…] [CRC_H] [CRC_L]
```
*/
use log::warn;

use crate::crc::crc16;
use crate::{Error, Result};

/// Frame sync byte.
pub const SYNC: u8 = 0xAA;

/// RS-485 flag bit in the command byte.
pub const RS485_FLAG: u8 = 0x20;

/// Largest payload the firmware accepts. A declared length of 0x400
/// or more is a framing violation.
pub const MAX_PAYLOAD: usize = 0x3FF;

/// Smallest possible frame on the wire: sync + cmd + sub + len + crc.
pub const MIN_FRAME: usize = 7;

/// A parsed protocol frame.
///
/// `cmd` never carries the RS-485 flag bit; the presence of `addr`
/// implies it. Two frames compare equal independent of how they were
/// framed on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command byte, flag bits stripped.
    pub cmd: u8,
    /// Subcommand byte.
    pub sub: u8,
    /// RS-485 address byte, when the frame uses the bus variant.
    pub addr: Option<u8>,
    /// Payload, 0..=1023 bytes.
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Frame({:#04x},{:#04x}", self.cmd, self.sub)?;
        if let Some(a) = self.addr {
            write!(f, ",addr={a:#04x}")?;
        }
        write!(f, ",len={},[", self.payload.len())?;
        for b in &self.payload {
            write!(f, "{b:02X}")?;
        }
        write!(f, "])")
    }
}

impl Frame {
    /// Create a frame, validating the payload length and the command
    /// byte (bit 5 is reserved for the bus flag).
    pub fn new(cmd: u8, sub: u8, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::Usage(format!(
                "payload too long: {} > {MAX_PAYLOAD}",
                payload.len()
            )));
        }
        if cmd & RS485_FLAG != 0 {
            return Err(Error::Usage(format!(
                "command byte {cmd:#04x} carries the RS-485 flag bit"
            )));
        }
        Ok(Self {
            cmd,
            sub,
            addr: None,
            payload,
        })
    }

    /// Serialize to wire bytes, computing the CRC.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut out = Vec::with_capacity(MIN_FRAME + self.payload.len() + 1);
        out.push(SYNC);
        match self.addr {
            Some(addr) => {
                out.push(self.cmd | RS485_FLAG);
                out.push(self.sub);
                out.push(addr);
            }
            None => {
                out.push(self.cmd);
                out.push(self.sub);
            }
        }
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc16(&out[1..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Add the bus address, turning this into an RS-485 frame. The
    /// re-encoded form grows by one byte and carries a fresh CRC.
    #[must_use]
    pub fn rs485_wrap(mut self, addr: u8) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Strip the bus address. Returns `None` (drop the frame) when the
    /// frame is addressed to somebody else; frames without the flag
    /// pass through untouched.
    #[must_use]
    pub fn rs485_strip(mut self, local_addr: u8) -> Option<Self> {
        match self.addr {
            None => Some(self),
            Some(a) if a == local_addr => {
                self.addr = None;
                Some(self)
            }
            Some(_) => None,
        }
    }

    /// Status byte of a SET-style reply, checked against zero.
    pub fn status(&self) -> Result<u8> {
        match self.payload.first() {
            Some(0) => Ok(0),
            Some(&s) => Err(Error::Device(s)),
            None => Err(Error::Protocol("empty status payload".into())),
        }
    }
}

/// Outcome of one decode attempt over a byte buffer.
///
/// The `usize` in each variant tells the caller how many leading bytes
/// to discard: everything consumed on success, garbage before the sync
/// on `NeedMore`, one byte past the failed sync on `Resync` so the
/// scan resumes without losing a frame that starts later in the
/// buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, CRC-verified frame.
    Frame(Frame, usize),
    /// The buffer ends before the frame does.
    NeedMore(usize),
    /// Bad length or CRC at this sync position.
    Resync(usize),
}

/// Try to decode one frame from the front of `buf`.
///
/// Scans for the sync byte; leading garbage never hides a valid frame
/// behind it. Oversized declared lengths and CRC mismatches yield
/// [`Decoded::Resync`] without allocating.
#[must_use]
pub fn decode_one(buf: &[u8]) -> Decoded {
    let Some(pos) = buf.iter().position(|&b| b == SYNC) else {
        return Decoded::NeedMore(buf.len());
    };
    let b = &buf[pos..];
    if b.len() < MIN_FRAME {
        return Decoded::NeedMore(pos);
    }
    let rs485 = b[1] & RS485_FLAG != 0;
    let (len_at, overhead) = if rs485 { (4, MIN_FRAME + 1) } else { (3, MIN_FRAME) };
    if b.len() < len_at + 2 {
        return Decoded::NeedMore(pos);
    }
    let len = usize::from(u16::from_be_bytes([b[len_at], b[len_at + 1]]));
    if len > MAX_PAYLOAD {
        warn!("frame at +{pos} declares length {len:#x}, resyncing");
        return Decoded::Resync(pos + 1);
    }
    let total = overhead + len;
    if b.len() < total {
        return Decoded::NeedMore(pos);
    }
    let want = u16::from_be_bytes([b[total - 2], b[total - 1]]);
    let got = crc16(&b[1..total - 2]);
    if want != got {
        warn!("CRC mismatch at +{pos}: want {want:#06x}, got {got:#06x}");
        return Decoded::Resync(pos + 1);
    }
    let body = len_at + 2;
    let frame = Frame {
        cmd: b[1] & !RS485_FLAG,
        sub: b[2],
        addr: rs485.then(|| b[3]),
        payload: b[body..body + len].to_vec(),
    };
    Decoded::Frame(frame, pos + total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_get_mac() -> Result<()> {
        let f = Frame::new(0x01, 0x06, vec![])?;
        assert_eq!(f.encode(), &[0xAA, 0x01, 0x06, 0x00, 0x00, 0x94, 0x7B]);
        Ok(())
    }

    #[test]
    fn encode_stop_inventory() -> Result<()> {
        // Hardcoded in the firmware at 0x0002bc90.
        let f = Frame::new(0x02, 0xFF, vec![])?;
        assert_eq!(f.encode(), &[0xAA, 0x02, 0xFF, 0x00, 0x00, 0xA4, 0x0F]);
        Ok(())
    }

    #[test]
    fn decode_mac_response() -> Result<()> {
        let mac = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        let wire = Frame::new(0x01, 0x06, mac.to_vec())?.encode();
        match decode_one(&wire) {
            Decoded::Frame(f, consumed) => {
                assert_eq!(consumed, wire.len());
                assert_eq!((f.cmd, f.sub), (0x01, 0x06));
                assert_eq!(f.payload, mac);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn roundtrip_payload_sizes() -> Result<()> {
        for n in [0usize, 1, 2, 16, 255, 256, 1023] {
            let payload: Vec<u8> = (0..n).map(|i| (i * 7) as u8).collect();
            let f = Frame::new(0x01, 0x0B, payload)?;
            let wire = f.encode();
            assert_eq!(wire.len(), MIN_FRAME + n);
            match decode_one(&wire) {
                Decoded::Frame(g, c) => {
                    assert_eq!(c, wire.len());
                    assert_eq!(g, f);
                }
                other => panic!("size {n}: {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn oversize_payload_rejected() {
        assert!(matches!(
            Frame::new(0x01, 0x0B, vec![0u8; MAX_PAYLOAD + 1]),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn rs485_wrap_layout() -> Result<()> {
        let wire = Frame::new(0x01, 0x06, vec![])?.rs485_wrap(0x12).encode();
        // [AA][CMD|0x20][SUB][ADDR][LEN_H][LEN_L][CRC_H][CRC_L]
        assert_eq!(wire[..4], [0xAA, 0x21, 0x06, 0x12]);
        assert_eq!(wire.len(), MIN_FRAME + 1);
        let crc = crc16(&wire[1..6]);
        assert_eq!(&wire[6..], crc.to_be_bytes());
        Ok(())
    }

    #[test]
    fn rs485_roundtrip_and_drop() -> Result<()> {
        let f = Frame::new(0x01, 0x16, vec![0x12, 0x01])?;
        let wrapped = f.clone().rs485_wrap(0x12);
        let wire = wrapped.encode();
        let Decoded::Frame(got, _) = decode_one(&wire) else {
            panic!("wrapped frame did not decode");
        };
        assert_eq!(got.addr, Some(0x12));
        assert_eq!(got.clone().rs485_strip(0x12), Some(f));
        assert_eq!(got.rs485_strip(0x13), None);
        Ok(())
    }

    #[test]
    fn resync_is_lossless_past() -> Result<()> {
        let good = Frame::new(0x01, 0x05, vec![192, 168, 1, 116])?;
        // Garbage that looks like a whole frame but fails its CRC.
        let mut buf = vec![0xAA, 0x01, 0x06, 0x00, 0x00, 0xDE, 0xAD];
        let garbage_len = buf.len();
        buf.extend_from_slice(&good.encode());
        let skip = match decode_one(&buf) {
            Decoded::Resync(n) => n,
            other => panic!("expected resync, got {other:?}"),
        };
        assert_eq!(skip, 1);
        match decode_one(&buf[skip..]) {
            Decoded::Frame(f, consumed) => {
                assert_eq!(f, good);
                assert_eq!(skip + consumed, buf.len());
                assert_eq!(consumed, garbage_len - skip + good.encode().len());
            }
            other => panic!("expected frame, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn need_more_on_partial() -> Result<()> {
        let wire = Frame::new(0x01, 0x00, vec![1, 2, 3])?.encode();
        for cut in 0..wire.len() {
            assert_eq!(
                decode_one(&wire[..cut]),
                Decoded::NeedMore(0),
                "cut at {cut}"
            );
        }
        Ok(())
    }

    #[test]
    fn garbage_only_is_consumed() {
        assert_eq!(decode_one(&[1, 2, 3, 4]), Decoded::NeedMore(4));
        assert_eq!(decode_one(&[]), Decoded::NeedMore(0));
    }

    #[test]
    fn length_bound_resyncs() {
        // Declared length 0x400: reject before reading any payload.
        let buf = [0xAA, 0x01, 0x06, 0x04, 0x00, 0x00, 0x00];
        assert_eq!(decode_one(&buf), Decoded::Resync(1));
    }

    #[test]
    fn corrupt_crc_resyncs() -> Result<()> {
        let mut wire = Frame::new(0x01, 0x06, vec![])?.encode();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert_eq!(decode_one(&wire), Decoded::Resync(1));
        Ok(())
    }
}
