/*! Framed reader: turns an unaligned byte stream into frames.

The reader pushes tag notifications and responses into the TCP stream
back to back, so frame boundaries land anywhere relative to read
boundaries. The firmware itself keeps seven per-channel receive
buffers for exactly this reason; here one accumulator serves any byte
source.

Feed arbitrary chunks with [`Deframer::push`], drain complete frames
with [`Deframer::next_frame`]. Corrupt input costs one sync byte per
resync attempt and never a frame that starts later in the buffer.
*/
use log::{debug, info};

use crate::frame::{Decoded, Frame, MIN_FRAME, decode_one};

/// Initial accumulator capacity. The largest legal frame is 1031
/// bytes on the wire, so two buffers' worth keeps reallocation out of
/// the steady state.
pub const RECV_BUF: usize = 2048;

/// Counters for observability; reported on drop.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeframerStats {
    /// Frames successfully decoded.
    pub decoded: u64,
    /// Resync events (bad length or CRC).
    pub resyncs: u64,
    /// Garbage bytes discarded while hunting for a sync byte.
    pub discarded: u64,
}

/// Accumulating frame parser over any byte source.
#[derive(Default)]
pub struct Deframer {
    buf: Vec<u8>,
    stats: DeframerStats,
}

impl Deframer {
    /// New empty deframer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(RECV_BUF),
            stats: DeframerStats::default(),
        }
    }

    /// Append raw bytes from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered and not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> DeframerStats {
        self.stats
    }

    /// Pull the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match decode_one(&self.buf) {
                Decoded::Frame(frame, consumed) => {
                    let wire_len =
                        MIN_FRAME + usize::from(frame.addr.is_some()) + frame.payload.len();
                    self.stats.discarded += (consumed - wire_len) as u64;
                    self.buf.drain(..consumed);
                    self.stats.decoded += 1;
                    debug!("deframed {frame:?}");
                    return Some(frame);
                }
                Decoded::NeedMore(discard) => {
                    if discard > 0 {
                        self.buf.drain(..discard);
                        self.stats.discarded += discard as u64;
                    }
                    return None;
                }
                Decoded::Resync(skip) => {
                    self.buf.drain(..skip);
                    self.stats.resyncs += 1;
                    self.stats.discarded += skip as u64;
                }
            }
        }
    }
}

impl Drop for Deframer {
    fn drop(&mut self) {
        let s = &self.stats;
        if s.decoded + s.resyncs + s.discarded > 0 {
            info!(
                "deframer: {} frames, {} resyncs, {} bytes discarded",
                s.decoded, s.resyncs, s.discarded
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    fn frame(cmd: u8, sub: u8, payload: &[u8]) -> Frame {
        Frame::new(cmd, sub, payload.to_vec()).unwrap()
    }

    #[test]
    fn split_anywhere_yields_one_frame() {
        let wire = frame(0x01, 0x00, b"CL7206C2").encode();
        for cut in 0..=wire.len() {
            let mut d = Deframer::new();
            d.push(&wire[..cut]);
            let early = d.next_frame();
            if cut < wire.len() {
                assert!(early.is_none(), "cut {cut}: frame from partial input");
            }
            d.push(&wire[cut..]);
            if cut < wire.len() {
                assert!(d.next_frame().is_some(), "cut {cut}");
            } else {
                assert!(early.is_some());
            }
            assert!(d.next_frame().is_none());
            assert_eq!(d.buffered(), 0);
        }
    }

    #[test]
    fn back_to_back_frames() {
        let a = frame(0x12, 0x30, &[0x30, 0x00]);
        let b = frame(0x01, 0x0A, &[0, 1, 1, 0, 2, 1, 3, 0]);
        let mut wire = a.encode();
        wire.extend_from_slice(&b.encode());
        let mut d = Deframer::new();
        d.push(&wire);
        assert_eq!(d.next_frame(), Some(a));
        assert_eq!(d.next_frame(), Some(b));
        assert_eq!(d.next_frame(), None);
    }

    #[test]
    fn garbage_then_frame() {
        let good = frame(0x01, 0x06, &[0, 1, 2, 3, 4, 5]);
        let mut d = Deframer::new();
        d.push(&[0x00, 0x13, 0x37]);
        d.push(&good.encode());
        assert_eq!(d.next_frame(), Some(good));
        let s = d.stats();
        assert_eq!(s.decoded, 1);
        assert_eq!(s.discarded, 3);
    }

    #[test]
    fn corrupt_frame_does_not_hide_next() -> Result<()> {
        let good = frame(0x02, 0x10, &[]);
        let mut bad = good.encode();
        bad[5] ^= 0x40; // break the CRC
        let mut d = Deframer::new();
        d.push(&bad);
        d.push(&good.encode());
        assert_eq!(d.next_frame(), Some(good));
        assert!(d.stats().resyncs >= 1);
        Ok(())
    }

    #[test]
    fn byte_at_a_time() {
        let wire = frame(0x01, 0x11, &[0x68, 0x8A, 0x40, 0x00]).encode();
        let mut d = Deframer::new();
        let mut got = 0;
        for &b in &wire {
            d.push(std::slice::from_ref(&b));
            if d.next_frame().is_some() {
                got += 1;
            }
        }
        assert_eq!(got, 1);
    }
}
