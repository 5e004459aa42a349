#![warn(missing_docs)]
/*! Host-side toolkit for CLOU CL7206C2-family UHF RFID readers.

The CL7206C2 is a four-port UHF (EPC Gen2) reader speaking a framed
binary protocol over TCP (port 9090 by default), UDP, and RS-485. This
crate implements that protocol from the wire up:

* [`frame`] / [`crc`]: the wire codec, `0xAA`-sync frames with a
  big-endian length and a CRC-16/BUYPASS trailer, plus the RS-485
  address-byte variant.
* [`deframer`]: a framed reader over any byte source. The reader does
  not align packets to TCP segments, so frames are reassembled from an
  accumulation buffer with lossless resync after corruption.
* [`transport`]: TCP/UDP byte transports with keepalive tuned to the
  firmware's dead-peer window and socket reset as the failure
  primitive.
* [`client`]: a synchronous request/response session with typed
  decoders for every management command the firmware handles.
* [`inventory`]: a detached consumer for the continuous-inventory tag
  stream (`CMD=0x12` notifications with nested TLV extensions).
* [`config_image`]: parser/editor for the reader's 1072-byte
  `config_pram` image.
* [`discovery`]: UDP discovery probe and ASCII response parser.
* [`bridge`]: an axum HTTP/WebSocket facade multiplexing browser
  sessions onto the single reader connection (feature `web`).

# Example

Connect to a reader and query it:

```no_run
use cl7206::client::ReaderSession;

let mut session = ReaderSession::connect("192.168.1.116", 9090, None)?;
let info = session.reader_info()?;
println!("{} up {}s", info.name, info.uptime_secs);
let net = session.network()?;
println!("{}/{} gw {}", net.ip, net.mask, net.gateway);
# Ok::<(), cl7206::Error>(())
```

Stream tags:

```no_run
use cl7206::client::ReaderSession;
use cl7206::inventory::{InventoryEvent, InventoryTask};

let session = ReaderSession::connect("192.168.1.116", 9090, None)?;
let (task, events) = InventoryTask::start(&session, &[])?;
for event in events.iter().take(10) {
    match event {
        InventoryEvent::Tag(tag) => {
            println!("{} ant {:?}", tag.epc.as_deref().unwrap_or("?"), tag.antenna);
        }
        InventoryEvent::Terminated { reason } => {
            eprintln!("stream ended: {reason}");
            break;
        }
    }
}
task.stop();
# Ok::<(), cl7206::Error>(())
```
*/

pub mod client;
pub mod config_image;
pub mod crc;
pub mod deframer;
pub mod discovery;
pub mod frame;
pub mod inventory;
pub mod logring;
pub mod proto;
pub mod tag;
pub mod transport;

#[cfg(feature = "web")]
pub mod bridge;

/// Errors produced by this crate.
///
/// The variants mirror how failures propagate: `Transport` kills the
/// socket, `Protocol` means the byte stream went bad, `Timeout` means
/// the reader never answered, `Device` means it answered with a
/// non-zero status byte.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller error: invalid command, argument out of range.
    #[error("usage: {0}")]
    Usage(String),

    /// Socket-level failure: connect refused, closed, write error.
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    /// Framing violation, CRC mismatch, oversized length, decoder
    /// failure.
    #[error("protocol: {0}")]
    Protocol(String),

    /// No matching response within the deadline.
    #[error("timed out waiting for cmd={cmd:#04x} sub={sub:#04x}")]
    Timeout {
        /// Command byte of the outstanding request.
        cmd: u8,
        /// Subcommand byte of the outstanding request.
        sub: u8,
    },

    /// Operation invalid in the current state (not connected,
    /// inventory already running, session replaced).
    #[error("state: {0}")]
    State(String),

    /// Well-formed response carrying a non-zero status byte.
    #[error("device returned status {0:#04x}")]
    Device(u8),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True for errors that invalidate the underlying socket.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
