/*! Byte transports to the reader.

The reader is reachable over TCP (its default server mode, port
9090), UDP datagrams, and serial flavors (RS-232, RS-485, USB
gadget). Everything above this layer only needs bytes in and bytes
out, so the serial variants are just future implementors of the same
[`ByteTransport`] trait.

Failure discipline: the transport never reconnects by itself. Enough
consecutive write failures in a short window reset the socket and mark
the transport invalid; reconnect policy belongs to the session owner.
*/
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{Error, Result};

/// Default TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Keepalive idle time before the first probe. Together with the
/// probe interval and count this matches the firmware's ≈8 s
/// dead-peer window.
pub const KEEPALIVE_IDLE_SECS: i32 = 5;
/// Interval between keepalive probes.
pub const KEEPALIVE_INTERVAL_SECS: i32 = 1;
/// Unanswered probes before the kernel declares the peer dead.
pub const KEEPALIVE_PROBES: i32 = 3;

/// Write failures within [`WRITE_FAIL_WINDOW`] that trigger a reset.
const WRITE_FAIL_LIMIT: u32 = 3;
const WRITE_FAIL_WINDOW: Duration = Duration::from_secs(4);

/// A bidirectional byte channel to the reader.
pub trait ByteTransport: Send {
    /// Read available bytes, waiting at most `timeout`. `Ok(0)` means
    /// the deadline passed without data; a closed peer is an error.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write all of `bytes`, retrying partial writes.
    fn send_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the underlying socket and mark the transport invalid.
    fn reset(&mut self);

    /// False once the socket has been reset or lost.
    fn is_valid(&self) -> bool;

    /// Clone the underlying channel (shared fd). The clone reads the
    /// same byte stream; the inventory task uses this to consume tag
    /// notifications without owning the session.
    fn try_clone(&self) -> Result<Box<dyn ByteTransport>>;
}

/// Block until `fd` is writable or `timeout` passes.
fn wait_writable(fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    // SAFETY: pfd points to a valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
    match rc {
        -1 => Err(std::io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(pfd.revents & libc::POLLOUT != 0),
    }
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, opt: libc::c_int, val: libc::c_int) {
    // SAFETY: fd is a live socket and val outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            std::ptr::addr_of!(val).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        // Keepalive is tuning, not correctness. Log and move on.
        warn!(
            "setsockopt({level},{opt}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Apply the keepalive profile matching the firmware's dead-peer
/// detection window.
fn enable_keepalive(stream: &TcpStream) {
    let fd = stream.as_raw_fd();
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1);
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, KEEPALIVE_IDLE_SECS);
    setsockopt_int(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_KEEPINTVL,
        KEEPALIVE_INTERVAL_SECS,
    );
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, KEEPALIVE_PROBES);
}

/// TCP stream transport.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    fail_count: u32,
    fail_since: Option<Instant>,
}

impl TcpTransport {
    /// Connect to `host:port` with the default timeout.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_timeout(host, port, CONNECT_TIMEOUT)
    }

    /// Connect with an explicit timeout.
    pub fn connect_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Usage(format!("cannot resolve {host}:{port}")))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        enable_keepalive(&stream);
        debug!("connected to {addr}");
        Ok(Self {
            stream: Some(stream),
            fail_count: 0,
            fail_since: None,
        })
    }

    /// Wrap an already-connected stream (tests, accepted sockets).
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            fail_count: 0,
            fail_since: None,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            Error::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "socket has been reset",
            ))
        })
    }

    fn note_write_failure(&mut self) -> bool {
        let now = Instant::now();
        match self.fail_since {
            Some(t) if now.duration_since(t) <= WRITE_FAIL_WINDOW => {
                self.fail_count += 1;
            }
            _ => {
                self.fail_since = Some(now);
                self.fail_count = 1;
            }
        }
        self.fail_count >= WRITE_FAIL_LIMIT
    }
}

impl ByteTransport for TcpTransport {
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match stream.read(buf) {
            Ok(0) => {
                self.reset();
                Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )))
            }
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }

    fn send_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        let fd = stream.as_raw_fd();
        // A dead TCP stream can absorb writes for a long time;
        // check for writability first.
        match wait_writable(fd, Duration::from_secs(1)) {
            Ok(true) => {}
            Ok(false) => {
                warn!("socket not writable");
                if self.note_write_failure() {
                    self.reset();
                }
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "socket not writable",
                )));
            }
            Err(e) => {
                self.reset();
                return Err(e.into());
            }
        }
        let mut sent = 0;
        while sent < bytes.len() {
            match stream.write(&bytes[sent..]) {
                Ok(0) => {
                    self.reset();
                    return Err(Error::Transport(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "write returned zero",
                    )));
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if self.note_write_failure() {
                        warn!("{WRITE_FAIL_LIMIT} write failures, resetting socket");
                        self.reset();
                    }
                    return Err(e.into());
                }
            }
        }
        self.fail_count = 0;
        self.fail_since = None;
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(s) = self.stream.take() {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_valid(&self) -> bool {
        self.stream.is_some()
    }

    fn try_clone(&self) -> Result<Box<dyn ByteTransport>> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::State("socket has been reset".into()))?;
        Ok(Box::new(TcpTransport::from_stream(stream.try_clone()?)))
    }
}

/// Datagram transport. The reader answers management commands over
/// UDP on the same service port.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    /// Bind an ephemeral local port and direct datagrams at the reader.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        Ok(Self {
            socket: Some(socket),
        })
    }

    fn socket(&mut self) -> Result<&mut UdpSocket> {
        self.socket.as_mut().ok_or_else(|| {
            Error::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "socket has been reset",
            ))
        })
    }
}

impl ByteTransport for UdpTransport {
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let socket = self.socket()?;
        socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }

    fn send_all(&mut self, bytes: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        let n = socket.send(bytes)?;
        if n != bytes.len() {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short datagram send",
            )));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.socket = None;
    }

    fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    fn try_clone(&self) -> Result<Box<dyn ByteTransport>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::State("socket has been reset".into()))?;
        Ok(Box::new(UdpTransport {
            socket: Some(socket.try_clone()?),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_recv_across_partial_writes() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            s.write_all(&[1, 2, 3]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            s.write_all(&[4, 5]).unwrap();
        });
        let mut t = TcpTransport::connect(&addr.ip().to_string(), addr.port())?;
        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        while got.len() < 5 {
            let n = t.recv(&mut buf, Duration::from_millis(200))?;
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, [1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn tcp_recv_timeout_is_zero() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = std::thread::spawn(move || listener.accept());
        let mut t = TcpTransport::connect(&addr.ip().to_string(), addr.port())?;
        let _peer = handle.join().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(t.recv(&mut buf, Duration::from_millis(20))?, 0);
        Ok(())
    }

    #[test]
    fn tcp_eof_is_transport_error() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        std::thread::spawn(move || {
            let (s, _) = listener.accept().unwrap();
            drop(s);
        });
        let mut t = TcpTransport::connect(&addr.ip().to_string(), addr.port())?;
        let mut buf = [0u8; 16];
        let mut saw_error = false;
        for _ in 0..50 {
            match t.recv(&mut buf, Duration::from_millis(50)) {
                Err(Error::Transport(_)) => {
                    saw_error = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_error);
        assert!(!t.is_valid());
        Ok(())
    }

    #[test]
    fn reset_invalidates() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = std::thread::spawn(move || listener.accept());
        let mut t = TcpTransport::connect(&addr.ip().to_string(), addr.port())?;
        let _peer = handle.join().unwrap();
        assert!(t.is_valid());
        t.reset();
        assert!(!t.is_valid());
        assert!(t.send_all(&[0xAA]).is_err());
        Ok(())
    }

    #[test]
    fn udp_echo_roundtrip() -> Result<()> {
        let server = UdpSocket::bind("127.0.0.1:0")?;
        let port = server.local_addr()?.port();
        std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (n, from) = server.recv_from(&mut buf).unwrap();
            server.send_to(&buf[..n], from).unwrap();
        });
        let mut t = UdpTransport::connect("127.0.0.1", port)?;
        t.send_all(&[0xAA, 0x01, 0x06])?;
        let mut buf = [0u8; 64];
        let mut n = 0;
        while n == 0 {
            n = t.recv(&mut buf, Duration::from_millis(200))?;
        }
        assert_eq!(&buf[..n], &[0xAA, 0x01, 0x06]);
        Ok(())
    }

    #[test]
    fn clone_reads_same_stream() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            s.write_all(b"ping").unwrap();
        });
        let t = TcpTransport::connect(&addr.ip().to_string(), addr.port())?;
        let mut clone = t.try_clone()?;
        let mut buf = [0u8; 16];
        let mut got = 0;
        while got == 0 {
            got = clone.recv(&mut buf, Duration::from_millis(200))?;
        }
        assert_eq!(&buf[..got], b"ping");
        Ok(())
    }
}
