/*! Synchronous reader session: request/response plus typed commands.

One [`ReaderSession`] owns one transport. Requests are strictly
serialized: a response is matched on its `(cmd, sub)` pair, and
anything else arriving during the wait (late responses, unsolicited
tag notifications) is dropped (or handed to a sideband channel when
one is configured). Keepalive probes from the reader are echoed back
inline, since the firmware's connect handshake expects the ACK even
mid-command.

Reboot and factory reset are special: the reader drops TCP before
answering, so both acknowledge intent instead of failing on the lost
response.
*/
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::deframer::Deframer;
use crate::frame::Frame;
use crate::proto::{
    self, AntennaConfig, ComConfig, GpiState, MacAddr, NetworkConfig, PingConfig, ReaderInfo,
    RelayConfig, Rs485Config, ServerConfig, TimeInfo, TriggerConfig, WiegandConfig, sub,
};
use crate::tag::TagReport;
use crate::transport::{ByteTransport, TcpTransport};
use crate::{Error, Result};

/// Default deadline for a request/response exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Idle gap that terminates a `get_tags` stream.
pub const GET_TAGS_IDLE: Duration = Duration::from_secs(5);

/// After a reboot the reader needs roughly this long before it
/// accepts connections again.
pub const REBOOT_GRACE: Duration = Duration::from_secs(20);

/// Direction tag for the wire tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDir {
    /// Bytes written to the reader.
    Tx,
    /// Bytes read from the reader.
    Rx,
}

/// A connected session with one reader.
pub struct ReaderSession {
    transport: Box<dyn ByteTransport>,
    deframer: Deframer,
    rs485_addr: Option<u8>,
    sideband: Option<std::sync::mpsc::SyncSender<Frame>>,
    tap: Option<Box<dyn Fn(WireDir, &[u8]) + Send>>,
    peer: String,
}

impl ReaderSession {
    /// Connect over TCP. `rs485_addr` switches the session into bus
    /// mode: outbound frames carry the address, inbound frames
    /// addressed elsewhere are dropped.
    pub fn connect(host: &str, port: u16, rs485_addr: Option<u8>) -> Result<Self> {
        let transport = TcpTransport::connect(host, port)?;
        info!("session open to {host}:{port}");
        Ok(Self::over(Box::new(transport), rs485_addr, format!("{host}:{port}")))
    }

    /// Build a session over an arbitrary transport (UDP, serial
    /// implementors, test fixtures).
    #[must_use]
    pub fn over(transport: Box<dyn ByteTransport>, rs485_addr: Option<u8>, peer: String) -> Self {
        Self {
            transport,
            deframer: Deframer::new(),
            rs485_addr,
            sideband: None,
            tap: None,
            peer,
        }
    }

    /// `host:port` of the peer, for status reporting.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// False once the socket has died or been reset.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.transport.is_valid()
    }

    /// Route frames that arrive while a request is outstanding (late
    /// responses, tag notifications) to `tx` instead of dropping
    /// them. Best-effort: a full channel drops the frame.
    pub fn set_sideband(&mut self, tx: std::sync::mpsc::SyncSender<Frame>) {
        self.sideband = Some(tx);
    }

    /// Observe raw wire traffic (the bridge uses this for its PROTO
    /// log category).
    pub fn set_wire_tap(&mut self, tap: Box<dyn Fn(WireDir, &[u8]) + Send>) {
        self.tap = Some(tap);
    }

    /// Clone the underlying byte channel for a detached consumer.
    pub fn clone_channel(&self) -> Result<Box<dyn ByteTransport>> {
        self.transport.try_clone()
    }

    /// Close the socket. Further requests fail with `Transport`.
    pub fn close(&mut self) {
        self.transport.reset();
        info!("session to {} closed", self.peer);
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let frame = match self.rs485_addr {
            Some(addr) => frame.clone().rs485_wrap(addr),
            None => frame.clone(),
        };
        let wire = frame.encode();
        debug!("TX {}", proto::hex(&wire));
        if let Some(tap) = &self.tap {
            tap(WireDir::Tx, &wire);
        }
        self.transport.send_all(&wire)
    }

    /// Fire a frame without waiting for any response.
    pub fn send_only(&mut self, cmd: u8, sub: u8, payload: &[u8]) -> Result<()> {
        self.send_frame(&Frame::new(cmd, sub, payload.to_vec())?)
    }

    /// Pull the next frame, waiting at most `timeout`. `Ok(None)`
    /// means the deadline passed quietly. Handles RS-485 address
    /// filtering and keepalive echoes internally.
    pub fn pull_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(frame) = self.deframer.next_frame() {
                let frame = match self.rs485_addr {
                    Some(addr) => match frame.rs485_strip(addr) {
                        Some(f) => f,
                        None => {
                            debug!("dropping frame addressed to another bus node");
                            continue;
                        }
                    },
                    None => frame,
                };
                if frame.cmd == proto::CMD_MANAGE && frame.sub == sub::KEEPALIVE {
                    debug!("keepalive probe, echoing");
                    let echo = frame.clone();
                    self.send_frame(&echo)?;
                    continue;
                }
                return Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let mut buf = [0u8; 4096];
            let n = self.transport.recv(&mut buf, remaining)?;
            if n > 0 {
                debug!("RX {}", proto::hex(&buf[..n]));
                if let Some(tap) = &self.tap {
                    tap(WireDir::Rx, &buf[..n]);
                }
                self.deframer.push(&buf[..n]);
            }
        }
    }

    /// Send a request and wait for the response with the matching
    /// `(cmd, sub)` pair.
    pub fn request(&mut self, cmd: u8, sub: u8, payload: &[u8]) -> Result<Frame> {
        self.request_timeout(cmd, sub, payload, REQUEST_TIMEOUT)
    }

    /// [`ReaderSession::request`] with an explicit deadline.
    pub fn request_timeout(
        &mut self,
        cmd: u8,
        sub: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Frame> {
        self.send_only(cmd, sub, payload)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout { cmd, sub });
            }
            match self.pull_frame(remaining)? {
                Some(frame) if frame.cmd == cmd && frame.sub == sub => return Ok(frame),
                Some(frame) => {
                    match &self.sideband {
                        Some(tx) => {
                            if tx.try_send(frame).is_err() {
                                debug!("sideband full, frame dropped");
                            }
                        }
                        None => debug!(
                            "dropping unrelated frame while waiting for ({cmd:#04x},{sub:#04x})"
                        ),
                    }
                }
                None => return Err(Error::Timeout { cmd, sub }),
            }
        }
    }

    // ─── Typed operations ───

    /// Reader model, name and uptime.
    pub fn reader_info(&mut self) -> Result<ReaderInfo> {
        let resp = self.request(proto::CMD_MANAGE, sub::INFO, &[])?;
        ReaderInfo::parse(&resp.payload)
    }

    /// COM/baud configuration.
    pub fn com_config(&mut self) -> Result<ComConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_BAUD, &[])?;
        ComConfig::parse(&resp.payload)
    }

    /// Set the COM baud code.
    pub fn set_com(&mut self, baud_code: u8) -> Result<ComConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_BAUD, &[baud_code])?;
        if resp.payload.len() == 1 && resp.payload[0] == 0 {
            return Ok(ComConfig::from_code(baud_code));
        }
        ComConfig::parse(&resp.payload)
    }

    /// IP / mask / gateway.
    pub fn network(&mut self) -> Result<NetworkConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_NETWORK, &[])?;
        NetworkConfig::parse(&resp.payload)
    }

    /// Set IP / mask / gateway. The reader re-applies its network
    /// stack, so the current connection may not survive long.
    pub fn set_network(&mut self, cfg: &NetworkConfig) -> Result<NetworkConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_NETWORK, &cfg.to_payload())?;
        if resp.payload.len() >= 12 {
            NetworkConfig::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(*cfg)
        }
    }

    /// MAC address.
    pub fn mac(&mut self) -> Result<MacAddr> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_MAC, &[])?;
        MacAddr::parse(&resp.payload)
    }

    /// Program the MAC address.
    pub fn set_mac(&mut self, mac: MacAddr) -> Result<MacAddr> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_MAC, &mac.0)?;
        if resp.payload.len() >= 6 {
            MacAddr::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(mac)
        }
    }

    /// Server/client mode block.
    pub fn server_config(&mut self) -> Result<ServerConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_SERVER, &[])?;
        ServerConfig::parse(&resp.payload)
    }

    /// Set the server/client mode block.
    pub fn set_server(&mut self, cfg: &ServerConfig) -> Result<ServerConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_SERVER, &cfg.to_payload())?;
        if resp.payload.len() >= 9 {
            ServerConfig::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(*cfg)
        }
    }

    /// Drive GPO outputs; up to four `(pin, state)` pairs.
    pub fn set_gpo(&mut self, pairs: &[(u8, u8)]) -> Result<()> {
        let payload = proto::gpo_payload(pairs)?;
        let resp = self.request(proto::CMD_MANAGE, sub::SET_GPO, &payload)?;
        resp.status()?;
        Ok(())
    }

    /// Read the four opto-isolated GPI inputs.
    pub fn gpi(&mut self) -> Result<Vec<GpiState>> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_GPI, &[])?;
        proto::parse_gpi(&resp.payload)
    }

    /// Antenna configuration for one RF port (0..=3).
    pub fn antenna(&mut self, port: u8) -> Result<AntennaConfig> {
        if port > 3 {
            return Err(Error::Usage(format!("RF port {port} out of range")));
        }
        let resp = self.request(proto::CMD_MANAGE, sub::GET_ANTENNA, &[port])?;
        AntennaConfig::parse(&resp.payload)
    }

    /// All four antenna configurations.
    pub fn antennas(&mut self) -> Result<Vec<AntennaConfig>> {
        (0..4).map(|p| self.antenna(p)).collect()
    }

    /// Write one RF-port block.
    pub fn set_antenna(&mut self, cfg: &AntennaConfig) -> Result<()> {
        if cfg.port > 3 {
            return Err(Error::Usage(format!("RF port {} out of range", cfg.port)));
        }
        let resp = self.request(proto::CMD_MANAGE, sub::SET_ANTENNA, &cfg.to_payload())?;
        if resp.payload.len() == 1 {
            resp.status()?;
        }
        Ok(())
    }

    /// Convenience: set only the transmit power of one port.
    pub fn set_antenna_power(&mut self, port: u8, power_dbm: u8) -> Result<()> {
        if power_dbm > 33 {
            return Err(Error::Usage(format!("power {power_dbm} dBm out of range")));
        }
        let mut cfg = self.antenna(port)?;
        cfg.power_dbm = power_dbm;
        self.set_antenna(&cfg)
    }

    /// Trigger configuration for one GPI (0..=3). Rides the RF-port
    /// block subcommand with the GPI index as sub-parameter.
    pub fn trigger(&mut self, gpi: u8) -> Result<TriggerConfig> {
        if gpi > 3 {
            return Err(Error::Usage(format!("GPI index {gpi} out of range")));
        }
        let resp = self.request(proto::CMD_MANAGE, sub::GET_ANTENNA, &[gpi])?;
        TriggerConfig::parse(&resp.payload)
    }

    /// All four trigger configurations.
    pub fn triggers(&mut self) -> Result<Vec<TriggerConfig>> {
        (0..4).map(|g| self.trigger(g)).collect()
    }

    /// Configure a GPI trigger. `delay_10ms` only matters with the
    /// delay-timer stop mode and is appended to the blob when
    /// nonzero.
    pub fn set_trigger(
        &mut self,
        gpi: u8,
        start_mode: u8,
        stop_mode: u8,
        delay_10ms: u32,
    ) -> Result<()> {
        let mut blob = TriggerConfig::build(
            gpi,
            start_mode,
            stop_mode,
            &proto::TRIGGER_START_INVENTORY,
        )?;
        if delay_10ms > 0 {
            blob.extend_from_slice(&delay_10ms.to_be_bytes());
        }
        let resp = self.request(proto::CMD_MANAGE, sub::SET_ANTENNA, &blob)?;
        if resp.payload.len() == 1 {
            resp.status()?;
        }
        Ok(())
    }

    /// Wiegand output configuration.
    pub fn wiegand(&mut self) -> Result<WiegandConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_WIEGAND, &[])?;
        WiegandConfig::parse(&resp.payload)
    }

    /// Set Wiegand output configuration.
    pub fn set_wiegand(&mut self, cfg: &WiegandConfig) -> Result<WiegandConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_WIEGAND, &cfg.to_payload())?;
        if resp.payload.len() >= 3 {
            WiegandConfig::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(*cfg)
        }
    }

    /// System time.
    pub fn time(&mut self) -> Result<TimeInfo> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_TIME, &[])?;
        TimeInfo::parse(&resp.payload)
    }

    /// Set system time. `None` uses the host clock.
    pub fn set_time(&mut self, seconds: Option<u32>) -> Result<TimeInfo> {
        let seconds = match seconds {
            Some(s) => s,
            None => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0),
        };
        let resp = self.request(proto::CMD_MANAGE, sub::SET_TIME, &seconds.to_be_bytes())?;
        if resp.payload.len() >= 4 {
            TimeInfo::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(TimeInfo {
                seconds,
                micros: None,
            })
        }
    }

    /// RS-485 bus configuration.
    pub fn rs485_config(&mut self) -> Result<Rs485Config> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_RS485, &[])?;
        Rs485Config::parse(&resp.payload)
    }

    /// Set RS-485 bus configuration.
    pub fn set_rs485(&mut self, cfg: &Rs485Config) -> Result<Rs485Config> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_RS485, &cfg.to_payload())?;
        if resp.payload.len() >= 2 {
            Rs485Config::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(*cfg)
        }
    }

    /// Tag-cache switch.
    pub fn tag_cache(&mut self) -> Result<bool> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_TAG_CACHE, &[])?;
        Ok(resp.payload.first().copied().unwrap_or(0) != 0)
    }

    /// Enable or disable the tag cache.
    pub fn set_tag_cache(&mut self, enable: bool) -> Result<bool> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_TAG_CACHE, &[u8::from(enable)])?;
        if let Some(&s) = resp.payload.first()
            && s > 1
        {
            return Err(Error::Device(s));
        }
        Ok(enable)
    }

    /// Tag-cache window.
    pub fn tag_cache_time(&mut self) -> Result<u16> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_TAG_CACHE_TIME, &[])?;
        if resp.payload.len() < 2 {
            return Err(Error::Protocol("short tag-cache-time payload".into()));
        }
        Ok(u16::from_be_bytes([resp.payload[0], resp.payload[1]]))
    }

    /// Set the tag-cache window.
    pub fn set_tag_cache_time(&mut self, time: u16) -> Result<u16> {
        let resp =
            self.request(proto::CMD_MANAGE, sub::SET_TAG_CACHE_TIME, &time.to_be_bytes())?;
        if resp.payload.len() == 1 {
            resp.status()?;
            return Ok(time);
        }
        if resp.payload.len() >= 2 {
            return Ok(u16::from_be_bytes([resp.payload[0], resp.payload[1]]));
        }
        Ok(time)
    }

    /// Relay configuration.
    pub fn relay(&mut self) -> Result<RelayConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_RELAY, &[])?;
        RelayConfig::parse(&resp.payload)
    }

    /// Set relay configuration.
    pub fn set_relay(&mut self, cfg: &RelayConfig) -> Result<RelayConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_RELAY, &cfg.to_payload())?;
        if resp.payload.len() >= 3 {
            RelayConfig::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(*cfg)
        }
    }

    /// Ping watchdog configuration.
    pub fn ping_config(&mut self) -> Result<PingConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_PING, &[])?;
        PingConfig::parse(&resp.payload)
    }

    /// Set ping watchdog configuration.
    pub fn set_ping(&mut self, cfg: &PingConfig) -> Result<PingConfig> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_PING, &cfg.to_payload())?;
        if resp.payload.len() >= 5 {
            PingConfig::parse(&resp.payload)
        } else {
            resp.status()?;
            Ok(*cfg)
        }
    }

    /// DHCP mode.
    pub fn dhcp(&mut self) -> Result<u8> {
        let resp = self.request(proto::CMD_MANAGE, sub::GET_DHCP, &[])?;
        resp.payload
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol("empty DHCP payload".into()))
    }

    /// Set DHCP mode: 0 = static, 1 = DHCP.
    pub fn set_dhcp(&mut self, mode: u8) -> Result<u8> {
        let resp = self.request(proto::CMD_MANAGE, sub::SET_DHCP, &[mode])?;
        Ok(resp.payload.first().copied().unwrap_or(mode))
    }

    /// Stream stored tag records. The response is multi-frame: the
    /// firmware's answer machine sends one record per frame and
    /// terminates with an empty payload (or a distinct sub). A 5 s
    /// idle gap also ends the stream.
    pub fn get_tags(&mut self) -> Result<Vec<TagReport>> {
        self.send_only(proto::CMD_MANAGE, sub::GET_TAGS, &[])?;
        let mut records = Vec::new();
        loop {
            match self.pull_frame(GET_TAGS_IDLE)? {
                None => break, // idle timeout ends the stream
                Some(frame) if frame.cmd == proto::CMD_MANAGE && frame.sub == sub::GET_TAGS => {
                    if frame.payload.is_empty() {
                        break; // sentinel
                    }
                    let mut report = TagReport::parse(frame.sub, &frame.payload);
                    report.count = records.len() as u64 + 1;
                    records.push(report);
                }
                Some(frame) if frame.cmd == proto::CMD_MANAGE => {
                    debug!("tag stream completed by sub {:#04x}", frame.sub);
                    break;
                }
                Some(frame) => {
                    debug!("skipping {frame:?} during tag stream");
                }
            }
        }
        info!("get_tags: {} records", records.len());
        Ok(records)
    }

    /// Clear the tag database.
    pub fn clear_tags(&mut self) -> Result<()> {
        let resp = self.request(proto::CMD_MANAGE, sub::CLEAR_TAGS, &[])?;
        resp.status()?;
        Ok(())
    }

    /// Delete one stored tag by index.
    pub fn delete_tag(&mut self, index: u32) -> Result<()> {
        let resp =
            self.request(proto::CMD_MANAGE, sub::DELETE_TAG, &index.to_be_bytes())?;
        resp.status()?;
        Ok(())
    }

    /// Reboot the reader. The device drops TCP before any response,
    /// so this only sends; reconnect after [`REBOOT_GRACE`].
    pub fn reboot(&mut self) -> Result<()> {
        self.send_only(proto::CMD_MANAGE, sub::REBOOT, &[])?;
        info!("reboot sent to {}", self.peer);
        Ok(())
    }

    /// Factory reset. The MAC address survives on the device. A lost
    /// response is expected and not an error.
    pub fn factory_reset(&mut self) -> Result<()> {
        match self.request(proto::CMD_MANAGE, sub::FACTORY_RESET, &[]) {
            Ok(resp) => {
                resp.status()?;
                Ok(())
            }
            Err(Error::Timeout { .. }) | Err(Error::Transport(_)) => {
                warn!("factory reset: no response (connection dropped), assuming accepted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Kick off continuous inventory. `tuning` carries optional
    /// antenna-tuning TLVs; empty is valid. The ACK is consumed by
    /// whoever reads the stream next (normally the inventory task).
    pub fn send_inventory_start(&mut self, tuning: &[u8]) -> Result<()> {
        self.send_only(proto::CMD_RF, proto::rf::START_INVENTORY, tuning)
    }

    /// Ask the RF module to stop inventory.
    pub fn send_inventory_stop(&mut self) -> Result<()> {
        self.send_only(proto::CMD_RF, proto::rf::STOP_INVENTORY, &[])
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.transport.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    /// Fake reader: accepts one connection and runs a script of
    /// (expected request, responses) steps.
    fn fake_reader(
        script: Vec<(Frame, Vec<Vec<u8>>)>,
    ) -> Result<(std::net::SocketAddr, std::thread::JoinHandle<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for (expect, responses) in script {
                let want = expect.encode();
                let mut got = vec![0u8; want.len()];
                stream.read_exact(&mut got).unwrap();
                assert_eq!(got, want, "request mismatch");
                for r in responses {
                    stream.write_all(&r).unwrap();
                }
            }
            // Hold the socket open briefly so the client side does
            // not race an EOF.
            std::thread::sleep(Duration::from_millis(50));
            drop(stream);
        });
        Ok((addr, handle))
    }

    fn connect(addr: std::net::SocketAddr) -> Result<ReaderSession> {
        ReaderSession::connect(&addr.ip().to_string(), addr.port(), None)
    }

    #[test]
    fn request_matches_pair() -> Result<()> {
        let req = Frame::new(proto::CMD_MANAGE, sub::GET_MAC, vec![])?;
        let resp = Frame::new(
            proto::CMD_MANAGE,
            sub::GET_MAC,
            vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
        )?;
        let (addr, h) = fake_reader(vec![(req, vec![resp.encode()])])?;
        let mut s = connect(addr)?;
        let mac = s.mac()?;
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn unsolicited_frames_are_skipped() -> Result<()> {
        let req = Frame::new(proto::CMD_MANAGE, sub::GET_NETWORK, vec![])?;
        // A tag notification sneaks in ahead of the real response.
        let tag = Frame::new(proto::CMD_TAG_NOTIFY, 0x30, vec![0x08, 0x00, 0x12, 0x34])?;
        let resp = Frame::new(
            proto::CMD_MANAGE,
            sub::GET_NETWORK,
            vec![192, 168, 1, 116, 255, 255, 255, 0, 192, 168, 1, 1],
        )?;
        let mut bytes = tag.encode();
        bytes.extend_from_slice(&resp.encode());
        let (addr, h) = fake_reader(vec![(req, vec![bytes])])?;
        let mut s = connect(addr)?;
        let net = s.network()?;
        assert_eq!(net.ip.octets(), [192, 168, 1, 116]);
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn sideband_receives_unsolicited() -> Result<()> {
        let req = Frame::new(proto::CMD_MANAGE, sub::GET_DHCP, vec![])?;
        let tag = Frame::new(proto::CMD_TAG_NOTIFY, 0x00, vec![0x08, 0x00, 0x01, 0x02])?;
        let resp = Frame::new(proto::CMD_MANAGE, sub::GET_DHCP, vec![1])?;
        let mut bytes = tag.encode();
        bytes.extend_from_slice(&resp.encode());
        let (addr, h) = fake_reader(vec![(req, vec![bytes])])?;
        let mut s = connect(addr)?;
        let (tx, rx) = std::sync::mpsc::sync_channel(8);
        s.set_sideband(tx);
        assert_eq!(s.dhcp()?, 1);
        let side = rx.try_recv().expect("sideband frame");
        assert_eq!(side.cmd, proto::CMD_TAG_NOTIFY);
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn timeout_when_no_response() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let h = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(300));
            drop(stream);
        });
        let mut s = connect(addr)?;
        let err = s
            .request_timeout(
                proto::CMD_MANAGE,
                sub::INFO,
                &[],
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { cmd: 0x01, sub: 0x00 }));
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn keepalive_is_echoed() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let h = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let req = Frame::new(proto::CMD_MANAGE, sub::INFO, vec![]).unwrap();
            let mut got = vec![0u8; req.encode().len()];
            stream.read_exact(&mut got).unwrap();
            // Probe before answering.
            let probe = Frame::new(proto::CMD_MANAGE, sub::KEEPALIVE, vec![0x42]).unwrap();
            stream.write_all(&probe.encode()).unwrap();
            // The client must echo the probe back.
            let mut echo = vec![0u8; probe.encode().len()];
            stream.read_exact(&mut echo).unwrap();
            assert_eq!(echo, probe.encode());
            let resp =
                Frame::new(proto::CMD_MANAGE, sub::INFO, vec![0x01, 0x02, 0x03, 0x04]).unwrap();
            stream.write_all(&resp.encode()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
        });
        let mut s = connect(addr)?;
        let info = s.reader_info()?;
        assert_eq!(info.model, "01020304");
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn get_tags_sentinel_terminates() -> Result<()> {
        let req = Frame::new(proto::CMD_MANAGE, sub::GET_TAGS, vec![])?;
        let rec = |epc: u8| {
            // PC for a one-word EPC, then the two EPC bytes.
            Frame::new(proto::CMD_MANAGE, sub::GET_TAGS, vec![0x08, 0x00, epc, 0x01])
                .unwrap()
                .encode()
        };
        let sentinel = Frame::new(proto::CMD_MANAGE, sub::GET_TAGS, vec![])?.encode();
        let (addr, h) = fake_reader(vec![(req, vec![rec(0xA0), rec(0xA1), sentinel])])?;
        let mut s = connect(addr)?;
        let tags = s.get_tags()?;
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].epc.as_deref(), Some("A001"));
        assert_eq!(tags[1].count, 2);
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn reboot_sends_without_waiting() -> Result<()> {
        let req = Frame::new(proto::CMD_MANAGE, sub::REBOOT, vec![])?;
        let (addr, h) = fake_reader(vec![(req, vec![])])?;
        let mut s = connect(addr)?;
        s.reboot()?;
        h.join().unwrap();
        Ok(())
    }

    #[test]
    fn rs485_session_wraps_and_filters() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let h = std::thread::spawn(move || {
            let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
            let want = Frame::new(proto::CMD_MANAGE, sub::GET_RS485, vec![])
                .unwrap()
                .rs485_wrap(0x07)
                .encode();
            let mut got = vec![0u8; want.len()];
            stream.read_exact(&mut got).unwrap();
            assert_eq!(got, want);
            // Reply for another node first, then for us.
            let other = Frame::new(proto::CMD_MANAGE, sub::GET_RS485, vec![9, 9])
                .unwrap()
                .rs485_wrap(0x08)
                .encode();
            let mine = Frame::new(proto::CMD_MANAGE, sub::GET_RS485, vec![0x07, 0x01])
                .unwrap()
                .rs485_wrap(0x07)
                .encode();
            stream.write_all(&other).unwrap();
            stream.write_all(&mine).unwrap();
            std::thread::sleep(Duration::from_millis(50));
        });
        let mut s =
            ReaderSession::connect(&addr.ip().to_string(), addr.port(), Some(0x07))?;
        let cfg = s.rs485_config()?;
        assert_eq!((cfg.address, cfg.mode), (0x07, 0x01));
        h.join().unwrap();
        Ok(())
    }
}
