/*! UDP discovery of readers on the local network.

The firmware answers UDP broadcast probes with a single ASCII
datagram framed `^KEY:VAL,KEY:VAL,…$`. The key set is small and
fixed, but firmware revisions differ in which keys they emit, so the
parser keeps unknown keys and shrugs at missing ones.
*/
use std::collections::BTreeMap;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use crate::Result;

/// Probe payloads the firmware reacts to.
pub const PROBES: [&[u8]; 3] = [b"\xff\xff\xff\xff", b"^RFID_READER_INFORMATION", b"\x00"];

/// Default discovery wait.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Parsed discovery reply. Every field is optional; whatever the
/// firmware did not send stays `None`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DiscoveryInfo {
    /// Value of the `RFID_READER_INFORMATION` key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub information: Option<String>,
    /// DHCP switch state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<String>,
    /// Reader IP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Subnet mask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    /// Gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// MAC address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Service port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Host-server IP (client mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_server_ip: Option<String>,
    /// Host-server port (client mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_server_port: Option<u16>,
    /// Working mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Link state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_state: Option<String>,
    /// Keys this parser does not know.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Parse one discovery datagram.
#[must_use]
pub fn parse_response(data: &[u8]) -> DiscoveryInfo {
    let text = String::from_utf8_lossy(data);
    let text = text
        .trim()
        .trim_start_matches('^')
        .trim_end_matches('$');
    let mut out = DiscoveryInfo::default();
    for field in text.split(',') {
        let Some((key, val)) = field.split_once(':') else {
            continue;
        };
        let val = val.trim().to_string();
        match key.trim() {
            "RFID_READER_INFORMATION" => out.information = Some(val),
            "DHCP_SW" => out.dhcp = Some(val),
            "IP" => out.ip = Some(val),
            "MASK" => out.mask = Some(val),
            "GATEWAY" => out.gateway = Some(val),
            "MAC" => out.mac = Some(val),
            "PORT" => out.port = val.parse().ok(),
            "HOST_SERVER_IP" => out.host_server_ip = Some(val),
            "HOST_SERVER_PORT" => out.host_server_port = val.parse().ok(),
            "MODE" => out.mode = Some(val),
            "NET_STATE" => out.net_state = Some(val),
            other => {
                out.extra.insert(other.to_string(), val);
            }
        }
    }
    out
}

fn send_probes(socket: &UdpSocket, target: (&str, u16)) -> Result<()> {
    for probe in PROBES {
        socket.send_to(probe, target)?;
    }
    Ok(())
}

/// Broadcast probes and collect every reader that answers within the
/// timeout.
pub fn discover(port: u16, timeout: Duration) -> Result<Vec<(SocketAddr, DiscoveryInfo)>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;
    send_probes(&socket, ("255.255.255.255", port))?;
    let deadline = Instant::now() + timeout;
    let mut found = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining))?;
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                debug!("discovery reply from {addr}: {:?}", &buf[..n.min(64)]);
                found.push((addr, parse_response(&buf[..n])));
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!("discovery: {} reader(s) answered", found.len());
    Ok(found)
}

/// Probe one specific reader.
pub fn query(host: &str, port: u16, timeout: Duration) -> Result<Option<DiscoveryInfo>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    send_probes(&socket, (host, port))?;
    socket.set_read_timeout(Some(timeout))?;
    let mut buf = [0u8; 4096];
    match socket.recv_from(&mut buf) {
        Ok((n, _)) => Ok(Some(parse_response(&buf[..n]))),
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_reply() {
        let data = b"^RFID_READER_INFORMATION:CL7206C2,DHCP_SW:0,IP:192.168.1.116,\
                     MASK:255.255.255.0,GATEWAY:192.168.1.1,MAC:00:0C:29:AB:CD:EF,\
                     PORT:9090,HOST_SERVER_IP:0.0.0.0,HOST_SERVER_PORT:0,MODE:0,NET_STATE:1$";
        let info = parse_response(data);
        assert_eq!(info.information.as_deref(), Some("CL7206C2"));
        assert_eq!(info.ip.as_deref(), Some("192.168.1.116"));
        assert_eq!(info.mac.as_deref(), Some("00:0C:29:AB:CD:EF"));
        assert_eq!(info.port, Some(9090));
        assert_eq!(info.host_server_port, Some(0));
        assert_eq!(info.net_state.as_deref(), Some("1"));
        assert!(info.extra.is_empty());
    }

    #[test]
    fn unknown_and_missing_keys_tolerated() {
        let info = parse_response(b"^IP:10.0.0.9,FW_REV:2.1,JUNK$");
        assert_eq!(info.ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(info.extra.get("FW_REV").map(String::as_str), Some("2.1"));
        assert!(info.mac.is_none());
        assert!(info.port.is_none());
    }

    #[test]
    fn markers_optional_and_binary_tolerated() {
        let info = parse_response(b"IP:1.2.3.4,PORT:nine");
        assert_eq!(info.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(info.port, None); // unparseable number shrugged off
        let none = parse_response(&[0xFF, 0x00, 0x80]);
        assert!(none.ip.is_none());
    }

    #[test]
    fn loopback_query() -> Result<()> {
        // A fake reader on loopback UDP.
        let reader = UdpSocket::bind("127.0.0.1:0")?;
        let port = reader.local_addr()?.port();
        std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (_, from) = reader.recv_from(&mut buf).unwrap();
            reader
                .send_to(b"^IP:127.0.0.1,PORT:9090$", from)
                .unwrap();
        });
        let info = query("127.0.0.1", port, Duration::from_secs(2))?
            .expect("reply expected");
        assert_eq!(info.port, Some(9090));
        Ok(())
    }
}
