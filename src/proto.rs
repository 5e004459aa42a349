/*! Command numbering and typed payload codecs.

The reader's management surface all lives under `CMD=0x01`, with the
subcommand selecting the operation; `CMD=0x02` passes through to the
RF module (inventory start/stop); `CMD=0x12` is the unsolicited tag
notification. GET/SET pairs are generic slice accesses into the
1072-byte config image, driven by the firmware's 16-entry parameter
table, reproduced here as [`PARAM_TABLE`].

All wire integers are big-endian, with one deliberate exception: the
ping target IP travels little-endian inside its payload.
*/
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Management command class.
pub const CMD_MANAGE: u8 = 0x01;
/// RF passthrough command class (inventory control).
pub const CMD_RF: u8 = 0x02;
/// Unsolicited tag notification from the RF module.
pub const CMD_TAG_NOTIFY: u8 = 0x12;

/// Subcommands of [`CMD_MANAGE`].
pub mod sub {
    /// Reader information: model, name, uptime.
    pub const INFO: u8 = 0x00;
    /// Set COM baud code.
    pub const SET_BAUD: u8 = 0x02;
    /// Get COM baud code.
    pub const GET_BAUD: u8 = 0x03;
    /// Set IP/mask/gateway.
    pub const SET_NETWORK: u8 = 0x04;
    /// Get IP/mask/gateway.
    pub const GET_NETWORK: u8 = 0x05;
    /// Get MAC address.
    pub const GET_MAC: u8 = 0x06;
    /// Set server/client mode block.
    pub const SET_SERVER: u8 = 0x07;
    /// Get server/client mode block.
    pub const GET_SERVER: u8 = 0x08;
    /// Drive GPO outputs.
    pub const SET_GPO: u8 = 0x09;
    /// Read GPI input levels.
    pub const GET_GPI: u8 = 0x0A;
    /// Write an RF-port (antenna/trigger) block.
    pub const SET_ANTENNA: u8 = 0x0B;
    /// Read an RF-port (antenna/trigger) block.
    pub const GET_ANTENNA: u8 = 0x0C;
    /// Set Wiegand output config.
    pub const SET_WIEGAND: u8 = 0x0D;
    /// Get Wiegand output config.
    pub const GET_WIEGAND: u8 = 0x0E;
    /// Reboot the reader. No response arrives before the TCP drop.
    pub const REBOOT: u8 = 0x0F;
    /// Set system time (unix seconds).
    pub const SET_TIME: u8 = 0x10;
    /// Get system time (seconds, microseconds).
    pub const GET_TIME: u8 = 0x11;
    /// Connection keepalive; echoed back as the ACK.
    pub const KEEPALIVE: u8 = 0x12;
    /// Set MAC address.
    pub const SET_MAC: u8 = 0x13;
    /// Factory reset. The MAC survives.
    pub const FACTORY_RESET: u8 = 0x14;
    /// Set RS-485 address and mode.
    pub const SET_RS485: u8 = 0x15;
    /// Get RS-485 address and mode.
    pub const GET_RS485: u8 = 0x16;
    /// Enable/disable the tag cache.
    pub const SET_TAG_CACHE: u8 = 0x17;
    /// Read the tag-cache switch.
    pub const GET_TAG_CACHE: u8 = 0x18;
    /// Set the tag-cache window.
    pub const SET_TAG_CACHE_TIME: u8 = 0x19;
    /// Get the tag-cache window.
    pub const GET_TAG_CACHE_TIME: u8 = 0x1A;
    /// Stream stored tag records (multi-frame response).
    pub const GET_TAGS: u8 = 0x1B;
    /// Clear the tag database.
    pub const CLEAR_TAGS: u8 = 0x1C;
    /// Delete one stored tag by index.
    pub const DELETE_TAG: u8 = 0x1D;
    /// Set relay number and on-time.
    pub const SET_RELAY: u8 = 0x23;
    /// Get relay config.
    pub const GET_RELAY: u8 = 0x24;
    /// Set ping watchdog config.
    pub const SET_PING: u8 = 0x2D;
    /// Get ping watchdog config.
    pub const GET_PING: u8 = 0x2E;
    /// Set DHCP mode.
    pub const SET_DHCP: u8 = 0x2F;
    /// Get DHCP mode.
    pub const GET_DHCP: u8 = 0x30;
}

/// Subcommands of [`CMD_RF`].
pub mod rf {
    /// Start continuous inventory. Payload: optional tuning TLVs.
    pub const START_INVENTORY: u8 = 0x10;
    /// Stop inventory. The firmware hardcodes this frame.
    pub const STOP_INVENTORY: u8 = 0xFF;
}

/// Tag-notification subcommands seen in the wild.
pub const TAG_NOTIFY_SUBS: [u8; 3] = [0x00, 0x20, 0x30];

fn need(payload: &[u8], n: usize, what: &str) -> Result<()> {
    if payload.len() < n {
        return Err(Error::Protocol(format!(
            "{what}: payload {} bytes, need {n}",
            payload.len()
        )));
    }
    Ok(())
}

fn ip4(b: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(b[0], b[1], b[2], b[3])
}

/// One entry of the firmware's config parameter map (`pram_p_array`):
/// where a parameter lives in the config image and which GET/SET
/// subcommands move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamEntry {
    /// Offset into the 1072-byte config image.
    pub offset: usize,
    /// Maximum parameter size in bytes.
    pub max_size: usize,
    /// SET subcommand under `CMD=0x01`.
    pub set_sub: u8,
    /// GET subcommand under `CMD=0x01`.
    pub get_sub: u8,
    /// Sub-parameter: the RF-port index for the per-port blocks.
    pub sub_param: u8,
}

const fn p(offset: usize, max_size: usize, set_sub: u8, get_sub: u8, sub_param: u8) -> ParamEntry {
    ParamEntry {
        offset,
        max_size,
        set_sub,
        get_sub,
        sub_param,
    }
}

/// The 16-entry parameter table, byte for byte from the firmware dump
/// at 0x0002bb80.
pub const PARAM_TABLE: [ParamEntry; 16] = [
    p(0x000, 1, sub::SET_BAUD, sub::GET_BAUD, 0),
    p(0x001, 12, sub::SET_NETWORK, sub::GET_NETWORK, 0),
    p(0x00D, 6, sub::SET_MAC, sub::GET_MAC, 0),
    p(0x013, 9, sub::SET_SERVER, sub::GET_SERVER, 0),
    p(0x01C, 256, sub::SET_ANTENNA, sub::GET_ANTENNA, 0),
    p(0x11C, 256, sub::SET_ANTENNA, sub::GET_ANTENNA, 1),
    p(0x21C, 256, sub::SET_ANTENNA, sub::GET_ANTENNA, 2),
    p(0x31C, 256, sub::SET_ANTENNA, sub::GET_ANTENNA, 3),
    p(0x41C, 3, sub::SET_WIEGAND, sub::GET_WIEGAND, 0),
    p(0x41F, 2, sub::SET_RS485, sub::GET_RS485, 0),
    p(0x422, 1, sub::SET_TAG_CACHE, sub::GET_TAG_CACHE, 0),
    p(0x423, 2, sub::SET_TAG_CACHE_TIME, sub::GET_TAG_CACHE_TIME, 0),
    p(0x425, 3, sub::SET_RELAY, sub::GET_RELAY, 0),
    p(0x428, 5, sub::SET_PING, sub::GET_PING, 0),
    p(0x42D, 1, sub::SET_DHCP, sub::GET_DHCP, 0),
    // Internal sentinel entry; no subcommands reach it.
    p(0x421, 1, 0xFF, 0xFF, 0),
];

/// Look up a parameter by its GET subcommand (and port index for the
/// per-port blocks).
#[must_use]
pub fn param_by_get(get_sub: u8, sub_param: u8) -> Option<&'static ParamEntry> {
    PARAM_TABLE
        .iter()
        .find(|e| e.get_sub == get_sub && e.sub_param == sub_param)
}

/// Look up a parameter by its SET subcommand.
#[must_use]
pub fn param_by_set(set_sub: u8, sub_param: u8) -> Option<&'static ParamEntry> {
    PARAM_TABLE
        .iter()
        .find(|e| e.set_sub == set_sub && e.sub_param == sub_param)
}

/// A MAC address, shown `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl std::str::FromStr for MacAddr {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; 6];
        let mut n = 0;
        for part in s.split([':', '-']) {
            if n == 6 {
                return Err(Error::Usage(format!("bad MAC: {s}")));
            }
            out[n] = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Usage(format!("bad MAC: {s}")))?;
            n += 1;
        }
        if n != 6 {
            return Err(Error::Usage(format!("bad MAC: {s}")));
        }
        Ok(MacAddr(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl MacAddr {
    /// Parse from a 6-byte payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 6, "MAC")?;
        let mut b = [0u8; 6];
        b.copy_from_slice(&payload[..6]);
        Ok(MacAddr(b))
    }
}

/// Reader identity from `(0x01, 0x00)`.
#[derive(Debug, Clone, Serialize)]
pub struct ReaderInfo {
    /// Model identifier, hex, 4 bytes.
    pub model: String,
    /// Human-readable reader name, null-padded ASCII on the wire.
    pub name: String,
    /// Seconds since the reader booted.
    pub uptime_secs: u32,
}

impl ReaderInfo {
    /// Decode the info payload: model(4), two filler bytes, name(16),
    /// uptime(u32). Short payloads from older firmware still yield
    /// the model.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 4, "reader info")?;
        let model = payload[..4]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<String>();
        let name = if payload.len() >= 22 {
            String::from_utf8_lossy(&payload[6..22])
                .trim_end_matches('\0')
                .to_string()
        } else {
            String::new()
        };
        let uptime_secs = if payload.len() >= 26 {
            u32::from_be_bytes(payload[22..26].try_into().unwrap())
        } else {
            0
        };
        Ok(Self {
            model,
            name,
            uptime_secs,
        })
    }
}

/// IP / mask / gateway triple from `(0x01, 0x05)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Reader address.
    pub ip: Ipv4Addr,
    /// Subnet mask.
    pub mask: Ipv4Addr,
    /// Default gateway.
    pub gateway: Ipv4Addr,
}

impl NetworkConfig {
    /// Decode the 12-byte network payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 12, "network config")?;
        Ok(Self {
            ip: ip4(&payload[0..4]),
            mask: ip4(&payload[4..8]),
            gateway: ip4(&payload[8..12]),
        })
    }

    /// Wire payload for the SET command.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&self.ip.octets());
        out.extend_from_slice(&self.mask.octets());
        out.extend_from_slice(&self.gateway.octets());
        out
    }
}

/// Server/client mode block from `(0x01, 0x08)`:
/// local port, server endpoint, mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the reader listens on in server mode.
    pub local_port: u16,
    /// Host to dial in client mode.
    pub server_ip: Ipv4Addr,
    /// Port to dial in client mode.
    pub server_port: u16,
    /// 0 = TCP server (default), 1 = TCP client.
    pub mode: u8,
}

impl ServerConfig {
    /// Decode the 9-byte block.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 9, "server config")?;
        Ok(Self {
            local_port: u16::from_be_bytes([payload[0], payload[1]]),
            server_ip: ip4(&payload[2..6]),
            server_port: u16::from_be_bytes([payload[6], payload[7]]),
            mode: payload[8],
        })
    }

    /// Wire payload for the SET command.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.extend_from_slice(&self.local_port.to_be_bytes());
        out.extend_from_slice(&self.server_ip.octets());
        out.extend_from_slice(&self.server_port.to_be_bytes());
        out.push(self.mode);
        out
    }
}

/// COM port configuration: a single baud code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComConfig {
    /// Firmware baud code.
    pub baud_code: u8,
    /// Decoded rate where the code is known.
    pub baud_rate: Option<u32>,
}

impl ComConfig {
    /// Decode the 1-byte payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 1, "com config")?;
        Ok(Self::from_code(payload[0]))
    }

    /// Build from a baud code.
    #[must_use]
    pub fn from_code(baud_code: u8) -> Self {
        // Codes observed in the firmware's connect handshake; the
        // rest of the code space is undocumented.
        let baud_rate = match baud_code {
            2 => Some(38_400),
            4 => Some(115_200),
            _ => None,
        };
        Self {
            baud_code,
            baud_rate,
        }
    }
}

/// One GPI input reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpiState {
    /// Input pin number.
    pub pin: u8,
    /// 0 = low, 1 = high.
    pub level: u8,
}

/// Decode the GPI payload: `[pin][level]` pairs.
pub fn parse_gpi(payload: &[u8]) -> Result<Vec<GpiState>> {
    Ok(payload
        .chunks_exact(2)
        .map(|c| GpiState {
            pin: c[0],
            level: c[1],
        })
        .collect())
}

/// Build the GPO payload from `(pin, state)` pairs, at most four.
pub fn gpo_payload(pairs: &[(u8, u8)]) -> Result<Vec<u8>> {
    if pairs.is_empty() || pairs.len() > 4 {
        return Err(Error::Usage(format!(
            "GPO takes 1..=4 pin/state pairs, got {}",
            pairs.len()
        )));
    }
    let mut out = Vec::with_capacity(pairs.len() * 2);
    for &(pin, state) in pairs {
        if state > 1 {
            return Err(Error::Usage(format!("GPO state must be 0/1, got {state}")));
        }
        out.push(pin);
        out.push(state);
    }
    Ok(out)
}

/// Antenna (RF-port) configuration, the fixed prefix of the 256-byte
/// per-port block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaConfig {
    /// RF port index, 0..=3. Drives antennas `2n+1` and `2n+2`.
    pub port: u8,
    /// Transmit power in dBm, 0..=33.
    pub power_dbm: u8,
    /// Air protocol: 0 = ISO 18000-6B, 1/2 = EPC Gen2 single/dual target.
    pub protocol: u8,
    /// Frequency region code (0x10 = CN dual-band).
    pub freq_region: u8,
    /// Gen2 session, 0..=3.
    pub session: u8,
    /// Gen2 target: 0 = A, 1 = B.
    pub target: u8,
    /// Gen2 Q value.
    pub q_value: u8,
}

impl AntennaConfig {
    /// Decode the block prefix.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 12, "antenna config")?;
        Ok(Self {
            port: payload[0],
            power_dbm: payload[3],
            protocol: payload[4],
            freq_region: payload[5],
            session: payload[7],
            target: payload[8],
            q_value: payload[9],
        })
    }

    /// Wire payload for the SET command: the 14-byte active prefix
    /// with the port index as byte 0.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = vec![0u8; 14];
        out[0] = self.port;
        out[3] = self.power_dbm;
        out[4] = self.protocol;
        out[5] = self.freq_region;
        out[7] = self.session;
        out[8] = self.target;
        out[9] = self.q_value;
        out
    }
}

/// Wiegand output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiegandConfig {
    /// Output enabled.
    pub enable: u8,
    /// 0 = off, 1 = Wiegand-26, 2 = Wiegand-34, 3 = Wiegand-66.
    pub format: u8,
    /// Bit count knob.
    pub bits: u8,
}

impl WiegandConfig {
    /// Decode the 3-byte payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 3, "wiegand config")?;
        Ok(Self {
            enable: payload[0],
            format: payload[1],
            bits: payload[2],
        })
    }

    /// Wire payload for the SET command.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        vec![self.enable, self.format, self.bits]
    }
}

/// RS-485 bus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rs485Config {
    /// Bus address carried in the frame address byte.
    pub address: u8,
    /// COM mode selector.
    pub mode: u8,
}

impl Rs485Config {
    /// Decode the 2-byte payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 2, "rs485 config")?;
        Ok(Self {
            address: payload[0],
            mode: payload[1],
        })
    }

    /// Wire payload for the SET command.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        vec![self.address, self.mode]
    }
}

/// Relay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay number, 1..=4.
    pub relay_num: u8,
    /// On-time in milliseconds.
    pub on_time_ms: u16,
}

impl RelayConfig {
    /// Decode the 3-byte payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 3, "relay config")?;
        Ok(Self {
            relay_num: payload[0],
            on_time_ms: u16::from_be_bytes([payload[1], payload[2]]),
        })
    }

    /// Wire payload for the SET command.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = vec![self.relay_num];
        out.extend_from_slice(&self.on_time_ms.to_be_bytes());
        out
    }
}

/// Ping watchdog configuration. The target IP is little-endian on the
/// wire, unlike every other address in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingConfig {
    /// Watchdog enabled.
    pub enable: u8,
    /// Address the reader pings.
    pub target: Ipv4Addr,
}

impl PingConfig {
    /// Decode the 5-byte payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 5, "ping config")?;
        let b = &payload[1..5];
        Ok(Self {
            enable: payload[0],
            target: Ipv4Addr::new(b[3], b[2], b[1], b[0]),
        })
    }

    /// Wire payload for the SET command.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = vec![self.enable];
        let mut o = self.target.octets();
        o.reverse();
        out.extend_from_slice(&o);
        out
    }
}

/// System time from `(0x01, 0x11)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeInfo {
    /// Unix seconds.
    pub seconds: u32,
    /// Microseconds, when the firmware includes them.
    pub micros: Option<u32>,
}

impl TimeInfo {
    /// Decode seconds and optional microseconds.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 4, "time")?;
        let seconds = u32::from_be_bytes(payload[..4].try_into().unwrap());
        let micros = (payload.len() >= 8)
            .then(|| u32::from_be_bytes(payload[4..8].try_into().unwrap()));
        Ok(Self { seconds, micros })
    }
}

/// GPI trigger modes.
pub mod trigger_mode {
    /// No trigger.
    pub const DISABLED: u8 = 0;
    /// Low-to-high transition.
    pub const RISING: u8 = 1;
    /// High-to-low transition.
    pub const FALLING: u8 = 2;
    /// High level.
    pub const HIGH: u8 = 3;
    /// Low level.
    pub const LOW: u8 = 4;
    /// Any change.
    pub const ANY: u8 = 5;
    /// Stop after a delay timer (10 ms units).
    pub const DELAY: u8 = 6;

    /// Human-readable mode name.
    #[must_use]
    pub fn name(mode: u8) -> &'static str {
        match mode {
            DISABLED => "disabled",
            RISING => "rising-edge",
            FALLING => "falling-edge",
            HIGH => "level-high",
            LOW => "level-low",
            ANY => "any-edge",
            DELAY => "delay-timer",
            _ => "unknown",
        }
    }
}

/// Per-GPI trigger configuration blob:
/// `[gpi][start_mode][cmd_len u16][rf_cmd…][stop_mode]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// GPI input index, 0..=3.
    pub gpi_pin: u8,
    /// Condition that starts the RF command.
    pub start_mode: u8,
    /// Condition that stops inventory. `None` when the blob is
    /// truncated.
    pub stop_mode: Option<u8>,
    /// The RF command fired on trigger, hex.
    pub rf_command_hex: String,
    /// Set when the blob was shorter than its own length field said.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerConfig {
    /// Parse a trigger blob, tolerating truncation: readers in the
    /// field return short blobs for unconfigured GPIs.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        need(payload, 4, "trigger config")?;
        let gpi_pin = payload[0];
        let start_mode = payload[1];
        let cmd_len = usize::from(u16::from_be_bytes([payload[2], payload[3]]));
        if payload.len() < 4 + cmd_len + 1 {
            return Ok(Self {
                gpi_pin,
                start_mode,
                stop_mode: None,
                rf_command_hex: hex(&payload[4..]),
                error: Some(format!(
                    "truncated: {} bytes, command claims {cmd_len}",
                    payload.len()
                )),
            });
        }
        Ok(Self {
            gpi_pin,
            start_mode,
            stop_mode: Some(payload[4 + cmd_len]),
            rf_command_hex: hex(&payload[4..4 + cmd_len]),
            error: None,
        })
    }

    /// Build the blob for the SET command.
    pub fn build(gpi_pin: u8, start_mode: u8, stop_mode: u8, rf_command: &[u8]) -> Result<Vec<u8>> {
        if gpi_pin > 3 {
            return Err(Error::Usage(format!("GPI index {gpi_pin} out of range")));
        }
        if start_mode > trigger_mode::DELAY || stop_mode > trigger_mode::DELAY {
            return Err(Error::Usage("trigger mode out of range".into()));
        }
        let mut out = Vec::with_capacity(5 + rf_command.len());
        out.push(gpi_pin);
        out.push(start_mode);
        out.extend_from_slice(&(rf_command.len() as u16).to_be_bytes());
        out.extend_from_slice(rf_command);
        out.push(stop_mode);
        Ok(out)
    }
}

/// Default RF command a trigger fires: start inventory.
pub const TRIGGER_START_INVENTORY: [u8; 4] = [CMD_RF, rf::START_INVENTORY, 0x00, 0x00];

/// Lowercase hex of a byte slice.
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
