/*! The reader's 1072-byte `config_pram` image.

The firmware persists every management parameter in one fixed-layout
binary blob: network settings up front, four 256-byte RF-port blocks
from 0x1C, and a global region from 0x41C (Wiegand, RS-485, tag
cache, relay, ping, DHCP). GET/SET commands are raw slice accesses
into this image, driven by the parameter table in [`crate::proto`].

[`ConfigImage`] is a value type: edits stay local until
[`ConfigImage::save`], which replaces the file atomically. Bytes
outside the documented regions round-trip untouched, so an image
pulled from a reader can be edited and pushed back without losing
whatever the firmware keeps in the gaps.
*/
use std::net::Ipv4Addr;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::proto::{
    AntennaConfig, MacAddr, ParamEntry, PingConfig, RelayConfig, Rs485Config, ServerConfig,
    WiegandConfig,
};
use crate::{Error, Result};

/// Exact image size: 0x430 bytes.
pub const IMAGE_SIZE: usize = 0x430;

/// First RF-port block.
pub const ANT_BLOCK_START: usize = 0x1C;
/// Per-port block stride.
pub const ANT_BLOCK_SIZE: usize = 0x100;
/// Start of the trailing global region.
pub const GLOBAL_START: usize = 0x41C;

/// MAC address bytes, preserved across factory reset.
pub const MAC_OFFSET: usize = 0x0D;

const SERVER_OFFSET: usize = 0x13;
const WIEGAND_OFFSET: usize = GLOBAL_START;
const RS485_OFFSET: usize = 0x41F;
const TAG_CACHE_OFFSET: usize = 0x422;
const TAG_CACHE_TIME_OFFSET: usize = 0x423;
const RELAY_OFFSET: usize = 0x425;
const PING_OFFSET: usize = 0x428;
const DHCP_OFFSET: usize = 0x42D;

fn default_image() -> [u8; IMAGE_SIZE] {
    let mut d = [0u8; IMAGE_SIZE];
    d[0x00] = 4; // 115200 on the PC serial port
    d[0x01..0x05].copy_from_slice(&[192, 168, 1, 116]);
    d[0x05..0x09].copy_from_slice(&[255, 255, 255, 0]);
    d[0x09..0x0D].copy_from_slice(&[192, 168, 1, 1]);
    // Server mode, listening on 9090.
    d[SERVER_OFFSET..SERVER_OFFSET + 2].copy_from_slice(&9090u16.to_be_bytes());
    for port in 0..4 {
        let base = ANT_BLOCK_START + port * ANT_BLOCK_SIZE;
        d[base] = port as u8;
        d[base + 3] = 30; // dBm
        d[base + 4] = 2; // EPC Gen2 dual target
        d[base + 5] = 0x10; // CN dual-band
        d[base + 7] = 2; // session S2
        d[base + 9] = 4; // Q
    }
    d[RS485_OFFSET] = 1;
    d[TAG_CACHE_TIME_OFFSET..TAG_CACHE_TIME_OFFSET + 2].copy_from_slice(&5u16.to_be_bytes());
    d[RELAY_OFFSET] = 1;
    d
}

/// An in-memory config image.
#[derive(Clone)]
pub struct ConfigImage {
    data: Box<[u8; IMAGE_SIZE]>,
}

impl Default for ConfigImage {
    fn default() -> Self {
        Self {
            data: Box::new(default_image()),
        }
    }
}

/// Flat, JSON-friendly view of the documented fields.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    /// COM baud code.
    pub baud_code: u8,
    /// Reader IP.
    pub ip: Ipv4Addr,
    /// Subnet mask.
    pub mask: Ipv4Addr,
    /// Gateway.
    pub gateway: Ipv4Addr,
    /// MAC address.
    pub mac: MacAddr,
    /// Server/client block.
    pub server: ServerConfig,
    /// Per-port antenna settings.
    pub antennas: Vec<AntennaConfig>,
    /// Wiegand output settings.
    pub wiegand: WiegandConfig,
    /// RS-485 settings.
    pub rs485: Rs485Config,
    /// Tag-cache switch.
    pub tag_cache: u8,
    /// Tag-cache window.
    pub tag_cache_time: u16,
    /// Relay settings.
    pub relay: RelayConfig,
    /// Ping watchdog.
    pub ping: PingConfig,
    /// DHCP mode.
    pub dhcp: u8,
}

impl ConfigImage {
    /// Wrap a raw image. Anything but exactly [`IMAGE_SIZE`] bytes is
    /// rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: [u8; IMAGE_SIZE] = bytes.try_into().map_err(|_| {
            Error::Usage(format!(
                "config image must be exactly {IMAGE_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            data: Box::new(data),
        })
    }

    /// Load an image file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    /// Write the image to `path`, atomically: the new content lands
    /// in a temp file in the same directory and replaces the target
    /// in one rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(d) => tempfile::NamedTempFile::new_in(d)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };
        std::io::Write::write_all(&mut tmp, &self.data[..])?;
        tmp.persist(path)
            .map_err(|e| Error::Transport(e.error))?;
        info!("config image saved to {}", path.display());
        Ok(())
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// The raw slice behind a parameter-table entry.
    #[must_use]
    pub fn param(&self, entry: &ParamEntry) -> &[u8] {
        &self.data[entry.offset..entry.offset + entry.max_size]
    }

    /// Overwrite a parameter-table slice. `data` may be shorter than
    /// the parameter's maximum; the tail keeps its old bytes.
    pub fn set_param(&mut self, entry: &ParamEntry, data: &[u8]) -> Result<()> {
        if data.len() > entry.max_size {
            return Err(Error::Usage(format!(
                "parameter at {:#05x} takes at most {} bytes, got {}",
                entry.offset,
                entry.max_size,
                data.len()
            )));
        }
        self.data[entry.offset..entry.offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// COM baud code.
    #[must_use]
    pub fn baud_code(&self) -> u8 {
        self.data[0]
    }

    /// Set the COM baud code.
    pub fn set_baud_code(&mut self, code: u8) {
        self.data[0] = code;
    }

    fn get_ip(&self, offset: usize) -> Ipv4Addr {
        Ipv4Addr::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        )
    }

    /// Reader IP address.
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.get_ip(0x01)
    }

    /// Subnet mask.
    #[must_use]
    pub fn mask(&self) -> Ipv4Addr {
        self.get_ip(0x05)
    }

    /// Default gateway.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.get_ip(0x09)
    }

    /// Set IP, mask and gateway together.
    pub fn set_network(&mut self, ip: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) {
        self.data[0x01..0x05].copy_from_slice(&ip.octets());
        self.data[0x05..0x09].copy_from_slice(&mask.octets());
        self.data[0x09..0x0D].copy_from_slice(&gateway.octets());
    }

    /// Device MAC.
    #[must_use]
    pub fn mac(&self) -> MacAddr {
        let mut m = [0u8; 6];
        m.copy_from_slice(&self.data[MAC_OFFSET..MAC_OFFSET + 6]);
        MacAddr(m)
    }

    /// Program the MAC.
    pub fn set_mac(&mut self, mac: MacAddr) {
        self.data[MAC_OFFSET..MAC_OFFSET + 6].copy_from_slice(&mac.0);
    }

    /// Server/client block.
    pub fn server(&self) -> Result<ServerConfig> {
        ServerConfig::parse(&self.data[SERVER_OFFSET..SERVER_OFFSET + 9])
    }

    /// Set the server/client block.
    pub fn set_server(&mut self, cfg: &ServerConfig) {
        self.data[SERVER_OFFSET..SERVER_OFFSET + 9].copy_from_slice(&cfg.to_payload());
    }

    /// Antenna settings for one RF port.
    pub fn antenna(&self, port: u8) -> Result<AntennaConfig> {
        if port > 3 {
            return Err(Error::Usage(format!("RF port {port} out of range")));
        }
        let base = ANT_BLOCK_START + usize::from(port) * ANT_BLOCK_SIZE;
        AntennaConfig::parse(&self.data[base..base + ANT_BLOCK_SIZE])
    }

    /// Write the antenna prefix of one RF-port block; the rest of the
    /// 256-byte block (trigger parameters and reserved area) is left
    /// alone.
    pub fn set_antenna(&mut self, cfg: &AntennaConfig) -> Result<()> {
        if cfg.port > 3 {
            return Err(Error::Usage(format!("RF port {} out of range", cfg.port)));
        }
        let base = ANT_BLOCK_START + usize::from(cfg.port) * ANT_BLOCK_SIZE;
        self.data[base..base + 14].copy_from_slice(&cfg.to_payload());
        Ok(())
    }

    /// Wiegand settings.
    pub fn wiegand(&self) -> Result<WiegandConfig> {
        WiegandConfig::parse(&self.data[WIEGAND_OFFSET..WIEGAND_OFFSET + 3])
    }

    /// Set Wiegand settings.
    pub fn set_wiegand(&mut self, cfg: &WiegandConfig) {
        self.data[WIEGAND_OFFSET..WIEGAND_OFFSET + 3].copy_from_slice(&cfg.to_payload());
    }

    /// RS-485 settings.
    pub fn rs485(&self) -> Result<Rs485Config> {
        Rs485Config::parse(&self.data[RS485_OFFSET..RS485_OFFSET + 2])
    }

    /// Set RS-485 settings.
    pub fn set_rs485(&mut self, cfg: &Rs485Config) {
        self.data[RS485_OFFSET..RS485_OFFSET + 2].copy_from_slice(&cfg.to_payload());
    }

    /// Tag-cache switch.
    #[must_use]
    pub fn tag_cache(&self) -> u8 {
        self.data[TAG_CACHE_OFFSET]
    }

    /// Set the tag-cache switch.
    pub fn set_tag_cache(&mut self, enable: u8) {
        self.data[TAG_CACHE_OFFSET] = enable;
    }

    /// Tag-cache window.
    #[must_use]
    pub fn tag_cache_time(&self) -> u16 {
        u16::from_be_bytes([
            self.data[TAG_CACHE_TIME_OFFSET],
            self.data[TAG_CACHE_TIME_OFFSET + 1],
        ])
    }

    /// Set the tag-cache window.
    pub fn set_tag_cache_time(&mut self, time: u16) {
        self.data[TAG_CACHE_TIME_OFFSET..TAG_CACHE_TIME_OFFSET + 2]
            .copy_from_slice(&time.to_be_bytes());
    }

    /// Relay settings.
    pub fn relay(&self) -> Result<RelayConfig> {
        RelayConfig::parse(&self.data[RELAY_OFFSET..RELAY_OFFSET + 3])
    }

    /// Set relay settings.
    pub fn set_relay(&mut self, cfg: &RelayConfig) {
        self.data[RELAY_OFFSET..RELAY_OFFSET + 3].copy_from_slice(&cfg.to_payload());
    }

    /// Ping watchdog settings.
    pub fn ping(&self) -> Result<PingConfig> {
        PingConfig::parse(&self.data[PING_OFFSET..PING_OFFSET + 5])
    }

    /// Set ping watchdog settings.
    pub fn set_ping(&mut self, cfg: &PingConfig) {
        self.data[PING_OFFSET..PING_OFFSET + 5].copy_from_slice(&cfg.to_payload());
    }

    /// DHCP mode.
    #[must_use]
    pub fn dhcp(&self) -> u8 {
        self.data[DHCP_OFFSET]
    }

    /// Set DHCP mode.
    pub fn set_dhcp(&mut self, mode: u8) {
        self.data[DHCP_OFFSET] = mode;
    }

    /// Reset every field to the factory defaults, keeping only the
    /// device MAC, the same contract the firmware's `config_reset`
    /// honors.
    pub fn factory_reset(&mut self) {
        let mac = self.mac();
        *self.data = default_image();
        self.set_mac(mac);
    }

    /// Decode all documented fields into a JSON-friendly summary.
    pub fn summary(&self) -> Result<ConfigSummary> {
        Ok(ConfigSummary {
            baud_code: self.baud_code(),
            ip: self.ip(),
            mask: self.mask(),
            gateway: self.gateway(),
            mac: self.mac(),
            server: self.server()?,
            antennas: (0..4).map(|p| self.antenna(p)).collect::<Result<_>>()?,
            wiegand: self.wiegand()?,
            rs485: self.rs485()?,
            tag_cache: self.tag_cache(),
            tag_cache_time: self.tag_cache_time(),
            relay: self.relay()?,
            ping: self.ping()?,
            dhcp: self.dhcp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_enforced() {
        assert!(ConfigImage::from_bytes(&[0u8; IMAGE_SIZE]).is_ok());
        assert!(ConfigImage::from_bytes(&[0u8; IMAGE_SIZE - 1]).is_err());
        assert!(ConfigImage::from_bytes(&[0u8; IMAGE_SIZE + 1]).is_err());
    }

    #[test]
    fn factory_reset_preserves_mac_only() {
        // An image with every byte distinct from the defaults.
        let mut raw = [0u8; IMAGE_SIZE];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i % 251) as u8 ^ 0x5A;
        }
        let mut img = ConfigImage::from_bytes(&raw).unwrap();
        let mac_before = img.mac();
        img.factory_reset();
        assert_eq!(img.mac(), mac_before);
        let defaults = default_image();
        for i in 0..IMAGE_SIZE {
            if (MAC_OFFSET..MAC_OFFSET + 6).contains(&i) {
                assert_eq!(img.as_bytes()[i], raw[i], "MAC byte {i} changed");
            } else {
                assert_eq!(img.as_bytes()[i], defaults[i], "byte {i:#05x} not defaulted");
            }
        }
    }

    #[test]
    fn undocumented_bytes_roundtrip() -> crate::Result<()> {
        let mut raw = [0u8; IMAGE_SIZE];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i * 13) as u8;
        }
        let mut img = ConfigImage::from_bytes(&raw)?;
        // Touch documented fields only.
        img.set_network(
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(255, 0, 0, 0),
            Ipv4Addr::new(10, 1, 2, 1),
        );
        img.set_dhcp(1);
        // A byte in the middle of an RF-port block's reserved area
        // must be untouched.
        let probe = ANT_BLOCK_START + 0x80;
        assert_eq!(img.as_bytes()[probe], raw[probe]);
        // And the padding past the DHCP byte.
        assert_eq!(img.as_bytes()[0x42E], raw[0x42E]);
        assert_eq!(img.as_bytes()[0x42F], raw[0x42F]);
        Ok(())
    }

    #[test]
    fn save_and_load_roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config_pram");
        let mut img = ConfigImage::default();
        img.set_tag_cache(1);
        img.set_tag_cache_time(30);
        img.save(&path)?;
        let loaded = ConfigImage::load(&path)?;
        assert_eq!(loaded.as_bytes(), img.as_bytes());
        assert_eq!(loaded.tag_cache_time(), 30);
        Ok(())
    }

    #[test]
    fn param_table_slices() -> crate::Result<()> {
        use crate::proto::{param_by_get, sub};
        let mut img = ConfigImage::default();
        let entry = param_by_get(sub::GET_MAC, 0).unwrap();
        img.set_param(entry, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])?;
        assert_eq!(img.mac().to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(img.param(entry), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        // Oversized writes are refused.
        let baud = param_by_get(sub::GET_BAUD, 0).unwrap();
        assert!(img.set_param(baud, &[1, 2]).is_err());
        Ok(())
    }

    #[test]
    fn antenna_block_edit_keeps_block_tail() -> crate::Result<()> {
        let mut raw = [0u8; IMAGE_SIZE];
        raw[ANT_BLOCK_START + 0x20] = 0x77; // inside port 0's tail
        let mut img = ConfigImage::from_bytes(&raw)?;
        let mut cfg = img.antenna(0)?;
        cfg.power_dbm = 20;
        img.set_antenna(&cfg)?;
        assert_eq!(img.antenna(0)?.power_dbm, 20);
        assert_eq!(img.as_bytes()[ANT_BLOCK_START + 0x20], 0x77);
        Ok(())
    }

    #[test]
    fn default_summary_decodes() -> crate::Result<()> {
        let img = ConfigImage::default();
        let s = img.summary()?;
        assert_eq!(s.ip, Ipv4Addr::new(192, 168, 1, 116));
        assert_eq!(s.server.local_port, 9090);
        assert_eq!(s.antennas.len(), 4);
        assert_eq!(s.antennas[2].port, 2);
        assert_eq!(s.tag_cache_time, 5);
        Ok(())
    }
}
