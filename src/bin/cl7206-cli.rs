/*! Command-line front end for CL7206C2 readers.

```text
$ cl7206-cli 192.168.1.116 info
$ cl7206-cli 192.168.1.116 9090 inventory 10
$ cl7206-cli 192.168.1.116 settime now
$ cl7206-cli discover
$ cl7206-cli config dump /tmp/config_pram
```

Commands are named 1:1 with the web bridge endpoints. Results print
as JSON on stdout. Exit codes: 0 success, 2 usage error, 3
network/protocol failure.
*/
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use cl7206::client::ReaderSession;
use cl7206::config_image::ConfigImage;
use cl7206::inventory::{InventoryEvent, InventoryTask};
use cl7206::proto::{MacAddr, RelayConfig, WiegandConfig};
use cl7206::transport::UdpTransport;
use cl7206::{Error, discovery};

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    #[arg(short = 'v', action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,

    /// Reader IP address, `discover`, or `config`.
    target: String,

    /// `[port] <command> [args…]`
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
}

fn usage(msg: &str) -> Error {
    Error::Usage(msg.to_string())
}

fn emit(value: impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_reader(opt: &Opt) -> Result<()> {
    let (port, args) = match opt.rest.first().and_then(|a| a.parse::<u16>().ok()) {
        Some(p) => (p, &opt.rest[1..]),
        None => (9090u16, &opt.rest[..]),
    };
    let command = args
        .first()
        .ok_or_else(|| usage("no command given"))?
        .to_lowercase();
    let args = &args[1..];

    // The reader answers management commands over UDP too; fall back
    // when its TCP slots are taken.
    let mut session = match ReaderSession::connect(&opt.target, port, None) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("TCP connect failed ({e}), trying UDP");
            let udp = UdpTransport::connect(&opt.target, port)?;
            ReaderSession::over(Box::new(udp), None, format!("{}:{port}/udp", opt.target))
        }
    };
    match command.as_str() {
        "info" => emit(session.reader_info()?),
        "network" => emit(session.network()?),
        "mac" => emit(serde_json::json!({ "mac": session.mac()? })),
        "setmac" => {
            let mac: MacAddr = args
                .first()
                .ok_or_else(|| usage("setmac <aa:bb:cc:dd:ee:ff>"))?
                .parse()?;
            emit(serde_json::json!({ "mac": session.set_mac(mac)? }))
        }
        "time" => emit(session.time()?),
        "settime" => {
            let ts = match args.first().map(String::as_str) {
                None | Some("now") => None,
                Some(s) => Some(s.parse::<u32>().map_err(|_| usage("settime <unix-ts|now>"))?),
            };
            emit(session.set_time(ts)?)
        }
        "gpi" => emit(session.gpi()?),
        "gpo" => {
            let pin = parse_u8(args, 0, "gpo <pin> <0|1>")?;
            let level = parse_u8(args, 1, "gpo <pin> <0|1>")?;
            session.set_gpo(&[(pin, level)])?;
            emit(serde_json::json!({ "status": "ok" }))
        }
        "relay" => emit(session.relay()?),
        "setrelay" => {
            let relay_num = parse_u8(args, 0, "setrelay <num> <ms>")?;
            let on_time_ms = args
                .get(1)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| usage("setrelay <num> <ms>"))?;
            emit(session.set_relay(&RelayConfig {
                relay_num,
                on_time_ms,
            })?)
        }
        "rs485" => emit(session.rs485_config()?),
        "tagcache" => emit(serde_json::json!({ "enabled": session.tag_cache()? })),
        "settagcache" => {
            let enable = parse_u8(args, 0, "settagcache <0|1>")? != 0;
            emit(serde_json::json!({ "enabled": session.set_tag_cache(enable)? }))
        }
        "tagtime" => emit(serde_json::json!({ "cache_time": session.tag_cache_time()? })),
        "settagcachetime" => {
            let t = args
                .first()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| usage("settagcachetime <secs>"))?;
            emit(serde_json::json!({ "cache_time": session.set_tag_cache_time(t)? }))
        }
        "tags" => {
            let tags = session.get_tags()?;
            emit(serde_json::json!({ "count": tags.len(), "tags": tags }))
        }
        "cleartags" => {
            session.clear_tags()?;
            emit(serde_json::json!({ "status": "ok" }))
        }
        "deletetag" => {
            let index = args
                .first()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| usage("deletetag <index>"))?;
            session.delete_tag(index)?;
            emit(serde_json::json!({ "status": "ok" }))
        }
        "ping" => emit(session.ping_config()?),
        "dhcp" => emit(serde_json::json!({ "dhcp": session.dhcp()? })),
        "setdhcp" => {
            let mode = parse_u8(args, 0, "setdhcp <0|1>")?;
            emit(serde_json::json!({ "dhcp": session.set_dhcp(mode)? }))
        }
        "wiegand" => emit(session.wiegand()?),
        "setwiegand" => {
            let enable = parse_u8(args, 0, "setwiegand <enable> <format> <bits>")?;
            let format = parse_u8(args, 1, "setwiegand <enable> <format> <bits>")?;
            let bits = parse_u8(args, 2, "setwiegand <enable> <format> <bits>")?;
            emit(session.set_wiegand(&WiegandConfig {
                enable,
                format,
                bits,
            })?)
        }
        "server" => emit(session.server_config()?),
        "com" => emit(session.com_config()?),
        "antenna" => {
            let port = parse_u8(args, 0, "antenna <0..3>")?;
            emit(session.antenna(port)?)
        }
        "antennas" => emit(session.antennas()?),
        "setpower" => {
            let port = parse_u8(args, 0, "setpower <port> <dbm>")?;
            let dbm = parse_u8(args, 1, "setpower <port> <dbm>")?;
            session.set_antenna_power(port, dbm)?;
            emit(serde_json::json!({ "status": "ok" }))
        }
        "trigger" => {
            let gpi = parse_u8(args, 0, "trigger <0..3>")?;
            emit(session.trigger(gpi)?)
        }
        "triggers" => emit(session.triggers()?),
        "settrigger" => {
            let gpi = parse_u8(args, 0, "settrigger <gpi> <start> <stop> [delay10ms]")?;
            let start = parse_u8(args, 1, "settrigger <gpi> <start> <stop> [delay10ms]")?;
            let stop = parse_u8(args, 2, "settrigger <gpi> <start> <stop> [delay10ms]")?;
            let delay = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
            session.set_trigger(gpi, start, stop, delay)?;
            emit(serde_json::json!({ "status": "ok" }))
        }
        "reboot" => {
            session.reboot()?;
            emit(serde_json::json!({
                "status": "rebooting",
                "reconnect_after_secs": cl7206::client::REBOOT_GRACE.as_secs(),
            }))
        }
        "factoryreset" | "reset" => {
            session.factory_reset()?;
            emit(serde_json::json!({ "status": "factory_reset" }))
        }
        "inventory" => {
            let secs: u64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(10);
            run_inventory(&session, secs)
        }
        "monitor" => {
            let secs: u64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(30);
            run_monitor(&mut session, secs)
        }
        "raw" => {
            let bytes = parse_hex(&args.join(""))?;
            if bytes.len() < 2 {
                return Err(usage("raw <cmd><sub>[payload] hex bytes").into());
            }
            let frame = session.request(bytes[0], bytes[1], &bytes[2..])?;
            emit(serde_json::json!({
                "cmd": frame.cmd,
                "sub": frame.sub,
                "payload": cl7206::proto::hex(&frame.payload),
            }))
        }
        other => Err(usage(&format!("unknown command: {other}")).into()),
    }
}

fn run_inventory(session: &ReaderSession, secs: u64) -> Result<()> {
    let (task, events) = InventoryTask::start(session, &[])?;
    let deadline = std::time::Instant::now() + Duration::from_secs(secs);
    let mut count = 0u64;
    while std::time::Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(InventoryEvent::Tag(tag)) => {
                count = tag.count;
                println!("{}", serde_json::to_string(&*tag)?);
            }
            Ok(InventoryEvent::Terminated { reason }) => {
                eprintln!("inventory ended: {reason}");
                break;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    task.stop();
    eprintln!("{count} tags read");
    Ok(())
}

fn run_monitor(session: &mut ReaderSession, secs: u64) -> Result<()> {
    let deadline = std::time::Instant::now() + Duration::from_secs(secs);
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        if let Some(frame) = session.pull_frame(remaining.min(Duration::from_secs(1)))? {
            println!(
                "{}",
                serde_json::json!({
                    "cmd": frame.cmd,
                    "sub": frame.sub,
                    "payload": cl7206::proto::hex(&frame.payload),
                })
            );
        }
    }
}

fn run_discover(opt: &Opt) -> Result<()> {
    let port = opt
        .rest
        .first()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090);
    let found = discovery::discover(port, discovery::DISCOVERY_TIMEOUT)?;
    let list: Vec<_> = found
        .into_iter()
        .map(|(addr, info)| serde_json::json!({ "from": addr.to_string(), "info": info }))
        .collect();
    emit(serde_json::json!({ "count": list.len(), "readers": list }))
}

/// `config dump <file>` and `config reset <file>` work on a local
/// `config_pram` image without any reader.
fn run_config(opt: &Opt) -> Result<()> {
    let action = opt
        .rest
        .first()
        .ok_or_else(|| usage("config <dump|reset> <file>"))?
        .as_str();
    let path = opt
        .rest
        .get(1)
        .ok_or_else(|| usage("config <dump|reset> <file>"))?;
    match action {
        "dump" => {
            let img = ConfigImage::load(path)?;
            emit(img.summary()?)
        }
        "reset" => {
            let mut img = ConfigImage::load(path)?;
            img.factory_reset();
            img.save(path)?;
            emit(serde_json::json!({ "status": "ok", "mac": img.mac() }))
        }
        other => Err(usage(&format!("unknown config action: {other}")).into()),
    }
}

fn parse_u8(args: &[String], i: usize, msg: &str) -> Result<u8, Error> {
    args.get(i)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| usage(msg))
}

fn parse_hex(s: &str) -> Result<Vec<u8>, Error> {
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !s.len().is_multiple_of(2) {
        return Err(usage("hex string must have an even number of digits"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| usage(&format!("bad hex at offset {i}")))
        })
        .collect()
}

fn run(opt: &Opt) -> Result<()> {
    match opt.target.as_str() {
        "discover" => run_discover(opt),
        "config" => run_config(opt),
        _ => run_reader(opt),
    }
}

fn main() {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("cl7206")
        .quiet(false)
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .expect("logger init");

    if let Err(e) = run(&opt) {
        eprintln!("error: {e}");
        let code = match e.downcast_ref::<Error>() {
            Some(Error::Usage(_)) => 2,
            _ => 3,
        };
        std::process::exit(code);
    }
}
