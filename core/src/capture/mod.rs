//! Packet capture sources.
//!
//! Opens a live device (or every up interface when `any` is requested on
//! systems without an `any` pseudo-device), or reads a saved pcap file. Each
//! source feeds one packet channel; multiple sources are merged into one.

use crate::config::Options;
use crate::runtime::CancelToken;

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use pcap::{Active, Capture, Device};

const SNAPLEN: i32 = 65536;
/// Read timeout so capture threads can observe cancellation.
const POLL_TIMEOUT_MS: i32 = 1000;

/// One captured frame with its capture timestamp.
#[derive(Debug)]
pub struct PacketFrame {
    pub data: Vec<u8>,
    pub ts: DateTime<Utc>,
}

/// Synthesizes a BPF expression from ip/port filters; a user-supplied
/// expression wins.
pub fn bpf_filter(bpf: &str, ips: &[String], ports: &[String]) -> String {
    if !bpf.is_empty() {
        return bpf.to_owned();
    }
    let mut filter = String::from("tcp");
    if !ips.is_empty() {
        let hosts: Vec<String> = ips.iter().map(|ip| format!("host {}", ip)).collect();
        filter.push_str(&format!(" and ({})", hosts.join(" or ")));
    }
    if !ports.is_empty() {
        let ports: Vec<String> = ports.iter().map(|p| format!("port {}", p)).collect();
        filter.push_str(&format!(" and ({})", ports.join(" or ")));
    }
    filter
}

fn frame_ts(header: &pcap::PacketHeader) -> DateTime<Utc> {
    Utc.timestamp_opt(header.ts.tv_sec as i64, header.ts.tv_usec as u32 * 1000)
        .single()
        .unwrap_or_else(Utc::now)
}

fn pump(mut cap: Capture<Active>, tx: Sender<PacketFrame>, cancel: CancelToken, offline: bool) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match cap.next_packet() {
            Ok(packet) => {
                let frame = PacketFrame {
                    data: packet.data.to_vec(),
                    ts: frame_ts(packet.header),
                };
                if tx.send(frame).is_err() {
                    return;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => return,
            Err(err) => {
                if offline {
                    // end of file surfaces as a generic error on some libpcaps
                    log::debug!("capture ended: {}", err);
                } else {
                    log::error!("capture read failed: {}", err);
                }
                return;
            }
        }
    }
}

fn open_device(name: &str, filter: &str) -> Result<Capture<Active>> {
    let mut cap = Capture::from_device(name)
        .with_context(|| format!("open device {}", name))?
        .promisc(false)
        .snaplen(SNAPLEN)
        .timeout(POLL_TIMEOUT_MS)
        .open()
        .with_context(|| format!("activate device {}", name))?;
    cap.filter(filter, true)
        .with_context(|| format!("install filter {:?} on {}", filter, name))?;
    Ok(cap)
}

fn spawn_pump(cap: Capture<Active>, tx: Sender<PacketFrame>, cancel: CancelToken, offline: bool) {
    std::thread::Builder::new()
        .name("capture".to_owned())
        .spawn(move || pump(cap, tx, cancel, offline))
        .expect("spawn capture thread");
}

/// Devices that are up and carry at least one address.
fn up_devices() -> Result<Vec<Device>> {
    let devices = Device::list().context("list devices")?;
    Ok(devices
        .into_iter()
        .filter(|d| d.flags.if_flags.contains(pcap::IfFlags::UP) && !d.addresses.is_empty())
        .collect())
}

/// Opens the configured capture source(s) and returns the merged packet
/// channel. The channel closes when every source ends.
pub fn create_packet_channel(
    options: &Options,
    cancel: &CancelToken,
) -> Result<Receiver<PacketFrame>> {
    let ips: Vec<String> = options
        .ip
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_owned())
        .collect();
    let ports: Vec<String> = options
        .port
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_owned())
        .collect();
    let filter = bpf_filter(&options.bpf, &ips, &ports);
    let (tx, rx) = bounded(options.chan_size);

    let input = options.input.as_str();
    if Path::new(input).is_file() {
        // offline analysis of a saved capture
        let mut cap = Capture::from_file(input)
            .with_context(|| format!("open pcap file {}", input))?;
        cap.filter(&filter, true)
            .with_context(|| format!("install filter {:?}", filter))?;
        let tx = tx;
        let cancel = cancel.clone();
        std::thread::Builder::new()
            .name("capture-file".to_owned())
            .spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match cap.next_packet() {
                        Ok(packet) => {
                            let frame = PacketFrame {
                                data: packet.data.to_vec(),
                                ts: frame_ts(packet.header),
                            };
                            if tx.send(frame).is_err() {
                                return;
                            }
                        }
                        Err(_) => return, // end of file
                    }
                }
            })
            .expect("spawn capture thread");
        return Ok(rx);
    }

    if input == "any" && !cfg!(target_os = "linux") {
        // only linux has the any pseudo-device; open every up interface
        let mut opened = 0;
        for device in up_devices()? {
            let name = device.name.clone();
            match open_device(&name, &filter) {
                Ok(cap) => {
                    log::info!("open device {}", name);
                    spawn_pump(cap, tx.clone(), cancel.clone(), false);
                    opened += 1;
                }
                Err(err) => {
                    log::warn!("open device {} failed: {:#}", name, err);
                }
            }
        }
        if opened == 0 {
            bail!("no capture device available");
        }
        return Ok(rx);
    }

    let cap = open_device(input, &filter)?;
    log::info!("open device {}", input);
    spawn_pump(cap, tx, cancel.clone(), false);
    Ok(rx)
}
