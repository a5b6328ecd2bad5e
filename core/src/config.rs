//! Configuration options.
//!
//! The binary builds an [`Options`] from command line flags; the same struct
//! can also be loaded from a TOML file whose values serve as defaults for
//! anything the flags leave unset. All fields carry serde defaults so a
//! partial file is valid.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::IntSet;

/// Loads options from a TOML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Options> {
    let config_str = fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.as_ref().display()))?;
    let options: Options = toml::from_str(&config_str).context("invalid config file")?;
    Ok(options)
}

/// Record detail level.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Only the request/status line.
    Url,
    /// Start line plus headers.
    Header,
    /// Start line, headers, and decoded text body.
    #[default]
    All,
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "url" => Ok(Level::Url),
            "header" => Ok(Level::Header),
            "all" => Ok(Level::All),
            _ => bail!("unknown level {:?}, expected url|header|all", s),
        }
    }
}

/// Connection processing engine.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Independent request/response workers per connection.
    #[default]
    Fast,
    /// One worker per connection, alternating reads to correlate exchanges.
    Pair,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Mode::Fast),
            "pair" => Ok(Mode::Pair),
            _ => bail!("unknown mode {:?}, expected fast|pair", s),
        }
    }
}

/// Runtime options for capture, filtering, and output.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Options {
    /// Output level: url, header, or all.
    pub level: Level,
    /// Connection processing engine: fast or pair.
    pub mode: Mode,
    /// Interface name or pcap file path; `any` captures on every interface.
    pub input: String,
    /// Comma-separated IPs; a packet passes when either endpoint matches.
    pub ip: String,
    /// Comma-separated ports; a packet passes when either endpoint matches.
    pub port: String,
    /// User-supplied BPF expression; suppresses the synthesized ip/port filter.
    pub bpf: String,
    /// Request host wildcard filter.
    pub host: String,
    /// Request URI wildcard filter.
    pub uri: String,
    /// Comma-separated request method filter.
    pub method: String,
    /// Response status set, e.g. `200,400-499`.
    pub status: IntSet,
    /// Capture and print responses.
    pub resp: bool,
    /// Print unknown content types as text.
    pub force: bool,
    /// Render requests as curl commands.
    pub curl: bool,
    /// One JSON object per message instead of text records.
    pub json: bool,
    /// Emit EOF sentinel records.
    pub eof: bool,
    /// Body dump prefix, `prefix` or `prefix:max`.
    pub dump_body: String,
    /// Seconds without traffic before a connection is evicted.
    pub idle: u64,
    /// Stop after this many records; 0 is unlimited.
    pub n: i32,
    /// Output records per second; 0 is unlimited.
    pub rate: f64,
    /// Uniform sampling ratio in `[0, 1]`.
    pub src_ratio: f64,
    /// Segment channel capacity per direction.
    pub chan_size: usize,
    /// Record channel capacity per sink.
    pub out_chan_size: usize,
    /// Output targets: file template, `http[s]://` replay URL, stdout, stderr.
    pub output: Vec<String>,
    /// Serve captured transactions over SSE.
    pub web: bool,
    /// Web server port; 0 picks a free port.
    pub web_port: u16,
    /// Web server context path.
    pub web_context: String,
    /// Replay input: saved record files (glob or directory), with optional
    /// `:tail` / `:poll` suffix.
    pub file: String,
    /// Replay dump verbosity: `req`, `rsp`, or `all`.
    pub verbose: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            level: Level::All,
            mode: Mode::default(),
            input: "any".to_owned(),
            ip: String::new(),
            port: String::new(),
            bpf: String::new(),
            host: String::new(),
            uri: String::new(),
            method: String::new(),
            status: IntSet::default(),
            resp: false,
            force: false,
            curl: false,
            json: false,
            eof: true,
            dump_body: String::new(),
            idle: 240,
            n: 0,
            rate: 0.0,
            src_ratio: 1.0,
            chan_size: 10240,
            out_chan_size: 40960,
            output: Vec::new(),
            web: false,
            web_port: 0,
            web_context: String::new(),
            file: String::new(),
            verbose: String::new(),
        }
    }
}

impl Options {
    /// Parsed IP filter list; invalid entries are rejected.
    pub fn ip_list(&self) -> Result<Vec<IpAddr>> {
        self.ip
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<IpAddr>()
                    .with_context(|| format!("invalid ip filter {:?}", s))
            })
            .collect()
    }

    /// Parsed port filter list.
    pub fn port_list(&self) -> Result<Vec<u16>> {
        self.port
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid port filter {:?}", s))
            })
            .collect()
    }

    /// Splits `dump_body` into prefix and max-file budget. `solr:10` dumps at
    /// most ten bodies with prefix `solr`; a bare `:10` uses prefix `dump`.
    pub fn dump_body_parts(&self) -> (String, u32) {
        match self.dump_body.split_once(':') {
            None => (self.dump_body.clone(), 0),
            Some((prefix, max)) => {
                let max = max.parse().unwrap_or(0);
                let prefix = if prefix.is_empty() { "dump" } else { prefix };
                (prefix.to_owned(), max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.level, Level::All);
        assert_eq!(options.input, "any");
        assert_eq!(options.idle, 240);
        assert_eq!(options.chan_size, 10240);
        assert_eq!(options.out_chan_size, 40960);
        assert!(options.eof);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let options: Options =
            toml::from_str("level = \"header\"\nport = \"80,8080\"\nresp = true\n").unwrap();
        assert_eq!(options.level, Level::Header);
        assert_eq!(options.port_list().unwrap(), vec![80, 8080]);
        assert!(options.resp);
        assert_eq!(options.idle, 240);
    }

    #[test]
    fn dump_body_split() {
        let mut options = Options {
            dump_body: "solr:10".to_owned(),
            ..Default::default()
        };
        assert_eq!(options.dump_body_parts(), ("solr".to_owned(), 10));
        options.dump_body = ":5".to_owned();
        assert_eq!(options.dump_body_parts(), ("dump".to_owned(), 5));
        options.dump_body = "plain".to_owned();
        assert_eq!(options.dump_body_parts(), ("plain".to_owned(), 0));
    }

    #[test]
    fn ip_list_rejects_garbage() {
        let options = Options {
            ip: "10.0.0.1,nonsense".to_owned(),
            ..Default::default()
        };
        assert!(options.ip_list().is_err());
    }
}
