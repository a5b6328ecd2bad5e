//! Replay captured requests against a live upstream.
//!
//! Records sent to this sink are parsed back into HTTP requests and forwarded
//! to the configured base URL. Unlike the file sinks this sink never discards:
//! a full queue blocks the producer. Saved record files can also be fed in
//! directly (`-f`), with optional polling follow.

use crate::filter::pattern::wildcard_match;
use crate::format::BODILESS_METHODS;
use crate::protocols::stream::http::parser::parse_request;
use crate::runtime::CancelToken;
use crate::sink::Sink;

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Sender};

/// Per-request replay timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Marker header preventing replay loops.
const REPLAY_MARK: &str = "X-Replay-Output";
/// Poll period for file following.
const FOLLOW_PERIOD: Duration = Duration::from_secs(1);

/// Forwards request records to an upstream HTTP endpoint.
pub struct ReplaySink {
    tx: Mutex<Option<Sender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReplaySink {
    /// Builds the client for `addr` (an `http[s]://host[:port]` base) and
    /// spawns the forwarding worker.
    pub fn start(
        addr: &str,
        out_chan_size: usize,
        cancel: CancelToken,
        methods: &str,
        verbose: &str,
    ) -> Result<Self> {
        let client = ReplayClient::new(addr, methods, verbose)?;
        let (tx, rx) = bounded::<String>(out_chan_size);
        let worker = std::thread::Builder::new()
            .name("sink-replay".to_owned())
            .spawn(move || {
                for msg in rx.iter() {
                    if cancel.is_cancelled() {
                        // drain without forwarding during shutdown
                        continue;
                    }
                    for record in split_records(&msg) {
                        client.send_record(record);
                    }
                }
            })
            .expect("spawn replay worker");
        Ok(ReplaySink {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl Sink for ReplaySink {
    fn send(&self, msg: &str, count_discards: bool) {
        // sentinel records are not replayable
        if !count_discards {
            return;
        }
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(msg.to_owned());
        }
    }

    fn close(&self) {
        *self.tx.lock().unwrap() = None;
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

struct ReplayClient {
    agent: ureq::Agent,
    scheme: String,
    authority: String,
    methods: String,
    verbose: String,
}

impl ReplayClient {
    fn new(addr: &str, methods: &str, verbose: &str) -> Result<Self> {
        let (scheme, rest) = match addr.split_once("://") {
            Some((scheme, rest)) if scheme == "http" || scheme == "https" => (scheme, rest),
            _ => bail!("replay address must be http(s)://host[:port], got {}", addr),
        };
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            bail!("replay address {} has no host", addr);
        }
        Ok(ReplayClient {
            agent: ureq::AgentBuilder::new().timeout(DEFAULT_TIMEOUT).build(),
            scheme: scheme.to_owned(),
            authority: authority.to_owned(),
            methods: methods.to_owned(),
            verbose: verbose.to_owned(),
        })
    }

    /// Forwards one REQ record; RSP and sentinel records are skipped.
    fn send_record(&self, record: &str) {
        let raw = match extract_request(record) {
            Some(raw) => raw,
            None => return,
        };
        let request = match parse_request(raw.as_bytes()) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("unparsable replay record: {}", err);
                return;
            }
        };

        if request.method == "CONNECT" {
            return;
        }
        if !self.methods.is_empty()
            && !self
                .methods
                .split(',')
                .any(|m| m.trim().eq_ignore_ascii_case(&request.method))
        {
            return;
        }
        if request.headers.get(REPLAY_MARK) == Some("1") {
            return;
        }

        let url = format!("{}://{}{}", self.scheme, self.authority, request.uri);
        let mut req = self.agent.request(&request.method, &url);
        for (name, value) in request.headers.iter() {
            if name.eq_ignore_ascii_case("Host")
                || name.eq_ignore_ascii_case("Content-Length")
                || name.eq_ignore_ascii_case(REPLAY_MARK)
            {
                continue;
            }
            req = req.set(name, value);
        }
        req = req.set(REPLAY_MARK, "1");

        if self.verbose.contains("req") || self.verbose.contains("all") {
            log::info!("replaying {} {}", request.method, url);
        }

        let bodiless = request.body.is_empty()
            && BODILESS_METHODS
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&request.method));
        let result = if bodiless {
            req.call()
        } else {
            req.send_bytes(&request.body)
        };

        match result {
            Ok(rsp) => {
                if self.verbose.contains("rsp") || self.verbose.contains("all") {
                    let status = rsp.status();
                    let body = rsp.into_string().unwrap_or_default();
                    log::info!("replay response {}: {}", status, body);
                }
            }
            Err(err) => log::error!("replay {} {} failed: {}", request.method, url, err),
        }
    }
}

/// Splits record-file text into individual records on `### ` header lines.
/// Text before the first header is treated as one raw record.
pub(crate) fn split_records(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut records = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        // header markers sit at line starts, which are valid char boundaries
        let at_line_start = pos == 0 || bytes[pos - 1] == b'\n';
        if at_line_start && bytes[pos..].starts_with(b"### ") && pos > start {
            if !text[start..pos].trim_matches(['\r', '\n']).is_empty() {
                records.push(&text[start..pos]);
            }
            start = pos;
        }
        pos += 1;
    }
    if start < text.len() && !text[start..].trim().is_empty() {
        records.push(&text[start..]);
    }
    records
}

/// Extracts the raw HTTP request text from one REQ record. Returns `None` for
/// response records and sentinels. Text without a record header is assumed to
/// be a raw request already.
pub(crate) fn extract_request(record: &str) -> Option<&str> {
    let trimmed = record.trim_start_matches(['\r', '\n']);
    if !trimmed.starts_with("###") {
        return Some(trimmed);
    }
    let (header, rest) = trimmed.split_once('\n')?;
    if !header.contains(" REQ ") || header.contains("EOF#") || header.contains("ERR#") {
        return None;
    }
    let rest = rest.trim_start_matches(['\r', '\n']);
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Resolves a `-f` spec into (path pattern, follow).
/// Both `:tail` and `:poll` enable polling follow.
pub fn parse_file_spec(spec: &str) -> (String, bool) {
    let mut path = spec.to_owned();
    let mut follow = false;
    loop {
        if let Some(rest) = path.strip_suffix(":tail") {
            follow = true;
            path = rest.to_owned();
        } else if let Some(rest) = path.strip_suffix(":poll") {
            follow = true;
            path = rest.to_owned();
        } else {
            break;
        }
    }
    (path, follow)
}

fn matching_files(pattern: &str) -> Vec<PathBuf> {
    let path = Path::new(pattern);
    if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        return files;
    }
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name_pattern = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut files: Vec<PathBuf> = fs::read_dir(&dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter(|p| {
                    p.file_name()
                        .map(|n| wildcard_match(&n.to_string_lossy(), &name_pattern))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Reads saved record files and pushes their contents to `sink`, optionally
/// polling for growth and new files until cancelled.
pub fn follow_files(spec: &str, sink: &dyn Sink, cancel: &CancelToken) -> Result<()> {
    let (pattern, follow) = parse_file_spec(spec);
    let mut offsets: HashMap<PathBuf, u64> = HashMap::new();

    let mut pass = |offsets: &mut HashMap<PathBuf, u64>| -> Result<()> {
        for path in matching_files(&pattern) {
            let offset = offsets.entry(path.clone()).or_insert(0);
            let mut file = fs::File::open(&path)
                .with_context(|| format!("open replay input {}", path.display()))?;
            let len = file.metadata()?.len();
            if len <= *offset {
                continue;
            }
            file.seek(SeekFrom::Start(*offset))?;
            let mut text = String::new();
            file.read_to_string(&mut text)?;
            *offset = len;
            for record in split_records(&text) {
                sink.send(record, true);
            }
        }
        Ok(())
    };

    pass(&mut offsets)?;
    if !follow {
        return Ok(());
    }
    while !cancel.is_cancelled() {
        std::thread::sleep(FOLLOW_PERIOD);
        if let Err(err) = pass(&mut offsets) {
            log::error!("replay input: {:#}", err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_RECORDS: &str = "\n### #1 REQ 10.0.0.1:5000-10.0.0.2:80 2023-04-05T06:07:08Z\r\n\
                               GET /a HTTP/1.1\r\nHost: h\r\n\r\n\
                               \n### #1 RSP 10.0.0.1:5000-10.0.0.2:80 2023-04-05T06:07:09Z\r\n\
                               HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";

    #[test]
    fn splits_on_record_headers() {
        let records = split_records(TWO_RECORDS);
        assert_eq!(records.len(), 2);
        assert!(records[0].contains("GET /a"));
        assert!(records[1].contains("200 OK"));
    }

    #[test]
    fn extracts_only_request_records() {
        let records = split_records(TWO_RECORDS);
        let raw = extract_request(records[0]).unwrap();
        assert!(raw.starts_with("GET /a HTTP/1.1"));
        assert_eq!(extract_request(records[1]), None);
        assert_eq!(
            extract_request("\n### EOF#1 REQ 10.0.0.1:5000-10.0.0.2:80 t"),
            None
        );
    }

    #[test]
    fn raw_request_passes_through() {
        let raw = extract_request("GET / HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
        assert!(raw.starts_with("GET / HTTP/1.1"));
    }

    #[test]
    fn file_spec_suffixes() {
        assert_eq!(parse_file_spec("data/*.gor"), ("data/*.gor".into(), false));
        assert_eq!(parse_file_spec("data/:tail"), ("data/".into(), true));
        assert_eq!(parse_file_spec("d.http:poll"), ("d.http".into(), true));
    }

    #[test]
    fn base_url_validation() {
        assert!(ReplayClient::new("http://127.0.0.1:5002", "", "").is_ok());
        assert!(ReplayClient::new("ftp://x", "", "").is_err());
        assert!(ReplayClient::new("http://", "", "").is_err());
    }
}
