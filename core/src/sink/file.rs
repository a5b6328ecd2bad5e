//! Rotating file writer.
//!
//! Output paths are templates: the date placeholders `yyyy`, `MM`, `dd`, `hh`,
//! and `mm` are expanded at write time (date parts case-insensitive; `MM` is
//! month, `mm` minute). Rotated files get a 5-digit `_NNNNN` suffix, 1-based;
//! the next index is one greater than the largest already on disk. A `:append`
//! suffix on the output spec keeps appending to the current file instead of
//! rotating on open; `:NNNm` / `:NNNg` suffixes set a size budget that forces
//! rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::Local;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SIZE_SUFFIX: Regex = Regex::new(r"^(\d+)([mMgG])$").unwrap();
    static ref INDEX_SUFFIX: Regex = Regex::new(r"_(\d{5,})").unwrap();
    static ref INDEX_MIDDLE: Regex = Regex::new(r"^_\d{5,}$").unwrap();
    static ref TPL_YEAR: Regex = Regex::new("(?i)yyyy").unwrap();
    static ref TPL_MONTH: Regex = Regex::new("MM").unwrap();
    static ref TPL_DAY: Regex = Regex::new("(?i)dd").unwrap();
    static ref TPL_HOUR: Regex = Regex::new("(?i)hh").unwrap();
    static ref TPL_MINUTE: Regex = Regex::new("mm").unwrap();
}

/// Splits an output spec into path template, size budget, and append flag.
pub fn parse_output_spec(spec: &str) -> (String, u64, bool) {
    let mut path = spec.to_owned();
    let mut max_size = 0u64;
    let mut append = false;

    while let Some((rest, token)) = path.rsplit_once(':') {
        if token == "append" {
            append = true;
            path = rest.to_owned();
        } else if let Some(caps) = SIZE_SUFFIX.captures(token) {
            let n: u64 = caps[1].parse().unwrap_or(0);
            max_size = match &caps[2] {
                "m" | "M" => n * 1024 * 1024,
                _ => n * 1024 * 1024 * 1024,
            };
            path = rest.to_owned();
        } else {
            break;
        }
    }
    (path, max_size, append)
}

/// Expands date placeholders in a filename template against the current time.
pub fn expand_template(template: &str) -> String {
    let now = Local::now();
    let s = TPL_YEAR.replace_all(template, now.format("%Y").to_string());
    let s = TPL_MONTH.replace_all(&s, now.format("%m").to_string());
    let s = TPL_DAY.replace_all(&s, now.format("%d").to_string());
    let s = TPL_HOUR.replace_all(&s, now.format("%H").to_string());
    TPL_MINUTE
        .replace_all(&s, now.format("%M").to_string())
        .into_owned()
}

/// Splits `path` into (base, index, extension) where index is the trailing
/// `_NNNNN` rotation suffix, if any.
pub fn split_base_index_ext(path: &str) -> (String, Option<u32>, String) {
    if let Some(m) = INDEX_SUFFIX.find_iter(path).last() {
        let base = path[..m.start()].to_owned();
        let index = path[m.start() + 1..m.end()].parse().ok();
        let ext = path[m.end()..].to_owned();
        return (base, index, ext);
    }
    let ext = Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let base = path.strip_suffix(&ext).unwrap_or(path).to_owned();
    (base, None, ext)
}

/// Returns `path` rewritten to carry rotation index `index`.
pub fn set_file_index(path: &str, index: u32) -> String {
    let (base, _, ext) = split_base_index_ext(path);
    format!("{}_{:05}{}", base, index, ext)
}

/// Rotation index of `path`; -1 when it has none.
pub fn get_file_index(path: &str) -> i64 {
    match split_base_index_ext(path).1 {
        Some(index) => index as i64,
        None => -1,
    }
}

/// Finds the largest rotation index among files matching `path`'s base and
/// extension. Returns `(0, path)` when no file matches, and the max index with
/// its filename otherwise (an un-indexed match counts as index 0).
pub fn find_max_file_index(path: &str) -> (u32, String) {
    let (base, _, ext) = split_base_index_ext(path);
    let base_path = Path::new(&base);
    let dir = match base_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let stem = base_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut max_index = 0u32;
    let mut max_fn = path.to_owned();
    let mut found = false;
    if let Ok(entries) = fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&stem)
                || !name.ends_with(ext.as_str())
                || name.len() < stem.len() + ext.len()
            {
                continue;
            }
            let full = dir.join(&name).to_string_lossy().into_owned();
            // ignore unrelated files sharing the prefix
            let middle = &name[stem.len()..name.len() - ext.len()];
            if !middle.is_empty() && !INDEX_MIDDLE.is_match(middle) {
                continue;
            }
            found = true;
            let index = get_file_index(&full).max(0) as u32;
            if index >= max_index {
                max_index = index;
                max_fn = full;
            }
        }
    }
    if !found {
        return (0, path.to_owned());
    }
    (max_index, max_fn)
}

/// A size- and date-rotating file writer.
pub struct RotateWriter {
    template: String,
    max_size: u64,
    append: bool,

    file: Option<BufWriter<File>>,
    current_base: String,
    current_fn: String,
    current_size: u64,
}

impl RotateWriter {
    pub fn new(template: &str, max_size: u64, append: bool) -> Self {
        RotateWriter {
            template: template.to_owned(),
            max_size,
            append,
            file: None,
            current_base: String::new(),
            current_fn: String::new(),
            current_size: 0,
        }
    }

    fn over_budget(&self) -> bool {
        self.max_size > 0 && self.current_size >= self.max_size
    }

    fn open(&mut self, path: &str) -> io::Result<()> {
        self.close_current();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_fn = path.to_owned();
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    /// Opens the newest file for the expanded template, rotating away from
    /// existing content unless append mode is on.
    fn open_base(&mut self, base: String) -> io::Result<()> {
        let (max_index, max_fn) = find_max_file_index(&base);
        self.current_base = base;
        self.open(&max_fn)?;
        if self.current_size > 0 && (!self.append || self.over_budget()) {
            self.rotate(max_index)?;
        }
        Ok(())
    }

    /// Moves on to the next rotation index. The very first rotation renames the
    /// un-indexed current file to index 1 so indices stay contiguous.
    fn rotate(&mut self, max_index: u32) -> io::Result<()> {
        let next = if max_index == 0 {
            let renamed = set_file_index(&self.current_base, 1);
            self.close_current();
            if Path::new(&self.current_base).exists() {
                fs::rename(&self.current_base, &renamed)?;
            }
            2
        } else {
            max_index + 1
        };
        let next_fn = set_file_index(&self.current_base, next);
        self.open(&next_fn)
    }

    fn close_current(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
            log::info!("close file {}", self.current_fn);
        }
    }
}

impl Write for RotateWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let base = expand_template(&self.template);
        if self.file.is_none() || base != self.current_base {
            self.open_base(base)?;
        } else if self.over_budget() {
            let (max_index, _) = find_max_file_index(&self.current_base);
            self.rotate(max_index)?;
        }

        let file = self.file.as_mut().expect("file opened above");
        let n = file.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for RotateWriter {
    fn drop(&mut self) {
        self.close_current();
    }
}
