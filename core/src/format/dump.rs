//! Body dump files.

use crate::filter::Policy;
use crate::format::Tag;

use std::fs;
use std::io::{self, Write};

use chrono::{DateTime, Utc};

/// Dump file name: `{prefix}.{YYYYMMDD}.{seq}.{REQ|RSP}`.
pub fn body_file_name(prefix: &str, seq: i32, tag: Tag, t: DateTime<Utc>) -> String {
    format!("{}.{}.{}.{}", prefix, t.format("%Y%m%d"), seq, tag)
}

/// Writes body bytes to `path`, removing the file again if nothing was
/// written. A successful non-empty write draws one unit from the policy's
/// dump budget.
pub fn dump_body(path: &str, data: &[u8], policy: &Policy) -> io::Result<u64> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    if data.is_empty() {
        drop(file);
        let _ = fs::remove_file(path);
    } else {
        policy.record_dump();
    }
    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_shape() {
        let ts = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        assert_eq!(
            body_file_name("solr", 12, Tag::Request, ts),
            "solr.20230405.12.REQ"
        );
        assert_eq!(
            body_file_name("solr", 3, Tag::Response, ts),
            "solr.20230405.3.RSP"
        );
    }

    #[test]
    fn empty_dump_is_removed() {
        let dir = std::env::temp_dir().join("httptap-dump-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.REQ");
        let path = path.to_str().unwrap();

        let policy = Policy {
            dump_body: "x".to_owned(),
            ..Default::default()
        };
        let n = dump_body(path, b"", &policy).unwrap();
        assert_eq!(n, 0);
        assert!(!std::path::Path::new(path).exists());

        let n = dump_body(path, b"data", &policy).unwrap();
        assert_eq!(n, 4);
        assert!(std::path::Path::new(path).exists());
        std::fs::remove_file(path).unwrap();
    }
}
