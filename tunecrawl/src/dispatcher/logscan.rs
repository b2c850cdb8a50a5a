//! DNS failure detection in appended worker logs.
//!
//! Fetchers log `Failed to resolve '<host>'` when name resolution fails.
//! The scanner tails the fetcher log between scheduler ticks and reports
//! the named hosts so they can be disabled. This is the belt-and-braces
//! fallback behind the fetcher's explicit DNS reporting.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use regex::Regex;

/// Log line signature written by the fetcher on a DNS failure.
const DNS_PATTERN: &str = r"Failed to resolve '([^']+)'";

/// Incremental scanner over the fetcher log file.
pub struct LogScanner {
    path: PathBuf,
    offset: u64,
    pattern: Regex,
}

impl LogScanner {
    /// Creates a scanner over `<log_dir>/fetcher.log`.
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join("fetcher.log"),
            offset: 0,
            pattern: Regex::new(DNS_PATTERN).expect("dns pattern is valid"),
        }
    }

    /// Reads everything appended since the last scan and returns the
    /// hosts named in DNS failure lines. A missing file yields nothing;
    /// a truncated (rotated) file restarts from the top.
    pub fn scan(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            // Rotation.
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let mut appended = String::new();
        file.read_to_string(&mut appended)?;
        self.offset = len;

        Ok(self
            .pattern
            .captures_iter(&appended)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(dir: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("fetcher.log"))
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = LogScanner::new(dir.path());
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn test_extracts_hosts_from_dns_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "INFO fetching http://ok/x\nWARN Failed to resolve 'dead.example'\n",
        );

        let mut scanner = LogScanner::new(dir.path());
        assert_eq!(scanner.scan().unwrap(), vec!["dead.example".to_string()]);
    }

    #[test]
    fn test_scan_is_incremental() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "WARN Failed to resolve 'one.example'\n");

        let mut scanner = LogScanner::new(dir.path());
        assert_eq!(scanner.scan().unwrap().len(), 1);
        assert!(scanner.scan().unwrap().is_empty());

        write_log(dir.path(), "WARN Failed to resolve 'two.example'\n");
        assert_eq!(scanner.scan().unwrap(), vec!["two.example".to_string()]);
    }

    #[test]
    fn test_rotation_restarts_from_top() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "WARN Failed to resolve 'one.example'\nfiller line to make this long\n",
        );
        let mut scanner = LogScanner::new(dir.path());
        scanner.scan().unwrap();

        // Rotate: the file is replaced by a shorter one.
        std::fs::write(
            dir.path().join("fetcher.log"),
            "WARN Failed to resolve 'fresh.example'\n",
        )
        .unwrap();
        assert_eq!(scanner.scan().unwrap(), vec!["fresh.example".to_string()]);
    }
}
