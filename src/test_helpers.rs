//! Shared fixtures for unit tests: a byte-range serving mock and tarball builders

use crate::config::{Config, Credentials, RetryConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

/// Account used against the mock server
pub(crate) const TEST_ACCOUNT: &str = "devstoreaccount1";

/// Credentials with a valid base64 key
pub(crate) fn test_credentials() -> Credentials {
    use base64::Engine;
    Credentials::new(
        TEST_ACCOUNT,
        base64::engine::general_purpose::STANDARD.encode(b"test-account-key"),
    )
}

/// Config pointing at `endpoint` with small ranges and fast retries
pub(crate) fn test_config(endpoint: &str, build_context_dir: &Path, range_size: u64) -> Config {
    let mut config = Config {
        build_context_dir: build_context_dir.to_path_buf(),
        ..Config::default()
    };
    config.fetch.endpoint = Some(endpoint.parse().expect("mock uri"));
    config.fetch.range_size = range_size;
    config.fetch.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Deterministic pseudo-random payload
pub(crate) fn sample_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

/// Serves `x-ms-range` requests out of an in-memory object.
///
/// Ranges registered with [`RangeResponder::fail_range`] answer 503 for the
/// given number of requests before succeeding.
#[derive(Clone)]
pub(crate) struct RangeResponder {
    data: Arc<Vec<u8>>,
    failures: Arc<Mutex<HashMap<u64, u32>>>,
    failure_status: u16,
    hits: Arc<AtomicU32>,
    ignore_range: bool,
}

impl RangeResponder {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            failures: Arc::new(Mutex::new(HashMap::new())),
            failure_status: 503,
            hits: Arc::new(AtomicU32::new(0)),
            ignore_range: false,
        }
    }

    /// Fail the range starting at `start` for the next `times` requests
    pub(crate) fn fail_range(self, start: u64, times: u32) -> Self {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(start, times);
        self
    }

    /// Status returned for injected failures (default 503)
    pub(crate) fn failure_status(mut self, status: u16) -> Self {
        self.failure_status = status;
        self
    }

    /// Answer every request with 200 and the whole object
    pub(crate) fn ignoring_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    /// Number of requests served so far
    pub(crate) fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

fn parse_range_header(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);

        if self.ignore_range {
            return ResponseTemplate::new(200).set_body_bytes(self.data.as_slice());
        }

        let Some((start, end)) = request
            .headers
            .get("x-ms-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_header)
        else {
            return ResponseTemplate::new(400);
        };

        {
            let mut failures = self.failures.lock().expect("failures lock");
            if let Some(remaining) = failures.get_mut(&start) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return ResponseTemplate::new(self.failure_status)
                        .insert_header("x-ms-error-code", "ServerBusy");
                }
            }
        }

        let total = self.data.len() as u64;
        if start >= total {
            return ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{total}").as_str());
        }
        let end = end.min(total - 1);
        ResponseTemplate::new(206)
            .insert_header(
                "content-range",
                format!("bytes {start}-{end}/{total}").as_str(),
            )
            .set_body_bytes(&self.data[start as usize..=end as usize])
    }
}

/// Entry to place in a test archive
pub(crate) enum TarEntry<'a> {
    Dir(&'a str),
    File(&'a str, &'a [u8], u32),
    Symlink(&'a str, &'a str),
    /// Raw name written without validation (for hostile archives)
    RawFile(&'a str, &'a [u8]),
}

/// Build an uncompressed tar stream from `entries`
pub(crate) fn build_tar(entries: &[TarEntry<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            TarEntry::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .expect("append dir");
            }
            TarEntry::File(path, data, mode) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, path, *data)
                    .expect("append file");
            }
            TarEntry::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder
                    .append_link(&mut header, path, target)
                    .expect("append symlink");
            }
            TarEntry::RawFile(path, data) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                let name = &mut header.as_old_mut().name;
                name[..path.len()].copy_from_slice(path.as_bytes());
                header.set_cksum();
                builder.append(&header, *data).expect("append raw");
            }
        }
    }
    builder.into_inner().expect("finish tar")
}

/// Build a gzip-compressed tar stream from `entries`
pub(crate) fn build_tar_gz(entries: &[TarEntry<'_>]) -> Vec<u8> {
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    let tar_bytes = build_tar(entries);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}
