//! Archive builders, a byte-range mock and pipeline setup helpers

use base64::Engine;
use build_context::{AzureFileContext, Config, Credentials, RetryConfig};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Storage account used against the mock server
pub const ACCOUNT: &str = "devstoreaccount1";

/// Credentials with a base64-encoded key
pub fn credentials() -> Credentials {
    Credentials::new(
        ACCOUNT,
        base64::engine::general_purpose::STANDARD.encode(b"integration-key"),
    )
}

/// Config pointing at the mock server with small ranges and fast retries
pub fn config_for(server: &MockServer, build_context_dir: &Path, range_size: u64) -> Config {
    let mut config = Config {
        build_context_dir: build_context_dir.to_path_buf(),
        ..Config::default()
    };
    config.fetch.endpoint = Some(server.uri().parse().expect("mock uri"));
    config.fetch.range_size = range_size;
    config.fetch.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Pipeline for `context` against the mock server
pub fn source_for(
    server: &MockServer,
    context: &str,
    build_context_dir: &Path,
    range_size: u64,
) -> AzureFileContext {
    AzureFileContext::new(
        context,
        credentials(),
        config_for(server, build_context_dir, range_size),
    )
}

/// Contents of a test archive entry
pub enum Entry<'a> {
    /// Directory
    Dir(&'a str),
    /// Regular file with mode
    File(&'a str, &'a [u8], u32),
    /// Symbolic link to a target
    Symlink(&'a str, &'a str),
}

/// Build a gzip-compressed tarball from `entries`
pub fn tar_gz(entries: &[Entry<'_>]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            Entry::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .expect("append dir");
            }
            Entry::File(path, data, mode) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, path, *data)
                    .expect("append file");
            }
            Entry::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder
                    .append_link(&mut header, path, target)
                    .expect("append symlink");
            }
        }
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

/// Serves `x-ms-range` requests from an in-memory object
#[derive(Clone)]
pub struct ObjectResponder {
    data: Arc<Vec<u8>>,
    hits: Arc<AtomicU32>,
}

impl ObjectResponder {
    /// Number of requests served
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Respond for ObjectResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if !request.headers.contains_key("authorization") {
            return ResponseTemplate::new(403);
        }
        let range = request
            .headers
            .get("x-ms-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<u64>().ok()?, e.parse::<u64>().ok()?)));
        let Some((start, end)) = range else {
            return ResponseTemplate::new(400);
        };

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

/// Serve `data` at `item_path`, replacing any earlier object
pub async fn serve_object(server: &MockServer, item_path: &str, data: Vec<u8>) -> ObjectResponder {
    server.reset().await;
    let responder = ObjectResponder {
        data: Arc::new(data),
        hits: Arc::new(AtomicU32::new(0)),
    };
    Mock::given(method("GET"))
        .and(path(item_path))
        .respond_with(responder.clone())
        .mount(server)
        .await;
    responder
}

/// Relative paths of everything under `root`, sorted, excluding `skip`
pub fn tree(root: &Path, skip: &str) -> Vec<String> {
    let mut paths: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .into_owned()
        })
        .filter(|p| p != skip)
        .collect();
    paths.sort();
    paths
}
