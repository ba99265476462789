//! Configuration types for build-context

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};
use url::Url;

/// Environment variable holding the storage account name
pub const STORAGE_ACCOUNT_ENV: &str = "AZURE_STORAGE_ACCOUNT";

/// Environment variable holding the base64 storage account key
pub const STORAGE_ACCOUNT_KEY_ENV: &str = "AZURE_STORAGE_ACCOUNT_KEY";

/// Main configuration for fetching and unpacking a build context
///
/// Every field has a default, so `Config::default()` reproduces the standard
/// layout (`/kaniko/buildcontext/context.tar.gz`, two parallel ranges, two
/// retries per range).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory the archive is downloaded to and unpacked into (default: "/kaniko/buildcontext")
    #[serde(default = "default_build_context_dir")]
    pub build_context_dir: PathBuf,

    /// File name of the downloaded archive inside `build_context_dir` (default: "context.tar.gz")
    #[serde(default = "default_context_tar")]
    pub context_tar: String,

    /// Remote transfer settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Unpacking settings
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_context_dir: default_build_context_dir(),
            context_tar: default_context_tar(),
            fetch: FetchConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Config {
    /// Path of the local archive file (`<build_context_dir>/<context_tar>`)
    pub fn tar_path(&self) -> PathBuf {
        self.build_context_dir.join(&self.context_tar)
    }

    /// Reject settings the fetcher cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.context_tar.is_empty() || self.context_tar.contains(['/', '\\']) {
            return Err(Error::config(
                "context_tar",
                format!("context_tar must be a plain file name, got {:?}", self.context_tar),
            ));
        }
        if self.fetch.parallelism == 0 {
            return Err(Error::config("fetch.parallelism", "parallelism must be at least 1"));
        }
        if self.fetch.range_size == 0 {
            return Err(Error::config("fetch.range_size", "range_size must be at least 1 byte"));
        }
        if self.fetch.service_domain.is_empty() && self.fetch.endpoint.is_none() {
            return Err(Error::config(
                "fetch.service_domain",
                "service_domain must be set when no endpoint override is given",
            ));
        }
        Ok(())
    }
}

/// Remote transfer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Service domain appended to the account name (default: "file.core.windows.net")
    #[serde(default = "default_service_domain")]
    pub service_domain: String,

    /// Endpoint override (e.g. a storage emulator); replaces `https://{account}.{service_domain}`
    #[serde(default)]
    pub endpoint: Option<Url>,

    /// Storage REST API version sent as `x-ms-version`
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Number of byte ranges transferred concurrently (default: 2)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Size of each byte range in bytes (default: 4 MiB)
    #[serde(default = "default_range_size")]
    pub range_size: u64,

    /// Timeout for a single range request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Deadline for the whole transfer (None = no deadline)
    #[serde(default, with = "optional_duration_serde")]
    pub timeout: Option<Duration>,

    /// Per-range retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            service_domain: default_service_domain(),
            endpoint: None,
            api_version: default_api_version(),
            parallelism: default_parallelism(),
            range_size: default_range_size(),
            request_timeout: default_request_timeout(),
            timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration with exponential backoff
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries per range after the first attempt (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Unpacking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Remove everything in the destination except the archive before unpacking (default: true)
    ///
    /// With this off, entries are overwritten in place and files from a
    /// previous, differently shaped archive survive.
    #[serde(default = "default_true")]
    pub clean_destination: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            clean_destination: true,
        }
    }
}

/// Storage account credentials
///
/// Built once by the host (usually via [`Credentials::from_env`]) and passed
/// explicitly into the fetcher. The key is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account: String,
    key: String,
}

impl Credentials {
    /// Create credentials from an account name and its base64 account key
    pub fn new(account: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
        }
    }

    /// Read credentials from `AZURE_STORAGE_ACCOUNT` and `AZURE_STORAGE_ACCOUNT_KEY`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary variable lookup
    ///
    /// Missing and empty values are both configuration errors naming the variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| match lookup(name) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(Error::config(name, format!("{name} env is empty"))),
            None => Err(Error::config(name, format!("need {name} env"))),
        };
        Ok(Self::new(
            required(STORAGE_ACCOUNT_ENV)?,
            required(STORAGE_ACCOUNT_KEY_ENV)?,
        ))
    }

    /// Storage account name
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64 encoded account key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn default_build_context_dir() -> PathBuf {
    PathBuf::from("/kaniko/buildcontext")
}

fn default_context_tar() -> String {
    "context.tar.gz".to_string()
}

fn default_service_domain() -> String {
    "file.core.windows.net".to_string()
}

fn default_api_version() -> String {
    "2019-12-12".to_string()
}

fn default_parallelism() -> usize {
    2
}

fn default_range_size() -> u64 {
    4 * 1024 * 1024
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
