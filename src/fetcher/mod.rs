//! Remote context acquisition
//!
//! Downloads the context archive from an Azure file share into
//! `<build_context_dir>/<context_tar>`. The first range doubles as a size
//! probe (its `Content-Range` carries the object length); the remaining
//! ranges are fetched concurrently, each with its own retry budget, and
//! written straight to their offsets in the local file.

mod output;
mod ranges;
mod session;

pub use ranges::{ByteRange, split_ranges};
pub use session::{FetchSession, resource_url};

use crate::config::{Config, Credentials};
use crate::error::{ContextError, Error, FetchError, Result, StorageError};
use crate::locator::ContextAddress;
use crate::pipeline::Stage;
use crate::progress::{LogProgress, ProgressObserver, ProgressTracker};
use crate::retry::with_retry;
use futures::{StreamExt, TryStreamExt, stream};
use output::ArchiveFile;
use session::RangeResponse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fetches a context archive from Azure file storage
#[derive(Clone)]
pub struct AzureFileFetcher {
    config: Config,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl AzureFileFetcher {
    /// Create a fetcher that logs cumulative progress via [`LogProgress`]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            observer: Some(Arc::new(LogProgress)),
        }
    }

    /// Report cumulative byte counts to `observer` instead of the log
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The configuration this fetcher runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Download `address` into the build-context directory.
    ///
    /// Returns the build-context directory (not the archive path). On failure
    /// the directory is still reported in [`ContextError::directory`] so the
    /// caller can clean up. Cancelling `cancel` drops every in-flight range.
    pub async fn fetch(
        &self,
        address: &ContextAddress,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> std::result::Result<PathBuf, ContextError> {
        let directory = self.config.build_context_dir.clone();
        match self.fetch_archive(address, credentials, cancel).await {
            Ok(bytes) => {
                info!(
                    path = %self.config.tar_path().display(),
                    bytes,
                    "build context archive downloaded"
                );
                Ok(directory)
            }
            Err(error) => Err(ContextError::new(Stage::Fetching, Some(directory), error)),
        }
    }

    async fn fetch_archive(
        &self,
        address: &ContextAddress,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.config.validate()?;

        let session = FetchSession::new(credentials, address, &self.config.fetch)?;
        info!(
            account = credentials.account(),
            url = %session.url(),
            "fetching build context"
        );

        create_build_context_dir(&self.config.build_context_dir)?;
        let file = ArchiveFile::create(&self.config.tar_path())?;

        let transfer = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Fetch(FetchError::Cancelled)),
                result = self.transfer(&session, &file) => result,
            }
        };
        let bytes = match self.config.fetch.timeout {
            Some(limit) => tokio::time::timeout(limit, transfer).await.map_err(|_| {
                FetchError::TimedOut {
                    seconds: limit.as_secs(),
                }
            })??,
            None => transfer.await?,
        };

        file.sync()?;
        Ok(bytes)
    }

    async fn transfer(&self, session: &FetchSession, file: &ArchiveFile) -> Result<u64> {
        let fetch = &self.config.fetch;
        let progress = ProgressTracker::new(self.observer.clone());

        let probe_range = ByteRange::with_len(0, fetch.range_size);
        let probe = with_retry(&fetch.retry, || get_checked(session, probe_range)).await?;
        let total = probe.total_size;
        debug!(total, whole_object = probe.whole_object, "size probe complete");

        file.preallocate(total)?;
        if !probe.body.is_empty() {
            file.write_at(0, &probe.body)?;
            progress.add(probe.body.len() as u64);
        }
        if probe.whole_object {
            return Ok(progress.total());
        }

        let remaining = split_ranges(probe.body.len() as u64, total, fetch.range_size);
        stream::iter(remaining)
            .map(|range| self.transfer_range(session, file, range, &progress))
            .buffer_unordered(fetch.parallelism)
            .try_collect::<Vec<()>>()
            .await?;

        Ok(progress.total())
    }

    async fn transfer_range(
        &self,
        session: &FetchSession,
        file: &ArchiveFile,
        range: ByteRange,
        progress: &ProgressTracker,
    ) -> Result<()> {
        debug!(range_start = range.start, range_end = range.end, "fetching range");
        let response = with_retry(&self.config.fetch.retry, || async move {
            let response = get_checked(session, range).await?;
            if response.whole_object || response.total_size <= range.end {
                // The object changed size or the server stopped honouring ranges mid-transfer
                return Err(session.invalid_content_range(None));
            }
            Ok::<_, FetchError>(response)
        })
        .await?;

        file.write_at(range.start, &response.body)?;
        progress.add(range.len());
        Ok(())
    }
}

impl std::fmt::Debug for AzureFileFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureFileFetcher")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// GET `range` and verify the body length matches what the server promised
async fn get_checked(
    session: &FetchSession,
    range: ByteRange,
) -> std::result::Result<RangeResponse, FetchError> {
    let response = session.get_range(range).await?;
    let expected = if response.whole_object {
        response.total_size
    } else {
        range.clamp(response.total_size).map_or(0, |r| r.len())
    };
    let received = response.body.len() as u64;
    if received != expected {
        return Err(FetchError::ShortRead {
            offset: range.start,
            expected,
            received,
        });
    }
    Ok(response)
}

/// Create the build-context directory (mode 0750 on Unix); succeeds if it exists
fn create_build_context_dir(path: &Path) -> std::result::Result<(), StorageError> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder
        .create(path)
        .map_err(|source| StorageError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}
