//! # build-context
//!
//! Fetches a compressed build context from Azure file storage and unpacks it
//! into a local build-context directory.
//!
//! The pipeline runs three stages in order:
//! - **Locate** - split a `<share>/<path>` address into container and item
//! - **Fetch** - download the archive with signed, parallel, retried byte ranges
//! - **Materialize** - unpack the tarball, refusing entries that escape the destination
//!
//! ## Quick Start
//!
//! ```no_run
//! use build_context::{AzureFileContext, BuildContextSource, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads AZURE_STORAGE_ACCOUNT and AZURE_STORAGE_ACCOUNT_KEY
//!     let source = AzureFileContext::from_env("contexts/app/context.tar.gz", Config::default())?;
//!
//!     let dir = source
//!         .unpack_tar_from_build_context(CancellationToken::new())
//!         .await?;
//!     println!("build context ready in {}", dir.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Azure file download
pub mod fetcher;
/// Context address parsing
pub mod locator;
/// Stage sequencing and the backend trait
pub mod pipeline;
/// Progress reporting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use config::{Config, Credentials, ExtractionConfig, FetchConfig, RetryConfig};
pub use error::{ContextError, Error, ExtractionError, FetchError, Result, StorageError};
pub use extraction::{unpack_archive, unpack_compressed_tar};
pub use fetcher::AzureFileFetcher;
pub use locator::ContextAddress;
pub use pipeline::{AzureFileContext, BuildContextSource, Stage};
pub use progress::{LogProgress, NoopProgress, ProgressObserver};
pub use retry::IsRetryable;
