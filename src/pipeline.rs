//! Locate, fetch and materialize a build context
//!
//! [`AzureFileContext`] drives the three stages strictly in order:
//! `Idle → Locating → Fetching → Materializing → Done`. Any failure moves
//! the pipeline to `Failed` and short-circuits the remaining stages.

use crate::config::{Config, Credentials};
use crate::error::{ContextError, Result};
use crate::extraction::unpack_compressed_tar;
use crate::fetcher::AzureFileFetcher;
use crate::locator::ContextAddress;
use crate::progress::ProgressObserver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Nothing has run yet
    Idle,
    /// Parsing the context address
    Locating,
    /// Downloading the archive
    Fetching,
    /// Unpacking the archive into the build-context directory
    Materializing,
    /// Build context is ready
    Done,
    /// A stage failed (terminal)
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Locating => "locating",
            Stage::Fetching => "fetching",
            Stage::Materializing => "materializing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A backend that can produce an unpacked build context on local disk
#[async_trait]
pub trait BuildContextSource: Send + Sync {
    /// Fetch the context archive and unpack it.
    ///
    /// Returns the build-context directory on success. On failure the error
    /// carries the stage that failed and, when known, the directory holding
    /// partial artifacts.
    async fn unpack_tar_from_build_context(
        &self,
        cancel: CancellationToken,
    ) -> std::result::Result<PathBuf, ContextError>;
}

/// Build context stored as a `<share>/<path>` item in Azure file storage
pub struct AzureFileContext {
    context: String,
    credentials: Credentials,
    fetcher: AzureFileFetcher,
    stage: watch::Sender<Stage>,
}

impl AzureFileContext {
    /// Create a source for `context` with explicit credentials
    pub fn new(context: impl Into<String>, credentials: Credentials, config: Config) -> Self {
        let (stage, _) = watch::channel(Stage::Idle);
        Self {
            context: context.into(),
            credentials,
            fetcher: AzureFileFetcher::new(config),
            stage,
        }
    }

    /// Create a source reading credentials from the process environment.
    ///
    /// Fails immediately if either credential variable is missing.
    pub fn from_env(context: impl Into<String>, config: Config) -> Result<Self> {
        let credentials = Credentials::from_env()?;
        Ok(Self::new(context, credentials, config))
    }

    /// Report download progress to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.fetcher = self.fetcher.with_observer(observer);
        self
    }

    /// The raw context address
    pub fn context(&self) -> &str {
        &self.context
    }

    /// The stage the pipeline is currently in
    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Watch stage transitions
    pub fn subscribe(&self) -> watch::Receiver<Stage> {
        self.stage.subscribe()
    }

    fn enter(&self, stage: Stage) {
        info!(context = %self.context, %stage, "build context stage");
        self.stage.send_replace(stage);
    }

    fn fail(&self, err: ContextError) -> ContextError {
        error!(context = %self.context, stage = %err.stage, error = %err, "build context failed");
        self.stage.send_replace(Stage::Failed);
        err
    }

    async fn run(&self, cancel: CancellationToken) -> std::result::Result<PathBuf, ContextError> {
        let config = self.fetcher.config();

        self.enter(Stage::Locating);
        let address = ContextAddress::parse(&self.context)
            .map_err(|e| ContextError::new(Stage::Locating, None, e))?;

        self.enter(Stage::Fetching);
        let directory = self
            .fetcher
            .fetch(&address, &self.credentials, &cancel)
            .await?;

        self.enter(Stage::Materializing);
        let extracted = unpack_compressed_tar(&config.tar_path(), &directory, &config.extraction)
            .await
            .map_err(|e| ContextError::new(Stage::Materializing, Some(directory.clone()), e))?;

        info!(
            directory = %directory.display(),
            entries = extracted.len(),
            "build context ready"
        );
        self.enter(Stage::Done);
        Ok(directory)
    }
}

#[async_trait]
impl BuildContextSource for AzureFileContext {
    async fn unpack_tar_from_build_context(
        &self,
        cancel: CancellationToken,
    ) -> std::result::Result<PathBuf, ContextError> {
        self.run(cancel).await.map_err(|e| self.fail(e))
    }
}

impl fmt::Debug for AzureFileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureFileContext")
            .field("context", &self.context)
            .field("credentials", &self.credentials)
            .field("fetcher", &self.fetcher)
            .field("stage", &self.stage())
            .finish()
    }
}
