use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use log::{debug, error, info, warn};
use thiserror::Error;
use crate::backup::{BackupHandle, BackupRunner};
use crate::config::ConvertConfig;
use crate::convert::{ConvertOptions, ConvertOutcome, Transcoder};
use crate::ffprobe;
use crate::scan::{self, LibraryFile};
use crate::status::{ProcessStatus, ProcessedDatabase, StoreError};

/// The two independently tracked units of work per file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Backup,
    Convert,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Backup => f.write_str("backup"),
            Phase::Convert => f.write_str("convert"),
        }
    }
}

/// Why a file was left alone this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidName,
    RecentlyModified,
    /// Modification time could not be read
    Unreadable(String),
    AlreadyProcessed,
    /// Backup done and an output is already in place, so there is nothing left to run
    OutputExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidName => f.write_str("name does not follow the library convention"),
            SkipReason::RecentlyModified => f.write_str("modified too recently"),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
            SkipReason::AlreadyProcessed => f.write_str("already backed up and converted"),
            SkipReason::OutputExists => f.write_str("backed up and output already exists"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("skipped: {0}")]
    Skip(SkipReason),
    /// Status for the phase stays false so the next run retries it
    #[error("{phase} failed: {cause}")]
    RetryableFailure { phase: Phase, cause: String },
    #[error(transparent)]
    Fatal(#[from] StoreError),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Fatal(_))
    }
}

/// Backup + convert for a single file, one file at a time
pub struct Pipeline {
    backup: BackupRunner,
    transcoder: Transcoder,
    interlace_frames: u32,
    recency_grace: Duration,
}

impl Pipeline {
    pub fn new(backup: BackupRunner, transcoder: Transcoder, interlace_frames: u32, recency_grace: Duration) -> Self {
        Self {
            backup,
            transcoder,
            interlace_frames,
            recency_grace,
        }
    }

    /// Naming convention and recency guard
    pub fn check_eligibility(&self, input: &Path, now: SystemTime) -> Result<(), SkipReason> {
        if !scan::has_valid_name(input) {
            return Err(SkipReason::InvalidName);
        }
        match scan::recently_modified(input, now, self.recency_grace) {
            Ok(true) => Err(SkipReason::RecentlyModified),
            Ok(false) => Ok(()),
            Err(e) => Err(SkipReason::Unreadable(format!("{:#}", e))),
        }
    }

    /// Run whatever phases `file` still needs and persist the result
    ///
    /// The backup is started first and joined after the convert finishes, so the
    /// transfer overlaps the encode. Status is saved even when a phase fails.
    pub async fn process_file(
        &self,
        store: &ProcessedDatabase,
        root: &Path,
        file: &LibraryFile,
        config: &ConvertConfig,
        now: SystemTime,
    ) -> Result<ProcessStatus, PipelineError> {
        if let Err(reason) = self.check_eligibility(&file.input, now) {
            match reason {
                SkipReason::InvalidName => warn!("Invalid name, skipping: {}", file.input.display()),
                SkipReason::Unreadable(ref e) => warn!("Skipping {}: {}", file.input.display(), e),
                _ => debug!("Skipping {}: {}", file.input.display(), reason),
            }
            return Err(PipelineError::Skip(reason));
        }

        let mut status = store.get(&file.input, &file.output)?;
        if !status.should_process() {
            debug!("Not processing: {}", file.input.display());
            return Err(PipelineError::Skip(SkipReason::AlreadyProcessed));
        }
        if status.backup && file.output.exists() {
            debug!("Output exists, nothing to do: {}", file.output.display());
            return Err(PipelineError::Skip(SkipReason::OutputExists));
        }

        info!("Starting {} ({:?})", file.input.display(), status.state());
        let failures = self.run_phases(root, file, config, &mut status).await;

        store.save(&status)?;

        match failures.into_iter().next() {
            None => {
                info!("Finished {}", file.input.display());
                Ok(status)
            }
            Some((phase, cause)) => Err(PipelineError::RetryableFailure { phase, cause }),
        }
    }

    async fn run_phases(
        &self,
        root: &Path,
        file: &LibraryFile,
        config: &ConvertConfig,
        status: &mut ProcessStatus,
    ) -> Vec<(Phase, String)> {
        let mut failures = Vec::new();

        let mut backup: Option<BackupHandle> = None;
        if !status.backup {
            match self.backup.backup(root, &file.input).await {
                Ok(handle) => backup = Some(handle),
                Err(e) => {
                    error!("Error backing up {}: {}", file.input.display(), e);
                    failures.push((Phase::Backup, e.to_string()));
                }
            }
        }

        if !status.convert {
            if file.output.exists() {
                info!(
                    "Output exists, skipping: input={}, output={}",
                    file.input.display(),
                    file.output.display()
                );
            } else {
                match self.convert_file(file, config).await {
                    Ok(()) => status.convert = true,
                    Err(cause) => {
                        error!("Error converting {}: {}", file.input.display(), cause);
                        failures.push((Phase::Convert, cause));
                    }
                }
            }
        }

        if let Some(handle) = backup {
            match handle.join().await {
                Ok(()) => status.backup = true,
                Err(e) => {
                    error!("Error backing up {}: {}", file.input.display(), e);
                    failures.push((Phase::Backup, e.to_string()));
                }
            }
        }

        failures
    }

    /// Encode into the temp path and publish it to the output path on success
    async fn convert_file(&self, file: &LibraryFile, config: &ConvertConfig) -> Result<(), String> {
        remove_if_exists(&file.temp);

        let metadata = ffprobe::extract_metadata(
            self.transcoder.tools(),
            &file.input,
            config.deinterlace,
            self.interlace_frames,
            self.transcoder.timeout_secs(),
        )
        .await
        .map_err(|e| format!("{:#}", e))?;

        let outcome = self
            .transcoder
            .convert(&file.input, &file.temp, config, &metadata, &ConvertOptions::default())
            .await;

        match outcome {
            Ok(ConvertOutcome::Converted) => publish(&file.temp, &file.output).map_err(|e| {
                remove_if_exists(&file.temp);
                format!("failed to publish {}: {}", file.output.display(), e)
            }),
            Ok(other) => {
                remove_if_exists(&file.temp);
                Err(format!("transcoder returned code {}", other.exit_code()))
            }
            Err(e) => {
                remove_if_exists(&file.temp);
                Err(e.to_string())
            }
        }
    }
}

/// Move the finished encode into place; never leaves a partial file at `output`
fn publish(temp: &Path, output: &Path) -> std::io::Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(temp, output).is_ok() {
        return Ok(());
    }

    // rename fails across filesystems; stage a copy beside the output instead
    let mut staged = output.as_os_str().to_owned();
    staged.push(".partial");
    let staged = PathBuf::from(staged);
    std::fs::copy(temp, &staged)?;
    std::fs::rename(&staged, output)?;
    std::fs::remove_file(temp)
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
