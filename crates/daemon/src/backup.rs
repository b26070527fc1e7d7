use std::path::{Component, Path, PathBuf};
use log::{debug, info, warn};
use thiserror::Error;
use crate::config::BackupConfig;
use crate::tools::{run_tool, spawn_tool, RunningTool, ToolError, ToolLocations};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{file} is not under backup root {root}")]
    OutsideRoot { file: PathBuf, root: PathBuf },
    #[error("failed to prepare backup of {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("split exited with code {code} for {file}")]
    SplitFailed { file: PathBuf, code: i32 },
    #[error("rclone exited with code {code} for {file}")]
    TransferFailed { file: PathBuf, code: i32 },
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Copies library files to the remote, splitting the large ones first
#[derive(Debug, Clone)]
pub struct BackupRunner {
    rclone: PathBuf,
    split: PathBuf,
    remote_path: String,
    working_dir: PathBuf,
    max_size: u64,
    split_size: String,
    rclone_args: Vec<String>,
    split_timeout_secs: Option<u64>,
}

impl BackupRunner {
    pub fn new(tools: &ToolLocations, cfg: &BackupConfig, working_dir: &Path) -> Self {
        Self {
            rclone: tools.rclone.clone(),
            split: tools.split.clone(),
            remote_path: cfg.remote_path.clone(),
            working_dir: working_dir.to_path_buf(),
            max_size: cfg.max_size_bytes(),
            split_size: cfg.split_size.clone(),
            rclone_args: cfg.rclone_args.clone(),
            split_timeout_secs: Some(cfg.split_timeout_secs),
        }
    }

    /// Override the split threshold in bytes
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Remote directory mirroring the file's parent relative to `root`
    pub fn remote_target(&self, root: &Path, file: &Path) -> Result<String, BackupError> {
        let relative = file.strip_prefix(root).map_err(|_| BackupError::OutsideRoot {
            file: file.to_path_buf(),
            root: root.to_path_buf(),
        })?;

        let dirs: Vec<String> = relative
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let base = self.remote_path.trim_end_matches('/');
        if dirs.is_empty() {
            Ok(base.to_string())
        } else {
            Ok(format!("{}/{}", base, dirs.join("/")))
        }
    }

    /// Working directory that receives the chunks of `file`
    pub fn split_dir(&self, file: &Path) -> PathBuf {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.working_dir.join(format!("{}_split", name))
    }

    /// Start the transfer of `file` and return without waiting for it
    ///
    /// Files at or above the size threshold are split first; a failed split
    /// returns an error and no transfer is started.
    pub async fn backup(&self, root: &Path, file: &Path) -> Result<BackupHandle, BackupError> {
        let target = self.remote_target(root, file)?;
        let size = std::fs::metadata(file)
            .map_err(|source| BackupError::Io { path: file.to_path_buf(), source })?
            .len();

        let (source, cleanup_dir) = if size >= self.max_size {
            debug!("{} will be split ({} bytes)", file.display(), size);
            let dir = self.split_file(file).await?;
            (dir.clone(), Some(dir))
        } else {
            (file.to_path_buf(), None)
        };

        let mut args = vec!["copy".to_string(), "--transfers=1".to_string()];
        args.extend(self.rclone_args.iter().cloned());
        args.push(source.to_string_lossy().to_string());
        args.push(target.clone());

        info!("Backing up {} -> {}", source.display(), target);
        let transfer = spawn_tool(&self.rclone, &args)?;

        Ok(BackupHandle {
            file: file.to_path_buf(),
            transfer,
            cleanup_dir,
        })
    }

    async fn split_file(&self, file: &Path) -> Result<PathBuf, BackupError> {
        let dir = self.split_dir(file);
        std::fs::create_dir_all(&dir).map_err(|source| BackupError::Io { path: dir.clone(), source })?;

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let prefix = dir.join(format!("{}.", name));

        let args = vec![
            "-d".to_string(),
            "-a".to_string(),
            "2".to_string(),
            "-b".to_string(),
            self.split_size.clone(),
            file.to_string_lossy().to_string(),
            prefix.to_string_lossy().to_string(),
        ];
        let result = run_tool(&self.split, &args, self.split_timeout_secs).await?;
        if !result.success() {
            return Err(BackupError::SplitFailed {
                file: file.to_path_buf(),
                code: result.code(),
            });
        }

        Ok(dir)
    }
}

/// An in-flight transfer started by [`BackupRunner::backup`]
pub struct BackupHandle {
    file: PathBuf,
    transfer: RunningTool,
    cleanup_dir: Option<PathBuf>,
}

impl BackupHandle {
    /// Split directory to delete once the transfer succeeds
    pub fn cleanup_dir(&self) -> Option<&Path> {
        self.cleanup_dir.as_deref()
    }

    /// Wait for the transfer; on success the split directory is removed, on failure it is kept
    pub async fn join(self) -> Result<(), BackupError> {
        debug!("Waiting for backup of {}...", self.file.display());
        let result = self.transfer.wait(None).await?;

        if !result.success() {
            return Err(BackupError::TransferFailed {
                file: self.file,
                code: result.code(),
            });
        }

        info!("Backup succeeded for {}", self.file.display());
        if let Some(dir) = &self.cleanup_dir {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    warn!("Failed to remove split directory {}: {}", dir.display(), e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(working: &Path) -> BackupRunner {
        let tools = ToolLocations {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            rclone: PathBuf::from("rclone"),
            split: PathBuf::from("split"),
            nice: None,
        };
        let cfg = BackupConfig {
            remote_path: "gdrive:backup/".to_string(),
            ..Default::default()
        };
        BackupRunner::new(&tools, &cfg, working)
    }

    #[test]
    fn test_remote_target_mirrors_parent_dirs() {
        let r = runner(Path::new("/work"));
        let target = r.remote_target(Path::new("/rips/tv"), Path::new("/rips/tv/Show/Season 1/Show - S01E01.mkv")).unwrap();
        assert_eq!(target, "gdrive:backup/Show/Season 1");

        let top = r.remote_target(Path::new("/rips/movies"), Path::new("/rips/movies/Alien (1979).mkv")).unwrap();
        assert_eq!(top, "gdrive:backup");
    }

    #[test]
    fn test_remote_target_strips_prefix_only_once() {
        let r = runner(Path::new("/work"));
        let target = r
            .remote_target(Path::new("/data/rips"), Path::new("/data/rips/tv/data/rips/Show/x.mkv"))
            .unwrap();
        assert_eq!(target, "gdrive:backup/tv/data/rips/Show");
    }

    #[test]
    fn test_remote_target_rejects_outside_root() {
        let r = runner(Path::new("/work"));
        let err = r.remote_target(Path::new("/rips/tv"), Path::new("/rips/tvshows/a.mkv")).unwrap_err();
        assert!(matches!(err, BackupError::OutsideRoot { .. }));
    }

    #[test]
    fn test_split_dir_named_after_file() {
        let r = runner(Path::new("/work"));
        assert_eq!(r.split_dir(Path::new("/rips/movies/Alien (1979).mkv")), PathBuf::from("/work/Alien (1979).mkv_split"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::FakeTools;

        const MAX_SIZE: u64 = 64;

        fn setup(size: u64) -> (FakeTools, BackupRunner, PathBuf, PathBuf) {
            let fake = FakeTools::new();
            let root = fake.dir.path().join("rips");
            let file = root.join("Alien (1979)").join("Alien (1979).mkv");
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, vec![0u8; size as usize]).unwrap();

            let cfg = BackupConfig {
                remote_path: "remote:rips".to_string(),
                split_size: "16".to_string(),
                ..Default::default()
            };
            let runner = BackupRunner::new(&fake.tools, &cfg, &fake.dir.path().join("work")).with_max_size(MAX_SIZE);
            (fake, runner, root, file)
        }

        #[tokio::test]
        async fn test_small_file_copied_directly() {
            let (fake, runner, root, file) = setup(MAX_SIZE - 1);

            let handle = runner.backup(&root, &file).await.unwrap();
            assert!(handle.cleanup_dir().is_none());
            handle.join().await.unwrap();

            assert!(fake.invocations("split").is_empty());
            let copies = fake.invocations("rclone");
            assert_eq!(copies.len(), 1);
            assert_eq!(
                copies[0],
                format!("copy --transfers=1 --timeout=4h0m0s {} remote:rips/Alien (1979)", file.display())
            );
        }

        #[tokio::test]
        async fn test_large_file_split_then_directory_copied() {
            let (fake, runner, root, file) = setup(MAX_SIZE);
            let split_dir = runner.split_dir(&file);

            let handle = runner.backup(&root, &file).await.unwrap();
            assert_eq!(handle.cleanup_dir(), Some(split_dir.as_path()));
            assert!(split_dir.join("Alien (1979).mkv.00").exists());

            let splits = fake.invocations("split");
            assert_eq!(splits.len(), 1);
            assert_eq!(
                splits[0],
                format!("-d -a 2 -b 16 {} {}/Alien (1979).mkv.", file.display(), split_dir.display())
            );
            handle.join().await.unwrap();
            assert!(!split_dir.exists());

            let copies = fake.invocations("rclone");
            assert!(copies[0].ends_with(&format!(" {} remote:rips/Alien (1979)", split_dir.display())));
        }

        #[tokio::test]
        async fn test_failed_split_starts_no_transfer() {
            let (fake, runner, root, file) = setup(MAX_SIZE * 2);
            fake.set_exit_code("split", 1);

            let err = runner.backup(&root, &file).await.err().unwrap();
            assert!(matches!(err, BackupError::SplitFailed { code: 1, .. }));
            assert!(fake.invocations("rclone").is_empty());
        }

        #[tokio::test]
        async fn test_failed_transfer_keeps_split_dir() {
            let (fake, runner, root, file) = setup(MAX_SIZE);
            fake.set_exit_code("rclone", 5);

            let handle = runner.backup(&root, &file).await.unwrap();
            let split_dir = handle.cleanup_dir().unwrap().to_path_buf();
            let err = handle.join().await.unwrap_err();

            assert!(matches!(err, BackupError::TransferFailed { code: 5, .. }));
            assert!(split_dir.exists());
        }

        #[tokio::test]
        async fn test_hung_split_times_out_without_transfer() {
            let (fake, mut runner, root, file) = setup(MAX_SIZE);
            runner.split_timeout_secs = Some(1);
            fake.set_delay("split", 10);

            let started = std::time::Instant::now();
            let err = runner.backup(&root, &file).await.err().unwrap();
            assert!(matches!(err, BackupError::Tool(ToolError::TimedOut { secs: 1, .. })), "unexpected error: {}", err);
            assert!(started.elapsed() < std::time::Duration::from_secs(5));
            assert!(fake.invocations("rclone").is_empty());
        }
    }
}
