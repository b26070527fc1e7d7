use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use thiserror::Error;
use std::io::ErrorKind;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use crate::config::ToolsConfig;

/// Executables used by the daemon, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLocations {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub rclone: PathBuf,
    pub split: PathBuf,
    /// Prefix for transcoder runs; None runs ffmpeg at normal priority
    pub nice: Option<PathBuf>,
}

impl ToolLocations {
    /// Resolve configured paths, falling back to a PATH lookup for unset tools
    pub fn resolve(cfg: &ToolsConfig) -> Result<Self> {
        let nice = if cfg.use_nice {
            match locate("nice", cfg.nice.as_deref()) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Running transcoder without nice: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            ffmpeg: locate("ffmpeg", cfg.ffmpeg.as_deref())?,
            ffprobe: locate("ffprobe", cfg.ffprobe.as_deref())?,
            rclone: locate("rclone", cfg.rclone.as_deref())?,
            split: locate("split", cfg.split.as_deref())?,
            nice,
        })
    }

    /// Program and argv for a transcoder run, prefixed with nice when configured
    pub fn transcoder_command(&self, args: Vec<String>) -> (PathBuf, Vec<String>) {
        match &self.nice {
            Some(nice) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(self.ffmpeg.to_string_lossy().to_string());
                full.extend(args);
                (nice.clone(), full)
            }
            None => (self.ffmpeg.clone(), args),
        }
    }
}

fn locate(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => bail!("Configured {} does not exist: {}", name, path.display()),
        None => find_on_path(name).with_context(|| format!("{} not found on PATH", name)),
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {secs} seconds and was killed")]
    TimedOut { program: String, secs: u64 },
}

/// Exit status and interleaved stdout/stderr of a finished tool
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code with signal termination reported as -1
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

/// A spawned tool whose output is drained in the background until it is joined
pub struct RunningTool {
    program: String,
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
}

/// Start a tool without waiting for it
///
/// Both pipes are drained by background tasks so a chatty process cannot stall
/// on a full pipe while the caller is busy elsewhere. Each line is logged at debug.
pub fn spawn_tool(program: &Path, args: &[String]) -> Result<RunningTool, ToolError> {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string());

    debug!("Executing: {} {}", program.display(), args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn { program: name.clone(), source })?;

    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(name.clone(), stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(name.clone(), stderr, tx);
    }

    Ok(RunningTool { program: name, child, lines: rx })
}

/// Consecutive read errors tolerated before an output pipe is abandoned
const MAX_FAILED_READS: u32 = 16;

/// Drain `pipe` to EOF; the read end must stay open while the tool runs or it gets SIGPIPE
fn forward_lines<R>(program: String, pipe: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        let mut failed_reads = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    failed_reads = 0;
                    let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                    debug!("[{}] {}", program, line);
                    // receiver gone after a timeout; keep reading anyway
                    let _ = tx.send(line);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed reading output of {}: {}", program, e);
                    failed_reads += 1;
                    if failed_reads >= MAX_FAILED_READS {
                        break;
                    }
                }
            }
        }
    });
}

impl RunningTool {
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for the tool to exit, killing it once `timeout_secs` elapses
    pub async fn wait(mut self, timeout_secs: Option<u64>) -> Result<ToolOutput, ToolError> {
        let status = match timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), self.child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(e) = self.child.kill().await {
                        warn!("Failed to kill stuck {}: {}", self.program, e);
                    }
                    return Err(ToolError::TimedOut { program: self.program, secs });
                }
            },
            None => self.child.wait().await,
        }
        .map_err(|source| ToolError::Wait { program: self.program.clone(), source })?;

        let mut output = Vec::new();
        while let Some(line) = self.lines.recv().await {
            output.push(line);
        }

        Ok(ToolOutput {
            exit_code: status.code(),
            output: output.join("\n"),
        })
    }
}

/// Run a tool to completion
pub async fn run_tool(program: &Path, args: &[String], timeout_secs: Option<u64>) -> Result<ToolOutput, ToolError> {
    spawn_tool(program, args)?.wait(timeout_secs).await
}
