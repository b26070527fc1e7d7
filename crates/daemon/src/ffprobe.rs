use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use serde::Deserialize;
use tokio::time::{timeout, Duration};
use crate::metadata::{InterlaceGroup, InterlaceReport, Metadata, Stream, StreamKind};
use crate::tools::{run_tool, ToolLocations};

static IDET_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Single|Multi)[\w\s]+: TFF:\s+(\d+) BFF:\s+(\d+) Progressive:\s+(\d+) Undetermined:\s+(\d+)")
        .expect("invalid idet regex")
});

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    #[serde(rename = "format_name")]
    pub format_name: String,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: u32,
    #[serde(rename = "codec_type")]
    pub codec_type: Option<String>,
    #[serde(rename = "codec_name")]
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
    pub duration: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

impl FFProbeStream {
    /// Stream duration in seconds, falling back to Matroska `DURATION*` tags
    pub fn duration_secs(&self) -> Option<f64> {
        if let Some(d) = self.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
            return Some(d);
        }
        self.tags
            .as_ref()?
            .iter()
            .filter(|(k, _)| k.starts_with("DURATION"))
            .find_map(|(_, v)| parse_clock_duration(v))
    }
}

/// Parse `HH:MM:SS(.fraction)` into seconds
fn parse_clock_duration(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

impl FFProbeData {
    pub fn into_metadata(self, file: &Path) -> Metadata {
        let streams = self
            .streams
            .into_iter()
            .map(|s| {
                let duration = s.duration_secs();
                Stream {
                    index: s.index,
                    kind: StreamKind::from_codec_type(s.codec_type.as_deref()),
                    codec: s.codec_name,
                    width: s.width,
                    height: s.height,
                    channels: s.channels,
                    duration,
                    tags: s.tags.unwrap_or_default(),
                }
            })
            .collect();

        Metadata::new(
            file.to_path_buf(),
            self.format.format_name,
            self.format.tags.unwrap_or_default(),
            streams,
        )
    }
}

/// Run ffprobe and parse the JSON output; a probe still running after `timeout_secs` is killed
pub async fn probe_file(tools: &ToolLocations, file_path: &Path, timeout_secs: Option<u64>) -> Result<FFProbeData> {
    if !file_path.is_file() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_streams".to_string(),
        "-show_format".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        file_path.to_string_lossy().to_string(),
    ];

    let mut command = tokio::process::Command::new(&tools.ffprobe);
    command.args(&args).kill_on_drop(true);
    let probe = command.output();
    let output = match timeout_secs {
        Some(secs) => match timeout(Duration::from_secs(secs), probe).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("ffprobe timed out after {} seconds for {}", secs, file_path.display()),
        },
        None => probe.await,
    }
    .with_context(|| format!("Failed to execute ffprobe for: {}", file_path.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            output.status.code().unwrap_or(-1),
            file_path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let json_str = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    serde_json::from_str(&json_str)
        .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
}

/// Parse the idet filter's summary lines
pub fn parse_idet_output(output: &str) -> Result<InterlaceReport> {
    let mut single = None;
    let mut multi = None;

    for caps in output.lines().filter_map(|line| IDET_SUMMARY_RE.captures(line)) {
        let count = |i: usize| caps[i].parse::<u64>().context("idet frame count out of range");
        let group = InterlaceGroup {
            tff: count(2)?,
            bff: count(3)?,
            progressive: count(4)?,
            undetermined: count(5)?,
        };
        if &caps[1] == "Single" {
            single = Some(group);
        } else {
            multi = Some(group);
        }
    }

    match (single, multi) {
        (Some(single), Some(multi)) => Ok(InterlaceReport { single, multi }),
        _ => anyhow::bail!("idet summary not found in ffmpeg output"),
    }
}

/// Sample `frames` frames through ffmpeg's idet filter
pub async fn detect_interlace(
    tools: &ToolLocations,
    file_path: &Path,
    frames: u32,
    timeout_secs: Option<u64>,
) -> Result<InterlaceReport> {
    let args = vec![
        "-i".to_string(),
        file_path.to_string_lossy().to_string(),
        "-filter:v".to_string(),
        "idet".to_string(),
        "-frames:v".to_string(),
        frames.to_string(),
        "-an".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-y".to_string(),
        "/dev/null".to_string(),
    ];
    let (program, args) = tools.transcoder_command(args);

    let result = run_tool(&program, &args, timeout_secs)
        .await
        .with_context(|| format!("Interlace detection failed for {}", file_path.display()))?;
    if !result.success() {
        anyhow::bail!(
            "Interlace detection exited with code {} for {}",
            result.code(),
            file_path.display()
        );
    }

    parse_idet_output(&result.output)
}

/// Probe a file and, when asked, attach an interlace report
pub async fn extract_metadata(
    tools: &ToolLocations,
    file_path: &Path,
    detect_interlacing: bool,
    interlace_frames: u32,
    timeout_secs: Option<u64>,
) -> Result<Metadata> {
    let data = probe_file(tools, file_path, timeout_secs).await?;
    let mut metadata = data.into_metadata(file_path);
    debug!(
        "Probed {}: {} streams, resolution {:?}, duration {:?}",
        file_path.display(),
        metadata.streams.len(),
        metadata.resolution,
        metadata.estimated_duration
    );

    if detect_interlacing {
        let report = detect_interlace(tools, file_path, interlace_frames, timeout_secs).await?;
        info!("{}: {}", file_path.display(), report);
        metadata.interlace_report = Some(report);
    }

    Ok(metadata)
}
