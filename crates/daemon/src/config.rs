use std::fmt;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::encoding::{AudioCodec, Preset, Resolution, VideoCodec, DEFAULT_CRF};

/// Configuration problems detected before any subprocess is spawned
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown video codec: {0}")]
    UnknownVideoCodec(String),
    #[error("unknown audio codec: {0}")]
    UnknownAudioCodec(String),
    #[error("bitrate mode is only supported with libx264, not {0}")]
    BitrateUnsupported(String),
    #[error("deinterlace threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("invalid bitrate value: {0}")]
    InvalidBitrate(String),
}

/// Rate control selection for the video encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "BitrateRepr", into = "BitrateRepr")]
pub enum Bitrate {
    /// Plain CRF encode
    #[default]
    Disabled,
    /// Cap at the per-resolution bitrate
    Auto,
    /// Cap at an explicit bitrate in kbps
    Kbps(u32),
}

impl Bitrate {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Bitrate::Disabled)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BitrateRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<BitrateRepr> for Bitrate {
    type Error = ConfigError;

    fn try_from(value: BitrateRepr) -> Result<Self, Self::Error> {
        match value {
            BitrateRepr::Number(n) => Ok(Bitrate::Kbps(n)),
            BitrateRepr::Text(s) => match s.trim().to_lowercase().as_str() {
                "" | "disabled" | "none" => Ok(Bitrate::Disabled),
                "auto" => Ok(Bitrate::Auto),
                other => other
                    .parse::<u32>()
                    .map(Bitrate::Kbps)
                    .map_err(|_| ConfigError::InvalidBitrate(s.clone())),
            },
        }
    }
}

impl From<Bitrate> for BitrateRepr {
    fn from(value: Bitrate) -> Self {
        match value {
            Bitrate::Disabled => BitrateRepr::Text("disabled".to_string()),
            Bitrate::Auto => BitrateRepr::Text("auto".to_string()),
            Bitrate::Kbps(n) => BitrateRepr::Number(n),
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bitrate::Disabled => f.write_str("disabled"),
            Bitrate::Auto => f.write_str("auto"),
            Bitrate::Kbps(n) => write!(f, "{}", n),
        }
    }
}

/// Per-resolution overrides for auto bitrate mode (kbps)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBitrates {
    pub low_def: Option<u32>,
    pub standard_def: Option<u32>,
    pub medium_def: Option<u32>,
    pub high_def: Option<u32>,
}

impl AutoBitrates {
    /// Configured override for a band, falling back to the band's table default
    pub fn get(&self, resolution: Resolution) -> Option<u32> {
        let configured = match resolution {
            Resolution::LowDef => self.low_def,
            Resolution::StandardDef => self.standard_def,
            Resolution::MediumDef => self.medium_def,
            Resolution::HighDef => self.high_def,
            Resolution::UltraHighDef => None,
        };
        configured.or_else(|| resolution.auto_bitrate())
    }
}

/// Encode settings shared by every file of one library category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Constant rate factor when no bitrate cap is in effect
    pub crf: u32,
    pub preset: Preset,
    pub bitrate: Bitrate,
    /// Tag the output (container and first video stream) with ripped=true
    pub include_ripped_metadata: bool,
    /// Deinterlace when the interlace report crosses `deinterlace_threshold`
    pub deinterlace: bool,
    pub deinterlace_threshold: f64,
    pub include_subtitles: bool,
    /// Trim start in seconds
    pub start: Option<f64>,
    /// Trim end in seconds; zero or negative counts back from the estimated duration
    pub end: Option<f64>,
    pub auto_bitrate: AutoBitrates,
    /// Scale to this output height, keeping aspect ratio
    pub scale_height: Option<u32>,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            crf: DEFAULT_CRF,
            preset: Preset::default(),
            bitrate: Bitrate::Disabled,
            include_ripped_metadata: true,
            deinterlace: false,
            deinterlace_threshold: 0.5,
            include_subtitles: true,
            start: None,
            end: None,
            auto_bitrate: AutoBitrates::default(),
            scale_height: None,
            video_codec: VideoCodec::H264.ffmpeg_encoder_name().to_string(),
            audio_codec: AudioCodec::Aac.ffmpeg_encoder_name().to_string(),
        }
    }
}

impl ConvertConfig {
    pub fn video_codec(&self) -> Result<VideoCodec, ConfigError> {
        VideoCodec::from_name(&self.video_codec)
            .ok_or_else(|| ConfigError::UnknownVideoCodec(self.video_codec.clone()))
    }

    pub fn audio_codec(&self) -> Result<AudioCodec, ConfigError> {
        AudioCodec::from_name(&self.audio_codec)
            .ok_or_else(|| ConfigError::UnknownAudioCodec(self.audio_codec.clone()))
    }

    /// Reject combinations the transcoder cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let video = self.video_codec()?;
        self.audio_codec()?;

        if self.bitrate.is_enabled() && video != VideoCodec::Copy && !video.supports_bitrate_mode() {
            return Err(ConfigError::BitrateUnsupported(self.video_codec.clone()));
        }

        if !(0.0..=1.0).contains(&self.deinterlace_threshold) {
            return Err(ConfigError::InvalidThreshold(self.deinterlace_threshold));
        }

        Ok(())
    }
}

/// Library directories; input trees are mirrored into the output and working trees
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub movie_in: PathBuf,
    pub movie_out: PathBuf,
    pub tv_in: PathBuf,
    pub tv_out: PathBuf,
    /// Scratch space for temp encodes and split chunks
    pub working: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            movie_in: PathBuf::from("/mnt/rips/movies"),
            movie_out: PathBuf::from("/mnt/media/movies"),
            tv_in: PathBuf::from("/mnt/rips/tv"),
            tv_out: PathBuf::from("/mnt/media/tv"),
            working: PathBuf::from("/tmp/ripd-work"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// rclone destination root, e.g. `gdrive:backup`
    pub remote_path: String,
    /// Files at or above this size (GiB) are split before transfer
    pub max_size_gib: u64,
    /// Chunk size handed to `split -b`
    pub split_size: String,
    /// Extra arguments placed after `copy --transfers=1`
    pub rclone_args: Vec<String>,
    pub split_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            remote_path: "remote:backup".to_string(),
            max_size_gib: 20,
            split_size: "5G".to_string(),
            rclone_args: vec!["--timeout=4h0m0s".to_string()],
            split_timeout_secs: 2 * 60 * 60,
        }
    }
}

impl BackupConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_gib.saturating_mul(1024 * 1024 * 1024)
    }
}

/// Optional explicit tool paths; unset tools are looked up on PATH at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub rclone: Option<PathBuf>,
    pub split: Option<PathBuf>,
    pub nice: Option<PathBuf>,
    /// Run the transcoder under `nice`
    pub use_nice: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: None,
            ffprobe: None,
            rclone: None,
            split: None,
            nice: None,
            use_nice: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Hard limit for a single transcoder run
    pub timeout_secs: u64,
    /// Frames sampled by the idet filter when deinterlacing is enabled
    pub interlace_frames: u32,
    /// Files modified more recently than this are left for a later run
    pub recency_grace_secs: u64,
    pub movie: ConvertConfig,
    pub tv: ConvertConfig,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 12 * 60 * 60,
            interlace_frames: 100,
            recency_grace_secs: 5 * 60,
            movie: ConvertConfig::default(),
            tv: ConvertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is unset
    pub level: String,
    /// Append log records here instead of stderr
    pub file: Option<PathBuf>,
    /// SQLite database holding per-file status
    pub db: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            db: PathBuf::from("processed.db"),
        }
    }
}

/// Configuration for the rip backup/transcode daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub directories: DirectoriesConfig,
    pub backup: BackupConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.transcode.movie.validate().context("Invalid [transcode.movie] settings")?;
        config.transcode.tv.validate().context("Invalid [transcode.tv] settings")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[directories]
movie_in = "/rips/movies"
movie_out = "/media/movies"
tv_in = "/rips/tv"
tv_out = "/media/tv"
working = "/scratch"

[backup]
remote_path = "gdrive:rips"
max_size_gib = 10
split_size = "2G"

[tools]
rclone = "/opt/rclone/rclone"
use_nice = false

[transcode]
timeout_secs = 600

[transcode.movie]
crf = 18
preset = "slow"
bitrate = "auto"

[transcode.movie.auto_bitrate]
standard_def = 2000

[transcode.tv]
bitrate = 3000
deinterlace = true
deinterlace_threshold = 0.3
include_subtitles = false

[logging]
level = "debug"
db = "/var/lib/ripd/processed.db"
"#;

    #[test]
    fn test_load_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ripd.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = DaemonConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.directories.working, PathBuf::from("/scratch"));
        assert_eq!(cfg.backup.max_size_bytes(), 10 * 1024 * 1024 * 1024);
        assert_eq!(cfg.backup.split_size, "2G");
        // untouched fields keep their defaults
        assert_eq!(cfg.backup.rclone_args, vec!["--timeout=4h0m0s".to_string()]);
        assert_eq!(cfg.tools.rclone, Some(PathBuf::from("/opt/rclone/rclone")));
        assert!(!cfg.tools.use_nice);
        assert_eq!(cfg.transcode.timeout_secs, 600);
        assert_eq!(cfg.transcode.recency_grace_secs, 300);

        let movie = &cfg.transcode.movie;
        assert_eq!(movie.crf, 18);
        assert_eq!(movie.preset, Preset::Slow);
        assert_eq!(movie.bitrate, Bitrate::Auto);
        assert_eq!(movie.auto_bitrate.get(Resolution::StandardDef), Some(2000));
        assert_eq!(movie.auto_bitrate.get(Resolution::HighDef), Some(8000));

        let tv = &cfg.transcode.tv;
        assert_eq!(tv.bitrate, Bitrate::Kbps(3000));
        assert!(tv.deinterlace);
        assert!(!tv.include_subtitles);
        assert_eq!(tv.video_codec, "libx264");
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = DaemonConfig::load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.transcode.movie, ConvertConfig::default());
        assert_eq!(cfg.logging.db, PathBuf::from("processed.db"));
    }

    #[test]
    fn test_load_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ripd.json");
        std::fs::write(&path, r#"{"transcode": {"tv": {"bitrate": "disabled", "crf": 20}}}"#).unwrap();

        let cfg = DaemonConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.transcode.tv.bitrate, Bitrate::Disabled);
        assert_eq!(cfg.transcode.tv.crf, 20);
    }

    #[test]
    fn test_bitrate_with_hevc_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[transcode.movie]\nbitrate = \"auto\"\nvideo_codec = \"libx265\"\n").unwrap();

        let err = DaemonConfig::load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("libx264"));
    }

    #[test]
    fn test_bitrate_parsing() {
        let parse = |s: &str| serde_json::from_str::<Bitrate>(s);
        assert_eq!(parse("\"auto\"").unwrap(), Bitrate::Auto);
        assert_eq!(parse("\"disabled\"").unwrap(), Bitrate::Disabled);
        assert_eq!(parse("\"2500\"").unwrap(), Bitrate::Kbps(2500));
        assert_eq!(parse("4000").unwrap(), Bitrate::Kbps(4000));
        assert!(parse("\"fast\"").is_err());
    }

    #[test]
    fn test_validate() {
        let mut cfg = ConvertConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.video_codec = "copy".to_string();
        cfg.bitrate = Bitrate::Auto;
        assert!(cfg.validate().is_ok(), "stream copy ignores rate control");

        cfg.video_codec = "libx265".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::BitrateUnsupported("libx265".to_string())));

        cfg.bitrate = Bitrate::Disabled;
        cfg.deinterlace_threshold = 1.5;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidThreshold(1.5)));

        cfg.deinterlace_threshold = 0.5;
        cfg.audio_codec = "opus".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::UnknownAudioCodec("opus".to_string())));
    }
}
