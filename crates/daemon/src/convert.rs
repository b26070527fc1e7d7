use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use thiserror::Error;
use crate::config::{Bitrate, ConfigError, ConvertConfig};
use crate::encoding::{AudioCodec, Resolution, VideoCodec, BITRATE_MODE_CRF};
use crate::metadata::Metadata;
use crate::tools::{run_tool, ToolError, ToolLocations};

/// Audio streams with this channel count are re-encoded with 8 channels
const UPMIX_SOURCE_CHANNELS: u32 = 6;
const UPMIX_TARGET_CHANNELS: u32 = 8;

/// Explicit `-map` selection for the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMapping {
    /// Stream index of the first input, rendered as `0:N`
    Index(u32),
    /// Raw ffmpeg map specifier such as `0:a:1`
    Spec(String),
}

impl StreamMapping {
    pub fn to_arg(&self) -> String {
        match self {
            StreamMapping::Index(i) => format!("0:{}", i),
            StreamMapping::Spec(s) => s.clone(),
        }
    }
}

/// Per-call switches that are not part of a category's encode settings
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Replace an existing output instead of reporting `OutputExists`
    pub overwrite: bool,
    /// Replaces the default `-map 0` when non-empty
    pub mappings: Vec<StreamMapping>,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("deinterlace requested but metadata for {0} has no interlace report")]
    MissingInterlaceReport(PathBuf),
    #[error("no auto bitrate defined for {0}")]
    NoAutoBitrate(Resolution),
    #[error("video filters ({0}) cannot be combined with stream copy")]
    FilterWithStreamCopy(String),
    #[error("trim end is relative to the duration of {0}, which is unknown")]
    UnknownDuration(PathBuf),
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Result of a convert call that reached a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOutcome {
    Converted,
    /// Output already present and overwrite not requested
    OutputExists,
    /// Source band cannot be transcoded without a scale override
    UnsupportedResolution(Option<Resolution>),
    /// Transcoder exited non-zero (-1 when killed by a signal)
    Failed(i32),
}

impl ConvertOutcome {
    /// Numeric status: 0 success, -1 output exists, -2 unsupported resolution, else the transcoder's code
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvertOutcome::Converted => 0,
            ConvertOutcome::OutputExists => -1,
            ConvertOutcome::UnsupportedResolution(_) => -2,
            ConvertOutcome::Failed(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConvertOutcome::Converted)
    }
}

/// Either a ready argument list or the reason no transcoder run is needed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertPlan {
    Run(Vec<String>),
    Unsupported(Option<Resolution>),
}

/// Build the transcoder argument list (without the program itself)
///
/// Config problems, a missing interlace report and unresolvable bitrates are errors
/// here, so nothing is ever spawned for them.
pub fn build_convert_args(
    input: &Path,
    output: &Path,
    config: &ConvertConfig,
    metadata: &Metadata,
    options: &ConvertOptions,
) -> Result<ConvertPlan, ConvertError> {
    config.validate()?;
    let video_codec = config.video_codec()?;
    let audio_codec = config.audio_codec()?;

    let interlace_report = if config.deinterlace {
        Some(
            metadata
                .interlace_report
                .ok_or_else(|| ConvertError::MissingInterlaceReport(metadata.file.clone()))?,
        )
    } else {
        None
    };

    let resolution = match config.scale_height {
        Some(height) => Resolution::for_height(height),
        None => match metadata.resolution {
            Some(res) if res.is_convertible() => res,
            other => return Ok(ConvertPlan::Unsupported(other)),
        },
    };

    let mut args = Vec::new();

    if options.overwrite {
        args.push("-y".to_string());
    }

    if let Some(start) = config.start {
        args.push("-ss".to_string());
        args.push(format_seconds(start));
    }
    if let Some(end) = config.end {
        let end = if end <= 0.0 {
            let duration = metadata
                .estimated_duration
                .ok_or_else(|| ConvertError::UnknownDuration(metadata.file.clone()))?;
            duration + end
        } else {
            end
        };
        args.push("-to".to_string());
        args.push(format_seconds(end));
    }

    args.push("-i".to_string());
    args.push(input.to_string_lossy().to_string());

    // yadif has to see the source fields before any resize
    let mut filters = Vec::new();
    if let Some(report) = interlace_report {
        let interlaced = report.is_interlaced(config.deinterlace_threshold);
        debug!("{}: {} -> deinterlace {}", input.display(), report, interlaced);
        if interlaced {
            filters.push("yadif".to_string());
        }
    }
    if let Some(height) = config.scale_height {
        filters.push(format!("scale=-2:{}", height));
    }
    if !filters.is_empty() {
        let chain = filters.join(",");
        if video_codec == VideoCodec::Copy {
            return Err(ConvertError::FilterWithStreamCopy(chain));
        }
        args.push("-vf".to_string());
        args.push(chain);
    }

    args.push("-c:v".to_string());
    args.push(video_codec.ffmpeg_encoder_name().to_string());

    if video_codec != VideoCodec::Copy {
        let crf = match config.bitrate {
            Bitrate::Disabled => config.crf,
            Bitrate::Auto | Bitrate::Kbps(_) => {
                let kbps = match config.bitrate {
                    Bitrate::Kbps(n) => n,
                    _ => config
                        .auto_bitrate
                        .get(resolution)
                        .ok_or(ConvertError::NoAutoBitrate(resolution))?,
                };
                args.push("-x264-params".to_string());
                args.push(vbv_params(kbps));
                BITRATE_MODE_CRF
            }
        };
        args.push("-crf".to_string());
        args.push(crf.to_string());
        args.push("-preset".to_string());
        args.push(config.preset.as_str().to_string());
    }

    args.push("-c:a".to_string());
    args.push(audio_codec.ffmpeg_encoder_name().to_string());
    if audio_codec.is_experimental() {
        args.push("-strict".to_string());
        args.push("-2".to_string());
    }
    if audio_codec != AudioCodec::Copy {
        for (i, stream) in metadata.audio_streams().enumerate() {
            if stream.channels == Some(UPMIX_SOURCE_CHANNELS) {
                args.push(format!("-ac:a:{}", i));
                args.push(UPMIX_TARGET_CHANNELS.to_string());
            }
        }
    }

    if config.include_subtitles {
        args.push("-c:s".to_string());
        args.push("copy".to_string());
    } else {
        args.push("-sn".to_string());
    }

    if options.mappings.is_empty() {
        args.push("-map".to_string());
        args.push("0".to_string());
    } else {
        for mapping in &options.mappings {
            args.push("-map".to_string());
            args.push(mapping.to_arg());
        }
    }

    if config.include_ripped_metadata {
        args.push("-metadata".to_string());
        args.push("ripped=true".to_string());
        args.push("-metadata:s:v:0".to_string());
        args.push("ripped=true".to_string());
    }

    args.push(output.to_string_lossy().to_string());

    Ok(ConvertPlan::Run(args))
}

/// x264 VBV cap: buffer is twice the max rate, quality floor kept loose
fn vbv_params(kbps: u32) -> String {
    format!(
        "vbv-maxrate={}:vbv-bufsize={}:crf-max=25:qpmax=34",
        kbps,
        kbps.saturating_mul(2)
    )
}

fn format_seconds(secs: f64) -> String {
    format!("{:.3}", secs)
}

/// Runs the transcoder for one file at a time
#[derive(Debug, Clone)]
pub struct Transcoder {
    tools: ToolLocations,
    timeout_secs: Option<u64>,
}

impl Transcoder {
    pub fn new(tools: ToolLocations, timeout_secs: Option<u64>) -> Self {
        Self { tools, timeout_secs }
    }

    pub fn tools(&self) -> &ToolLocations {
        &self.tools
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Convert `input` into `output`, blocking until the transcoder exits
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        config: &ConvertConfig,
        metadata: &Metadata,
        options: &ConvertOptions,
    ) -> Result<ConvertOutcome, ConvertError> {
        if !options.overwrite && output.exists() {
            warn!("Cowardly refusing to overwrite existing file: {}", output.display());
            return Ok(ConvertOutcome::OutputExists);
        }

        let args = match build_convert_args(input, output, config, metadata, options)? {
            ConvertPlan::Run(args) => args,
            ConvertPlan::Unsupported(resolution) => {
                warn!(
                    "{}: resolution not supported for conversion: {}",
                    input.display(),
                    resolution.map_or_else(|| "no video stream".to_string(), |r| r.to_string())
                );
                return Ok(ConvertOutcome::UnsupportedResolution(resolution));
            }
        };

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConvertError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        info!("Converting {} -> {}", input.display(), output.display());
        let (program, args) = self.tools.transcoder_command(args);
        let result = run_tool(&program, &args, self.timeout_secs).await?;

        if result.success() {
            info!("Conversion finished: {}", output.display());
            Ok(ConvertOutcome::Converted)
        } else {
            debug!("Transcoder output for {}:\n{}", input.display(), result.output);
            Ok(ConvertOutcome::Failed(result.code()))
        }
    }
}
