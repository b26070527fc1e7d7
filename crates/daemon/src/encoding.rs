use std::fmt;
use serde::{Deserialize, Serialize};

/// Default constant rate factor for x264/x265 encodes
pub const DEFAULT_CRF: u32 = 15;

/// Placeholder CRF used when a VBV bitrate cap drives quality instead
pub const BITRATE_MODE_CRF: u32 = 1;

/// Output resolution bands with their nominal size and default auto bitrate (kbps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    LowDef,
    StandardDef,
    MediumDef,
    HighDef,
    UltraHighDef,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::LowDef,
        Resolution::StandardDef,
        Resolution::MediumDef,
        Resolution::HighDef,
        Resolution::UltraHighDef,
    ];

    pub fn width(&self) -> u32 {
        match self {
            Resolution::LowDef => 360,
            Resolution::StandardDef => 720,
            Resolution::MediumDef => 1280,
            Resolution::HighDef => 1920,
            Resolution::UltraHighDef => 3840,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Resolution::LowDef => 240,
            Resolution::StandardDef => 480,
            Resolution::MediumDef => 720,
            Resolution::HighDef => 1080,
            Resolution::UltraHighDef => 2160,
        }
    }

    /// Default average bitrate in kbps for auto bitrate mode
    ///
    /// Ultra high definition has no default; auto bitrate is undefined there.
    pub fn auto_bitrate(&self) -> Option<u32> {
        match self {
            Resolution::LowDef => Some(500),
            Resolution::StandardDef => Some(1600),
            Resolution::MediumDef => Some(4500),
            Resolution::HighDef => Some(8000),
            Resolution::UltraHighDef => None,
        }
    }

    /// Whether the transcoder pipeline accepts this band without a scale override
    pub fn is_convertible(&self) -> bool {
        !matches!(self, Resolution::UltraHighDef)
    }

    /// Pick the band for a frame height using the ordered threshold table
    pub fn for_height(height: u32) -> Self {
        if height <= 240 {
            Resolution::LowDef
        } else if height <= 576 {
            Resolution::StandardDef
        } else if height <= 800 {
            Resolution::MediumDef
        } else if height <= 1080 {
            Resolution::HighDef
        } else {
            Resolution::UltraHighDef
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resolution::LowDef => "LOW_DEF",
            Resolution::StandardDef => "STANDARD_DEF",
            Resolution::MediumDef => "MEDIUM_DEF",
            Resolution::HighDef => "HIGH_DEF",
            Resolution::UltraHighDef => "ULTRA_HIGH_DEF",
        };
        write!(f, "{} ({}x{})", name, self.width(), self.height())
    }
}

/// Video codecs the transcoder knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Mpeg2,
    Copy,
}

impl VideoCodec {
    /// Encoder name passed to `-c:v`
    pub fn ffmpeg_encoder_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Mpeg2 => "mpeg2video",
            VideoCodec::Copy => "copy",
        }
    }

    /// Codec names as reported by ffprobe
    pub fn codec_names(&self) -> &'static [&'static str] {
        match self {
            VideoCodec::H264 => &["h264"],
            VideoCodec::H265 => &["hevc", "h265"],
            VideoCodec::Mpeg2 => &["mpeg2video", "mpeg2"],
            VideoCodec::Copy => &["copy"],
        }
    }

    /// Resolve either an encoder name (`libx264`) or a codec name (`h264`)
    pub fn from_name(name: &str) -> Option<Self> {
        [VideoCodec::H264, VideoCodec::H265, VideoCodec::Mpeg2, VideoCodec::Copy]
            .into_iter()
            .find(|c| c.ffmpeg_encoder_name() == name || c.codec_names().contains(&name))
    }

    /// VBV-capped bitrate mode is only wired up for x264
    pub fn supports_bitrate_mode(&self) -> bool {
        matches!(self, VideoCodec::H264)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Ac3,
    Dts,
    Copy,
}

impl AudioCodec {
    pub fn ffmpeg_encoder_name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Dts => "dts",
            AudioCodec::Copy => "copy",
        }
    }

    /// ffmpeg's DTS encoder (`dca`) refuses to run unless experimental codecs are allowed
    pub fn is_experimental(&self) -> bool {
        matches!(self, AudioCodec::Dts)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [AudioCodec::Aac, AudioCodec::Ac3, AudioCodec::Dts, AudioCodec::Copy]
            .into_iter()
            .find(|c| c.ffmpeg_encoder_name() == name)
    }
}

/// x264/x265 speed presets, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    #[default]
    Fast,
    Medium,
    Slow,
    Veryslow,
    Placebo,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Veryslow => "veryslow",
            Preset::Placebo => "placebo",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
