use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use crate::encoding::Resolution;

/// Descriptive fields that containers store under format-specific tag names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagField {
    Title,
    Subtitle,
    Description,
    AirDate,
    Network,
}

const GENERIC_TAGS: &[(TagField, &str)] = &[(TagField::Title, "title")];

const WTV_TAGS: &[(TagField, &str)] = &[
    (TagField::Title, "Title"),
    (TagField::Subtitle, "WM/SubTitle"),
    (TagField::Description, "WM/SubTitleDescription"),
    (TagField::AirDate, "WM/MediaOriginalBroadcastDateTime"),
    (TagField::Network, "service_provider"),
];

/// Container family, selected once from ffprobe's format name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    Generic,
    /// Windows Media Center recordings
    Wtv,
}

impl MetadataFormat {
    pub fn from_format_name(format_name: &str) -> Self {
        if format_name.split(',').any(|f| f.trim() == "wtv") {
            MetadataFormat::Wtv
        } else {
            MetadataFormat::Generic
        }
    }

    fn tag_table(&self) -> &'static [(TagField, &'static str)] {
        match self {
            MetadataFormat::Generic => GENERIC_TAGS,
            MetadataFormat::Wtv => WTV_TAGS,
        }
    }

    /// Container tag key holding `field`, if this format defines one
    pub fn tag_key(&self, field: TagField) -> Option<&'static str> {
        self.tag_table()
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, key)| *key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

impl StreamKind {
    pub fn from_codec_type(codec_type: Option<&str>) -> Self {
        match codec_type {
            Some("video") => StreamKind::Video,
            Some("audio") => StreamKind::Audio,
            Some("subtitle") => StreamKind::Subtitle,
            _ => StreamKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Audio channel count
    pub channels: Option<u32>,
    /// Seconds
    pub duration: Option<f64>,
    pub tags: HashMap<String, String>,
}

impl Stream {
    pub fn new(index: u32, kind: StreamKind) -> Self {
        Self {
            index,
            kind,
            codec: None,
            width: None,
            height: None,
            channels: None,
            duration: None,
            tags: HashMap::new(),
        }
    }

    pub fn video(index: u32, width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::new(index, StreamKind::Video)
        }
    }

    pub fn audio(index: u32, channels: u32) -> Self {
        Self {
            channels: Some(channels),
            ..Self::new(index, StreamKind::Audio)
        }
    }

    pub fn subtitle(index: u32) -> Self {
        Self::new(index, StreamKind::Subtitle)
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Frame counts from one idet detection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterlaceGroup {
    pub tff: u64,
    pub bff: u64,
    pub progressive: u64,
    pub undetermined: u64,
}

impl InterlaceGroup {
    pub fn interlaced(&self) -> u64 {
        self.tff + self.bff
    }

    pub fn total_frames(&self) -> u64 {
        self.tff + self.bff + self.progressive + self.undetermined
    }

    pub fn ratio(&self) -> f64 {
        ratio(self.interlaced(), self.total_frames())
    }
}

/// Combined single-frame and multi-frame idet results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterlaceReport {
    pub single: InterlaceGroup,
    pub multi: InterlaceGroup,
}

impl InterlaceReport {
    pub fn interlaced(&self) -> u64 {
        self.single.interlaced() + self.multi.interlaced()
    }

    pub fn total_frames(&self) -> u64 {
        self.single.total_frames() + self.multi.total_frames()
    }

    /// Share of sampled frames detected as interlaced; zero when nothing was sampled
    pub fn ratio(&self) -> f64 {
        ratio(self.interlaced(), self.total_frames())
    }

    pub fn is_interlaced(&self, threshold: f64) -> bool {
        self.total_frames() > 0 && self.ratio() >= threshold
    }
}

impl fmt::Display for InterlaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "interlaced {}/{} frames ({:.2})",
            self.interlaced(),
            self.total_frames(),
            self.ratio()
        )
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Everything the transcoder needs to know about one input file
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub file: PathBuf,
    pub format: MetadataFormat,
    pub format_name: String,
    pub tags: HashMap<String, String>,
    pub streams: Vec<Stream>,
    /// Longest stream duration in seconds
    pub estimated_duration: Option<f64>,
    /// Band of the tallest video stream; None when there is no video
    pub resolution: Option<Resolution>,
    pub interlace_report: Option<InterlaceReport>,
    /// A video stream carries a ripped=true tag from a previous pass
    pub ripped: bool,
}

impl Metadata {
    /// Build metadata from container-level facts and the stream list, deriving the rest
    pub fn new(
        file: PathBuf,
        format_name: String,
        tags: HashMap<String, String>,
        streams: Vec<Stream>,
    ) -> Self {
        let estimated_duration = streams
            .iter()
            .filter_map(|s| s.duration)
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));

        let resolution = streams
            .iter()
            .filter(|s| s.kind == StreamKind::Video)
            .filter_map(|s| s.height)
            .max()
            .map(Resolution::for_height);

        let ripped = streams
            .iter()
            .filter(|s| s.kind == StreamKind::Video)
            .any(|s| {
                s.tags
                    .iter()
                    .any(|(k, v)| k.eq_ignore_ascii_case("ripped") && v.trim_matches('"').eq_ignore_ascii_case("true"))
            });

        Self {
            file,
            format: MetadataFormat::from_format_name(&format_name),
            format_name,
            tags,
            streams,
            estimated_duration,
            resolution,
            interlace_report: None,
            ripped,
        }
    }

    pub fn with_interlace_report(mut self, report: InterlaceReport) -> Self {
        self.interlace_report = Some(report);
        self
    }

    fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams_of(StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams_of(StreamKind::Audio)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams_of(StreamKind::Subtitle)
    }

    /// Container tag for a descriptive field, using this format's tag names
    pub fn tag(&self, field: TagField) -> Option<&str> {
        let key = self.format.tag_key(field)?;
        self.tags.get(key).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.tag(TagField::Title)
            .or_else(|| self.tags.get("Title").map(String::as_str))
    }

    pub fn subtitle(&self) -> Option<&str> {
        self.tag(TagField::Subtitle)
    }

    pub fn air_date(&self) -> Option<&str> {
        self.tag(TagField::AirDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wtv_tags() -> HashMap<String, String> {
        [
            ("Title", "Nova"),
            ("WM/SubTitle", "Black Hole Apocalypse"),
            ("WM/MediaOriginalBroadcastDateTime", "2018-01-10T00:00:00Z"),
            ("service_provider", "PBS"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_derived_fields() {
        let meta = Metadata::new(
            PathBuf::from("/in/a.mkv"),
            "matroska,webm".to_string(),
            HashMap::new(),
            vec![
                Stream::video(0, 720, 480).with_duration(100.0),
                Stream::video(1, 1920, 1080),
                Stream::audio(2, 6).with_duration(101.5),
                Stream::subtitle(3),
            ],
        );
        assert_eq!(meta.format, MetadataFormat::Generic);
        assert_eq!(meta.resolution, Some(Resolution::HighDef));
        assert_eq!(meta.estimated_duration, Some(101.5));
        assert_eq!(meta.video_streams().count(), 2);
        assert_eq!(meta.audio_streams().count(), 1);
        assert_eq!(meta.subtitle_streams().count(), 1);
        assert!(!meta.ripped);
    }

    #[test]
    fn test_no_video_means_no_resolution() {
        let meta = Metadata::new(PathBuf::from("a.mka"), "matroska".into(), HashMap::new(), vec![Stream::audio(0, 2)]);
        assert_eq!(meta.resolution, None);
        assert_eq!(meta.estimated_duration, None);
    }

    #[test]
    fn test_wtv_tag_mapping() {
        let meta = Metadata::new(PathBuf::from("rec.wtv"), "wtv".into(), wtv_tags(), vec![]);
        assert_eq!(meta.format, MetadataFormat::Wtv);
        assert_eq!(meta.title(), Some("Nova"));
        assert_eq!(meta.subtitle(), Some("Black Hole Apocalypse"));
        assert_eq!(meta.air_date(), Some("2018-01-10T00:00:00Z"));
        assert_eq!(meta.tag(TagField::Network), Some("PBS"));
    }

    #[test]
    fn test_generic_format_only_maps_title() {
        let mut tags = wtv_tags();
        tags.insert("title".into(), "Lowercase".into());
        let meta = Metadata::new(PathBuf::from("a.mkv"), "matroska,webm".into(), tags, vec![]);
        assert_eq!(meta.title(), Some("Lowercase"));
        assert_eq!(meta.subtitle(), None);
        assert_eq!(meta.tag(TagField::Network), None);
    }

    #[test]
    fn test_ripped_tag_detected() {
        let mut video = Stream::video(0, 720, 480);
        video.tags.insert("RIPPED".into(), "true".into());
        let meta = Metadata::new(PathBuf::from("a.mkv"), "matroska".into(), HashMap::new(), vec![video]);
        assert!(meta.ripped);
    }

    #[test]
    fn test_interlace_ratio() {
        let report = InterlaceReport {
            single: InterlaceGroup { tff: 30, bff: 0, progressive: 10, undetermined: 10 },
            multi: InterlaceGroup { tff: 40, bff: 0, progressive: 5, undetermined: 5 },
        };
        assert_eq!(report.interlaced(), 70);
        assert_eq!(report.total_frames(), 100);
        assert!(report.is_interlaced(0.7));
        assert!(!report.is_interlaced(0.71));
        assert!(!InterlaceReport::default().is_interlaced(0.0));
    }
}
