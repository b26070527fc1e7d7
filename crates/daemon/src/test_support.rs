//! Scripted stand-ins for ffmpeg, ffprobe, split and rclone.
//!
//! Every script appends `<name> <args>` to a shared log and exits with the code
//! stored in `<name>.exit` (0 when absent), so tests can change behaviour between runs.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use crate::tools::ToolLocations;

pub const DEFAULT_PROBE_JSON: &str = r#"{
    "streams": [
        {"index": 0, "codec_type": "video", "codec_name": "mpeg2video", "width": 720, "height": 480, "duration": "1800.0"},
        {"index": 1, "codec_type": "audio", "codec_name": "ac3", "channels": 6, "duration": "1800.0"},
        {"index": 2, "codec_type": "subtitle", "codec_name": "dvd_subtitle"}
    ],
    "format": {"format_name": "matroska,webm", "tags": {"title": "Test Rip"}}
}"#;

pub struct FakeTools {
    pub dir: TempDir,
    pub log: PathBuf,
    pub tools: ToolLocations,
}

impl FakeTools {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).expect("create bin dir");
        let log = dir.path().join("calls.log");

        let prelude = |name: &str| {
            format!(
                "#!/bin/sh\necho \"{name} $*\" >> '{log}'\nsleep $(cat '{bin}/{name}.delay' 2>/dev/null || echo 0)\ncode=$(cat '{bin}/{name}.exit' 2>/dev/null || echo 0)\nfor last; do :; done\n",
                name = name,
                log = log.display(),
                bin = bin.display(),
            )
        };

        // the transcoder leaves a file behind even when it fails, like a partial encode
        let ffmpeg = write_script(&bin, "ffmpeg", &format!("{}echo transcoded > \"$last\"\nexit $code\n", prelude("ffmpeg")));
        let split = write_script(
            &bin,
            "split",
            &format!("{}[ \"$code\" = 0 ] && echo chunk > \"${{last}}00\"\nexit $code\n", prelude("split")),
        );
        let rclone = write_script(&bin, "rclone", &format!("{}exit $code\n", prelude("rclone")));
        let ffprobe = write_script(
            &bin,
            "ffprobe",
            &format!("{}cat '{}/probe.json'\nexit $code\n", prelude("ffprobe"), bin.display()),
        );
        std::fs::write(bin.join("probe.json"), DEFAULT_PROBE_JSON).expect("write probe json");

        Self {
            tools: ToolLocations { ffmpeg, ffprobe, rclone, split, nice: None },
            log,
            dir,
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub fn set_exit_code(&self, tool: &str, code: i32) {
        std::fs::write(self.bin_dir().join(format!("{}.exit", tool)), code.to_string()).expect("write exit code");
    }

    pub fn set_delay(&self, tool: &str, secs: u64) {
        std::fs::write(self.bin_dir().join(format!("{}.delay", tool)), secs.to_string()).expect("write delay");
    }

    pub fn set_probe_json(&self, json: &str) {
        std::fs::write(self.bin_dir().join("probe.json"), json).expect("write probe json");
    }

    /// Every recorded call as `<tool> <args>`, in start order across tools
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Argument strings of every recorded call to `tool`, oldest first
    pub fn invocations(&self, tool: &str) -> Vec<String> {
        let prefix = format!("{} ", tool);
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn clear_invocations(&self) {
        let _ = std::fs::remove_file(&self.log);
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}
