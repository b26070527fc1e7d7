use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::Regex;
use walkdir::WalkDir;

/// Extensions picked up from the input trees
const LISTED_EXTENSIONS: &[&str] = &["mkv", "mp4"];

static TV_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+ - S\d+E\d+(-E\d+)?( - .+)?\.mkv$").expect("invalid tv name regex")
});
static MOVIE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+ \(\d{4}\)( - .+)?\.mkv$").expect("invalid movie name regex")
});

/// `Show - S01E02 - Title.mkv`, `Show - S01E02-E03.mkv`
pub fn is_tv_name(name: &str) -> bool {
    TV_NAME_RE.is_match(name)
}

/// `Movie (1999).mkv`, `Movie (1999) - 1080p.mkv`
pub fn is_movie_name(name: &str) -> bool {
    MOVIE_NAME_RE.is_match(name)
}

/// Whether the file name follows either library naming convention
pub fn has_valid_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| is_tv_name(n) || is_movie_name(n))
        .unwrap_or(false)
}

/// Whether the file changed within `grace` of `now`, i.e. may still be written to
pub fn recently_modified(path: &Path, now: SystemTime, grace: Duration) -> Result<bool> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time: {}", path.display()))?;
    let cutoff = now.checked_sub(grace).unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(modified > cutoff)
}

/// One input file and where its outputs go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFile {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Scratch location for the in-progress encode
    pub temp: PathBuf,
}

/// Relative paths of candidate media files under `input_dir`, sorted
pub fn list_files(input_dir: &Path) -> Vec<PathBuf> {
    if !input_dir.exists() {
        warn!("Input directory does not exist: {}", input_dir.display());
        return Vec::new();
    }

    info!("Scanning directory: {}", input_dir.display());
    let mut files = Vec::new();
    for entry in WalkDir::new(input_dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let listed = entry
            .path()
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| LISTED_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !listed {
            continue;
        }

        match entry.path().strip_prefix(input_dir) {
            Ok(relative) => files.push(relative.to_path_buf()),
            Err(_) => debug!("Skipping entry outside {}: {}", input_dir.display(), entry.path().display()),
        }
    }

    files.sort();
    info!("Finished scanning {}: {} media files", input_dir.display(), files.len());
    files
}

/// Candidate files with their output and temp paths mirrored from the input tree
pub fn library_files(input_dir: &Path, output_dir: &Path, working_dir: &Path) -> Vec<LibraryFile> {
    list_files(input_dir)
        .into_iter()
        .map(|relative| LibraryFile {
            input: input_dir.join(&relative),
            output: output_dir.join(&relative),
            temp: working_dir.join(&relative),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_tv_names() {
        assert!(is_tv_name("Show - S01E01 - Pilot.mkv"));
        assert!(is_tv_name("Show - S01E01-E02 - Pilot.mkv"));
        assert!(is_tv_name("Show - S01E01.mkv"));
        assert!(is_tv_name("Doctor Who (2005) - S10E112 - The Pilot.mkv"));
        assert!(!is_tv_name("Show S01E01.mkv"));
        assert!(!is_tv_name("Show - S01E01 - Pilot.mp4"));
        assert!(!is_tv_name("Show - S01E01 - Pilot.MKV"));
    }

    #[test]
    fn test_movie_names() {
        assert!(is_movie_name("Alien (1979).mkv"));
        assert!(is_movie_name("Alien (1979) - 1080p.mkv"));
        assert!(is_movie_name("Alien (1979) - Director's Cut.mkv"));
        assert!(!is_movie_name("Alien.mkv"));
        assert!(!is_movie_name("Alien (79).mkv"));
        assert!(!is_movie_name("Alien (1979).mkv.part"));
    }

    #[test]
    fn test_has_valid_name_uses_file_name_only() {
        assert!(!has_valid_name(Path::new("/rips/Alien (1979)/randomname.mkv")));
        assert!(has_valid_name(Path::new("/rips/tv/Show/Show - S01E01 - Pilot.mkv")));
    }

    #[test]
    fn test_recently_modified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, "x").unwrap();
        let grace = Duration::from_secs(300);

        let now = SystemTime::now();
        assert!(recently_modified(&path, now, grace).unwrap());
        assert!(!recently_modified(&path, now + Duration::from_secs(600), grace).unwrap());

        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(now - Duration::from_secs(600)).unwrap();
        assert!(!recently_modified(&path, now, grace).unwrap());
    }

    #[test]
    fn test_library_files_mirror_tree() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        for rel in [
            "Show/Season 2/Show - S02E01.mkv",
            "Show/Season 1/Show - S01E01.mkv",
            "Alien (1979).mp4",
            "Show/.Show - S01E02.mkv",
            "Show/notes.txt",
        ] {
            let path = input.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "x").unwrap();
        }

        let files = library_files(&input, Path::new("/out"), Path::new("/work"));
        let relative: Vec<PathBuf> = files
            .iter()
            .map(|f| f.input.strip_prefix(&input).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("Alien (1979).mp4"),
                PathBuf::from("Show/Season 1/Show - S01E01.mkv"),
                PathBuf::from("Show/Season 2/Show - S02E01.mkv"),
            ]
        );
        assert_eq!(files[1].output, PathBuf::from("/out/Show/Season 1/Show - S01E01.mkv"));
        assert_eq!(files[1].temp, PathBuf::from("/work/Show/Season 1/Show - S01E01.mkv"));
    }

    #[test]
    fn test_missing_input_dir_lists_nothing() {
        assert!(list_files(Path::new("/nonexistent/rips")).is_empty());
    }

    proptest! {
        /// Names without a year or episode marker never pass either convention
        #[test]
        fn test_plain_names_rejected(name in "[a-z]{1,20}") {
            let file = format!("{}.mkv", name);
            prop_assert!(!has_valid_name(Path::new(&file)));
        }

        #[test]
        fn test_episode_names_accepted(show in "[A-Za-z ]{1,20}", season in 1u32..40, episode in 1u32..99) {
            let file = format!("{} - S{:02}E{:02} - Title.mkv", show, season, episode);
            prop_assert!(has_valid_name(Path::new(&file)));
        }
    }
}
