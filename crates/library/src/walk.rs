use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::LibraryError;

/// macOS writes `._name` shadow files next to the real ones on foreign filesystems.
const RESOURCE_FORK_PREFIX: &str = "._";

/// Decides which file names count as audio.
#[derive(Clone, Debug)]
pub struct AudioFilter {
    suffixes: Vec<String>,
}

impl AudioFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext))
            .collect();
        Self { suffixes }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy(),
            None => return false,
        };
        if name.starts_with(RESOURCE_FORK_PREFIX) {
            return false;
        }
        let lower = name.to_lowercase();
        self.suffixes.iter().any(|suffix| lower.ends_with(suffix.as_str()))
    }
}

impl Default for AudioFilter {
    fn default() -> Self {
        Self::new(["mp3"])
    }
}

/// Every audio file below `root`, sorted by path.
///
/// Only an unreadable `root` is an error; subdirectories that cannot be
/// read are logged and left out.
pub fn walk(root: &Path, filter: &AudioFilter) -> Result<Vec<PathBuf>, LibraryError> {
    if let Err(source) = fs::read_dir(root) {
        return Err(LibraryError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable path under {}: {}", root.display(), err);
                continue;
            }
        };
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        if filter.matches(entry.path()) {
            files.push(entry.into_path());
        } else {
            debug!("Ignoring non-audio file {}", entry.path().display());
        }
    }

    files.sort();
    Ok(files)
}

/// True when `dir` itself (not its subfolders) holds an audio file.
pub fn dir_has_audio(dir: &Path, filter: &AudioFilter) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Cannot read directory {}: {}", dir.display(), err);
            return false;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if filter.matches(&path) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, b"x").expect("write file");
    }

    #[test]
    fn filter_is_case_insensitive_and_skips_resource_forks() {
        let filter = AudioFilter::default();
        assert!(filter.matches(Path::new("/m/track.mp3")));
        assert!(filter.matches(Path::new("/m/TRACK.MP3")));
        assert!(!filter.matches(Path::new("/m/._track.mp3")));
        assert!(!filter.matches(Path::new("/m/track.flac")));
        assert!(!filter.matches(Path::new("/m/cover.jpg")));
    }

    #[test]
    fn filter_accepts_configured_extensions() {
        let filter = AudioFilter::new([".FLAC", "mp3", " "]);
        assert!(filter.matches(Path::new("a.flac")));
        assert!(filter.matches(Path::new("a.mp3")));
        assert!(!filter.matches(Path::new("a.ogg")));
    }

    #[test]
    fn walk_recurses_without_depth_limit() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        touch(&root.join("top.mp3"));
        touch(&root.join("Artist/Album/01 one.mp3"));
        touch(&root.join("Artist/Album/Disc 2/Bonus/deep.MP3"));
        touch(&root.join("Artist/Album/._01 one.mp3"));
        touch(&root.join("Artist/Album/folder.jpg"));

        let files = walk(root, &AudioFilter::default()).expect("walk");
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(files.len(), 3);
        assert!(names.contains(&"top.mp3".to_string()));
        assert!(names.contains(&"01 one.mp3".to_string()));
        assert!(names.contains(&"deep.MP3".to_string()));
        assert!(!names.contains(&"._01 one.mp3".to_string()));
    }

    #[test]
    fn walk_output_is_sorted() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("b/2.mp3"));
        touch(&dir.path().join("a/1.mp3"));
        touch(&dir.path().join("c.mp3"));

        let files = walk(dir.path(), &AudioFilter::default()).expect("walk");
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        match walk(&missing, &AudioFilter::default()) {
            Err(LibraryError::RootUnreadable { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        touch(&root.join("Open/one.mp3"));
        touch(&root.join("Locked/hidden.mp3"));
        touch(&root.join("two.mp3"));

        let locked = root.join("Locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod");
        if fs::read_dir(&locked).is_ok() {
            // Running with privileges that ignore permission bits.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("chmod");
            return;
        }

        let result = walk(root, &AudioFilter::default());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("chmod");

        let files = result.expect("walk");
        assert_eq!(files, vec![root.join("Open/one.mp3"), root.join("two.mp3")]);
    }

    #[test]
    fn audio_check_is_single_level() {
        let dir = tempdir().expect("tempdir");
        let album = dir.path().join("Album");
        touch(&album.join("Disc 1/track.mp3"));
        assert!(!dir_has_audio(&album, &AudioFilter::default()));

        touch(&album.join("track.mp3"));
        assert!(dir_has_audio(&album, &AudioFilter::default()));
    }

    #[test]
    fn audio_check_ignores_resource_forks_only() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("._ghost.mp3"));
        assert!(!dir_has_audio(dir.path(), &AudioFilter::default()));
    }
}
