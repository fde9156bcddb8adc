use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// One audio file as it was found during a scan.
///
/// Tracks are built once per scan and never mutated afterwards; the catalog
/// and every album share them through `Arc<Track>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub path: PathBuf,
    pub parent_dir: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// `None` when the tag is absent or zero.
    pub track_no: Option<u16>,
    pub duration_ms: Option<u32>,
    #[serde(skip)]
    pub artwork: Option<Artwork>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artwork {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

/// Tag values handed over by a metadata extractor.
#[derive(Clone, Debug, Default)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_no: Option<u16>,
    pub duration_ms: Option<u32>,
    pub artwork: Option<Artwork>,
}

impl Track {
    pub fn from_tags(path: &Path, tags: TrackTags) -> Self {
        let title = tags
            .title
            .and_then(non_blank)
            .unwrap_or_else(|| file_stem(path));
        let parent_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            id: new_id(),
            path: path.to_path_buf(),
            parent_dir,
            title,
            artist: tags.artist.unwrap_or_default(),
            album: tags.album.unwrap_or_default(),
            track_no: tags.track_no.filter(|no| *no > 0),
            duration_ms: tags.duration_ms,
            artwork: tags.artwork.filter(|art| !art.data.is_empty()),
        }
    }

    /// Artist guessed from the folder layout `Artist/Album/track.mp3`.
    pub fn inferred_artist(&self) -> String {
        self.parent_dir
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .and_then(non_blank)
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }

    pub fn has_artwork(&self) -> bool {
        self.artwork.is_some()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub tracks: Vec<Arc<Track>>,
}

impl Album {
    pub fn new(name: String, artist: String, tracks: Vec<Arc<Track>>) -> Self {
        Self {
            id: new_id(),
            name,
            artist,
            tracks,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Cover of the first member that carries one.
    pub fn artwork(&self) -> Option<&Artwork> {
        self.tracks.iter().find_map(|track| track.artwork.as_ref())
    }

    pub fn has_artwork(&self) -> bool {
        self.artwork().is_some()
    }
}

/// Top-level browse entry: a real album, or a folder of loose tracks.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DisplayItem {
    Album(Arc<Album>),
    Folder {
        id: String,
        name: String,
        path: PathBuf,
        tracks: Vec<Arc<Track>>,
    },
}

impl DisplayItem {
    pub fn id(&self) -> &str {
        match self {
            DisplayItem::Album(album) => &album.id,
            DisplayItem::Folder { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DisplayItem::Album(album) => &album.name,
            DisplayItem::Folder { name, .. } => name,
        }
    }

    pub fn tracks(&self) -> &[Arc<Track>] {
        match self {
            DisplayItem::Album(album) => &album.tracks,
            DisplayItem::Folder { tracks, .. } => tracks,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, DisplayItem::Folder { .. })
    }

    pub fn subtitle(&self) -> String {
        let count = self.tracks().len();
        let noun = if count == 1 { "track" } else { "tracks" };
        match self {
            DisplayItem::Album(album) => format!("{} • {} {}", album.artist, count, noun),
            DisplayItem::Folder { .. } => format!("Folder • {} {}", count, noun),
        }
    }

    pub fn artwork(&self) -> Option<&Artwork> {
        self.tracks()
            .iter()
            .find_map(|track| track.artwork.as_ref())
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
