use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use common::{stable_id, Album, DisplayItem, Track};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)").expect("leading number pattern"));

const UNKNOWN_ARTIST: &str = "unknown_artist";
const UNKNOWN_TITLE: &str = "unknown_title";
const UNKNOWN_ALBUM: &str = "unknown_album";

/// Sorts by album, then track priority, and drops duplicates.
pub fn organize_and_sort(mut tracks: Vec<Arc<Track>>) -> Vec<Arc<Track>> {
    tracks.sort_by(|a, b| compare_tracks(a, b));
    dedupe(tracks)
}

pub fn compare_tracks(a: &Track, b: &Track) -> Ordering {
    album_order(a, b).then_with(|| numbered_track_order(a, b))
}

/// Untagged tracks form one bucket placed after every named album.
fn album_order(a: &Track, b: &Track) -> Ordering {
    match (a.album.is_empty(), b.album.is_empty()) {
        (false, false) => a.album.to_lowercase().cmp(&b.album.to_lowercase()),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => Ordering::Equal,
    }
}

fn numbered_track_order(a: &Track, b: &Track) -> Ordering {
    match (a.track_no, b.track_no) {
        (Some(left), Some(right)) => left.cmp(&right).then_with(|| title_order(a, b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => match (leading_number(&a.title), leading_number(&b.title)) {
            // Zero padded to two digits, so "1" files next to "01".
            (Some(left), Some(right)) => format!("{:02}", left)
                .cmp(&format!("{:02}", right))
                .then_with(|| title_order(a, b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => title_order(a, b),
        },
    }
}

fn title_order(a: &Track, b: &Track) -> Ordering {
    a.title.to_lowercase().cmp(&b.title.to_lowercase())
}

fn leading_number(title: &str) -> Option<u64> {
    let caps = LEADING_NUMBER.captures(title)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Keeps the first track of every `artist|title|album` identity.
pub fn dedupe(tracks: Vec<Arc<Track>>) -> Vec<Arc<Track>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(tracks.len());
    let mut duplicates = 0usize;

    for track in tracks {
        if seen.insert(dedupe_key(&track)) {
            unique.push(track);
        } else {
            duplicates += 1;
            debug!(
                "Skipping duplicate: {} - {} (album: {})",
                track.artist, track.title, track.album
            );
        }
    }

    if duplicates > 0 {
        info!(
            "Removed {} duplicate tracks, kept {}",
            duplicates,
            unique.len()
        );
    }
    unique
}

fn dedupe_key(track: &Track) -> String {
    let artist = key_part(&track.artist, UNKNOWN_ARTIST);
    let title = key_part(&track.title, UNKNOWN_TITLE);
    let album = key_part(&track.album, UNKNOWN_ALBUM);
    format!("{}|{}|{}", artist, title, album)
}

fn key_part(value: &str, fallback: &str) -> String {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        fallback.to_string()
    } else {
        normalized
    }
}

/// Groups sorted tracks sharing an exact album tag into albums of two or more.
pub fn organize_into_albums(sorted: &[Arc<Track>]) -> Vec<Arc<Album>> {
    let mut groups: BTreeMap<&str, Vec<Arc<Track>>> = BTreeMap::new();
    for track in sorted {
        if track.album.is_empty() {
            continue;
        }
        groups
            .entry(track.album.as_str())
            .or_default()
            .push(Arc::clone(track));
    }

    let group_count = groups.len();
    let mut albums = Vec::new();
    for (name, tracks) in groups {
        if tracks.len() < 2 {
            debug!("Leaving single-track album {:?} ungrouped", name);
            continue;
        }
        let first = &tracks[0];
        let artist = if first.artist.trim().is_empty() {
            first.inferred_artist()
        } else {
            first.artist.clone()
        };
        debug!("Creating album {:?} ({} tracks)", name, tracks.len());
        albums.push(Arc::new(Album::new(name.to_string(), artist, tracks)));
    }

    albums.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    info!(
        "Created {} albums from {} album tags",
        albums.len(),
        group_count
    );
    albums
}

/// Albums plus one folder entry per directory of tracks that no album claimed.
pub fn display_items(tracks: &[Arc<Track>], albums: &[Arc<Album>]) -> Vec<DisplayItem> {
    let in_album: HashSet<&str> = albums
        .iter()
        .flat_map(|album| album.tracks.iter().map(|track| track.id.as_str()))
        .collect();

    let mut folders: BTreeMap<PathBuf, Vec<Arc<Track>>> = BTreeMap::new();
    for track in tracks {
        if in_album.contains(track.id.as_str()) {
            continue;
        }
        folders
            .entry(track.parent_dir.clone())
            .or_default()
            .push(Arc::clone(track));
    }

    let mut items: Vec<DisplayItem> = albums
        .iter()
        .map(|album| DisplayItem::Album(Arc::clone(album)))
        .collect();

    for (path, tracks) in folders {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty() && s != ".")
            .unwrap_or_else(|| "Unknown Folder".to_string());
        items.push(DisplayItem::Folder {
            id: stable_id(&path.to_string_lossy()),
            name,
            path,
            tracks,
        });
    }

    items.sort_by(|a, b| a.name().to_lowercase().cmp(&b.name().to_lowercase()));
    items
}
