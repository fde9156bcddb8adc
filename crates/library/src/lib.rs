mod listeners;
mod options;
mod organize;
mod walk;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Album, DisplayItem, Track, TrackTags};
use metadata::{read_tags, MetadataError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use listeners::Listeners;
use watch::WatchState;

pub use options::LibraryOptions;
pub use organize::{compare_tracks, dedupe, display_items, organize_and_sort, organize_into_albums};
pub use walk::{dir_has_audio, walk, AudioFilter};

/// Turns one audio file into tag values.
///
/// Errors are per file: the scan logs them and moves on.
pub trait TrackExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<TrackTags, MetadataError>;
}

impl<F> TrackExtractor for F
where
    F: Fn(&Path) -> Result<TrackTags, MetadataError> + Send + Sync,
{
    fn extract(&self, path: &Path) -> Result<TrackTags, MetadataError> {
        self(path)
    }
}

/// Reads embedded tags with lofty.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyExtractor;

impl TrackExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<TrackTags, MetadataError> {
        read_tags(path)
    }
}

/// One scan generation: the sorted tracks and the albums built from them.
#[derive(Debug, Default, Serialize)]
pub struct Catalog {
    pub tracks: Vec<Arc<Track>>,
    pub albums: Vec<Arc<Album>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub tracks: usize,
    pub albums: usize,
    /// Files whose tags could not be read.
    pub skipped: usize,
    pub duplicates: usize,
}

/// Live music catalog for one root folder.
///
/// Cloning is cheap and every clone refers to the same catalog. Readers get
/// snapshots, so they never block on a running scan for longer than the
/// final swap.
#[derive(Clone)]
pub struct Library {
    inner: Arc<Inner>,
}

struct Inner {
    extractor: Box<dyn TrackExtractor>,
    options: LibraryOptions,
    filter: AudioFilter,
    state: RwLock<LibraryState>,
    version: RwLock<u64>,
    listeners: Listeners,
    watch: Mutex<WatchState>,
    scan_lock: Mutex<()>,
    select_lock: Mutex<()>,
}

struct LibraryState {
    catalog: Arc<Catalog>,
    root: Option<PathBuf>,
    scanning: bool,
    stats: LibraryStats,
}

impl Library {
    pub fn new<E>(extractor: E, options: LibraryOptions) -> Self
    where
        E: TrackExtractor + 'static,
    {
        let filter = options.audio_filter();
        Self {
            inner: Arc::new(Inner {
                extractor: Box::new(extractor),
                options,
                filter,
                state: RwLock::new(LibraryState {
                    catalog: Arc::new(Catalog::default()),
                    root: None,
                    scanning: false,
                    stats: LibraryStats::default(),
                }),
                version: RwLock::new(0),
                listeners: Listeners::default(),
                watch: Mutex::new(WatchState::Stopped),
                scan_lock: Mutex::new(()),
                select_lock: Mutex::new(()),
            }),
        }
    }

    pub fn with_lofty(options: LibraryOptions) -> Self {
        Self::new(LoftyExtractor, options)
    }

    /// Switches to `path`: stops the watcher, scans, then watches again.
    ///
    /// Returns the scan result. A watcher that fails to start is logged and
    /// the library keeps working without live updates.
    pub fn select_folder(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<Option<LibraryStats>, LibraryError> {
        let path = path.into();
        let _select = self.inner.select_lock.lock();

        self.stop_watching();
        self.inner.state.write().root = Some(path.clone());
        info!("Selected music folder {}", path.display());

        let result = self.scan_folder();

        if self.inner.options.watch {
            if let Err(err) = self.start_watching() {
                warn!("Failed to start watching {}: {}", path.display(), err);
            }
        }
        result
    }

    /// Rebuilds the catalog from the selected folder.
    ///
    /// Returns `Ok(None)` when no folder has been selected. Only an
    /// unreadable root fails the scan; the previous catalog and version are
    /// then kept. The next scan starts only after this one's listeners
    /// have returned, so listeners must not call back into `scan_folder` or
    /// `select_folder` on the same thread.
    pub fn scan_folder(&self) -> Result<Option<LibraryStats>, LibraryError> {
        let scan_guard = self.inner.scan_lock.lock();

        let root = match self.selected_folder() {
            Some(root) => root,
            None => {
                warn!("No folder selected; nothing to scan");
                return Ok(None);
            }
        };

        let previous = {
            let mut state = self.inner.state.write();
            state.scanning = true;
            let previous = Arc::clone(&state.catalog);
            if self.inner.options.clear_on_scan {
                state.catalog = Arc::new(Catalog::default());
            }
            previous
        };
        self.inner.listeners.scanning_changed(true);
        info!("Library scan started: {}", root.display());

        match self.build_catalog(&root) {
            Ok((catalog, stats)) => {
                {
                    let mut state = self.inner.state.write();
                    state.catalog = Arc::new(catalog);
                    state.scanning = false;
                    state.stats = stats.clone();
                }
                let version = self.bump_version();

                info!(
                    "Library scan finished: {} tracks, {} albums (version {})",
                    stats.tracks, stats.albums, version
                );
                self.inner.listeners.scanning_changed(false);
                self.inner.listeners.library_changed();
                drop(scan_guard);
                Ok(Some(stats))
            }
            Err(err) => {
                {
                    let mut state = self.inner.state.write();
                    state.catalog = previous;
                    state.scanning = false;
                }

                warn!("Library scan of {} failed: {}", root.display(), err);
                self.inner.listeners.scanning_changed(false);
                drop(scan_guard);
                Err(err)
            }
        }
    }

    fn build_catalog(&self, root: &Path) -> Result<(Catalog, LibraryStats), LibraryError> {
        let files = walk(root, &self.inner.filter)?;
        info!("Found {} audio files", files.len());

        let mut tracks = Vec::with_capacity(files.len());
        let mut skipped = 0usize;
        for file in files {
            match self.inner.extractor.extract(&file) {
                Ok(tags) => tracks.push(Arc::new(Track::from_tags(&file, tags))),
                Err(err) => {
                    warn!("Failed to read tags for {:?}: {}", file, err);
                    skipped += 1;
                }
            }
        }

        let extracted = tracks.len();
        let tracks = organize_and_sort(tracks);
        let albums = organize_into_albums(&tracks);

        let stats = LibraryStats {
            tracks: tracks.len(),
            albums: albums.len(),
            skipped,
            duplicates: extracted - tracks.len(),
        };
        Ok((Catalog { tracks, albums }, stats))
    }

    /// Wall-clock milliseconds, forced past the previous value so two scans
    /// in the same millisecond still differ.
    fn bump_version(&self) -> u64 {
        let mut version = self.inner.version.write();
        *version = now_millis().max(version.saturating_add(1));
        *version
    }

    /// Called with `true` when a scan starts and `false` when it ends.
    ///
    /// Runs on the scanning thread while the scan lock is held: calling
    /// `scan_folder` or `select_folder` from here deadlocks.
    pub fn on_scanning_changed<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.listeners.add_scanning(listener);
    }

    /// Called once after every successful scan, in registration order.
    ///
    /// Same threading rules as `on_scanning_changed`; hand rescans off to
    /// another thread.
    pub fn on_library_changed<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.add_changed(listener);
    }

    /// Tracks and albums from the same scan generation.
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.inner.state.read().catalog)
    }

    pub fn songs(&self) -> Vec<Arc<Track>> {
        self.inner.state.read().catalog.tracks.clone()
    }

    pub fn albums(&self) -> Vec<Arc<Album>> {
        self.inner.state.read().catalog.albums.clone()
    }

    pub fn song_by_id(&self, id: &str) -> Option<Arc<Track>> {
        self.inner
            .state
            .read()
            .catalog
            .tracks
            .iter()
            .find(|track| track.id == id)
            .cloned()
    }

    pub fn song_count(&self) -> usize {
        self.inner.state.read().catalog.tracks.len()
    }

    pub fn album_count(&self) -> usize {
        self.inner.state.read().catalog.albums.len()
    }

    pub fn display_items(&self) -> Vec<DisplayItem> {
        let catalog = self.snapshot();
        display_items(&catalog.tracks, &catalog.albums)
    }

    pub fn display_item_count(&self) -> usize {
        self.display_items().len()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.state.read().scanning
    }

    /// Changes exactly when a scan replaces the catalog; 0 before the first one.
    pub fn version(&self) -> u64 {
        *self.inner.version.read()
    }

    pub fn selected_folder(&self) -> Option<PathBuf> {
        self.inner.state.read().root.clone()
    }

    /// Counters from the last successful scan.
    pub fn stats(&self) -> LibraryStats {
        self.inner.state.read().stats.clone()
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.inner.options
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    RootUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    Watch(notify::Error),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::RootUnreadable { path, source } => {
                write!(f, "cannot read music folder {}: {}", path.display(), source)
            }
            LibraryError::Watch(err) => write!(f, "watch error: {}", err),
        }
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Io(err) => Some(err),
            LibraryError::RootUnreadable { source, .. } => Some(source),
            LibraryError::Watch(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<notify::Error> for LibraryError {
    fn from(err: notify::Error) -> Self {
        LibraryError::Watch(err)
    }
}

fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
