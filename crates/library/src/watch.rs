use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::walk::{dir_has_audio, AudioFilter};
use crate::{Inner, Library, LibraryError};

pub(crate) enum WatchState {
    Stopped,
    Watching(ActiveWatch),
}

pub(crate) struct ActiveWatch {
    root: PathBuf,
    // Dropping the watcher closes the event channel.
    watcher: RecommendedWatcher,
    control: Sender<WatchMsg>,
    handle: JoinHandle<()>,
}

enum WatchMsg {
    Fs(notify::Result<Event>),
    Stop,
}

impl ActiveWatch {
    fn shutdown(self) {
        let _ = self.control.send(WatchMsg::Stop);
        drop(self.watcher);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!("Watch loop for {} panicked", self.root.display());
        }
    }
}

impl Library {
    /// Watches the selected folder for new album directories.
    ///
    /// Does nothing when already watching or when no folder is selected.
    pub fn start_watching(&self) -> Result<(), LibraryError> {
        let mut state = self.inner.watch.lock();
        if let WatchState::Watching(active) = &*state {
            debug!("Already watching {}", active.root.display());
            return Ok(());
        }

        let root = match self.selected_folder() {
            Some(root) => root,
            None => {
                info!("No folder selected; watcher not started");
                return Ok(());
            }
        };

        let active = spawn_watch(
            Arc::downgrade(&self.inner),
            root,
            self.inner.options.watch_debounce,
        )?;
        info!(
            "Watching {} for new albums (debounce {}ms)",
            active.root.display(),
            self.inner.options.watch_debounce.as_millis()
        );
        *state = WatchState::Watching(active);
        Ok(())
    }

    /// Stops the watcher and waits for its loop to exit.
    pub fn stop_watching(&self) {
        let previous = std::mem::replace(&mut *self.inner.watch.lock(), WatchState::Stopped);
        if let WatchState::Watching(active) = previous {
            let root = active.root.clone();
            active.shutdown();
            info!("Stopped watching {}", root.display());
        }
    }

    pub fn is_watching(&self) -> bool {
        matches!(*self.inner.watch.lock(), WatchState::Watching(_))
    }
}

fn spawn_watch(
    library: Weak<Inner>,
    root: PathBuf,
    debounce: Duration,
) -> Result<ActiveWatch, LibraryError> {
    let (tx, rx) = mpsc::channel::<WatchMsg>();
    let events = tx.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = events.send(WatchMsg::Fs(res));
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(&root, RecursiveMode::NonRecursive)?;

    let handle = thread::Builder::new()
        .name("library-watch".to_string())
        .spawn(move || watch_loop(library, rx, debounce))?;

    Ok(ActiveWatch {
        root,
        watcher,
        control: tx,
        handle,
    })
}

fn watch_loop(library: Weak<Inner>, rx: Receiver<WatchMsg>, debounce: Duration) {
    let mut pending: Vec<PathBuf> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let msg = match deadline {
            None => match rx.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            },
            Some(at) => {
                let wait = at.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => {
                        deadline = None;
                        flush(&library, std::mem::take(&mut pending));
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        };

        match msg {
            WatchMsg::Stop => break,
            WatchMsg::Fs(Ok(event)) => {
                let created = created_paths(&event);
                if created.is_empty() {
                    debug!("Ignoring {:?} for {:?}", event.kind, event.paths);
                    continue;
                }
                for path in created {
                    if !pending.contains(&path) {
                        pending.push(path);
                    }
                }
                if deadline.is_none() {
                    deadline = Some(Instant::now() + debounce);
                }
            }
            WatchMsg::Fs(Err(err)) => warn!("Watch error: {}", err),
        }
    }
    debug!("Watch loop exited");
}

/// Paths that newly appeared in the watched folder; a rename into it counts.
fn created_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.clone()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn flush(library: &Weak<Inner>, paths: Vec<PathBuf>) {
    let inner = match library.upgrade() {
        Some(inner) => inner,
        None => return,
    };

    let mut found = false;
    for path in &paths {
        if is_new_album_dir(path, &inner.filter) {
            info!("New album folder detected: {}", path.display());
            found = true;
        }
    }
    if !found {
        return;
    }

    let library = Library { inner };
    let spawned = thread::Builder::new()
        .name("library-rescan".to_string())
        .spawn(move || {
            info!("Library auto-scan started");
            if let Err(err) = library.scan_folder() {
                warn!("Auto-rescan failed: {}", err);
            }
        });
    if let Err(err) = spawned {
        warn!("Failed to spawn rescan thread: {}", err);
    }
}

fn is_new_album_dir(path: &Path, filter: &AudioFilter) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            if dir_has_audio(path, filter) {
                true
            } else {
                debug!("New directory has no audio files: {}", path.display());
                false
            }
        }
        Ok(_) => false,
        Err(err) => {
            debug!("Cannot stat {}: {}", path.display(), err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_library, write_track};
    use notify::event::CreateKind;
    use tempfile::tempdir;

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(25));
        }
        check()
    }

    #[test]
    fn start_without_folder_is_a_noop() {
        let library = test_library(true);
        library.start_watching().expect("start");
        assert!(!library.is_watching());
        library.stop_watching();
        assert!(!library.is_watching());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let dir = tempdir().expect("tempdir");
        let library = test_library(true);
        library.select_folder(dir.path()).expect("scan");
        assert!(library.is_watching());

        library.start_watching().expect("second start");
        assert!(library.is_watching());

        library.stop_watching();
        assert!(!library.is_watching());
        library.stop_watching();
        assert!(!library.is_watching());

        library.start_watching().expect("restart");
        assert!(library.is_watching());
        library.stop_watching();
    }

    #[test]
    fn failed_start_leaves_watcher_stopped() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("gone");
        let library = test_library(true);

        assert!(library.select_folder(&missing).is_err());
        assert!(!library.is_watching());
        assert!(library.start_watching().is_err());
        assert!(!library.is_watching());
    }

    #[test]
    fn new_album_folder_triggers_rescan() {
        let dir = tempdir().expect("tempdir");
        let library = test_library(true);
        library.select_folder(dir.path()).expect("scan");
        let version = library.version();
        assert_eq!(library.song_count(), 0);

        write_track(dir.path(), "NewAlbum/01.mp3", "title=Fresh\nalbum=New");

        let updated = wait_until(Duration::from_secs(10), || {
            library.version() > version
                && library.songs().iter().any(|track| track.title == "Fresh")
        });
        assert!(updated, "watcher did not pick up the new album");
        library.stop_watching();
    }

    #[test]
    fn folder_without_audio_is_ignored() {
        let dir = tempdir().expect("tempdir");
        let library = test_library(true);
        library.select_folder(dir.path()).expect("scan");
        let version = library.version();

        write_track(dir.path(), "Artwork/cover.jpg", "jpeg");
        thread::sleep(Duration::from_millis(600));

        assert_eq!(library.version(), version);
        library.stop_watching();
    }

    #[test]
    fn reselecting_replaces_the_watch() {
        let first = tempdir().expect("tempdir");
        let second = tempdir().expect("tempdir");
        let library = test_library(true);

        library.select_folder(first.path()).expect("scan");
        library.select_folder(second.path()).expect("scan");
        assert!(library.is_watching());
        let version = library.version();

        write_track(first.path(), "Old/01.mp3", "title=Stale");
        thread::sleep(Duration::from_millis(600));
        assert_eq!(library.version(), version);

        write_track(second.path(), "New/01.mp3", "title=Current");
        assert!(wait_until(Duration::from_secs(10), || library.version() > version));
        library.stop_watching();
    }

    #[test]
    fn watch_loop_ends_when_library_is_dropped() {
        let dir = tempdir().expect("tempdir");
        let library = test_library(true);
        library.select_folder(dir.path()).expect("scan");

        let previous = std::mem::replace(&mut *library.inner.watch.lock(), WatchState::Stopped);
        let active = match previous {
            WatchState::Watching(active) => active,
            WatchState::Stopped => panic!("watcher was not started"),
        };
        let weak = Arc::downgrade(&library.inner);
        drop(library);
        assert!(weak.upgrade().is_none());

        let ActiveWatch {
            watcher,
            control,
            handle,
            ..
        } = active;
        assert!(!handle.is_finished());
        drop(control);
        drop(watcher);

        assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
        handle.join().expect("watch loop");
    }

    #[test]
    fn stop_joins_the_watch_thread() {
        let dir = tempdir().expect("tempdir");
        let library = test_library(true);
        library.select_folder(dir.path()).expect("scan");

        let loop_thread = match &*library.inner.watch.lock() {
            WatchState::Watching(active) => active.handle.thread().clone(),
            WatchState::Stopped => panic!("watcher was not started"),
        };
        assert_eq!(loop_thread.name(), Some("library-watch"));

        library.stop_watching();
        assert!(!library.is_watching());
        assert!(matches!(*library.inner.watch.lock(), WatchState::Stopped));
    }

    #[test]
    fn only_creations_count() {
        let path = PathBuf::from("/music/New");
        let create = Event::new(EventKind::Create(CreateKind::Folder)).add_path(path.clone());
        assert_eq!(created_paths(&create), vec![path.clone()]);

        let moved_in = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(path.clone());
        assert_eq!(created_paths(&moved_in), vec![path.clone()]);

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/music/Old"))
            .add_path(path.clone());
        assert_eq!(created_paths(&renamed), vec![path.clone()]);

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::Folder))
            .add_path(path);
        assert!(created_paths(&removed).is_empty());
    }
}
