use std::time::Duration;

use crate::walk::AudioFilter;

#[derive(Clone, Debug)]
pub struct LibraryOptions {
    /// File extensions treated as audio, without the dot.
    pub audio_extensions: Vec<String>,
    /// Start the folder watcher after `select_folder`.
    pub watch: bool,
    /// How long the watcher lets a burst of new folders settle before checking them.
    pub watch_debounce: Duration,
    /// Empty the visible catalog while a scan runs.
    pub clear_on_scan: bool,
}

impl LibraryOptions {
    pub fn audio_filter(&self) -> AudioFilter {
        AudioFilter::new(&self.audio_extensions)
    }
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            audio_extensions: vec!["mp3".to_string()],
            watch: true,
            watch_debounce: Duration::from_millis(500),
            clear_on_scan: true,
        }
    }
}
