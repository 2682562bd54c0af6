use std::collections::HashMap;
use std::sync::Mutex;

/// Lookup of how far into a series the user is, keyed by series id.
pub trait EpisodeTracker: Send + Sync {
    /// Episode number currently being watched, if known.
    fn episode_number(&self, series_id: &str) -> Option<u32>;
}

/// Tracker fed from playback reports; lives for the process lifetime.
#[derive(Debug, Default)]
pub struct InMemoryEpisodeTracker {
    episodes: Mutex<HashMap<String, u32>>,
}

impl InMemoryEpisodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, series_id: &str, episode: u32) {
        self.episodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(series_id.to_string(), episode);
    }
}

impl EpisodeTracker for InMemoryEpisodeTracker {
    fn episode_number(&self, series_id: &str) -> Option<u32> {
        self.episodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(series_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{EpisodeTracker, InMemoryEpisodeTracker};

    #[test]
    fn records_and_looks_up_by_series() {
        let tracker = InMemoryEpisodeTracker::new();
        assert_eq!(tracker.episode_number("srs-1"), None);

        tracker.record("srs-1", 4);
        tracker.record("srs-1", 5);

        assert_eq!(tracker.episode_number("srs-1"), Some(5));
        assert_eq!(tracker.episode_number("srs-2"), None);
    }
}
