pub mod config;
pub mod model;
pub mod prefs;
pub mod tracker;
pub mod urls;

pub use config::{AppConfig, AssetsConfig, ConfigIntervals, PreferencesConfig};
pub use model::{MediaRef, Presence, SeriesKey};
pub use prefs::{Preferences, SharedPreferences};
pub use tracker::{EpisodeTracker, InMemoryEpisodeTracker};
