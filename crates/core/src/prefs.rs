use crate::config::PreferencesConfig;
use std::sync::atomic::{AtomicBool, Ordering};

/// User toggles consulted at every decision point.
///
/// Implementations must return the current value on every call; callers
/// never cache the result.
pub trait Preferences: Send + Sync {
    /// Whether the user wants their activity mirrored at all.
    fn presence_enabled(&self) -> bool;

    /// Whether status text may identify the series being watched.
    fn show_title(&self) -> bool;
}

/// Preference store backed by the last loaded configuration snapshot.
///
/// The application overwrites the snapshot whenever the config file is
/// reloaded, so reads always observe the latest toggle values.
#[derive(Debug)]
pub struct SharedPreferences {
    presence_enabled: AtomicBool,
    show_title: AtomicBool,
}

impl SharedPreferences {
    pub fn new(initial: PreferencesConfig) -> Self {
        Self {
            presence_enabled: AtomicBool::new(initial.presence_enabled),
            show_title: AtomicBool::new(initial.show_title),
        }
    }

    pub fn replace(&self, prefs: PreferencesConfig) {
        self.presence_enabled
            .store(prefs.presence_enabled, Ordering::Relaxed);
        self.show_title.store(prefs.show_title, Ordering::Relaxed);
    }
}

impl Preferences for SharedPreferences {
    fn presence_enabled(&self) -> bool {
        self.presence_enabled.load(Ordering::Relaxed)
    }

    fn show_title(&self) -> bool {
        self.show_title.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::{Preferences, SharedPreferences};
    use crate::config::PreferencesConfig;

    #[test]
    fn replace_is_visible_on_next_read() {
        let prefs = SharedPreferences::new(PreferencesConfig {
            presence_enabled: true,
            show_title: true,
        });
        assert!(prefs.presence_enabled());

        prefs.replace(PreferencesConfig {
            presence_enabled: false,
            show_title: true,
        });
        assert!(!prefs.presence_enabled());
        assert!(prefs.show_title());
    }
}
