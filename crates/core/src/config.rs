use serde::{Deserialize, Serialize};

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIntervals {
    pub file_watch_poll_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            file_watch_poll_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreferencesConfig {
    pub presence_enabled: bool,
    pub show_title: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            presence_enabled: true,
            show_title: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    pub large_image: Option<String>,
    pub large_text: Option<String>,
    pub idle_small_image: Option<String>,
    pub watching_small_image: Option<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            large_image: Some("app_icon".to_string()),
            large_text: Some("watch-presence".to_string()),
            idle_small_image: Some("idle".to_string()),
            watching_small_image: Some("play".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub discord_app_id: String,
    pub listen_addr: String,
    pub log_level: String,
    pub enable_buttons: bool,
    pub preferences: PreferencesConfig,
    pub intervals: ConfigIntervals,
    pub assets: AssetsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            discord_app_id: "YOUR_DISCORD_APP_ID".to_string(),
            listen_addr: "127.0.0.1:48272".to_string(),
            log_level: "info".to_string(),
            enable_buttons: true,
            preferences: PreferencesConfig::default(),
            intervals: ConfigIntervals::default(),
            assets: AssetsConfig::default(),
        }
    }
}
