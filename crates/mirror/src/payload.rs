use serde::{Deserialize, Serialize};
use watch_presence_core::{urls, AssetsConfig, EpisodeTracker, Presence};

pub const IDLE_STATE: &str = "Just Chilling";
pub const IDLE_DETAILS: &str = "About to start watching";

const WATCHING_STATE: &str = "Watching";
const HIDDEN_DETAILS: &str = "A series";

/// Discord activity type for "Watching ...".
const ACTIVITY_WATCHING: u8 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadButton {
    pub label: String,
    pub url: String,
}

/// What actually goes over the wire: a state line, a details line, icon
/// identifiers with captions, and up to two buttons.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityPayload {
    pub activity_type: u8,
    pub name: String,
    pub details: String,
    pub state: String,
    pub large_image: Option<String>,
    pub large_text: Option<String>,
    pub small_image: Option<String>,
    pub small_text: Option<String>,
    pub buttons: Vec<PayloadButton>,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub show_title: bool,
    pub enable_buttons: bool,
    pub assets: AssetsConfig,
}

/// Turn the current presence into a presentation payload.
///
/// When titles may not be revealed, nothing in the payload identifies the
/// series: no title, no episode number, no search button.
pub fn render(
    presence: &Presence,
    tracker: &dyn EpisodeTracker,
    opts: &RenderOptions,
) -> ActivityPayload {
    match presence {
        Presence::Idle => ActivityPayload {
            activity_type: ACTIVITY_WATCHING,
            name: WATCHING_STATE.to_string(),
            details: IDLE_DETAILS.to_string(),
            state: IDLE_STATE.to_string(),
            large_image: opts.assets.large_image.clone(),
            large_text: opts.assets.large_text.clone(),
            small_image: opts.assets.idle_small_image.clone(),
            small_text: Some("Idle".to_string()),
            buttons: Vec::new(),
        },
        Presence::Watching(media) => {
            let (details, state, buttons) = if opts.show_title {
                let state = match tracker.episode_number(&media.series.id) {
                    Some(n) => format!("{WATCHING_STATE} Episode {n}"),
                    None => WATCHING_STATE.to_string(),
                };
                let mut buttons = Vec::new();
                if opts.enable_buttons {
                    buttons.push(PayloadButton {
                        label: "Find this series".to_string(),
                        url: urls::series_search_url(&media.series.title),
                    });
                }
                buttons.truncate(2);
                (media.series.title.clone(), state, buttons)
            } else {
                (
                    HIDDEN_DETAILS.to_string(),
                    WATCHING_STATE.to_string(),
                    Vec::new(),
                )
            };

            ActivityPayload {
                activity_type: ACTIVITY_WATCHING,
                name: WATCHING_STATE.to_string(),
                details,
                state,
                large_image: opts.assets.large_image.clone(),
                large_text: opts.assets.large_text.clone(),
                small_image: opts.assets.watching_small_image.clone(),
                small_text: Some(WATCHING_STATE.to_string()),
                buttons,
            }
        }
    }
}
