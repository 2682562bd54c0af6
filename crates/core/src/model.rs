use serde::{Deserialize, Serialize};

/// Parent collection of a playable item, e.g. the series an episode belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeriesKey {
    pub id: String,
    pub title: String,
}

/// A playable item together with its parent collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub item_id: String,
    pub series: SeriesKey,
}

/// What the user is doing right now, as mirrored to the presence service.
///
/// Equality is what suppresses redundant updates: submitting a value equal
/// to the current one is a complete no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Idle,
    Watching(MediaRef),
}

impl Presence {
    pub fn is_idle(&self) -> bool {
        matches!(self, Presence::Idle)
    }
}
