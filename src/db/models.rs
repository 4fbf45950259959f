use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binds a trigger token to a clip inside one guild.
///
/// At most one mapping exists per `(guild_id, trigger)`; see [`mapping_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundMapping {
    pub guild_id: String,
    pub trigger: String,
    pub source_url: String,
    /// `None` (or any negative value, historically `-1`) plays the clip to its end.
    pub clip_duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SoundMapping {
    pub fn new(
        guild_id: impl Into<String>,
        trigger: impl Into<String>,
        source_url: impl Into<String>,
        clip_duration_seconds: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            guild_id: guild_id.into(),
            trigger: trigger.into(),
            source_url: source_url.into(),
            clip_duration_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> String {
        mapping_key(&self.guild_id, &self.trigger)
    }

    /// The cutoff length, if the stored value is usable as one.
    pub fn clip_duration(&self) -> Option<Duration> {
        self.clip_duration_seconds
            .filter(|secs| *secs >= 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

impl PartialEq for SoundMapping {
    fn eq(&self, other: &Self) -> bool {
        self.guild_id == other.guild_id
            && self.trigger == other.trigger
            && self.source_url == other.source_url
            && self.clip_duration_seconds == other.clip_duration_seconds
    }
}

/// Primary key of a mapping. Guild ids are numeric snowflakes, so the `:`
/// separator cannot be produced by the guild half.
pub fn mapping_key(guild_id: &str, trigger: &str) -> String {
    format!("{guild_id}:{trigger}")
}
