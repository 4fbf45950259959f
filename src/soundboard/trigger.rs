use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::MappingStore;

use super::SoundboardError;
use super::playback::{PlaybackController, PlaybackError, PlaybackRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    NoMatch,
    /// The text is a trigger but the author is not in a voice channel.
    NoVoicePresence,
    Started(Uuid),
    /// A session is already live in the guild.
    Busy,
    /// The session was attempted and released early; nothing is playing.
    Failed,
}

/// Looks the raw message text up as a trigger in the author's guild.
pub struct TriggerMatcher {
    store: Arc<dyn MappingStore>,
    playback: PlaybackController,
}

impl TriggerMatcher {
    pub fn new(store: Arc<dyn MappingStore>, playback: PlaybackController) -> Self {
        Self { store, playback }
    }

    pub async fn on_message(
        &self,
        guild_id: &str,
        text: &str,
        voice_channel_id: Option<&str>,
    ) -> Result<TriggerOutcome, SoundboardError> {
        let Some(clip) = self.store.get_mapping(guild_id, text).await? else {
            return Ok(TriggerOutcome::NoMatch);
        };

        let Some(voice_channel_id) = voice_channel_id else {
            debug!(guild_id = %guild_id, trigger = %clip.trigger, "trigger author is not in voice");
            return Ok(TriggerOutcome::NoVoicePresence);
        };

        let request = PlaybackRequest {
            guild_id: guild_id.to_string(),
            voice_channel_id: voice_channel_id.to_string(),
            clip,
        };
        match self.playback.play(request).await {
            Ok(session_id) => Ok(TriggerOutcome::Started(session_id)),
            Err(PlaybackError::SessionActive(_)) => Ok(TriggerOutcome::Busy),
            Err(err) => {
                warn!(guild_id = %guild_id, "playback did not start: {err}");
                Ok(TriggerOutcome::Failed)
            }
        }
    }
}
