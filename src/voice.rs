use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId};
use songbird::error::JoinError;
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent};
use songbird::Songbird;
use tracing::{debug, info, warn};

use crate::discord::parse_snowflake;
use crate::media::MediaHandler;
use crate::soundboard::{StreamHandle, StreamNotifier, VoiceError, VoiceHandle, VoiceTransport};

/// Voice transport backed by the songbird manager registered on the gateway
/// client.
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    media: Arc<MediaHandler>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>, media: Arc<MediaHandler>) -> Self {
        Self { manager, media }
    }
}

fn guild_id(raw: &str) -> Result<GuildId, VoiceError> {
    parse_snowflake(raw)
        .map(GuildId::new)
        .ok_or_else(|| VoiceError::NotConnected(raw.to_string()))
}

fn channel_id(raw: &str) -> Result<ChannelId, VoiceError> {
    parse_snowflake(raw)
        .map(ChannelId::new)
        .ok_or_else(|| VoiceError::JoinFailed(format!("invalid voice channel id {raw:?}")))
}

/// Forwards one kind of track event to the playback session.
#[derive(Clone)]
struct TrackNotifier {
    kind: TrackEvent,
    notifier: StreamNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        match self.kind {
            TrackEvent::Play => self.notifier.started().await,
            _ => {
                debug!(
                    session_id = %self.notifier.session_id(),
                    event = ?self.kind,
                    "clip track finished"
                );
                self.notifier.ended().await
            }
        }
        None
    }
}

#[async_trait]
impl VoiceTransport for SongbirdVoice {
    async fn join(&self, guild: &str, channel: &str) -> Result<VoiceHandle, VoiceError> {
        let guild_snowflake = guild_id(guild)?;
        let channel_snowflake = channel_id(channel)?;

        match self.manager.join(guild_snowflake, channel_snowflake).await {
            Ok(_call) => {
                info!("joined voice channel {} in guild {}", channel, guild);
                Ok(VoiceHandle {
                    guild_id: guild.to_string(),
                    channel_id: channel.to_string(),
                })
            }
            Err(err) => {
                // A failed join can leave a half-open call behind.
                if let Err(cleanup) = self.manager.remove(guild_snowflake).await {
                    debug!("no voice call to clean up in guild {}: {}", guild, cleanup);
                }
                Err(VoiceError::JoinFailed(err.to_string()))
            }
        }
    }

    async fn start_stream(
        &self,
        handle: &VoiceHandle,
        source_url: &str,
        notifier: StreamNotifier,
    ) -> Result<StreamHandle, VoiceError> {
        let call = self
            .manager
            .get(guild_id(&handle.guild_id)?)
            .ok_or_else(|| VoiceError::NotConnected(handle.guild_id.clone()))?;

        let input = self.media.input_for(source_url);
        let track = call.lock().await.play_only_input(input);

        for kind in [TrackEvent::Play, TrackEvent::End, TrackEvent::Error] {
            track
                .add_event(
                    Event::Track(kind),
                    TrackNotifier {
                        kind,
                        notifier: notifier.clone(),
                    },
                )
                .map_err(|err| VoiceError::StreamFailed(err.to_string()))?;
        }

        Ok(StreamHandle { id: track.uuid() })
    }

    async fn disconnect(&self, handle: &VoiceHandle) -> Result<(), VoiceError> {
        match self.manager.remove(guild_id(&handle.guild_id)?).await {
            Ok(()) => {
                info!("left voice channel in guild {}", handle.guild_id);
                Ok(())
            }
            Err(JoinError::NoCall) => {
                warn!("voice call in guild {} was already gone", handle.guild_id);
                Ok(())
            }
            Err(err) => Err(VoiceError::DisconnectFailed(err.to_string())),
        }
    }

    async fn active_connection(&self, guild: &str) -> Option<VoiceHandle> {
        let call = self.manager.get(guild_id(guild).ok()?)?;
        let channel = call.lock().await.current_channel()?;
        Some(VoiceHandle {
            guild_id: guild.to_string(),
            channel_id: channel.0.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{channel_id, guild_id};
    use crate::soundboard::VoiceError;

    #[test]
    fn ids_parse_into_serenity_snowflakes() {
        assert_eq!(guild_id("42").expect("guild").get(), 42);
        assert_eq!(channel_id("900").expect("channel").get(), 900);
    }

    #[test]
    fn bad_ids_map_to_voice_errors() {
        assert!(matches!(guild_id("nope"), Err(VoiceError::NotConnected(_))));
        assert!(matches!(channel_id("0"), Err(VoiceError::JoinFailed(_))));
    }
}
