//! The soundboard core: command handling, trigger matching, and playback
//! sessions. Everything outside this module is an adapter to Discord, voice,
//! or storage.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{DatabaseError, MappingStore};
use crate::parsers::parse_prefixed_command;

pub mod commands;
pub(crate) mod logic;
pub mod playback;
pub mod transport;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use self::commands::{CommandContext, CommandDispatcher, CommandOutcome};
pub use self::playback::PlaybackController;
pub use self::transport::{
    ChatTransport, MediaResolver, StreamHandle, StreamNotifier, VoiceError, VoiceHandle,
    VoiceTransport,
};
pub use self::trigger::{TriggerMatcher, TriggerOutcome};

use self::logic::STORAGE_UNAVAILABLE_REPLY;

#[derive(Debug, Error)]
pub enum SoundboardError {
    #[error("mapping storage unavailable: {0}")]
    StorageUnavailable(#[from] DatabaseError),
    #[error("failed to send chat message: {0}")]
    Chat(String),
}

/// A chat message as the core sees it.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    /// `None` for direct messages.
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub author_id: String,
    pub is_bot_author: bool,
    pub text: String,
    /// The voice channel the author is connected to, if any.
    pub voice_channel_id: Option<String>,
}

impl InboundMessage {
    pub fn has_voice_presence(&self) -> bool {
        self.voice_channel_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Ignored,
    Command(CommandOutcome),
    Trigger(TriggerOutcome),
    StorageUnavailable,
}

pub struct Soundboard {
    prefix: String,
    reply_on_rejected: bool,
    chat: Arc<dyn ChatTransport>,
    commands: CommandDispatcher,
    triggers: TriggerMatcher,
}

impl Soundboard {
    pub fn new(
        prefix: impl Into<String>,
        reply_on_rejected: bool,
        store: Arc<dyn MappingStore>,
        chat: Arc<dyn ChatTransport>,
        playback: PlaybackController,
    ) -> Self {
        let prefix = prefix.into();
        Self {
            commands: CommandDispatcher::new(prefix.clone(), store.clone(), playback.clone()),
            triggers: TriggerMatcher::new(store, playback),
            prefix,
            reply_on_rejected,
            chat,
        }
    }

    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> Result<MessageOutcome, SoundboardError> {
        if message.is_bot_author {
            return Ok(MessageOutcome::Ignored);
        }

        if let Some(command) = parse_prefixed_command(&message.text, &self.prefix) {
            let ctx = CommandContext {
                guild_id: message.guild_id.as_deref(),
                author_id: &message.author_id,
            };
            return match self.commands.dispatch(&command, &ctx).await {
                Ok(outcome) => {
                    self.reply_to(message, &outcome).await?;
                    Ok(MessageOutcome::Command(outcome))
                }
                Err(SoundboardError::StorageUnavailable(err)) => {
                    warn!(command = %command.name, "command aborted, storage unavailable: {err}");
                    self.send(&message.channel_id, STORAGE_UNAVAILABLE_REPLY)
                        .await?;
                    Ok(MessageOutcome::StorageUnavailable)
                }
                Err(err) => Err(err),
            };
        }

        let Some(guild_id) = message.guild_id.as_deref() else {
            return Ok(MessageOutcome::Ignored);
        };
        match self
            .triggers
            .on_message(guild_id, &message.text, message.voice_channel_id.as_deref())
            .await
        {
            Ok(outcome) => {
                debug!(
                    guild_id = %guild_id,
                    in_voice = message.has_voice_presence(),
                    ?outcome,
                    "trigger lookup finished"
                );
                Ok(MessageOutcome::Trigger(outcome))
            }
            // Plain chat never gets a reply, not even when storage is down.
            Err(SoundboardError::StorageUnavailable(err)) => {
                warn!(guild_id = %guild_id, "trigger lookup failed: {err}");
                Ok(MessageOutcome::StorageUnavailable)
            }
            Err(err) => Err(err),
        }
    }

    async fn reply_to(
        &self,
        message: &InboundMessage,
        outcome: &CommandOutcome,
    ) -> Result<(), SoundboardError> {
        match outcome {
            CommandOutcome::Handled { replies } => {
                for reply in replies {
                    self.send(&message.channel_id, reply).await?;
                }
            }
            CommandOutcome::Rejected(reason) if self.reply_on_rejected => {
                self.send(&message.channel_id, &reason.hint(&self.prefix))
                    .await?;
            }
            CommandOutcome::Rejected(_) | CommandOutcome::Ignored => {}
        }
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SoundboardError> {
        self.chat
            .send_text(channel_id, text)
            .await
            .map_err(|e| SoundboardError::Chat(e.to_string()))
    }
}
