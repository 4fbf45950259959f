use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::playback::{ControllerInner, PlaybackSession};

/// An acquired voice connection for one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceHandle {
    pub guild_id: String,
    pub channel_id: String,
}

/// A clip stream started on a [`VoiceHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: Uuid,
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("failed to join voice channel: {0}")]
    JoinFailed(String),
    #[error("joining voice channel timed out after {0:?}")]
    JoinTimedOut(Duration),
    #[error("not connected to voice in guild {0}")]
    NotConnected(String),
    #[error("failed to start stream: {0}")]
    StreamFailed(String),
    #[error("failed to disconnect from voice: {0}")]
    DisconnectFailed(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()>;
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, guild_id: &str, channel_id: &str) -> Result<VoiceHandle, VoiceError>;

    /// Starts playing `source_url`. Stream start and end are reported through
    /// `notifier`, never by the return value.
    async fn start_stream(
        &self,
        handle: &VoiceHandle,
        source_url: &str,
        notifier: StreamNotifier,
    ) -> Result<StreamHandle, VoiceError>;

    async fn disconnect(&self, handle: &VoiceHandle) -> Result<(), VoiceError>;

    /// A connection the bot holds in `guild_id` outside of any playback session.
    async fn active_connection(&self, guild_id: &str) -> Option<VoiceHandle>;
}

/// Advisory clip metadata. `None` means the length could not be resolved.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve_length(&self, source_url: &str) -> Option<Duration>;
}

/// Routes stream notifications for one playback session back to the
/// controller that started it. Notifications for a session that has already
/// been released are ignored.
#[derive(Clone)]
pub struct StreamNotifier {
    controller: Weak<ControllerInner>,
    session: Arc<PlaybackSession>,
}

impl StreamNotifier {
    pub(super) fn new(controller: Weak<ControllerInner>, session: Arc<PlaybackSession>) -> Self {
        Self {
            controller,
            session,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub async fn started(&self) {
        if let Some(controller) = self.controller.upgrade() {
            ControllerInner::stream_started(&controller, &self.session);
        }
    }

    pub async fn ended(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.stream_ended(&self.session).await;
        }
    }
}

impl std::fmt::Debug for StreamNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamNotifier")
            .field("session", &self.session.id())
            .finish()
    }
}
