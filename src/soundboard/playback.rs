//! Bounded-duration playback sessions.
//!
//! A session moves `Idle -> Joining -> Streaming -> (Cutoff | NaturalEnd) ->
//! Released`. A failed join or stream start jumps straight to `Released`, and
//! a manual disconnect forces `Released` from any live state. Whatever the
//! path, the voice connection is released exactly once: the first caller to
//! flip `released` owns the release, every later caller is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::SoundMapping;

use super::transport::{
    MediaResolver, StreamHandle, StreamNotifier, VoiceError, VoiceHandle, VoiceTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Streaming,
    Cutoff,
    NaturalEnd,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    JoinFailed,
    StreamFailed,
    Cutoff,
    NaturalEnd,
    ManualDisconnect,
}

impl ReleaseReason {
    fn path_state(self) -> SessionState {
        match self {
            ReleaseReason::Cutoff => SessionState::Cutoff,
            ReleaseReason::NaturalEnd => SessionState::NaturalEnd,
            _ => SessionState::Released,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("a clip is already playing in guild {0}")]
    SessionActive(String),
    #[error(transparent)]
    Voice(#[from] VoiceError),
    #[error("playback session {0} was released before streaming started")]
    Cancelled(Uuid),
}

#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub guild_id: String,
    pub voice_channel_id: String,
    pub clip: SoundMapping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub guild_id: String,
    pub state: SessionState,
    pub deadline: Option<Instant>,
}

pub struct PlaybackSession {
    id: Uuid,
    guild_id: String,
    clip: SoundMapping,
    released: AtomicBool,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: SessionState,
    voice: Option<VoiceHandle>,
    stream: Option<StreamHandle>,
    deadline: Option<Instant>,
    cutoff: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    fn new(guild_id: String, clip: SoundMapping) -> Self {
        Self {
            id: Uuid::new_v4(),
            guild_id,
            clip,
            released: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                voice: None,
                stream: None,
                deadline: None,
                cutoff: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            id: self.id,
            guild_id: self.guild_id.clone(),
            state: inner.state,
            deadline: inner.deadline,
        }
    }
}

/// Owns the per-guild session registry. At most one session is live per
/// guild; a second request while one is live is rejected.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
}

pub struct ControllerInner {
    voice: Arc<dyn VoiceTransport>,
    media: Option<Arc<dyn MediaResolver>>,
    join_timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<PlaybackSession>>>,
}

impl PlaybackController {
    pub fn new(
        voice: Arc<dyn VoiceTransport>,
        media: Option<Arc<dyn MediaResolver>>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                voice,
                media,
                join_timeout,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runs a session up to the point where the clip is streaming. The rest
    /// of the lifecycle is driven by stream notifications and the cutoff timer.
    pub async fn play(&self, request: PlaybackRequest) -> Result<Uuid, PlaybackError> {
        let PlaybackRequest {
            guild_id,
            voice_channel_id,
            clip,
        } = request;

        let session = Arc::new(PlaybackSession::new(guild_id.clone(), clip));
        {
            let mut sessions = self.inner.sessions.lock();
            if sessions.contains_key(&guild_id) {
                debug!(guild_id = %guild_id, "rejecting playback, a session is already live");
                return Err(PlaybackError::SessionActive(guild_id));
            }
            session.inner.lock().state = SessionState::Joining;
            sessions.insert(guild_id.clone(), session.clone());
        }

        info!(
            session_id = %session.id,
            guild_id = %guild_id,
            trigger = %session.clip.trigger,
            "playback session joining voice channel {}",
            voice_channel_id
        );

        let joined = match tokio::time::timeout(
            self.inner.join_timeout,
            self.inner.voice.join(&guild_id, &voice_channel_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // The abandoned join may still have opened a call.
                let pending = VoiceHandle {
                    guild_id: guild_id.clone(),
                    channel_id: voice_channel_id.clone(),
                };
                if let Err(err) = self.inner.voice.disconnect(&pending).await {
                    warn!(session_id = %session.id, "failed to leave voice after join timeout: {err}");
                }
                Err(VoiceError::JoinTimedOut(self.inner.join_timeout))
            }
        };

        let handle = match joined {
            Ok(handle) => handle,
            Err(err) => {
                warn!(session_id = %session.id, guild_id = %guild_id, "voice join failed: {err}");
                self.inner
                    .release(&session, ReleaseReason::JoinFailed)
                    .await;
                self.inner.unregister(&session);
                return Err(err.into());
            }
        };

        let cancelled = {
            let mut inner = session.inner.lock();
            if session.is_released() {
                true
            } else {
                inner.voice = Some(handle.clone());
                inner.state = SessionState::Streaming;
                false
            }
        };
        if cancelled {
            debug!(session_id = %session.id, "session released while joining, leaving voice");
            if let Err(err) = self.inner.voice.disconnect(&handle).await {
                warn!(session_id = %session.id, "failed to leave voice after cancelled join: {err}");
            }
            self.inner.unregister(&session);
            return Err(PlaybackError::Cancelled(session.id));
        }

        let notifier = StreamNotifier::new(Arc::downgrade(&self.inner), session.clone());
        match self
            .inner
            .voice
            .start_stream(&handle, &session.clip.source_url, notifier)
            .await
        {
            Ok(stream) => {
                debug!(session_id = %session.id, stream_id = %stream.id, "clip stream requested");
                session.inner.lock().stream = Some(stream);
                Ok(session.id)
            }
            Err(err) => {
                warn!(session_id = %session.id, guild_id = %guild_id, "failed to start clip: {err}");
                self.inner
                    .release(&session, ReleaseReason::StreamFailed)
                    .await;
                Err(err.into())
            }
        }
    }

    /// Ends whatever the bot is doing in voice for `guild_id`. Returns whether
    /// anything was released.
    pub async fn disconnect(&self, guild_id: &str) -> bool {
        let session = self.inner.sessions.lock().get(guild_id).cloned();
        if let Some(session) = session {
            return self
                .inner
                .release(&session, ReleaseReason::ManualDisconnect)
                .await;
        }

        let Some(handle) = self.inner.voice.active_connection(guild_id).await else {
            debug!(guild_id = %guild_id, "disconnect requested without a voice connection");
            return false;
        };
        match self.inner.voice.disconnect(&handle).await {
            Ok(()) => {
                info!(guild_id = %guild_id, "left idle voice connection");
                true
            }
            Err(err) => {
                warn!(guild_id = %guild_id, "failed to leave idle voice connection: {err}");
                false
            }
        }
    }

    pub fn active_session(&self, guild_id: &str) -> Option<SessionSnapshot> {
        self.inner
            .sessions
            .lock()
            .get(guild_id)
            .map(|session| session.snapshot())
    }
}

impl ControllerInner {
    pub(super) fn stream_started(self: &Arc<Self>, session: &Arc<PlaybackSession>) {
        let mut inner = session.inner.lock();
        if session.is_released() || inner.state != SessionState::Streaming {
            debug!(session_id = %session.id, state = ?inner.state, "ignoring stream start");
            return;
        }
        if inner.deadline.is_some() {
            return;
        }

        let Some(length) = session.clip.clip_duration() else {
            debug!(session_id = %session.id, "clip has no cutoff, playing to natural end");
            return;
        };

        let Some(deadline) = Instant::now().checked_add(length) else {
            debug!(session_id = %session.id, cutoff = ?length, "cutoff out of range, playing to natural end");
            return;
        };
        inner.deadline = Some(deadline);

        let controller = Arc::downgrade(self);
        let target = session.clone();
        inner.cutoff = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(controller) = controller.upgrade() {
                controller.release(&target, ReleaseReason::Cutoff).await;
            }
        }));
        drop(inner);

        debug!(session_id = %session.id, cutoff = ?length, "cutoff scheduled");
        self.check_clip_length(session, length);
    }

    pub(super) async fn stream_ended(&self, session: &Arc<PlaybackSession>) {
        self.release(session, ReleaseReason::NaturalEnd).await;
    }

    async fn release(&self, session: &Arc<PlaybackSession>, reason: ReleaseReason) -> bool {
        if session
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session_id = %session.id, ?reason, "session already released");
            return false;
        }

        let (previous, voice, cutoff) = {
            let mut inner = session.inner.lock();
            let previous = inner.state;
            inner.state = reason.path_state();
            (previous, inner.voice.take(), inner.cutoff.take())
        };

        // The cutoff path runs inside the timer task itself.
        if reason != ReleaseReason::Cutoff {
            if let Some(task) = cutoff {
                task.abort();
            }
        }

        if let Some(voice) = voice {
            if let Err(err) = self.voice.disconnect(&voice).await {
                warn!(session_id = %session.id, "failed to release voice connection: {err}");
            }
        }

        session.inner.lock().state = SessionState::Released;

        // A join still in flight finishes the cleanup once it returns.
        if previous != SessionState::Joining {
            self.unregister(session);
        }

        info!(
            session_id = %session.id,
            guild_id = %session.guild_id,
            ?reason,
            "playback session released"
        );
        true
    }

    fn unregister(&self, session: &Arc<PlaybackSession>) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(&session.guild_id)
            .is_some_and(|live| Arc::ptr_eq(live, session))
        {
            sessions.remove(&session.guild_id);
        }
    }

    fn check_clip_length(&self, session: &Arc<PlaybackSession>, cutoff: Duration) {
        let Some(media) = self.media.clone() else {
            return;
        };
        let session_id = session.id;
        let source_url = session.clip.source_url.clone();
        tokio::spawn(async move {
            match media.resolve_length(&source_url).await {
                Some(length) if length < cutoff => debug!(
                    session_id = %session_id,
                    ?length,
                    ?cutoff,
                    "clip is shorter than its cutoff, natural end will win"
                ),
                Some(length) => {
                    debug!(session_id = %session_id, ?length, "clip length resolved")
                }
                None => debug!(session_id = %session_id, "clip length unknown"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{PlaybackController, PlaybackError, PlaybackRequest, SessionState};
    use crate::db::SoundMapping;
    use crate::soundboard::testing::{RecordingVoice, StaticMedia, VoiceCall};
    use crate::soundboard::transport::VoiceError;

    fn request(guild_id: &str, duration: Option<f64>) -> PlaybackRequest {
        PlaybackRequest {
            guild_id: guild_id.to_string(),
            voice_channel_id: "900".to_string(),
            clip: SoundMapping::new(guild_id, "clap", "u1", duration),
        }
    }

    fn controller(voice: &Arc<RecordingVoice>) -> PlaybackController {
        PlaybackController::new(voice.clone(), None, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn cutoff_releases_once_and_ignores_late_end() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", Some(5.0))).await.expect("play");
        assert_eq!(
            voice.calls(),
            vec![
                VoiceCall::Join("42".to_string(), "900".to_string()),
                VoiceCall::StartStream("42".to_string(), "u1".to_string()),
            ]
        );

        voice.notifier(0).started().await;
        let snapshot = controller.active_session("42").expect("live session");
        assert_eq!(snapshot.state, SessionState::Streaming);
        assert!(snapshot.deadline.is_some());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(voice.disconnect_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(voice.disconnect_count(), 1);
        assert!(controller.active_session("42").is_none());

        voice.notifier(0).ended().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(voice.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn natural_end_cancels_pending_cutoff() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", Some(30.0))).await.expect("play");
        voice.notifier(0).started().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        voice.notifier(0).ended().await;
        assert_eq!(voice.disconnect_count(), 1);
        assert!(controller.active_session("42").is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(voice.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clip_without_duration_plays_until_natural_end() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", None)).await.expect("play");
        voice.notifier(0).started().await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(voice.disconnect_count(), 0);
        let snapshot = controller.active_session("42").expect("live session");
        assert_eq!(snapshot.deadline, None);

        voice.notifier(0).ended().await;
        assert_eq!(voice.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_duration_is_treated_as_absent() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", Some(-1.0))).await.expect("play");
        voice.notifier(0).started().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(voice.disconnect_count(), 0);
        assert!(controller.active_session("42").is_some());
    }

    #[tokio::test]
    async fn join_failure_releases_without_streaming() {
        let voice = Arc::new(RecordingVoice::default());
        voice.fail_joins(true);
        let controller = controller(&voice);

        let result = controller.play(request("42", Some(5.0))).await;
        assert!(matches!(
            result,
            Err(PlaybackError::Voice(VoiceError::JoinFailed(_)))
        ));
        assert_eq!(
            voice.calls(),
            vec![VoiceCall::Join("42".to_string(), "900".to_string())]
        );
        assert!(controller.active_session("42").is_none());

        voice.fail_joins(false);
        controller
            .play(request("42", Some(5.0)))
            .await
            .expect("guild is free again after a failed join");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_join_times_out_and_leaves_voice() {
        let voice = Arc::new(RecordingVoice::default());
        voice.set_join_delay(Duration::from_secs(60));
        let controller = PlaybackController::new(voice.clone(), None, Duration::from_secs(2));

        let result = controller.play(request("42", None)).await;
        assert!(matches!(
            result,
            Err(PlaybackError::Voice(VoiceError::JoinTimedOut(_)))
        ));
        assert!(controller.active_session("42").is_none());
        assert_eq!(
            voice.calls(),
            vec![
                VoiceCall::Join("42".to_string(), "900".to_string()),
                VoiceCall::Disconnect("42".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_duration_plays_until_natural_end() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", Some(1e19))).await.expect("play");
        voice.notifier(0).started().await;

        let snapshot = controller.active_session("42").expect("live session");
        assert_eq!(snapshot.state, SessionState::Streaming);
        assert_eq!(snapshot.deadline, None);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(voice.disconnect_count(), 0);

        voice.notifier(0).ended().await;
        assert_eq!(voice.disconnect_count(), 1);
        assert!(controller.active_session("42").is_none());
    }

    #[tokio::test]
    async fn stream_failure_releases_the_connection() {
        let voice = Arc::new(RecordingVoice::default());
        voice.fail_streams(true);
        let controller = controller(&voice);

        let result = controller.play(request("42", Some(5.0))).await;
        assert!(matches!(
            result,
            Err(PlaybackError::Voice(VoiceError::StreamFailed(_)))
        ));
        assert_eq!(voice.disconnect_count(), 1);
        assert!(controller.active_session("42").is_none());
    }

    #[tokio::test]
    async fn second_session_in_same_guild_is_rejected() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", None)).await.expect("first play");
        let second = controller.play(request("42", None)).await;
        assert!(matches!(second, Err(PlaybackError::SessionActive(guild)) if guild == "42"));

        controller
            .play(request("43", None))
            .await
            .expect("other guilds get their own session");
        assert_eq!(voice.join_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_cancels_cutoff() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        controller.play(request("42", Some(5.0))).await.expect("play");
        voice.notifier(0).started().await;

        assert!(controller.disconnect("42").await);
        assert_eq!(voice.disconnect_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        voice.notifier(0).ended().await;
        assert_eq!(voice.disconnect_count(), 1);
        assert!(!controller.disconnect("42").await);
    }

    #[tokio::test]
    async fn manual_disconnect_while_joining_leaves_once_join_returns() {
        let voice = Arc::new(RecordingVoice::default());
        let gate = voice.gate_joins();
        let controller = controller(&voice);

        let playing = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.play(request("42", Some(5.0))).await })
        };
        while controller
            .active_session("42")
            .is_none_or(|s| s.state != SessionState::Joining)
        {
            tokio::task::yield_now().await;
        }

        assert!(controller.disconnect("42").await);
        assert_eq!(voice.disconnect_count(), 0);

        gate.notify_one();
        let result = playing.await.expect("join task");
        assert!(matches!(result, Err(PlaybackError::Cancelled(_))));
        assert_eq!(voice.disconnect_count(), 1);
        assert_eq!(voice.stream_count(), 0);
        assert!(controller.active_session("42").is_none());
    }

    #[tokio::test]
    async fn disconnect_leaves_idle_connection() {
        let voice = Arc::new(RecordingVoice::default());
        let controller = controller(&voice);

        assert!(!controller.disconnect("42").await);
        assert_eq!(voice.disconnect_count(), 0);

        voice.set_idle_connection("42", "900");
        assert!(controller.disconnect("42").await);
        assert_eq!(voice.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_length_does_not_block_cutoff() {
        let voice = Arc::new(RecordingVoice::default());
        let media = Arc::new(StaticMedia::new(None, Duration::from_secs(3600)));
        let controller = PlaybackController::new(voice.clone(), Some(media), Duration::from_secs(10));

        controller.play(request("42", Some(2.0))).await.expect("play");
        voice.notifier(0).started().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(voice.disconnect_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_cutoff_and_natural_end_release_exactly_once() {
        for round in 0..200 {
            let voice = Arc::new(RecordingVoice::default());
            let controller = controller(&voice);

            controller.play(request("42", Some(0.0))).await.expect("play");
            let notifier = voice.notifier(0);

            let ending = {
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    for _ in 0..(round % 4) {
                        tokio::task::yield_now().await;
                    }
                    notifier.ended().await;
                })
            };
            notifier.started().await;
            ending.await.expect("end task");

            while controller.active_session("42").is_some() {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(voice.disconnect_count(), 1, "round {round}");
        }
    }
}
