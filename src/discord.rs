use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayIntents, GuildId, Http,
    Message as SerenityMessage, Ready, UserId,
};
use songbird::{SerenityInit, Songbird};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, error, info};

use crate::config::DiscordConfig;
use crate::soundboard::{ChatTransport, InboundMessage, Soundboard};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DiscordClient {
    bot_token: Arc<SecretString>,
    voice: Arc<Songbird>,
    send_lock: Arc<tokio::sync::Mutex<()>>,
    login_state: Arc<tokio::sync::Mutex<DiscordLoginState>>,
    soundboard: Arc<RwLock<Option<Arc<Soundboard>>>>,
    http: Arc<RwLock<Option<Arc<Http>>>>,
}

#[derive(Default)]
struct DiscordLoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

struct ReadySignalHandler {
    ready_sender: Arc<tokio::sync::Mutex<Option<oneshot::Sender<()>>>>,
    soundboard: Arc<RwLock<Option<Arc<Soundboard>>>>,
}

#[serenity::async_trait]
impl SerenityEventHandler for ReadySignalHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!("connected to discord gateway");
        info!("logged in as {} ({})", ready.user.tag(), ready.user.id);
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
    }

    async fn message(&self, ctx: SerenityContext, msg: SerenityMessage) {
        let soundboard = self.soundboard.read().await.clone();
        let Some(soundboard) = soundboard else {
            debug!("ignoring discord message before soundboard binding");
            return;
        };

        let voice_channel_id = msg
            .guild_id
            .and_then(|guild_id| author_voice_channel(&ctx, guild_id, msg.author.id));
        let inbound = inbound_message(
            msg.guild_id,
            msg.channel_id,
            msg.author.id,
            msg.author.bot,
            &msg.content,
            voice_channel_id,
        );

        if let Err(err) = soundboard.handle_message(&inbound).await {
            error!("failed to handle discord message {}: {err}", msg.id);
        }
    }
}

/// The voice channel `user_id` currently sits in, from the gateway cache.
fn author_voice_channel(
    ctx: &SerenityContext,
    guild_id: GuildId,
    user_id: UserId,
) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

fn inbound_message(
    guild_id: Option<GuildId>,
    channel_id: ChannelId,
    author_id: UserId,
    is_bot_author: bool,
    content: &str,
    voice_channel_id: Option<ChannelId>,
) -> InboundMessage {
    InboundMessage {
        guild_id: guild_id.map(|id| id.to_string()),
        channel_id: channel_id.to_string(),
        author_id: author_id.to_string(),
        is_bot_author,
        text: content.to_string(),
        voice_channel_id: voice_channel_id.map(|id| id.to_string()),
    }
}

/// Parses a Discord snowflake. Zero is rejected since serenity ids are non-zero.
pub(crate) fn parse_snowflake(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig, voice: Arc<Songbird>) -> Self {
        info!("initializing discord client");
        Self {
            bot_token: Arc::new(SecretString::from(config.bot_token.clone())),
            voice,
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
            login_state: Arc::new(tokio::sync::Mutex::new(DiscordLoginState::default())),
            soundboard: Arc::new(RwLock::new(None)),
            http: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_soundboard(&self, soundboard: Arc<Soundboard>) {
        *self.soundboard.write().await = Some(soundboard);
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_VOICE_STATES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = ReadySignalHandler {
            ready_sender: Arc::new(tokio::sync::Mutex::new(Some(ready_tx))),
            soundboard: self.soundboard.clone(),
        };

        let mut gateway_client =
            SerenityClient::builder(self.bot_token.expose_secret(), intents)
                .event_handler(event_handler)
                .register_songbird_with(self.voice.clone())
                .await
                .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        let http = gateway_client.http.clone();
        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match self.await_ready(http, ready_rx, READY_TIMEOUT).await {
            Ok(()) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Err(err) => {
                gateway_task.abort();
                Err(err)
            }
        }
    }

    /// Publishes the REST handle, then waits for Ready. The handle is
    /// withdrawn again if Ready never arrives.
    async fn await_ready(
        &self,
        http: Arc<Http>,
        ready_rx: oneshot::Receiver<()>,
        ready_timeout: Duration,
    ) -> Result<()> {
        *self.http.write().await = Some(http);

        let result = match tokio::time::timeout(ready_timeout, ready_rx).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(_)) => Err(anyhow!("discord gateway exited before receiving Ready event")),
            Err(_) => Err(anyhow!("timed out waiting for discord Ready event")),
        };
        *self.http.write().await = None;
        result
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = next_retry_seconds(retry_seconds);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        *self.http.write().await = None;
        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }

    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<String> {
        let channel = parse_snowflake(channel_id)
            .map(ChannelId::new)
            .ok_or_else(|| anyhow!("invalid discord channel id {channel_id:?}"))?;
        let http = self
            .http
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("discord client is not logged in"))?;

        let _guard = self.send_lock.lock().await;
        let sent = channel
            .say(&http, content)
            .await
            .map_err(|err| anyhow!("failed to send message to discord channel {channel_id}: {err}"))?;

        debug!("sent message {} to discord channel {}", sent.id, channel_id);
        Ok(sent.id.to_string())
    }
}

fn next_retry_seconds(current: u64) -> u64 {
    (current * 2).min(MAX_LOGIN_RETRY_SECONDS)
}

#[async_trait]
impl ChatTransport for DiscordClient {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        self.send_message(channel_id, text).await.map(|_| ())
    }
}
