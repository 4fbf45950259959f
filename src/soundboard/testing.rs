//! Recording collaborators for exercising the core without Discord.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::db::{DatabaseError, MappingStore, SoundMapping};

use super::transport::{
    ChatTransport, MediaResolver, StreamHandle, StreamNotifier, VoiceError, VoiceHandle,
    VoiceTransport,
};

#[derive(Default)]
pub struct MemoryMappingStore {
    rows: Mutex<BTreeMap<String, SoundMapping>>,
}

impl MemoryMappingStore {
    pub fn insert(&self, mapping: SoundMapping) {
        self.rows.lock().insert(mapping.key(), mapping);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn upsert_mapping(&self, mapping: &SoundMapping) -> Result<(), DatabaseError> {
        self.insert(mapping.clone());
        Ok(())
    }

    async fn get_mapping(
        &self,
        guild_id: &str,
        trigger: &str,
    ) -> Result<Option<SoundMapping>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .get(&crate::db::models::mapping_key(guild_id, trigger))
            .cloned())
    }

    async fn remove_mapping(&self, guild_id: &str, trigger: &str) -> Result<(), DatabaseError> {
        self.rows
            .lock()
            .remove(&crate::db::models::mapping_key(guild_id, trigger));
        Ok(())
    }

    async fn list_mappings(&self, guild_id: &str) -> Result<Vec<SoundMapping>, DatabaseError> {
        let mut rows: Vec<SoundMapping> = self
            .rows
            .lock()
            .values()
            .filter(|m| m.guild_id == guild_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.trigger.cmp(&b.trigger));
        Ok(rows)
    }
}

pub struct FailingStore;

fn unavailable() -> DatabaseError {
    DatabaseError::Connection("database is unavailable".to_string())
}

#[async_trait]
impl MappingStore for FailingStore {
    async fn upsert_mapping(&self, _mapping: &SoundMapping) -> Result<(), DatabaseError> {
        Err(unavailable())
    }

    async fn get_mapping(
        &self,
        _guild_id: &str,
        _trigger: &str,
    ) -> Result<Option<SoundMapping>, DatabaseError> {
        Err(unavailable())
    }

    async fn remove_mapping(&self, _guild_id: &str, _trigger: &str) -> Result<(), DatabaseError> {
        Err(unavailable())
    }

    async fn list_mappings(&self, _guild_id: &str) -> Result<Vec<SoundMapping>, DatabaseError> {
        Err(unavailable())
    }
}

#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("channel {channel_id} is unreachable"));
        }
        self.sent
            .lock()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCall {
    Join(String, String),
    StartStream(String, String),
    Disconnect(String),
}

#[derive(Default)]
pub struct RecordingVoice {
    calls: Mutex<Vec<VoiceCall>>,
    notifiers: Mutex<Vec<StreamNotifier>>,
    fail_join: AtomicBool,
    fail_stream: AtomicBool,
    join_delay: Mutex<Option<Duration>>,
    join_gate: Mutex<Option<Arc<Notify>>>,
    idle: Mutex<Option<VoiceHandle>>,
}

impl RecordingVoice {
    pub fn calls(&self) -> Vec<VoiceCall> {
        self.calls.lock().clone()
    }

    fn count(&self, pred: impl Fn(&VoiceCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }

    pub fn join_count(&self) -> usize {
        self.count(|call| matches!(call, VoiceCall::Join(..)))
    }

    pub fn stream_count(&self) -> usize {
        self.count(|call| matches!(call, VoiceCall::StartStream(..)))
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|call| matches!(call, VoiceCall::Disconnect(..)))
    }

    /// The notifier handed over by the `index`th stream start.
    pub fn notifier(&self, index: usize) -> StreamNotifier {
        self.notifiers.lock()[index].clone()
    }

    pub fn fail_joins(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn fail_streams(&self, fail: bool) {
        self.fail_stream.store(fail, Ordering::SeqCst);
    }

    pub fn set_join_delay(&self, delay: Duration) {
        *self.join_delay.lock() = Some(delay);
    }

    /// Makes every join wait until the returned `Notify` is signalled.
    pub fn gate_joins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.join_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn set_idle_connection(&self, guild_id: &str, channel_id: &str) {
        *self.idle.lock() = Some(VoiceHandle {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
        });
    }
}

#[async_trait]
impl VoiceTransport for RecordingVoice {
    async fn join(&self, guild_id: &str, channel_id: &str) -> Result<VoiceHandle, VoiceError> {
        self.calls.lock().push(VoiceCall::Join(
            guild_id.to_string(),
            channel_id.to_string(),
        ));

        let delay = *self.join_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let gate = self.join_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_join.load(Ordering::SeqCst) {
            return Err(VoiceError::JoinFailed("missing connect permission".to_string()));
        }
        Ok(VoiceHandle {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
        })
    }

    async fn start_stream(
        &self,
        handle: &VoiceHandle,
        source_url: &str,
        notifier: StreamNotifier,
    ) -> Result<StreamHandle, VoiceError> {
        self.calls.lock().push(VoiceCall::StartStream(
            handle.guild_id.clone(),
            source_url.to_string(),
        ));
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(VoiceError::StreamFailed("unsupported source".to_string()));
        }
        self.notifiers.lock().push(notifier);
        Ok(StreamHandle { id: Uuid::new_v4() })
    }

    async fn disconnect(&self, handle: &VoiceHandle) -> Result<(), VoiceError> {
        self.calls
            .lock()
            .push(VoiceCall::Disconnect(handle.guild_id.clone()));
        let mut idle = self.idle.lock();
        if idle.as_ref().is_some_and(|h| h.guild_id == handle.guild_id) {
            *idle = None;
        }
        Ok(())
    }

    async fn active_connection(&self, guild_id: &str) -> Option<VoiceHandle> {
        self.idle
            .lock()
            .clone()
            .filter(|handle| handle.guild_id == guild_id)
    }
}

pub struct StaticMedia {
    length: Option<Duration>,
    delay: Duration,
}

impl StaticMedia {
    pub fn new(length: Option<Duration>, delay: Duration) -> Self {
        Self { length, delay }
    }
}

#[async_trait]
impl MediaResolver for StaticMedia {
    async fn resolve_length(&self, _source_url: &str) -> Option<Duration> {
        tokio::time::sleep(self.delay).await;
        self.length
    }
}
