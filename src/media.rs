use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use songbird::input::{Compose, HttpRequest, Input, YoutubeDl};
use tracing::debug;

use crate::soundboard::MediaResolver;

const DIRECT_AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "mp4", "aac", "wav", "flac", "ogg", "opus"];

/// Turns clip URLs into songbird inputs. Plain audio files are fetched over
/// HTTP and decoded by symphonia; anything else goes through yt-dlp.
pub struct MediaHandler {
    client: Client,
}

impl MediaHandler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn input_for(&self, source_url: &str) -> Input {
        if is_direct_audio(source_url) {
            debug!("streaming {} as a direct audio file", source_url);
            HttpRequest::new(self.client.clone(), source_url.to_string()).into()
        } else {
            debug!("streaming {} through yt-dlp", source_url);
            YoutubeDl::new(self.client.clone(), source_url.to_string()).into()
        }
    }
}

impl Default for MediaHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn is_direct_audio(source_url: &str) -> bool {
    let path = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url);
    let Some(file_name) = path.rsplit('/').next() else {
        return false;
    };
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| {
            DIRECT_AUDIO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[async_trait]
impl MediaResolver for MediaHandler {
    async fn resolve_length(&self, source_url: &str) -> Option<Duration> {
        let metadata = if is_direct_audio(source_url) {
            HttpRequest::new(self.client.clone(), source_url.to_string())
                .aux_metadata()
                .await
        } else {
            YoutubeDl::new(self.client.clone(), source_url.to_string())
                .aux_metadata()
                .await
        };

        match metadata {
            Ok(metadata) => metadata.duration,
            Err(err) => {
                debug!("could not resolve clip length for {}: {}", source_url, err);
                None
            }
        }
    }
}
