use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::transport::{OutboundMedia, Transport};

/// Recording transport for tests: sends are captured, media bytes are served
/// from a canned map (missing refs fail like a dead gateway).
#[derive(Default)]
pub struct MockTransport {
    texts: Mutex<Vec<(String, String)>>,
    media: Mutex<Vec<(String, OutboundMedia)>>,
    media_bytes: Mutex<HashMap<String, Vec<u8>>>,
    failing_destinations: Mutex<HashSet<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_media(&self, media_ref: &str, bytes: Vec<u8>) {
        self.media_bytes
            .lock()
            .unwrap()
            .insert(media_ref.to_string(), bytes);
    }

    pub fn fail_sends_to(&self, destination: &str) {
        self.failing_destinations
            .lock()
            .unwrap()
            .insert(destination.to_string());
    }

    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn sent_media(&self) -> Vec<(String, OutboundMedia)> {
        self.media.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, to: &str, text: &str) -> EngineResult<()> {
        if self.failing_destinations.lock().unwrap().contains(to) {
            return Err(EngineError::Transport(format!("send to {to} refused")));
        }
        self.texts
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_media(&self, to: &str, media: OutboundMedia) -> EngineResult<()> {
        if self.failing_destinations.lock().unwrap().contains(to) {
            return Err(EngineError::Transport(format!("send to {to} refused")));
        }
        self.media.lock().unwrap().push((to.to_string(), media));
        Ok(())
    }

    async fn fetch_media(&self, media_ref: &str) -> EngineResult<Vec<u8>> {
        self.media_bytes
            .lock()
            .unwrap()
            .get(media_ref)
            .cloned()
            .ok_or_else(|| EngineError::Transport(format!("media {media_ref} unavailable")))
    }
}
