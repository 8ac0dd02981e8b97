use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::{Speaker, TranscriptEvent, TranscriptSink};
use crate::nats::NatsClient;

/// Keeps every session's events in memory
#[derive(Default)]
pub struct MemoryTranscriptSink {
    events: RwLock<HashMap<String, Vec<TranscriptEvent>>>,
}

impl MemoryTranscriptSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded for a session, oldest first
    pub async fn events(&self, session_id: &str) -> Vec<TranscriptEvent> {
        self.events
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a session's events
    pub async fn remove(&self, session_id: &str) -> usize {
        self.events
            .write()
            .await
            .remove(session_id)
            .map_or(0, |events| events.len())
    }

    pub async fn len(&self, session_id: &str) -> usize {
        self.events
            .read()
            .await
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl TranscriptSink for MemoryTranscriptSink {
    async fn record(&self, session_id: &str, event: &TranscriptEvent) -> Result<()> {
        self.events
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    session_id: &'a str,
    timestamp: String,
    speaker: Speaker,
    text: &'a str,
}

/// Appends events to `<directory>/<session_id>.jsonl`
pub struct JsonlTranscriptSink {
    directory: PathBuf,
    // Serializes appends so lines from concurrent turns never interleave
    write_lock: Mutex<()>,
}

impl JsonlTranscriptSink {
    /// Create the sink, making the directory if needed
    pub async fn create(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("Failed to create transcript directory: {:?}", directory))?;
        info!("Writing transcripts to {:?}", directory);

        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.directory.join(format!("{}.jsonl", session_id))
    }
}

#[async_trait::async_trait]
impl TranscriptSink for JsonlTranscriptSink {
    async fn record(&self, session_id: &str, event: &TranscriptEvent) -> Result<()> {
        let record = JsonlRecord {
            session_id,
            timestamp: event.timestamp.to_rfc3339(),
            speaker: event.speaker,
            text: &event.text,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let path = self.path_for(session_id);
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open transcript file: {:?}", path))?;
        file.write_all(&line)
            .await
            .context("Failed to append transcript line")?;
        file.flush().await?;

        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

/// Publishes events over NATS
pub struct NatsTranscriptSink {
    client: NatsClient,
}

impl NatsTranscriptSink {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = NatsClient::connect(url).await?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl TranscriptSink for NatsTranscriptSink {
    async fn record(&self, session_id: &str, event: &TranscriptEvent) -> Result<()> {
        self.client.publish_turn(&event.to_message(session_id)).await
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Forwards each event to every inner sink
///
/// All sinks are attempted even when one fails.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TranscriptSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TranscriptSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait::async_trait]
impl TranscriptSink for FanoutSink {
    async fn record(&self, session_id: &str, event: &TranscriptEvent) -> Result<()> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.record(session_id, event).await {
                warn!("[{}] Transcript sink {} failed: {:#}", session_id, sink.name(), e);
                failed.push(sink.name().to_string());
            }
        }
        if !failed.is_empty() {
            bail!("transcript sinks failed: {}", failed.join(", "));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait::async_trait]
    impl TranscriptSink for FailingSink {
        async fn record(&self, _session_id: &str, _event: &TranscriptEvent) -> Result<()> {
            bail!("disk full")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_sessions_apart() -> Result<()> {
        let sink = MemoryTranscriptSink::new();
        sink.record("a", &TranscriptEvent::new(Speaker::Counterpart, "Hello"))
            .await?;
        sink.record("b", &TranscriptEvent::new(Speaker::Participant, "Hi"))
            .await?;
        sink.record("a", &TranscriptEvent::new(Speaker::Participant, "Hi there"))
            .await?;

        let a = sink.events("a").await;
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].text, "Hello");
        assert_eq!(a[1].speaker, Speaker::Participant);
        assert_eq!(sink.len("b").await, 1);
        assert!(sink.events("missing").await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_fanout_attempts_every_sink() -> Result<()> {
        let memory = Arc::new(MemoryTranscriptSink::new());
        let fanout = FanoutSink::new(vec![
            Arc::new(FailingSink) as Arc<dyn TranscriptSink>,
            memory.clone(),
        ]);

        let result = fanout
            .record("call", &TranscriptEvent::new(Speaker::Counterpart, "Hello"))
            .await;

        assert!(result.is_err());
        assert_eq!(memory.len("call").await, 1);
        Ok(())
    }
}
