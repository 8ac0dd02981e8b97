use crate::config::Config;
use crate::scenario::ScenarioResolver;
use crate::session::{SessionHandle, SessionServices};
use crate::transcript::MemoryTranscriptSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Call sessions (session_id → handle), kept for a while after they close
    pub sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,

    /// Collaborators handed to every new session
    pub services: SessionServices,

    /// Scenario lookup for incoming calls
    pub scenarios: Arc<ScenarioResolver>,

    /// Per-session transcripts served by the API; also one of the session sinks
    pub transcripts: Arc<MemoryTranscriptSink>,

    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        services: SessionServices,
        scenarios: ScenarioResolver,
        transcripts: Arc<MemoryTranscriptSink>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            services,
            scenarios: Arc::new(scenarios),
            transcripts,
            config: Arc::new(config),
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Register a new session, evicting expired ones first
    pub async fn register(&self, handle: SessionHandle) {
        self.evict_closed().await;
        self.sessions
            .write()
            .await
            .insert(handle.session_id().to_string(), handle);
    }

    /// Drop sessions closed longer than the retention period, along with
    /// their in-memory transcripts
    pub async fn evict_closed(&self) -> usize {
        let retention = Duration::from_secs(self.config.session.closed_retention_secs);
        let expired: Vec<String> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, handle)| handle.closed_for().is_some_and(|age| age >= retention))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            expired
        };

        for id in &expired {
            self.transcripts.remove(id).await;
            debug!("Evicted closed session {}", id);
        }
        expired.len()
    }
}
