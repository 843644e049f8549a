use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use drillroom_scheduler::SessionRuntime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::delivery::HookOutcome;
use crate::evaluation::EvaluationReport;

/// Rejections a session operation reports back to its caller. None of them
/// is retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already ended: {0}")]
    Ended(String),
    #[error("code submission is empty")]
    MissingCode,
    #[error("rejected: {0}")]
    Rejected(String),
}

impl SessionError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "session_not_found",
            Self::Ended(_) => "session_ended",
            Self::MissingCode => "missing_code",
            Self::Rejected(_) => "invalid_event",
        }
    }
}

/// Returned by `start_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session_id: String,
    pub started_at_ms: i64,
    pub end_at_ms: i64,
    pub duration_sec: u64,
    /// Start hook outcome, when a workflow engine is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<HookOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub started_at_ms: i64,
    pub end_at_ms: i64,
    pub ended: bool,
    pub phase: String,
    pub cursor: usize,
    pub beats_total: usize,
}

impl SessionStatus {
    pub fn of(runtime: &SessionRuntime) -> Self {
        Self {
            session_id: runtime.session_id().to_string(),
            started_at_ms: runtime.started_at().timestamp_millis(),
            end_at_ms: runtime.end_at().timestamp_millis(),
            ended: runtime.is_ended(),
            phase: runtime.phase().as_str().to_string(),
            cursor: runtime.cursor(),
            beats_total: runtime.plan().len(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One registered session: its runtime, the ticker task driving it and the
/// last computed evaluation.
pub struct SessionHandle {
    runtime: Arc<SessionRuntime>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    evaluation: Mutex<Option<EvaluationReport>>,
}

impl SessionHandle {
    pub fn new(runtime: Arc<SessionRuntime>) -> Self {
        Self {
            runtime,
            ticker: Mutex::new(None),
            evaluation: Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> &Arc<SessionRuntime> {
        &self.runtime
    }

    pub fn attach_ticker(&self, handle: JoinHandle<()>) {
        if let Some(previous) = lock(&self.ticker).replace(handle) {
            previous.abort();
        }
    }

    /// Ends the runtime and aborts the ticker. Returns false if the session
    /// was already stopped.
    pub fn stop(&self) -> bool {
        let first = self.runtime.end();
        if let Some(ticker) = lock(&self.ticker).take() {
            ticker.abort();
        }
        first
    }

    pub fn evaluation(&self) -> Option<EvaluationReport> {
        lock(&self.evaluation).clone()
    }

    pub fn store_evaluation(&self, report: EvaluationReport) {
        *lock(&self.evaluation) = Some(report);
    }

    /// The runtime, unless the session is over.
    pub fn writable(&self) -> Result<&Arc<SessionRuntime>, SessionError> {
        if self.runtime.is_ended() {
            return Err(SessionError::Ended(self.runtime.session_id().to_string()));
        }
        Ok(&self.runtime)
    }
}

/// Registry of live and finished sessions. Ended sessions stay readable
/// until replaced or destroyed.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `runtime`, stopping any session previously registered under
    /// the same id.
    pub fn create(&self, runtime: Arc<SessionRuntime>) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(runtime));
        let session_id = handle.runtime.session_id().to_string();
        let previous = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.clone(), Arc::clone(&handle));
        if let Some(previous) = previous {
            previous.stop();
            tracing::info!(session_id = %session_id, "session restarted, previous ticker cancelled");
        }
        handle
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Stops and forgets a session.
    pub fn destroy(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
        if let Some(handle) = &removed {
            handle.stop();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every session; used at shutdown.
    pub fn stop_all(&self) {
        let handles: Vec<Arc<SessionHandle>> = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        for handle in handles {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use drillroom_scheduler::{TickPhase, TurnPlan};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn runtime(id: &str) -> Arc<SessionRuntime> {
        let mut rng = StdRng::seed_from_u64(1);
        Arc::new(SessionRuntime::new(id, TurnPlan::materialize(600, 90, &mut rng)))
    }

    #[tokio::test]
    async fn create_get_destroy() {
        let store = SessionStore::new();
        store.create(runtime("sess_a"));
        assert_eq!(store.len(), 1);
        assert!(store.get("sess_a").is_ok());
        assert_eq!(
            store.get("sess_b").err(),
            Some(SessionError::NotFound("sess_b".into()))
        );

        let removed = store.destroy("sess_a").unwrap();
        assert!(removed.runtime().is_ended());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn restart_stops_previous_session() {
        let store = SessionStore::new();
        let first = store.create(runtime("sess_a"));
        first.attach_ticker(tokio::spawn(std::future::pending::<()>()));

        let second = store.create(runtime("sess_a"));
        assert!(first.runtime().is_ended());
        assert_eq!(first.runtime().phase(), TickPhase::Closed);
        assert!(!second.runtime().is_ended());
        assert!(Arc::ptr_eq(&store.get("sess_a").unwrap(), &second));
    }

    #[tokio::test]
    async fn ended_session_rejects_writes() {
        let store = SessionStore::new();
        let handle = store.create(runtime("sess_a"));
        assert!(handle.writable().is_ok());
        assert!(handle.stop());
        assert!(!handle.stop());
        let err = handle.writable().unwrap_err();
        assert_eq!(err.code(), "session_ended");
    }
}
