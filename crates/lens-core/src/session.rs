use crate::config::AssistantConfig;
use crate::error::{LensError, Result};
use crate::resolver::{QueryResolver, Resolution};
use crate::types::{ConversationMessage, QueryFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Reply used whenever the data could not be reached in time.
pub const APOLOGY_TEXT: &str = "Lo siento, no pude consultar los datos en este momento. \
Por favor intenta de nuevo en unos segundos.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No question asked yet.
    Idle,
    /// A question is being resolved.
    Awaiting,
    /// Ready for the next question.
    Answered,
    /// Disposed; rejects further questions.
    Closed,
}

struct SessionInner {
    state: SessionState,
    history: Vec<ConversationMessage>,
    /// Filter context carried from turn to turn.
    filter: QueryFilter,
    /// Bumped by `cancel` and `close` so an in-flight answer can tell it is stale.
    generation: u64,
    updated_at: DateTime<Utc>,
}

impl SessionInner {
    fn abandon(&mut self) {
        self.generation += 1;
        self.state = if self.history.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Answered
        };
        self.updated_at = Utc::now();
    }
}

/// Held across the resolver await in `Session::submit`. If the submitting future is
/// dropped first, the question is abandoned as if `cancel` had been called.
struct PendingQuestion<'a> {
    session: &'a Session,
    generation: u64,
    armed: bool,
}

impl<'a> PendingQuestion<'a> {
    fn new(session: &'a Session, generation: u64) -> Self {
        Self {
            session,
            generation,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingQuestion<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(mut inner) = self.session.inner.lock() else {
            return;
        };
        if inner.generation == self.generation && inner.state == SessionState::Awaiting {
            debug!("Session {} dropped while awaiting, abandoning question", self.session.id);
            inner.abandon();
        }
    }
}

/// A single conversation. Single-flight: one outstanding question at a time.
pub struct Session {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    resolver: Arc<dyn QueryResolver>,
    timeout: Duration,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(name: impl Into<String>, resolver: Arc<dyn QueryResolver>, timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: now,
            resolver,
            timeout,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                history: Vec::new(),
                filter: QueryFilter::all(),
                generation: 0,
                updated_at: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionInner>> {
        self.inner
            .lock()
            .map_err(|e| LensError::Other(anyhow::anyhow!("session lock poisoned: {}", e)))
    }

    /// Ask a question and wait for the assistant's reply.
    ///
    /// Unresolved questions and data outages come back as an assistant message, not an
    /// error. On success the user message and the reply are appended, in that order.
    pub async fn submit(&self, question: &str) -> Result<ConversationMessage> {
        let question = question.trim();
        if question.is_empty() {
            return Err(LensError::InvalidInput("question is empty".into()));
        }

        let (generation, context, prior_state) = {
            let mut inner = self.lock()?;
            match inner.state {
                SessionState::Closed => return Err(LensError::SessionClosed),
                SessionState::Awaiting => return Err(LensError::SessionBusy),
                SessionState::Idle | SessionState::Answered => {}
            }
            let prior = inner.state;
            inner.state = SessionState::Awaiting;
            (inner.generation, inner.filter.clone(), prior)
        };
        let mut pending = PendingQuestion::new(self, generation);

        debug!("Session {} resolving {:?} with {:?}", self.id, question, context);
        let outcome =
            tokio::time::timeout(self.timeout, self.resolver.resolve(question, &context)).await;

        let mut inner = self.lock()?;
        pending.disarm();
        if inner.generation != generation {
            debug!("Session {} discarding stale answer to {:?}", self.id, question);
            return Err(if inner.state == SessionState::Closed {
                LensError::SessionClosed
            } else {
                LensError::Discarded
            });
        }

        let reply = match outcome {
            Err(_) => {
                warn!(
                    "Session {}: resolution exceeded {:?}, answering with apology",
                    self.id, self.timeout
                );
                ConversationMessage::assistant(APOLOGY_TEXT)
            }
            Ok(Ok(Resolution::Answered { text, trace })) => {
                if trace.intent.spans_corridors() {
                    inner.filter.window = trace.filter.window;
                } else {
                    inner.filter = trace.filter.clone();
                }
                ConversationMessage::assistant_with_trace(text, trace)
            }
            Ok(Ok(Resolution::Unresolved { clarification })) => {
                ConversationMessage::assistant(clarification)
            }
            Ok(Err(e)) if e.is_recoverable() => {
                warn!("Session {}: {}, answering with apology", self.id, e);
                ConversationMessage::assistant(APOLOGY_TEXT)
            }
            Ok(Err(e)) => {
                error!("Session {}: request failed: {}", self.id, e);
                inner.state = prior_state;
                return Err(e);
            }
        };

        inner.history.push(ConversationMessage::user(question));
        inner.history.push(reply.clone());
        inner.state = SessionState::Answered;
        inner.updated_at = Utc::now();
        Ok(reply)
    }

    /// Abandon the outstanding question, if any. Its answer will never be appended.
    pub fn cancel(&self) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.state != SessionState::Awaiting {
            return Ok(false);
        }
        inner.abandon();
        Ok(true)
    }

    /// Dispose of the session. Terminal.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.generation += 1;
        inner.state = SessionState::Closed;
        Ok(())
    }

    pub fn state(&self) -> Result<SessionState> {
        Ok(self.lock()?.state)
    }

    /// Snapshot of the conversation so far, oldest first.
    pub fn history(&self) -> Result<Vec<ConversationMessage>> {
        Ok(self.lock()?.history.clone())
    }

    /// The most recent `max` messages, oldest first.
    pub fn recent_messages(&self, max: usize) -> Result<Vec<ConversationMessage>> {
        let inner = self.lock()?;
        let start = inner.history.len().saturating_sub(max);
        Ok(inner.history[start..].to_vec())
    }

    pub fn message_count(&self) -> Result<usize> {
        Ok(self.lock()?.history.len())
    }

    pub fn filter(&self) -> Result<QueryFilter> {
        Ok(self.lock()?.filter.clone())
    }

    /// Replace the filter context used for the next question.
    pub fn set_filter(&self, filter: QueryFilter) -> Result<()> {
        self.lock()?.filter = filter;
        Ok(())
    }

    pub fn updated_at(&self) -> Result<DateTime<Utc>> {
        Ok(self.lock()?.updated_at)
    }
}

/// Listing entry for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub state: SessionState,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory registry of independent sessions. Nothing is persisted.
///
/// Holds at most `max_sessions`; creating one past the cap evicts the least recently
/// updated session that is not awaiting an answer.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    resolver: Arc<dyn QueryResolver>,
    timeout: Duration,
    max_history: usize,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(config: &AssistantConfig, resolver: Arc<dyn QueryResolver>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            resolver,
            timeout: Duration::from_secs(config.resolve_timeout_secs.max(1)),
            max_history: config.max_history,
            max_sessions: config.max_sessions.max(1),
        }
    }

    /// Override the resolution timeout (sub-second bounds are useful in tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Session>>>> {
        self.sessions
            .read()
            .map_err(|e| LensError::Other(anyhow::anyhow!("session registry poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Session>>>> {
        self.sessions
            .write()
            .map_err(|e| LensError::Other(anyhow::anyhow!("session registry poisoned: {}", e)))
    }

    /// Create a new session and register it.
    pub fn create_session(&self, name: impl Into<String>) -> Result<Arc<Session>> {
        let session = Arc::new(Session::new(name, self.resolver.clone(), self.timeout));
        let evicted = {
            let mut sessions = self.write()?;
            let evicted = if sessions.len() >= self.max_sessions {
                Self::evict_one(&mut sessions)
            } else {
                None
            };
            sessions.insert(session.id().to_string(), session.clone());
            evicted
        };
        if let Some(old) = evicted {
            debug!("Evicted session {} ({})", old.name(), old.id());
            old.close()?;
        }
        debug!("Created session {} ({})", session.name(), session.id());
        Ok(session)
    }

    /// Remove the stalest session not awaiting an answer. When every session is busy
    /// the registry is allowed to exceed its cap.
    fn evict_one(sessions: &mut HashMap<String, Arc<Session>>) -> Option<Arc<Session>> {
        let victim = sessions
            .values()
            .filter_map(|s| {
                let inner = s.inner.lock().ok()?;
                (inner.state != SessionState::Awaiting).then(|| (inner.updated_at, s.id().to_string()))
            })
            .min()
            .map(|(_, id)| id)?;
        sessions.remove(&victim)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| LensError::SessionNotFound(id.to_string()))
    }

    /// Close and forget a session.
    pub fn dispose(&self, id: &str) -> Result<()> {
        let session = self
            .write()?
            .remove(id)
            .ok_or_else(|| LensError::SessionNotFound(id.to_string()))?;
        session.close()
    }

    /// All sessions, most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let sessions: Vec<Arc<Session>> = self.read()?.values().cloned().collect();
        let mut list = sessions
            .iter()
            .map(|s| {
                Ok(SessionInfo {
                    id: s.id().to_string(),
                    name: s.name().to_string(),
                    state: s.state()?,
                    message_count: s.message_count()?,
                    created_at: s.created_at(),
                    updated_at: s.updated_at()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Max history setting.
    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricPayload;
    use crate::types::{Intent, QueryTrace, Role, TimeWindow};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Resolver returning a fixed outcome, optionally after waiting on a gate.
    struct ScriptedResolver {
        outcome: fn() -> Result<Resolution>,
        gate: Option<Arc<Notify>>,
        delay: Option<Duration>,
    }

    impl ScriptedResolver {
        fn new(outcome: fn() -> Result<Resolution>) -> Self {
            Self {
                outcome,
                gate: None,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl QueryResolver for ScriptedResolver {
        async fn resolve(&self, _question: &str, _context: &QueryFilter) -> Result<Resolution> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.outcome)()
        }
    }

    fn answered() -> Result<Resolution> {
        Ok(Resolution::Answered {
            text: "USD_MXN tiene la mayor tasa de fallo".into(),
            trace: QueryTrace {
                intent: Intent::CorridorDeepDive,
                filter: QueryFilter::for_corridor("USD_MXN").with_window(TimeWindow::Last30Days),
                result: MetricPayload::Corridors(Vec::new()),
            },
        })
    }

    fn unresolved() -> Result<Resolution> {
        Ok(Resolution::Unresolved {
            clarification: "¿Puedes reformular?".into(),
        })
    }

    fn unavailable() -> Result<Resolution> {
        Err(LensError::DataUnavailable("store offline".into()))
    }

    fn corrupt() -> Result<Resolution> {
        Err(LensError::AggregationInvariantViolation("negative count".into()))
    }

    fn session_with(resolver: ScriptedResolver) -> Arc<Session> {
        Arc::new(Session::new("test", Arc::new(resolver), Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_answer_appends_user_then_assistant() {
        let session = session_with(ScriptedResolver::new(answered));
        assert_eq!(session.state().unwrap(), SessionState::Idle);

        let reply = session.submit("  Analiza USD_MXN  ").await.unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert!(reply.trace.is_some());

        let history = session.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Analiza USD_MXN");
        assert_eq!(history[1], reply);
        assert_eq!(session.state().unwrap(), SessionState::Answered);
    }

    #[tokio::test]
    async fn test_answer_carries_filter_context() {
        let session = session_with(ScriptedResolver::new(answered));
        session.submit("Analiza USD_MXN").await.unwrap();
        let filter = session.filter().unwrap();
        assert_eq!(filter.corridor.as_deref(), Some("USD_MXN"));
        assert_eq!(filter.window, TimeWindow::Last30Days);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let session = session_with(ScriptedResolver::new(answered));
        let err = session.submit("   ").await.unwrap_err();
        assert!(matches!(err, LensError::InvalidInput(_)));
        assert!(session.history().unwrap().is_empty());
        assert_eq!(session.state().unwrap(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unresolved_becomes_clarification() {
        let session = session_with(ScriptedResolver::new(unresolved));
        let reply = session.submit("¿qué hora es?").await.unwrap();
        assert_eq!(reply.content, "¿Puedes reformular?");
        assert!(reply.trace.is_none());
        assert_eq!(session.state().unwrap(), SessionState::Answered);
    }

    #[tokio::test]
    async fn test_data_unavailable_becomes_apology() {
        let session = session_with(ScriptedResolver::new(unavailable));
        let reply = session.submit("volumen por mes").await.unwrap();
        assert_eq!(reply.content, APOLOGY_TEXT);
        assert!(!reply.content.contains("store offline"));
        assert_eq!(session.history().unwrap().len(), 2);
        assert_eq!(session.state().unwrap(), SessionState::Answered);
    }

    #[tokio::test]
    async fn test_invariant_violation_is_hard_failure() {
        let session = session_with(ScriptedResolver::new(corrupt));
        let err = session.submit("volumen por mes").await.unwrap_err();
        assert!(matches!(err, LensError::AggregationInvariantViolation(_)));
        assert!(session.history().unwrap().is_empty());
        // The session stays usable.
        assert_eq!(session.state().unwrap(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_timeout_becomes_apology() {
        let mut resolver = ScriptedResolver::new(answered);
        resolver.delay = Some(Duration::from_secs(30));
        let session = Arc::new(Session::new(
            "slow",
            Arc::new(resolver),
            Duration::from_millis(50),
        ));

        let reply = session.submit("volumen por mes").await.unwrap();
        assert_eq!(reply.content, APOLOGY_TEXT);
        assert_eq!(session.state().unwrap(), SessionState::Answered);
    }

    #[tokio::test]
    async fn test_second_submit_while_awaiting_is_rejected() {
        let gate = Arc::new(Notify::new());
        let mut resolver = ScriptedResolver::new(answered);
        resolver.gate = Some(gate.clone());
        let session = session_with(resolver);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("primera").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }

        let err = session.submit("segunda").await.unwrap_err();
        assert!(matches!(err, LensError::SessionBusy));

        gate.notify_one();
        first.await.unwrap().unwrap();
        let history = session.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "primera");
    }

    #[tokio::test]
    async fn test_cancelled_answer_is_discarded() {
        let gate = Arc::new(Notify::new());
        let mut resolver = ScriptedResolver::new(answered);
        resolver.gate = Some(gate.clone());
        let session = session_with(resolver);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("primera").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }

        assert!(session.cancel().unwrap());
        assert_eq!(session.state().unwrap(), SessionState::Idle);

        gate.notify_one();
        let err = first.await.unwrap().unwrap_err();
        assert!(matches!(err, LensError::Discarded));
        assert!(session.history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_submit_releases_session() {
        let gate = Arc::new(Notify::new());
        let mut resolver = ScriptedResolver::new(unresolved);
        resolver.gate = Some(gate.clone());
        let session = session_with(resolver);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("primera").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(session.state().unwrap(), SessionState::Idle);
        assert!(session.history().unwrap().is_empty());

        // The next question goes through instead of reporting busy.
        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("segunda").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        second.await.unwrap().unwrap();
        let history = session.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "segunda");
    }

    #[tokio::test]
    async fn test_dropped_submit_after_cancel_leaves_new_question_alone() {
        let gate = Arc::new(Notify::new());
        let mut resolver = ScriptedResolver::new(unresolved);
        resolver.gate = Some(gate.clone());
        let session = session_with(resolver);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("primera").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }
        session.cancel().unwrap();

        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("segunda").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }

        // Dropping the stale submit must not release the newer pending question.
        first.abort();
        let _ = first.await;
        assert_eq!(session.state().unwrap(), SessionState::Awaiting);

        gate.notify_one();
        second.await.unwrap().unwrap();
        assert_eq!(session.history().unwrap()[0].content, "segunda");
    }

    #[tokio::test]
    async fn test_cancel_when_not_awaiting_is_noop() {
        let session = session_with(ScriptedResolver::new(answered));
        assert!(!session.cancel().unwrap());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_questions() {
        let session = session_with(ScriptedResolver::new(answered));
        session.close().unwrap();
        let err = session.submit("hola").await.unwrap_err();
        assert!(matches!(err, LensError::SessionClosed));
    }

    #[tokio::test]
    async fn test_recent_messages() {
        let session = session_with(ScriptedResolver::new(unresolved));
        session.submit("uno").await.unwrap();
        session.submit("dos").await.unwrap();
        let recent = session.recent_messages(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[1].content, "dos");
    }

    #[tokio::test]
    async fn test_manager_sessions_are_independent() {
        let manager = Arc::new(SessionManager::new(
            &AssistantConfig::default(),
            Arc::new(ScriptedResolver::new(answered)),
        ));
        let a = manager.create_session("a").unwrap();
        let b = manager.create_session("b").unwrap();

        let (ra, rb) = futures::future::join(a.submit("uno"), b.submit("dos")).await;
        ra.unwrap();
        rb.unwrap();

        assert_eq!(a.history().unwrap()[0].content, "uno");
        assert_eq!(b.history().unwrap()[0].content, "dos");
        assert_eq!(manager.list_sessions().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_manager_dispose() {
        let manager = SessionManager::new(
            &AssistantConfig::default(),
            Arc::new(ScriptedResolver::new(answered)),
        );
        let session = manager.create_session("temp").unwrap();
        let id = session.id().to_string();

        manager.dispose(&id).unwrap();
        assert_eq!(session.state().unwrap(), SessionState::Closed);
        assert!(matches!(manager.get(&id), Err(LensError::SessionNotFound(_))));
        assert!(manager.dispose(&id).is_err());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_manager_evicts_stalest_idle_session_at_cap() {
        let config = AssistantConfig {
            max_sessions: 2,
            ..AssistantConfig::default()
        };
        let manager = SessionManager::new(&config, Arc::new(ScriptedResolver::new(unresolved)));
        let oldest = manager.create_session("a").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let kept = manager.create_session("b").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        kept.submit("hola").await.unwrap();

        let newest = manager.create_session("c").unwrap();
        assert_eq!(manager.len(), 2);
        assert_eq!(oldest.state().unwrap(), SessionState::Closed);
        assert!(manager.get(oldest.id()).is_err());
        assert!(manager.get(kept.id()).is_ok());
        assert!(manager.get(newest.id()).is_ok());
    }

    #[tokio::test]
    async fn test_manager_never_evicts_awaiting_session() {
        let gate = Arc::new(Notify::new());
        let mut resolver = ScriptedResolver::new(unresolved);
        resolver.gate = Some(gate.clone());
        let config = AssistantConfig {
            max_sessions: 1,
            ..AssistantConfig::default()
        };
        let manager = SessionManager::new(&config, Arc::new(resolver));
        let busy = manager.create_session("busy").unwrap();

        let pending = {
            let busy = busy.clone();
            tokio::spawn(async move { busy.submit("uno").await })
        };
        while busy.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }

        manager.create_session("other").unwrap();
        assert_eq!(manager.len(), 2);
        assert_eq!(busy.state().unwrap(), SessionState::Awaiting);

        gate.notify_one();
        pending.await.unwrap().unwrap();
    }
}
