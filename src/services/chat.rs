use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult, AssistantError};
use crate::models::chat::{ChatMessage, MessageSender};
use crate::models::user::{FullProfile, ProfileItem, UserProfile};
use crate::services::assistant::{AssistantApi, OpenAiAssistant, RunPoll, RunStatus};

/// Where a conversation stands. A session is `NoThread` until the first send
/// creates a remote thread; after that every turn moves Idle -> AwaitingReply
/// -> Idle. A failed or timed-out run also lands back on Idle so the user can
/// resend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoThread,
    Idle { thread_id: String },
    AwaitingReply { thread_id: String, run_id: String },
}

/// One conversation as a plain value: the state machine plus the transcript
/// the user sees. Handlers build a session per request; tests drive it
/// directly.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub user_id: Uuid,
    pub state: SessionState,
    pub history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            state: SessionState::NoThread,
            history: Vec::new(),
        }
    }
}

/// Outcome of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub thread_id: String,
    pub run_id: String,
    pub reply: String,
}

/// Persistence the orchestrator needs: the thread registry and the profile
/// used for first-turn context. Production is [`PgThreadStore`]; tests use an
/// in-memory store.
pub trait ThreadStore {
    async fn save_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<()>;
    async fn load_context(&self, user_id: Uuid) -> AppResult<FullProfile>;
    async fn owns_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<bool>;
}

pub struct PgThreadStore {
    db: PgPool,
}

impl PgThreadStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

impl ThreadStore for PgThreadStore {
    async fn save_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<()> {
        sqlx::query("INSERT INTO chat_threads (id, user_id, thread_id) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(thread_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn load_context(&self, user_id: Uuid) -> AppResult<FullProfile> {
        let user = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let items = sqlx::query_as::<_, ProfileItem>(
            "SELECT * FROM profile_items WHERE user_id = $1 ORDER BY kind, position",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(FullProfile::assemble(user, items))
    }

    async fn owns_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM chat_threads WHERE thread_id = $1 AND user_id = $2)",
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }
}

/// In-flight operation keys. One `run:{thread}` key exists per outstanding
/// run and one `create:{user}` key per thread creation, so a concurrent
/// duplicate fails fast instead of racing the remote service.
#[derive(Default)]
struct InFlight {
    keys: Mutex<HashSet<String>>,
}

impl InFlight {
    fn acquire(&self, key: String) -> Option<InFlightGuard<'_>> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard { set: self, key })
    }
}

struct InFlightGuard<'a> {
    set: &'a InFlight,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut keys = self.set.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

/// Drives a conversation end to end: thread creation, first-turn context
/// injection, posting, run start, and the fixed-interval poll loop. Generic
/// over the assistant client and the store so the whole flow is testable
/// without a network or a database.
pub struct ChatOrchestrator<A, S> {
    api: A,
    store: S,
    poll_interval: Duration,
    max_polls: u32,
    ws_tx: Option<broadcast::Sender<String>>,
    in_flight: InFlight,
}

pub type ChatService = ChatOrchestrator<OpenAiAssistant, PgThreadStore>;

impl ChatService {
    pub fn new(config: &Config, db: PgPool, ws_tx: Option<broadcast::Sender<String>>) -> Self {
        ChatOrchestrator {
            api: OpenAiAssistant::new(config),
            store: PgThreadStore::new(db),
            poll_interval: Duration::from_millis(config.chat_poll_interval_ms),
            max_polls: config.chat_poll_max_attempts,
            ws_tx,
            in_flight: InFlight::default(),
        }
    }
}

impl<A: AssistantApi, S: ThreadStore> ChatOrchestrator<A, S> {
    /// Send one message and wait for the assistant's reply. Blocks through the
    /// whole poll loop; dropping the future stops polling and releases the
    /// in-flight keys, leaving the remote run to finish on its own.
    pub async fn send_message(
        &self,
        session: &mut ChatSession,
        message: &str,
    ) -> AppResult<ChatReply> {
        match session.state.clone() {
            SessionState::NoThread => self.send_first(session, message).await,
            SessionState::Idle { thread_id } => {
                self.run_turn(session, &thread_id, message, message).await
            }
            SessionState::AwaitingReply { .. } => Err(AppError::Conflict(
                "A reply is still pending for this conversation".to_string(),
            )),
        }
    }

    /// Rebind a session to an existing thread the user owns. History is left
    /// empty; use [`select_thread`](Self::select_thread) when the transcript
    /// is needed.
    pub async fn resume(&self, user_id: Uuid, thread_id: &str) -> AppResult<ChatSession> {
        if !self.store.owns_thread(user_id, thread_id).await? {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }

        Ok(ChatSession {
            user_id,
            state: SessionState::Idle {
                thread_id: thread_id.to_string(),
            },
            history: Vec::new(),
        })
    }

    /// Reopen a past conversation: ownership check, then rebuild the visible
    /// transcript from the remote thread.
    pub async fn select_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<ChatSession> {
        let mut session = self.resume(user_id, thread_id).await?;
        session.history = self.api.list_messages(thread_id).await?;
        Ok(session)
    }

    /// One poll of a run on behalf of a client, with the same ownership rules
    /// as the rest of the chat surface.
    pub async fn run_status(
        &self,
        user_id: Uuid,
        thread_id: &str,
        run_id: &str,
    ) -> AppResult<RunPoll> {
        if !self.store.owns_thread(user_id, thread_id).await? {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }
        Ok(self.api.poll_run(thread_id, run_id).await?)
    }

    async fn send_first(&self, session: &mut ChatSession, message: &str) -> AppResult<ChatReply> {
        let _create_guard = self
            .in_flight
            .acquire(format!("create:{}", session.user_id))
            .ok_or_else(|| {
                AppError::Conflict("A conversation is already being created".to_string())
            })?;

        // Context is loaded before the remote thread exists so a store failure
        // cannot leave an orphaned thread behind.
        let profile = self.store.load_context(session.user_id).await?;
        let first_message = first_turn_context(&profile, message);

        let thread_id = self.api.create_thread().await?;
        self.store.save_thread(session.user_id, &thread_id).await?;
        session.state = SessionState::Idle {
            thread_id: thread_id.clone(),
        };

        self.run_turn(session, &thread_id, &first_message, message)
            .await
    }

    /// Post one turn and wait for the reply. `content` is what goes over the
    /// wire (context-augmented on the first turn), `literal` is what the user
    /// typed and what lands in the visible history.
    async fn run_turn(
        &self,
        session: &mut ChatSession,
        thread_id: &str,
        content: &str,
        literal: &str,
    ) -> AppResult<ChatReply> {
        let _run_guard = self
            .in_flight
            .acquire(format!("run:{}", thread_id))
            .ok_or_else(|| {
                AppError::Conflict("A reply is still pending for this conversation".to_string())
            })?;

        session.history.push(ChatMessage {
            message: literal.to_string(),
            sender: MessageSender::User,
            created_at: Utc::now(),
        });

        self.api.post_user_message(thread_id, content).await?;
        let run_id = self.api.start_run(thread_id).await?;

        session.state = SessionState::AwaitingReply {
            thread_id: thread_id.to_string(),
            run_id: run_id.clone(),
        };
        self.broadcast_state(session);

        let outcome = self.await_reply(thread_id, &run_id).await;

        // Back to Idle on every outcome; a failed run is resendable, not
        // terminal.
        session.state = SessionState::Idle {
            thread_id: thread_id.to_string(),
        };
        self.broadcast_state(session);

        let reply = outcome?;
        session.history.push(ChatMessage {
            message: reply.clone(),
            sender: MessageSender::Bot,
            created_at: Utc::now(),
        });

        Ok(ChatReply {
            thread_id: thread_id.to_string(),
            run_id,
            reply,
        })
    }

    /// Fixed-interval poll loop: first check immediately, then sleep and
    /// recheck, up to `max_polls` delayed re-polls.
    async fn await_reply(&self, thread_id: &str, run_id: &str) -> AppResult<String> {
        for attempt in 0..=self.max_polls {
            if attempt > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }

            let poll = self.api.poll_run(thread_id, run_id).await?;
            match poll.status {
                RunStatus::Completed => return Ok(poll.reply.unwrap_or_default()),
                RunStatus::Failed => {
                    tracing::warn!(thread_id = %thread_id, run_id = %run_id, "Assistant run failed");
                    return Err(AssistantError::RunFailed.into());
                }
                RunStatus::Queued | RunStatus::InProgress => {}
            }
        }

        tracing::warn!(
            thread_id = %thread_id,
            run_id = %run_id,
            max_polls = self.max_polls,
            "Gave up waiting for assistant run"
        );
        Err(AssistantError::PollTimeout.into())
    }

    fn broadcast_state(&self, session: &ChatSession) {
        if let Some(tx) = self.ws_tx.as_ref() {
            let (state, thread_id) = match &session.state {
                SessionState::AwaitingReply { thread_id, .. } => {
                    ("awaiting_reply", Some(thread_id.as_str()))
                }
                SessionState::Idle { thread_id } => ("idle", Some(thread_id.as_str())),
                SessionState::NoThread => ("idle", None),
            };

            let msg = serde_json::json!({
                "type": "chat_state",
                "user_id": session.user_id,
                "thread_id": thread_id,
                "state": state,
            });
            let _ = tx.send(msg.to_string());
        }
    }
}

/// Build the first message of a new conversation: a profile context block,
/// a blank line, then the user's literal text. The literal text is always the
/// suffix; context is prepended, never substituted.
fn first_turn_context(profile: &FullProfile, message: &str) -> String {
    let mut block = String::from(
        "Context about the person you are talking to (do not repeat it back to them):\n",
    );

    block.push_str(&format!("Name: {}\n", profile.name));
    push_field(&mut block, "About them", profile.description.as_deref());
    push_field(&mut block, "Meditation habits", profile.meditation.as_deref());
    push_field(&mut block, "Journaling habits", profile.journaling.as_deref());
    push_field(&mut block, "Eating habits", profile.meals.as_deref());
    push_field(&mut block, "Sleep habits", profile.sleep.as_deref());
    push_field(&mut block, "Exercise habits", profile.exercise.as_deref());
    push_list(&mut block, "Things they love", &profile.loves);
    push_list(&mut block, "Current struggles", &profile.struggles);
    push_list(&mut block, "Favourite activities", &profile.activities);
    push_list(&mut block, "Fun facts about them", &profile.fun_facts);

    format!("{}\n{}", block, message)
}

fn push_field(block: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = value {
        if !v.trim().is_empty() {
            block.push_str(&format!("{}: {}\n", label, v));
        }
    }
}

fn push_list(block: &mut String, label: &str, items: &[String]) {
    if !items.is_empty() {
        block.push_str(&format!("{}: {}\n", label, items.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MockInner {
        polls: Mutex<VecDeque<RunStatus>>,
        reply: Mutex<String>,
        posted: Mutex<Vec<String>>,
        threads_created: AtomicUsize,
        runs_started: AtomicUsize,
        poll_times: Mutex<Vec<Instant>>,
        canned_history: Mutex<Vec<ChatMessage>>,
    }

    /// Scripted assistant: `poll_run` pops the next status from the script
    /// and reports `Completed` (with the canned reply) once it runs out.
    #[derive(Clone, Default)]
    struct MockAssistant {
        inner: Arc<MockInner>,
    }

    impl MockAssistant {
        fn scripted(polls: impl IntoIterator<Item = RunStatus>, reply: &str) -> Self {
            let mock = Self::default();
            *mock.inner.polls.lock().unwrap() = polls.into_iter().collect();
            *mock.inner.reply.lock().unwrap() = reply.to_string();
            mock
        }

        fn immediate(reply: &str) -> Self {
            Self::scripted([], reply)
        }

        fn posted(&self) -> Vec<String> {
            self.inner.posted.lock().unwrap().clone()
        }

        fn poll_times(&self) -> Vec<Instant> {
            self.inner.poll_times.lock().unwrap().clone()
        }

        fn runs_started(&self) -> usize {
            self.inner.runs_started.load(Ordering::SeqCst)
        }

        fn threads_created(&self) -> usize {
            self.inner.threads_created.load(Ordering::SeqCst)
        }
    }

    impl AssistantApi for MockAssistant {
        async fn create_thread(&self) -> Result<String, AssistantError> {
            let n = self.inner.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("thread_{}", n))
        }

        async fn post_user_message(
            &self,
            _thread_id: &str,
            content: &str,
        ) -> Result<(), AssistantError> {
            self.inner.posted.lock().unwrap().push(content.to_string());
            Ok(())
        }

        async fn start_run(&self, _thread_id: &str) -> Result<String, AssistantError> {
            let n = self.inner.runs_started.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("run_{}", n))
        }

        async fn poll_run(
            &self,
            _thread_id: &str,
            _run_id: &str,
        ) -> Result<RunPoll, AssistantError> {
            self.inner.poll_times.lock().unwrap().push(Instant::now());

            let status = self
                .inner
                .polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(RunStatus::Completed);
            let reply = (status == RunStatus::Completed)
                .then(|| self.inner.reply.lock().unwrap().clone());

            Ok(RunPoll { status, reply })
        }

        async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ChatMessage>, AssistantError> {
            Ok(self.inner.canned_history.lock().unwrap().clone())
        }
    }

    #[derive(Clone)]
    struct MemoryThreadStore {
        profile: FullProfile,
        threads: Arc<Mutex<Vec<(Uuid, String)>>>,
    }

    impl MemoryThreadStore {
        fn with_profile(profile: FullProfile) -> Self {
            Self {
                profile,
                threads: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ThreadStore for MemoryThreadStore {
        async fn save_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<()> {
            self.threads
                .lock()
                .unwrap()
                .push((user_id, thread_id.to_string()));
            Ok(())
        }

        async fn load_context(&self, _user_id: Uuid) -> AppResult<FullProfile> {
            Ok(self.profile.clone())
        }

        async fn owns_thread(&self, user_id: Uuid, thread_id: &str) -> AppResult<bool> {
            Ok(self
                .threads
                .lock()
                .unwrap()
                .iter()
                .any(|(u, t)| *u == user_id && t == thread_id))
        }
    }

    fn profile(loves: &[&str]) -> FullProfile {
        FullProfile {
            id: Uuid::new_v4(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            username: "ana".to_string(),
            profile_picture: None,
            description: Some("Learning to slow down".to_string()),
            meditation: None,
            journaling: None,
            meals: None,
            sleep: None,
            exercise: None,
            questionnaire_complete: false,
            loves: loves.iter().map(|s| s.to_string()).collect(),
            struggles: Vec::new(),
            activities: Vec::new(),
            fun_facts: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn orchestrator(
        api: MockAssistant,
        store: MemoryThreadStore,
    ) -> ChatOrchestrator<MockAssistant, MemoryThreadStore> {
        ChatOrchestrator {
            api,
            store,
            poll_interval: Duration::from_millis(2000),
            max_polls: 90,
            ws_tx: None,
            in_flight: InFlight::default(),
        }
    }

    fn idle_session(user_id: Uuid, store: &MemoryThreadStore, thread_id: &str) -> ChatSession {
        store
            .threads
            .lock()
            .unwrap()
            .push((user_id, thread_id.to_string()));
        ChatSession {
            user_id,
            state: SessionState::Idle {
                thread_id: thread_id.to_string(),
            },
            history: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_send_creates_thread_and_injects_context() {
        let mock = MockAssistant::immediate("Welcome!");
        let store = MemoryThreadStore::with_profile(profile(&["hiking"]));
        let orch = orchestrator(mock.clone(), store.clone());

        let mut session = ChatSession::new(Uuid::new_v4());
        let reply = orch
            .send_message(&mut session, "Hello, I need some support today")
            .await
            .unwrap();

        assert_eq!(reply.thread_id, "thread_1");
        assert_eq!(reply.reply, "Welcome!");
        assert_eq!(mock.threads_created(), 1);
        assert_eq!(store.threads.lock().unwrap().len(), 1);
        assert_eq!(
            session.state,
            SessionState::Idle {
                thread_id: "thread_1".to_string()
            }
        );

        let posted = mock.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].contains("hiking"));
        assert!(posted[0].ends_with("Hello, I need some support today"));
    }

    #[tokio::test(start_paused = true)]
    async fn later_messages_are_sent_verbatim() {
        let mock = MockAssistant::immediate("ok");
        let store = MemoryThreadStore::with_profile(profile(&["hiking"]));
        let orch = orchestrator(mock.clone(), store);

        let mut session = ChatSession::new(Uuid::new_v4());
        orch.send_message(&mut session, "first message").await.unwrap();
        orch.send_message(&mut session, "second message").await.unwrap();

        let posted = mock.posted();
        assert_eq!(posted.len(), 2);
        assert_ne!(posted[0], "first message");
        assert!(posted[0].ends_with("first message"));
        assert_eq!(posted[1], "second message");
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_appends_reply_to_visible_history() {
        let mock = MockAssistant::scripted([RunStatus::InProgress], "R");
        let store = MemoryThreadStore::with_profile(profile(&["hiking"]));
        let orch = orchestrator(mock.clone(), store);

        let mut session = ChatSession::new(Uuid::new_v4());
        let reply = orch.send_message(&mut session, "Hello").await.unwrap();

        assert_eq!(reply.reply, "R");
        assert!(mock.posted()[0].contains("Hello"));
        assert!(mock.posted()[0].contains("hiking"));

        let tail = &session.history[session.history.len() - 2..];
        assert_eq!(tail[0].sender, MessageSender::User);
        assert_eq!(tail[0].message, "Hello");
        assert_eq!(tail[1].sender, MessageSender::Bot);
        assert_eq!(tail[1].message, "R");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_spaces_repolls_at_the_configured_interval() {
        let mock = MockAssistant::scripted(
            [
                RunStatus::InProgress,
                RunStatus::InProgress,
                RunStatus::InProgress,
            ],
            "done",
        );
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let orch = orchestrator(mock.clone(), store.clone());

        let user_id = Uuid::new_v4();
        let mut session = idle_session(user_id, &store, "thread_9");

        let t0 = Instant::now();
        orch.send_message(&mut session, "ping").await.unwrap();

        // One immediate check plus exactly three delayed re-polls.
        let times = mock.poll_times();
        assert_eq!(times.len(), 4);
        assert_eq!(times[0], t0);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(2000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_gives_up_after_max_attempts() {
        let mock = MockAssistant::scripted(vec![RunStatus::InProgress; 10], "never");
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let mut orch = orchestrator(mock.clone(), store.clone());
        orch.max_polls = 3;

        let user_id = Uuid::new_v4();
        let mut session = idle_session(user_id, &store, "thread_9");

        let err = orch.send_message(&mut session, "ping").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Assistant(AssistantError::PollTimeout)
        ));
        assert_eq!(mock.poll_times().len(), 4);
        assert_eq!(
            session.state,
            SessionState::Idle {
                thread_id: "thread_9".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_returns_to_idle_and_releases_the_guard() {
        let mock = MockAssistant::scripted([RunStatus::InProgress, RunStatus::Failed], "unused");
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let orch = orchestrator(mock.clone(), store.clone());

        let user_id = Uuid::new_v4();
        let mut session = idle_session(user_id, &store, "thread_9");

        let err = orch.send_message(&mut session, "ping").await.unwrap_err();
        assert!(matches!(err, AppError::Assistant(AssistantError::RunFailed)));
        assert_eq!(
            session.state,
            SessionState::Idle {
                thread_id: "thread_9".to_string()
            }
        );

        // The guard must be gone: a resend starts a fresh run.
        orch.send_message(&mut session, "ping again").await.unwrap();
        assert_eq!(mock.runs_started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_on_one_thread_start_exactly_one_run() {
        let mock = MockAssistant::scripted([RunStatus::InProgress], "done");
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let orch = orchestrator(mock.clone(), store.clone());

        let user_id = Uuid::new_v4();
        let mut s1 = idle_session(user_id, &store, "thread_9");
        let mut s2 = ChatSession {
            user_id,
            state: SessionState::Idle {
                thread_id: "thread_9".to_string(),
            },
            history: Vec::new(),
        };

        let (r1, r2) = tokio::join!(
            orch.send_message(&mut s1, "first"),
            orch.send_message(&mut s2, "second"),
        );

        let conflicts = [&r1, &r2]
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict(_))))
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(mock.runs_started(), 1);
        assert_eq!(mock.posted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_sends_create_exactly_one_thread() {
        let mock = MockAssistant::scripted([RunStatus::InProgress], "done");
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let orch = orchestrator(mock.clone(), store.clone());

        let user_id = Uuid::new_v4();
        let mut s1 = ChatSession::new(user_id);
        let mut s2 = ChatSession::new(user_id);

        let (r1, r2) = tokio::join!(
            orch.send_message(&mut s1, "hi"),
            orch.send_message(&mut s2, "hi again"),
        );

        let conflicts = [&r1, &r2]
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict(_))))
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(mock.threads_created(), 1);
        assert_eq!(store.threads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn awaiting_session_rejects_sends_without_remote_calls() {
        let mock = MockAssistant::immediate("done");
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let orch = orchestrator(mock.clone(), store);

        let mut session = ChatSession {
            user_id: Uuid::new_v4(),
            state: SessionState::AwaitingReply {
                thread_id: "thread_9".to_string(),
                run_id: "run_9".to_string(),
            },
            history: Vec::new(),
        };

        let err = orch.send_message(&mut session, "ping").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(mock.posted().is_empty());
        assert_eq!(mock.runs_started(), 0);
    }

    #[tokio::test]
    async fn select_thread_checks_ownership_and_loads_history() {
        let mock = MockAssistant::immediate("done");
        *mock.inner.canned_history.lock().unwrap() = vec![
            ChatMessage {
                message: "earlier question".to_string(),
                sender: MessageSender::User,
                created_at: Utc::now(),
            },
            ChatMessage {
                message: "earlier answer".to_string(),
                sender: MessageSender::Bot,
                created_at: Utc::now(),
            },
        ];
        let store = MemoryThreadStore::with_profile(profile(&[]));
        let orch = orchestrator(mock, store.clone());

        let user_id = Uuid::new_v4();
        store
            .threads
            .lock()
            .unwrap()
            .push((user_id, "thread_9".to_string()));

        let session = orch.select_thread(user_id, "thread_9").await.unwrap();
        assert_eq!(
            session.state,
            SessionState::Idle {
                thread_id: "thread_9".to_string()
            }
        );
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[1].message, "earlier answer");

        let err = orch
            .select_thread(Uuid::new_v4(), "thread_9")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn context_block_lists_profile_and_keeps_message_as_suffix() {
        let text = first_turn_context(&profile(&["hiking", "cooking"]), "Hello");

        assert!(text.ends_with("\n\nHello"));
        assert!(text.contains("Name: Ana"));
        assert!(text.contains("Things they love: hiking, cooking"));
        assert!(text.contains("About them: Learning to slow down"));
    }

    #[test]
    fn context_block_skips_empty_sections() {
        let mut p = profile(&[]);
        p.description = None;

        let text = first_turn_context(&p, "Hi");
        assert!(!text.contains("Things they love"));
        assert!(!text.contains("Meditation habits"));
        assert!(!text.contains("About them"));
        assert!(text.ends_with("\n\nHi"));
    }
}
