//! Chat session controller: owns the active transcript, the saved-chat list,
//! and the one-request-at-a-time rule.
//!
//! State mutation is decoupled from presentation: a reply is appended to the
//! transcript as soon as it is accepted; any typing animation happens in the
//! consumer on top of the already-updated transcript. Requests capture the
//! controller epoch at submit time, and a reply is applied only when the
//! originating session is still the active one.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::rpc::{AiBackend, RpcError};
use crate::session::{derive_title, ChatMessage, ChatSession, SessionList, SessionSummary};

/// Welcome message shown at the start of every new chat. Client-local; never
/// persisted or sent upstream.
pub const GREETING: &str = "👋 Welcome to Pulsar AI Assistant!\nAsk me anything about your ERP system, reports, invoices, stock..";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The question was empty after trimming; nothing changed.
    #[error("please type a question first")]
    EmptyQuestion,
    /// A previous question is still waiting for its answer; nothing changed.
    #[error("still waiting for the previous answer")]
    Busy,
    /// The remote call failed or returned no usable content. The optimistic
    /// user message stays in the transcript so the question can be retried.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The server refused to delete the chat; the list entry is retained.
    #[error("failed to delete chat")]
    DeleteFailed,
    /// The reply arrived after the session was replaced and was discarded.
    #[error("session changed before the reply arrived")]
    SessionGone,
}

/// Outcome of one successful question/answer round trip.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub reply: String,
    /// Set when this turn persisted a brand-new session.
    pub new_session_id: Option<String>,
}

struct ControllerState {
    session: ChatSession,
    sessions: SessionList,
    in_flight: bool,
    /// Bumped on every session replacement; in-flight replies whose captured
    /// epoch no longer matches are discarded instead of mis-applied.
    epoch: u64,
    last_turn_failed: bool,
}

impl ControllerState {
    fn reset_session(&mut self) {
        let mut session = ChatSession::new();
        session.push(ChatMessage::local_assistant(GREETING));
        self.session = session;
        self.sessions.clear_active();
        self.in_flight = false;
        self.epoch += 1;
        self.last_turn_failed = false;
    }
}

/// The one stateful component: create it explicitly and hand it to whatever
/// renders it. Methods take `&self`; internal state sits behind a lock that is
/// never held across an await, so a view layer may interleave operations
/// (e.g. switch sessions while an ask is pending).
pub struct ChatController<B> {
    backend: B,
    state: Arc<RwLock<ControllerState>>,
}

impl<B: AiBackend> ChatController<B> {
    /// A fresh controller starts on an unsaved session holding the greeting,
    /// same as [`start_new_session`](Self::start_new_session).
    pub fn new(backend: B) -> Self {
        let mut session = ChatSession::new();
        session.push(ChatMessage::local_assistant(GREETING));
        Self {
            backend,
            state: Arc::new(RwLock::new(ControllerState {
                session,
                sessions: SessionList::new(),
                in_flight: false,
                epoch: 0,
                last_turn_failed: false,
            })),
        }
    }

    /// Drop the current conversation and start an empty, unsaved one
    /// containing only the greeting. Clears the sidebar selection.
    pub async fn start_new_session(&self) {
        let mut g = self.state.write().await;
        g.reset_session();
    }

    /// Submit a question. Appends the user message optimistically, sends the
    /// transcript snapshot, and on success appends the answer. For a new
    /// session the returned chat id is bound and a summary entry goes to the
    /// front of the saved-chat list.
    pub async fn submit_question(&self, text: &str) -> Result<TurnResult, ChatError> {
        let question = text.trim().to_string();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let (epoch, history, session_id) = {
            let mut g = self.state.write().await;
            if g.in_flight {
                return Err(ChatError::Busy);
            }
            g.in_flight = true;
            g.session.push(ChatMessage::user(&question));
            (g.epoch, g.session.wire_history(), g.session.id.clone())
        };

        let res = self
            .backend
            .ask(&question, &history, session_id.as_deref())
            .await;

        let mut g = self.state.write().await;
        if g.epoch != epoch {
            // The session was replaced while we were waiting; the replacement
            // already cleared in_flight for the new context.
            log::debug!("discarding reply for a session that is no longer active");
            return Err(ChatError::SessionGone);
        }
        g.in_flight = false;

        match res {
            Ok(reply) => {
                let mut new_session_id = None;
                if session_id.is_none() {
                    if let Some(id) = reply.session_id.clone() {
                        let title = derive_title(&question);
                        g.session.bind_id(&id);
                        g.session.title = Some(title.clone());
                        g.sessions.insert_front(SessionSummary {
                            id: id.clone(),
                            title,
                        });
                        g.sessions.select(&id);
                        new_session_id = Some(id);
                    } else {
                        log::warn!("backend returned no chat id for a new session");
                    }
                }
                g.session.push(ChatMessage::assistant(&reply.reply));
                g.last_turn_failed = false;
                Ok(TurnResult {
                    reply: reply.reply,
                    new_session_id,
                })
            }
            Err(e) => {
                // Deliberate: the optimistic user message is kept so the
                // question can be retried; last_turn_failed lets a view badge
                // the trailing unanswered message.
                log::warn!("ask failed: {}", e);
                g.last_turn_failed = true;
                Err(ChatError::Rpc(e))
            }
        }
    }

    /// Replace the current session with one loaded from the backend. Each
    /// stored exchange expands to a user message followed by its answer.
    pub async fn select_session(&self, id: &str) -> Result<(), ChatError> {
        let pairs = self.backend.fetch_messages(id).await.map_err(ChatError::Rpc)?;

        let mut g = self.state.write().await;
        let mut session = ChatSession::with_id(id);
        session.title = g.sessions.title_of(id).map(str::to_string);
        for pair in pairs {
            session.push(ChatMessage::user(pair.question));
            session.push(ChatMessage::assistant(pair.reply));
        }
        g.session = session;
        g.sessions.select(id);
        g.in_flight = false;
        g.epoch += 1;
        g.last_turn_failed = false;
        Ok(())
    }

    /// Soft-delete a chat. The caller must have confirmed with the user.
    /// On success the list entry is removed; deleting the active session
    /// leaves the controller as after [`start_new_session`](Self::start_new_session).
    /// On failure nothing changes locally.
    pub async fn delete_session(&self, id: &str) -> Result<(), ChatError> {
        let ok = self.backend.soft_delete(id).await.map_err(ChatError::Rpc)?;
        if !ok {
            return Err(ChatError::DeleteFailed);
        }

        let mut g = self.state.write().await;
        g.sessions.remove(id);
        if g.session.id.as_deref() == Some(id) {
            g.reset_session();
        }
        Ok(())
    }

    /// Refresh the saved-chat list from the backend. The selection survives
    /// only if the selected chat is still listed.
    pub async fn refresh_sessions(&self, owner: &str) -> Result<(), ChatError> {
        let entries = self
            .backend
            .list_sessions(owner)
            .await
            .map_err(ChatError::Rpc)?;
        let mut g = self.state.write().await;
        g.sessions.replace(entries);
        Ok(())
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.state.read().await.session.messages.clone()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session.id.clone()
    }

    pub async fn is_new(&self) -> bool {
        self.state.read().await.session.is_new()
    }

    pub async fn in_flight(&self) -> bool {
        self.state.read().await.in_flight
    }

    /// True when the most recent submit failed, i.e. the trailing user
    /// message is still unanswered.
    pub async fn last_turn_failed(&self) -> bool {
        self.state.read().await.last_turn_failed
    }

    pub async fn sessions(&self) -> SessionList {
        self.state.read().await.sessions.clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{AskReply, QaPair};
    use crate::session::Role;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Scripted backend: pops one canned ask result per call and records what
    /// was sent.
    #[derive(Default)]
    struct MockBackend {
        replies: Mutex<VecDeque<Result<AskReply, RpcError>>>,
        asks: Mutex<Vec<RecordedAsk>>,
        listed: Mutex<Vec<SessionSummary>>,
        stored: Mutex<Vec<(String, Vec<QaPair>)>>,
        delete_ok: bool,
    }

    struct RecordedAsk {
        question: String,
        history_len: usize,
        session_id: Option<String>,
    }

    impl MockBackend {
        fn with_replies(replies: Vec<Result<AskReply, RpcError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                delete_ok: true,
                ..Self::default()
            }
        }

        fn ask_count(&self) -> usize {
            self.asks.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AiBackend for MockBackend {
        async fn ask(
            &self,
            question: &str,
            transcript: &[ChatMessage],
            session_id: Option<&str>,
        ) -> Result<AskReply, RpcError> {
            self.asks.lock().unwrap().push(RecordedAsk {
                question: question.to_string(),
                history_len: transcript.len(),
                session_id: session_id.map(str::to_string),
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(RpcError::EmptyReply))
        }

        async fn list_sessions(&self, _owner: &str) -> Result<Vec<SessionSummary>, RpcError> {
            Ok(self.listed.lock().unwrap().clone())
        }

        async fn fetch_messages(&self, session_id: &str) -> Result<Vec<QaPair>, RpcError> {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == session_id)
                .map(|(_, pairs)| pairs.clone())
                .unwrap_or_default())
        }

        async fn soft_delete(&self, _session_id: &str) -> Result<bool, RpcError> {
            Ok(self.delete_ok)
        }
    }

    fn ok_reply(session_id: Option<&str>, reply: &str) -> Result<AskReply, RpcError> {
        Ok(AskReply {
            session_id: session_id.map(str::to_string),
            reply: reply.to_string(),
        })
    }

    #[tokio::test]
    async fn new_session_holds_exactly_the_greeting() {
        let ctrl = ChatController::new(MockBackend::default());
        let transcript = ctrl.transcript().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::Assistant);
        assert_eq!(transcript[0].content, GREETING);
        assert!(ctrl.is_new().await);

        ctrl.start_new_session().await;
        let transcript = ctrl.transcript().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, GREETING);
    }

    #[tokio::test]
    async fn first_exchange_binds_id_and_lists_the_chat() {
        let backend = MockBackend::with_replies(vec![ok_reply(
            Some("sess-1"),
            "Here are 3 overdue invoices...",
        )]);
        let ctrl = ChatController::new(backend);

        let turn = ctrl.submit_question("Show overdue invoices").await.unwrap();
        assert_eq!(turn.reply, "Here are 3 overdue invoices...");
        assert_eq!(turn.new_session_id.as_deref(), Some("sess-1"));

        let transcript = ctrl.transcript().await;
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].content, GREETING);
        assert_eq!(transcript[1].role, Role::User);
        assert_eq!(transcript[1].content, "Show overdue invoices");
        assert_eq!(transcript[2].role, Role::Assistant);
        assert_eq!(transcript[2].content, "Here are 3 overdue invoices...");

        assert!(!ctrl.is_new().await);
        assert_eq!(ctrl.session_id().await.as_deref(), Some("sess-1"));
        let sessions = ctrl.sessions().await;
        assert_eq!(sessions.entries()[0].id, "sess-1");
        assert_eq!(sessions.entries()[0].title, "Show overdue invoices");
        assert_eq!(sessions.active(), Some("sess-1"));
        assert!(!ctrl.in_flight().await);
    }

    #[tokio::test]
    async fn transcript_grows_by_two_per_round_trip() {
        let backend = MockBackend::with_replies(vec![
            ok_reply(Some("sess-1"), "a1"),
            ok_reply(None, "a2"),
            ok_reply(None, "a3"),
        ]);
        let ctrl = ChatController::new(backend);
        for q in ["q1", "q2", "q3"] {
            ctrl.submit_question(q).await.unwrap();
        }
        // 2N + greeting
        assert_eq!(ctrl.transcript().await.len(), 7);
    }

    #[tokio::test]
    async fn greeting_is_excluded_from_the_history_snapshot() {
        let backend = MockBackend::with_replies(vec![ok_reply(Some("sess-1"), "a")]);
        let ctrl = ChatController::new(backend);
        ctrl.submit_question("q").await.unwrap();
        let asks = ctrl.backend().asks.lock().unwrap();
        assert_eq!(asks[0].question, "q");
        // Only the optimistic user message, not the greeting.
        assert_eq!(asks[0].history_len, 1);
        assert_eq!(asks[0].session_id, None);
    }

    #[tokio::test]
    async fn empty_question_is_rejected_without_state_change() {
        let ctrl = ChatController::new(MockBackend::default());
        let err = ctrl.submit_question("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyQuestion));
        assert_eq!(ctrl.transcript().await.len(), 1);
        assert_eq!(ctrl.backend().ask_count(), 0);
        assert!(!ctrl.in_flight().await);
    }

    #[tokio::test]
    async fn overlapping_submit_is_a_no_op() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let backend = GatedBackend {
            gate: gate.clone(),
            entered: entered.clone(),
            asks: Mutex::new(0),
        };
        let ctrl = Arc::new(ChatController::new(backend));

        let pending = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.submit_question("first").await })
        };
        entered.notified().await;

        let err = ctrl.submit_question("second").await.unwrap_err();
        assert!(matches!(err, ChatError::Busy));
        // greeting + the first (optimistic) user message only
        assert_eq!(ctrl.transcript().await.len(), 2);
        assert_eq!(*ctrl.backend().asks.lock().unwrap(), 1);

        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(ctrl.transcript().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_ask_keeps_the_question_and_allows_retry() {
        let backend = MockBackend::with_replies(vec![
            Err(RpcError::Api("boom".into())),
            ok_reply(Some("sess-1"), "answer"),
        ]);
        let ctrl = ChatController::new(backend);

        let err = ctrl.submit_question("q").await.unwrap_err();
        assert!(matches!(err, ChatError::Rpc(_)));
        let transcript = ctrl.transcript().await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].content, "q");
        assert!(!ctrl.in_flight().await);
        assert!(ctrl.last_turn_failed().await);
        assert!(ctrl.is_new().await);

        // Retry is accepted, not blocked.
        ctrl.submit_question("q").await.unwrap();
        assert!(!ctrl.last_turn_failed().await);
        assert_eq!(ctrl.backend().ask_count(), 2);
    }

    #[tokio::test]
    async fn empty_reply_is_surfaced_like_a_transport_failure() {
        let backend = MockBackend::with_replies(vec![Err(RpcError::EmptyReply)]);
        let ctrl = ChatController::new(backend);
        let err = ctrl.submit_question("q").await.unwrap_err();
        assert!(matches!(err, ChatError::Rpc(RpcError::EmptyReply)));
        assert_eq!(ctrl.transcript().await.len(), 2);
        assert!(!ctrl.in_flight().await);
    }

    #[tokio::test]
    async fn missing_id_for_new_session_leaves_it_unsaved() {
        let backend = MockBackend::with_replies(vec![ok_reply(None, "answer")]);
        let ctrl = ChatController::new(backend);
        let turn = ctrl.submit_question("q").await.unwrap();
        assert_eq!(turn.new_session_id, None);
        assert!(ctrl.is_new().await);
        assert!(ctrl.sessions().await.is_empty());
        // The answer is still applied.
        assert_eq!(ctrl.transcript().await.len(), 3);
    }

    #[tokio::test]
    async fn select_session_rebuilds_transcript_and_is_idempotent() {
        let backend = MockBackend::default();
        *backend.stored.lock().unwrap() = vec![(
            "sess-1".to_string(),
            vec![
                QaPair {
                    question: "q1".into(),
                    reply: "a1".into(),
                },
                QaPair {
                    question: "q2".into(),
                    reply: "a2".into(),
                },
            ],
        )];
        *backend.listed.lock().unwrap() = vec![SessionSummary {
            id: "sess-1".into(),
            title: "q1".into(),
        }];
        let ctrl = ChatController::new(backend);
        ctrl.refresh_sessions("someone@example.com").await.unwrap();

        ctrl.select_session("sess-1").await.unwrap();
        let first: Vec<(Role, String)> = ctrl
            .transcript()
            .await
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        assert_eq!(
            first,
            vec![
                (Role::User, "q1".to_string()),
                (Role::Assistant, "a1".to_string()),
                (Role::User, "q2".to_string()),
                (Role::Assistant, "a2".to_string()),
            ]
        );
        assert_eq!(ctrl.sessions().await.active(), Some("sess-1"));

        ctrl.select_session("sess-1").await.unwrap();
        let second: Vec<(Role, String)> = ctrl
            .transcript()
            .await
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn deleting_the_active_session_resets_to_a_new_chat() {
        let backend = MockBackend::with_replies(vec![ok_reply(Some("sess-1"), "a")]);
        let ctrl = ChatController::new(backend);
        ctrl.submit_question("q").await.unwrap();

        ctrl.delete_session("sess-1").await.unwrap();
        let transcript = ctrl.transcript().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, GREETING);
        assert!(ctrl.is_new().await);
        assert!(ctrl.sessions().await.is_empty());
        assert_eq!(ctrl.sessions().await.active(), None);
        assert!(!ctrl.in_flight().await);
    }

    #[tokio::test]
    async fn deleting_an_inactive_session_keeps_the_current_chat() {
        let backend = MockBackend::with_replies(vec![ok_reply(Some("sess-1"), "a")]);
        *backend.listed.lock().unwrap() = vec![
            SessionSummary {
                id: "sess-1".into(),
                title: "one".into(),
            },
            SessionSummary {
                id: "sess-2".into(),
                title: "two".into(),
            },
        ];
        let ctrl = ChatController::new(backend);
        ctrl.refresh_sessions("someone@example.com").await.unwrap();
        ctrl.submit_question("q").await.unwrap();

        ctrl.delete_session("sess-2").await.unwrap();
        assert_eq!(ctrl.session_id().await.as_deref(), Some("sess-1"));
        assert_eq!(ctrl.transcript().await.len(), 3);
        assert_eq!(ctrl.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn refused_delete_leaves_the_list_untouched() {
        let backend = MockBackend {
            listed: Mutex::new(vec![SessionSummary {
                id: "sess-1".into(),
                title: "one".into(),
            }]),
            delete_ok: false,
            ..MockBackend::default()
        };
        let ctrl = ChatController::new(backend);
        ctrl.refresh_sessions("someone@example.com").await.unwrap();

        let err = ctrl.delete_session("sess-1").await.unwrap_err();
        assert!(matches!(err, ChatError::DeleteFailed));
        assert_eq!(ctrl.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn reply_for_a_replaced_session_is_discarded() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let backend = GatedBackend {
            gate: gate.clone(),
            entered: entered.clone(),
            asks: Mutex::new(0),
        };
        let ctrl = Arc::new(ChatController::new(backend));

        let pending = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.submit_question("q").await })
        };
        entered.notified().await;

        // Abandon the session while the ask is in flight.
        ctrl.start_new_session().await;
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ChatError::SessionGone));
        let transcript = ctrl.transcript().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, GREETING);
        assert!(!ctrl.in_flight().await);
    }

    /// Backend that parks in `ask` until released, for interleaving tests.
    struct GatedBackend {
        gate: Arc<Notify>,
        entered: Arc<Notify>,
        asks: Mutex<usize>,
    }

    #[async_trait]
    impl AiBackend for GatedBackend {
        async fn ask(
            &self,
            _question: &str,
            _transcript: &[ChatMessage],
            _session_id: Option<&str>,
        ) -> Result<AskReply, RpcError> {
            *self.asks.lock().unwrap() += 1;
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(AskReply {
                session_id: Some("sess-late".to_string()),
                reply: "late answer".to_string(),
            })
        }

        async fn list_sessions(&self, _owner: &str) -> Result<Vec<SessionSummary>, RpcError> {
            Ok(vec![])
        }

        async fn fetch_messages(&self, _session_id: &str) -> Result<Vec<QaPair>, RpcError> {
            Ok(vec![])
        }

        async fn soft_delete(&self, _session_id: &str) -> Result<bool, RpcError> {
            Ok(true)
        }
    }
}
