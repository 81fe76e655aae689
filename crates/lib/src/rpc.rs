//! Remote AI backend: trait seam plus the Frappe-style RPC client.
//!
//! The server exposes four whitelisted methods under `/api/method/{root}.{name}`
//! and wraps every response in a `{"message": ...}` envelope. The ask reply is
//! historically duck-typed (bare string or `{chat_name, ai_response}` object);
//! this client decodes both into one tagged [`AskReply`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{ChatMessage, SessionSummary};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_METHOD_ROOT: &str = "pulsar_ai.api";

/// Reply to an ask: the answer text, and the assigned chat id when the
/// question started a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskReply {
    pub session_id: Option<String>,
    pub reply: String,
}

/// One stored exchange; expands to a user message followed by its paired
/// assistant message when a session is loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct QaPair {
    #[serde(rename = "user_question")]
    pub question: String,
    #[serde(rename = "ai_response")]
    pub reply: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
    #[error("backend returned an empty reply")]
    EmptyReply,
}

/// The remote collaborator behind the chat: ask a question, list saved chats,
/// load one chat's history, soft-delete a chat.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Submit a question with the transcript so far. `session_id` is None for
    /// a not-yet-persisted session; the backend then creates one and returns
    /// its id in the reply.
    async fn ask(
        &self,
        question: &str,
        transcript: &[ChatMessage],
        session_id: Option<&str>,
    ) -> Result<AskReply, RpcError>;

    /// Saved chats for `owner`, most recent first.
    async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>, RpcError>;

    /// Full stored history of one chat, in order.
    async fn fetch_messages(&self, session_id: &str) -> Result<Vec<QaPair>, RpcError>;

    /// Logically delete a chat. Returns the server's success flag.
    async fn soft_delete(&self, session_id: &str) -> Result<bool, RpcError>;
}

/// API key/secret pair sent as `Authorization: token key:secret`.
#[derive(Debug, Clone)]
pub struct ApiAuth {
    pub key: String,
    pub secret: String,
}

/// Client for the Frappe-style RPC surface.
#[derive(Clone)]
pub struct FrappeClient {
    base_url: String,
    method_root: String,
    auth: Option<ApiAuth>,
    client: reqwest::Client,
}

impl FrappeClient {
    pub fn new(
        base_url: Option<String>,
        method_root: Option<String>,
        auth: Option<ApiAuth>,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let method_root = method_root
            .map(|r| r.trim_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_METHOD_ROOT.to_string());
        Self {
            base_url,
            method_root,
            auth,
            client: reqwest::Client::new(),
        }
    }

    /// Server origin, e.g. for turning `/files/...` paths into full URLs.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `/api/method/{root}.{method}`, unwrap the `message` envelope.
    async fn call<A: Serialize>(&self, method: &str, args: &A) -> Result<Value, RpcError> {
        let url = format!("{}/api/method/{}.{}", self.base_url, self.method_root, method);
        let mut req = self.client.post(&url).json(args);
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", format!("token {}:{}", auth.key, auth.secret));
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RpcError::Api(format!("{} {}", status, body)));
        }
        let data: Envelope = res.json().await?;
        data.message
            .ok_or_else(|| RpcError::Api("response had no message".to_string()))
    }
}

#[async_trait]
impl AiBackend for FrappeClient {
    async fn ask(
        &self,
        question: &str,
        transcript: &[ChatMessage],
        session_id: Option<&str>,
    ) -> Result<AskReply, RpcError> {
        let history_json = serde_json::to_string(transcript)
            .map_err(|e| RpcError::Api(format!("encoding history: {}", e)))?;
        let args = AskArgs {
            user_question: question,
            chat_history_json: &history_json,
            // Empty string is the server's "create a new chat" sentinel.
            ai_chat_name: session_id.unwrap_or(""),
        };
        let message = self.call("ask_ai", &args).await?;
        decode_ask(message)
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>, RpcError> {
        let message = self
            .call("get_user_ai_chats", &serde_json::json!({ "owner_id": owner }))
            .await?;
        let rows: Vec<ChatRow> =
            serde_json::from_value(message).map_err(|e| RpcError::Api(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| SessionSummary {
                id: r.name,
                title: r.title,
            })
            .collect())
    }

    async fn fetch_messages(&self, session_id: &str) -> Result<Vec<QaPair>, RpcError> {
        let message = self
            .call(
                "get_ai_chat_messages",
                &serde_json::json!({ "chat_name": session_id }),
            )
            .await?;
        serde_json::from_value(message).map_err(|e| RpcError::Api(e.to_string()))
    }

    async fn soft_delete(&self, session_id: &str) -> Result<bool, RpcError> {
        let message = self
            .call(
                "soft_delete_ai_chat",
                &serde_json::json!({ "chat_name": session_id }),
            )
            .await?;
        let res: DeleteResult =
            serde_json::from_value(message).map_err(|e| RpcError::Api(e.to_string()))?;
        Ok(res.success)
    }
}

#[derive(Serialize)]
struct AskArgs<'a> {
    user_question: &'a str,
    chat_history_json: &'a str,
    ai_chat_name: &'a str,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    message: Option<Value>,
}

#[derive(Deserialize)]
struct ChatRow {
    name: String,
    title: String,
}

#[derive(Deserialize)]
struct DeleteResult {
    #[serde(default)]
    success: bool,
}

/// Decode an ask reply. Accepts a bare string or an object with `ai_response`
/// and optional `chat_name`; a missing or blank answer is an error.
fn decode_ask(message: Value) -> Result<AskReply, RpcError> {
    let (session_id, reply) = match message {
        Value::String(s) => (None, s),
        Value::Object(mut obj) => {
            let session_id = match obj.remove("chat_name") {
                Some(Value::String(s)) if !s.is_empty() => Some(s),
                _ => None,
            };
            let reply = match obj.remove("ai_response") {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => {
                    return Err(RpcError::Api(format!("unexpected ai_response: {}", other)))
                }
            };
            (session_id, reply)
        }
        other => return Err(RpcError::Api(format!("unexpected reply shape: {}", other))),
    };
    if reply.trim().is_empty() {
        return Err(RpcError::EmptyReply);
    }
    Ok(AskReply { session_id, reply })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ask_bare_string() {
        let reply = decode_ask(Value::String("hello".into())).unwrap();
        assert_eq!(reply.session_id, None);
        assert_eq!(reply.reply, "hello");
    }

    #[test]
    fn decode_ask_object_with_chat_name() {
        let reply = decode_ask(serde_json::json!({
            "chat_name": "sess-1",
            "ai_response": "Here are 3 overdue invoices..."
        }))
        .unwrap();
        assert_eq!(reply.session_id.as_deref(), Some("sess-1"));
        assert_eq!(reply.reply, "Here are 3 overdue invoices...");
    }

    #[test]
    fn decode_ask_blank_reply_is_empty_reply_error() {
        let err = decode_ask(serde_json::json!({ "ai_response": "  " })).unwrap_err();
        assert!(matches!(err, RpcError::EmptyReply));

        let err = decode_ask(serde_json::json!({ "chat_name": "sess-1" })).unwrap_err();
        assert!(matches!(err, RpcError::EmptyReply));
    }

    #[test]
    fn decode_ask_rejects_unexpected_shape() {
        let err = decode_ask(Value::Number(7.into())).unwrap_err();
        assert!(matches!(err, RpcError::Api(_)));
    }

    #[test]
    fn decode_ask_empty_chat_name_means_no_binding() {
        let reply = decode_ask(serde_json::json!({
            "chat_name": "",
            "ai_response": "ok"
        }))
        .unwrap();
        assert_eq!(reply.session_id, None);
    }
}
