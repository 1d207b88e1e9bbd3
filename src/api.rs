//! Request/response client for the chat backend.
//!
//! Every call goes through one [`ApiClient`] built from an explicit
//! [`ClientConfig`]; the streaming endpoint is opened by [`crate::stream`]
//! using the same client and configuration.

use reqwest::multipart::{Form, Part};
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::types::{Capabilities, ConversationMessage};

const MAX_TITLE_CHARS: usize = 100;
const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the API, without a trailing slash (e.g. `http://localhost:8000/api`).
    pub base_url: String,
    /// Applied to every request/response call. Streams use `stream_idle_timeout` instead.
    pub request_timeout: Duration,
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct ThreadList {
    threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl HistoryMessage {
    /// Tool messages are part of the stored history but never shown.
    pub fn to_message(&self) -> Option<ConversationMessage> {
        match self.kind.as_str() {
            "human" => Some(ConversationMessage::human(self.content.clone(), &Capabilities::new())),
            "ai" => Some(ConversationMessage::agent(self.content.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThreadHistory {
    #[allow(dead_code)]
    thread_id: String,
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(thread_id: &str, message: &str, tools: &Capabilities) -> Self {
        ChatRequest {
            message: message.to_string(),
            thread_id: thread_id.to_string(),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(|t| t.as_str().to_string()).collect())
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub thread_id: String,
    #[serde(default)]
    pub has_tool_calls: bool,
}

#[derive(Debug, Serialize)]
struct TitleUpdate<'a> {
    title: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub filename: String,
    pub documents: u32,
    pub chunks: u32,
    pub thread_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInfo {
    pub has_document: bool,
    pub filename: Option<String>,
    pub documents: Option<u32>,
    pub chunks: Option<u32>,
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
struct DocumentQuery<'a> {
    query: &'a str,
    thread_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentAnswer {
    pub answer: String,
    #[serde(default)]
    pub context: Vec<String>,
    pub source_file: Option<String>,
    pub thread_id: String,
}

impl DocumentAnswer {
    /// The answer as shown in the conversation, with its source noted underneath.
    pub fn to_markdown(&self) -> String {
        match &self.source_file {
            Some(file) => format!("{}\n\n*Source: {}*", self.answer.trim_end(), file),
            None => self.answer.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteStatus {
    #[serde(default)]
    status: Option<String>,
}

/// Parameters of one streaming request.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub thread_id: String,
    pub message: String,
    pub tools: Capabilities,
}

#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        ApiClient {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ApiError::Invalid(format!("bad base url {}: {}", self.config.base_url, e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::Invalid(format!("base url cannot take a path: {}", self.config.base_url)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// URL of the server-push endpoint; the message is percent-encoded into the query.
    pub fn stream_url(&self, params: &StreamParams) -> ApiResult<Url> {
        let mut url = self.endpoint(&["chat", "stream"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("thread_id", &params.thread_id);
            query.append_pair("message", &params.message);
            if !params.tools.is_empty() {
                let tools: Vec<&str> = params.tools.iter().map(|t| t.as_str()).collect();
                query.append_pair("tools", &tools.join(","));
            }
        }
        Ok(url)
    }

    pub async fn list_threads(&self) -> ApiResult<Vec<ThreadSummary>> {
        let response = self
            .client
            .get(self.endpoint(&["threads"])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let list: ThreadList = check(response).await?.json().await?;
        Ok(list.threads)
    }

    pub async fn create_thread(&self) -> ApiResult<ThreadSummary> {
        let response = self
            .client
            .post(self.endpoint(&["threads", "new"])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn thread_messages(&self, thread_id: &str) -> ApiResult<Vec<HistoryMessage>> {
        let response = self
            .client
            .get(self.endpoint(&["threads", thread_id])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let history: ThreadHistory = check(response).await?.json().await?;
        Ok(history.messages)
    }

    pub async fn rename_thread(&self, thread_id: &str, title: &str) -> ApiResult<String> {
        let title = validate_title(title)?;
        let response = self
            .client
            .put(self.endpoint(&["threads", thread_id, "title"])?)
            .timeout(self.config.request_timeout)
            .json(&TitleUpdate { title: &title })
            .send()
            .await?;
        check(response).await?;
        Ok(title)
    }

    /// Delete a thread on the server. Older servers answer `not_implemented`
    /// without deleting; that is logged and treated as done.
    pub async fn delete_thread(&self, thread_id: &str) -> ApiResult<()> {
        let response = self
            .client
            .delete(self.endpoint(&["threads", thread_id])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        if let Ok(DeleteStatus { status: Some(status) }) = serde_json::from_str::<DeleteStatus>(&body) {
            if status == "not_implemented" {
                warn!(thread_id, "server does not delete threads, removing it locally only");
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, request: &ChatRequest) -> ApiResult<ChatReply> {
        debug!(thread_id = %request.thread_id, tools = ?request.tools, "sending chat message");
        let response = self
            .client
            .post(self.endpoint(&["chat"])?)
            .timeout(self.config.request_timeout)
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn upload_pdf(&self, thread_id: &str, path: &Path) -> ApiResult<UploadReceipt> {
        let (filename, bytes) = read_pdf(path).await?;
        debug!(thread_id, %filename, size = bytes.len(), "uploading document");

        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str("application/pdf")?;
        let form = Form::new()
            .part("file", part)
            .text("thread_id", thread_id.to_string());

        let response = self
            .client
            .post(self.endpoint(&["upload-pdf"])?)
            .query(&[("thread_id", thread_id)])
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn document_info(&self, thread_id: &str) -> ApiResult<DocumentInfo> {
        let response = self
            .client
            .get(self.endpoint(&["threads", thread_id, "document"])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn query_document(&self, thread_id: &str, query: &str) -> ApiResult<DocumentAnswer> {
        if query.trim().is_empty() {
            return Err(ApiError::Invalid("query is empty".to_string()));
        }
        let response = self
            .client
            .post(self.endpoint(&["query-document"])?)
            .timeout(self.config.request_timeout)
            .json(&DocumentQuery { query, thread_id })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

async fn check(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        detail: error_detail(&body),
    })
}

/// Pull a human readable explanation out of an error body (`{"detail": ...}` or plain text).
pub fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match value.get("detail") {
            Some(Value::String(s)) => return s.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no details".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn validate_title(title: &str) -> ApiResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::Invalid("title is empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::Invalid(format!("title is longer than {} characters", MAX_TITLE_CHARS)));
    }
    Ok(title.to_string())
}

async fn read_pdf(path: &Path) -> ApiResult<(String, Vec<u8>)> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let is_pdf_name = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf_name {
        return Err(ApiError::Invalid(format!("{} is not a PDF file", path.display())));
    }

    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ApiError::Invalid(format!("{} is not a PDF file", path.display())));
    }
    Ok((filename, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_once, HttpReply};
    use crate::types::Capability;
    use std::io::Write;

    fn client_for(base_url: &str) -> ApiClient {
        ApiClient::new(ClientConfig {
            base_url: base_url.to_string(),
            ..ClientConfig::default()
        })
    }

    #[test]
    fn test_stream_url_encodes_message() {
        let client = client_for("http://localhost:8000/api");
        let params = StreamParams {
            thread_id: "t-1".to_string(),
            message: "rust & tokio?".to_string(),
            tools: [Capability::Blogs].into_iter().collect(),
        };
        let url = client.stream_url(&params).unwrap();
        assert_eq!(url.path(), "/api/chat/stream");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("thread_id".to_string(), "t-1".to_string()),
                ("message".to_string(), "rust & tokio?".to_string()),
                ("tools".to_string(), "blogs".to_string()),
            ]
        );
        assert!(!url.as_str().contains("rust & tokio"));
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let client = client_for("http://localhost:8000/api/");
        let url = client.endpoint(&["threads", "abc", "title"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/threads/abc/title");
    }

    #[test]
    fn test_chat_request_omits_empty_tools() {
        let request = ChatRequest::new("t", "hello", &Capabilities::new());
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());

        let tools: Capabilities = [Capability::Search].into_iter().collect();
        let json = serde_json::to_value(ChatRequest::new("t", "hello", &tools)).unwrap();
        assert_eq!(json["tools"], serde_json::json!(["search"]));
    }

    #[test]
    fn test_error_detail() {
        assert_eq!(error_detail(r#"{"detail": "Thread not found"}"#), "Thread not found");
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_detail(""), "no details");
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("  Trip plans ").unwrap(), "Trip plans");
        assert!(matches!(validate_title("   "), Err(ApiError::Invalid(_))));
        assert!(validate_title(&"x".repeat(101)).is_err());
        assert!(validate_title(&"é".repeat(100)).is_ok());
    }

    #[test]
    fn test_history_message_mapping() {
        let human = HistoryMessage { content: "hi".into(), kind: "human".into() };
        let tool = HistoryMessage { content: "{}".into(), kind: "tool".into() };
        assert!(human.to_message().unwrap().is_human());
        assert!(tool.to_message().is_none());
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"just some text").unwrap();

        let client = client_for("http://127.0.0.1:9/api");
        let err = client.upload_pdf("t", file.path()).await.unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));

        let txt = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        let err = client.upload_pdf("t", txt.path()).await.unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_send_message_round_trip() {
        let (base_url, request) = serve_once(HttpReply::json(
            200,
            r#"{"response": "Hi there", "thread_id": "t-9", "has_tool_calls": true}"#,
        ))
        .await;

        let client = client_for(&base_url);
        let tools: Capabilities = [Capability::Search].into_iter().collect();
        let reply = client
            .send_message(&ChatRequest::new("t-9", "hello", &tools))
            .await
            .unwrap();
        assert_eq!(reply.response, "Hi there");
        assert!(reply.has_tool_calls);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/chat "));
        assert!(raw.contains(r#""tools":["search"]"#));
    }

    #[tokio::test]
    async fn test_query_document_round_trip() {
        let (base_url, request) = serve_once(HttpReply::json(
            200,
            r#"{"answer": "Chapter 2 covers ownership.", "context": ["ownership rules"], "source_file": "book.pdf", "thread_id": "t-3"}"#,
        ))
        .await;

        let answer = client_for(&base_url)
            .query_document("t-3", "what is chapter 2 about?")
            .await
            .unwrap();
        assert_eq!(answer.answer, "Chapter 2 covers ownership.");
        assert_eq!(answer.context, vec!["ownership rules".to_string()]);
        assert_eq!(answer.to_markdown(), "Chapter 2 covers ownership.\n\n*Source: book.pdf*");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/query-document "));
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        let json: Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["query"], "what is chapter 2 about?");
        assert_eq!(json["thread_id"], "t-3");
    }

    #[tokio::test]
    async fn test_query_document_rejects_empty_query() {
        let err = client_for("http://127.0.0.1:9/api").query_document("t", "  ").await.unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let (base_url, request) = serve_once(HttpReply::json(
            200,
            r#"{"status": "not_implemented", "message": "Thread deletion not yet implemented"}"#,
        ))
        .await;

        client_for(&base_url).delete_thread("t-4").await.unwrap();
        let raw = request.await.unwrap();
        assert!(raw.starts_with("DELETE /api/threads/t-4 "));
    }

    #[tokio::test]
    async fn test_status_error_carries_detail() {
        let (base_url, _request) =
            serve_once(HttpReply::json(404, r#"{"detail": "Thread not found"}"#)).await;

        let err = client_for(&base_url).thread_messages("missing").await.unwrap_err();
        match err {
            ApiError::Status { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Thread not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
