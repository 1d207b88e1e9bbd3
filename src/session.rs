//! Chat session controller.
//!
//! Owns per-thread history, picks the streaming or direct path for each
//! submitted message, and is the only writer of the state the UI renders.
//! I/O is left to the caller: [`ChatSession::submit`] hands back a
//! [`Dispatch`] describing the request to issue, and the results are fed
//! back through [`ChatSession::complete_direct`] and
//! [`ChatSession::apply_stream`].

use std::collections::{HashMap, VecDeque};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ChatRequest, DocumentInfo, HistoryMessage, StreamParams, ThreadSummary};
use crate::progress::{ProgressMachine, ProgressSession, Step};
use crate::stream::StreamUpdate;
use crate::types::{Capabilities, Capability, ConversationMessage};

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Stream(Capability),
    /// Question answered from the thread's uploaded document.
    Document,
}

/// A request the caller must issue on behalf of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub request_id: RequestId,
    pub thread_id: String,
    pub text: String,
    pub tools: Capabilities,
    pub route: Route,
}

impl Dispatch {
    pub fn chat_request(&self) -> ChatRequest {
        ChatRequest::new(&self.thread_id, &self.text, &self.tools)
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            thread_id: self.thread_id.clone(),
            message: self.text.clone(),
            tools: self.tools.clone(),
        }
    }
}

/// What the controller reports after applying a result.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Next queued request for the same thread, now released.
    pub next: Option<Dispatch>,
    /// Agent reply committed by a finished stream.
    pub finished: Option<ConversationMessage>,
}

/// Read-only view published to observers after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub current_thread: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub loading: bool,
    pub error: Option<String>,
    pub progress: Option<ProgressSession>,
}

struct InFlight {
    request_id: RequestId,
    machine: Option<ProgressMachine>,
}

pub struct ChatSession {
    threads: Vec<ThreadSummary>,
    current_thread: Option<String>,
    histories: HashMap<String, Vec<ConversationMessage>>,
    in_flight: HashMap<String, InFlight>,
    queued: HashMap<String, VecDeque<Dispatch>>,
    documents: HashMap<String, DocumentInfo>,
    error: Option<String>,
    next_request: RequestId,
    observers: watch::Sender<SessionSnapshot>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        let (observers, _) = watch::channel(SessionSnapshot::default());
        ChatSession {
            threads: Vec::new(),
            current_thread: None,
            histories: HashMap::new(),
            in_flight: HashMap::new(),
            queued: HashMap::new(),
            documents: HashMap::new(),
            error: None,
            next_request: 1,
            observers,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        // snapshots are only built while someone listens, so refresh before handing one out
        self.observers.send_replace(self.snapshot());
        self.observers.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let current = self.current_thread.clone();
        SessionSnapshot {
            messages: current
                .as_deref()
                .map(|id| self.messages(id).to_vec())
                .unwrap_or_default(),
            loading: current.as_deref().map(|id| self.is_loading(id)).unwrap_or(false),
            progress: current.as_deref().and_then(|id| self.progress(id)).cloned(),
            error: self.error.clone(),
            current_thread: current,
        }
    }

    fn publish(&self) {
        if self.observers.receiver_count() == 0 {
            return;
        }
        self.observers.send_replace(self.snapshot());
    }

    // threads

    pub fn threads(&self) -> &[ThreadSummary] {
        &self.threads
    }

    pub fn current_thread(&self) -> Option<&str> {
        self.current_thread.as_deref()
    }

    pub fn current_title(&self) -> &str {
        self.current_thread
            .as_deref()
            .and_then(|id| self.threads.iter().find(|t| t.thread_id == id))
            .map(|t| t.title.as_str())
            .unwrap_or("New Chat")
    }

    pub fn set_threads(&mut self, threads: Vec<ThreadSummary>) {
        self.threads = threads;
        self.publish();
    }

    /// Make `thread_id` current. Returns true when its history has not been loaded yet.
    pub fn select_thread(&mut self, thread_id: &str) -> bool {
        if thread_id.trim().is_empty() {
            return false;
        }
        self.current_thread = Some(thread_id.to_string());
        let needs_history = !self.histories.contains_key(thread_id);
        self.publish();
        needs_history
    }

    pub fn add_thread(&mut self, thread: ThreadSummary) {
        if !self.threads.iter().any(|t| t.thread_id == thread.thread_id) {
            self.threads.insert(0, thread);
        }
        self.publish();
    }

    /// Forget everything held for `thread_id`. Returns true when it was the
    /// current thread, which leaves no thread selected.
    ///
    /// The caller closes any stream it still holds for the thread.
    pub fn remove_thread(&mut self, thread_id: &str) -> bool {
        self.threads.retain(|t| t.thread_id != thread_id);
        self.histories.remove(thread_id);
        self.documents.remove(thread_id);
        self.queued.remove(thread_id);
        if let Some(flight) = self.in_flight.remove(thread_id) {
            info!(thread_id, request_id = flight.request_id, "dropping running request of a deleted thread");
        }

        let was_current = self.current_thread.as_deref() == Some(thread_id);
        if was_current {
            self.current_thread = None;
        }
        self.publish();
        was_current
    }

    pub fn rename_thread(&mut self, thread_id: &str, title: &str) {
        if let Some(thread) = self.threads.iter_mut().find(|t| t.thread_id == thread_id) {
            thread.title = title.to_string();
        }
        self.publish();
    }

    /// Replace a thread's history with what the server holds. Skipped while a
    /// request for that thread is outstanding so optimistic messages survive.
    pub fn load_history(&mut self, thread_id: &str, history: &[HistoryMessage]) {
        if self.is_loading(thread_id) {
            debug!(thread_id, "history arrived while a request is in flight, keeping local copy");
            return;
        }
        let messages = history.iter().filter_map(HistoryMessage::to_message).collect();
        self.histories.insert(thread_id.to_string(), messages);
        self.publish();
    }

    pub fn messages(&self, thread_id: &str) -> &[ConversationMessage] {
        self.histories.get(thread_id).map(Vec::as_slice).unwrap_or(&[])
    }

    // documents

    pub fn set_document(&mut self, info: DocumentInfo) {
        if info.has_document {
            self.documents.insert(info.thread_id.clone(), info);
        } else {
            self.documents.remove(&info.thread_id);
        }
        self.publish();
    }

    pub fn document(&self, thread_id: &str) -> Option<&DocumentInfo> {
        self.documents.get(thread_id)
    }

    // errors

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        warn!("{}", error);
        self.error = Some(error);
        self.publish();
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.publish();
    }

    // messages

    pub fn is_loading(&self, thread_id: &str) -> bool {
        self.in_flight.contains_key(thread_id)
    }

    pub fn progress(&self, thread_id: &str) -> Option<&ProgressSession> {
        self.in_flight
            .get(thread_id)
            .and_then(|f| f.machine.as_ref())
            .and_then(ProgressMachine::session)
    }

    /// Record a new outgoing message.
    ///
    /// The human message is appended before anything else happens. Returns the
    /// request to issue now, or `None` when the input is invalid or an earlier
    /// request for the thread is still running (the new one is queued).
    pub fn submit(&mut self, thread_id: &str, text: &str, capabilities: &Capabilities) -> Option<Dispatch> {
        let route = match capabilities.iter().find(|c| c.is_multi_stage()) {
            Some(tool) => Route::Stream(*tool),
            None => Route::Direct,
        };
        self.enqueue(thread_id, text, capabilities, route)
    }

    /// Like [`ChatSession::submit`], but the question goes to the thread's
    /// document instead of the agent. Requires an uploaded document.
    pub fn ask_document(&mut self, thread_id: &str, text: &str) -> Option<Dispatch> {
        if self.document(thread_id).is_none() {
            self.error = Some("Upload a PDF before asking about a document".to_string());
            self.publish();
            return None;
        }
        self.enqueue(thread_id, text, &Capabilities::new(), Route::Document)
    }

    fn enqueue(&mut self, thread_id: &str, text: &str, capabilities: &Capabilities, route: Route) -> Option<Dispatch> {
        if thread_id.trim().is_empty() || text.trim().is_empty() {
            debug!("ignoring submit with empty thread or message");
            return None;
        }

        let request_id = self.next_request;
        self.next_request += 1;

        let mut message = ConversationMessage::human(text, capabilities);
        message.pending = true;
        message.request_id = Some(request_id);
        self.histories.entry(thread_id.to_string()).or_default().push(message);

        let dispatch = Dispatch {
            request_id,
            thread_id: thread_id.to_string(),
            text: text.to_string(),
            tools: capabilities.clone(),
            route,
        };

        if self.is_loading(thread_id) {
            debug!(thread_id, request_id, "queueing behind the running request");
            self.queued.entry(thread_id.to_string()).or_default().push_back(dispatch);
            self.publish();
            return None;
        }

        self.begin(&dispatch);
        self.publish();
        Some(dispatch)
    }

    fn begin(&mut self, dispatch: &Dispatch) {
        let machine = match dispatch.route {
            Route::Stream(tool) => ProgressMachine::start(tool),
            Route::Direct | Route::Document => None,
        };
        info!(thread_id = %dispatch.thread_id, request_id = dispatch.request_id, route = ?dispatch.route, "starting request");
        self.in_flight.insert(
            dispatch.thread_id.clone(),
            InFlight {
                request_id: dispatch.request_id,
                machine,
            },
        );
    }

    fn release_next(&mut self, thread_id: &str) -> Option<Dispatch> {
        let queue = self.queued.get_mut(thread_id)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            self.queued.remove(thread_id);
        }
        let next = next?;
        self.begin(&next);
        Some(next)
    }

    fn take_in_flight(&mut self, thread_id: &str, request_id: RequestId) -> Option<InFlight> {
        match self.in_flight.get(thread_id) {
            Some(f) if f.request_id == request_id => self.in_flight.remove(thread_id),
            _ => {
                debug!(thread_id, request_id, "result for a request that is no longer running");
                None
            }
        }
    }

    /// Confirm the optimistic message and place the reply right after it.
    fn commit(&mut self, thread_id: &str, request_id: RequestId, reply: ConversationMessage) {
        let history = self.histories.entry(thread_id.to_string()).or_default();
        match history.iter().position(|m| m.request_id == Some(request_id)) {
            Some(index) => {
                history[index].pending = false;
                history.insert(index + 1, reply);
            }
            None => history.push(reply),
        }
    }

    fn settle(&mut self, thread_id: &str, request_id: RequestId) {
        if let Some(history) = self.histories.get_mut(thread_id) {
            if let Some(message) = history.iter_mut().find(|m| m.request_id == Some(request_id)) {
                message.pending = false;
            }
        }
    }

    /// Apply the answer of a direct or document request.
    pub fn complete_direct(
        &mut self,
        thread_id: &str,
        request_id: RequestId,
        result: Result<String, String>,
    ) -> Outcome {
        if self.take_in_flight(thread_id, request_id).is_none() {
            return Outcome::default();
        }

        match result {
            Ok(reply) => {
                self.commit(thread_id, request_id, ConversationMessage::agent(reply));
                self.error = None;
            }
            Err(error) => {
                warn!(thread_id, request_id, "chat request failed: {}", error);
                self.settle(thread_id, request_id);
                self.error = Some(error);
            }
        }

        let next = self.release_next(thread_id);
        self.publish();
        Outcome { next, finished: None }
    }

    /// Feed one transport update to the thread's progress machine.
    pub fn apply_stream(&mut self, thread_id: &str, request_id: RequestId, update: StreamUpdate) -> Outcome {
        let step = match self.in_flight.get_mut(thread_id) {
            Some(InFlight {
                request_id: running,
                machine: Some(machine),
            }) if *running == request_id => machine.handle(update),
            _ => {
                debug!(thread_id, request_id, "stream update for a request that is no longer running");
                return Outcome::default();
            }
        };

        let finished = match step {
            Step::Ignored => return Outcome::default(),
            Step::Updated => {
                self.publish();
                return Outcome::default();
            }
            Step::Finished(reply) => {
                self.in_flight.remove(thread_id);
                self.commit(thread_id, request_id, reply.clone());
                self.error = None;
                Some(reply)
            }
            Step::Failed(reason) => {
                warn!(thread_id, request_id, "streaming failed: {}", reason);
                self.in_flight.remove(thread_id);
                self.settle(thread_id, request_id);
                self.error = Some(format!("Streaming error: {}", reason));
                None
            }
        };

        let next = self.release_next(thread_id);
        self.publish();
        Outcome { next, finished }
    }

    /// Abandon the running stream for `thread_id` after its transport was closed.
    pub fn cancel_stream(&mut self, thread_id: &str) -> Outcome {
        let streaming = matches!(self.in_flight.get(thread_id), Some(InFlight { machine: Some(_), .. }));
        if !streaming {
            return Outcome::default();
        }
        if let Some(flight) = self.in_flight.remove(thread_id) {
            info!(thread_id, request_id = flight.request_id, "stream cancelled");
            self.settle(thread_id, flight.request_id);
        }
        let next = self.release_next(thread_id);
        self.publish();
        Outcome { next, finished: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEvent;
    use crate::types::Role;

    fn no_tools() -> Capabilities {
        Capabilities::new()
    }

    fn blogs() -> Capabilities {
        [Capability::Blogs].into_iter().collect()
    }

    fn reply(text: &str) -> Result<String, String> {
        Ok(text.to_string())
    }

    fn contents(session: &ChatSession, thread_id: &str) -> Vec<(Role, String)> {
        session
            .messages(thread_id)
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    #[test]
    fn test_blank_input_is_a_no_op() {
        let mut session = ChatSession::new();
        assert!(session.submit("t", "   \n", &no_tools()).is_none());
        assert!(session.submit("", "hello", &no_tools()).is_none());
        assert!(session.messages("t").is_empty());
        assert!(session.messages("").is_empty());
        assert!(!session.is_loading("t"));
    }

    #[test]
    fn test_direct_submit_and_reply() {
        let mut session = ChatSession::new();
        let search: Capabilities = [Capability::Search].into_iter().collect();
        let dispatch = session.submit("t", "weather in Oslo?", &search).unwrap();
        assert_eq!(dispatch.route, Route::Direct);
        assert_eq!(dispatch.chat_request().tools, Some(vec!["search".to_string()]));

        let pending = &session.messages("t")[0];
        assert!(pending.pending);
        assert_eq!(pending.tools, Some(search));
        assert!(session.is_loading("t"));

        let outcome = session.complete_direct("t", dispatch.request_id, reply("Rainy"));
        assert!(outcome.next.is_none());
        assert_eq!(
            contents(&session, "t"),
            vec![(Role::Human, "weather in Oslo?".into()), (Role::Agent, "Rainy".into())]
        );
        assert!(!session.messages("t")[0].pending);
        assert!(!session.is_loading("t"));
        assert!(session.error().is_none());
    }

    #[test]
    fn test_direct_failure_keeps_human_message() {
        let mut session = ChatSession::new();
        let dispatch = session.submit("t", "hello", &no_tools()).unwrap();
        session.complete_direct("t", dispatch.request_id, Err("server returned 500: boom".into()));

        assert_eq!(contents(&session, "t"), vec![(Role::Human, "hello".into())]);
        assert_eq!(session.error(), Some("server returned 500: boom"));
        assert!(!session.is_loading("t"));
    }

    #[test]
    fn test_blog_submit_streams() {
        let mut session = ChatSession::new();
        session.select_thread("t");
        let dispatch = session.submit("t", "rust async", &blogs()).unwrap();
        assert_eq!(dispatch.route, Route::Stream(Capability::Blogs));
        assert_eq!(session.progress("t").unwrap().stages.len(), 5);

        let events = [
            StreamEvent::progress("router", None),
            StreamEvent::progress("worker", None),
            StreamEvent::ai("# Async Rust"),
        ];
        for event in events {
            let outcome = session.apply_stream("t", dispatch.request_id, StreamUpdate::Event(event));
            assert!(outcome.finished.is_none());
        }

        let outcome = session.apply_stream("t", dispatch.request_id, StreamUpdate::Event(StreamEvent::done()));
        assert_eq!(outcome.finished.unwrap().content, "# Async Rust");
        assert!(session.progress("t").is_none());
        assert_eq!(
            contents(&session, "t"),
            vec![(Role::Human, "rust async".into()), (Role::Agent, "# Async Rust".into())]
        );
        assert_eq!(session.snapshot().messages.len(), 2);
    }

    #[test]
    fn test_stream_failure_after_router() {
        let mut session = ChatSession::new();
        let dispatch = session.submit("t", "rust async", &blogs()).unwrap();
        session.apply_stream(
            "t",
            dispatch.request_id,
            StreamUpdate::Event(StreamEvent::progress("router", Some("Mode: closed_book"))),
        );
        session.apply_stream("t", dispatch.request_id, StreamUpdate::Failed("connection reset".into()));

        assert!(session.progress("t").is_none());
        assert_eq!(contents(&session, "t"), vec![(Role::Human, "rust async".into())]);
        assert_eq!(session.error(), Some("Streaming error: connection reset"));
        assert!(!session.is_loading("t"));
    }

    #[test]
    fn test_rapid_submits_keep_order() {
        let mut session = ChatSession::new();
        let first = session.submit("t", "one", &no_tools()).unwrap();
        assert!(session.submit("t", "two", &no_tools()).is_none());
        assert_eq!(
            contents(&session, "t"),
            vec![(Role::Human, "one".into()), (Role::Human, "two".into())]
        );

        let outcome = session.complete_direct("t", first.request_id, reply("first answer"));
        let second = outcome.next.unwrap();
        assert_eq!(second.text, "two");
        assert!(session.is_loading("t"));

        session.complete_direct("t", second.request_id, reply("second answer"));
        assert_eq!(
            contents(&session, "t"),
            vec![
                (Role::Human, "one".into()),
                (Role::Agent, "first answer".into()),
                (Role::Human, "two".into()),
                (Role::Agent, "second answer".into()),
            ]
        );
    }

    #[test]
    fn test_stale_results_are_ignored() {
        let mut session = ChatSession::new();
        let dispatch = session.submit("t", "hi", &no_tools()).unwrap();
        let outcome = session.complete_direct("t", dispatch.request_id + 7, reply("nope"));
        assert!(outcome.next.is_none());
        assert!(session.is_loading("t"));
        assert_eq!(session.messages("t").len(), 1);

        let outcome = session.apply_stream("t", dispatch.request_id, StreamUpdate::Closed);
        assert!(outcome.finished.is_none());
        assert!(session.is_loading("t"));
    }

    #[test]
    fn test_cancel_stream_releases_queue() {
        let mut session = ChatSession::new();
        let first = session.submit("t", "blog please", &blogs()).unwrap();
        session.submit("t", "and a question", &no_tools());

        let outcome = session.cancel_stream("t");
        let next = outcome.next.unwrap();
        assert_eq!(next.route, Route::Direct);
        assert!(session.progress("t").is_none());
        assert!(session.error().is_none());

        let outcome = session.apply_stream("t", first.request_id, StreamUpdate::Closed);
        assert!(outcome.finished.is_none());
    }

    #[test]
    fn test_observers_see_each_transition() {
        let mut session = ChatSession::new();
        let rx = session.subscribe();
        session.select_thread("t");
        let dispatch = session.submit("t", "rust async", &blogs()).unwrap();

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.current_thread.as_deref(), Some("t"));
        assert!(snapshot.loading);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.progress.as_ref().unwrap().current().unwrap().id, "router");

        session.apply_stream(
            "t",
            dispatch.request_id,
            StreamUpdate::Event(StreamEvent::progress("research", Some("Found 3 sources"))),
        );
        assert_eq!(rx.borrow().progress.as_ref().unwrap().current().unwrap().id, "research");

        session.apply_stream("t", dispatch.request_id, StreamUpdate::Closed);
        let snapshot = rx.borrow().clone();
        assert!(snapshot.progress.is_none());
        assert!(!snapshot.loading);
        assert_eq!(snapshot.messages.len(), 2);
    }

    #[test]
    fn test_history_load_and_threads() {
        let mut session = ChatSession::new();
        session.set_threads(vec![ThreadSummary { thread_id: "a".into(), title: "Trip".into() }]);
        assert!(session.select_thread("a"));
        assert_eq!(session.current_title(), "Trip");

        let history = vec![
            HistoryMessage { content: "hi".into(), kind: "human".into() },
            HistoryMessage { content: "{\"q\": 1}".into(), kind: "tool".into() },
            HistoryMessage { content: "hello".into(), kind: "ai".into() },
        ];
        session.load_history("a", &history);
        assert_eq!(session.messages("a").len(), 2);
        assert!(!session.select_thread("a"));

        session.rename_thread("a", "Trip to Oslo");
        assert_eq!(session.current_title(), "Trip to Oslo");

        session.add_thread(ThreadSummary { thread_id: "b".into(), title: "New Chat".into() });
        assert_eq!(session.threads()[0].thread_id, "b");
    }

    #[test]
    fn test_late_subscriber_sees_current_state() {
        let mut session = ChatSession::new();
        session.select_thread("t");
        session.submit("t", "hello", &no_tools()).unwrap();

        let rx = session.subscribe();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.current_thread.as_deref(), Some("t"));
        assert!(snapshot.loading);
        assert_eq!(snapshot.messages.len(), 1);
    }

    #[test]
    fn test_remove_thread_drops_its_state() {
        let mut session = ChatSession::new();
        session.set_threads(vec![
            ThreadSummary { thread_id: "a".into(), title: "Trip".into() },
            ThreadSummary { thread_id: "b".into(), title: "Rust".into() },
        ]);
        session.select_thread("a");
        session.set_document(DocumentInfo {
            has_document: true,
            filename: Some("notes.pdf".into()),
            documents: Some(1),
            chunks: Some(4),
            thread_id: "a".into(),
        });
        let running = session.submit("a", "blog please", &blogs()).unwrap();
        session.submit("a", "queued", &no_tools());

        assert!(session.remove_thread("a"));
        assert!(session.current_thread().is_none());
        assert_eq!(session.threads().len(), 1);
        assert!(session.messages("a").is_empty());
        assert!(session.document("a").is_none());
        assert!(!session.is_loading("a"));

        // the transport may still deliver before it is closed
        let outcome = session.apply_stream("a", running.request_id, StreamUpdate::Closed);
        assert!(outcome.next.is_none());
        assert!(outcome.finished.is_none());
        assert!(session.messages("a").is_empty());

        assert!(!session.remove_thread("missing"));
    }

    #[test]
    fn test_remove_other_thread_keeps_selection() {
        let mut session = ChatSession::new();
        session.set_threads(vec![
            ThreadSummary { thread_id: "a".into(), title: "Trip".into() },
            ThreadSummary { thread_id: "b".into(), title: "Rust".into() },
        ]);
        session.select_thread("a");
        assert!(!session.remove_thread("b"));
        assert_eq!(session.current_thread(), Some("a"));
    }

    #[test]
    fn test_ask_document_needs_an_upload() {
        let mut session = ChatSession::new();
        assert!(session.ask_document("t", "what is chapter 2 about?").is_none());
        assert!(session.messages("t").is_empty());
        assert!(session.error().unwrap().contains("Upload a PDF"));

        session.clear_error();
        session.set_document(DocumentInfo {
            has_document: true,
            filename: Some("book.pdf".into()),
            documents: Some(1),
            chunks: Some(12),
            thread_id: "t".into(),
        });
        let dispatch = session.ask_document("t", "what is chapter 2 about?").unwrap();
        assert_eq!(dispatch.route, Route::Document);
        assert!(session.is_loading("t"));
        assert!(session.progress("t").is_none());

        session.complete_direct("t", dispatch.request_id, reply("Chapter 2 covers ownership."));
        assert_eq!(
            contents(&session, "t"),
            vec![
                (Role::Human, "what is chapter 2 about?".to_string()),
                (Role::Agent, "Chapter 2 covers ownership.".to_string()),
            ]
        );
    }

    #[test]
    fn test_history_does_not_clobber_pending_message() {
        let mut session = ChatSession::new();
        session.submit("a", "hello", &no_tools()).unwrap();
        session.load_history("a", &[]);
        assert_eq!(session.messages("a").len(), 1);
    }
}
