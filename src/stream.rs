//! Server-push transport for streamed agent runs.
//!
//! [`open`] issues the request, reads the body in a tokio task and forwards
//! typed [`StreamUpdate`]s in arrival order. The channel ends after exactly
//! one terminal update (`Closed`, an event with `done`, or `Failed`), or as
//! soon as the [`StreamHandle`] is closed.

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiClient, StreamParams};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Progress,
    Ai,
    #[serde(other)]
    Other,
}

/// One decoded frame of the stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub message_type: Option<MessageKind>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn progress(node: &str, content: Option<&str>) -> Self {
        StreamEvent {
            message_type: Some(MessageKind::Progress),
            node: Some(node.to_string()),
            content: content.map(str::to_string),
            ..Self::empty()
        }
    }

    pub fn ai(content: &str) -> Self {
        StreamEvent {
            message_type: Some(MessageKind::Ai),
            content: Some(content.to_string()),
            ..Self::empty()
        }
    }

    pub fn done() -> Self {
        StreamEvent {
            done: true,
            ..Self::empty()
        }
    }

    fn empty() -> Self {
        StreamEvent {
            message_type: None,
            node: None,
            content: None,
            done: false,
            thread_id: None,
            tool_name: None,
            error: None,
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.message_type
    }
}

/// What the transport delivers to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Event(StreamEvent),
    /// The server sent the `[DONE]` sentinel.
    Closed,
    Failed(String),
}

impl StreamUpdate {
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamUpdate::Event(event) => event.done,
            StreamUpdate::Closed | StreamUpdate::Failed(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Done,
    Event(StreamEvent),
    Malformed { raw: String, reason: String },
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes are split on `\n` before decoding, so multi-byte characters cut by
/// chunk boundaries survive.
#[derive(Debug, Default)]
pub struct FrameParser {
    partial: Vec<u8>,
    data: Vec<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.partial.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if let Some(frame) = self.line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            let rest = String::from_utf8_lossy(&rest);
            if let Some(frame) = self.line(rest.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.dispatch() {
            frames.push(frame);
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let trimmed = line.trim();
        if self.data.is_empty() && (trimmed == DONE_SENTINEL || trimmed.starts_with('{')) {
            return Some(decode(trimmed));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(decode(payload.trim()))
    }
}

fn decode(payload: &str) -> Frame {
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Frame::Event(event),
        Err(e) => Frame::Malformed {
            raw: payload.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Owner of an open stream. Closing (or dropping) it cancels the reader and
/// stops further delivery.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("closing stream");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Open the streaming endpoint for `params`.
///
/// Nothing happens until the returned stream is first polled; the reader task
/// is spawned then, on the polling runtime.
pub fn open(
    api: &ApiClient,
    params: &StreamParams,
) -> (StreamHandle, impl Stream<Item = StreamUpdate> + Send + 'static) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let request = api.stream_url(params).map(|url| {
        api.http()
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
    });
    let idle_timeout = api.config().stream_idle_timeout;
    let token = cancel.clone();

    let reader = async move {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                let _ = tx.send(StreamUpdate::Failed(e.to_string()));
                return;
            }
        };

        tokio::select! {
            _ = token.cancelled() => {
                debug!("stream reader cancelled");
            }
            _ = run(request, idle_timeout, &tx) => {}
        }
    };

    (StreamHandle { cancel: cancel.clone() }, updates(rx, cancel, reader))
}

async fn run(
    request: reqwest::RequestBuilder,
    idle_timeout: Option<Duration>,
    tx: &mpsc::UnboundedSender<StreamUpdate>,
) {
    let sent = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, request.send()).await {
            Ok(result) => result,
            Err(_) => {
                let _ = tx.send(StreamUpdate::Failed("stream timed out waiting for the server".to_string()));
                return;
            }
        },
        None => request.send().await,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            warn!("stream request failed: {}", e);
            let _ = tx.send(StreamUpdate::Failed(e.to_string()));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let reason = format!("server returned {}: {}", status.as_u16(), crate::api::error_detail(&body));
        warn!("{}", reason);
        let _ = tx.send(StreamUpdate::Failed(reason));
        return;
    }

    pump(response.bytes_stream(), idle_timeout, tx).await;
}

/// Read `body` to its terminal frame, forwarding updates to `tx`.
///
/// Sends exactly one terminal update unless the receiver is gone.
pub async fn pump<S, B, E>(body: S, idle_timeout: Option<Duration>, tx: &mpsc::UnboundedSender<StreamUpdate>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures_util::pin_mut!(body);
    let mut parser = FrameParser::new();

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("stream idle for {:?}, giving up", limit);
                    let _ = tx.send(StreamUpdate::Failed(format!("stream timed out after {}s without data", limit.as_secs())));
                    return;
                }
            },
            None => body.next().await,
        };

        let frames = match next {
            Some(Ok(chunk)) => parser.push(chunk.as_ref()),
            Some(Err(e)) => {
                warn!("stream read failed: {}", e);
                let _ = tx.send(StreamUpdate::Failed(e.to_string()));
                return;
            }
            None => {
                let frames = parser.finish();
                if forward(frames, tx) {
                    return;
                }
                let _ = tx.send(StreamUpdate::Failed("stream ended before completion".to_string()));
                return;
            }
        };

        if forward(frames, tx) {
            return;
        }
    }
}

/// Returns true once a terminal update has been sent.
fn forward(frames: Vec<Frame>, tx: &mpsc::UnboundedSender<StreamUpdate>) -> bool {
    for frame in frames {
        let update = match frame {
            Frame::Done => StreamUpdate::Closed,
            Frame::Event(event) => match event.error.clone() {
                Some(error) => StreamUpdate::Failed(error),
                None => StreamUpdate::Event(event),
            },
            Frame::Malformed { raw, reason } => {
                warn!("skipping malformed frame ({}): {}", reason, raw);
                continue;
            }
        };

        let terminal = update.is_terminal();
        if tx.send(update).is_err() || terminal {
            return true;
        }
    }
    false
}

fn updates<F>(
    rx: mpsc::UnboundedReceiver<StreamUpdate>,
    cancel: CancellationToken,
    reader: F,
) -> impl Stream<Item = StreamUpdate> + Send + 'static
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    futures_util::stream::unfold((rx, cancel, Some(reader)), |(mut rx, cancel, mut reader)| async move {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(reader) = reader.take() {
            tokio::spawn(reader);
        }
        let update = tokio::select! {
            _ = cancel.cancelled() => None,
            update = rx.recv() => update,
        }?;
        Some((update, (rx, cancel, reader)))
    })
}
