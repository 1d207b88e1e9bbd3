mod api;
mod config;
mod error;
mod markdown;
mod progress;
mod session;
mod stream;
#[cfg(test)]
mod test_support;
mod types;

use iced::{
    widget::{
        button, checkbox, column, container, horizontal_rule, horizontal_space, row, scrollable, text,
        text_input, text_input::Id, Column,
    },
    Element, Length, Task, Theme, Font, Subscription, Color,
    time,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Padding, Size,
    window,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use unicode_width::UnicodeWidthChar;

use crate::api::{ApiClient, ChatReply, DocumentAnswer, DocumentInfo, HistoryMessage, ThreadSummary, UploadReceipt};
use crate::markdown::Block;
use crate::progress::{ProgressSession, StageStatus};
use crate::session::{ChatSession, Dispatch, Outcome, RequestId, Route};
use crate::stream::{StreamHandle, StreamUpdate};
use crate::types::{Capabilities, Capability, ConversationMessage};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CHATBAR_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn,chat_bar=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> iced::Result {
    init_tracing();
    let config = config::Config::load();

    let window_settings = window::Settings {
        size: Size::new(config.window.width as f32, config.window.height as f32),
        min_size: Some(Size::new(config.window.min_width as f32, config.window.min_height as f32)),
        position: window::Position::Centered,
        ..Default::default()
    };

    iced::application("Chat Bar", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window_settings)
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    ThreadsLoaded(Result<Vec<ThreadSummary>, String>),
    NewThread,
    ThreadCreated(Result<ThreadSummary, String>),
    SelectThread(String),
    HistoryLoaded(String, Result<Vec<HistoryMessage>, String>),
    StartRename(String),
    RenameChanged(String),
    RenameSubmit,
    CancelRename,
    Renamed(String, Result<String, String>),
    DeleteThread(String),
    ConfirmDelete,
    CancelDelete,
    ThreadDeleted(String, Result<(), String>),
    InputChanged(String),
    ToggleTool(Capability, bool),
    ToggleAskDocument(bool),
    Submit,
    DirectReply(String, RequestId, Result<ChatReply, String>),
    DocumentAnswered(String, RequestId, Result<DocumentAnswer, String>),
    Stream(String, RequestId, StreamUpdate),
    CancelStream,
    FileDropped(PathBuf),
    Uploaded(String, Result<UploadReceipt, String>),
    DocumentLoaded(String, Result<DocumentInfo, String>),
    DismissError,
    Tick,
    Escape,
}

/// What Escape does in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeAction {
    CancelRename,
    CancelDelete,
    CancelStream,
    Exit,
}

struct App {
    api: ApiClient,
    session: ChatSession,
    streams: HashMap<String, (RequestId, StreamHandle)>,
    input_text: String,
    tools: Capabilities,
    renaming: Option<(String, String)>,
    confirm_delete: Option<String>,
    ask_document: bool,
    uploading: bool,
    notice: Option<String>,
    loading_frame: usize,
    input_id: Id,
    notifications: bool,
    title_width: usize,
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let api = ApiClient::new(config.client_config());
        info!(base_url = %api.config().base_url, "starting chat bar");

        let input_id = Id::unique();
        let app = App {
            api,
            session: ChatSession::new(),
            streams: HashMap::new(),
            input_text: String::new(),
            tools: Capabilities::new(),
            renaming: None,
            confirm_delete: None,
            ask_document: false,
            uploading: false,
            notice: None,
            loading_frame: 0,
            input_id: input_id.clone(),
            notifications: config.ui.notifications,
            title_width: config.ui.title_width,
        };

        let load = app.load_threads();
        (app, Task::batch([text_input::focus(input_id), load]))
    }

    fn load_threads(&self) -> Task<Message> {
        let api = self.api.clone();
        Task::future(async move {
            Message::ThreadsLoaded(api.list_threads().await.map_err(|e| e.to_string()))
        })
    }

    fn create_thread(&self) -> Task<Message> {
        let api = self.api.clone();
        Task::future(async move {
            Message::ThreadCreated(api.create_thread().await.map_err(|e| e.to_string()))
        })
    }

    /// Select a thread and fetch whatever the UI does not know about it yet.
    fn open_thread(&mut self, thread_id: String) -> Task<Message> {
        self.renaming = None;
        let needs_history = self.session.select_thread(&thread_id);

        let api = self.api.clone();
        let id = thread_id.clone();
        let document = Task::future(async move {
            let info = api.document_info(&id).await.map_err(|e| e.to_string());
            Message::DocumentLoaded(id, info)
        });

        if !needs_history {
            return document;
        }
        let api = self.api.clone();
        let history = Task::future(async move {
            let messages = api.thread_messages(&thread_id).await.map_err(|e| e.to_string());
            Message::HistoryLoaded(thread_id, messages)
        });
        Task::batch([history, document])
    }

    fn launch(&mut self, dispatch: Dispatch) -> Task<Message> {
        let thread_id = dispatch.thread_id.clone();
        let request_id = dispatch.request_id;

        match dispatch.route {
            Route::Direct => {
                let api = self.api.clone();
                let request = dispatch.chat_request();
                Task::future(async move {
                    let reply = api.send_message(&request).await.map_err(|e| e.to_string());
                    Message::DirectReply(thread_id, request_id, reply)
                })
            }
            Route::Stream(tool) => {
                debug!(%thread_id, request_id, %tool, "opening stream");
                let (handle, updates) = stream::open(&self.api, &dispatch.stream_params());
                self.streams.insert(thread_id.clone(), (request_id, handle));
                Task::run(updates, move |update| {
                    Message::Stream(thread_id.clone(), request_id, update)
                })
            }
            Route::Document => {
                let api = self.api.clone();
                let question = dispatch.text;
                Task::future(async move {
                    let answer = api.query_document(&thread_id, &question).await.map_err(|e| e.to_string());
                    Message::DocumentAnswered(thread_id, request_id, answer)
                })
            }
        }
    }

    fn follow(&mut self, thread_id: &str, outcome: Outcome) -> Task<Message> {
        let mut tasks = Vec::new();

        if let Some(reply) = outcome.finished {
            if self.notifications {
                let title = self
                    .session
                    .threads()
                    .iter()
                    .find(|t| t.thread_id == thread_id)
                    .map(|t| t.title.clone())
                    .unwrap_or_else(|| "Chat Bar".to_string());
                notify_finished(title, &reply);
            }
        }
        // the server names a thread after its first exchange
        if self.session.messages(thread_id).len() == 2 {
            tasks.push(self.load_threads());
        }
        if let Some(next) = outcome.next {
            tasks.push(self.launch(next));
        }
        Task::batch(tasks)
    }

    fn drop_stream(&mut self, thread_id: &str, request_id: RequestId) {
        if matches!(self.streams.get(thread_id), Some((id, _)) if *id == request_id) {
            if let Some((_, handle)) = self.streams.remove(thread_id) {
                handle.close();
            }
        }
    }

    fn escape_action(&self) -> EscapeAction {
        if self.renaming.is_some() {
            return EscapeAction::CancelRename;
        }
        if self.confirm_delete.is_some() {
            return EscapeAction::CancelDelete;
        }
        let streaming = self
            .session
            .current_thread()
            .map(|id| self.streams.contains_key(id))
            .unwrap_or(false);
        if streaming {
            EscapeAction::CancelStream
        } else {
            EscapeAction::Exit
        }
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::ThreadsLoaded(Ok(threads)) => {
                let first = threads.first().map(|t| t.thread_id.clone());
                self.session.set_threads(threads);
                if self.session.current_thread().is_some() {
                    return Task::none();
                }
                match first {
                    Some(first) => self.open_thread(first),
                    None => self.create_thread(),
                }
            }
            Message::ThreadsLoaded(Err(error)) => {
                self.session.set_error(format!("Could not load threads: {}", error));
                Task::none()
            }
            Message::NewThread => self.create_thread(),
            Message::ThreadCreated(Ok(thread)) => {
                let thread_id = thread.thread_id.clone();
                self.session.add_thread(thread);
                self.open_thread(thread_id)
            }
            Message::ThreadCreated(Err(error)) => {
                self.session.set_error(format!("Could not create a thread: {}", error));
                Task::none()
            }
            Message::SelectThread(thread_id) => self.open_thread(thread_id),
            Message::HistoryLoaded(thread_id, Ok(history)) => {
                self.session.load_history(&thread_id, &history);
                Task::none()
            }
            Message::HistoryLoaded(_, Err(error)) => {
                self.session.set_error(format!("Could not load messages: {}", error));
                Task::none()
            }
            Message::StartRename(thread_id) => {
                let current = self
                    .session
                    .threads()
                    .iter()
                    .find(|t| t.thread_id == thread_id)
                    .map(|t| t.title.clone())
                    .unwrap_or_default();
                self.renaming = Some((thread_id, current));
                Task::none()
            }
            Message::RenameChanged(value) => {
                if let Some((_, draft)) = self.renaming.as_mut() {
                    *draft = value;
                }
                Task::none()
            }
            Message::RenameSubmit => {
                let Some((thread_id, title)) = self.renaming.take() else {
                    return Task::none();
                };
                let api = self.api.clone();
                Task::future(async move {
                    let result = api.rename_thread(&thread_id, &title).await.map_err(|e| e.to_string());
                    Message::Renamed(thread_id, result)
                })
            }
            Message::CancelRename => {
                self.renaming = None;
                Task::none()
            }
            Message::Renamed(thread_id, Ok(title)) => {
                self.session.rename_thread(&thread_id, &title);
                Task::none()
            }
            Message::Renamed(_, Err(error)) => {
                self.session.set_error(format!("Could not rename thread: {}", error));
                Task::none()
            }
            Message::DeleteThread(thread_id) => {
                self.renaming = None;
                self.confirm_delete = Some(thread_id);
                Task::none()
            }
            Message::CancelDelete => {
                self.confirm_delete = None;
                Task::none()
            }
            Message::ConfirmDelete => {
                let Some(thread_id) = self.confirm_delete.take() else {
                    return Task::none();
                };
                let api = self.api.clone();
                Task::future(async move {
                    let result = api.delete_thread(&thread_id).await.map_err(|e| e.to_string());
                    Message::ThreadDeleted(thread_id, result)
                })
            }
            Message::ThreadDeleted(thread_id, Ok(())) => {
                info!(%thread_id, "thread deleted");
                if let Some((_, handle)) = self.streams.remove(&thread_id) {
                    handle.close();
                }
                if !self.session.remove_thread(&thread_id) {
                    return Task::none();
                }
                match self.session.threads().first().map(|t| t.thread_id.clone()) {
                    Some(next) => self.open_thread(next),
                    None => self.create_thread(),
                }
            }
            Message::ThreadDeleted(_, Err(error)) => {
                self.session.set_error(format!("Could not delete thread: {}", error));
                Task::none()
            }
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::ToggleTool(tool, enabled) => {
                if enabled {
                    self.tools.insert(tool);
                } else {
                    self.tools.remove(&tool);
                }
                Task::none()
            }
            Message::ToggleAskDocument(enabled) => {
                self.ask_document = enabled;
                Task::none()
            }
            Message::Submit => {
                let Some(thread_id) = self.session.current_thread().map(str::to_string) else {
                    return Task::none();
                };
                if self.input_text.trim().is_empty() {
                    return Task::none();
                }

                let text = std::mem::take(&mut self.input_text);
                let asks_document = self.ask_document && self.session.document(&thread_id).is_some();
                let dispatch = if asks_document {
                    self.session.ask_document(&thread_id, &text)
                } else {
                    self.session.submit(&thread_id, &text, &self.tools)
                };
                match dispatch {
                    Some(dispatch) => self.launch(dispatch),
                    None => Task::none(),
                }
            }
            Message::DirectReply(thread_id, request_id, reply) => {
                let reply = reply.map(|r| r.response);
                let outcome = self.session.complete_direct(&thread_id, request_id, reply);
                self.follow(&thread_id, outcome)
            }
            Message::DocumentAnswered(thread_id, request_id, answer) => {
                let answer = answer.map(|a| a.to_markdown());
                let outcome = self.session.complete_direct(&thread_id, request_id, answer);
                self.follow(&thread_id, outcome)
            }
            Message::Stream(thread_id, request_id, update) => {
                let terminal = update.is_terminal();
                let outcome = self.session.apply_stream(&thread_id, request_id, update);
                if terminal {
                    self.drop_stream(&thread_id, request_id);
                }
                self.follow(&thread_id, outcome)
            }
            Message::CancelStream => {
                let Some(thread_id) = self.session.current_thread().map(str::to_string) else {
                    return Task::none();
                };
                if let Some((_, handle)) = self.streams.remove(&thread_id) {
                    handle.close();
                }
                let outcome = self.session.cancel_stream(&thread_id);
                self.follow(&thread_id, outcome)
            }
            Message::FileDropped(path) => {
                let Some(thread_id) = self.session.current_thread().map(str::to_string) else {
                    self.session.set_error("Create a chat before uploading a document");
                    return Task::none();
                };
                if self.uploading {
                    return Task::none();
                }
                self.uploading = true;
                self.notice = None;
                let api = self.api.clone();
                Task::future(async move {
                    let receipt = api.upload_pdf(&thread_id, &path).await.map_err(|e| e.to_string());
                    Message::Uploaded(thread_id, receipt)
                })
            }
            Message::Uploaded(thread_id, Ok(receipt)) => {
                self.uploading = false;
                self.notice = Some(format!(
                    "{} uploaded, {} chunks created",
                    receipt.filename, receipt.chunks
                ));
                let api = self.api.clone();
                Task::future(async move {
                    let info = api.document_info(&thread_id).await.map_err(|e| e.to_string());
                    Message::DocumentLoaded(thread_id, info)
                })
            }
            Message::Uploaded(_, Err(error)) => {
                self.uploading = false;
                self.session.set_error(format!("Upload failed: {}", error));
                Task::none()
            }
            Message::DocumentLoaded(_, Ok(info)) => {
                self.session.set_document(info);
                Task::none()
            }
            Message::DocumentLoaded(thread_id, Err(error)) => {
                debug!(%thread_id, "no document info: {}", error);
                Task::none()
            }
            Message::DismissError => {
                self.session.clear_error();
                self.notice = None;
                Task::none()
            }
            Message::Tick => {
                self.loading_frame = (self.loading_frame + 1) % SPINNER.len();
                Task::none()
            }
            Message::Escape => match self.escape_action() {
                EscapeAction::CancelRename => self.update(Message::CancelRename),
                EscapeAction::CancelDelete => self.update(Message::CancelDelete),
                EscapeAction::CancelStream => self.update(Message::CancelStream),
                EscapeAction::Exit => iced::exit(),
            },
        }
    }

    fn is_busy(&self) -> bool {
        self.uploading
            || self
                .session
                .current_thread()
                .map(|id| self.session.is_loading(id))
                .unwrap_or(false)
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.is_busy() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| match event {
            IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) => Some(Message::Escape),
            IcedEvent::Window(window::Event::FileDropped(path)) => Some(Message::FileDropped(path)),
            _ => None,
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let current = self.session.current_thread().map(str::to_string);
        let progress = current.as_deref().and_then(|id| self.session.progress(id));

        let mut layout = row![self.sidebar(), self.chat_panel(current.as_deref())].height(Length::Fill);
        if let Some(session) = progress {
            layout = layout.push(self.progress_panel(session));
        }

        container(layout)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn sidebar(&self) -> Element<Message> {
        let current = self.session.current_thread();
        let mut list = Column::new().spacing(4);

        for thread in self.session.threads() {
            let renaming = self
                .renaming
                .as_ref()
                .filter(|(id, _)| *id == thread.thread_id);

            let confirming = self.confirm_delete.as_deref() == Some(thread.thread_id.as_str());

            let entry: Element<Message> = match renaming {
                None if confirming => column![
                    text(format!("Delete \"{}\"?", truncate_title(&thread.title, self.title_width)))
                        .size(13),
                    row![
                        button(text("Delete").size(12)).on_press(Message::ConfirmDelete).style(button::danger),
                        button(text("Cancel").size(12)).on_press(Message::CancelDelete).style(button::secondary),
                    ]
                    .spacing(6),
                ]
                .spacing(4)
                .into(),
                Some((_, draft)) => row![
                    text_input("Title", draft)
                        .on_input(Message::RenameChanged)
                        .on_submit(Message::RenameSubmit)
                        .size(14),
                    button(text("✕").size(12)).on_press(Message::CancelRename).style(button::text),
                ]
                .spacing(4)
                .into(),
                None => {
                    let selected = current == Some(thread.thread_id.as_str());
                    let title = truncate_title(&thread.title, self.title_width);
                    row![
                        button(text(title).size(14))
                            .on_press(Message::SelectThread(thread.thread_id.clone()))
                            .style(if selected { button::primary } else { button::text })
                            .width(Length::Fill),
                        button(text("✎").size(12))
                            .on_press(Message::StartRename(thread.thread_id.clone()))
                            .style(button::text),
                        button(text("🗑").size(12))
                            .on_press(Message::DeleteThread(thread.thread_id.clone()))
                            .style(button::text),
                    ]
                    .spacing(4)
                    .into()
                }
            };
            list = list.push(entry);
        }

        container(
            column![
                button(text("+ New chat").size(14))
                    .on_press(Message::NewThread)
                    .width(Length::Fill),
                scrollable(list).height(Length::Fill),
            ]
            .spacing(10),
        )
        .padding(10)
        .width(Length::Fixed(240.0))
        .height(Length::Fill)
        .style(container::rounded_box)
        .into()
    }

    fn chat_panel(&self, current: Option<&str>) -> Element<Message> {
        let header = text(self.session.current_title().to_string()).size(18);

        let messages = current.map(|id| self.session.messages(id)).unwrap_or(&[]);
        let mut list = Column::new().spacing(14).padding(Padding::from([0, 10]));
        for message in messages {
            list = list.push(message_view(message));
        }

        let waiting_direct = current
            .map(|id| self.session.is_loading(id) && self.session.progress(id).is_none())
            .unwrap_or(false);
        if waiting_direct {
            list = list.push(
                row![
                    text(SPINNER[self.loading_frame]).size(20),
                    text("Thinking...").size(14),
                ]
                .spacing(8),
            );
        }

        let mut content = column![header, horizontal_rule(1), scrollable(list).height(Length::Fill)]
            .spacing(10)
            .padding(10);

        if let Some(info) = current.and_then(|id| self.session.document(id)) {
            content = content.push(document_banner(info));
        }
        if self.uploading {
            content = content.push(text(format!("{} Uploading document...", SPINNER[self.loading_frame])).size(13));
        }

        let mut tools = row![].spacing(16);
        for tool in Capability::ALL {
            tools = tools.push(
                checkbox(tool.label(), self.tools.contains(&tool))
                    .on_toggle(move |enabled| Message::ToggleTool(tool, enabled))
                    .size(16)
                    .text_size(13),
            );
        }
        if current.and_then(|id| self.session.document(id)).is_some() {
            tools = tools.push(
                checkbox("Ask the document", self.ask_document)
                    .on_toggle(Message::ToggleAskDocument)
                    .size(16)
                    .text_size(13),
            );
        }

        let placeholder = if current.is_some() {
            "Send a message... (drop a PDF to attach it)"
        } else {
            "Create a chat to start"
        };
        let mut input = text_input(placeholder, &self.input_text)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        if current.is_some() {
            input = input.on_input(Message::InputChanged).on_submit(Message::Submit);
        }
        content = content.push(tools).push(input);

        let banner = self
            .session
            .error()
            .map(|e| (e.to_string(), Color::from_rgb(0.95, 0.45, 0.45)))
            .or_else(|| self.notice.clone().map(|n| (n, Color::from_rgb(0.45, 0.85, 0.55))));
        if let Some((line, color)) = banner {
            content = content.push(
                row![
                    text(line).size(13).color(color),
                    horizontal_space(),
                    button(text("Dismiss").size(12)).on_press(Message::DismissError).style(button::text),
                ]
                .align_y(alignment::Vertical::Center),
            );
        }

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn progress_panel(&self, session: &ProgressSession) -> Element<Message> {
        let title = if session.tool_name == Capability::Blogs.as_str() {
            "Writing Blog"
        } else {
            "Processing"
        };

        let mut stages = Column::new().spacing(14);
        for stage in &session.stages {
            let (icon, color) = match stage.status {
                StageStatus::Completed => ("✓", Color::from_rgb(0.45, 0.85, 0.55)),
                StageStatus::InProgress => (SPINNER[self.loading_frame], Color::from_rgb(0.45, 0.65, 0.95)),
                StageStatus::Pending => ("○", Color::from_rgb(0.5, 0.5, 0.5)),
            };

            let mut body = column![text(stage.label).size(14)].spacing(2);
            if let Some(details) = &stage.details {
                body = body.push(text(details.clone()).size(12).color(Color::from_rgb(0.6, 0.6, 0.6)));
            }
            stages = stages.push(row![text(icon).size(16).color(color), body].spacing(10));
        }

        container(
            column![
                row![
                    text(title).size(16),
                    horizontal_space(),
                    button(text("Cancel").size(12)).on_press(Message::CancelStream).style(button::danger),
                ]
                .align_y(alignment::Vertical::Center),
                horizontal_rule(1),
                scrollable(stages).height(Length::Fill),
                text(format!(
                    "{}/{} steps done. This may take a few moments...",
                    session.completed_count(),
                    session.stages.len()
                ))
                .size(12),
            ]
            .spacing(10),
        )
        .padding(12)
        .width(Length::Fixed(300.0))
        .height(Length::Fill)
        .style(container::rounded_box)
        .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

fn message_view<'a>(message: &ConversationMessage) -> Element<'a, Message> {
    let who = if message.is_human() { "You" } else { "Agent" };
    let mut header = format!("{} · {}", who, message.timestamp.with_timezone(&chrono::Local).format("%H:%M"));
    if let Some(tools) = &message.tools {
        let names: Vec<&str> = tools.iter().map(|t| t.as_str()).collect();
        header.push_str(&format!(" · {}", names.join(", ")));
    }
    if message.pending {
        header.push_str(" · sending");
    }

    let body: Element<'a, Message> = if message.is_human() {
        text(message.content.clone()).size(15).into()
    } else {
        render_markdown(&message.content)
    };

    container(column![text(header).size(12).color(Color::from_rgb(0.6, 0.6, 0.6)), body].spacing(4))
        .padding(10)
        .width(Length::Fill)
        .style(container::rounded_box)
        .into()
}

fn render_markdown<'a>(content: &str) -> Element<'a, Message> {
    let mut out = Column::new().spacing(8);
    for block in markdown::parse(content) {
        let element: Element<'a, Message> = match block {
            Block::Heading(level, line) => text(line).size(26.0 - 2.0 * f32::from(level.min(5))).into(),
            Block::Paragraph(line) => text(line).size(15).into(),
            Block::Code { text: code, .. } => container(text(code).font(Font::MONOSPACE).size(13))
                .padding(8)
                .width(Length::Fill)
                .style(container::rounded_box)
                .into(),
            Block::Item { depth, ordinal, text: line } => {
                let marker = match ordinal {
                    Some(n) => format!("{}.", n),
                    None => "•".to_string(),
                };
                text(format!("{}{} {}", "    ".repeat(depth), marker, line)).size(15).into()
            }
            Block::Quote(line) => text(format!("│ {}", line))
                .size(15)
                .color(Color::from_rgb(0.7, 0.7, 0.7))
                .into(),
            Block::Rule => horizontal_rule(1).into(),
        };
        out = out.push(element);
    }
    out.into()
}

fn document_banner<'a>(info: &DocumentInfo) -> Element<'a, Message> {
    let name = info.filename.clone().unwrap_or_else(|| "document".to_string());
    let chunks = info.chunks.map(|c| format!(" ({} chunks)", c)).unwrap_or_default();
    text(format!("📄 Document loaded: {}{}", name, chunks))
        .size(13)
        .color(Color::from_rgb(0.45, 0.85, 0.55))
        .into()
}

/// Cut `title` to at most `width` terminal columns, marking the cut with an ellipsis.
fn truncate_title(title: &str, width: usize) -> String {
    let width = width.max(2);
    let mut used = 0;
    let mut out = String::new();
    let total: usize = title.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= width {
        return title.to_string();
    }
    for ch in title.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width - 1 {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn notify_finished(thread_title: String, reply: &ConversationMessage) {
    let first_line = reply
        .content
        .lines()
        .map(|l| l.trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .unwrap_or("Your blog post is ready")
        .to_string();

    std::thread::spawn(move || {
        if let Err(e) = show_notification(&thread_title, &first_line) {
            warn!("Failed to show notification: {}", e);
        }
    });
}

fn show_notification(summary: &str, body: &str) -> anyhow::Result<()> {
    notify_rust::Notification::new()
        .summary(summary)
        .body(body)
        .show()?;
    Ok(())
}
