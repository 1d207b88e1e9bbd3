//! Stage tracking for multi-stage agent runs.
//!
//! [`reduce`] is the pure transition function over a [`ProgressSession`];
//! [`ProgressMachine`] wraps it with the streamed text buffer and the
//! terminal transitions.

use tracing::debug;

use crate::stream::{MessageKind, StreamEvent, StreamUpdate};
use crate::types::{Capability, ConversationMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Node identifier the server tags progress events with.
    pub id: &'static str,
    pub label: &'static str,
    pub status: StageStatus,
    pub details: Option<String>,
    pub section_count: Option<u32>,
}

struct StageDef {
    id: &'static str,
    label: &'static str,
    /// Runs once per section; counted instead of described.
    repeating: bool,
}

const BLOG_STAGES: [StageDef; 5] = [
    StageDef { id: "router", label: "Routing", repeating: false },
    StageDef { id: "research", label: "Researching", repeating: false },
    StageDef { id: "orchestrator", label: "Planning", repeating: false },
    StageDef { id: "worker", label: "Writing sections", repeating: true },
    StageDef { id: "reducer", label: "Finalizing", repeating: false },
];

fn stage_defs(tool: Capability) -> Option<&'static [StageDef]> {
    match tool {
        Capability::Blogs => Some(&BLOG_STAGES),
        Capability::Search => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSession {
    pub is_streaming: bool,
    pub tool_name: String,
    pub stages: Vec<Stage>,
    tool: Capability,
}

impl ProgressSession {
    /// Fresh session for `tool`, or `None` when the tool has no stages.
    pub fn for_tool(tool: Capability) -> Option<Self> {
        let defs = stage_defs(tool)?;
        let stages = defs
            .iter()
            .enumerate()
            .map(|(i, def)| Stage {
                id: def.id,
                label: def.label,
                status: if i == 0 { StageStatus::InProgress } else { StageStatus::Pending },
                details: None,
                section_count: None,
            })
            .collect();

        Some(ProgressSession {
            is_streaming: true,
            tool_name: tool.as_str().to_string(),
            stages,
            tool,
        })
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn current(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.status == StageStatus::InProgress)
    }

    pub fn completed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.status == StageStatus::Completed).count()
    }

    fn is_repeating(&self, index: usize) -> bool {
        stage_defs(self.tool)
            .and_then(|defs| defs.get(index))
            .map(|def| def.repeating)
            .unwrap_or(false)
    }

    fn advance_to(&mut self, index: usize, content: Option<&str>) {
        if self.stages[index].status == StageStatus::Completed {
            debug!(stage = self.stages[index].id, "ignoring event for a completed stage");
            return;
        }

        for stage in &mut self.stages[..index] {
            stage.status = StageStatus::Completed;
        }

        let repeating = self.is_repeating(index);
        let stage = &mut self.stages[index];
        stage.status = StageStatus::InProgress;

        if repeating {
            let count = stage.section_count.unwrap_or(0) + 1;
            stage.section_count = Some(count);
            stage.details = Some(format!("{} sections completed", count));
        } else if let Some(text) = content {
            stage.details = Some(text.to_string());
        }
    }

    fn complete_all(&mut self) {
        for stage in &mut self.stages {
            stage.status = StageStatus::Completed;
        }
    }
}

/// Apply one event to the stage list.
///
/// Progress events move forward only; `ai` content means the run is writing
/// its final answer, so every stage through the last is completed. Other
/// events leave the session unchanged.
pub fn reduce(mut session: ProgressSession, event: &StreamEvent) -> ProgressSession {
    match event.kind() {
        Some(MessageKind::Progress) => {
            let index = event
                .node
                .as_deref()
                .and_then(|node| session.stages.iter().position(|s| s.id == node));
            match index {
                Some(index) => session.advance_to(index, event.content.as_deref()),
                None => debug!(node = ?event.node, "progress event for unknown stage"),
            }
        }
        Some(MessageKind::Ai) => session.complete_all(),
        _ => {}
    }
    session
}

/// Result of feeding one transport update to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Updated,
    /// The update changed nothing (unknown kind, or the machine already ended).
    Ignored,
    Finished(ConversationMessage),
    Failed(String),
}

#[derive(Debug)]
pub struct ProgressMachine {
    session: Option<ProgressSession>,
    buffer: String,
}

impl ProgressMachine {
    pub fn start(tool: Capability) -> Option<Self> {
        Some(ProgressMachine {
            session: Some(ProgressSession::for_tool(tool)?),
            buffer: String::new(),
        })
    }

    pub fn session(&self) -> Option<&ProgressSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn handle(&mut self, update: StreamUpdate) -> Step {
        let Some(session) = self.session.take() else {
            return Step::Ignored;
        };

        match update {
            StreamUpdate::Event(event) => {
                if event.kind() == Some(MessageKind::Ai) {
                    if let Some(content) = &event.content {
                        self.buffer.push_str(content);
                    }
                }

                let kind = event.kind();
                let session = reduce(session, &event);

                if event.done {
                    return self.finish();
                }
                self.session = Some(session);

                match kind {
                    Some(MessageKind::Progress) | Some(MessageKind::Ai) => Step::Updated,
                    _ => Step::Ignored,
                }
            }
            StreamUpdate::Closed => self.finish(),
            StreamUpdate::Failed(reason) => {
                debug!(discarded = self.buffer.len(), "stream failed, dropping partial answer");
                self.buffer.clear();
                Step::Failed(reason)
            }
        }
    }

    fn finish(&mut self) -> Step {
        self.session = None;
        Step::Finished(ConversationMessage::agent(std::mem::take(&mut self.buffer)))
    }
}
