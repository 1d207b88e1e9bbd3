//! Conversation types shared by the controller, the progress machine and the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An optional augmentation requested per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Search,
    Blogs,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Search, Capability::Blogs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Search => "search",
            Capability::Blogs => "blogs",
        }
    }

    /// Capabilities whose execution is reported as a multi-stage stream.
    pub fn is_multi_stage(&self) -> bool {
        matches!(self, Capability::Blogs)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Capability::Search => "Web search",
            Capability::Blogs => "Write blog",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Capabilities = BTreeSet<Capability>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Human,
    Agent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tools: Option<Capabilities>,
    /// Optimistic message still waiting for the server to answer.
    pub pending: bool,
    pub request_id: Option<u64>,
}

impl ConversationMessage {
    pub fn human(content: impl Into<String>, tools: &Capabilities) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            timestamp: Utc::now(),
            tools: if tools.is_empty() { None } else { Some(tools.clone()) },
            pending: false,
            request_id: None,
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            timestamp: Utc::now(),
            tools: None,
            pending: false,
            request_id: None,
        }
    }

    pub fn is_human(&self) -> bool {
        self.role == Role::Human
    }
}
