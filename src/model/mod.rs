//! Reasoning-model seam.
//!
//! The agent loop talks to the model only through [`ModelChannel`]. A
//! transcript is a list of [`Turn`]s; each turn carries text, capability
//! invocations, or capability results as [`Block`]s.

pub mod anthropic;
pub mod prompts;

pub use anthropic::{AnthropicClient, AnthropicConfig};

use serde_json::Value;

use crate::capability::{ToolContent, ToolDeclaration};

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors from the model channel
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("no API key configured (set {})", crate::config::ENV_API_KEY)]
    MissingApiKey,

    #[error("model request failed: {0}")]
    Transport(String),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A capability call requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Correlation id echoed back in the matching result
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The outcome of one invocation, sent back to the model
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub invocation_id: String,
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(String),
    Invocation(Invocation),
    Result(InvocationResult),
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<Block>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Block::Text(text.into())],
        }
    }

    pub fn assistant(content: Vec<Block>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn results(results: Vec<InvocationResult>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(Block::Result).collect(),
        }
    }
}

/// A model reply, classified by whether it asks for capability calls
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// The model produced content without requesting anything
    NoActionRequested { content: Vec<Block> },
    /// The model requested one or more invocations, in order
    ActionsRequested {
        content: Vec<Block>,
        invocations: Vec<Invocation>,
    },
}

impl ModelReply {
    pub fn from_content(content: Vec<Block>) -> Self {
        let invocations: Vec<Invocation> = content
            .iter()
            .filter_map(|block| match block {
                Block::Invocation(inv) => Some(inv.clone()),
                _ => None,
            })
            .collect();

        if invocations.is_empty() {
            ModelReply::NoActionRequested { content }
        } else {
            ModelReply::ActionsRequested {
                content,
                invocations,
            }
        }
    }

    /// The raw reply content, to append to the transcript
    pub fn content(&self) -> &[Block] {
        match self {
            ModelReply::NoActionRequested { content } => content,
            ModelReply::ActionsRequested { content, .. } => content,
        }
    }
}

/// Channel to the reasoning model
pub trait ModelChannel {
    /// Send the full transcript and return the next reply
    fn respond(
        &mut self,
        system: &str,
        transcript: &[Turn],
        tools: &[ToolDeclaration],
    ) -> ModelResult<ModelReply>;
}
