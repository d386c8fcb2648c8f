//! Conversation transcript model and pure history-editing helpers.

use serde::{Deserialize, Serialize};

pub const TERMINATE_REPLY: &str = "TERMINATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// The speaker expected to answer a message from `self`.
    pub fn counterpart(&self) -> Role {
        match self {
            Role::User => Role::Assistant,
            Role::Assistant | Role::System => Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Lays out plain turns as alternating user/assistant messages, user first.
pub fn to_conversation<S: AsRef<str>>(turns: &[S]) -> Vec<Message> {
    let mut role = Role::User;
    let mut messages = Vec::with_capacity(turns.len());
    for turn in turns {
        messages.push(Message::new(role, turn.as_ref()));
        role = role.counterpart();
    }
    messages
}

/// Returns a copy of `history` whose last message ends in `"{marker} {action}"`.
///
/// Text from the last `marker` onward is replaced. A message without the
/// marker keeps its content and gains the action on a new line.
pub fn replace_last_action(history: &[Message], marker: &str, action: &str) -> Vec<Message> {
    let mut edited = history.to_vec();
    let Some(last) = edited.last_mut() else {
        return edited;
    };

    let content = last.content.as_str();
    last.content = match content.rfind(marker).filter(|_| !marker.is_empty()) {
        Some(index) => format!("{}{marker} {action}", &content[..index]),
        None if content.is_empty() => format!("{marker} {action}"),
        None => format!("{content}\n{marker} {action}"),
    };
    edited
}

/// A message that ends the conversation when received.
pub fn is_termination_message(content: &str) -> bool {
    content.to_lowercase().contains("terminate")
}
