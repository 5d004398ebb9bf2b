use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The provider could not be reached or returned an error status.
    Provider(String),
    /// The provider answered, but not in the shape the caller asked for.
    Malformed(String),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(message) => write!(f, "completion provider failed: {message}"),
            Self::Malformed(message) => write!(f, "completion response was malformed: {message}"),
        }
    }
}

impl std::error::Error for CompletionError {}

/// Any text-completion provider. The core only needs a string back.
pub trait TextCompletion {
    fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<String, CompletionError>;
}

impl<F> TextCompletion for F
where
    F: Fn(&[ChatMessage], &str) -> Result<String, CompletionError>,
{
    fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<String, CompletionError> {
        self(messages, system_prompt)
    }
}
