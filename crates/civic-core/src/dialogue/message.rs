//! Conversation message types.
//!
//! This module contains types for representing messages exchanged between a
//! citizen and the planning agent during a proposal interview.

use serde::{Deserialize, Serialize};

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// Message from the citizen.
    User,
    /// Message from the planning agent.
    Agent,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message.
    pub content: String,
    /// Timestamp when the message was created (ISO 8601 format).
    pub timestamp: String,
    /// Generated by the application rather than typed or said by a participant.
    #[serde(default)]
    pub synthetic: bool,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            synthetic: false,
        }
    }

    /// Marks the message as application-generated.
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }
}

/// Merges consecutive messages from the same role into one.
///
/// Hosted chat models expect alternating turns; a retry after a failed call
/// or a force-finalize request can leave two user messages in a row.
pub fn coalesce(messages: &[ConversationMessage]) -> Vec<ConversationMessage> {
    let mut merged: Vec<ConversationMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
                last.synthetic = last.synthetic && message.synthetic;
            }
            _ => merged.push(message.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_merges_same_role_runs() {
        let history = vec![
            ConversationMessage::agent("Hi!"),
            ConversationMessage::user("A library"),
            ConversationMessage::user("Two floors"),
            ConversationMessage::agent("Your name?"),
            ConversationMessage::user("John"),
        ];

        let merged = coalesce(&history);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[1].role, MessageRole::User);
        assert_eq!(merged[1].content, "A library\n\nTwo floors");
        assert_eq!(merged[3].content, "John");
    }

    #[test]
    fn test_coalesce_keeps_alternating_history() {
        let history = vec![
            ConversationMessage::user("a"),
            ConversationMessage::agent("b"),
            ConversationMessage::user("c"),
        ];
        assert_eq!(coalesce(&history), history);
    }

    #[test]
    fn test_coalesce_empty() {
        assert!(coalesce(&[]).is_empty());
    }
}
