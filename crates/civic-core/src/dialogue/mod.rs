//! Dialogue domain module.
//!
//! Message types shared by the dialogue session and the inference gateway.

mod message;

pub use message::{coalesce, ConversationMessage, MessageRole};
