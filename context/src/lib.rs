//! Conversation state for the FinTech advisor.
//!
//! The [`Conversation`] owns the full, unbounded turn sequence of one session and
//! derives the bounded context window forwarded to the completion service.
//!
//! ```text
//! Conversation
//! ├── id: ConversationId (rotated on clear)
//! └── turns: Vec<Turn> (append-only until cleared)
//!
//! recent_history(n) -> Vec<Turn> (owned snapshot, system turns excluded)
//! ```

mod conversation;

pub use conversation::{Conversation, ConversationId, TurnId};
