//! Ordered turn storage for one chat session.
//!
//! Turns are never deduplicated or evicted. Only `clear` removes them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fintech_types::{Role, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Position of a turn within its conversation (0-based, insertion order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TurnId(usize);

#[derive(Debug, Clone)]
pub struct Conversation {
    id: ConversationId,
    turns: Vec<Turn>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ConversationId::generate(),
            turns: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn append(&mut self, turn: Turn) -> TurnId {
        let id = TurnId(self.turns.len());
        tracing::trace!(
            conversation = %self.id,
            turn = id.0,
            role = %turn.role(),
            bytes = turn.content().len(),
            "Turn appended"
        );
        self.turns.push(turn);
        id
    }

    /// The last `window` non-system turns, oldest first.
    ///
    /// Returns an owned snapshot: turns appended afterwards never show up in it.
    #[must_use]
    pub fn recent_history(&self, window: usize) -> Vec<Turn> {
        let eligible: Vec<&Turn> = self
            .turns
            .iter()
            .filter(|turn| turn.role() != Role::System)
            .collect();
        let start = eligible.len().saturating_sub(window);
        eligible[start..].iter().map(|turn| (*turn).clone()).collect()
    }

    /// Drops every turn and starts a fresh conversation id.
    pub fn clear(&mut self) {
        let previous = self.id;
        self.turns.clear();
        self.id = ConversationId::generate();
        tracing::debug!(%previous, next = %self.id, "Conversation cleared");
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.get(id.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
