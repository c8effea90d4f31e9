//! Chat session: owns the conversation and enforces the append contract.
//!
//! For every send the session appends the user turn, snapshots the bounded
//! history *before* that turn, calls the gateway, and then commits exactly one
//! assistant turn (or none if the call was cancelled).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{AbortHandle, AbortRegistration, Abortable};
use thiserror::Error;

use fintech_config::SendPolicy;
use fintech_context::Conversation;
use fintech_types::{FailureKind, StructuredAnalysis, Turn};

use crate::fallback;
use crate::gateway::{CompletionGateway, StreamStop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Completed,
    /// The call failed; the reply text is fallback wording for this kind.
    Fallback(FailureKind),
    /// Aborted by the user or by a newer send. Nothing was committed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a reply is still in progress")]
    Busy,
    #[error("request was cancelled")]
    Cancelled,
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct InFlightSlot {
    current: Option<InFlight>,
    next_generation: u64,
}

/// Clears the in-flight slot on drop, unless a newer call already replaced it.
struct InFlightGuard<'a> {
    slot: &'a Mutex<InFlightSlot>,
    generation: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if slot
            .current
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == self.generation)
        {
            slot.current = None;
        }
    }
}

fn cancelled_reply() -> Reply {
    Reply {
        text: String::new(),
        outcome: ReplyOutcome::Cancelled,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ChatSession {
    gateway: Arc<CompletionGateway>,
    conversation: Mutex<Conversation>,
    in_flight: Mutex<InFlightSlot>,
    policy: SendPolicy,
}

impl ChatSession {
    #[must_use]
    pub fn new(gateway: Arc<CompletionGateway>, policy: SendPolicy) -> Self {
        Self {
            gateway,
            conversation: Mutex::new(Conversation::new()),
            in_flight: Mutex::new(InFlightSlot::default()),
            policy,
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        lock(&self.in_flight).current.is_some()
    }

    /// Streams a reply. `on_fragment` sees every fragment, including the
    /// apology appended after a mid-stream failure.
    pub async fn send<F>(&self, text: &str, mut on_fragment: F) -> Result<Reply, SendError>
    where
        F: FnMut(&str),
    {
        let (guard, registration) = self.begin(text)?;
        let history = self.append_user_turn(text, self.gateway.config().history_window);

        let mut partial = String::new();
        let result = self
            .gateway
            .complete_streaming(
                text,
                &history,
                |fragment| {
                    partial.push_str(fragment);
                    on_fragment(fragment);
                },
                registration,
            )
            .await;

        let (text, outcome) = match result {
            Ok(text) => (text, ReplyOutcome::Completed),
            Err(StreamStop::Failed(error)) => {
                let mut text = partial.clone();
                text.push_str(fallback::STREAM_APOLOGY);
                (text, ReplyOutcome::Fallback(error.kind()))
            }
            Err(StreamStop::Cancelled) => {
                return Ok(Reply {
                    text: partial,
                    outcome: ReplyOutcome::Cancelled,
                });
            }
        };

        if !self.commit(guard, Turn::assistant(text.clone())) {
            return Ok(Reply {
                text: partial,
                outcome: ReplyOutcome::Cancelled,
            });
        }
        if matches!(outcome, ReplyOutcome::Fallback(_)) {
            on_fragment(fallback::STREAM_APOLOGY);
        }
        Ok(Reply { text, outcome })
    }

    /// Non-streaming reply. Failures become the fallback text for their kind.
    pub async fn ask(&self, text: &str) -> Result<Reply, SendError> {
        let (guard, registration) = self.begin(text)?;
        let history = self.append_user_turn(text, self.gateway.config().history_window);

        let result = Abortable::new(self.gateway.complete_once(text, &history), registration).await;

        let reply = match result {
            Ok(Ok(text)) => Reply {
                text,
                outcome: ReplyOutcome::Completed,
            },
            Ok(Err(error)) => {
                let kind = error.kind();
                Reply {
                    text: fallback::reply_text(kind).to_string(),
                    outcome: ReplyOutcome::Fallback(kind),
                }
            }
            Err(_) => return Ok(cancelled_reply()),
        };

        if !self.commit(guard, Turn::assistant(reply.text.clone())) {
            return Ok(cancelled_reply());
        }
        Ok(reply)
    }

    /// Structured analysis. Failures become [`fallback::analysis`]; the
    /// committed assistant turn is the analysis summary.
    pub async fn analyze(&self, text: &str) -> Result<StructuredAnalysis, SendError> {
        let (guard, registration) = self.begin(text)?;
        let history = self.append_user_turn(text, self.gateway.config().analysis_window);

        let result = Abortable::new(
            self.gateway.complete_structured(text, &history),
            registration,
        )
        .await;

        let analysis = match result {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(_)) => fallback::analysis(),
            Err(_) => return Err(SendError::Cancelled),
        };

        if !self.commit(guard, Turn::assistant(analysis.summary())) {
            return Err(SendError::Cancelled);
        }
        Ok(analysis)
    }

    /// Aborts the in-flight call, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let in_flight = lock(&self.in_flight).current.take();
        match in_flight {
            Some(in_flight) => {
                in_flight.abort.abort();
                tracing::info!(generation = in_flight.generation, "Cancelled in-flight reply");
                true
            }
            None => false,
        }
    }

    pub fn new_conversation(&self) {
        self.cancel();
        lock(&self.conversation).clear();
    }

    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        lock(&self.conversation).turns().to_vec()
    }

    fn begin(
        &self,
        text: &str,
    ) -> Result<(InFlightGuard<'_>, AbortRegistration), SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let mut slot = lock(&self.in_flight);
        if let Some(previous) = slot.current.take() {
            match self.policy {
                SendPolicy::Reject => {
                    slot.current = Some(previous);
                    return Err(SendError::Busy);
                }
                SendPolicy::CancelPrevious => {
                    tracing::info!(
                        generation = previous.generation,
                        "Cancelling previous reply for a new send"
                    );
                    previous.abort.abort();
                }
            }
        }

        let (abort, registration) = AbortHandle::new_pair();
        let generation = slot.next_generation;
        slot.next_generation = slot.next_generation.wrapping_add(1);
        slot.current = Some(InFlight { generation, abort });

        Ok((
            InFlightGuard {
                slot: &self.in_flight,
                generation,
            },
            registration,
        ))
    }

    /// Appends `turn` and releases the slot, but only while this call still
    /// owns the slot. A call cancelled after its response arrived commits nothing.
    fn commit(&self, guard: InFlightGuard<'_>, turn: Turn) -> bool {
        let mut slot = lock(&self.in_flight);
        let owned = slot
            .current
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == guard.generation);
        if owned {
            lock(&self.conversation).append(turn);
            slot.current = None;
        } else {
            tracing::info!(generation = guard.generation, "Dropping reply of a cancelled call");
        }
        drop(slot);
        drop(guard);
        owned
    }

    /// Appends the user turn and returns the history that preceded it.
    fn append_user_turn(&self, text: &str, window: usize) -> Vec<Turn> {
        let mut conversation = lock(&self.conversation);
        let history = conversation.recent_history(window);
        conversation.append(Turn::user(text));
        history
    }
}
