use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use course_core::model::{ChatMessage, ChatReference};

use crate::api::ChatTransport;
use crate::error::ChatError;

/// Shown in place of the assistant reply when an exchange fails.
pub const FALLBACK_MESSAGE: &str = "Sorry, something went wrong.";

/// Whether an exchange is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatPhase {
    #[default]
    Idle,
    Streaming,
}

/// Published view of the chat transcript.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub transcript: Vec<ChatMessage>,
    pub phase: ChatPhase,
    /// Bumped by every new exchange and every reset, so writes from an
    /// exchange that survived a reset can be told apart and discarded.
    generation: u64,
}

/// One lesson-scoped assistant conversation.
///
/// At most one exchange runs at a time. The user message and an assistant
/// placeholder are appended together before the request goes out; streamed
/// chunks then grow the placeholder in place. Dropping the `send` future
/// cancels the exchange and removes a placeholder that never received text.
pub struct StreamingChatSession {
    transport: Arc<dyn ChatTransport>,
    publisher: watch::Sender<ChatState>,
    states: watch::Receiver<ChatState>,
}

/// Restores the idle phase if an exchange future is dropped mid-flight.
struct ExchangeGuard<'a> {
    publisher: &'a watch::Sender<ChatState>,
    generation: u64,
    armed: bool,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let generation = self.generation;
        self.publisher.send_modify(|state| {
            if state.generation != generation {
                return;
            }
            state.phase = ChatPhase::Idle;
            // A placeholder that never received a chunk disappears; partial
            // replies are kept.
            if state.transcript.last().is_some_and(|m| m.pending) {
                state.transcript.pop();
            }
        });
    }
}

impl StreamingChatSession {
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (publisher, states) = watch::channel(ChatState::default());
        Self {
            transport,
            publisher,
            states,
        }
    }

    /// Watch receiver for transcript changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.states.clone()
    }

    /// The latest published transcript.
    #[must_use]
    pub fn state(&self) -> ChatState {
        self.states.borrow().clone()
    }

    /// Drop the transcript, for a lesson change.
    ///
    /// An exchange still in flight keeps running but becomes a bystander:
    /// its remaining chunks, failure fallback, and cleanup are all discarded
    /// by the generation check, so it can never write into a transcript it
    /// no longer owns.
    pub fn reset(&self) {
        self.publisher.send_modify(|state| {
            state.generation = state.generation.wrapping_add(1);
            state.transcript.clear();
            state.phase = ChatPhase::Idle;
        });
    }

    /// Run one full exchange: append the user message, stream the assistant
    /// reply into the transcript, return when the stream closes.
    ///
    /// # Errors
    ///
    /// `EmptyInput` for whitespace-only text and `Busy` while another
    /// exchange runs, both without touching the transcript. Transport and
    /// mid-stream failures replace the assistant reply with
    /// [`FALLBACK_MESSAGE`] and are returned to the caller.
    pub async fn send(&self, text: &str, reference: &ChatReference) -> Result<(), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let mut started = false;
        let mut generation = 0;
        let mut transcript = Vec::new();
        self.publisher.send_modify(|state| {
            if state.phase == ChatPhase::Idle {
                state.phase = ChatPhase::Streaming;
                state.generation = state.generation.wrapping_add(1);
                generation = state.generation;
                state.transcript.push(ChatMessage::user(text));
                transcript = state.transcript.clone();
                state.transcript.push(ChatMessage::placeholder());
                started = true;
            }
        });
        if !started {
            return Err(ChatError::Busy);
        }

        let mut guard = ExchangeGuard {
            publisher: &self.publisher,
            generation,
            armed: true,
        };

        let mut stream = match self.transport.open_exchange(&transcript, reference).await {
            Ok(stream) => stream,
            Err(err) => {
                self.fail_exchange(&mut guard);
                return Err(err);
            }
        };

        // Chunk boundaries may split UTF-8 sequences; only the valid prefix
        // of the accumulated bytes is appended per chunk.
        let mut pending_bytes: Vec<u8> = Vec::new();
        let mut streamed = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.fail_exchange(&mut guard);
                    return Err(err);
                }
            };
            pending_bytes.extend_from_slice(&chunk);
            let valid = match std::str::from_utf8(&pending_bytes) {
                Ok(all) => all.len(),
                Err(err) => err.valid_up_to(),
            };
            if valid == 0 {
                continue;
            }
            let decoded: Vec<u8> = pending_bytes.drain(..valid).collect();
            match String::from_utf8(decoded) {
                Ok(prefix) => streamed.push_str(&prefix),
                Err(_) => continue,
            }
            self.publish_reply(generation, &streamed);
        }
        if !pending_bytes.is_empty() {
            streamed.push_str(&String::from_utf8_lossy(&pending_bytes));
            self.publish_reply(generation, &streamed);
        }

        guard.armed = false;
        self.publisher.send_modify(|state| {
            if state.generation != generation {
                return;
            }
            state.phase = ChatPhase::Idle;
            if let Some(last) = state.transcript.last_mut() {
                if last.pending {
                    // Stream closed without a single chunk: an empty reply,
                    // not an error.
                    last.pending = false;
                }
            }
        });
        Ok(())
    }

    fn publish_reply(&self, generation: u64, text: &str) {
        self.publisher.send_modify(|state| {
            if state.generation != generation {
                return;
            }
            if let Some(last) = state.transcript.last_mut() {
                last.text = text.to_string();
                last.pending = false;
            }
        });
    }

    fn fail_exchange(&self, guard: &mut ExchangeGuard<'_>) {
        guard.armed = false;
        let generation = guard.generation;
        self.publisher.send_modify(|state| {
            if state.generation != generation {
                return;
            }
            state.phase = ChatPhase::Idle;
            if let Some(last) = state.transcript.last_mut() {
                last.text = FALLBACK_MESSAGE.to_string();
                last.pending = false;
            }
        });
    }
}
