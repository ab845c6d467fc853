//! Conversation station: batches of user input in, one reply out.

use crate::conversation::{ConversationEngine, ConverseError};
use crate::pipeline::error::StationError;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{ConversationInput, Reply, UserText};

/// Owns the conversation history. Runs batched: everything queued while
/// the previous reply was being generated is answered in one model call.
pub struct ConversationStation {
    engine: ConversationEngine,
}

impl ConversationStation {
    pub fn new(engine: ConversationEngine) -> Self {
        Self { engine }
    }

    /// Applies any reset in the batch and returns the user input that
    /// follows the last one.
    fn after_last_reset(&mut self, batch: Vec<ConversationInput>) -> Vec<UserText> {
        let mut users = Vec::with_capacity(batch.len());
        for input in batch {
            match input {
                ConversationInput::User(user) => users.push(user),
                ConversationInput::Reset => {
                    if !users.is_empty() {
                        tracing::debug!(dropped = users.len(), "reset discards unanswered input");
                    }
                    users.clear();
                    self.engine.reset();
                    tracing::info!("conversation reset");
                }
            }
        }
        users
    }
}

impl Station for ConversationStation {
    type Input = Vec<ConversationInput>;
    type Output = Reply;

    fn name(&self) -> &'static str {
        "conversation"
    }

    fn process(
        &mut self,
        batch: Vec<ConversationInput>,
        out: &mut Outlet<Reply>,
    ) -> Result<(), StationError> {
        let users = self.after_last_reset(batch);
        let Some(generation) = users.iter().map(|u| u.generation).max() else {
            return Ok(());
        };
        if users.len() > 1 {
            tracing::debug!(inputs = users.len(), "answering batched input");
        }

        match self.engine.step(users.into_iter().map(|u| u.text)) {
            Ok(outcome) => {
                if outcome.spoken.is_empty() {
                    tracing::debug!("reply has nothing to say");
                    return Ok(());
                }
                tracing::info!(
                    generation,
                    retries = outcome.retries,
                    fallback = outcome.fell_back,
                    reply = %outcome.spoken,
                    "reply ready"
                );
                out.emit(Reply {
                    text: outcome.spoken,
                    generation,
                });
                Ok(())
            }
            Err(ConverseError::NoInput) => Ok(()),
            Err(ConverseError::ModelFailure(e)) => Err(StationError::Recoverable(format!(
                "language model call failed: {e}"
            ))),
        }
    }
}
