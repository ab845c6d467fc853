//! Dialogue state and the model round-trip for each batch of user input.

pub mod engine;
pub mod policy;
pub mod turn;

pub use engine::{ConversationEngine, ConverseError, ReplyOutcome};
pub use policy::{ExtractError, ReplyPolicy, strip_emoji};
pub use turn::{Conversation, Role, Turn};
