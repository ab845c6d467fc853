//! Line-based link to the chat-voice bridge.
//!
//! Pipeline threads publish [`BridgeEvent`]s through a [`Notifier`]; the
//! [`BridgeServer`] fans them out to socket clients and feeds their
//! [`BridgeCommand`]s back to the pipeline coordinator.

pub mod client;
pub mod handler;
pub mod notifier;
pub mod protocol;
pub mod server;

pub use client::{follow, send_command};
pub use handler::ControlHandler;
pub use notifier::Notifier;
pub use protocol::{BridgeCommand, BridgeEvent};
pub use server::{BridgeServer, CommandHandler, default_socket_path};
