//! Turns bridge commands into pipeline control messages.

use crate::bridge::protocol::BridgeCommand;
use crate::bridge::server::CommandHandler;
use crate::pipeline::orchestrator::Control;
use crossbeam_channel::Sender;

impl From<BridgeCommand> for Control {
    fn from(command: BridgeCommand) -> Self {
        match command {
            BridgeCommand::Exit => Control::Reset,
            BridgeCommand::SpeechStart => Control::Interrupt,
            BridgeCommand::Ack(id) => Control::Acknowledge(id),
        }
    }
}

/// Forwards every bridge command to the pipeline coordinator.
pub struct ControlHandler {
    control: Sender<Control>,
}

impl ControlHandler {
    pub fn new(control: Sender<Control>) -> Self {
        Self { control }
    }
}

#[async_trait::async_trait]
impl CommandHandler for ControlHandler {
    async fn handle(&self, command: BridgeCommand) {
        if self.control.send(command.into()).is_err() {
            tracing::debug!(%command, "pipeline gone, dropping bridge command");
        }
    }
}
