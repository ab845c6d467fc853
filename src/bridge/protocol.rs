//! Line protocol spoken with the chat-voice bridge.
//!
//! Each message is one line of plain text. Outbound lines report playback
//! lifecycle; inbound lines steer the conversation.

use std::fmt;
use std::str::FromStr;

/// Events sent from the pipeline to bridge clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Startup finished; utterances are being accepted.
    Ready,
    /// The speech-to-text engine failed and the client should re-arm recording.
    Restart,
    /// Segment finished playing and its audio was deleted.
    Deleted(u64),
    /// Playback was cut short during this segment.
    Interrupted(u64),
}

impl fmt::Display for BridgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeEvent::Ready => f.write_str("ready"),
            BridgeEvent::Restart => f.write_str("restart"),
            BridgeEvent::Deleted(id) => write!(f, "{id}"),
            BridgeEvent::Interrupted(id) => write!(f, "interrupted:{id}"),
        }
    }
}

impl FromStr for BridgeEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ready" => Ok(BridgeEvent::Ready),
            "restart" => Ok(BridgeEvent::Restart),
            other => {
                if let Some(id) = other.strip_prefix("interrupted:") {
                    id.parse()
                        .map(BridgeEvent::Interrupted)
                        .map_err(|_| format!("invalid segment id in {other:?}"))
                } else {
                    other
                        .parse()
                        .map(BridgeEvent::Deleted)
                        .map_err(|_| format!("unknown event {other:?}"))
                }
            }
        }
    }
}

/// Commands received from bridge clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    /// The user left; start the next conversation from scratch.
    Exit,
    /// The remote side heard the user start talking.
    SpeechStart,
    /// Last segment the remote side finished playing.
    Ack(u64),
}

impl fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeCommand::Exit => f.write_str("exit"),
            BridgeCommand::SpeechStart => f.write_str("speech_start"),
            BridgeCommand::Ack(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for BridgeCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "exit" => Ok(BridgeCommand::Exit),
            "speech_start" => Ok(BridgeCommand::SpeechStart),
            "" => Err("empty command".to_string()),
            other => other
                .parse()
                .map(BridgeCommand::Ack)
                .map_err(|_| format!("unknown command {other:?}")),
        }
    }
}
