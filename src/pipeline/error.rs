//! Station failures and where they get reported.

use thiserror::Error;

/// Outcome of a station failing on one unit of work.
///
/// Nothing here crosses a queue: the runner reports the error and either
/// moves on to the next input or stops the station.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StationError {
    /// Drop this utterance, reply or segment and keep going.
    #[error("dropped: {0}")]
    Recoverable(String),
    /// Stop the station.
    #[error("stopping: {0}")]
    Fatal(String),
}

impl StationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, station: &str, error: &StationError);
}

/// Logs dropped work as warnings and station stops as errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        if error.is_fatal() {
            tracing::error!(station, "{error}");
        } else {
            tracing::warn!(station, "{error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_says_what_happens_next() {
        let dropped = StationError::Recoverable("tts timed out".to_string());
        assert_eq!(dropped.to_string(), "dropped: tts timed out");
        assert!(!dropped.is_fatal());

        let fatal = StationError::Fatal("output device gone".to_string());
        assert_eq!(fatal.to_string(), "stopping: output device gone");
        assert!(fatal.is_fatal());
    }

    #[test]
    fn test_log_reporter_accepts_both_kinds() {
        LogReporter.report("synthesizer", &StationError::Recoverable("tts down".to_string()));
        LogReporter.report("player", &StationError::Fatal("device gone".to_string()));
    }
}
