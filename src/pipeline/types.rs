//! Data types passed between pipeline stations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A transient audio file owned by whichever stage holds the value.
///
/// The file is removed exactly once: explicitly through [`remove`](Self::remove)
/// or implicitly when the value is dropped.
#[derive(Debug)]
pub struct TempAudio {
    path: PathBuf,
    removed: bool,
}

impl TempAudio {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the backing file now and reports the outcome.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        remove_quietly_missing(&self.path)
    }
}

impl Drop for TempAudio {
    fn drop(&mut self) {
        if !self.removed {
            self.removed = true;
            if let Err(e) = remove_quietly_missing(&self.path) {
                tracing::warn!(path = %self.path.display(), "failed to remove audio file: {e}");
            }
        }
    }
}

fn remove_quietly_missing(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// One captured stretch of user speech, stored as a 16kHz mono WAV file.
#[derive(Debug)]
pub struct Utterance {
    pub audio: TempAudio,
    pub duration: Duration,
    pub sequence: u64,
}

impl Utterance {
    pub fn new(path: PathBuf, duration: Duration, sequence: u64) -> Self {
        Self {
            audio: TempAudio::new(path),
            duration,
            sequence,
        }
    }

    pub fn path(&self) -> &Path {
        self.audio.path()
    }
}

/// Accepted user text, stamped with the interrupt generation it raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserText {
    pub text: String,
    pub generation: u64,
}

/// Input to the conversation station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationInput {
    User(UserText),
    /// Forget the conversation and start again from the template.
    Reset,
}

/// A reply ready to be spoken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub generation: u64,
}

/// A synthesized sentence waiting to be played.
#[derive(Debug)]
pub struct AudioSegment {
    pub id: u64,
    pub text: String,
    pub generation: u64,
    pub audio: TempAudio,
}

impl AudioSegment {
    pub fn path(&self) -> &Path {
        self.audio.path()
    }

    /// Deletes the backing file without playing it.
    pub fn discard(self) {
        let id = self.id;
        if let Err(e) = self.audio.remove() {
            tracing::warn!(segment = id, "failed to remove segment file: {e}");
        }
    }
}
