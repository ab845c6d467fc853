//! Sentence splitting and the on-disk store for synthesized segments.

use crate::pipeline::types::{AudioSegment, TempAudio};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Characters that end a spoken sentence.
pub const SENTENCE_TERMINATORS: &[char] = &['。', '．', '.', '!', '?', '！', '？', ';', ':', '\n'];

/// Splits reply text into speakable sentences.
///
/// Pieces without any letter, digit or kana/kanji are dropped. With
/// `keep_terminators` each sentence keeps the character that ended it.
pub fn split_sentences(text: &str, keep_terminators: bool) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            if keep_terminators && ch != '\n' {
                current.push(ch);
            }
            push_meaningful(&mut sentences, &mut current);
        } else {
            current.push(ch);
        }
    }
    push_meaningful(&mut sentences, &mut current);
    sentences
}

fn push_meaningful(sentences: &mut Vec<String>, current: &mut String) {
    let piece = std::mem::take(current);
    if piece.chars().any(char::is_alphanumeric) {
        sentences.push(piece.trim().to_string());
    }
}

/// Empties `dir`, creating it if needed. Subdirectories are left alone.
pub fn prepare_work_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!(dir = %dir.display(), removed, "cleared work directory");
    }
    Ok(())
}

/// Writes segment audio to `<dir>/<id>.<ext>` and hands out session-wide
/// segment IDs.
///
/// An ID is consumed only when its file was written, so IDs are gap-free
/// and strictly increasing.
#[derive(Debug)]
pub struct SegmentStore {
    dir: PathBuf,
    next_id: u64,
}

impl SegmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: 0,
        }
    }

    /// ID the next stored segment will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn store(
        &mut self,
        text: &str,
        generation: u64,
        audio: &[u8],
        extension: &str,
    ) -> io::Result<AudioSegment> {
        let id = self.next_id;
        let path = self.dir.join(format!("{id}.{extension}"));
        if let Err(e) = fs::write(&path, audio) {
            fs::remove_file(&path).ok();
            return Err(e);
        }
        self.next_id += 1;
        Ok(AudioSegment {
            id,
            text: text.to_string(),
            generation,
            audio: TempAudio::new(path),
        })
    }
}
