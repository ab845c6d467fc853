//! Shared fixture: a pipeline fed from an inbox directory, with mock backends.

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use voxloop::audio::playback::MockOutput;
use voxloop::audio::utterance::InboxUtteranceSource;
use voxloop::audio::wav;
use voxloop::bridge::{BridgeEvent, Notifier};
use voxloop::conversation::{Conversation, ConversationEngine, ReplyPolicy};
use voxloop::llm::MockLanguageModel;
use voxloop::pipeline::{Pipeline, PipelineConfig, PipelineHandle, Services};
use voxloop::stt::MockSpeechToText;
use voxloop::tts::MockSynthesizer;

pub const SYSTEM: &str = "system";
pub const ACK: &str = "了解しました。";

pub struct Session {
    pub dir: TempDir,
    pub handle: Option<PipelineHandle>,
    pub events: Receiver<BridgeEvent>,
    pub model: MockLanguageModel,
    pub synth: MockSynthesizer,
    pub output: MockOutput,
    next_file: usize,
}

impl Session {
    pub fn start(stt: MockSpeechToText, model: MockLanguageModel, output: MockOutput) -> Self {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let work = dir.path().join("Tmp");
        std::fs::create_dir_all(&inbox).unwrap();

        let synth = MockSynthesizer::new();
        let (notifier, events) = Notifier::channel(64);
        let config = PipelineConfig {
            work_dir: work.clone(),
            playback_gap: Duration::ZERO,
            readiness_interval: Duration::from_millis(1),
            readiness_timeout: Duration::from_secs(1),
            ..PipelineConfig::default()
        };
        let services = Services {
            stt: Arc::new(stt),
            engine: ConversationEngine::new(
                Conversation::new(SYSTEM, ACK),
                ReplyPolicy::Plain,
                Arc::new(model.clone()),
            ),
            synth: Arc::new(synth.clone()),
            output: Arc::new(output.clone()),
        };
        let source = InboxUtteranceSource::new(inbox, work)
            .with_listen_timeout(Duration::from_millis(50));

        let handle = Pipeline::new(config)
            .with_notifier(notifier)
            .start(Box::new(source), services)
            .unwrap();

        Self {
            dir,
            handle: Some(handle),
            events,
            model,
            synth,
            output,
            next_file: 0,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("Tmp")
    }

    pub fn handle(&self) -> &PipelineHandle {
        self.handle.as_ref().unwrap()
    }

    /// Drops one second of audio into the inbox, atomically.
    pub fn say(&mut self) {
        let inbox = self.dir.path().join("inbox");
        let name = format!("{:04}", self.next_file);
        self.next_file += 1;
        let partial = inbox.join(format!("{name}.part"));
        wav::write_mono(&partial, &vec![1000i16; 16000], 16000).unwrap();
        std::fs::rename(&partial, inbox.join(format!("{name}.wav"))).unwrap();
    }

    /// Waits for the next event.
    pub fn next_event(&self, timeout: Duration) -> Option<BridgeEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Collects events until `last` arrives.
    pub fn events_until(&self, last: BridgeEvent, timeout: Duration) -> Vec<BridgeEvent> {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    seen.push(event);
                    if event == last {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        seen
    }

    pub fn stop(&mut self) -> bool {
        self.handle.take().map(PipelineHandle::stop).unwrap_or(true)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn audio_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
