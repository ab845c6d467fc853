//! Pipeline orchestrator: wires the stages together and owns their lifecycle.
//!
//! ```text
//! capture ─▶ transcriber ─▶ conversation ─▶ synthesizer ─▶ player
//!                 │               ▲                           ▲
//!                 └── interrupt ──┼───────────────────────────┘
//!                   coordinator ──┘ (reset, interrupt, ack, shutdown)
//! ```

use crate::audio::playback::AudioOutput;
use crate::audio::utterance::{Capture, UtteranceSource};
use crate::bridge::{BridgeEvent, Notifier};
use crate::config::Config;
use crate::conversation::ConversationEngine;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::conversation_station::ConversationStation;
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::interrupt::InterruptSignal;
use crate::pipeline::player::Player;
use crate::pipeline::segments::{SegmentStore, prepare_work_dir};
use crate::pipeline::station::{Outlet, StationRunner};
use crate::pipeline::synthesizer_station::SynthesizerStation;
use crate::pipeline::transcriber_station::TranscriberStation;
use crate::pipeline::types::{ConversationInput, Utterance};
use crate::stt::{SpeechToText, Transcriber};
use crate::tts::{SpeechSynthesizer, wait_until_ready};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Consecutive capture errors tolerated before the capture thread gives up.
const MAX_CAPTURE_ERRORS: u32 = 10;

/// How long `stop` waits for threads before detaching them.
const STOP_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub language: String,
    pub min_utterance: Duration,
    /// Extra hallucination phrases for the transcriber.
    pub hallucinations: Vec<String>,
    pub keep_terminators: bool,
    pub playback_gap: Duration,
    /// Raise the interrupt on VAD speech start instead of waiting for text.
    pub barge_in_on_speech_start: bool,
    pub readiness_interval: Duration,
    pub readiness_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(defaults::WORK_DIR),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            min_utterance: Duration::from_millis(defaults::MIN_UTTERANCE_MS),
            hallucinations: Vec::new(),
            keep_terminators: false,
            playback_gap: Duration::from_millis(defaults::PLAYBACK_GAP_MS),
            barge_in_on_speech_start: false,
            readiness_interval: Duration::from_millis(defaults::READINESS_INTERVAL_MS),
            readiness_timeout: Duration::from_millis(defaults::READINESS_TIMEOUT_MS),
            queue_capacity: defaults::QUEUE_CAPACITY,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            work_dir: config.pipeline.work_dir.clone(),
            language: config.stt.language.clone(),
            min_utterance: Duration::from_millis(config.audio.min_utterance_ms),
            hallucinations: config.stt.hallucinations.clone(),
            keep_terminators: config.tts.keep_terminators,
            playback_gap: Duration::from_millis(config.playback.gap_ms),
            barge_in_on_speech_start: config.audio.barge_in_on_speech_start,
            readiness_interval: Duration::from_millis(config.tts.readiness_interval_ms),
            readiness_timeout: Duration::from_millis(config.tts.readiness_timeout_ms),
            queue_capacity: config.pipeline.queue_capacity.max(1),
        }
    }
}

/// Commands for the coordinator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Forget the conversation.
    Reset,
    /// Barge in from outside, e.g. the bridge heard speech.
    Interrupt,
    /// The remote surface finished playing this segment.
    Acknowledge(u64),
    Shutdown,
}

/// Services the pipeline drives.
pub struct Services {
    pub stt: Arc<dyn SpeechToText>,
    pub engine: ConversationEngine,
    pub synth: Arc<dyn SpeechSynthesizer>,
    pub output: Arc<dyn AudioOutput>,
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    interrupt: InterruptSignal,
    control: Sender<Control>,
    last_ack: Arc<Mutex<Option<u64>>>,
    shutdown: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Sender for coordinator commands; clone it freely.
    pub fn control(&self) -> Sender<Control> {
        self.control.clone()
    }

    pub fn interrupt(&self) -> &InterruptSignal {
        &self.interrupt
    }

    /// Highest segment ID the remote surface reported as played.
    ///
    /// Kept for observation only; playback and the `interrupted:` report do
    /// not depend on it.
    pub fn last_acknowledged(&self) -> Option<u64> {
        self.last_ack.lock().ok().and_then(|ack| *ack)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops every stage and joins their threads.
    ///
    /// Threads still busy after the deadline (a model call in flight, say)
    /// are detached and die with the process. Returns true when every
    /// thread was joined without a panic.
    pub fn stop(mut self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.control.send(Control::Shutdown).ok();
        drop(self.shutdown.take());

        let deadline = Instant::now() + STOP_DEADLINE;
        let poll_interval = Duration::from_millis(20);
        let mut clean = true;

        loop {
            let mut remaining = Vec::new();
            for handle in self.threads.drain(..) {
                if handle.is_finished() {
                    if let Err(panic_info) = handle.join() {
                        let msg = panic_info
                            .downcast_ref::<&str>()
                            .copied()
                            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                            .unwrap_or("unknown panic");
                        tracing::error!("pipeline thread panicked: {msg}");
                        clean = false;
                    }
                } else {
                    remaining.push(handle);
                }
            }
            self.threads = remaining;

            if self.threads.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    threads = self.threads.len(),
                    "shutdown timeout, detaching running threads"
                );
                clean = false;
                break;
            }
            thread::sleep(poll_interval);
        }

        tracing::info!(clean, last_acknowledged = ?self.last_acknowledged(), "pipeline stopped");
        clean
    }
}

/// Conversation pipeline: capture → transcribe → converse → synthesize → play.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    notifier: Notifier,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
            notifier: Notifier::disabled(),
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Where lifecycle events go.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Clears the work directory, waits for the synthesis backend, starts
    /// every stage and announces `ready`.
    pub fn start(
        self,
        mut source: Box<dyn UtteranceSource>,
        services: Services,
    ) -> Result<PipelineHandle> {
        prepare_work_dir(&self.config.work_dir)?;
        wait_until_ready(
            services.synth.as_ref(),
            self.config.readiness_interval,
            self.config.readiness_timeout,
        )?;

        let running = Arc::new(AtomicBool::new(true));
        let interrupt = InterruptSignal::new();
        let capacity = self.config.queue_capacity;

        let (utterance_tx, utterance_rx) = bounded::<Utterance>(capacity);
        let (input_tx, input_rx) = bounded::<ConversationInput>(capacity);
        let (reply_tx, reply_rx) = bounded(capacity);
        let (segment_tx, segment_rx) = bounded(capacity);
        let (control_tx, control_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let last_ack = Arc::new(Mutex::new(None));

        let mut threads = Vec::new();

        let player = Player::new(services.output, interrupt.clone(), self.notifier.clone())
            .with_gap(self.config.playback_gap)
            .with_running(Arc::clone(&running));
        threads.push(player.spawn(segment_rx, shutdown_rx)?);

        let synthesizer = SynthesizerStation::new(
            services.synth,
            SegmentStore::new(&self.config.work_dir),
            interrupt.clone(),
            Arc::clone(&running),
        )
        .with_keep_terminators(self.config.keep_terminators);
        threads.extend(
            StationRunner::spawn(
                synthesizer,
                reply_rx,
                Outlet::new(segment_tx),
                self.error_reporter.clone(),
            )
            .into_thread(),
        );

        threads.extend(
            StationRunner::spawn_batched(
                ConversationStation::new(services.engine),
                input_rx,
                Outlet::new(reply_tx),
                self.error_reporter.clone(),
            )
            .into_thread(),
        );

        let transcriber = Transcriber::new(services.stt)
            .with_language(&self.config.language)
            .with_min_duration(self.config.min_utterance)
            .with_extra_hallucinations(&self.config.hallucinations);
        threads.extend(
            StationRunner::spawn(
                TranscriberStation::new(transcriber, interrupt.clone(), self.notifier.clone()),
                utterance_rx,
                Outlet::new(input_tx.clone()),
                self.error_reporter.clone(),
            )
            .into_thread(),
        );

        threads.push(spawn_coordinator(
            control_rx,
            input_tx,
            interrupt.clone(),
            Arc::clone(&last_ack),
        )?);

        if self.config.barge_in_on_speech_start {
            let signal = interrupt.clone();
            source.set_speech_start_hook(Box::new(move || {
                signal.set();
            }));
        }
        threads.push(spawn_capture(source, utterance_tx, Arc::clone(&running))?);

        self.notifier.notify(BridgeEvent::Ready);
        tracing::info!(work_dir = %self.config.work_dir.display(), "pipeline ready");

        Ok(PipelineHandle {
            running,
            interrupt,
            control: control_tx,
            last_ack,
            shutdown: Some(shutdown_tx),
            threads,
        })
    }
}

fn spawn_capture(
    mut source: Box<dyn UtteranceSource>,
    utterances: Sender<Utterance>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let mut consecutive_errors = 0u32;
            while running.load(Ordering::SeqCst) {
                match source.poll() {
                    Ok(Capture::Utterance(utterance)) => {
                        consecutive_errors = 0;
                        if utterances.send(utterance).is_err() {
                            break;
                        }
                    }
                    Ok(Capture::Timeout) => consecutive_errors = 0,
                    Ok(Capture::Finished) => {
                        tracing::info!("audio source finished");
                        break;
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        tracing::warn!(consecutive_errors, "audio capture failed: {e}");
                        if consecutive_errors >= MAX_CAPTURE_ERRORS {
                            tracing::error!("giving up on audio capture");
                            break;
                        }
                    }
                }
            }
            if let Err(e) = source.close() {
                tracing::warn!("failed to close audio source: {e}");
            }
        })
}

fn spawn_coordinator(
    control: Receiver<Control>,
    inputs: Sender<ConversationInput>,
    interrupt: InterruptSignal,
    last_ack: Arc<Mutex<Option<u64>>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("coordinator".to_string())
        .spawn(move || {
            for command in control {
                tracing::debug!(?command, "control");
                match command {
                    Control::Reset => {
                        if inputs.send(ConversationInput::Reset).is_err() {
                            break;
                        }
                    }
                    Control::Interrupt => {
                        interrupt.set();
                    }
                    Control::Acknowledge(id) => {
                        if let Ok(mut ack) = last_ack.lock() {
                            *ack = Some(ack.map_or(id, |prev| prev.max(id)));
                        }
                    }
                    Control::Shutdown => break,
                }
            }
        })
}
