//! Ordered playback with immediate barge-in.
//!
//! The player thread hands one file at a time to a render thread and waits
//! on a `select!` over render completion, the interrupt wake channel and
//! shutdown. It is the only place that clears the interrupt signal.

use crate::audio::playback::{AudioOutput, RenderOutcome, StopFlag};
use crate::bridge::{BridgeEvent, Notifier};
use crate::defaults;
use crate::error::Result;
use crate::pipeline::interrupt::InterruptSignal;
use crate::pipeline::types::AudioSegment;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, after, bounded, select};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a stopped render may take before we complain.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// How the wait on a playing segment ended.
enum Played {
    Finished(Result<RenderOutcome>),
    Interrupted,
    Shutdown,
}

/// How the pause between segments ended.
enum Paused {
    Elapsed,
    Interrupted,
    Shutdown,
}

pub struct Player {
    output: Arc<dyn AudioOutput>,
    interrupt: InterruptSignal,
    notifier: Notifier,
    running: Arc<AtomicBool>,
    gap: Duration,
}

/// The render thread and the channels to it.
struct Renderer {
    jobs: Sender<PathBuf>,
    done: Receiver<Result<RenderOutcome>>,
    stop: StopFlag,
    handle: JoinHandle<()>,
}

impl Renderer {
    fn spawn(output: Arc<dyn AudioOutput>) -> io::Result<Self> {
        let (jobs, job_rx) = bounded::<PathBuf>(1);
        let (done_tx, done) = bounded(1);
        let stop: StopFlag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                for path in job_rx {
                    let result = output.render(&path, &flag);
                    if done_tx.send(result).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            jobs,
            done,
            stop,
            handle,
        })
    }

    /// Stops the current render and waits for the render thread to confirm.
    fn halt(&self) {
        self.stop.store(true, Ordering::Release);
        match self.done.recv_timeout(STOP_GRACE) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("audio output is slow to stop");
                self.done.recv().ok();
            }
        }
    }

    fn finish(self) {
        drop(self.jobs);
        if self.handle.join().is_err() {
            tracing::error!("render thread panicked");
        }
    }
}

impl Player {
    pub fn new(output: Arc<dyn AudioOutput>, interrupt: InterruptSignal, notifier: Notifier) -> Self {
        Self {
            output,
            interrupt,
            notifier,
            running: Arc::new(AtomicBool::new(true)),
            gap: Duration::from_millis(defaults::PLAYBACK_GAP_MS),
        }
    }

    /// Pause between consecutive segments.
    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    /// Shares the pipeline's running flag.
    pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Starts the player. It exits when `shutdown` fires or disconnects,
    /// or when the segment channel is closed.
    pub fn spawn(
        self,
        segments: Receiver<AudioSegment>,
        shutdown: Receiver<()>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("player".to_string())
            .spawn(move || self.run(segments, shutdown))
    }

    fn run(self, segments: Receiver<AudioSegment>, shutdown: Receiver<()>) {
        let renderer = match Renderer::spawn(Arc::clone(&self.output)) {
            Ok(renderer) => renderer,
            Err(e) => {
                tracing::error!("failed to start render thread: {e}");
                segments.try_iter().for_each(AudioSegment::discard);
                return;
            }
        };

        let mut backlog = VecDeque::new();
        let mut last_played = None;
        while let Some(segment) =
            self.next_segment(&mut last_played, &mut backlog, &segments, &shutdown)
        {
            if self.interrupt.is_stale(segment.generation) {
                tracing::debug!(segment = segment.id, "discarding segment of an interrupted reply");
                segment.discard();
                continue;
            }

            let id = segment.id;
            tracing::debug!(segment = id, text = %segment.text, "playing");
            renderer.stop.store(false, Ordering::Release);
            if renderer.jobs.send(segment.path().to_path_buf()).is_err() {
                tracing::error!("render thread is gone");
                segment.discard();
                break;
            }

            match self.wait_played(&renderer, &shutdown) {
                Played::Finished(result) => {
                    if let Err(e) = result {
                        tracing::warn!(segment = id, "playback failed: {e}");
                    }
                    segment.discard();
                    self.notifier.notify(BridgeEvent::Deleted(id));
                    last_played = Some(id);
                }
                Played::Interrupted => {
                    renderer.halt();
                    segment.discard();
                    self.interrupted(id, &mut backlog, &segments);
                    last_played = Some(id);
                    continue;
                }
                Played::Shutdown => {
                    renderer.halt();
                    segment.discard();
                    break;
                }
            }

            match self.pause(&shutdown) {
                Paused::Elapsed => {}
                Paused::Interrupted => self.interrupted(id, &mut backlog, &segments),
                Paused::Shutdown => break,
            }
        }

        let leftover = backlog.len();
        backlog.into_iter().for_each(AudioSegment::discard);
        segments.try_iter().for_each(AudioSegment::discard);
        renderer.finish();
        tracing::debug!(leftover, "player stopped");
    }

    /// Blocks until there is something to play.
    ///
    /// An interrupt that lands between two segments of a reply still counts
    /// as interrupting it. Once the queue has run dry the player is idle, and
    /// interrupts are cleared without further effect.
    fn next_segment(
        &self,
        last_played: &mut Option<u64>,
        backlog: &mut VecDeque<AudioSegment>,
        segments: &Receiver<AudioSegment>,
        shutdown: &Receiver<()>,
    ) -> Option<AudioSegment> {
        loop {
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            if self.interrupt.take() {
                match *last_played {
                    Some(id) if !backlog.is_empty() || !segments.is_empty() => {
                        self.interrupted(id, backlog, segments);
                    }
                    _ => tracing::debug!("interrupt while idle"),
                }
            }
            if let Some(segment) = backlog.pop_front() {
                return Some(segment);
            }
            if let Ok(segment) = segments.try_recv() {
                return Some(segment);
            }
            *last_played = None;
            select! {
                recv(segments) -> msg => return msg.ok(),
                recv(self.interrupt.wake()) -> _ => continue,
                recv(shutdown) -> _ => return None,
            }
        }
    }

    fn wait_played(&self, renderer: &Renderer, shutdown: &Receiver<()>) -> Played {
        loop {
            select! {
                recv(renderer.done) -> msg => {
                    return match msg {
                        Ok(result) => Played::Finished(result),
                        Err(_) => Played::Shutdown,
                    };
                }
                recv(self.interrupt.wake()) -> _ => {
                    if self.interrupt.take() {
                        return Played::Interrupted;
                    }
                }
                recv(shutdown) -> _ => return Played::Shutdown,
            }
        }
    }

    fn pause(&self, shutdown: &Receiver<()>) -> Paused {
        if self.gap.is_zero() {
            return if self.interrupt.take() {
                Paused::Interrupted
            } else {
                Paused::Elapsed
            };
        }
        let timer = after(self.gap);
        loop {
            select! {
                recv(timer) -> _ => return Paused::Elapsed,
                recv(self.interrupt.wake()) -> _ => {
                    if self.interrupt.take() {
                        return Paused::Interrupted;
                    }
                }
                recv(shutdown) -> _ => return Paused::Shutdown,
            }
        }
    }

    /// Throws away everything queued for interrupted replies, then reports
    /// the last segment that was played.
    fn interrupted(
        &self,
        last_played: u64,
        backlog: &mut VecDeque<AudioSegment>,
        segments: &Receiver<AudioSegment>,
    ) {
        let queued: Vec<AudioSegment> = backlog.drain(..).chain(segments.try_iter()).collect();
        let mut discarded = 0usize;
        for segment in queued {
            if self.interrupt.is_stale(segment.generation) {
                segment.discard();
                discarded += 1;
            } else {
                backlog.push_back(segment);
            }
        }
        tracing::info!(segment = last_played, discarded, "playback interrupted");
        self.notifier.notify(BridgeEvent::Interrupted(last_played));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::MockOutput;
    use crate::pipeline::types::TempAudio;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        output: MockOutput,
        interrupt: InterruptSignal,
        events: Receiver<BridgeEvent>,
        segments: Sender<AudioSegment>,
        shutdown: Option<Sender<()>>,
        handle: Option<JoinHandle<()>>,
    }

    impl Harness {
        fn new(output: MockOutput, gap: Duration) -> Self {
            Self::wrapping(output, gap, |_, mock| Arc::new(mock))
        }

        /// Plays through whatever `wrap` builds around the mock.
        fn wrapping<F>(output: MockOutput, gap: Duration, wrap: F) -> Self
        where
            F: FnOnce(InterruptSignal, MockOutput) -> Arc<dyn AudioOutput>,
        {
            let dir = TempDir::new().unwrap();
            let interrupt = InterruptSignal::new();
            let (notifier, events) = Notifier::channel(64);
            let (segments, segment_rx) = bounded(16);
            let (shutdown, shutdown_rx) = bounded(0);
            let device = wrap(interrupt.clone(), output.clone());
            let handle = Player::new(device, interrupt.clone(), notifier)
                .with_gap(gap)
                .spawn(segment_rx, shutdown_rx)
                .unwrap();
            Self {
                dir,
                output,
                interrupt,
                events,
                segments,
                shutdown: Some(shutdown),
                handle: Some(handle),
            }
        }

        fn segment(&self, id: u64, generation: u64) -> (AudioSegment, PathBuf) {
            let path = self.dir.path().join(format!("{id}.wav"));
            std::fs::write(&path, b"RIFF").unwrap();
            let segment = AudioSegment {
                id,
                text: format!("sentence {id}"),
                generation,
                audio: TempAudio::new(path.clone()),
            };
            (segment, path)
        }

        fn send(&self, id: u64, generation: u64) -> PathBuf {
            let (segment, path) = self.segment(id, generation);
            self.segments.send(segment).unwrap();
            path
        }

        fn event(&self) -> BridgeEvent {
            self.events.recv_timeout(Duration::from_secs(5)).unwrap()
        }

        fn stop(&mut self) {
            self.shutdown.take();
            if let Some(handle) = self.handle.take() {
                handle.join().unwrap();
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.stop();
        }
    }

    #[test]
    fn test_plays_in_order_and_acks_deletion() {
        let h = Harness::new(MockOutput::new(), Duration::ZERO);
        let first = h.send(0, 0);
        let second = h.send(1, 0);

        assert_eq!(h.event(), BridgeEvent::Deleted(0));
        assert_eq!(h.event(), BridgeEvent::Deleted(1));
        assert_eq!(h.output.rendered(), vec![first.clone(), second.clone()]);
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_interrupt_drains_queue_and_reports_once() {
        let output = MockOutput::new().with_render_time(Duration::from_secs(30));
        let mut h = Harness::new(output, Duration::ZERO);
        let paths: Vec<PathBuf> = [5, 6, 7].iter().map(|&id| h.send(id, 0)).collect();

        let started = h.output.wait_started(Duration::from_secs(5)).unwrap();
        assert_eq!(started, paths[0]);

        h.interrupt.set();
        assert_eq!(h.event(), BridgeEvent::Interrupted(5));

        assert!(paths.iter().all(|p| !p.exists()));
        assert!(!h.interrupt.is_set());
        h.stop();

        assert_eq!(h.output.started_names(), vec!["5".to_string()]);
        assert!(h.output.rendered().is_empty());
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn test_fresh_segments_survive_interrupt() {
        let output = MockOutput::new().with_render_time(Duration::from_millis(300));
        let h = Harness::new(output, Duration::ZERO);
        h.send(0, 0);
        h.output.wait_started(Duration::from_secs(5)).unwrap();

        let generation = h.interrupt.set();
        h.send(1, generation);

        assert_eq!(h.event(), BridgeEvent::Interrupted(0));
        assert_eq!(h.event(), BridgeEvent::Deleted(1));
    }

    #[test]
    fn test_stale_segment_never_plays() {
        let h = Harness::new(MockOutput::new(), Duration::ZERO);
        h.interrupt.set();
        let stale = h.send(3, 0);
        h.send(4, 1);

        assert_eq!(h.event(), BridgeEvent::Deleted(4));
        assert!(!stale.exists());
        assert_eq!(h.output.started_names(), vec!["4".to_string()]);
    }

    #[test]
    fn test_idle_interrupt_is_cleared_silently() {
        let h = Harness::new(MockOutput::new(), Duration::ZERO);
        h.interrupt.set();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while h.interrupt.is_set() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!h.interrupt.is_set());
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn test_interrupt_during_gap() {
        let h = Harness::new(MockOutput::new(), Duration::from_secs(30));
        h.send(0, 0);
        let queued = h.send(1, 0);

        assert_eq!(h.event(), BridgeEvent::Deleted(0));
        h.interrupt.set();
        assert_eq!(h.event(), BridgeEvent::Interrupted(0));
        assert!(!queued.exists());
    }

    /// Finishes every file, but raises the interrupt as the first one ends.
    struct InterruptAsFirstEnds {
        inner: MockOutput,
        interrupt: InterruptSignal,
        fired: AtomicBool,
    }

    impl AudioOutput for InterruptAsFirstEnds {
        fn render(&self, path: &std::path::Path, stop: &AtomicBool) -> Result<RenderOutcome> {
            let outcome = self.inner.render(path, stop)?;
            if !self.fired.swap(true, Ordering::AcqRel) {
                self.interrupt.set();
            }
            Ok(outcome)
        }
    }

    #[test]
    fn test_interrupt_as_segment_ends_without_gap_reports_once() {
        let output = MockOutput::new().with_render_time(Duration::from_millis(200));
        let mut h = Harness::wrapping(output, Duration::ZERO, |interrupt, inner| {
            Arc::new(InterruptAsFirstEnds {
                inner,
                interrupt,
                fired: AtomicBool::new(false),
            })
        });
        let paths: Vec<PathBuf> = [5, 6, 7].iter().map(|&id| h.send(id, 0)).collect();

        let mut events = Vec::new();
        loop {
            let event = h.event();
            let done = matches!(event, BridgeEvent::Interrupted(_));
            events.push(event);
            if done {
                break;
            }
        }
        h.stop();
        events.extend(h.events.try_iter());

        let interruptions: Vec<&BridgeEvent> = events
            .iter()
            .filter(|e| matches!(e, BridgeEvent::Interrupted(_)))
            .collect();
        assert_eq!(interruptions, vec![&BridgeEvent::Interrupted(5)]);
        assert!(!events.contains(&BridgeEvent::Deleted(6)));
        assert!(!events.contains(&BridgeEvent::Deleted(7)));
        assert_eq!(h.output.started_names(), vec!["5".to_string()]);
        assert!(paths.iter().all(|p| !p.exists()));
        assert!(!h.interrupt.is_set());
    }

    #[test]
    fn test_render_failure_still_deletes() {
        let h = Harness::new(MockOutput::new().with_failure(), Duration::ZERO);
        let path = h.send(0, 0);
        assert_eq!(h.event(), BridgeEvent::Deleted(0));
        assert!(!path.exists());
    }

    #[test]
    fn test_shutdown_discards_queue() {
        let output = MockOutput::new().with_render_time(Duration::from_secs(30));
        let mut h = Harness::new(output, Duration::ZERO);
        let playing = h.send(0, 0);
        let queued = h.send(1, 0);
        h.output.wait_started(Duration::from_secs(5)).unwrap();

        h.stop();
        assert!(!playing.exists());
        assert!(!queued.exists());
        assert!(h.events.try_recv().is_err());
    }
}
