//! Duplex audio interface with interruption-aware output buffering.
//!
//! Playback is queued so a barge-in can cut off stale audio; capture is
//! muted while the agent is speaking so the installation does not
//! transcribe its own voice. "Agent is speaking" is inferred purely from
//! queue occupancy plus elapsed time since the last write, never from
//! the audio content itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::queue::FrameQueue;
use crate::traits::{AudioBackend, CaptureHandle, PlaybackSink};
use crate::types::AudioFrame;

/// Tunables for the duplex interface. The grace period and drain poll
/// are empirical values, kept configurable rather than baked in.
#[derive(Debug, Clone)]
pub struct DuplexAudioConfig {
    /// How long the output queue must stay empty before the speaking
    /// flag is cleared without an explicit interrupt.
    pub grace_period: Duration,
    /// Bounded wait of the drain thread's queue pop. Also bounds how
    /// long `stop` takes to be noticed.
    pub drain_poll: Duration,
    /// Upper bound on queued frames; oldest frames are evicted beyond it.
    pub max_queued_frames: usize,
}

impl Default for DuplexAudioConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(750),
            drain_poll: Duration::from_millis(250),
            max_queued_frames: 512,
        }
    }
}

struct SpeakingState {
    speaking: bool,
    last_write: Instant,
}

struct DrainWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Paths {
    capture: Option<Box<dyn CaptureHandle>>,
    drain: Option<DrainWorker>,
}

/// Duplex audio transport bound to one backend.
///
/// One instance serves exactly one agent session at a time; the queue
/// and speaking flag are private to it and are not reused across
/// sessions. `output` and `interrupt` assume a single logical producer
/// (the session's message-handling context); concurrent producers are
/// unsupported.
pub struct DuplexAudio {
    queue: Arc<FrameQueue>,
    speaking: Arc<Mutex<SpeakingState>>,
    config: DuplexAudioConfig,
    backend: Mutex<Box<dyn AudioBackend>>,
    paths: Mutex<Paths>,
}

impl DuplexAudio {
    pub fn new(backend: Box<dyn AudioBackend>, config: DuplexAudioConfig) -> Self {
        Self {
            queue: Arc::new(FrameQueue::new(config.max_queued_frames)),
            speaking: Arc::new(Mutex::new(SpeakingState {
                speaking: false,
                last_write: Instant::now(),
            })),
            config,
            backend: Mutex::new(backend),
            paths: Mutex::new(Paths {
                capture: None,
                drain: None,
            }),
        }
    }

    /// Open the capture and playback paths and spawn the output drain
    /// thread. Fails if either device path cannot be opened; the
    /// instance must not be used after a failed start.
    ///
    /// `capture_callback` runs on the capture driver's thread and only
    /// receives frames while the agent is not speaking. The flag check
    /// is best-effort: a frame captured in the window between the flag
    /// flipping and the check may still slip through. The check must
    /// stay non-blocking, so that bounded overlap is tolerated rather
    /// than locked away.
    pub fn start(&self, capture_callback: impl Fn(AudioFrame) + Send + Sync + 'static) -> Result<()> {
        let mut backend = self.backend.lock().unwrap();

        let sink = backend
            .open_playback()
            .context("failed to open playback path")?;

        let speaking = Arc::clone(&self.speaking);
        let capture = backend
            .open_capture(Box::new(move |frame| {
                let muted = speaking.lock().unwrap().speaking;
                if !muted {
                    capture_callback(frame);
                }
            }))
            .context("failed to open capture path")?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = self.spawn_drain(sink, Arc::clone(&stop));

        let mut paths = self.paths.lock().unwrap();
        paths.capture = Some(capture);
        paths.drain = Some(DrainWorker { stop, handle });
        Ok(())
    }

    fn spawn_drain(&self, mut sink: Box<dyn PlaybackSink>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let speaking = Arc::clone(&self.speaking);
        let grace = self.config.grace_period;
        let poll = self.config.drain_poll;

        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match queue.pop_timeout(poll) {
                    Some(frame) => match sink.write(&frame) {
                        Ok(()) => {
                            speaking.lock().unwrap().last_write = Instant::now();
                        }
                        Err(e) => error!("playback write failed: {e:#}"),
                    },
                    None => {
                        // Queue starved: the agent has likely finished
                        // its utterance even though no explicit
                        // end-of-speech signal exists.
                        let mut state = speaking.lock().unwrap();
                        if state.speaking && state.last_write.elapsed() > grace {
                            debug!("output starved past grace period, agent done speaking");
                            state.speaking = false;
                        }
                    }
                }
            }
            debug!("output drain thread exiting");
        })
    }

    /// Signal the drain thread, join it, and release both device paths.
    pub fn stop(&self) {
        let worker = self.paths.lock().unwrap().drain.take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                warn!("output drain thread panicked");
            }
        }
        self.paths.lock().unwrap().capture.take();
    }

    /// Enqueue a frame for playback, marking the agent as speaking.
    /// Never blocks and never fails; overflow evicts the oldest frame.
    pub fn output(&self, frame: AudioFrame) {
        {
            let mut state = self.speaking.lock().unwrap();
            if !state.speaking {
                debug!("agent started speaking");
                state.speaking = true;
                // Reset the write clock so a racing starvation check
                // cannot clear the flag before the first frame plays.
                state.last_write = Instant::now();
            }
        }
        self.queue.push(frame);
    }

    /// Drop every queued, not-yet-played frame and clear the speaking
    /// flag. This is the barge-in path: a new utterance must cut off a
    /// stale one.
    pub fn interrupt(&self) {
        let dropped = self.queue.clear();
        let mut state = self.speaking.lock().unwrap();
        if state.speaking {
            debug!(dropped, "interrupted, agent done speaking");
        }
        state.speaking = false;
    }

    /// True while unplayed or recently-played audio exists.
    pub fn is_agent_speaking(&self) -> bool {
        self.speaking.lock().unwrap().speaking
    }

    /// Number of frames currently awaiting playback.
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for DuplexAudio {
    fn drop(&mut self) {
        // Idempotent; a no-op when `stop` already ran.
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn fast_config() -> DuplexAudioConfig {
        DuplexAudioConfig {
            grace_period: Duration::from_millis(50),
            drain_poll: Duration::from_millis(10),
            max_queued_frames: 64,
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_playback_preserves_fifo_order() {
        let backend = MemoryBackend::new();
        let written = backend.written();
        let audio = DuplexAudio::new(Box::new(backend), fast_config());
        audio.start(|_| {}).unwrap();

        audio.output(AudioFrame::new(vec![1]));
        audio.output(AudioFrame::new(vec![2]));
        audio.output(AudioFrame::new(vec![3]));

        assert!(wait_for(
            || written.lock().unwrap().len() == 3,
            Duration::from_secs(1)
        ));
        let frames = written.lock().unwrap();
        assert_eq!(frames[0].samples(), &[1]);
        assert_eq!(frames[1].samples(), &[2]);
        assert_eq!(frames[2].samples(), &[3]);
        drop(frames);
        audio.stop();
    }

    #[test]
    fn test_interrupt_cuts_off_queued_audio() {
        let backend = MemoryBackend::with_write_delay(Duration::from_millis(50));
        let written = backend.written();
        let audio = DuplexAudio::new(Box::new(backend), fast_config());
        audio.start(|_| {}).unwrap();

        for i in 0..5 {
            audio.output(AudioFrame::new(vec![i]));
        }
        assert!(audio.is_agent_speaking());
        std::thread::sleep(Duration::from_millis(60));
        audio.interrupt();
        assert!(!audio.is_agent_speaking());

        // Let any write already in flight finish, then confirm nothing
        // further reaches the sink.
        std::thread::sleep(Duration::from_millis(120));
        let settled = written.lock().unwrap().len();
        assert!(settled < 5, "interrupt failed to drop queued frames");
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(written.lock().unwrap().len(), settled);
        audio.stop();
    }

    #[test]
    fn test_starvation_clears_speaking_flag() {
        let backend = MemoryBackend::new();
        let written = backend.written();
        let audio = DuplexAudio::new(Box::new(backend), fast_config());
        audio.start(|_| {}).unwrap();

        audio.output(AudioFrame::silence(160));
        assert!(audio.is_agent_speaking());
        assert!(wait_for(
            || written.lock().unwrap().len() == 1,
            Duration::from_secs(1)
        ));

        // No interrupt: the flag clears on its own once the queue has
        // been starved past the grace period.
        assert!(wait_for(
            || !audio.is_agent_speaking(),
            Duration::from_millis(500)
        ));
        audio.stop();
    }

    #[test]
    fn test_capture_muted_while_agent_speaking() {
        let backend = MemoryBackend::with_write_delay(Duration::from_millis(100));
        let injector = backend.capture_injector();
        let audio = DuplexAudio::new(Box::new(backend), fast_config());

        let heard = Arc::new(Mutex::new(Vec::new()));
        let heard_cb = Arc::clone(&heard);
        audio
            .start(move |frame| heard_cb.lock().unwrap().push(frame))
            .unwrap();

        injector.inject(AudioFrame::new(vec![10]));
        assert_eq!(heard.lock().unwrap().len(), 1);

        audio.output(AudioFrame::silence(1600));
        injector.inject(AudioFrame::new(vec![11]));
        assert_eq!(heard.lock().unwrap().len(), 1, "captured own voice");

        audio.interrupt();
        injector.inject(AudioFrame::new(vec![12]));
        assert_eq!(heard.lock().unwrap().len(), 2);
        audio.stop();
    }

    #[test]
    fn test_start_fails_when_playback_unavailable() {
        let backend = MemoryBackend::new().fail_playback();
        let audio = DuplexAudio::new(Box::new(backend), fast_config());
        assert!(audio.start(|_| {}).is_err());
    }
}
