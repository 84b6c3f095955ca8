//! In-memory backend for tests and dry runs.
//!
//! Playback records written frames instead of touching a device;
//! capture frames are injected by hand through [`CaptureInjector`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};

use crate::traits::{AudioBackend, CaptureHandle, FrameCallback, PlaybackSink};
use crate::types::AudioFrame;

type CaptureSlot = Arc<Mutex<Option<FrameCallback>>>;

pub struct MemoryBackend {
    written: Arc<Mutex<Vec<AudioFrame>>>,
    capture_slot: CaptureSlot,
    write_delay: Duration,
    fail_playback: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_write_delay(Duration::ZERO)
    }

    /// A backend whose sink takes `delay` per frame, useful for keeping
    /// the output queue non-empty in tests.
    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            capture_slot: Arc::new(Mutex::new(None)),
            write_delay: delay,
            fail_playback: false,
        }
    }

    /// Make `open_playback` fail, simulating a missing output device.
    pub fn fail_playback(mut self) -> Self {
        self.fail_playback = true;
        self
    }

    /// Shared view of every frame the sink has played.
    pub fn written(&self) -> Arc<Mutex<Vec<AudioFrame>>> {
        Arc::clone(&self.written)
    }

    /// Handle for pushing synthetic capture frames from a test.
    pub fn capture_injector(&self) -> CaptureInjector {
        CaptureInjector {
            slot: Arc::clone(&self.capture_slot),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MemoryBackend {
    fn open_playback(&mut self) -> Result<Box<dyn PlaybackSink>> {
        if self.fail_playback {
            bail!("memory backend configured without a playback device");
        }
        Ok(Box::new(MemorySink {
            written: Arc::clone(&self.written),
            delay: self.write_delay,
        }))
    }

    fn open_capture(&mut self, on_frame: FrameCallback) -> Result<Box<dyn CaptureHandle>> {
        *self.capture_slot.lock().unwrap() = Some(on_frame);
        Ok(Box::new(MemoryCaptureGuard {
            slot: Arc::clone(&self.capture_slot),
        }))
    }
}

/// Drives the capture callback as if frames arrived from a device.
#[derive(Clone)]
pub struct CaptureInjector {
    slot: CaptureSlot,
}

impl CaptureInjector {
    pub fn inject(&self, frame: AudioFrame) {
        if let Some(cb) = self.slot.lock().unwrap().as_ref() {
            cb(frame);
        }
    }
}

struct MemorySink {
    written: Arc<Mutex<Vec<AudioFrame>>>,
    delay: Duration,
}

impl PlaybackSink for MemorySink {
    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.written.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

struct MemoryCaptureGuard {
    slot: CaptureSlot,
}

impl CaptureHandle for MemoryCaptureGuard {}

impl Drop for MemoryCaptureGuard {
    fn drop(&mut self) {
        *self.slot.lock().unwrap() = None;
    }
}
