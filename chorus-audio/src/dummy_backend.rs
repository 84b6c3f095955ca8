use anyhow::{Result, anyhow};

use crate::traits::{AudioBackend, CaptureHandle, FrameCallback, PlaybackSink};

/// Placeholder device manager for builds without the `backend-cpal`
/// feature. Every operation fails with a clear message.
pub struct AudioDeviceManager;

impl AudioDeviceManager {
    pub fn open() -> Result<Self> {
        Err(anyhow!(
            "audio devices are not available in this build (missing 'backend-cpal' feature)"
        ))
    }
}

impl AudioBackend for AudioDeviceManager {
    fn open_playback(&mut self) -> Result<Box<dyn PlaybackSink>> {
        Err(anyhow!("audio playback is not available"))
    }

    fn open_capture(&mut self, _on_frame: FrameCallback) -> Result<Box<dyn CaptureHandle>> {
        Err(anyhow!("audio capture is not available"))
    }
}
