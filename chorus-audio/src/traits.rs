use anyhow::Result;

use crate::types::AudioFrame;

/// Callback invoked on the capture driver's thread for every captured frame.
pub type FrameCallback = Box<dyn Fn(AudioFrame) + Send + Sync>;

/// Sink end of the playback path. Owned by the drain thread; `write`
/// may block until the device has room, which is what paces playback.
pub trait PlaybackSink: Send {
    fn write(&mut self, frame: &AudioFrame) -> Result<()>;
}

/// Handle keeping a capture stream alive. Dropping it stops capture.
pub trait CaptureHandle: Send {}

/// A pair of capture/playback paths bound to concrete devices.
///
/// Implementations own whatever device state they need (host handles,
/// stream threads, channel pools) as plain values with deterministic
/// teardown on drop; there is no process-wide registry.
pub trait AudioBackend: Send {
    /// Open the playback path. Fails if the output device cannot be opened.
    fn open_playback(&mut self) -> Result<Box<dyn PlaybackSink>>;

    /// Open the capture path, invoking `on_frame` for every captured
    /// frame on the driver's own thread. Fails if the input device
    /// cannot be opened.
    fn open_capture(&mut self, on_frame: FrameCallback) -> Result<Box<dyn CaptureHandle>>;
}
