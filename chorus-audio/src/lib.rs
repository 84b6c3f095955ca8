//! Duplex audio transport for the installation.
//!
//! This crate provides:
//! - `DuplexAudio` - buffered playback with barge-in interruption and
//!   speaking-state detection inferred from queue occupancy
//! - `AudioDeviceManager` - owned access to capture/playback devices
//!   via `cpal` (feature: `backend-cpal`)
//! - `MemoryBackend` - in-memory backend for tests and dry runs

pub mod duplex;
pub mod error;
pub mod memory;
pub mod queue;
pub mod traits;
pub mod types;

#[cfg(feature = "backend-cpal")]
pub mod device;

#[cfg(not(feature = "backend-cpal"))]
pub mod dummy_backend;

pub use duplex::{DuplexAudio, DuplexAudioConfig};
pub use error::AudioError;
pub use memory::{CaptureInjector, MemoryBackend};
pub use traits::{AudioBackend, CaptureHandle, FrameCallback, PlaybackSink};
pub use types::{AudioFrame, SAMPLE_RATE_HZ};

#[cfg(feature = "backend-cpal")]
pub use device::AudioDeviceManager;

#[cfg(not(feature = "backend-cpal"))]
pub use dummy_backend::AudioDeviceManager;
