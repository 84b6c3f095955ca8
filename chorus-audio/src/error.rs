use thiserror::Error;

/// Errors raised while opening or running the audio paths.
///
/// A device error is fatal to the `DuplexAudio` instance that hit it;
/// callers must not keep using the instance after a failed `start`.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio input device available")]
    NoInputDevice,

    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("audio device error: {0}")]
    Device(String),
}
