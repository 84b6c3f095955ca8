/// Sample rate every frame in the pipeline is expressed at.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// One chunk of 16kHz mono i16 PCM audio.
///
/// Frames carry no identity beyond their position in the output queue;
/// FIFO order is the only ordering the transport guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A frame of silence with the given number of samples.
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f32 {
        (self.samples.len() as f32 / SAMPLE_RATE_HZ as f32) * 1000.0
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(1600);
        assert_eq!(frame.len(), 1600);
        assert!((frame.duration_ms() - 100.0).abs() < f32::EPSILON);
    }
}
