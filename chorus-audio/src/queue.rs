//! Bounded FIFO frame queue shared between the producer and the drain thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::types::AudioFrame;

/// FIFO queue of frames awaiting playback.
///
/// Single-writer, single-reader by caller contract: one logical producer
/// pushes (and may clear), one drain thread pops. The bound keeps a
/// stalled consumer from growing memory without limit; on overflow the
/// oldest queued frame is evicted so the freshest audio survives.
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    available: Condvar,
    max_frames: usize,
}

impl FrameQueue {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            max_frames,
        }
    }

    /// Enqueue a frame. Never blocks; evicts the oldest frame when full.
    pub fn push(&self, frame: AudioFrame) {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.max_frames {
            frames.pop_front();
            warn!(
                max_frames = self.max_frames,
                "output queue full, evicting oldest frame"
            );
        }
        frames.push_back(frame);
        self.available.notify_one();
    }

    /// Pop the next frame, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        let frames = self.frames.lock().unwrap();
        let (mut frames, _) = self
            .available
            .wait_timeout_while(frames, timeout, |f| f.is_empty())
            .unwrap();
        frames.pop_front()
    }

    /// Drop every queued, not-yet-played frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock().unwrap();
        let dropped = frames.len();
        frames.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo() {
        let queue = FrameQueue::new(8);
        queue.push(AudioFrame::new(vec![1]));
        queue.push(AudioFrame::new(vec![2]));
        queue.push(AudioFrame::new(vec![3]));

        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Some(AudioFrame::new(vec![1]))
        );
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Some(AudioFrame::new(vec![2]))
        );
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Some(AudioFrame::new(vec![3]))
        );
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = FrameQueue::new(8);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(AudioFrame::new(vec![1]));
        queue.push(AudioFrame::new(vec![2]));
        queue.push(AudioFrame::new(vec![3]));

        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Some(AudioFrame::new(vec![2]))
        );
    }

    #[test]
    fn test_clear_reports_dropped() {
        let queue = FrameQueue::new(8);
        queue.push(AudioFrame::silence(10));
        queue.push(AudioFrame::silence(10));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
