//! Conversation session abstraction.
//!
//! The live speech backend is an external collaborator. It is driven
//! through [`ConversationSession`] and reports what was said as typed
//! [`SessionEvent`] messages on a channel, rather than through raw
//! callbacks: a single pump task consumes the channel and updates the
//! tracker, keeping the backend's I/O threads away from the tracker
//! lock.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chorus_audio::DuplexAudio;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::tracker::ConversationTracker;

/// What the session backend reports while a conversation runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The agent finished an utterance (its transcript).
    AgentUtterance(String),
    /// The backend revised an earlier agent utterance.
    AgentCorrection { original: String, corrected: String },
    /// The visitor's transcribed speech.
    UserTranscript(String),
    /// The backend closed the conversation on its own.
    Ended,
}

/// Everything a backend needs to open one conversation.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub agent_name: String,
    pub system_prompt: String,
    pub first_message: String,
}

/// One live conversation, bound to one audio interface for its lifetime.
#[async_trait]
pub trait ConversationSession: Send {
    async fn start(&mut self) -> Result<()>;
    async fn end(&mut self) -> Result<()>;
    /// Wait for the backend to finish tearing the session down.
    async fn wait_for_end(&mut self) -> Result<()>;
}

/// Factory for conversation sessions against the external backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn open(
        &self,
        config: SessionConfig,
        audio: Arc<DuplexAudio>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn ConversationSession>>;
}

/// Single consumer loop applying session events to the tracker.
///
/// Ends when the channel closes (every sender dropped) or on an
/// explicit [`SessionEvent::Ended`].
pub fn spawn_event_pump(
    tracker: Arc<ConversationTracker>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::AgentUtterance(text) => tracker.record_agent_utterance(&text),
                SessionEvent::AgentCorrection {
                    original,
                    corrected,
                } => {
                    // Corrections are informational; the originally
                    // recorded turn stands.
                    info!("agent correction: {original:?} -> {corrected:?}");
                }
                SessionEvent::UserTranscript(text) => tracker.record_user_utterance(&text),
                SessionEvent::Ended => break,
            }
        }
        debug!("session event pump exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;

    #[tokio::test]
    async fn test_pump_records_both_speakers() {
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("Oracle", 1, 4);

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = spawn_event_pump(Arc::clone(&tracker), rx);

        tx.send(SessionEvent::AgentUtterance("hello".into())).unwrap();
        tx.send(SessionEvent::UserTranscript("hi".into())).unwrap();
        tx.send(SessionEvent::AgentCorrection {
            original: "hello".into(),
            corrected: "hullo".into(),
        })
        .unwrap();
        drop(tx);
        pump.await.unwrap();

        assert_eq!(tracker.turn_count(), 1);
        assert_eq!(
            tracker.formatted_history(),
            "Oracle (1/4): hello\nUser: hi"
        );
    }

    #[tokio::test]
    async fn test_pump_stops_on_ended() {
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("Oracle", 1, 4);

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = spawn_event_pump(Arc::clone(&tracker), rx);

        tx.send(SessionEvent::Ended).unwrap();
        tx.send(SessionEvent::AgentUtterance("too late".into()))
            .unwrap();
        pump.await.unwrap();

        assert_eq!(tracker.turn_count(), 0);
    }
}
