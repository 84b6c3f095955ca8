//! Scripted session backend for tests and dry runs.
//!
//! Replays a fixed exchange through the same audio binding and event
//! channel a live backend would use, so the whole hand-off machinery
//! can be exercised without network or microphone.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chorus_audio::{AudioFrame, DuplexAudio};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::CoreError;
use crate::session::{ConversationSession, SessionBackend, SessionConfig, SessionEvent};

/// Synthetic audio per character of agent speech, in samples (20ms).
const SAMPLES_PER_CHAR: usize = 320;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// The agent speaks: emits synthetic audio, then the utterance event.
    Agent(String),
    /// The visitor speaks: barges in on any pending agent audio, then
    /// emits the transcript event.
    User(String),
}

/// Outcome scripted for one opened session, in schedule order.
#[derive(Debug, Clone)]
pub enum SlotScript {
    Play(Vec<ScriptStep>),
    /// Simulate a backend that cannot open the session at all.
    FailOpen,
}

pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<SlotScript>>,
    step_delay: Duration,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<SlotScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            step_delay: Duration::from_millis(10),
        }
    }

    /// Backend with no prepared scripts: every session improvises a
    /// short default exchange from its opening line.
    pub fn rehearsal() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn default_script(config: &SessionConfig) -> Vec<ScriptStep> {
        let opening = if config.first_message.is_empty() {
            format!("{} joins the conversation.", config.agent_name)
        } else {
            config.first_message.clone()
        };
        vec![
            ScriptStep::Agent(opening),
            ScriptStep::User("Tell me more.".to_string()),
            ScriptStep::Agent("There is always more to tell.".to_string()),
            ScriptStep::User("I see.".to_string()),
            ScriptStep::Agent("And with that, I leave you to the next voice.".to_string()),
        ]
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    async fn open(
        &self,
        config: SessionConfig,
        audio: Arc<DuplexAudio>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn ConversationSession>> {
        let script = self.scripts.lock().unwrap().pop_front();
        let steps = match script {
            Some(SlotScript::FailOpen) => {
                return Err(CoreError::Session(format!(
                    "scripted failure opening session for {}",
                    config.agent_name
                ))
                .into());
            }
            Some(SlotScript::Play(steps)) => steps,
            None => Self::default_script(&config),
        };

        Ok(Box::new(ScriptedSession {
            steps: Some(steps),
            step_delay: self.step_delay,
            audio,
            events: Some(events),
            task: None,
        }))
    }
}

struct ScriptedSession {
    steps: Option<Vec<ScriptStep>>,
    step_delay: Duration,
    audio: Arc<DuplexAudio>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ConversationSession for ScriptedSession {
    async fn start(&mut self) -> Result<()> {
        // A live backend would stream captured frames to its transport;
        // the script has no use for them.
        self.audio.start(|_frame| {})?;

        let steps = self.steps.take().unwrap_or_default();
        let events = self.events.take().expect("session started twice");
        let audio = Arc::clone(&self.audio);
        let delay = self.step_delay;

        self.task = Some(tokio::spawn(async move {
            for step in steps {
                tokio::time::sleep(delay).await;
                let sent = match step {
                    ScriptStep::Agent(line) => {
                        let samples = line.len().max(1) * SAMPLES_PER_CHAR;
                        audio.output(AudioFrame::silence(samples));
                        events.send(SessionEvent::AgentUtterance(line))
                    }
                    ScriptStep::User(line) => {
                        audio.interrupt();
                        events.send(SessionEvent::UserTranscript(line))
                    }
                };
                if sent.is_err() {
                    debug!("event channel closed, abandoning script");
                    return;
                }
            }
            let _ = events.send(SessionEvent::Ended);
        }));
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.audio.stop();
        Ok(())
    }

    async fn wait_for_end(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            let _ = task.await;
            self.audio.stop();
        }
        Ok(())
    }
}
