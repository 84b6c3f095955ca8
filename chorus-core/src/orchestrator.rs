//! Sequences the scheduled agent sessions.
//!
//! Each slot gets a fresh audio binding and a session against the
//! external backend; the shared tracker carries the conversation across
//! the hand-offs. A slot that fails anywhere between preparation and
//! teardown is logged and skipped, never aborting the run: from the
//! visitor's side the installation simply moves on to the next
//! character.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chorus_audio::DuplexAudio;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::prompt::PromptBuilder;
use crate::schedule::{AgentProfile, AgentSchedule};
use crate::session::{SessionBackend, spawn_event_pump};
use crate::tracker::ConversationTracker;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cadence of the `should_switch` poll loop.
    pub poll_interval: Duration,
    /// Longest the orchestrator waits for the agent's final audio to
    /// drain before tearing the session down anyway.
    pub speech_settle_timeout: Duration,
    /// Grace given to the backend's own teardown after `end`.
    pub teardown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            speech_settle_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

/// Builds one fresh audio interface per slot; the output buffer and
/// speaking flag are never shared across slots.
pub type AudioFactory = Box<dyn Fn() -> Result<DuplexAudio> + Send + Sync>;

pub struct Orchestrator {
    tracker: Arc<ConversationTracker>,
    backend: Arc<dyn SessionBackend>,
    prompts: PromptBuilder,
    audio_factory: AudioFactory,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        tracker: Arc<ConversationTracker>,
        backend: Arc<dyn SessionBackend>,
        prompts: PromptBuilder,
        audio_factory: AudioFactory,
    ) -> Self {
        Self {
            tracker,
            backend,
            prompts,
            audio_factory,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run every scheduled slot in order. History accumulated before a
    /// failed slot is retained and handed to the next one.
    pub async fn run(&self, schedule: &AgentSchedule) {
        for profile in &schedule.agents {
            info!(agent = %profile.name, "starting slot");
            if let Err(e) = self.run_slot(profile).await {
                error!(agent = %profile.name, "slot failed, moving to next agent: {e:#}");
            }
        }
        info!("schedule complete");
    }

    async fn run_slot(&self, profile: &AgentProfile) -> Result<()> {
        self.tracker
            .set_current_agent(&profile.name, profile.min_turns, profile.max_turns);

        let history = self
            .tracker
            .has_history()
            .then(|| self.tracker.formatted_history());
        let session_config = self.prompts.build(profile, history.as_deref()).await?;

        let audio = Arc::new((self.audio_factory)()?);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut pump = spawn_event_pump(Arc::clone(&self.tracker), event_rx);

        let result = self
            .drive_session(profile, session_config, Arc::clone(&audio), event_tx, &pump)
            .await;

        // The pump ends once every event sender is gone; don't let a
        // backend that leaks its sender wedge the run.
        if timeout(self.config.teardown_timeout, &mut pump).await.is_err() {
            warn!(agent = %profile.name, "event pump did not drain in time, aborting it");
            pump.abort();
        }
        result
    }

    async fn drive_session(
        &self,
        profile: &AgentProfile,
        session_config: crate::session::SessionConfig,
        audio: Arc<DuplexAudio>,
        event_tx: mpsc::UnboundedSender<crate::session::SessionEvent>,
        pump: &tokio::task::JoinHandle<()>,
    ) -> Result<()> {
        let mut session = self
            .backend
            .open(session_config, Arc::clone(&audio), event_tx)
            .await?;
        session.start().await?;

        loop {
            sleep(self.config.poll_interval).await;
            if self.tracker.should_switch() {
                info!(agent = %profile.name, "hand-off criteria met, ending slot");
                break;
            }
            // The pump only finishes once the backend reported the
            // conversation over (or dropped its event sender); either
            // way this slot has nothing left to wait for.
            if pump.is_finished() {
                info!(agent = %profile.name, "session ended on its own");
                break;
            }
        }

        // Let the agent's final sentence finish playing instead of
        // cutting it off mid-word.
        let deadline = Instant::now() + self.config.speech_settle_timeout;
        while audio.is_agent_speaking() && Instant::now() < deadline {
            sleep(self.config.poll_interval).await;
        }
        if audio.is_agent_speaking() {
            warn!(agent = %profile.name, "agent still speaking at settle timeout");
        }

        session.end().await?;
        if timeout(self.config.teardown_timeout, session.wait_for_end())
            .await
            .is_err()
        {
            warn!(agent = %profile.name, "session teardown timed out");
        }
        Ok(())
    }
}
