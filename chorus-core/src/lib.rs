//! Conversation core for the installation: tracks the shared dialogue
//! across agent slots, decides when a character hands off to the next,
//! and orchestrates the scheduled run end to end.

pub mod decision;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod schedule;
pub mod scripted;
pub mod session;
pub mod tracker;

pub use decision::{DecisionBackend, DecisionPolicy, SwitchVerdict};
pub use error::CoreError;
pub use llm::{ChatClient, OpenAiDecisionBackend};
pub use orchestrator::{AudioFactory, Orchestrator, OrchestratorConfig};
pub use prompt::PromptBuilder;
pub use schedule::{AgentProfile, AgentSchedule};
pub use scripted::{ScriptStep, ScriptedBackend, SlotScript};
pub use session::{
    ConversationSession, SessionBackend, SessionConfig, SessionEvent, spawn_event_pump,
};
pub use tracker::{ConversationTracker, ConversationTurn, EMPTY_HISTORY, Speaker, TrackerConfig};
