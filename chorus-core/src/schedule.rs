//! The ordered run of agent slots, as loaded from a schedule file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

fn default_min_turns() -> u32 {
    2
}

fn default_max_turns() -> u32 {
    4
}

/// One character scheduled to hold part of the conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    /// Base character description fed into the system prompt.
    pub prompt: String,
    /// Opening line; generated when absent.
    #[serde(default)]
    pub first_message: Option<String>,
    /// Turns the agent must speak before any hand-off.
    #[serde(default = "default_min_turns")]
    pub min_turns: u32,
    /// Turns after which the hand-off is forced.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

/// The full installation run, in order.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSchedule {
    pub agents: Vec<AgentProfile>,
}

impl AgentSchedule {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid schedule file")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schedule {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedule_with_defaults() {
        let schedule = AgentSchedule::from_toml_str(
            r#"
            [[agents]]
            name = "Shakti"
            prompt = "You are the fierce guardian of the temple gate."
            first_message = "Who approaches?"
            min_turns = 2
            max_turns = 5

            [[agents]]
            name = "JeroWiku"
            prompt = "You are the old priest who speaks in riddles."
            "#,
        )
        .unwrap();

        assert_eq!(schedule.agents.len(), 2);
        assert_eq!(schedule.agents[0].name, "Shakti");
        assert_eq!(schedule.agents[0].max_turns, 5);
        assert_eq!(schedule.agents[1].first_message, None);
        assert_eq!(schedule.agents[1].min_turns, 2);
        assert_eq!(schedule.agents[1].max_turns, 4);
    }

    #[test]
    fn test_rejects_malformed_schedule() {
        assert!(AgentSchedule::from_toml_str("[[agents]]\nname = 3").is_err());
    }
}
