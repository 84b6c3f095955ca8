//! Assembles the session configuration for a slot: system prompt with
//! turn limit and carried-over history, plus the opening line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tracing::{debug, warn};

use crate::llm::ChatClient;
use crate::schedule::AgentProfile;
use crate::session::SessionConfig;
use crate::tracker::EMPTY_HISTORY;

const OPENER_SYSTEM_PROMPT: &str = "\
You come up with creative opening lines for an interactive AI character \
that starts a conversation with a visitor.";

const FALLBACK_FIRST_MESSAGE: &str = "Greetings, pilgrim. Who am I speaking with?";

pub struct PromptBuilder {
    context_dir: Option<PathBuf>,
    opener: Option<Arc<ChatClient>>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            context_dir: None,
            opener: None,
        }
    }

    /// Directory of per-day context files (`YYYY-MM-DD.txt`, with
    /// `default.txt` as fallback) folded into every system prompt.
    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    /// Generate opening lines for profiles that ship none.
    pub fn with_opener(mut self, client: Arc<ChatClient>) -> Self {
        self.opener = Some(client);
        self
    }

    pub async fn build(
        &self,
        profile: &AgentProfile,
        history: Option<&str>,
    ) -> Result<SessionConfig> {
        let system_prompt = format!(
            "######### Agent Description #################\n\n\
             {}\n\n\
             ######### Day Context #################\n\n\
             {}\n\n\
             ######### Turn Indicator #################\n\n\
             {}\n\n\
             ######### Conversation History #################\n\n\
             {}",
            profile.prompt,
            self.day_context().unwrap_or_default(),
            turn_indicator(profile.max_turns),
            history_context(history, profile.max_turns),
        );

        let first_message = match &profile.first_message {
            Some(message) => message.clone(),
            None => self.generate_first_message(profile, history).await,
        };

        Ok(SessionConfig {
            agent_name: profile.name.clone(),
            system_prompt,
            first_message,
        })
    }

    fn day_context(&self) -> Option<String> {
        let dir = self.context_dir.as_ref()?;
        let today = dir.join(format!("{}.txt", Local::now().format("%Y-%m-%d")));
        let content = std::fs::read_to_string(&today)
            .or_else(|_| std::fs::read_to_string(dir.join("default.txt")))
            .ok()?;
        Some(format!("Context for today:\n{content}"))
    }

    async fn generate_first_message(
        &self,
        profile: &AgentProfile,
        history: Option<&str>,
    ) -> String {
        let Some(client) = &self.opener else {
            return FALLBACK_FIRST_MESSAGE.to_string();
        };

        let user_prompt = format!(
            "--- Agent description: ---\n{}\n--- End of agent description ---\n\
             --- Conversation history: ---\n{}\n--- End of conversation history ---\n\
             Based on the above agent description, generate a first message \
             for the agent that is at most 20 words.",
            profile.prompt,
            history.unwrap_or(EMPTY_HISTORY),
        );

        match client.complete(OPENER_SYSTEM_PROMPT, &user_prompt, false).await {
            Ok(message) if !message.trim().is_empty() => {
                debug!(agent = %profile.name, "generated first message: {message:?}");
                message.trim().to_string()
            }
            Ok(_) => FALLBACK_FIRST_MESSAGE.to_string(),
            Err(e) => {
                warn!("first message generation failed, using fallback: {e:#}");
                FALLBACK_FIRST_MESSAGE.to_string()
            }
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The character is told one turn fewer than the hard ceiling so its
/// final allowed turn lands as a closing statement, not a question.
fn turn_indicator(max_turns: u32) -> String {
    let cue_turns = max_turns.saturating_sub(1);
    format!(
        "IMPORTANT: You will get a total of {cue_turns} turns to speak after \
         which this conversation will be closed. Make sure to end your final \
         turn with a closed, finalizing statement / answer (not a question)!"
    )
}

fn history_context(history: Option<&str>, max_turns: u32) -> String {
    match history {
        None => EMPTY_HISTORY.to_string(),
        Some(history) => {
            let cue_turns = max_turns.saturating_sub(1);
            format!(
                "Conversation history with previous agent(s):\n{history}\n\n\
                 Continue the conversation based on this history and remember \
                 you only get {cue_turns} turns to speak!"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AgentProfile {
        AgentProfile {
            name: "Shakti".to_string(),
            prompt: "You are the fierce guardian.".to_string(),
            first_message: Some("Who approaches?".to_string()),
            min_turns: 2,
            max_turns: 4,
        }
    }

    #[tokio::test]
    async fn test_build_without_history() {
        let config = PromptBuilder::new().build(&profile(), None).await.unwrap();
        assert_eq!(config.agent_name, "Shakti");
        assert_eq!(config.first_message, "Who approaches?");
        assert!(config.system_prompt.contains("You are the fierce guardian."));
        assert!(config.system_prompt.contains("a total of 3 turns"));
        assert!(config.system_prompt.contains(EMPTY_HISTORY));
    }

    #[tokio::test]
    async fn test_build_with_history() {
        let config = PromptBuilder::new()
            .build(&profile(), Some("Oracle (1/2): welcome\nUser: hello"))
            .await
            .unwrap();
        assert!(
            config
                .system_prompt
                .contains("Conversation history with previous agent(s):\nOracle (1/2): welcome")
        );
        assert!(config.system_prompt.contains("only get 3 turns"));
    }

    #[tokio::test]
    async fn test_missing_first_message_falls_back_without_opener() {
        let mut profile = profile();
        profile.first_message = None;
        let config = PromptBuilder::new().build(&profile, None).await.unwrap();
        assert_eq!(config.first_message, FALLBACK_FIRST_MESSAGE);
    }
}
