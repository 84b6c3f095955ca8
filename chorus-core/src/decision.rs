//! Advisory hand-off decision policy.
//!
//! An LLM judges, from the formatted history, whether the current
//! character should hand the conversation to the next one. The verdict
//! is advisory only: the tracker's hard turn ceiling ends a slot even
//! when every decision request fails.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::CoreError;

/// Instruction given to the decision model along with the history.
pub const DECISION_SYSTEM_PROMPT: &str = "\
You observe a spoken conversation between an AI character and a visitor \
of an art installation. Decide whether the character has reached a natural \
point to hand the conversation over to the next character: the visitor got \
a complete answer, the exchange is winding down, or the character has said \
its piece. Respond with JSON of the form {\"switch\": \"yes\"} or \
{\"switch\": \"no\"} and nothing else.";

/// Verdict of one decision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchVerdict {
    /// Hand off to the next character.
    Switch,
    /// Keep the current character talking.
    Stay,
}

/// Backend answering hand-off decision requests. May fail or time out;
/// failures never change the tracker's pending advice.
#[async_trait]
pub trait DecisionBackend: Send + Sync {
    async fn decide(&self, system_prompt: &str, history: &str) -> Result<SwitchVerdict>;
}

/// A decision backend paired with the instruction it is consulted with.
#[derive(Clone)]
pub struct DecisionPolicy {
    pub backend: std::sync::Arc<dyn DecisionBackend>,
    pub system_prompt: String,
}

impl DecisionPolicy {
    pub fn new(backend: std::sync::Arc<dyn DecisionBackend>) -> Self {
        Self {
            backend,
            system_prompt: DECISION_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct VerdictPayload {
    switch: String,
}

/// Parse the strict `{"switch": "yes"|"no"}` payload. Anything else is
/// an error so a malformed answer cannot masquerade as advice.
pub fn parse_verdict(payload: &str) -> Result<SwitchVerdict> {
    let parsed: VerdictPayload = serde_json::from_str(payload.trim())
        .map_err(|e| CoreError::DecisionBackend(format!("unparsable verdict payload: {e}")))?;
    match parsed.switch.to_lowercase().as_str() {
        "yes" => Ok(SwitchVerdict::Switch),
        "no" => Ok(SwitchVerdict::Stay),
        other => Err(CoreError::DecisionBackend(format!(
            "unexpected verdict value: {other:?}"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_and_no() {
        assert_eq!(
            parse_verdict(r#"{"switch": "yes"}"#).unwrap(),
            SwitchVerdict::Switch
        );
        assert_eq!(
            parse_verdict(r#"{"switch": "no"}"#).unwrap(),
            SwitchVerdict::Stay
        );
        assert_eq!(
            parse_verdict(" {\"switch\": \"YES\"} ").unwrap(),
            SwitchVerdict::Switch
        );
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(parse_verdict("yes").is_err());
        assert!(parse_verdict(r#"{"switch": "maybe"}"#).is_err());
        assert!(parse_verdict(r#"{"verdict": "yes"}"#).is_err());
    }
}
