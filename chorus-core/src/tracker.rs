//! Bounded conversation history and the hand-off decision state.
//!
//! One tracker is shared across every agent slot of a run: the history
//! it holds is the mechanism of conversational continuity. Per-slot
//! counters reset on `set_current_agent`; the history never does.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::decision::{DecisionPolicy, SwitchVerdict};

/// Rendered history when nothing has been said yet.
pub const EMPTY_HISTORY: &str = "New conversation starting now.";

const DEFAULT_HISTORY_CAP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Agent,
    User,
}

/// One recorded utterance. Immutable once appended.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    /// Display label: the character's name with its turn annotation for
    /// agent turns, "User" for visitor turns.
    pub label: String,
    pub text: String,
    pub ordinal: u64,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Most-recent-turns window kept in history; older turns are
    /// evicted for good once it is exceeded.
    pub history_cap: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

struct TrackerState {
    history: VecDeque<ConversationTurn>,
    next_ordinal: u64,
    agent: Option<String>,
    min_turns: u32,
    max_turns: u32,
    turn_count: u32,
    last_speaker: Option<Speaker>,
    pending_decision: Option<SwitchVerdict>,
    /// Token of the newest issued decision request. An arriving answer
    /// applies only if it carries this token; anything older is dropped.
    /// Monotonic for the tracker's lifetime, and bumped on every slot
    /// change so an answer outliving its slot can never match again.
    decision_seq: u64,
}

pub struct ConversationTracker {
    state: Mutex<TrackerState>,
    config: TrackerConfig,
    policy: Option<DecisionPolicy>,
}

impl ConversationTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                history: VecDeque::new(),
                next_ordinal: 0,
                agent: None,
                min_turns: 0,
                max_turns: 0,
                turn_count: 0,
                last_speaker: None,
                pending_decision: None,
                decision_seq: 0,
            }),
            config,
            policy: None,
        }
    }

    /// Tracker that consults an advisory decision policy once the turn
    /// floor is reached. Without one, only the hard ceiling ends slots.
    pub fn with_decision(config: TrackerConfig, policy: DecisionPolicy) -> Self {
        let mut tracker = Self::new(config);
        tracker.policy = Some(policy);
        tracker
    }

    /// Begin a new agent slot: reset per-slot counters and drop any
    /// pending advice. History is deliberately left intact.
    pub fn set_current_agent(&self, name: &str, min_turns: u32, max_turns: u32) {
        let mut state = self.state.lock().unwrap();
        state.agent = Some(name.to_string());
        state.min_turns = min_turns;
        state.max_turns = max_turns;
        state.turn_count = 0;
        state.last_speaker = None;
        state.pending_decision = None;
        // Advance, never reset: an answer still in flight from the
        // previous slot carries an older token and must stay stale.
        state.decision_seq += 1;
        info!(agent = name, min_turns, max_turns, "current agent set");
    }

    /// Append an agent turn. Once the slot has reached its floor this
    /// also issues an asynchronous decision request; the caller is never
    /// blocked on it.
    pub fn record_agent_utterance(self: &Arc<Self>, text: &str) {
        let request = {
            let mut state = self.state.lock().unwrap();
            state.turn_count += 1;
            let name = state.agent.clone().unwrap_or_else(|| "Agent".to_string());
            let label = format!("{} ({}/{})", name, state.turn_count, state.max_turns);
            info!("{label}: {text}");
            Self::append(&mut state, self.config.history_cap, Speaker::Agent, label, text);

            match &self.policy {
                Some(policy) if state.turn_count >= state.min_turns => {
                    state.decision_seq += 1;
                    Some((policy.clone(), state.decision_seq, Self::render(&state)))
                }
                _ => None,
            }
        };

        if let Some((policy, token, history)) = request {
            self.spawn_decision_request(policy, token, history);
        }
    }

    /// Append a user turn. Never triggers a decision request: the
    /// visitor speaking is not a hand-off point.
    pub fn record_user_utterance(&self, text: &str) {
        let mut state = self.state.lock().unwrap();
        info!("User: {text}");
        Self::append(
            &mut state,
            self.config.history_cap,
            Speaker::User,
            "User".to_string(),
            text,
        );
    }

    fn append(
        state: &mut TrackerState,
        cap: usize,
        speaker: Speaker,
        label: String,
        text: &str,
    ) {
        let ordinal = state.next_ordinal;
        state.next_ordinal += 1;
        state.history.push_back(ConversationTurn {
            speaker,
            label,
            text: text.to_string(),
            ordinal,
        });
        while state.history.len() > cap {
            state.history.pop_front();
        }
        state.last_speaker = Some(speaker);
    }

    fn spawn_decision_request(self: &Arc<Self>, policy: DecisionPolicy, token: u64, history: String) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            match policy.backend.decide(&policy.system_prompt, &history).await {
                Ok(verdict) => tracker.apply_verdict(token, verdict),
                // Failure leaves the pending advice untouched; the hard
                // ceiling still ends the slot eventually.
                Err(e) => warn!("decision request {token} failed: {e:#}"),
            }
        });
    }

    pub(crate) fn apply_verdict(&self, token: u64, verdict: SwitchVerdict) {
        let mut state = self.state.lock().unwrap();
        if token == state.decision_seq {
            debug!(token, ?verdict, "decision applied");
            state.pending_decision = Some(verdict);
        } else {
            debug!(
                token,
                newest = state.decision_seq,
                "dropping stale decision answer"
            );
        }
    }

    /// Should the current slot end? Evaluated fresh on every call:
    /// 1. below the floor: never;
    /// 2. at or past the ceiling, with the agent having spoken last: always;
    /// 3. advisory "switch" on file, agent having spoken last: yes;
    /// 4. otherwise no.
    /// The last-speaker guard keeps a switch from cutting off a visitor
    /// mid-utterance or firing while the agent's reply is still forming.
    pub fn should_switch(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.turn_count < state.min_turns {
            return false;
        }
        let agent_spoke_last = state.last_speaker == Some(Speaker::Agent);
        if state.turn_count >= state.max_turns && agent_spoke_last {
            return true;
        }
        state.pending_decision == Some(SwitchVerdict::Switch) && agent_spoke_last
    }

    /// Render the current window, oldest first, as "label: text" lines.
    pub fn formatted_history(&self) -> String {
        let state = self.state.lock().unwrap();
        Self::render(&state)
    }

    fn render(state: &TrackerState) -> String {
        if state.history.is_empty() {
            return EMPTY_HISTORY.to_string();
        }
        state
            .history
            .iter()
            .map(|turn| format!("{}: {}", turn.label, turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_history(&self) -> bool {
        !self.state.lock().unwrap().history.is_empty()
    }

    pub fn turn_count(&self) -> u32 {
        self.state.lock().unwrap().turn_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionBackend, DecisionPolicy};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Returns scripted verdicts in order; errors once exhausted.
    struct ScriptedDecisions {
        verdicts: Mutex<VecDeque<Result<SwitchVerdict>>>,
    }

    impl ScriptedDecisions {
        fn new(verdicts: Vec<Result<SwitchVerdict>>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
            }
        }
    }

    #[async_trait]
    impl DecisionBackend for ScriptedDecisions {
        async fn decide(&self, _system: &str, _history: &str) -> Result<SwitchVerdict> {
            self.verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted verdict left")))
        }
    }

    fn tracker_with(verdicts: Vec<Result<SwitchVerdict>>) -> Arc<ConversationTracker> {
        Arc::new(ConversationTracker::with_decision(
            TrackerConfig::default(),
            DecisionPolicy::new(Arc::new(ScriptedDecisions::new(verdicts))),
        ))
    }

    async fn settle() {
        // Let fire-and-forget decision tasks run on the test runtime.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_floor_blocks_switch() {
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("Oracle", 2, 4);
        tracker.record_agent_utterance("welcome");
        assert!(!tracker.should_switch());

        // Even an explicit "switch" verdict cannot beat the floor.
        // (Token 1 is the current sequence right after the slot began.)
        tracker.apply_verdict(1, SwitchVerdict::Switch);
        assert!(!tracker.should_switch());
    }

    #[test]
    fn test_ceiling_fires_without_any_decision() {
        // Scenario B: decision calls all failed, ceiling still ends it.
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("Oracle", 1, 3);
        tracker.record_agent_utterance("one");
        tracker.record_user_utterance("reply");
        tracker.record_agent_utterance("two");
        tracker.record_user_utterance("reply");
        tracker.record_agent_utterance("three");
        assert_eq!(tracker.turn_count(), 3);
        assert!(tracker.should_switch());
    }

    #[test]
    fn test_ceiling_waits_for_agent_to_speak_last() {
        // Scenario C: ceiling reached but the visitor spoke last.
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("Oracle", 1, 3);
        for _ in 0..3 {
            tracker.record_agent_utterance("line");
        }
        tracker.record_user_utterance("wait, one more thing");
        assert!(!tracker.should_switch());

        tracker.record_agent_utterance("closing line");
        assert!(tracker.should_switch());
    }

    #[tokio::test]
    async fn test_advisory_switch_between_floor_and_ceiling() {
        // Scenario A: min 2, max 4; three agent turns interleaved with
        // user turns. Requests go out on the second and third agent
        // turns (the first is below the floor). The first request fails,
        // so the advice stays unset and the slot keeps going; the second
        // answers "switch".
        let tracker = tracker_with(vec![
            Err(anyhow!("backend down")),
            Ok(SwitchVerdict::Switch),
        ]);
        tracker.set_current_agent("Oracle", 2, 4);

        tracker.record_agent_utterance("one");
        tracker.record_user_utterance("hm");
        tracker.record_agent_utterance("two");
        settle().await;
        assert!(!tracker.should_switch(), "no advice yet, below ceiling");

        tracker.record_user_utterance("go on");
        tracker.record_agent_utterance("three");
        settle().await;
        assert!(tracker.should_switch());
    }

    #[tokio::test]
    async fn test_advisory_stay_does_not_switch() {
        let tracker = tracker_with(vec![Ok(SwitchVerdict::Stay), Ok(SwitchVerdict::Stay)]);
        tracker.set_current_agent("Oracle", 1, 5);
        tracker.record_agent_utterance("one");
        tracker.record_agent_utterance("two");
        settle().await;
        assert!(!tracker.should_switch());
    }

    #[tokio::test]
    async fn test_stale_decision_answer_is_dropped() {
        // Two requests go out; the older answer lands after the newer
        // request was issued and must not overwrite anything.
        let tracker = tracker_with(vec![Err(anyhow!("slow")), Err(anyhow!("slow"))]);
        tracker.set_current_agent("Oracle", 1, 10);
        tracker.record_agent_utterance("one");
        tracker.record_agent_utterance("two");
        settle().await;

        // The slot start took token 1, the two requests 2 and 3; a late
        // answer for the older request is stale.
        tracker.apply_verdict(2, SwitchVerdict::Switch);
        assert!(!tracker.should_switch());

        tracker.apply_verdict(3, SwitchVerdict::Switch);
        assert!(tracker.should_switch());
    }

    #[tokio::test]
    async fn test_answer_from_previous_slot_never_lands_in_next() {
        // A decision answer can outlive its slot: the request's task is
        // never cancelled and the backend may be slow. Its token must
        // stay stale after the hand-off, even once the new slot has
        // issued requests of its own.
        let tracker = tracker_with(vec![Err(anyhow!("slow")), Err(anyhow!("slow"))]);
        tracker.set_current_agent("First", 1, 10);
        tracker.record_agent_utterance("parting words");
        settle().await;
        let first_slot_token = 2;

        tracker.set_current_agent("Second", 1, 10);
        tracker.apply_verdict(first_slot_token, SwitchVerdict::Switch);
        tracker.record_agent_utterance("hello");
        settle().await;
        assert!(
            !tracker.should_switch(),
            "advice computed for the previous agent ended the new slot"
        );

        // The new slot's own newest token still applies normally.
        tracker.apply_verdict(4, SwitchVerdict::Switch);
        assert!(tracker.should_switch());
    }

    #[test]
    fn test_new_slot_resets_counters_and_advice() {
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("First", 1, 2);
        tracker.record_agent_utterance("a");
        tracker.record_agent_utterance("b");
        assert!(tracker.should_switch());

        tracker.set_current_agent("Second", 1, 2);
        assert_eq!(tracker.turn_count(), 0);
        assert!(!tracker.should_switch());
        // History survives the hand-off.
        assert!(tracker.has_history());
        assert!(tracker.formatted_history().contains("First (1/2): a"));
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig { history_cap: 4 }));
        tracker.set_current_agent("Oracle", 1, 99);
        for i in 0..6 {
            tracker.record_agent_utterance(&format!("line {i}"));
        }

        let rendered = tracker.formatted_history();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Oracle (3/99): line 2");
        assert_eq!(lines[3], "Oracle (6/99): line 5");
    }

    #[test]
    fn test_empty_history_sentinel() {
        let tracker = ConversationTracker::new(TrackerConfig::default());
        assert_eq!(tracker.formatted_history(), EMPTY_HISTORY);
    }

    #[test]
    fn test_user_turns_render_with_user_label() {
        let tracker = Arc::new(ConversationTracker::new(TrackerConfig::default()));
        tracker.set_current_agent("Oracle", 1, 2);
        tracker.record_agent_utterance("who goes there?");
        tracker.record_user_utterance("just a visitor");

        let rendered = tracker.formatted_history();
        assert_eq!(
            rendered,
            "Oracle (1/2): who goes there?\nUser: just a visitor"
        );
    }
}
