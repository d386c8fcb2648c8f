//! Per-episode bookkeeping: repeated/invalid action counters and termination.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_REPEATED_ACTIONS: u32 = 3;
pub const DEFAULT_MAX_INVALID_ACTIONS: u32 = 4;
pub const DEFAULT_NO_OP_PHRASE: &str = "Nothing happens";

pub const OBSERVATION_PREFIX: &str = "Observation: ";
pub const SUCCESS_NOTICE: &str = "Task success, now reply TERMINATE\n";
pub const FAILURE_NOTICE: &str = "Task failed, now reply TERMINATE.\n";
pub const FORCED_FAILURE_NOTICE: &str = "Task failed, now reply TERMINATE.";
pub const THINK_ACKNOWLEDGEMENT: &str = "OK.";

const ARRIVAL_PREFIX: &str = "You arrive at loc ";

// ============================================================================
// Limits
// ============================================================================

/// Early-termination thresholds for one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeLimits {
    /// Consecutive repeats of the same action (after the first) that end the episode.
    pub max_repeated_actions: u32,
    /// Consecutive no-op observations that end the episode.
    pub max_invalid_actions: u32,
    /// Substring marking a no-op observation.
    pub no_op_phrase: String,
}

impl Default for EpisodeLimits {
    fn default() -> Self {
        Self {
            max_repeated_actions: DEFAULT_MAX_REPEATED_ACTIONS,
            max_invalid_actions: DEFAULT_MAX_INVALID_ACTIONS,
            no_op_phrase: DEFAULT_NO_OP_PHRASE.to_string(),
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedFailureReason {
    RepeatedAction,
    InvalidActions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum EpisodeOutcome {
    /// The environment reported the goal as reached.
    Success,
    /// The environment ended the game without the goal.
    Failure,
    /// The adapter ended the episode early.
    ForcedFailure(ForcedFailureReason),
}

impl EpisodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EpisodeOutcome::Success)
    }

    pub fn notice(&self) -> &'static str {
        match self {
            EpisodeOutcome::Success => SUCCESS_NOTICE,
            EpisodeOutcome::Failure => FAILURE_NOTICE,
            EpisodeOutcome::ForcedFailure(_) => FORCED_FAILURE_NOTICE,
        }
    }

    /// Text sent back to the assistant for this outcome.
    pub fn reply(&self) -> String {
        match self {
            EpisodeOutcome::ForcedFailure(_) => format!("{OBSERVATION_PREFIX}{}", self.notice()),
            _ => self.notice().to_string(),
        }
    }
}

/// What the environment side answers after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnVerdict {
    Continue { observation: String },
    Finished(EpisodeOutcome),
}

impl TurnVerdict {
    pub fn reply(&self) -> String {
        match self {
            TurnVerdict::Continue { observation } => format!("{OBSERVATION_PREFIX}{observation}"),
            TurnVerdict::Finished(outcome) => outcome.reply(),
        }
    }

    pub fn outcome(&self) -> Option<EpisodeOutcome> {
        match self {
            TurnVerdict::Finished(outcome) => Some(*outcome),
            TurnVerdict::Continue { .. } => None,
        }
    }
}

// ============================================================================
// Episode State
// ============================================================================

/// Counters owned by one episode; a fresh value is built at every reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EpisodeState {
    limits: EpisodeLimits,
    last_action: Option<String>,
    repeat_count: u32,
    invalid_count: u32,
    steps: u32,
    outcome: Option<EpisodeOutcome>,
}

impl EpisodeState {
    pub fn new(limits: EpisodeLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &EpisodeLimits {
        &self.limits
    }

    pub fn last_action(&self) -> Option<&str> {
        self.last_action.as_deref()
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn invalid_count(&self) -> u32 {
        self.invalid_count
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn outcome(&self) -> Option<EpisodeOutcome> {
        self.outcome
    }

    /// Records one environment step and decides whether the episode goes on.
    ///
    /// `observation` is expected to be normalized already.
    pub fn record_step(&mut self, action: &str, observation: &str, done: bool, won: bool) -> TurnVerdict {
        self.steps += 1;

        if done {
            let outcome = if won {
                EpisodeOutcome::Success
            } else {
                EpisodeOutcome::Failure
            };
            self.outcome = Some(outcome);
            return TurnVerdict::Finished(outcome);
        }

        if self.last_action.as_deref() == Some(action) {
            self.repeat_count += 1;
        } else {
            self.repeat_count = 0;
            self.last_action = Some(action.to_string());
        }

        if observation.contains(self.limits.no_op_phrase.as_str()) {
            self.invalid_count += 1;
        } else {
            self.invalid_count = 0;
        }

        let forced = if self.invalid_count >= self.limits.max_invalid_actions {
            Some(ForcedFailureReason::InvalidActions)
        } else if self.repeat_count >= self.limits.max_repeated_actions {
            Some(ForcedFailureReason::RepeatedAction)
        } else {
            None
        };

        match forced {
            Some(reason) => {
                let outcome = EpisodeOutcome::ForcedFailure(reason);
                self.outcome = Some(outcome);
                TurnVerdict::Finished(outcome)
            }
            None => TurnVerdict::Continue {
                observation: observation.to_string(),
            },
        }
    }
}

/// Drops the "You arrive at loc N. " preamble and acknowledges think actions.
pub fn normalize_observation(observation: &str, action: &str) -> String {
    if action.contains("think") {
        return THINK_ACKNOWLEDGEMENT.to_string();
    }
    strip_arrival_prefix(observation).to_string()
}

pub fn strip_arrival_prefix(observation: &str) -> &str {
    if !observation.starts_with(ARRIVAL_PREFIX) {
        return observation;
    }
    match observation.find(". ") {
        Some(index) => &observation[index + 2..],
        None => observation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_with_win_finishes_successfully() {
        let mut episode = EpisodeState::default();
        let verdict = episode.record_step("put mug 1 in/on desk 1", "You put the mug.", true, true);
        assert_eq!(verdict, TurnVerdict::Finished(EpisodeOutcome::Success));
        assert_eq!(verdict.reply(), "Task success, now reply TERMINATE\n");
        assert_eq!(episode.outcome(), Some(EpisodeOutcome::Success));
    }

    #[test]
    fn done_without_win_reports_failure() {
        let mut episode = EpisodeState::default();
        let verdict = episode.record_step("look", "Game over.", true, false);
        assert_eq!(verdict.reply(), "Task failed, now reply TERMINATE.\n");
    }

    #[test]
    fn third_repeat_forces_failure() {
        let mut episode = EpisodeState::default();
        for _ in 0..3 {
            let verdict = episode.record_step("go to desk 1", "You see a desk.", false, false);
            assert!(matches!(verdict, TurnVerdict::Continue { .. }));
        }
        assert_eq!(episode.repeat_count(), 2);

        let verdict = episode.record_step("go to desk 1", "You see a desk.", false, false);
        assert_eq!(
            verdict,
            TurnVerdict::Finished(EpisodeOutcome::ForcedFailure(
                ForcedFailureReason::RepeatedAction
            ))
        );
        assert_eq!(verdict.reply(), "Observation: Task failed, now reply TERMINATE.");
    }

    #[test]
    fn different_action_resets_repeat_counter() {
        let mut episode = EpisodeState::default();
        episode.record_step("look", "You see a room.", false, false);
        episode.record_step("look", "You see a room.", false, false);
        assert_eq!(episode.repeat_count(), 1);
        episode.record_step("inventory", "You carry nothing.", false, false);
        assert_eq!(episode.repeat_count(), 0);
        assert_eq!(episode.last_action(), Some("inventory"));
    }

    #[test]
    fn fourth_consecutive_no_op_forces_failure() {
        let mut episode = EpisodeState::default();
        let actions = ["open desk 1", "take desk 1", "open shelf 1", "use lamp 1"];
        for action in &actions[..3] {
            let verdict = episode.record_step(action, "Nothing happens.", false, false);
            assert!(verdict.outcome().is_none());
        }
        let verdict = episode.record_step(actions[3], "Nothing happens.", false, false);
        assert_eq!(
            verdict.outcome(),
            Some(EpisodeOutcome::ForcedFailure(
                ForcedFailureReason::InvalidActions
            ))
        );
    }

    #[test]
    fn useful_observation_resets_invalid_counter() {
        let mut episode = EpisodeState::default();
        for action in ["a", "b", "c"] {
            episode.record_step(action, "Nothing happens.", false, false);
        }
        assert_eq!(episode.invalid_count(), 3);
        episode.record_step("look", "You are in a kitchen.", false, false);
        assert_eq!(episode.invalid_count(), 0);
        let verdict = episode.record_step("d", "Nothing happens.", false, false);
        assert!(verdict.outcome().is_none());
    }

    #[test]
    fn custom_limits_apply() {
        let mut episode = EpisodeState::new(EpisodeLimits {
            max_repeated_actions: 1,
            ..EpisodeLimits::default()
        });
        episode.record_step("look", "room", false, false);
        let verdict = episode.record_step("look", "room", false, false);
        assert!(verdict.outcome().is_some());
    }

    #[test]
    fn arrival_prefix_is_stripped() {
        assert_eq!(
            normalize_observation("You arrive at loc 12. On the desk 1, you see a mug 1.", "go to desk 1"),
            "On the desk 1, you see a mug 1."
        );
        assert_eq!(normalize_observation("You see a desk.", "look"), "You see a desk.");
    }

    #[test]
    fn think_actions_are_acknowledged() {
        assert_eq!(
            normalize_observation("Nothing happens.", "think: the mug is likely on the desk"),
            "OK."
        );
    }
}
