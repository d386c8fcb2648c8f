use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{extension_of, EnvError, ResetOutcome, StepOutcome, TextEnvironment};

pub const DEFAULT_NO_OP_OBSERVATION: &str = "Nothing happens.";

/// A fixed state table standing in for a game: each state lists its
/// admissible commands and where each command leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeScript {
    #[serde(default)]
    pub game_file: Option<String>,
    pub initial_observation: String,
    pub start: String,
    #[serde(default = "default_no_op_observation")]
    pub no_op_observation: String,
    pub states: BTreeMap<String, ScriptedState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptedState {
    /// Commands reported as legal; defaults to the transition keys.
    #[serde(default)]
    pub admissible: Vec<String>,
    #[serde(default)]
    pub transitions: BTreeMap<String, ScriptedTransition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedTransition {
    pub observation: String,
    /// Next state; stays in place when absent.
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub won: bool,
}

fn default_no_op_observation() -> String {
    DEFAULT_NO_OP_OBSERVATION.to_string()
}

impl ScriptedState {
    fn admissible_commands(&self) -> Vec<String> {
        if self.admissible.is_empty() {
            self.transitions.keys().cloned().collect()
        } else {
            self.admissible.clone()
        }
    }
}

impl EpisodeScript {
    pub fn validate(&self) -> Result<(), EnvError> {
        if !self.states.contains_key(&self.start) {
            return Err(EnvError::InvalidScript {
                message: format!("unknown start state: {}", self.start),
            });
        }
        for (state_id, state) in &self.states {
            for (command, transition) in &state.transitions {
                if let Some(next) = transition.next.as_ref() {
                    if !self.states.contains_key(next) {
                        return Err(EnvError::InvalidScript {
                            message: format!(
                                "state {state_id} command `{command}` leads to unknown state {next}"
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn load_episode_script(path: &Path) -> Result<EpisodeScript, EnvError> {
    let contents = std::fs::read_to_string(path).map_err(|err| EnvError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;

    let script: EpisodeScript = match extension_of(path).as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&contents).map_err(|err| EnvError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
        }
        Some("json") => serde_json::from_str(&contents).map_err(|err| EnvError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?,
        _ => {
            return Err(EnvError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };
    script.validate()?;
    Ok(script)
}

#[derive(Debug, Clone)]
pub struct ScriptedEnvironment {
    script: EpisodeScript,
    current: Option<String>,
    finished: Option<StepOutcome>,
}

impl ScriptedEnvironment {
    pub fn new(script: EpisodeScript) -> Result<Self, EnvError> {
        script.validate()?;
        Ok(Self {
            script,
            current: None,
            finished: None,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, EnvError> {
        Self::new(load_episode_script(path)?)
    }

    pub fn script(&self) -> &EpisodeScript {
        &self.script
    }

    pub fn current_state(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn state(&self, id: &str) -> Result<&ScriptedState, EnvError> {
        self.script
            .states
            .get(id)
            .ok_or_else(|| EnvError::InvalidScript {
                message: format!("unknown state: {id}"),
            })
    }
}

impl TextEnvironment for ScriptedEnvironment {
    fn reset(&mut self) -> Result<ResetOutcome, EnvError> {
        let start = self.script.start.clone();
        let admissible_commands = self.state(&start)?.admissible_commands();
        self.current = Some(start);
        self.finished = None;
        Ok(ResetOutcome {
            observation: self.script.initial_observation.clone(),
            admissible_commands,
            game_file: self.script.game_file.clone(),
        })
    }

    fn step(&mut self, action: &str) -> Result<StepOutcome, EnvError> {
        if let Some(finished) = self.finished.as_ref() {
            return Ok(finished.clone());
        }
        let current = self.current.clone().ok_or(EnvError::NotStarted)?;
        let state = self.state(&current)?;

        let Some(transition) = state.transitions.get(action).cloned() else {
            return Ok(StepOutcome {
                observation: self.script.no_op_observation.clone(),
                done: false,
                won: false,
                admissible_commands: state.admissible_commands(),
            });
        };

        let next = transition.next.unwrap_or(current);
        let admissible_commands = if transition.done {
            Vec::new()
        } else {
            self.state(&next)?.admissible_commands()
        };
        self.current = Some(next);

        let outcome = StepOutcome {
            observation: transition.observation,
            done: transition.done,
            won: transition.won,
            admissible_commands,
        };
        if outcome.done {
            self.finished = Some(outcome.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUG_SCRIPT: &str = include_str!("../../fixtures/pick_and_place_mug.yaml");

    fn mug_script() -> EpisodeScript {
        serde_yaml::from_str(MUG_SCRIPT).expect("mug script")
    }

    #[test]
    fn reset_reports_start_state() {
        let mut env = ScriptedEnvironment::new(mug_script()).unwrap();
        let reset = env.reset().unwrap();
        assert!(reset.observation.contains("Your task is to"));
        assert_eq!(reset.admissible_commands.len(), 4);
        assert!(reset
            .game_file
            .as_deref()
            .unwrap_or_default()
            .contains("pick_and_place_simple"));
    }

    #[test]
    fn unknown_command_is_a_no_op() {
        let mut env = ScriptedEnvironment::new(mug_script()).unwrap();
        env.reset().unwrap();
        let step = env.step("fly away").unwrap();
        assert_eq!(step.observation, DEFAULT_NO_OP_OBSERVATION);
        assert!(!step.done);
        assert_eq!(env.current_state(), Some("room"));
    }

    #[test]
    fn admissible_defaults_to_transition_keys() {
        let mut env = ScriptedEnvironment::new(mug_script()).unwrap();
        env.reset().unwrap();
        let step = env.step("go to shelf 1").unwrap();
        assert_eq!(step.admissible_commands, vec!["take mug 1 from shelf 1".to_string()]);
    }

    #[test]
    fn winning_path_finishes_episode() {
        let mut env = ScriptedEnvironment::new(mug_script()).unwrap();
        env.reset().unwrap();
        env.step("go to shelf 1").unwrap();
        env.step("take mug 1 from shelf 1").unwrap();
        env.step("go to desk 1").unwrap();
        let last = env.step("put mug 1 in/on desk 1").unwrap();
        assert!(last.done);
        assert!(last.won);
        assert_eq!(env.step("look").unwrap(), last);
    }

    #[test]
    fn step_before_reset_fails() {
        let mut env = ScriptedEnvironment::new(mug_script()).unwrap();
        assert!(matches!(env.step("look"), Err(EnvError::NotStarted)));
    }

    #[test]
    fn validate_rejects_dangling_state() {
        let mut script = mug_script();
        script.start = "attic".to_string();
        assert!(matches!(
            ScriptedEnvironment::new(script),
            Err(EnvError::InvalidScript { .. })
        ));
    }
}
