//! Few-shot example selection keyed by ALFWorld task family.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

pub const TASK_START_PREFIX: &str = "Your task now begins. ";

/// The six ALFWorld task families, in prefix-matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskFamily {
    PickAndPlace,
    PickCleanThenPlace,
    PickHeatThenPlace,
    PickCoolThenPlace,
    LookAtObj,
    PickTwoObj,
}

impl TaskFamily {
    pub const ALL: [TaskFamily; 6] = [
        TaskFamily::PickAndPlace,
        TaskFamily::PickCleanThenPlace,
        TaskFamily::PickHeatThenPlace,
        TaskFamily::PickCoolThenPlace,
        TaskFamily::LookAtObj,
        TaskFamily::PickTwoObj,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            TaskFamily::PickAndPlace => "pick_and_place",
            TaskFamily::PickCleanThenPlace => "pick_clean_then_place",
            TaskFamily::PickHeatThenPlace => "pick_heat_then_place",
            TaskFamily::PickCoolThenPlace => "pick_cool_then_place",
            TaskFamily::LookAtObj => "look_at_obj",
            TaskFamily::PickTwoObj => "pick_two_obj",
        }
    }

    pub fn example_ids(&self) -> [&'static str; 2] {
        match self {
            TaskFamily::PickAndPlace => ["put_1", "put_2"],
            TaskFamily::PickCleanThenPlace => ["clean_1", "clean_2"],
            TaskFamily::PickHeatThenPlace => ["heat_1", "heat_2"],
            TaskFamily::PickCoolThenPlace => ["cool_1", "cool_2"],
            TaskFamily::LookAtObj => ["examine_1", "examine_2"],
            TaskFamily::PickTwoObj => ["puttwo_1", "puttwo_2"],
        }
    }

    pub fn from_task_name(name: &str) -> Result<Self, PromptError> {
        Self::ALL
            .into_iter()
            .find(|family| name.starts_with(family.prefix()))
            .ok_or_else(|| PromptError::UnsupportedName {
                name: name.to_string(),
            })
    }
}

/// Task name of a game file: its two parent directories joined by `/`,
/// e.g. `pick_and_place_simple-Mug-None-Desk-308/trial_T2019...`.
pub fn task_name_from_game_file(game_file: &str) -> String {
    let parts: Vec<&str> = game_file.split('/').collect();
    let end = parts.len().saturating_sub(1);
    let start = parts.len().saturating_sub(3);
    parts[start..end].join("/")
}

/// `"Your task now begins. "` followed by every paragraph of the opening
/// observation except the welcome banner.
pub fn initial_task_message(observation: &str) -> String {
    let body: Vec<&str> = observation.split("\n\n").skip(1).collect();
    format!("{TASK_START_PREFIX}{}", body.join("\n"))
}

// ============================================================================
// Prompt Library
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptLibrary {
    examples: BTreeMap<String, Vec<String>>,
    base_prompt: String,
}

impl PromptLibrary {
    pub fn new(examples: BTreeMap<String, Vec<String>>, base_prompt: impl Into<String>) -> Self {
        Self {
            examples,
            base_prompt: base_prompt.into(),
        }
    }

    pub fn load(prompts_path: &Path, base_prompt_path: &Path) -> Result<Self, PromptError> {
        let examples = load_examples(prompts_path)?;
        let base_prompt = fs::read_to_string(base_prompt_path).map_err(|err| PromptError::Read {
            path: base_prompt_path.display().to_string(),
            message: err.to_string(),
        })?;
        Ok(Self::new(examples, base_prompt))
    }

    pub fn base_prompt(&self) -> &str {
        self.base_prompt.as_str()
    }

    pub fn example(&self, id: &str) -> Option<&[String]> {
        self.examples.get(id).map(Vec::as_slice)
    }

    /// Example turns for a task family, both examples concatenated.
    pub fn family_examples(&self, family: TaskFamily) -> Result<Vec<String>, PromptError> {
        let mut turns = Vec::new();
        for id in family.example_ids() {
            let example = self.example(id).ok_or_else(|| PromptError::MissingExample {
                id: id.to_string(),
            })?;
            turns.extend(example.iter().cloned());
        }
        Ok(turns)
    }

    /// Seed turns for a game: the family's examples with the base prompt
    /// prepended to the first turn.
    pub fn examples_for_game_file(&self, game_file: &str) -> Result<Vec<String>, PromptError> {
        let name = task_name_from_game_file(game_file);
        let family = TaskFamily::from_task_name(&name)?;
        tracing::info!(task = name.as_str(), family = family.prefix(), "selected examples");

        let mut turns = self.family_examples(family)?;
        if turns.is_empty() {
            turns.push(String::new());
        }
        turns[0].insert_str(0, self.base_prompt.as_str());
        Ok(turns)
    }
}

fn load_examples(path: &Path) -> Result<BTreeMap<String, Vec<String>>, PromptError> {
    let content = fs::read_to_string(path).map_err(|err| PromptError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|err| PromptError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    UnsupportedName { name: String },
    MissingExample { id: String },
    Read { path: String, message: String },
    Parse { path: String, message: String },
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::UnsupportedName { name } => write!(f, "unsupported name: {name}"),
            PromptError::MissingExample { id } => write!(f, "missing prompt example: {id}"),
            PromptError::Read { path, message } => {
                write!(f, "read prompt file failed ({path}): {message}")
            }
            PromptError::Parse { path, message } => {
                write!(f, "parse prompt file failed ({path}): {message}")
            }
        }
    }
}

impl Error for PromptError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    const GAME_FILE: &str = "json_2.1.1/valid_unseen/pick_heat_then_place_in_recep-Egg-None-Fridge-10/trial_T20190907_151643_465634/game.tw-pddl";

    fn library() -> PromptLibrary {
        let mut examples = BTreeMap::new();
        for family in TaskFamily::ALL {
            for id in family.example_ids() {
                examples.insert(
                    id.to_string(),
                    vec![format!("{id} task"), format!("{id} answer")],
                );
            }
        }
        PromptLibrary::new(examples, "BASE\n")
    }

    #[test]
    fn task_name_uses_two_parent_directories() {
        assert_eq!(
            task_name_from_game_file(GAME_FILE),
            "pick_heat_then_place_in_recep-Egg-None-Fridge-10/trial_T20190907_151643_465634"
        );
        assert_eq!(task_name_from_game_file("game.tw-pddl"), "");
    }

    #[test]
    fn every_family_prefix_maps_to_its_examples() {
        let cases = [
            ("pick_and_place_simple-Mug-None-Desk-308/t", ["put_1", "put_2"]),
            ("pick_clean_then_place_in_recep-Pan-None-Sink-2/t", ["clean_1", "clean_2"]),
            ("pick_heat_then_place_in_recep-Egg-None-Fridge-10/t", ["heat_1", "heat_2"]),
            ("pick_cool_then_place_in_recep-Apple-None-Microwave-1/t", ["cool_1", "cool_2"]),
            ("look_at_obj_in_light-Book-None-DeskLamp-301/t", ["examine_1", "examine_2"]),
            ("pick_two_obj_and_place-CD-None-Safe-323/t", ["puttwo_1", "puttwo_2"]),
        ];
        for (name, ids) in cases {
            assert_eq!(TaskFamily::from_task_name(name).unwrap().example_ids(), ids);
        }
    }

    #[test]
    fn unknown_prefix_is_fatal() {
        let err = TaskFamily::from_task_name("slice_and_serve-Bread/t").unwrap_err();
        assert_eq!(err.to_string(), "unsupported name: slice_and_serve-Bread/t");
    }

    #[test]
    fn examples_prepend_base_prompt_to_first_turn() {
        let turns = library().examples_for_game_file(GAME_FILE).unwrap();
        assert_eq!(
            turns,
            vec![
                "BASE\nheat_1 task".to_string(),
                "heat_1 answer".to_string(),
                "heat_2 task".to_string(),
                "heat_2 answer".to_string(),
            ]
        );
    }

    #[test]
    fn missing_example_id_is_reported() {
        let library = PromptLibrary::new(BTreeMap::new(), "BASE");
        let err = library.examples_for_game_file(GAME_FILE).unwrap_err();
        assert_eq!(
            err,
            PromptError::MissingExample {
                id: "heat_1".to_string()
            }
        );
    }

    #[test]
    fn initial_message_drops_welcome_banner() {
        let observation = "-= Welcome to TextWorld, ALFRED! =-\n\nYou are in the middle of a room.\n\nYour task is to: heat some egg.";
        assert_eq!(
            initial_task_message(observation),
            "Your task now begins. You are in the middle of a room.\nYour task is to: heat some egg."
        );
    }

    #[test]
    fn load_reads_json_examples_and_base_prompt() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("alfworld-agent-prompts-{unique}"));
        std::fs::create_dir_all(&dir).unwrap();
        let prompts = dir.join("alfworld_react.json");
        let base = dir.join("base.txt");
        std::fs::write(&prompts, r#"{"put_1": ["a", "b"], "put_2": ["c"]}"#).unwrap();
        std::fs::write(&base, "Interact with a household.\n").unwrap();

        let library = PromptLibrary::load(&prompts, &base).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(library.base_prompt(), "Interact with a household.\n");
        assert_eq!(
            library.family_examples(TaskFamily::PickAndPlace).unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn load_reports_malformed_json() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("alfworld-agent-bad-prompts-{unique}.json"));
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = PromptLibrary::load(&path, &path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, PromptError::Parse { .. }));
    }
}
