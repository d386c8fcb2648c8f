use alfworld_agent::{
    discover_episode_scripts, load_episode_script, AssistantSession, EnvError, EpisodeReport,
    EpisodeRunner, EpisodeScript, EpisodeSettings, ForcedFailureReason, PromptError,
    PromptLibrary, RunOutcome, RunnerError, ScriptedCompletionClient, ScriptedEnvironment,
    TaskFamily,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum EpisodeCaseError {
    Io { path: PathBuf, source: std::io::Error },
    UnsupportedFormat { path: PathBuf },
    Parse { path: PathBuf, message: String },
    InvalidCase { message: String },
    Environment(EnvError),
    Prompt(PromptError),
    Run(RunnerError),
}

impl fmt::Display for EpisodeCaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeCaseError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            EpisodeCaseError::UnsupportedFormat { path } => {
                write!(f, "unsupported case format: {}", path.display())
            }
            EpisodeCaseError::Parse { path, message } => {
                write!(f, "failed to parse {}: {}", path.display(), message)
            }
            EpisodeCaseError::InvalidCase { message } => write!(f, "invalid case: {message}"),
            EpisodeCaseError::Environment(err) => write!(f, "episode script: {err}"),
            EpisodeCaseError::Prompt(err) => write!(f, "prompts: {err}"),
            EpisodeCaseError::Run(err) => write!(f, "run failed: {err}"),
        }
    }
}

impl std::error::Error for EpisodeCaseError {}

/// One offline episode check: a scripted game, the assistant's canned
/// replies, and what the run must produce.
#[derive(Debug, Deserialize)]
pub struct EpisodeCase {
    pub version: u32,
    pub name: String,
    /// Episode script path, relative to the case file.
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Inline episode script.
    #[serde(default)]
    pub episode: Option<EpisodeScript>,
    pub replies: Vec<String>,
    #[serde(default)]
    pub examples: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub base_prompt: String,
    #[serde(default)]
    pub settings: CaseSettings,
    pub expect: Expectations,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaseSettings {
    #[serde(default)]
    pub match_threshold: Option<f64>,
    #[serde(default)]
    pub max_repeated_actions: Option<u32>,
    #[serde(default)]
    pub max_invalid_actions: Option<u32>,
    #[serde(default)]
    pub max_auto_replies: Option<u32>,
    #[serde(default)]
    pub rewrite_history: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Expectations {
    #[serde(default)]
    pub outcome: Option<RunOutcome>,
    #[serde(default)]
    pub forced_failure: Option<ForcedFailureReason>,
    #[serde(default)]
    pub turns: Option<u32>,
    #[serde(default)]
    pub actions: Option<Vec<String>>,
    /// Substrings that must appear in some transcript message.
    #[serde(default)]
    pub transcript_contains: Vec<String>,
}

#[derive(Debug)]
pub struct CaseOutcome {
    pub name: String,
    pub source: String,
    pub passed: bool,
    pub failures: Vec<String>,
}

pub fn run_case_file(path: &Path) -> Result<CaseOutcome, EpisodeCaseError> {
    let case = load_case_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    run_loaded_case(&case, base_dir, path.to_string_lossy().as_ref())
}

pub fn run_loaded_case(
    case: &EpisodeCase,
    base_dir: &Path,
    source: &str,
) -> Result<CaseOutcome, EpisodeCaseError> {
    if case.version != 1 {
        return Err(EpisodeCaseError::InvalidCase {
            message: format!("unsupported version {}", case.version),
        });
    }

    let script = match (&case.script, &case.episode) {
        (Some(path), None) => {
            load_episode_script(&base_dir.join(path)).map_err(EpisodeCaseError::Environment)?
        }
        (None, Some(episode)) => episode.clone(),
        (Some(_), Some(_)) => {
            return Err(EpisodeCaseError::InvalidCase {
                message: "script and episode are mutually exclusive".to_string(),
            })
        }
        (None, None) => {
            return Err(EpisodeCaseError::InvalidCase {
                message: "script or episode must be provided".to_string(),
            })
        }
    };

    let env = ScriptedEnvironment::new(script).map_err(EpisodeCaseError::Environment)?;
    let assistant = AssistantSession::new(
        ScriptedCompletionClient::new(case.replies.iter().cloned()),
        "scripted",
        "",
    );
    let prompts = PromptLibrary::new(
        case.examples.clone().unwrap_or_else(empty_examples),
        case.base_prompt.clone(),
    );

    let mut runner = EpisodeRunner::new(env, assistant, prompts, case_settings(&case.settings));
    let report = runner.run().map_err(|err| match err {
        RunnerError::Prompt(err) => EpisodeCaseError::Prompt(err),
        other => EpisodeCaseError::Run(other),
    })?;

    let failures = evaluate_expectations(&case.expect, &report);
    Ok(CaseOutcome {
        name: case.name.clone(),
        source: source.to_string(),
        passed: failures.is_empty(),
        failures,
    })
}

pub fn discover_case_files(dir: &Path) -> Result<Vec<PathBuf>, EpisodeCaseError> {
    discover_episode_scripts(dir).map_err(|err| match err {
        EnvError::Io { path, source } => EpisodeCaseError::Io { path, source },
        other => EpisodeCaseError::Environment(other),
    })
}

pub fn load_case_file(path: &Path) -> Result<EpisodeCase, EpisodeCaseError> {
    let contents = std::fs::read_to_string(path).map_err(|err| EpisodeCaseError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("")
        .to_lowercase();

    if ext == "yaml" || ext == "yml" {
        serde_yaml::from_str(&contents).map_err(|err| EpisodeCaseError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    } else if ext == "json" {
        serde_json::from_str(&contents).map_err(|err| EpisodeCaseError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    } else {
        Err(EpisodeCaseError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

/// Every known example id mapped to no turns.
fn empty_examples() -> BTreeMap<String, Vec<String>> {
    TaskFamily::ALL
        .iter()
        .flat_map(|family| family.example_ids())
        .map(|id| (id.to_string(), Vec::new()))
        .collect()
}

fn case_settings(overrides: &CaseSettings) -> EpisodeSettings {
    let mut settings = EpisodeSettings::default();
    if let Some(threshold) = overrides.match_threshold {
        settings.match_threshold = threshold;
    }
    if let Some(max) = overrides.max_repeated_actions {
        settings.limits.max_repeated_actions = max;
    }
    if let Some(max) = overrides.max_invalid_actions {
        settings.limits.max_invalid_actions = max;
    }
    if let Some(max) = overrides.max_auto_replies {
        settings.max_auto_replies = max;
    }
    if let Some(rewrite) = overrides.rewrite_history {
        settings.rewrite_history = rewrite;
    }
    settings
}

fn evaluate_expectations(expect: &Expectations, report: &EpisodeReport) -> Vec<String> {
    let mut failures = Vec::new();

    if let Some(expected) = expect.outcome {
        if report.outcome != expected {
            failures.push(format!(
                "outcome mismatch: expected {}, got {}",
                expected.as_str(),
                report.outcome.as_str()
            ));
        }
    }

    if let Some(expected) = expect.forced_failure {
        let actual = match report.episode_outcome {
            Some(alfworld_agent::EpisodeOutcome::ForcedFailure(reason)) => Some(reason),
            _ => None,
        };
        if actual != Some(expected) {
            failures.push(format!(
                "forced failure mismatch: expected {expected:?}, got {actual:?}"
            ));
        }
    }

    if let Some(expected) = expect.turns {
        if report.turns != expected {
            failures.push(format!(
                "turns mismatch: expected {expected}, got {}",
                report.turns
            ));
        }
    }

    if let Some(expected) = expect.actions.as_ref() {
        if &report.actions != expected {
            failures.push(format!(
                "actions mismatch: expected {expected:?}, got {:?}",
                report.actions
            ));
        }
    }

    for needle in &expect.transcript_contains {
        if !report
            .transcript
            .iter()
            .any(|message| message.content.contains(needle.as_str()))
        {
            failures.push(format!("missing transcript text: {needle}"));
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPISODE: &str = r#"
game_file: json_2.1.1/valid_seen/look_at_obj_in_light-Book-None-DeskLamp-301/trial_T1/game.tw-pddl
initial_observation: "-= Welcome to TextWorld, ALFRED! =-\n\nYou are in a bedroom.\n\nYour task is to: look at book under the desklamp."
start: bed
states:
  bed:
    transitions:
      take book 1 from bed 1:
        observation: "You pick up the book 1 from the bed 1."
        next: holding
  holding:
    transitions:
      use desklamp 1:
        observation: "You turn on the desklamp 1."
        done: true
        won: true
"#;

    fn case(replies: &[&str], expect: Expectations) -> EpisodeCase {
        EpisodeCase {
            version: 1,
            name: "examine".to_string(),
            script: None,
            episode: Some(serde_yaml::from_str(EPISODE).expect("episode")),
            replies: replies.iter().map(|reply| reply.to_string()).collect(),
            examples: None,
            base_prompt: String::new(),
            settings: CaseSettings::default(),
            expect,
        }
    }

    #[test]
    fn inline_episode_passes_expectations() {
        let case = case(
            &["Action: take book 1 from bed 1", "Action: use desklamp 1"],
            Expectations {
                outcome: Some(RunOutcome::Success),
                forced_failure: None,
                turns: Some(3),
                actions: Some(vec![
                    "take book 1 from bed 1".to_string(),
                    "use desklamp 1".to_string(),
                ]),
                transcript_contains: vec!["Task success".to_string()],
            },
        );

        let outcome = run_loaded_case(&case, Path::new("."), "memory").expect("run case");
        assert!(outcome.passed, "{:#?}", outcome.failures);
    }

    #[test]
    fn outcome_expectation_detects_mismatch() {
        let case = case(
            &["Action: take book 1 from bed 1", "Action: use desklamp 1"],
            Expectations {
                outcome: Some(RunOutcome::Failure),
                ..Expectations::default()
            },
        );

        let outcome = run_loaded_case(&case, Path::new("."), "memory").expect("run case");
        assert!(!outcome.passed);
        assert_eq!(
            outcome.failures,
            vec!["outcome mismatch: expected failure, got success".to_string()]
        );
    }

    #[test]
    fn script_and_episode_are_exclusive() {
        let mut case = case(&[], Expectations::default());
        case.script = Some(PathBuf::from("episode.yaml"));
        let err = run_loaded_case(&case, Path::new("."), "memory").expect_err("exclusive");
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn bundled_cases_pass() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("episodes");
        let files = discover_case_files(&dir).expect("discover cases");
        assert!(!files.is_empty());
        for path in files {
            let outcome = run_case_file(&path).expect("run case");
            assert!(outcome.passed, "{}: {:#?}", outcome.source, outcome.failures);
        }
    }
}
