//! Drives one episode: example seeding, alternating turns, and the report.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

use crate::config::EpisodeSettings;
use crate::conversation::{replace_last_action, to_conversation, Message};
use crate::dispatch::{Dispatched, TurnDispatcher, TurnError};
use crate::environment::TextEnvironment;
use crate::episode::EpisodeOutcome;
use crate::llm::LlmCompletionClient;
use crate::prompts::{initial_task_message, PromptError, PromptLibrary};
use crate::resolver::ActionResolver;
use crate::session::{
    assistant_dispatcher, environment_dispatcher, AssistantSession, EnvironmentSession,
};

/// How an episode run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// The game ended without the goal, or the episode was ended early.
    Failure,
    /// The environment side ran out of auto replies.
    Exhausted,
    /// The assistant asked to stop before the episode had an outcome.
    Terminated,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Failure => "failure",
            RunOutcome::Exhausted => "exhausted",
            RunOutcome::Terminated => "terminated",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerLogEntry {
    AssistantReply {
        turn: u32,
        handler: &'static str,
        content: String,
    },
    ActionResolved {
        turn: u32,
        cleaned: String,
        action: String,
        matched: bool,
        best_score: Option<f64>,
    },
    EnvironmentReply {
        turn: u32,
        handler: &'static str,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeReport {
    pub game_file: Option<String>,
    pub outcome: RunOutcome,
    /// Episode outcome as recorded by the environment side, if any.
    pub episode_outcome: Option<EpisodeOutcome>,
    /// Replies produced by the environment side.
    pub turns: u32,
    /// Commands submitted to the environment, in order.
    pub actions: Vec<String>,
    pub log: Vec<RunnerLogEntry>,
    pub transcript: Vec<Message>,
}

// ============================================================================
// Runner
// ============================================================================

pub struct EpisodeRunner<E, C> {
    environment: EnvironmentSession<E>,
    environment_dispatcher: TurnDispatcher<EnvironmentSession<E>>,
    assistant: AssistantSession<C>,
    assistant_dispatcher: TurnDispatcher<AssistantSession<C>>,
    prompts: PromptLibrary,
    settings: EpisodeSettings,
}

impl<E, C> EpisodeRunner<E, C>
where
    E: TextEnvironment + 'static,
    C: LlmCompletionClient + 'static,
{
    pub fn new(
        env: E,
        assistant: AssistantSession<C>,
        prompts: PromptLibrary,
        settings: EpisodeSettings,
    ) -> Self {
        let resolver = ActionResolver::new(settings.action_marker.clone(), settings.match_threshold);
        Self {
            environment: EnvironmentSession::new(env, resolver, settings.limits.clone()),
            environment_dispatcher: environment_dispatcher(),
            assistant,
            assistant_dispatcher: assistant_dispatcher(),
            prompts,
            settings,
        }
    }

    pub fn environment(&self) -> &EnvironmentSession<E> {
        &self.environment
    }

    pub fn assistant(&self) -> &AssistantSession<C> {
        &self.assistant
    }

    /// Runs one episode from reset to its end.
    pub fn run(&mut self) -> Result<EpisodeReport, RunnerError> {
        let reset = self.environment.reset()?;
        let mut transcript = self.seed_transcript(reset.game_file.as_deref(), &reset.observation)?;

        let mut log = Vec::new();
        let mut actions = Vec::new();
        let mut turns = 0u32;

        let outcome = loop {
            if turns >= self.settings.max_auto_replies {
                // An episode decided on the last allowed step keeps its result.
                if self.environment.episode().outcome().is_some() {
                    break self.finished_outcome();
                }
                tracing::warn!(turns, "auto reply limit reached");
                break RunOutcome::Exhausted;
            }

            let assistant = self
                .assistant_dispatcher
                .dispatch(&mut self.assistant, &transcript)?;
            transcript.push(Message::assistant(assistant.reply.content.clone()));
            log.push(RunnerLogEntry::AssistantReply {
                turn: turns + 1,
                handler: assistant.handler,
                content: assistant.reply.content.clone(),
            });

            let reply = self
                .environment_dispatcher
                .dispatch(&mut self.environment, &transcript)?;
            turns += 1;
            self.record_resolution(turns, &mut transcript, &mut actions, &mut log);

            tracing::info!(
                turn = turns,
                handler = reply.handler,
                reply = reply.reply.content.as_str(),
                "environment replied"
            );
            let Dispatched { handler, reply } = reply;
            log.push(RunnerLogEntry::EnvironmentReply {
                turn: turns,
                handler,
                content: reply.content.clone(),
            });
            transcript.push(Message::user(reply.content));

            if reply.ends_conversation {
                break self.finished_outcome();
            }
        };

        let episode_outcome = self.environment.episode().outcome();
        if let Some(EpisodeOutcome::ForcedFailure(reason)) = episode_outcome {
            tracing::warn!(reason = ?reason, "episode ended early");
        }
        tracing::info!(outcome = outcome.as_str(), turns, "episode run complete");

        Ok(EpisodeReport {
            game_file: reset.game_file,
            outcome,
            episode_outcome,
            turns,
            actions,
            log,
            transcript,
        })
    }

    /// Examples for the game's task family followed by the task message. Without
    /// a game file there are no examples and the base prompt leads the task
    /// message instead.
    fn seed_transcript(
        &self,
        game_file: Option<&str>,
        observation: &str,
    ) -> Result<Vec<Message>, RunnerError> {
        let task = initial_task_message(observation);
        match game_file {
            Some(game_file) => {
                let mut transcript = to_conversation(&self.prompts.examples_for_game_file(game_file)?);
                transcript.push(Message::user(task));
                Ok(transcript)
            }
            None => Ok(vec![Message::user(format!(
                "{}{task}",
                self.prompts.base_prompt()
            ))]),
        }
    }

    fn record_resolution(
        &mut self,
        turn: u32,
        transcript: &mut Vec<Message>,
        actions: &mut Vec<String>,
        log: &mut Vec<RunnerLogEntry>,
    ) {
        let Some(resolution) = self.environment.take_resolution() else {
            return;
        };
        if self.settings.rewrite_history {
            *transcript = replace_last_action(
                transcript,
                self.settings.action_marker.as_str(),
                resolution.action.as_str(),
            );
        }
        actions.push(resolution.action.clone());
        log.push(RunnerLogEntry::ActionResolved {
            turn,
            matched: resolution.is_match(),
            cleaned: resolution.cleaned,
            action: resolution.action,
            best_score: resolution.best_score,
        });
    }

    fn finished_outcome(&self) -> RunOutcome {
        match self.environment.episode().outcome() {
            Some(EpisodeOutcome::Success) => RunOutcome::Success,
            Some(_) => RunOutcome::Failure,
            None => RunOutcome::Terminated,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum RunnerError {
    Prompt(PromptError),
    Turn(TurnError),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Prompt(err) => write!(f, "prompt selection failed: {err}"),
            RunnerError::Turn(err) => write!(f, "turn failed: {err}"),
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunnerError::Prompt(err) => Some(err),
            RunnerError::Turn(err) => Some(err),
        }
    }
}

impl From<PromptError> for RunnerError {
    fn from(err: PromptError) -> Self {
        RunnerError::Prompt(err)
    }
}

impl From<TurnError> for RunnerError {
    fn from(err: TurnError) -> Self {
        RunnerError::Turn(err)
    }
}
