//! Session states behind the two dispatchers and the handlers that need them.

use crate::conversation::Message;
use crate::dispatch::{
    HandlerReply, TerminateNoticeHandler, TerminationRequestHandler, TurnDispatcher, TurnError,
    TurnHandler,
};
use crate::environment::{ResetOutcome, TextEnvironment};
use crate::episode::{normalize_observation, EpisodeLimits, EpisodeState, TurnVerdict};
use crate::llm::{LlmCompletionClient, LlmCompletionRequest};
use crate::resolver::{ActionResolver, Resolution};

// ============================================================================
// Environment Session
// ============================================================================

/// Environment-side state: the game, the resolver and the episode counters.
#[derive(Debug)]
pub struct EnvironmentSession<E> {
    env: E,
    resolver: ActionResolver,
    limits: EpisodeLimits,
    episode: EpisodeState,
    admissible: Vec<String>,
    game_file: Option<String>,
    started: bool,
    last_resolution: Option<Resolution>,
}

impl<E: TextEnvironment> EnvironmentSession<E> {
    pub fn new(env: E, resolver: ActionResolver, limits: EpisodeLimits) -> Self {
        let episode = EpisodeState::new(limits.clone());
        Self {
            env,
            resolver,
            limits,
            episode,
            admissible: Vec::new(),
            game_file: None,
            started: false,
            last_resolution: None,
        }
    }

    /// Starts a new episode with fresh counters.
    pub fn reset(&mut self) -> Result<ResetOutcome, TurnError> {
        let outcome = self.env.reset()?;
        self.episode = EpisodeState::new(self.limits.clone());
        self.admissible = outcome.admissible_commands.clone();
        self.game_file = outcome.game_file.clone();
        self.started = true;
        self.last_resolution = None;
        tracing::info!(
            game_file = self.game_file.as_deref().unwrap_or("-"),
            admissible = self.admissible.len(),
            "episode reset"
        );
        Ok(outcome)
    }

    /// Resolves the candidate text, submits it and records the step.
    ///
    /// Once the episode has an outcome the environment is no longer stepped
    /// and the stored outcome is returned again.
    pub fn step(&mut self, candidate: &str) -> Result<TurnVerdict, TurnError> {
        if !self.started {
            return Err(TurnError::Environment(crate::environment::EnvError::NotStarted));
        }
        if let Some(outcome) = self.episode.outcome() {
            return Ok(TurnVerdict::Finished(outcome));
        }

        let resolution = self.resolver.resolve_detailed(candidate, &self.admissible);
        let step = self.env.step(&resolution.action)?;
        let observation = normalize_observation(&step.observation, &resolution.action);
        let verdict = self
            .episode
            .record_step(&resolution.action, &observation, step.done, step.won);

        tracing::debug!(
            action = resolution.action.as_str(),
            matched = resolution.is_match(),
            done = step.done,
            won = step.won,
            repeats = self.episode.repeat_count(),
            invalid = self.episode.invalid_count(),
            "environment step"
        );
        if let Some(outcome) = verdict.outcome() {
            tracing::info!(outcome = ?outcome, steps = self.episode.steps(), "episode finished");
        }

        self.admissible = step.admissible_commands;
        self.last_resolution = Some(resolution);
        Ok(verdict)
    }

    pub fn episode(&self) -> &EpisodeState {
        &self.episode
    }

    pub fn admissible_commands(&self) -> &[String] {
        &self.admissible
    }

    pub fn game_file(&self) -> Option<&str> {
        self.game_file.as_deref()
    }

    pub fn resolver(&self) -> &ActionResolver {
        &self.resolver
    }

    /// Resolution of the most recent step, cleared once taken.
    pub fn take_resolution(&mut self) -> Option<Resolution> {
        self.last_resolution.take()
    }

    pub fn environment(&self) -> &E {
        &self.env
    }
}

/// Environment side: resolve the assistant's text and step the game.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentStepHandler;

impl<E: TextEnvironment> TurnHandler<EnvironmentSession<E>> for EnvironmentStepHandler {
    fn name(&self) -> &'static str {
        "environment_step"
    }

    fn handle(
        &self,
        state: &mut EnvironmentSession<E>,
        history: &[Message],
    ) -> Result<Option<HandlerReply>, TurnError> {
        let last = history.last().ok_or(TurnError::EmptyHistory)?;
        let verdict = state.step(&last.content)?;
        Ok(Some(HandlerReply::text(verdict.reply())))
    }
}

/// Termination requests first, then environment steps.
pub fn environment_dispatcher<E: TextEnvironment + 'static>(
) -> TurnDispatcher<EnvironmentSession<E>> {
    TurnDispatcher::new("environment")
        .with_handler(TerminationRequestHandler)
        .with_handler(EnvironmentStepHandler)
}

// ============================================================================
// Assistant Session
// ============================================================================

/// Assistant-side state: the completion client and its request settings.
#[derive(Debug)]
pub struct AssistantSession<C> {
    client: C,
    model: String,
    system_prompt: String,
    completions: u32,
}

impl<C: LlmCompletionClient> AssistantSession<C> {
    pub fn new(client: C, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: system_prompt.into(),
            completions: 0,
        }
    }

    pub fn complete(&mut self, history: &[Message]) -> Result<String, TurnError> {
        let request = LlmCompletionRequest {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: history.to_vec(),
        };
        let result = self.client.complete(&request)?;
        self.completions += 1;
        tracing::debug!(
            model = result.model.as_deref().unwrap_or(self.model.as_str()),
            total_tokens = result.total_tokens,
            "completion received"
        );
        Ok(result.output)
    }

    /// Number of completions served by the model.
    pub fn completions(&self) -> u32 {
        self.completions
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Assistant side: ask the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionReplyHandler;

impl<C: LlmCompletionClient> TurnHandler<AssistantSession<C>> for CompletionReplyHandler {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn handle(
        &self,
        state: &mut AssistantSession<C>,
        history: &[Message],
    ) -> Result<Option<HandlerReply>, TurnError> {
        state.complete(history).map(|text| Some(HandlerReply::text(text)))
    }
}

/// Terminate notices first, then the model.
pub fn assistant_dispatcher<C: LlmCompletionClient + 'static>() -> TurnDispatcher<AssistantSession<C>>
{
    TurnDispatcher::new("assistant")
        .with_handler(TerminateNoticeHandler)
        .with_handler(CompletionReplyHandler)
}
