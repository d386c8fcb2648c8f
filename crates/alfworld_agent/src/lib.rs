pub mod bleu;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod environment;
pub mod episode;
pub mod llm;
pub mod prompts;
pub mod resolver;
pub mod runner;
pub mod session;
mod transport;

// Action resolution
pub use bleu::{sentence_bleu, BLEU_MAX_ORDER};
pub use resolver::{
    clean_candidate, resolve_action, ActionResolver, Resolution, DEFAULT_ACTION_MARKER,
    DEFAULT_MATCH_THRESHOLD,
};

// Episode bookkeeping
pub use episode::{
    normalize_observation, EpisodeLimits, EpisodeOutcome, EpisodeState, ForcedFailureReason,
    TurnVerdict, DEFAULT_MAX_INVALID_ACTIONS, DEFAULT_MAX_REPEATED_ACTIONS,
};

// Conversation and turn dispatch
pub use conversation::{
    is_termination_message, replace_last_action, to_conversation, Message, Role, TERMINATE_REPLY,
};
pub use dispatch::{
    Dispatched, HandlerReply, TerminateNoticeHandler, TerminationRequestHandler, TurnDispatcher,
    TurnError, TurnHandler,
};
pub use session::{
    assistant_dispatcher, environment_dispatcher, AssistantSession, CompletionReplyHandler,
    EnvironmentSession, EnvironmentStepHandler,
};

// Collaborators
pub use environment::{
    discover_episode_scripts, load_episode_script, EnvError, EpisodeScript, HttpEnvironment,
    ResetOutcome, ScriptedEnvironment, StepOutcome, TextEnvironment,
};
pub use llm::{
    LlmClientError, LlmCompletionClient, LlmCompletionRequest, LlmCompletionResult,
    OpenAiChatCompletionClient, ScriptedCompletionClient,
};

// Configuration and prompts
pub use config::{
    ConfigError, ConfigSource, EnvSetupConfig, EpisodeSettings, LlmConfig,
    DEFAULT_CONFIG_FILE_NAME,
};
pub use prompts::{initial_task_message, PromptError, PromptLibrary, TaskFamily};

pub use runner::{EpisodeReport, EpisodeRunner, RunOutcome, RunnerError, RunnerLogEntry};
