use std::env;
use std::path::PathBuf;
use std::process;

use alfworld_agent::{
    AssistantSession, ConfigSource, EnvSetupConfig, EpisodeRunner, EpisodeSettings,
    HttpEnvironment, LlmCompletionClient, LlmConfig, OpenAiChatCompletionClient, PromptLibrary,
    RunnerLogEntry, ScriptedCompletionClient, ScriptedEnvironment, TextEnvironment,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvironmentSource {
    Script(PathBuf),
    Server { url: String, game_file: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    environment: EnvironmentSource,
    config: Option<PathBuf>,
    env_config: Option<PathBuf>,
    prompts: Option<PathBuf>,
    base_prompt: Option<PathBuf>,
    replies: Option<PathBuf>,
    rewrite_history: bool,
    json: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let options = match parse_options(args.iter().skip(1).map(|arg| arg.as_str())) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            print_help();
            process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let source = match options.config.as_deref() {
        Some(path) => ConfigSource::from_config_file(path),
        None => ConfigSource::from_default_sources(),
    };
    let source = source.unwrap_or_else(|err| fail("failed to load config", err));
    let settings = resolve_settings(&options, &source)
        .unwrap_or_else(|err| fail("invalid episode settings", err));

    let prompts = PromptLibrary::load(&settings.prompts_path, &settings.base_prompt_path)
        .unwrap_or_else(|err| fail("failed to load prompts", err));
    let env = build_environment(&options, &settings);
    let assistant = build_assistant(&options, &source);

    let mut runner = EpisodeRunner::new(env, assistant, prompts, settings);
    let report = runner
        .run()
        .unwrap_or_else(|err| fail("episode failed", err));

    if options.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => fail("failed to encode report", err),
        }
    } else {
        for entry in &report.log {
            match entry {
                RunnerLogEntry::AssistantReply { turn, handler, content } => {
                    println!("turn={turn} assistant[{handler}]: {}", content.trim_end());
                }
                RunnerLogEntry::ActionResolved {
                    turn,
                    action,
                    matched,
                    ..
                } => {
                    println!("turn={turn} action={action:?} matched={matched}");
                }
                RunnerLogEntry::EnvironmentReply { turn, handler, content } => {
                    println!("turn={turn} environment[{handler}]: {}", content.trim_end());
                }
            }
        }
        println!("game_file: {}", report.game_file.as_deref().unwrap_or("-"));
        println!("outcome: {}", report.outcome.as_str());
        println!("turns: {}", report.turns);
        println!("actions: {}", report.actions.len());
    }

    if !report.outcome.is_success() {
        process::exit(1);
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{context}: {err}");
    process::exit(1);
}

fn resolve_settings(
    options: &CliOptions,
    source: &ConfigSource,
) -> Result<EpisodeSettings, alfworld_agent::ConfigError> {
    let mut settings = EpisodeSettings::from_source(source)?;
    if let Some(path) = options.env_config.clone() {
        settings.env_config_path = path;
    }
    if let Some(path) = options.prompts.clone() {
        settings.prompts_path = path;
    }
    if let Some(path) = options.base_prompt.clone() {
        settings.base_prompt_path = path;
    }
    if options.rewrite_history {
        settings.rewrite_history = true;
    }
    Ok(settings)
}

fn build_environment(options: &CliOptions, settings: &EpisodeSettings) -> Box<dyn TextEnvironment> {
    match &options.environment {
        EnvironmentSource::Script(path) => {
            let env = ScriptedEnvironment::from_file(path)
                .unwrap_or_else(|err| fail("failed to load episode script", err));
            Box::new(env)
        }
        EnvironmentSource::Server { url, game_file } => {
            let setup = EnvSetupConfig::load(&settings.env_config_path)
                .unwrap_or_else(|err| fail("failed to load environment config", err));
            let env = HttpEnvironment::new(url, game_file.clone(), setup, settings.env_timeout_ms)
                .unwrap_or_else(|err| fail("failed to create environment client", err));
            Box::new(env)
        }
    }
}

fn build_assistant(
    options: &CliOptions,
    source: &ConfigSource,
) -> AssistantSession<Box<dyn LlmCompletionClient>> {
    if let Some(path) = options.replies.as_deref() {
        let client: Box<dyn LlmCompletionClient> = Box::new(
            ScriptedCompletionClient::from_file(path)
                .unwrap_or_else(|err| fail("failed to load scripted replies", err)),
        );
        return AssistantSession::new(client, "scripted", "");
    }

    let config =
        LlmConfig::from_source(source).unwrap_or_else(|err| fail("invalid llm config", err));
    let client: Box<dyn LlmCompletionClient> = Box::new(
        OpenAiChatCompletionClient::from_config(&config)
            .unwrap_or_else(|err| fail("failed to create llm client", err)),
    );
    AssistantSession::new(client, config.model, config.system_prompt)
}

fn parse_options<'a>(args: impl Iterator<Item = &'a str>) -> Result<CliOptions, String> {
    let mut script: Option<PathBuf> = None;
    let mut server: Option<String> = None;
    let mut game_file: Option<String> = None;
    let mut config = None;
    let mut env_config = None;
    let mut prompts = None;
    let mut base_prompt = None;
    let mut replies = None;
    let mut rewrite_history = false;
    let mut json = false;

    let mut iter = args.peekable();
    while let Some(arg) = iter.next() {
        match arg {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--script" => script = Some(path_value(&mut iter, arg)?),
            "--server" => server = Some(string_value(&mut iter, arg, "a url")?),
            "--game-file" => game_file = Some(string_value(&mut iter, arg, "a path")?),
            "--config" => config = Some(path_value(&mut iter, arg)?),
            "--env-config" => env_config = Some(path_value(&mut iter, arg)?),
            "--prompts" => prompts = Some(path_value(&mut iter, arg)?),
            "--base-prompt" => base_prompt = Some(path_value(&mut iter, arg)?),
            "--replies" => replies = Some(path_value(&mut iter, arg)?),
            "--rewrite-history" => rewrite_history = true,
            "--json" => json = true,
            _ => return Err(format!("unexpected argument: {arg}")),
        }
    }

    let environment = match (script, server, game_file) {
        (Some(path), None, None) => EnvironmentSource::Script(path),
        (None, Some(url), Some(game_file)) => EnvironmentSource::Server { url, game_file },
        (None, Some(_), None) => return Err("--server requires --game-file".to_string()),
        (None, None, Some(_)) => return Err("--game-file requires --server".to_string()),
        (None, None, None) => return Err("either --script or --server is required".to_string()),
        _ => return Err("--script cannot be combined with --server or --game-file".to_string()),
    };

    Ok(CliOptions {
        environment,
        config,
        env_config,
        prompts,
        base_prompt,
        replies,
        rewrite_history,
        json,
    })
}

fn string_value<'a>(
    iter: &mut impl Iterator<Item = &'a str>,
    flag: &str,
    what: &str,
) -> Result<String, String> {
    iter.next()
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("{flag} requires {what}"))
}

fn path_value<'a>(iter: &mut impl Iterator<Item = &'a str>, flag: &str) -> Result<PathBuf, String> {
    string_value(iter, flag, "a path").map(PathBuf::from)
}

fn print_help() {
    println!(
        "Usage: alfworld_episode (--script <episode.yaml> | --server <url> --game-file <path>) [options]"
    );
    println!("Options:");
    println!("  --script <path>       Play a scripted episode file (YAML/JSON)");
    println!("  --server <url>        ALFWorld game server base url");
    println!("  --game-file <path>    Game file to play on the server");
    println!("  --config <path>       Agent config file (default: config.toml, then env)");
    println!("  --env-config <path>   Environment setup YAML (default: base_config.yaml)");
    println!("  --prompts <path>      Example prompts JSON (default: alfworld_react.json)");
    println!("  --base-prompt <path>  Base prompt text (default: base.txt)");
    println!("  --replies <path>      Replay assistant replies from a YAML/JSON list");
    println!("  --rewrite-history     Rewrite assistant messages with the resolved action");
    println!("  --json                Print the episode report as JSON");
}
