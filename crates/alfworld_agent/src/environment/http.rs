use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{EnvError, ResetOutcome, StepOutcome, TextEnvironment};
use crate::config::EnvSetupConfig;
use crate::transport::{build_client, join_url, post_json};

/// Blocking JSON client for an ALFWorld game server.
///
/// `POST {base}/reset` starts the configured game file, `POST {base}/step`
/// submits one command.
#[derive(Debug, Clone)]
pub struct HttpEnvironment {
    base_url: String,
    game_file: String,
    setup: EnvSetupConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ResetRequest<'a> {
    game_file: &'a str,
    split: &'a str,
    seed: u64,
    config: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct StepRequest<'a> {
    action: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResetResponse {
    observation: String,
    #[serde(default)]
    admissible_commands: Vec<String>,
    #[serde(default)]
    game_file: Option<String>,
}

impl HttpEnvironment {
    pub fn new(
        base_url: &str,
        game_file: impl Into<String>,
        setup: EnvSetupConfig,
        timeout_ms: u64,
    ) -> Result<Self, EnvError> {
        let client = build_client(timeout_ms)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            game_file: game_file.into(),
            setup,
            client,
        })
    }

    pub fn game_file(&self) -> &str {
        self.game_file.as_str()
    }

    fn post<T: Serialize, R: DeserializeOwned>(&self, path: &str, body: &T) -> Result<R, EnvError> {
        let url = join_url(&self.base_url, path);
        tracing::debug!(url = url.as_str(), "posting to game server");
        Ok(post_json(self.client.post(url), body)?)
    }
}

impl TextEnvironment for HttpEnvironment {
    fn reset(&mut self) -> Result<ResetOutcome, EnvError> {
        let request = ResetRequest {
            game_file: self.game_file.as_str(),
            split: self.setup.split(),
            seed: self.setup.seed(),
            config: self.setup.document(),
        };
        let response: ResetResponse = self.post("reset", &request)?;
        Ok(ResetOutcome {
            observation: response.observation,
            admissible_commands: response.admissible_commands,
            game_file: response.game_file.or_else(|| Some(self.game_file.clone())),
        })
    }

    fn step(&mut self, action: &str) -> Result<StepOutcome, EnvError> {
        self.post("step", &StepRequest { action })
    }
}
