use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Instruction prepended to every health prompt so the answer is easy to parse.
pub const ANSWER_INSTRUCTION: &str = "Answer 'yes' or 'no'. ";

#[derive(Serialize, Debug)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    response: String,
}

/// How a model answered a yes/no question.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelVerdict {
    Yes,
    No,
    /// No "yes" anywhere and no standalone "no" word.
    Unclear,
}

impl ModelVerdict {
    /// "yes" is matched as a substring, like `check_model`. "no" must be a whole
    /// word, so "not", "cannot" and "unknown" stay unclear.
    pub fn from_answer(answer: &str) -> Self {
        let lower = answer.to_lowercase();
        if lower.contains("yes") {
            ModelVerdict::Yes
        } else if lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "no")
        {
            ModelVerdict::No
        } else {
            ModelVerdict::Unclear
        }
    }
}

impl std::fmt::Display for ModelVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVerdict::Yes => write!(f, "yes"),
            ModelVerdict::No => write!(f, "no"),
            ModelVerdict::Unclear => write!(f, "unclear"),
        }
    }
}

/// Failures that prevented getting an answer at all. Never a negative answer.
#[derive(thiserror::Error, Debug)]
pub enum HealthError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("ollama API returned non-200 status code: {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid generate response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client for the generate API of a serving instance.
#[derive(Clone, Debug)]
pub struct ModelHealthClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl ModelHealthClient {
    pub fn new(timeout: Duration) -> Result<Self, HealthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| HealthError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask `model` at `address` (host:port) the yes/no question `prompt`.
    ///
    /// `Ok(true)` only when the answer contains "yes". An unreachable instance,
    /// a non-200 status, a timeout or an undecodable body is an `Err`.
    pub async fn check_model(
        &self,
        address: &str,
        model: &str,
        prompt: &str,
    ) -> Result<bool, HealthError> {
        Ok(self.ask_model(address, model, prompt).await? == ModelVerdict::Yes)
    }

    /// Same request as [`check_model`](Self::check_model) but keeps an unclear
    /// answer apart from an explicit "no".
    #[instrument(skip(self, prompt), fields(%address, %model))]
    pub async fn ask_model(
        &self,
        address: &str,
        model: &str,
        prompt: &str,
    ) -> Result<ModelVerdict, HealthError> {
        let url = format!("http://{}/api/generate", address);
        let payload = GenerateRequest {
            model,
            prompt: format!("{}{}", ANSWER_INSTRUCTION, prompt),
            stream: false,
        };

        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(HealthError::Status(status));
        }

        let body = resp.bytes().await.map_err(|e| self.request_error(&url, e))?;
        let parsed: GenerateResponse = serde_json::from_slice(&body)?;
        let verdict = ModelVerdict::from_answer(&parsed.response);
        debug!(response = %parsed.response, %verdict, "ollama response");
        Ok(verdict)
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> HealthError {
        if e.is_timeout() {
            HealthError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            HealthError::Transport {
                url: url.to_string(),
                source: e,
            }
        }
    }
}
