//! Language-model gateway.
//!
//! A [`LlmBackend`] performs one request against a remote model with one
//! credential and classifies the failure: [`LlmError::RateLimited`] when
//! the upstream signals a quota or rate limit, [`LlmError::Upstream`] for
//! everything else. The classification happens once, where the HTTP
//! response is parsed; nothing downstream inspects error strings.
//!
//! [`LlmGateway`] owns the credential pool and runs the rotation policy
//! for each call:
//!
//! ```text
//! SELECT  random untried credential (preferred one first, if given)
//! INVOKE  backend
//!   ok            -> clean response, return text
//!   RateLimited   -> mark tried; SELECT again
//!                    pool exhausted -> sleep backoff, new rotation
//!   other error   -> return Upstream immediately
//! after max_rotations rotations -> AllCredentialsExhausted
//! ```

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::models::Credential;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error(
        "all {credentials} credential(s) were rate limited across {rotations} rotation(s); try again later"
    )]
    AllCredentialsExhausted { credentials: usize, rotations: u32 },
}

/// One piece of structured model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    /// Opaque reasoning signature or similar metadata; never shown.
    Signature(String),
    /// Any other non-text block, kept by kind name for logging.
    Other(String),
}

/// Raw model output before cleaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmResponse {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl LlmResponse {
    /// Concatenate the text-bearing parts in order, dropping metadata.
    pub fn clean(&self) -> String {
        match self {
            LlmResponse::Text(text) => text.trim().to_string(),
            LlmResponse::Blocks(blocks) => {
                let mut out = String::new();
                for block in blocks {
                    if let ContentBlock::Text(text) = block {
                        out.push_str(text);
                    }
                }
                out.trim().to_string()
            }
        }
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Send `prompt` using `credential`. Implementations must map rate-limit
    /// responses to [`LlmError::RateLimited`] and every other failure,
    /// timeouts included, to [`LlmError::Upstream`].
    async fn invoke(&self, prompt: &str, credential: &Credential) -> Result<LlmResponse, LlmError>;
}

/// Status codes and body markers that identify a rate-limit response.
pub(crate) fn classify_failure(provider: &str, status: u16, body: &str) -> LlmError {
    const MARKERS: [&str; 4] = [
        "RESOURCE_EXHAUSTED",
        "rate_limit_error",
        "rate_limit_exceeded",
        "insufficient_quota",
    ];
    let message = format!("{} returned {}: {}", provider, status, truncate(body, 300));
    if status == 429 || MARKERS.iter().any(|m| body.contains(m)) {
        LlmError::RateLimited(message)
    } else {
        LlmError::Upstream(message)
    }
}

pub(crate) fn transport_failure(provider: &str, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Upstream(format!("{} request timed out", provider))
    } else {
        LlmError::Upstream(format!("{} request failed: {}", provider, err))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

pub(crate) fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Build the backend named by `llm.provider`.
pub fn create_backend(config: &LlmConfig) -> Result<Box<dyn LlmBackend>> {
    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiBackend::new(config)?)),
        "anthropic" => Ok(Box::new(AnthropicBackend::new(config)?)),
        "openai" => Ok(Box::new(OpenAiBackend::new(config)?)),
        other => bail!("Unknown llm provider: '{}'", other),
    }
}

/// Rotation limits for one [`LlmGateway::generate`] call.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub max_rotations: u32,
    /// Pause before the second rotation; doubles before each later one.
    pub backoff: Duration,
}

impl RotationPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_rotations: config.max_rotations.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    fn delay_before(&self, rotation: u32) -> Duration {
        self.backoff * (1u32 << (rotation.saturating_sub(1)).min(5))
    }
}

pub struct LlmGateway {
    backend: Box<dyn LlmBackend>,
    credentials: Vec<Credential>,
    policy: RotationPolicy,
}

impl LlmGateway {
    pub fn new(
        backend: Box<dyn LlmBackend>,
        credentials: Vec<Credential>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            backend,
            credentials,
            policy,
        }
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Generate a cleaned completion for `prompt`, rotating credentials on
    /// rate limits. `preferred` names a credential label to try first.
    pub async fn generate(&self, prompt: &str, preferred: Option<&str>) -> Result<String, LlmError> {
        let total = self.credentials.len();
        let rotations = self.policy.max_rotations.max(1);
        if total == 0 {
            return Err(LlmError::AllCredentialsExhausted {
                credentials: 0,
                rotations: 0,
            });
        }

        for rotation in 0..rotations {
            if rotation > 0 {
                let delay = self.policy.delay_before(rotation);
                tracing::warn!(
                    rotation,
                    ?delay,
                    "every credential is rate limited; backing off before the next rotation"
                );
                tokio::time::sleep(delay).await;
            }

            let mut untried: Vec<usize> = (0..total).collect();
            while let Some(idx) = self.select(&mut untried, preferred) {
                let credential = &self.credentials[idx];
                tracing::debug!(
                    backend = self.backend.name(),
                    credential = %credential.label,
                    rotation,
                    "invoking model"
                );

                match self.backend.invoke(prompt, credential).await {
                    Ok(response) => {
                        let text = response.clean();
                        if text.is_empty() {
                            return Err(LlmError::Upstream(format!(
                                "{} returned no text content",
                                self.backend.name()
                            )));
                        }
                        return Ok(text);
                    }
                    Err(LlmError::RateLimited(reason)) => {
                        tracing::info!(
                            credential = %credential.label,
                            remaining = untried.len(),
                            %reason,
                            "credential rate limited"
                        );
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        Err(LlmError::AllCredentialsExhausted {
            credentials: total,
            rotations,
        })
    }

    /// Remove and return the next credential index to try this rotation.
    fn select(&self, untried: &mut Vec<usize>, preferred: Option<&str>) -> Option<usize> {
        if untried.is_empty() {
            return None;
        }
        if let Some(label) = preferred {
            if let Some(pos) = untried
                .iter()
                .position(|&i| self.credentials[i].label == label)
            {
                return Some(untried.swap_remove(pos));
            }
        }
        let pos = rand::thread_rng().gen_range(0..untried.len());
        Some(untried.swap_remove(pos))
    }
}
