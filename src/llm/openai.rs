//! OpenAI-compatible client for streaming completions and embeddings.
//!
//! Works against any endpoint speaking the `/chat/completions` +
//! `/embeddings` dialect; the base URL is configurable so local inference
//! servers work too.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::{LlmError, ParameterError};
use crate::llm::{CompletionRequest, Embedder, LanguageModel, TokenStream};
use crate::params::ParameterStore;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        OpenAiClient {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
        }
    }

    /// Builds a client with credentials pulled from the parameter store.
    ///
    /// Reads `openai_api_key` (decrypted) and, optionally, `openai_base_url`.
    pub async fn from_parameter_store(
        params: &dyn ParameterStore,
        embedding_model: impl Into<String>,
    ) -> Result<Self, ParameterError> {
        let api_key = params.get_parameter("openai_api_key", true).await?;
        let base_url = params
            .get_parameter("openai_base_url", false)
            .await
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, api_key, embedding_model))
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<TokenStream, LlmError> {
        let body = serde_json::json!({
            "model": request.model,
            "stream": true,
            "reasoning_effort": request.effort.as_str(),
            "messages": [
                {"role": "system", "content": request.instructions},
                {"role": "user", "content": request.input},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Request(err.to_string()))?
            .error_for_status()
            .map_err(|err| LlmError::Request(err.to_string()))?;

        // SSE framing: split on newlines, take `data:` payloads, stop at
        // [DONE]. The byte buffer carries partial lines across chunks so
        // multi-byte characters never get split mid-sequence.
        let mut pending: Vec<u8> = Vec::new();
        let stream = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<String, LlmError>> {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => return vec![Err(LlmError::Stream(err.to_string()))],
                };
                pending.extend_from_slice(&bytes);

                let mut out = Vec::new();
                while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim_end();
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            let delta = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|choice| choice.delta.content);
                            if let Some(delta) = delta {
                                if !delta.is_empty() {
                                    out.push(Ok(delta));
                                }
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "skipping unparseable stream event");
                        }
                    }
                }
                out
            })
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Request(err.to_string()))?
            .error_for_status()
            .map_err(|err| LlmError::Request(err.to_string()))?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Protocol(err.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| LlmError::Protocol("embedding response had no data".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}
