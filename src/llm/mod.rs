//! Contracts for the language-model service: streaming completion, text
//! embedding, and the externally-trained intent predictor.

pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::error::LlmError;
use crate::types::Intent;

/// Reasoning-effort knob; only `minimal` is relied upon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReasoningEffort {
    #[default]
    Minimal,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
        }
    }
}

/// A single streaming completion request: system instructions plus one user
/// input.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub instructions: String,
    pub input: String,
    pub effort: ReasoningEffort,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        instructions: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        CompletionRequest {
            model: model.into(),
            instructions: instructions.into(),
            input: input.into(),
            effort: ReasoningEffort::Minimal,
        }
    }
}

/// Server-sent partial text deltas.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Streaming chat-completion service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Opens a streaming completion; items are partial text deltas.
    async fn stream_completion(&self, request: CompletionRequest)
    -> Result<TokenStream, LlmError>;

    /// Runs a completion to the end and returns the full text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let mut stream = self.stream_completion(request).await?;
        let mut out = String::new();
        while let Some(delta) = stream.next().await {
            out.push_str(&delta?);
        }
        Ok(out)
    }
}

/// Embedding endpoint returning a float vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Model identifier persisted alongside query analytics.
    fn model_name(&self) -> &str;
}

/// Classifies a query embedding into a chat intent.
///
/// The predictor itself is trained and shipped outside this crate; anything
/// it cannot place maps to [`Intent::Unknown`].
pub trait IntentPredictor: Send + Sync {
    fn predict(&self, embedding: &[f32]) -> Intent;
}

/// Cosine similarity between two vectors; zero when either is degenerate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
