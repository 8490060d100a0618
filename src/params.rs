//! Credential/parameter store contract plus an environment-backed
//! implementation for local runs.

use async_trait::async_trait;

use crate::error::ParameterError;

#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetches a named parameter, decrypting when requested.
    async fn get_parameter(&self, name: &str, with_decryption: bool)
    -> Result<String, ParameterError>;
}

/// Reads parameters from process environment variables; `.env` files are
/// honored when present. Names are upper-cased (`openai_api_key` →
/// `OPENAI_API_KEY`).
#[derive(Clone, Debug, Default)]
pub struct EnvParameterStore;

impl EnvParameterStore {
    pub fn new() -> Self {
        let _ = dotenvy::dotenv();
        EnvParameterStore
    }
}

#[async_trait]
impl ParameterStore for EnvParameterStore {
    async fn get_parameter(
        &self,
        name: &str,
        _with_decryption: bool,
    ) -> Result<String, ParameterError> {
        let key = name.to_uppercase().replace(['-', '.'], "_");
        std::env::var(&key).map_err(|_| ParameterError {
            name: name.to_string(),
            reason: format!("environment variable {key} is not set"),
        })
    }
}
