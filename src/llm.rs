use crate::config::IntakeConfig;
use crate::error::{IntakeError, Result};
use crate::naming::NamingOracle;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Chat-completions client used as the naming oracle
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.0,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Bound every request by `timeout` at the HTTP layer as well
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    /// Build a client when an API key is configured
    pub fn from_config(config: &IntakeConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.openai_api_key.clone() else {
            return Ok(None);
        };
        let client = Self::new(api_key, config.naming_model.clone(), config.openai_base_url.clone())
            .with_temperature(config.naming_temperature)
            .with_timeout(config.naming_timeout)?;
        Ok(Some(client))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
        });

        debug!("Calling {} for naming plan", self.model);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| IntakeError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IntakeError::Llm(format!("LLM API returned {}: {}", status, text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IntakeError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| IntakeError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl NamingOracle for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.call_llm(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_key() {
        let config = IntakeConfig::default();
        assert!(LlmClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_from_config_with_key() {
        let config = IntakeConfig {
            openai_api_key: Some("sk-test".to_string()),
            openai_base_url: "http://localhost:9999/v1/".to_string(),
            ..IntakeConfig::default()
        };
        let client = LlmClient::from_config(&config).unwrap().unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.base_url, "http://localhost:9999/v1");
    }
}
