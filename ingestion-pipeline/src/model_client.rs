//! Model invocation (spec.md §4.C step 5, §5 "Cancellation / timeouts").
//! Grounded on the teacher's `enricher.rs` request-building shape
//! (`CreateChatCompletionRequestArgs` + `response_format` + first-choice
//! content extraction), with the `response_format` pinned to `json_object`
//! rather than `json_schema` (spec.md §6: "client-side validation is
//! authoritative") and a manual exponential-backoff retry loop matching the
//! teacher's `IngestionPipeline::retry_delay` shape, generalized to the
//! exact `min(2^attempt * 2, 30)` schedule spec.md §5 specifies.

use std::time::{Duration, Instant};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use common::{error::AppError, utils::config::AppConfig};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct ChatStats {
    pub latency_ms: u64,
    pub retries_count: u32,
}

pub struct ModelClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl ModelClient {
    pub fn new(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(config.vllm_base_url.clone())
            .with_api_key(config.vllm_api_key.clone());

        Self {
            client: Client::with_config(openai_config),
            model: config.vllm_model.clone(),
            timeout: Duration::from_secs(config.model_timeout_seconds),
            max_retries: config.model_max_retries,
        }
    }

    /// spec.md §5: `min(2^attempt * 2, 30)` seconds, `attempt` 0-indexed.
    fn backoff_for(attempt: u32) -> Duration {
        let seconds = 2_u64.saturating_pow(attempt).saturating_mul(2).min(30);
        Duration::from_secs(seconds)
    }

    /// Calls the chat endpoint with `response_format=json_object`, the
    /// requested `max_tokens`, and temperature 0.3, retrying transient
    /// failures (timeout, I/O, 5xx/429 surfaced via `OpenAIError`) up to
    /// `max_retries` times. Returns the raw response text (still untyped
    /// JSON) plus latency/retry stats for the job's `stats{}` document.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, ChatStats), AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(user_prompt).into(),
            ])
            .response_format(ResponseFormat::JsonObject)
            .max_tokens(max_tokens)
            .temperature(0.3)
            .build()?;

        let started = Instant::now();
        let mut retries_count = 0;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let wait = Self::backoff_for(attempt - 1);
                warn!(attempt, wait_secs = wait.as_secs(), "retrying model call");
                tokio::time::sleep(wait).await;
                retries_count = attempt;
            }

            match tokio::time::timeout(self.timeout, self.client.chat().create(request.clone())).await {
                Ok(Ok(response)) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|choice| choice.message.content.clone())
                        .ok_or_else(|| AppError::LLMParsing("no content in model response".into()))?;

                    return Ok((
                        content,
                        ChatStats {
                            latency_ms: started.elapsed().as_millis() as u64,
                            retries_count,
                        },
                    ));
                }
                Ok(Err(err)) => last_err = Some(AppError::from(err)),
                Err(_) => {
                    last_err = Some(AppError::Processing(format!(
                        "model call timed out after {}s",
                        self.timeout.as_secs()
                    )))
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::Processing("model call exhausted retries".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_follows_spec_formula() {
        assert_eq!(ModelClient::backoff_for(0), Duration::from_secs(2));
        assert_eq!(ModelClient::backoff_for(1), Duration::from_secs(4));
        assert_eq!(ModelClient::backoff_for(2), Duration::from_secs(8));
        assert_eq!(ModelClient::backoff_for(3), Duration::from_secs(16));
        assert_eq!(ModelClient::backoff_for(4), Duration::from_secs(30));
        assert_eq!(ModelClient::backoff_for(10), Duration::from_secs(30));
    }
}
