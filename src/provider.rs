use crate::backend::{ChatBackend, CompletionRequest, build_backend_or_unavailable};
use crate::config::Config;
use crate::models::{GenerationResult, GenerationTask, Provider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Generation side of one provider: a backend plus the name results carry
pub struct ProviderAdapter {
    provider: Provider,
    display_name: String,
    backend: Arc<dyn ChatBackend>,
}

impl ProviderAdapter {
    pub fn new(provider: Provider, display_name: impl Into<String>, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            provider,
            display_name: display_name.into(),
            backend,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Run one generation. Never fails: backend errors and empty replies
    /// come back as a result with `error` set, zero tokens and the measured
    /// latency.
    pub async fn generate(
        &self,
        task: &GenerationTask,
        system_prompt: Option<&str>,
        user_message: &str,
    ) -> GenerationResult {
        let request = CompletionRequest::new(system_prompt, user_message);
        let started = Instant::now();
        let outcome = self.backend.complete(&request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(completion) if !completion.text.trim().is_empty() => GenerationResult::success(
                task,
                &self.display_name,
                completion.text,
                completion.usage,
                latency_ms,
            ),
            Ok(_) => GenerationResult::failure(
                task,
                &self.display_name,
                "Backend returned an empty response",
                latency_ms,
            ),
            Err(e) => GenerationResult::failure(task, &self.display_name, format!("{:#}", e), latency_ms),
        };

        debug!(
            provider = %self.provider,
            repeat_index = task.repeat_index,
            version = ?task.version,
            latency_ms,
            ok = result.is_success(),
            "generation finished"
        );
        result
    }
}

/// The generation adapters a runner can dispatch to
#[derive(Default)]
pub struct ProviderSet {
    adapters: HashMap<Provider, Arc<ProviderAdapter>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One adapter per provider, built from configuration
    pub fn from_config(config: &Config) -> Self {
        let mut set = Self::new();
        for provider in Provider::ALL {
            let backend_config = config.provider(provider);
            let backend = build_backend_or_unavailable(provider.as_str(), &backend_config);
            set.insert(ProviderAdapter::new(provider, backend_config.display_name(), backend));
        }
        set
    }

    pub fn insert(&mut self, adapter: ProviderAdapter) {
        self.adapters.insert(adapter.provider(), Arc::new(adapter));
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBackend;
    use std::time::Duration;

    fn task() -> GenerationTask {
        GenerationTask {
            provider: Provider::Gpt,
            repeat_index: 1,
            version: None,
        }
    }

    #[tokio::test]
    async fn test_generate_success_carries_usage() {
        let adapter = ProviderAdapter::new(Provider::Gpt, "GPT-5", StubBackend::replying("answer").into_arc());
        let result = adapter.generate(&task(), Some("sys"), "question").await;

        assert!(result.is_success());
        assert_eq!(result.model, "GPT-5");
        assert_eq!(result.provider, Some(Provider::Gpt));
        assert_eq!(result.response, "answer");
        assert_eq!(result.total_tokens, result.input_tokens + result.output_tokens);
        assert!(result.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_generate_converts_backend_error_into_result() {
        let adapter = ProviderAdapter::new(Provider::Gpt, "GPT-5", StubBackend::failing("connection reset").into_arc());
        let result = adapter.generate(&task(), None, "question").await;

        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("connection reset"));
        assert!(result.response.is_empty());
        assert_eq!(result.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_generate_records_latency_on_failure() {
        let backend = StubBackend::failing("503 Service Unavailable").with_delay(Duration::from_millis(40));
        let adapter = ProviderAdapter::new(Provider::Claude, "Claude", backend.into_arc());
        let result = adapter.generate(&task(), None, "question").await;

        assert!(!result.is_success());
        assert!(result.latency_ms >= 40, "latency was {} ms", result.latency_ms);
        assert_eq!(result.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_generate_treats_blank_reply_as_failure() {
        let adapter = ProviderAdapter::new(Provider::Gpt, "GPT-5", StubBackend::replying("  \n").into_arc());
        let result = adapter.generate(&task(), None, "question").await;

        assert!(!result.is_success());
        assert!(result.response.is_empty());
        assert_eq!(result.input_tokens, 0);
    }

    #[tokio::test]
    async fn test_generate_passes_prompts_through() {
        let stub = StubBackend::replying("ok");
        let adapter = ProviderAdapter::new(Provider::Claude, "Claude", stub.clone().into_arc());
        adapter.generate(&task(), None, "the question").await;
        adapter.generate(&task(), Some("the system"), "again").await;

        let seen = stub.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].system_prompt, None);
        assert_eq!(seen[0].user_message, "the question");
        assert_eq!(seen[1].system_prompt.as_deref(), Some("the system"));
    }

    #[test]
    fn test_from_config_builds_every_provider() {
        let set = ProviderSet::from_config(&Config::default());
        for provider in Provider::ALL {
            let adapter = set.get(provider).unwrap();
            assert_eq!(adapter.provider(), provider);
        }
        assert_eq!(set.get(Provider::Claude).unwrap().display_name(), "Claude 4.5 Sonnet");
    }
}
