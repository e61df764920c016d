//! The LLM gateway: single entry point for every model call
//!
//! Resolution order for the model binding: explicit override (the selector's
//! choice) -> routing config -> hardcoded category defaults -> the mock
//! client as local dev fallback. Routing-config resolutions are cached for
//! 60 seconds, so config changes flush within that window.
//!
//! Fallback chain: providers serving the category, declared order. A 429
//! puts the provider in cooldown and the next one is tried; timeouts and
//! 5xx count as transient and also advance the chain; malformed requests
//! and auth failures fail immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{LlmConfig, ProviderConfig};

use super::{
    AnthropicClient, CallContext, CompletionRequest, CompletionResponse, LlmClient, LlmError, MockLlmClient,
    ModelBinding, OpenAiCompatClient, RateLimiter, prompt_hash,
};

/// Routing-config cache TTL; config edits take effect within this window
const ROUTING_CACHE_TTL: Duration = Duration::from_secs(60);

/// Hardcoded per-category defaults, the second-to-last resort
fn default_model_for(category: &str) -> Option<(&'static str, &'static str)> {
    match category {
        "heavy-reasoning" => Some(("anthropic", "claude-opus-4")),
        "heavy-production" => Some(("anthropic", "claude-sonnet-4")),
        "heavy-redaction" => Some(("anthropic", "claude-sonnet-4")),
        "light-reasoning" => Some(("anthropic", "claude-haiku-3-5")),
        "light-production" => Some(("anthropic", "claude-haiku-3-5")),
        "light-redaction" => Some(("anthropic", "claude-haiku-3-5")),
        _ => None,
    }
}

struct ProviderSlot {
    config: ProviderConfig,
    client: Arc<dyn LlmClient>,
}

impl ProviderSlot {
    fn serves(&self, category: &str) -> bool {
        self.config.categories.is_empty() || self.config.categories.iter().any(|c| c == category)
    }
}

/// A successful gateway call with its trace material
#[derive(Debug)]
pub struct GatewayResponse {
    pub response: CompletionResponse,
    pub provider: String,
    pub model: String,
    pub latency_ms: i64,
    pub prompt_hash: String,
}

/// The gateway
pub struct LlmGateway {
    config: LlmConfig,
    providers: Vec<ProviderSlot>,
    limiter: RateLimiter,
    cooldowns: Mutex<HashMap<String, Instant>>,
    routing_cache: Mutex<HashMap<String, (ModelBinding, Instant)>>,
}

impl LlmGateway {
    /// Build the gateway from configuration, constructing wire clients
    ///
    /// Providers whose API key is missing are skipped with a warning rather
    /// than failing startup; the mock fallback keeps local dev working.
    pub fn from_config(config: &LlmConfig) -> Self {
        let connect = Duration::from_secs(config.connect_timeout_s);
        let read = config.read_timeout();
        let mut providers = Vec::new();

        for provider in &config.providers {
            let client: Option<Arc<dyn LlmClient>> = match provider.protocol.as_str() {
                "anthropic" => match AnthropicClient::from_config(provider, connect, read) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        warn!(provider = %provider.name, error = %e, "Skipping provider");
                        None
                    }
                },
                "openai" => match OpenAiCompatClient::from_config(provider, connect, read) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        warn!(provider = %provider.name, error = %e, "Skipping provider");
                        None
                    }
                },
                "mock" => Some(Arc::new(MockLlmClient::named(provider.name.clone(), vec![]))),
                other => {
                    warn!(provider = %provider.name, protocol = %other, "Unknown provider protocol");
                    None
                }
            };
            if let Some(client) = client {
                providers.push(ProviderSlot {
                    config: provider.clone(),
                    client,
                });
            }
        }

        Self::with_clients_inner(config.clone(), providers)
    }

    /// Build a gateway over injected clients (tests, embedded use)
    pub fn with_clients(config: LlmConfig, clients: Vec<(ProviderConfig, Arc<dyn LlmClient>)>) -> Self {
        let providers = clients
            .into_iter()
            .map(|(config, client)| ProviderSlot { config, client })
            .collect();
        Self::with_clients_inner(config, providers)
    }

    fn with_clients_inner(config: LlmConfig, providers: Vec<ProviderSlot>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_rpm, config.token_window);
        Self {
            config,
            providers,
            limiter,
            cooldowns: Mutex::new(HashMap::new()),
            routing_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Candidate bindings for a category, for model selection
    pub fn candidates_for(&self, category: &str) -> Vec<ModelBinding> {
        let mut out = Vec::new();
        for slot in &self.providers {
            if !slot.serves(category) {
                continue;
            }
            if let Some(model) = slot.config.models.get(category) {
                out.push(ModelBinding {
                    provider: slot.config.name.clone(),
                    model: model.clone(),
                });
            }
        }
        if out.is_empty()
            && let Some((provider, model)) = default_model_for(category)
        {
            out.push(ModelBinding {
                provider: provider.to_string(),
                model: model.to_string(),
            });
        }
        out
    }

    /// Resolve a binding for a category, without a selector override
    fn resolve_binding(&self, category: &str) -> ModelBinding {
        {
            let cache = self.routing_cache.lock().unwrap();
            if let Some((binding, at)) = cache.get(category)
                && at.elapsed() < ROUTING_CACHE_TTL
            {
                return binding.clone();
            }
        }

        // Routing config: first provider that declares a model for the category
        let binding = self
            .providers
            .iter()
            .filter(|s| s.serves(category))
            .find_map(|s| {
                s.config.models.get(category).map(|model| ModelBinding {
                    provider: s.config.name.clone(),
                    model: model.clone(),
                })
            })
            .or_else(|| {
                default_model_for(category).map(|(provider, model)| ModelBinding {
                    provider: provider.to_string(),
                    model: model.to_string(),
                })
            })
            .unwrap_or(ModelBinding {
                provider: "mock".to_string(),
                model: "mock-model".to_string(),
            });

        self.routing_cache
            .lock()
            .unwrap()
            .insert(category.to_string(), (binding.clone(), Instant::now()));
        binding
    }

    fn in_cooldown(&self, provider: &str) -> bool {
        let cooldowns = self.cooldowns.lock().unwrap();
        cooldowns.get(provider).map(|until| *until > Instant::now()).unwrap_or(false)
    }

    fn start_cooldown(&self, provider: &str) {
        let until = Instant::now() + self.config.provider_cooldown();
        self.cooldowns.lock().unwrap().insert(provider.to_string(), until);
        info!(provider, cooldown_s = self.config.provider_cooldown_s, "Provider entering cooldown");
    }

    /// The fallback chain for a call: the bound provider first, then the
    /// remaining providers serving the category in declared order.
    fn chain_for(&self, category: &str, binding: &ModelBinding) -> Vec<(&ProviderSlot, String)> {
        let mut chain = Vec::new();
        if let Some(slot) = self.providers.iter().find(|s| s.config.name == binding.provider) {
            chain.push((slot, binding.model.clone()));
        }
        for slot in &self.providers {
            if slot.config.name == binding.provider || !slot.serves(category) {
                continue;
            }
            let model = slot
                .config
                .models
                .get(category)
                .cloned()
                .unwrap_or_else(|| binding.model.clone());
            chain.push((slot, model));
        }
        chain
    }

    /// One completion with rate limiting, cooldowns and provider fallback
    pub async fn call(
        &self,
        context: &CallContext,
        category: &str,
        binding_override: Option<ModelBinding>,
        request: &CompletionRequest,
    ) -> Result<GatewayResponse, LlmError> {
        let binding = binding_override.unwrap_or_else(|| self.resolve_binding(category));
        let chain = self.chain_for(category, &binding);
        if chain.is_empty() {
            return Err(LlmError::NoProvider(category.to_string()));
        }

        let hash = prompt_hash(request);
        let estimated_tokens = (request.system_prompt.len() / 4) as u64 + request.max_tokens as u64;
        let mut attempts = 0u32;
        let mut last_error = String::new();

        for (slot, model) in chain {
            let provider = slot.config.name.as_str();
            if self.in_cooldown(provider) {
                debug!(provider, "Skipping provider in cooldown");
                continue;
            }

            attempts += 1;
            self.limiter
                .acquire(provider, estimated_tokens, self.config.rate_wait_max())
                .await?;

            let started = Instant::now();
            let outcome = tokio::time::timeout(self.config.read_timeout(), slot.client.complete(&model, request)).await;

            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(self.config.read_timeout())),
            };

            match result {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_millis() as i64;
                    self.limiter
                        .record_tokens(provider, response.usage.input_tokens + response.usage.output_tokens);
                    debug!(
                        provider,
                        model,
                        agent = %context.agent_id,
                        latency_ms,
                        "LLM call complete"
                    );
                    return Ok(GatewayResponse {
                        response,
                        provider: provider.to_string(),
                        model,
                        latency_ms,
                        prompt_hash: hash,
                    });
                }
                Err(e) if e.is_rate_limit() => {
                    warn!(provider, error = %e, "Provider rate limited");
                    self.start_cooldown(provider);
                    last_error = e.to_string();
                }
                Err(e) if e.is_retryable() => {
                    warn!(provider, error = %e, "Transient provider failure, trying next");
                    last_error = e.to_string();
                }
                Err(e) => {
                    // Non-retriable: malformed request, auth - fail the call
                    return Err(e);
                }
            }
        }

        Err(LlmError::Exhausted { attempts, last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "sys".into(),
            messages: vec![Message::user("go")],
            tools: vec![],
            max_tokens: 100,
        }
    }

    fn provider(name: &str, category: &str, model: &str) -> ProviderConfig {
        let mut models = HashMap::new();
        models.insert(category.to_string(), model.to_string());
        ProviderConfig {
            name: name.to_string(),
            protocol: "mock".to_string(),
            categories: vec![],
            models,
            api_key_env: String::new(),
            base_url: String::new(),
            max_tokens: 8192,
        }
    }

    fn gateway_with(clients: Vec<(ProviderConfig, Arc<dyn LlmClient>)>) -> LlmGateway {
        let mut config = LlmConfig::default();
        config.rate_wait_max_s = 1;
        LlmGateway::with_clients(config, clients)
    }

    #[tokio::test]
    async fn test_primary_serves_call() {
        let primary = Arc::new(MockLlmClient::named(
            "primary",
            vec![MockLlmClient::text_response("from primary")],
        ));
        let gateway = gateway_with(vec![(provider("primary", "heavy-reasoning", "model-a"), primary)]);

        let result = gateway
            .call(&CallContext::default(), "heavy-reasoning", None, &request())
            .await
            .unwrap();
        assert_eq!(result.provider, "primary");
        assert_eq!(result.model, "model-a");
        assert_eq!(result.response.content.as_deref(), Some("from primary"));
    }

    #[tokio::test]
    async fn test_429_cools_down_and_falls_back() {
        let primary = Arc::new(MockLlmClient::named("primary", vec![]));
        primary.push_error(LlmError::RateLimited {
            retry_after: Duration::from_secs(60),
        });
        let secondary = Arc::new(MockLlmClient::named(
            "secondary",
            vec![
                MockLlmClient::text_response("secondary wins"),
                MockLlmClient::text_response("secondary again"),
            ],
        ));

        let gateway = gateway_with(vec![
            (provider("primary", "heavy-reasoning", "model-a"), primary),
            (provider("secondary", "heavy-reasoning", "model-b"), secondary),
        ]);

        let first = gateway
            .call(&CallContext::default(), "heavy-reasoning", None, &request())
            .await
            .unwrap();
        assert_eq!(first.provider, "secondary");

        // Primary is now in cooldown and must be skipped without an attempt
        let second = gateway
            .call(&CallContext::default(), "heavy-reasoning", None, &request())
            .await
            .unwrap();
        assert_eq!(second.provider, "secondary");
        assert!(gateway.in_cooldown("primary"));
    }

    #[tokio::test]
    async fn test_non_retriable_fails_immediately() {
        let primary = Arc::new(MockLlmClient::named("primary", vec![]));
        primary.push_error(LlmError::ApiError {
            status: 401,
            message: "bad key".into(),
        });
        let secondary = Arc::new(MockLlmClient::named(
            "secondary",
            vec![MockLlmClient::text_response("never reached")],
        ));

        let gateway = gateway_with(vec![
            (provider("primary", "heavy-reasoning", "model-a"), primary),
            (provider("secondary", "heavy-reasoning", "model-b"), secondary),
        ]);

        let err = gateway
            .call(&CallContext::default(), "heavy-reasoning", None, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ApiError { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_binding_override_is_honored() {
        let alt = Arc::new(MockLlmClient::named("alt", vec![MockLlmClient::text_response("alt")]));
        let gateway = gateway_with(vec![(provider("alt", "heavy-reasoning", "default-model"), alt)]);

        let result = gateway
            .call(
                &CallContext::default(),
                "heavy-reasoning",
                Some(ModelBinding {
                    provider: "alt".into(),
                    model: "override-model".into(),
                }),
                &request(),
            )
            .await
            .unwrap();
        assert_eq!(result.model, "override-model");
    }

    #[test]
    fn test_candidates_fall_back_to_defaults() {
        let gateway = gateway_with(vec![]);
        let candidates = gateway.candidates_for("light-production");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].model, "claude-haiku-3-5");
    }
}
