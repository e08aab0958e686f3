pub mod google;
pub mod openai;

use crate::config::{AppConfig, ProviderSettings};
use crate::debug_log::{DebugKind, DebugLog};
use crate::image::ImagePayload;
use crate::repair::{repair, RepairFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Models that reject a custom temperature. Matched by substring.
const REASONING_MODELS: &[&str] = &[
    "o1",
    "o1-pro",
    "o3",
    "o3-mini",
    "o4-mini",
    "gemini-2.0-flash-thinking-exp-1219",
    "gemini-2.0-flash-thinking-exp-01-21",
    "deepseek-reasoner",
];

/// Sent instead of the user setting when a model fixes its own temperature.
pub const NEUTRAL_TEMPERATURE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Google,
    Xai,
    DeepSeek,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::Google,
        ProviderId::Xai,
        ProviderId::DeepSeek,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Google => "google",
            ProviderId::Xai => "xai",
            ProviderId::DeepSeek => "deepseek",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "OpenAI",
            ProviderId::Google => "Google",
            ProviderId::Xai => "xAI",
            ProviderId::DeepSeek => "DeepSeek",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "gpt-4o",
            ProviderId::Google => "gemini-2.5-flash-preview-05-20",
            ProviderId::Xai => "grok-3",
            ProviderId::DeepSeek => "deepseek-vl2",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "https://api.openai.com/v1",
            ProviderId::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderId::Xai => "https://api.x.ai/v1",
            ProviderId::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            ProviderId::OpenAi => 16384,
            ProviderId::Google => 8192,
            ProviderId::Xai => 131072,
            ProviderId::DeepSeek => 8192,
        }
    }

    /// Vision-capable models; `None` means every model of the provider is.
    fn vision_models(self) -> Option<&'static [&'static str]> {
        match self {
            ProviderId::OpenAi => Some(&[
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-4-turbo",
                "gpt-4-vision-preview",
                "o1",
                "o3",
                "o4-mini",
                "gpt-4.1",
                "gpt-4.1-mini",
                "gpt-4.1-nano",
                "gpt-4.5-preview",
            ]),
            ProviderId::Google => None,
            ProviderId::Xai => Some(&["grok-vision-beta"]),
            ProviderId::DeepSeek => Some(&["deepseek-vl2", "deepseek-vl2-small", "janus-pro-7b"]),
        }
    }

    fn vision_fallback(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "gpt-4o",
            ProviderId::Google => "gemini-2.5-flash-preview-05-20",
            ProviderId::Xai => "grok-vision-beta",
            ProviderId::DeepSeek => "deepseek-vl2",
        }
    }

    pub fn supports_vision(self, model: &str) -> bool {
        self.vision_models()
            .map_or(true, |models| models.contains(&model))
    }

    /// The model to use for an image request given the user's selection.
    pub fn vision_model(self, selected: &str) -> String {
        if self.supports_vision(selected) {
            selected.to_string()
        } else {
            self.vision_fallback().to_string()
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| LlmError::UnknownProvider(s.to_string()))
    }
}

pub fn supports_temperature(model: &str) -> bool {
    !REASONING_MODELS.iter().any(|rm| model.contains(rm))
}

/// Temperature to send, `None` meaning the field is left out entirely.
pub fn resolve_temperature(provider: ProviderId, model: &str, user: f32) -> Option<f32> {
    if supports_temperature(model) {
        Some(user)
    } else if provider == ProviderId::OpenAi {
        None
    } else {
        Some(NEUTRAL_TEMPERATURE)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: ProviderId,
    pub supports_temperature: bool,
    pub supports_vision: bool,
}

/// Models offered in the settings picker.
pub fn available_models() -> Vec<ModelInfo> {
    const CATALOGUE: &[(ProviderId, &str, &str)] = &[
        (ProviderId::OpenAi, "gpt-4o", "GPT-4o"),
        (ProviderId::OpenAi, "gpt-4o-mini", "GPT-4o Mini"),
        (ProviderId::OpenAi, "gpt-4.1", "GPT-4.1"),
        (ProviderId::OpenAi, "gpt-4.1-mini", "GPT-4.1 Mini"),
        (ProviderId::OpenAi, "o3", "o3"),
        (ProviderId::OpenAi, "o4-mini", "o4-mini"),
        (ProviderId::Google, "gemini-2.5-flash-preview-05-20", "Gemini 2.5 Flash"),
        (ProviderId::Google, "gemini-2.5-pro-preview-05-06", "Gemini 2.5 Pro"),
        (ProviderId::Google, "gemini-2.0-flash", "Gemini 2.0 Flash"),
        (ProviderId::Google, "gemini-2.0-flash-thinking-exp-01-21", "Gemini 2.0 Flash Thinking"),
        (ProviderId::Xai, "grok-3", "Grok 3"),
        (ProviderId::Xai, "grok-3-mini", "Grok 3 Mini"),
        (ProviderId::Xai, "grok-vision-beta", "Grok Vision"),
        (ProviderId::DeepSeek, "deepseek-chat", "DeepSeek Chat"),
        (ProviderId::DeepSeek, "deepseek-reasoner", "DeepSeek Reasoner"),
        (ProviderId::DeepSeek, "deepseek-vl2", "DeepSeek VL2"),
    ];

    CATALOGUE
        .iter()
        .map(|&(provider, id, name)| ModelInfo {
            id: id.into(),
            name: name.into(),
            provider,
            supports_temperature: supports_temperature(id),
            supports_vision: provider.supports_vision(id),
        })
        .collect()
}

/// What a caller asks of a provider, before provider-specific shaping.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Earlier user/assistant exchanges, oldest first.
    pub history: Vec<ChatMessage>,
    pub image: Option<ImagePayload>,
}

impl CallRequest {
    pub fn text(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }

    pub fn vision(prompt: impl Into<String>, image: ImagePayload) -> Self {
        Self {
            user_prompt: prompt.into(),
            image: Some(image),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

/// A [`CallRequest`] with model and temperature already resolved.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub provider: ProviderId,
    pub model: &'a str,
    pub temperature: Option<f32>,
    pub call: &'a CallRequest,
}

/// Text payload pulled out of a provider's reply envelope.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub request_bytes: usize,
    pub response_bytes: usize,
}

/// Adapter output. A reply that could not be repaired into JSON still
/// arrives here, with `value` null and the failure in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedReply {
    pub provider: ProviderId,
    pub model: String,
    pub value: Value,
    pub error: Option<RepairFailure>,
}

impl ParsedReply {
    pub fn into_value(self) -> Result<Value, LlmError> {
        match self.error {
            Some(failure) => Err(LlmError::ReplyFormat(failure)),
            None => Ok(self.value),
        }
    }
}

/// One remote chat/vision backend.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn complete(
        &self,
        settings: &ProviderSettings,
        request: &CompletionRequest<'_>,
    ) -> Result<Completion, LlmError>;
}

/// Provider clients keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderId, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    /// The four HTTP backends sharing one connection pool.
    pub fn standard() -> Self {
        let http = reqwest::Client::new();
        let openai_compatible: Arc<dyn ProviderClient> =
            Arc::new(openai::OpenAiCompatible::new(http.clone()));
        Self::default()
            .with(ProviderId::OpenAi, openai_compatible.clone())
            .with(ProviderId::Xai, openai_compatible.clone())
            .with(ProviderId::DeepSeek, openai_compatible)
            .with(ProviderId::Google, Arc::new(google::GeminiClient::new(http)))
    }

    pub fn with(mut self, provider: ProviderId, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    pub fn get(&self, provider: ProviderId) -> Option<&Arc<dyn ProviderClient>> {
        self.clients.get(&provider)
    }
}

/// Uniform call path over every provider: resolves model and temperature,
/// records the exchange in the debug log, and repairs the reply text.
pub struct ProviderAdapter {
    registry: ProviderRegistry,
    debug: Arc<DebugLog>,
}

impl ProviderAdapter {
    pub fn new(registry: ProviderRegistry, debug: Arc<DebugLog>) -> Self {
        Self { registry, debug }
    }

    pub fn debug_log(&self) -> &Arc<DebugLog> {
        &self.debug
    }

    pub async fn call(
        &self,
        config: &AppConfig,
        provider: ProviderId,
        request: &CallRequest,
    ) -> Result<ParsedReply, LlmError> {
        let settings = config.provider(provider);
        if settings.api_key.is_empty() {
            return Err(LlmError::MissingCredential(provider));
        }
        let client = self
            .registry
            .get(provider)
            .ok_or(LlmError::Unregistered(provider))?;

        let model = match request.image {
            Some(_) => provider.vision_model(&settings.model),
            None => settings.model.clone(),
        };
        let temperature = resolve_temperature(provider, &model, config.temperature);
        let request_id = format!("{}-{}", provider, &uuid::Uuid::new_v4().simple().to_string()[..8]);

        self.debug.record(
            DebugKind::Request,
            provider,
            &model,
            json!({
                "request_id": request_id,
                "temperature": temperature,
                "system_prompt": request.system_prompt,
                "user_prompt": request.user_prompt,
                "history_turns": request.history.len(),
                "image": request.image.as_ref().map(|i| i.data_url()),
            }),
        );

        let completion = CompletionRequest {
            provider,
            model: &model,
            temperature,
            call: request,
        };
        let started = Instant::now();
        let result = client.complete(settings, &completion).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(done) => {
                let (value, error) = match repair(&done.text) {
                    Ok(value) => (value, None),
                    Err(failure) => (Value::Null, Some(failure)),
                };
                self.debug.record(
                    DebugKind::Response,
                    provider,
                    &model,
                    json!({
                        "request_id": request_id,
                        "duration_ms": duration_ms,
                        "request_body_size": done.request_bytes,
                        "response_body_size": done.response_bytes,
                        "content": done.text,
                        "parsed_response": value,
                        "parse_error": error,
                    }),
                );
                Ok(ParsedReply {
                    provider,
                    model,
                    value,
                    error,
                })
            }
            Err(err) => {
                let status = match &err {
                    LlmError::Api { status, .. } => Some(*status),
                    _ => None,
                };
                self.debug.record(
                    DebugKind::Error,
                    provider,
                    &model,
                    json!({
                        "request_id": request_id,
                        "duration_ms": duration_ms,
                        "status": status,
                        "error": err.to_string(),
                    }),
                );
                Err(err)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    ReplyFormat(#[from] RepairFailure),
    #[error("No API key configured for {}", .0.display_name())]
    MissingCredential(ProviderId),
    #[error("Provider {0} is not registered")]
    Unregistered(ProviderId),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl Serialize for LlmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn provider_ids_round_trip_through_strings() {
        for id in ProviderId::ALL {
            assert_eq!(id.as_str().parse::<ProviderId>().unwrap(), id);
            assert_eq!(serde_json::to_value(id).unwrap(), id.as_str());
        }
        assert!("anthropic".parse::<ProviderId>().is_err());
    }

    #[test]
    fn reasoning_models_skip_temperature() {
        assert!(supports_temperature("gpt-4o"));
        assert!(!supports_temperature("o3-mini"));
        assert!(!supports_temperature("deepseek-reasoner"));

        assert_eq!(resolve_temperature(ProviderId::OpenAi, "gpt-4o", 0.8), Some(0.8));
        assert_eq!(resolve_temperature(ProviderId::OpenAi, "o4-mini", 0.8), None);
        assert_eq!(
            resolve_temperature(ProviderId::DeepSeek, "deepseek-reasoner", 0.3),
            Some(NEUTRAL_TEMPERATURE)
        );
    }

    #[test]
    fn vision_model_falls_back_when_not_allowed() {
        assert_eq!(ProviderId::OpenAi.vision_model("gpt-4.1-mini"), "gpt-4.1-mini");
        assert_eq!(ProviderId::OpenAi.vision_model("gpt-3.5-turbo"), "gpt-4o");
        assert_eq!(ProviderId::Xai.vision_model("grok-3"), "grok-vision-beta");
        assert_eq!(ProviderId::DeepSeek.vision_model("deepseek-chat"), "deepseek-vl2");
        assert_eq!(ProviderId::Google.vision_model("gemini-2.0-flash"), "gemini-2.0-flash");
    }

    #[test]
    fn catalogue_flags_capabilities() {
        let models = available_models();
        let o3 = models.iter().find(|m| m.id == "o3").unwrap();
        assert!(!o3.supports_temperature);
        assert!(o3.supports_vision);
        let grok = models.iter().find(|m| m.id == "grok-3").unwrap();
        assert!(!grok.supports_vision);
    }

    #[tokio::test]
    async fn call_repairs_reply_and_logs_exchange() {
        let client = Arc::new(ScriptedClient::new(|_| {
            Scripted::reply(r#"Here you go: {"message": "Try the Barolo"}"#)
        }));
        let adapter = adapter_with(client.clone());
        let config = config_with_key();

        let reply = adapter
            .call(&config, ProviderId::OpenAi, &CallRequest::text("sys", "hi"))
            .await
            .unwrap();
        assert_eq!(reply.value["message"], "Try the Barolo");
        assert!(reply.error.is_none());
        assert_eq!(reply.model, "gpt-4o");

        let entries = adapter.debug_log().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, DebugKind::Response);
        assert_eq!(entries[1].kind, DebugKind::Request);
        assert_eq!(entries[0].provider, ProviderId::OpenAi);
    }

    #[tokio::test]
    async fn unparseable_reply_is_reported_in_error_field() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::reply("no json here")));
        let adapter = adapter_with(client);

        let reply = adapter
            .call(&config_with_key(), ProviderId::OpenAi, &CallRequest::text("sys", "hi"))
            .await
            .unwrap();
        assert!(reply.value.is_null());
        assert_eq!(reply.error.as_ref().unwrap().raw_response, "no json here");
        assert!(matches!(reply.into_value(), Err(LlmError::ReplyFormat(_))));
    }

    #[tokio::test]
    async fn transport_error_is_logged_and_returned() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::fail(401)));
        let adapter = adapter_with(client);

        let err = adapter
            .call(&config_with_key(), ProviderId::OpenAi, &CallRequest::text("sys", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
        assert_eq!(adapter.debug_log().entries()[0].kind, DebugKind::Error);
    }

    #[tokio::test]
    async fn missing_credential_never_reaches_the_client() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::reply("{}")));
        let adapter = adapter_with(client.clone());

        let err = adapter
            .call(&config_with_key(), ProviderId::Google, &CallRequest::text("sys", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingCredential(ProviderId::Google)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn image_requests_use_vision_model() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::reply("{}")));
        let adapter = adapter_with(client.clone());
        let mut config = config_with_key();
        config.openai.model = "o3-mini".into();

        let image = ImagePayload::from_bytes("image/png", &[1, 2, 3]);
        adapter
            .call(&config, ProviderId::OpenAi, &CallRequest::vision("read", image))
            .await
            .unwrap();

        let (model, temperature, _) = client.seen().remove(0);
        assert_eq!(model, "gpt-4o");
        assert_eq!(temperature, Some(config.temperature));
    }
}
