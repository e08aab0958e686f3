use super::{CallRequest, Completion, CompletionRequest, LlmError, ProviderClient};
use crate::config::ProviderSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: String },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_mime_type: &'static str,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Deserialize)]
struct GeminiReplyPart {
    text: Option<String>,
}

/// Gemini takes a single user turn here, so system prompt and history are
/// folded into the text.
fn compose_prompt(call: &CallRequest) -> String {
    let mut prompt = String::new();
    if !call.system_prompt.is_empty() {
        prompt.push_str(&call.system_prompt);
        prompt.push_str("\n\n");
    }
    if call.history.is_empty() {
        prompt.push_str("User request: ");
    } else {
        prompt.push_str("Previous conversation:\n");
        for turn in &call.history {
            let speaker = if turn.role == "user" { "User" } else { "Assistant" };
            prompt.push_str(&format!("{}: {}\n", speaker, turn.content));
        }
        prompt.push_str("\nCurrent request: ");
    }
    prompt.push_str(&call.user_prompt);
    prompt
}

fn build_request<'a>(request: &CompletionRequest<'a>) -> GeminiRequest<'a> {
    let call = request.call;
    let mut parts = vec![GeminiPart::Text {
        text: compose_prompt(call),
    }];
    if let Some(image) = &call.image {
        parts.push(GeminiPart::InlineData {
            inline_data: InlineData {
                mime_type: &image.mime_type,
                data: &image.data,
            },
        });
    }

    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: request.temperature,
            response_mime_type: "application/json",
            max_output_tokens: request.provider.max_tokens(),
        },
    }
}

fn extract_text(body: &str) -> Result<String, LlmError> {
    let data: GeminiResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;
    data.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| LlmError::Parse("reply has no candidate text".into()))
}

pub struct GeminiClient {
    http: Client,
}

impl GeminiClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    async fn complete(
        &self,
        settings: &ProviderSettings,
        request: &CompletionRequest<'_>,
    ) -> Result<Completion, LlmError> {
        let body = serde_json::to_vec(&build_request(request))
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let request_bytes = body.len();

        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                settings.base_url(request.provider),
                request.model
            ))
            .query(&[("key", settings.api_key.as_str())])
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let text = resp.text().await?;
        Ok(Completion {
            response_bytes: text.len(),
            text: extract_text(&text)?,
            request_bytes,
        })
    }
}
