use super::{Completion, CompletionRequest, LlmError, ProviderClient};
use crate::config::ProviderSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    response_format: ResponseFormat,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiReplyMessage,
}

#[derive(Deserialize)]
struct OpenAiReplyMessage {
    content: Option<String>,
}

fn build_request<'a>(request: &'a CompletionRequest<'a>) -> OpenAiRequest<'a> {
    let call = request.call;
    let mut messages = Vec::with_capacity(call.history.len() + 2);
    if !call.system_prompt.is_empty() {
        messages.push(OpenAiMessage {
            role: "system",
            content: MessageContent::Text(&call.system_prompt),
        });
    }
    messages.extend(call.history.iter().map(|m| OpenAiMessage {
        role: &m.role,
        content: MessageContent::Text(&m.content),
    }));

    let content = match &call.image {
        Some(image) => MessageContent::Parts(vec![
            ContentPart::Text {
                text: &call.user_prompt,
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.data_url(),
                },
            },
        ]),
        None => MessageContent::Text(&call.user_prompt),
    };
    messages.push(OpenAiMessage {
        role: "user",
        content,
    });

    OpenAiRequest {
        model: request.model,
        messages,
        response_format: ResponseFormat {
            kind: "json_object",
        },
        max_tokens: request.provider.max_tokens(),
        temperature: request.temperature,
    }
}

fn extract_text(body: &str) -> Result<String, LlmError> {
    let data: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;
    data.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("reply has no message content".into()))
}

/// Chat-completions client shared by OpenAI, xAI and DeepSeek; only the
/// base URL and key differ between them.
pub struct OpenAiCompatible {
    http: Client,
}

impl OpenAiCompatible {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatible {
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
            .post(format!("{}/chat/completions", settings.base_url(request.provider)))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", settings.api_key))
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
