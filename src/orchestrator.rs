//! Conversation flow: image turns (extract → research → summarize) and
//! text turns (history-aware questions about the current wine list).

use crate::config::AppConfig;
use crate::debug_log::DebugLog;
use crate::image::ImagePayload;
use crate::llm::{CallRequest, ChatMessage, LlmError, ProviderAdapter, ProviderId};
use crate::research::BatchResearcher;
use crate::wine::{LineItem, WineList};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub const EXTRACTION_PROMPT: &str = r#"FAST TEXT EXTRACTION: List each wine line from the image as simple JSON.
Transcribe what you see; do not analyze or look anything up.

For each wine line, return:
{"name": "wine text", "glass_price": "$XX", "bottle_price": "$XX"}

Rules:
- ONE wine per line
- Capture glass price AND bottle price separately when both are visible
- Use null for a price type that is not shown
- No web search, no added information
- Speed matters: raw text only

Return JSON:
{
  "wines": [
    {"name": "full wine text as shown", "glass_price": "$12", "bottle_price": "$48"}
  ]
}"#;

pub const CHAT_SYSTEM_PROMPT: &str = "You are a wine expert assistant. Help the user with their \
wine-related questions. Answer with a JSON object whose \"message\" field holds your reply.";

const IMAGE_TURN_TEXT: &str = "Uploaded wine image for analysis";
const CONTEXT_PREFIX: &str = "Based on the detailed wine information provided in the system context, ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Progress and error notices; never sent back to the model.
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    fn as_history(&self) -> Option<ChatMessage> {
        match self.role {
            Role::User => Some(ChatMessage::user(self.content.clone())),
            Role::Assistant => Some(ChatMessage::assistant(self.content.clone())),
            Role::Status => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Idle,
    Processing,
}

/// Why a send was refused. Refusals leave the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardRejection {
    Busy,
    MissingCredential(ProviderId),
    EmptyInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Completed,
    Rejected(GuardRejection),
}

/// User-facing category of a failed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    Authorization,
    MalformedReply,
    Network,
    Unclassified,
}

impl ErrorCause {
    pub fn classify(err: &LlmError) -> Self {
        match err {
            LlmError::Api { .. } | LlmError::MissingCredential(_) => ErrorCause::Authorization,
            LlmError::Parse(_) | LlmError::ReplyFormat(_) => ErrorCause::MalformedReply,
            LlmError::Http(_) => ErrorCause::Network,
            other => {
                let text = other.to_string().to_lowercase();
                if text.contains("401") || text.contains("403") {
                    ErrorCause::Authorization
                } else if text.contains("json") || text.contains("parse") {
                    ErrorCause::MalformedReply
                } else if text.contains("network") {
                    ErrorCause::Network
                } else {
                    ErrorCause::Unclassified
                }
            }
        }
    }

    /// The status turn shown for `err`.
    pub fn describe(self, err: &LlmError) -> String {
        let mut message = String::from("Error processing response. ");
        match self {
            ErrorCause::Authorization => message.push_str("Please check your API key and try again."),
            ErrorCause::MalformedReply => message.push_str(
                "The AI returned invalid JSON format. This may be a provider compatibility issue.",
            ),
            ErrorCause::Network => message.push_str(
                "Network error. Please check your internet connection and try again.",
            ),
            ErrorCause::Unclassified => message.push_str(&format!("Details: {}", err)),
        }
        if let LlmError::ReplyFormat(failure) = err {
            message.push_str(&format!(
                "\nOriginal error: {}\nRaw response: {}",
                failure.original_error, failure.raw_response
            ));
        }
        message
    }
}

#[derive(Debug, Default)]
struct Session {
    turns: Vec<ConversationTurn>,
    wine_list: Option<WineList>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: ProcessingState,
    pub turns: Vec<ConversationTurn>,
    pub wine_list: Option<WineList>,
}

/// Holds the in-flight flag; clears it when dropped, whichever way the turn ends.
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Orchestrator {
    adapter: ProviderAdapter,
    config: RwLock<Arc<AppConfig>>,
    session: Mutex<Session>,
    processing: AtomicBool,
}

impl Orchestrator {
    pub fn new(adapter: ProviderAdapter, config: AppConfig) -> Self {
        adapter.debug_log().set_enabled(config.debug_enabled);
        Self {
            adapter,
            config: RwLock::new(Arc::new(config)),
            session: Mutex::new(Session::default()),
            processing: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in settings from an explicit save. Turns already running keep
    /// the snapshot they started with.
    pub fn replace_config(&self, config: AppConfig) {
        self.adapter.debug_log().set_enabled(config.debug_enabled);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
    }

    pub fn debug_log(&self) -> &DebugLog {
        self.adapter.debug_log()
    }

    pub fn state(&self) -> ProcessingState {
        if self.processing.load(Ordering::Acquire) {
            ProcessingState::Processing
        } else {
            ProcessingState::Idle
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.session();
        SessionSnapshot {
            state: self.state(),
            turns: session.turns.clone(),
            wine_list: session.wine_list.clone(),
        }
    }

    /// Extract the wine list from a photo, research it, and summarize.
    pub async fn send_image(&self, image: ImagePayload) -> SendOutcome {
        let config = self.config();
        let _guard = match self.begin(&config) {
            Ok(guard) => guard,
            Err(rejection) => return SendOutcome::Rejected(rejection),
        };
        let provider = config.selected_provider;
        tracing::info!(provider = %provider, image_bytes = image.data.len(), "image turn started");

        self.push(Role::User, IMAGE_TURN_TEXT);
        let request = CallRequest::vision(EXTRACTION_PROMPT, image);
        let reply = match self.adapter.call(&config, provider, &request).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(provider = %provider, error = %err, "vision call failed");
                self.push(
                    Role::Status,
                    format!(
                        "Image analysis failed for {}: {}. Please try uploading the image again \
                         or switch to OpenAI, which has reliable vision support.",
                        provider.display_name(),
                        err
                    ),
                );
                return SendOutcome::Completed;
            }
        };

        let value = match reply.into_value() {
            Ok(value) => value,
            Err(err) => {
                self.push_error(&err);
                return SendOutcome::Completed;
            }
        };

        let Some(items) = LineItem::parse_list(&value) else {
            self.push(Role::Assistant, reply_text(&value));
            return SendOutcome::Completed;
        };

        self.push(
            Role::Status,
            format!("🍷 Found {} wines! Researching detailed information...", items.len()),
        );
        let researched = BatchResearcher::new(&self.adapter, &config)
            .research(&items)
            .await;
        let list = WineList::new(researched);
        let summary = summarize(&list);
        tracing::info!(wines = list.len(), "wine list replaced");

        let mut session = self.session();
        session.wine_list = Some(list);
        session.turns.push(ConversationTurn {
            role: Role::Assistant,
            content: summary,
        });
        SendOutcome::Completed
    }

    /// Ask a question, with the current wine list as context when there is one.
    pub async fn send_text(&self, input: &str) -> SendOutcome {
        let question = input.trim();
        if question.is_empty() {
            return SendOutcome::Rejected(GuardRejection::EmptyInput);
        }
        let config = self.config();
        let _guard = match self.begin(&config) {
            Ok(guard) => guard,
            Err(rejection) => return SendOutcome::Rejected(rejection),
        };
        let provider = config.selected_provider;
        tracing::info!(provider = %provider, "text turn started");

        let (history, context) = {
            let mut session = self.session();
            let history: Vec<ChatMessage> = session
                .turns
                .iter()
                .filter_map(ConversationTurn::as_history)
                .collect();
            let context = session
                .wine_list
                .as_ref()
                .filter(|list| !list.is_empty())
                .map(|list| (list.len(), list.to_context_json()));
            session.turns.push(ConversationTurn {
                role: Role::User,
                content: question.to_string(),
            });
            (history, context)
        };

        let mut system_prompt = CHAT_SYSTEM_PROMPT.to_string();
        let mut user_prompt = question.to_string();
        if let Some((count, json)) = context {
            self.push(
                Role::Status,
                format!("Using context from {} wines in the current list", count),
            );
            system_prompt.push_str(
                "\n\nCurrent wine list context (includes menu prices, retail prices, ratings, \
                 tasting notes, food pairings, producer, vintage, region, varietal, and sources):\n",
            );
            system_prompt.push_str(&json);
            user_prompt = format!("{}{}", CONTEXT_PREFIX, question);
        }

        let request = CallRequest::text(system_prompt, user_prompt).with_history(history);
        let result = self
            .adapter
            .call(&config, provider, &request)
            .await
            .and_then(|reply| reply.into_value());
        match result {
            Ok(value) => self.push(Role::Assistant, reply_text(&value)),
            Err(err) => {
                tracing::warn!(provider = %provider, error = %err, "text turn failed");
                self.push_error(&err);
            }
        }
        SendOutcome::Completed
    }

    fn begin(&self, config: &AppConfig) -> Result<ProcessingGuard<'_>, GuardRejection> {
        let provider = config.selected_provider;
        if !config.has_credential(provider) {
            return Err(GuardRejection::MissingCredential(provider));
        }
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GuardRejection::Busy)?;
        Ok(ProcessingGuard {
            flag: &self.processing,
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, role: Role, content: impl Into<String>) {
        self.session().turns.push(ConversationTurn {
            role,
            content: content.into(),
        });
    }

    fn push_error(&self, err: &LlmError) {
        let cause = ErrorCause::classify(err);
        self.push(Role::Status, cause.describe(err));
    }
}

/// Reply `message` if present, otherwise the whole reply as indented JSON.
fn reply_text(value: &Value) -> String {
    match value.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => serde_json::to_string_pretty(value).unwrap_or_default(),
    }
}

/// Chat summary of a freshly researched list.
pub fn summarize(list: &WineList) -> String {
    if list.is_empty() {
        return "No wines found in the image.".to_string();
    }

    let count = list.len();
    let mut out = format!(
        "Found {} wine{} in the image:\n\n",
        count,
        if count > 1 { "s" } else { "" }
    );
    for (i, wine) in list.wines.iter().enumerate() {
        out.push_str(&format!("**{}. {}**\n", i + 1, wine.name));
        if let Some(menu) = &wine.menu_price {
            out.push_str(&format!("   Menu: {}", menu));
            if let Some(note) = &wine.menu_price_note {
                out.push_str(&format!(" ({})", note));
            }
            out.push('\n');
        }
        if let Some(retail) = &wine.retail_price {
            out.push_str(&format!("   Retail: {}\n", retail));
        }
        out.push('\n');
    }

    if list.wines.iter().any(|w| w.has_research_detail()) {
        out.push_str("✅ **Complete analysis finished!** All detailed information is available in the Wines tab.\n\n");
        out.push_str("*Ask me questions about these wines - I have full access to ratings, tasting notes, food pairings, and more!*");
    } else {
        out.push_str("*Ask me for detailed information about any of these wines!*");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{adapter_with, config_with_key, Scripted, ScriptedClient};
    use crate::repair::RepairFailure;
    use crate::wine::ResearchedItem;
    use serde_json::json;
    use tokio::sync::Notify;

    fn png() -> ImagePayload {
        ImagePayload::from_bytes("image/png", &[0x89, 0x50, 0x4E, 0x47])
    }

    fn orchestrator(client: Arc<ScriptedClient>) -> Orchestrator {
        Orchestrator::new(adapter_with(client), config_with_key())
    }

    /// Vision calls get an extraction reply, text calls a research or chat reply.
    fn wine_bar() -> ScriptedClient {
        ScriptedClient::new(|request| {
            if request.call.image.is_some() {
                Scripted::reply(
                    json!({"wines": [
                        {"name": "Barolo", "glass_price": null, "bottle_price": "$90"},
                        {"name": "Prosecco", "glass_price": "$10", "bottle_price": null}
                    ]})
                    .to_string(),
                )
            } else if request.call.system_prompt.starts_with("You are a wine research expert") {
                Scripted::reply(
                    json!({"wines": [
                        {"name": "Barolo", "retail_price": "$45"},
                        {"name": null, "retail_price": "$14"}
                    ]})
                    .to_string(),
                )
            } else {
                Scripted::reply(r#"{"message": "The Barolo suits steak."}"#)
            }
        })
    }

    #[tokio::test]
    async fn image_turn_extracts_researches_and_summarizes() {
        let client = Arc::new(wine_bar());
        let orch = orchestrator(client.clone());

        assert_eq!(orch.send_image(png()).await, SendOutcome::Completed);
        assert_eq!(client.calls(), 2);

        let snap = orch.snapshot();
        assert_eq!(snap.state, ProcessingState::Idle);
        let list = snap.wine_list.unwrap();
        assert_eq!(list.wines[0].name, "Barolo");
        assert_eq!(list.wines[1].name, "Prosecco");
        assert_eq!(list.wines[1].menu_price.as_deref(), Some("$50"));

        let roles: Vec<Role> = snap.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Status, Role::Assistant]);
        assert!(snap.turns[1].content.contains("Found 2 wines"));
        assert!(snap.turns[2].content.contains("**2. Prosecco**"));
        assert!(snap.turns[2].content.contains("Retail: $45"));
    }

    #[tokio::test]
    async fn text_turn_uses_history_and_wine_context() {
        let client = Arc::new(wine_bar());
        let orch = orchestrator(client.clone());
        orch.send_image(png()).await;

        assert_eq!(orch.send_text("  What goes with steak?  ").await, SendOutcome::Completed);

        let (_, _, request) = client.seen().pop().unwrap();
        assert!(request.system_prompt.contains("Current wine list context"));
        assert!(request.system_prompt.contains("\"Barolo\""));
        assert_eq!(request.user_prompt, format!("{}What goes with steak?", CONTEXT_PREFIX));
        assert!(request.image.is_none());
        // the image upload and the summary; status turns stay out
        assert_eq!(
            request.history,
            vec![
                ChatMessage::user(IMAGE_TURN_TEXT),
                ChatMessage::assistant(orch.snapshot().turns[2].content.clone()),
            ]
        );

        let turns = orch.snapshot().turns;
        let tail: Vec<(Role, &str)> = turns[3..].iter().map(|t| (t.role, t.content.as_str())).collect();
        assert_eq!(
            tail,
            vec![
                (Role::User, "What goes with steak?"),
                (Role::Status, "Using context from 2 wines in the current list"),
                (Role::Assistant, "The Barolo suits steak."),
            ]
        );
    }

    #[tokio::test]
    async fn text_turn_without_list_sends_plain_question() {
        let client = Arc::new(wine_bar());
        let orch = orchestrator(client.clone());

        orch.send_text("Is Malbec dry?").await;
        let (_, _, request) = client.seen().pop().unwrap();
        assert_eq!(request.system_prompt, CHAT_SYSTEM_PROMPT);
        assert_eq!(request.user_prompt, "Is Malbec dry?");
        assert!(request.history.is_empty());
    }

    #[tokio::test]
    async fn vision_failure_keeps_previous_list() {
        let client = Arc::new(wine_bar());
        let orch = orchestrator(client);
        orch.send_image(png()).await;
        let before = orch.snapshot().wine_list;

        let failing = Arc::new(ScriptedClient::new(|_| Scripted::fail(503)));
        let orch = Orchestrator {
            adapter: adapter_with(failing),
            ..orch
        };
        assert_eq!(orch.send_image(png()).await, SendOutcome::Completed);

        let snap = orch.snapshot();
        assert_eq!(snap.wine_list, before);
        let last = snap.turns.last().unwrap();
        assert_eq!(last.role, Role::Status);
        assert!(last.content.starts_with("Image analysis failed for OpenAI: API error: 503"));
        assert_eq!(snap.state, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn second_send_while_processing_is_a_no_op() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(
            ScriptedClient::new(|_| Scripted::reply(r#"{"message": "ok"}"#)).gated(gate.clone()),
        );
        let orch = Arc::new(orchestrator(client.clone()));

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.send_text("first").await }
        });
        client.started.notified().await;
        assert_eq!(orch.state(), ProcessingState::Processing);
        let turns_before = orch.snapshot().turns;

        assert_eq!(
            orch.send_text("second").await,
            SendOutcome::Rejected(GuardRejection::Busy)
        );
        assert_eq!(
            orch.send_image(png()).await,
            SendOutcome::Rejected(GuardRejection::Busy)
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(orch.snapshot().turns, turns_before);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), SendOutcome::Completed);
        assert_eq!(orch.state(), ProcessingState::Idle);
    }

    #[tokio::test]
    async fn guard_resets_after_transport_error() {
        let client = Arc::new(ScriptedClient::new(|request| {
            if request.call.user_prompt == "fail" {
                Scripted::fail(401)
            } else {
                Scripted::reply(r#"{"message": "recovered"}"#)
            }
        }));
        let orch = orchestrator(client.clone());

        assert_eq!(orch.send_text("fail").await, SendOutcome::Completed);
        assert_eq!(orch.state(), ProcessingState::Idle);
        let status = orch.snapshot().turns.last().unwrap().clone();
        assert_eq!(status.role, Role::Status);
        assert_eq!(
            status.content,
            "Error processing response. Please check your API key and try again."
        );

        assert_eq!(orch.send_text("again").await, SendOutcome::Completed);
        assert_eq!(client.calls(), 2);
        assert_eq!(orch.snapshot().turns.last().unwrap().content, "recovered");
    }

    #[tokio::test]
    async fn sends_without_credential_or_text_are_rejected() {
        let client = Arc::new(wine_bar());
        let orch = Orchestrator::new(adapter_with(client.clone()), AppConfig::default());

        assert_eq!(
            orch.send_text("hello").await,
            SendOutcome::Rejected(GuardRejection::MissingCredential(ProviderId::OpenAi))
        );
        assert_eq!(
            orch.send_image(png()).await,
            SendOutcome::Rejected(GuardRejection::MissingCredential(ProviderId::OpenAi))
        );

        orch.replace_config(config_with_key());
        assert_eq!(
            orch.send_text("   ").await,
            SendOutcome::Rejected(GuardRejection::EmptyInput)
        );
        assert_eq!(client.calls(), 0);
        assert!(orch.snapshot().turns.is_empty());
    }

    #[tokio::test]
    async fn malformed_extraction_reply_becomes_one_status_turn() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::reply("Sorry, I can't read that.")));
        let orch = orchestrator(client);

        orch.send_image(png()).await;
        let snap = orch.snapshot();
        assert_eq!(snap.turns.len(), 2);
        assert_eq!(snap.turns[1].role, Role::Status);
        assert!(snap.turns[1].content.contains("invalid JSON format"));
        assert!(snap.turns[1].content.contains("Raw response: Sorry, I can't read that."));
        assert!(snap.wine_list.is_none());
    }

    #[tokio::test]
    async fn image_reply_without_wines_is_shown_as_is() {
        let client = Arc::new(ScriptedClient::new(|_| {
            Scripted::reply(r#"{"message": "That photo is a dessert menu."}"#)
        }));
        let orch = orchestrator(client);

        orch.send_image(png()).await;
        let snap = orch.snapshot();
        assert_eq!(snap.turns[1].role, Role::Assistant);
        assert_eq!(snap.turns[1].content, "That photo is a dessert menu.");
    }

    #[test]
    fn errors_are_classified() {
        let api = LlmError::Api {
            status: 403,
            message: "forbidden".into(),
        };
        assert_eq!(ErrorCause::classify(&api), ErrorCause::Authorization);
        assert_eq!(
            ErrorCause::classify(&LlmError::Parse("missing choices".into())),
            ErrorCause::MalformedReply
        );
        let failure = RepairFailure {
            error: "Failed to parse JSON response".into(),
            original_error: "expected value".into(),
            raw_response: "oops".into(),
        };
        assert_eq!(
            ErrorCause::classify(&LlmError::ReplyFormat(failure)),
            ErrorCause::MalformedReply
        );
        let unknown = LlmError::UnknownProvider("anthropic".into());
        assert_eq!(ErrorCause::classify(&unknown), ErrorCause::Unclassified);
        assert_eq!(
            ErrorCause::Unclassified.describe(&unknown),
            "Error processing response. Details: Unknown provider: anthropic"
        );
    }

    #[test]
    fn summary_lists_prices_and_closing_hint() {
        let list = WineList::new(vec![
            ResearchedItem {
                name: "Chablis".into(),
                menu_price: Some("$60".into()),
                menu_price_note: Some("Estimated from glass price ($12 × 5)".into()),
                ..Default::default()
            },
        ]);
        assert_eq!(
            summarize(&list),
            "Found 1 wine in the image:\n\n**1. Chablis**\n   Menu: $60 (Estimated from glass price ($12 × 5))\n\n\
             *Ask me for detailed information about any of these wines!*"
        );
        assert_eq!(summarize(&WineList::default()), "No wines found in the image.");
    }
}
