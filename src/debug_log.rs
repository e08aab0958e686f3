//! In-memory record of provider traffic for the debug view.

use crate::llm::ProviderId;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const MAX_ENTRIES: usize = 100;
const MAX_DEPTH: usize = 10;
const MAX_ARRAY_ITEMS: usize = 100;
const MAX_OBJECT_KEYS: usize = 50;
const BASE64_PLACEHOLDER_MIN: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugKind {
    Request,
    Response,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugEntry {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: DebugKind,
    pub provider: ProviderId,
    pub model: String,
    pub payload: Value,
}

pub struct DebugLog {
    enabled: AtomicBool,
    entries: Mutex<VecDeque<DebugEntry>>,
}

impl DebugLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Mutex::new(VecDeque::with_capacity(MAX_ENTRIES)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Fire-and-forget. Newest entries first; the oldest drop off past 100.
    pub fn record(&self, kind: DebugKind, provider: ProviderId, model: &str, payload: Value) {
        tracing::debug!(kind = ?kind, provider = %provider, model, "provider exchange");
        if !self.is_enabled() {
            return;
        }

        let entry = DebugEntry {
            timestamp: chrono::Local::now().format("%m/%d/%Y, %H:%M:%S %Z").to_string(),
            kind,
            provider,
            model: model.to_string(),
            payload: prepare_payload(payload),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_front(entry);
        entries.truncate(MAX_ENTRIES);
    }

    pub fn entries(&self) -> Vec<DebugEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Render an entry for display: indented with real line breaks, or compact.
pub fn render(entry: &DebugEntry, pretty: bool) -> String {
    if !pretty {
        return serde_json::to_string(entry).unwrap_or_default();
    }
    serde_json::to_string_pretty(entry)
        .unwrap_or_default()
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

fn prepare_payload(payload: Value) -> Value {
    let mut payload = sanitize(payload, 0);
    if let Value::Object(map) = &mut payload {
        if let Some(ms) = map.remove("duration_ms").and_then(|v| v.as_u64()) {
            map.insert(
                "duration".into(),
                Value::String(format!("{:.1}", ms as f64 / 1000.0)),
            );
        }
    }
    payload
}

/// Bound the size of a payload: binary blobs become size placeholders,
/// deep or wide structures are cut.
fn sanitize(value: Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String("[Max depth reached]".into());
    }
    match value {
        Value::String(s) if s.starts_with("data:image/") => {
            Value::String(format!("[Base64 Image Data: {}KB]", kilobytes(s.len())))
        }
        Value::String(s) if looks_like_base64(&s) => {
            Value::String(format!("[Base64 Data: {}KB]", kilobytes(s.len())))
        }
        Value::Array(items) => {
            let total = items.len();
            let mut out: Vec<Value> = items
                .into_iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|v| sanitize(v, depth + 1))
                .collect();
            if total > MAX_ARRAY_ITEMS {
                out.push(Value::String(format!(
                    "[... {} more items]",
                    total - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let total = map.len();
            let mut out: Map<String, Value> = map
                .into_iter()
                .take(MAX_OBJECT_KEYS)
                .map(|(k, v)| (k, sanitize(v, depth + 1)))
                .collect();
            if total > MAX_OBJECT_KEYS {
                out.insert("...".into(), Value::String("[More properties truncated]".into()));
            }
            Value::Object(out)
        }
        other => other,
    }
}

fn looks_like_base64(s: &str) -> bool {
    s.len() > BASE64_PLACEHOLDER_MIN
        && s
            .trim_end_matches('=')
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

fn kilobytes(len: usize) -> usize {
    (len as f64 / 1024.0).round() as usize
}
