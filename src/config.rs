use crate::db::Database;
use crate::llm::ProviderId;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Application-level constants
pub const APP_NAME: &str = "Wine Lens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DB_FILE_NAME: &str = "wine-lens.db";

pub const DEFAULT_TEMPERATURE: f32 = 0.8;

pub fn default_log_filter() -> &'static str {
    "wine_lens_lib=debug,info"
}

/// Install the global `tracing` subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter())),
        )
        .init();
}

/// Credential and model for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: String,
    /// Overrides the provider's public endpoint, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    fn defaults(provider: ProviderId) -> Self {
        Self {
            api_key: String::new(),
            model: provider.default_model().to_string(),
            base_url: None,
        }
    }

    pub fn base_url(&self, provider: ProviderId) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(provider.default_base_url())
            .trim_end_matches('/')
    }
}

/// Settings snapshot, loaded once at startup and replaced only by an
/// explicit save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub selected_provider: ProviderId,
    pub openai: ProviderSettings,
    pub google: ProviderSettings,
    pub xai: ProviderSettings,
    pub deepseek: ProviderSettings,
    pub temperature: f32,
    pub debug_enabled: bool,
    pub debug_pretty_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            selected_provider: ProviderId::OpenAi,
            openai: ProviderSettings::defaults(ProviderId::OpenAi),
            google: ProviderSettings::defaults(ProviderId::Google),
            xai: ProviderSettings::defaults(ProviderId::Xai),
            deepseek: ProviderSettings::defaults(ProviderId::DeepSeek),
            temperature: DEFAULT_TEMPERATURE,
            debug_enabled: true,
            debug_pretty_mode: true,
        }
    }
}

impl AppConfig {
    pub fn provider(&self, provider: ProviderId) -> &ProviderSettings {
        match provider {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Google => &self.google,
            ProviderId::Xai => &self.xai,
            ProviderId::DeepSeek => &self.deepseek,
        }
    }

    fn provider_mut(&mut self, provider: ProviderId) -> &mut ProviderSettings {
        match provider {
            ProviderId::OpenAi => &mut self.openai,
            ProviderId::Google => &mut self.google,
            ProviderId::Xai => &mut self.xai,
            ProviderId::DeepSeek => &mut self.deepseek,
        }
    }

    pub fn active(&self) -> &ProviderSettings {
        self.provider(self.selected_provider)
    }

    pub fn has_credential(&self, provider: ProviderId) -> bool {
        !self.provider(provider).api_key.trim().is_empty()
    }

    // ── Persistence ──

    pub fn load(db: &Database) -> rusqlite::Result<Self> {
        let mut config = Self::default();

        if let Some(id) = db.get_setting("selected_provider")? {
            match id.parse() {
                Ok(provider) => config.selected_provider = provider,
                Err(e) => tracing::warn!(error = %e, "ignoring stored provider"),
            }
        }

        for provider in ProviderId::ALL {
            let settings = config.provider_mut(provider);
            if let Some(key) = db.get_setting(&setting_key(provider, "api_key"))? {
                settings.api_key = key;
            }
            if let Some(model) = db.get_setting(&setting_key(provider, "model"))? {
                if !model.is_empty() {
                    settings.model = model;
                }
            }
            settings.base_url = db.get_setting(&setting_key(provider, "base_url"))?;
        }

        if let Some(raw) = db.get_setting("temperature")? {
            config.temperature = raw.trim().parse().unwrap_or(DEFAULT_TEMPERATURE);
        }
        config.debug_enabled = db
            .get_setting("debug_enabled")?
            .map_or(true, |v| v == "true");
        config.debug_pretty_mode = db
            .get_setting("debug_pretty_mode")?
            .map_or(true, |v| v != "false");

        tracing::info!(
            provider = %config.selected_provider,
            model = %config.active().model,
            "settings loaded"
        );
        Ok(config)
    }

    pub fn save(&self, db: &Database) -> rusqlite::Result<()> {
        db.set_setting("selected_provider", self.selected_provider.as_str())?;
        for provider in ProviderId::ALL {
            let settings = self.provider(provider);
            db.set_setting(&setting_key(provider, "api_key"), &settings.api_key)?;
            db.set_setting(&setting_key(provider, "model"), &settings.model)?;
            match settings.base_url.as_deref().filter(|url| !url.is_empty()) {
                Some(url) => db.set_setting(&setting_key(provider, "base_url"), url)?,
                None => db.delete_setting(&setting_key(provider, "base_url"))?,
            }
        }
        db.set_setting("temperature", &self.temperature.to_string())?;
        db.set_setting("debug_enabled", &self.debug_enabled.to_string())?;
        db.set_setting("debug_pretty_mode", &self.debug_pretty_mode.to_string())?;
        Ok(())
    }

    // ── Settings view ──

    /// Copy safe to hand to the settings screen: API keys masked.
    pub fn masked(&self) -> Self {
        let mut view = self.clone();
        for provider in ProviderId::ALL {
            let settings = view.provider_mut(provider);
            settings.api_key = mask_key(&settings.api_key);
        }
        view
    }

    /// Settings edited from a masked view. A key sent back still masked
    /// means "unchanged" and keeps the current one.
    pub fn unmask_from(mut self, current: &AppConfig) -> Self {
        for provider in ProviderId::ALL {
            let existing = &current.provider(provider).api_key;
            let settings = self.provider_mut(provider);
            if !existing.is_empty() && settings.api_key == mask_key(existing) {
                settings.api_key = existing.clone();
            }
        }
        self
    }
}

/// `sk-a...wxyz` for keys longer than 8 characters, all stars otherwise.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}

/// `openai_api_key`, `google_model`, ...
pub fn setting_key(provider: ProviderId, field: &str) -> String {
    format!("{}_{}", provider.as_str(), field)
}
