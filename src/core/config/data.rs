use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::config::defaults::{DEFAULT_BOT, DEFAULT_PROVIDER};
use crate::core::conversation::BotRef;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Provider used for conversations created without an explicit bot
    pub default_provider: Option<String>,
    /// Bot id within the default provider (e.g., "chat_continuous")
    pub default_bot: Option<String>,
    /// Name new conversations after their first exchange
    pub auto_title: Option<bool>,
    /// Where conversations and messages are stored
    pub data_dir: Option<PathBuf>,
    /// Raw setting values per provider id, resolved against the provider's schema
    /// at startup.
    #[serde(default)]
    pub providers: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn default_bot_ref(&self) -> BotRef {
        BotRef::new(
            self.default_provider
                .as_deref()
                .unwrap_or(DEFAULT_PROVIDER)
                .to_lowercase(),
            self.default_bot.as_deref().unwrap_or(DEFAULT_BOT),
        )
    }

    pub fn auto_title_enabled(&self) -> bool {
        self.auto_title.unwrap_or(true)
    }

    pub fn provider_values(&self, provider: &str) -> BTreeMap<String, Value> {
        self.providers
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(provider))
            .map(|(_, values)| values.clone())
            .unwrap_or_default()
    }

    pub fn set_provider_value(&mut self, provider: &str, key: &str, value: Value) {
        self.providers
            .entry(provider.to_lowercase())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn unset_provider_value(&mut self, provider: &str, key: &str) -> bool {
        let provider = provider.to_lowercase();
        let Some(values) = self.providers.get_mut(&provider) else {
            return false;
        };
        let removed = values.remove(key).is_some();
        if values.is_empty() {
            self.providers.remove(&provider);
        }
        removed
    }
}

/// Parses a value typed on the command line: numbers and booleans keep their
/// type, anything else is a string.
pub fn parse_cli_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(flag) = trimmed.parse::<bool>() {
        return Value::Bool(flag);
    }
    if let Ok(number) = trimmed.parse::<i64>() {
        return Value::from(number);
    }
    if let Ok(number) = trimmed.parse::<f64>() {
        if number.is_finite() {
            return Value::from(number);
        }
    }
    Value::String(trimmed.to_string())
}
