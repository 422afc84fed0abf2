//! `set`/`unset` for global keys and `settings` for per-provider values.

use std::fmt;
use std::path::PathBuf;

use crate::cli::session::parse_bot;
use crate::core::config::data::{parse_cli_value, Config};
use crate::providers::settings::{display_value, ResolvedSettings, SettingKind};
use crate::providers::ProviderRegistry;

#[derive(Debug, PartialEq)]
pub enum SettingError {
    UnknownKey(String),
    UnknownProvider(String),
    UnknownSetting { provider: String, key: String },
    InvalidValue { key: String, reason: String },
}

impl SettingError {
    pub fn print(&self) {
        eprintln!("❌ {self}");
        if let SettingError::UnknownProvider(_) | SettingError::UnknownSetting { .. } = self {
            eprintln!("💡 Run 'murmur settings show' to list providers and their settings.");
        }
    }
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected default-provider, default-bot, auto-title or data-dir)"
            ),
            SettingError::UnknownProvider(provider) => write!(f, "Unknown provider: {provider}"),
            SettingError::UnknownSetting { provider, key } => {
                write!(f, "Provider '{provider}' has no setting '{key}'")
            }
            SettingError::InvalidValue { key, reason } => write!(f, "Invalid value for {key}: {reason}"),
        }
    }
}

impl std::error::Error for SettingError {}

/// Applies `murmur set <key> <value>` to `config`.
pub fn set_global(config: &mut Config, key: &str, value: &str) -> Result<String, SettingError> {
    let value = value.trim();
    match key {
        "default-provider" => {
            config.default_provider = Some(value.to_lowercase());
        }
        "default-bot" => {
            let bot = parse_bot(value, &config.default_bot_ref()).map_err(|reason| {
                SettingError::InvalidValue {
                    key: key.to_string(),
                    reason,
                }
            })?;
            config.default_provider = Some(bot.provider_id);
            config.default_bot = Some(bot.bot_id);
        }
        "auto-title" => match parse_cli_value(value) {
            serde_json::Value::Bool(flag) => config.auto_title = Some(flag),
            _ => {
                return Err(SettingError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected true or false, got '{value}'"),
                })
            }
        },
        "data-dir" => {
            config.data_dir = Some(PathBuf::from(value));
        }
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(format!("✅ Set {key} to: {value}"))
}

pub fn unset_global(config: &mut Config, key: &str) -> Result<String, SettingError> {
    match key {
        "default-provider" => config.default_provider = None,
        "default-bot" => config.default_bot = None,
        "auto-title" => config.auto_title = None,
        "data-dir" => config.data_dir = None,
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(format!("✅ Unset {key}"))
}

/// Stores a provider setting after checking the key against the provider's schema.
pub fn set_provider(
    config: &mut Config,
    registry: &ProviderRegistry,
    provider: &str,
    key: &str,
    value: &str,
) -> Result<String, SettingError> {
    let adapter = registry
        .get(provider)
        .ok_or_else(|| SettingError::UnknownProvider(provider.to_string()))?;
    let item = adapter
        .settings_schema()
        .iter()
        .find(|item| item.key == key)
        .ok_or_else(|| SettingError::UnknownSetting {
            provider: provider.to_string(),
            key: key.to_string(),
        })?;

    let parsed = match item.kind {
        // Secrets and free text are stored verbatim.
        SettingKind::ApiKey | SettingKind::Input { .. } => serde_json::Value::String(value.trim().to_string()),
        _ => parse_cli_value(value),
    };
    if let SettingKind::Select { options, .. } = &item.kind {
        if !options.iter().any(|opt| Some(opt.value.as_str()) == parsed.as_str()) {
            let choices: Vec<&str> = options.iter().map(|opt| opt.value.as_str()).collect();
            return Err(SettingError::InvalidValue {
                key: key.to_string(),
                reason: format!("choose one of {}", choices.join(", ")),
            });
        }
    }

    let shown = display_value(item, Some(&parsed));
    config.set_provider_value(adapter.id(), key, parsed);
    Ok(format!("✅ Set {}.{key} to: {shown}", adapter.id()))
}

pub fn unset_provider(
    config: &mut Config,
    registry: &ProviderRegistry,
    provider: &str,
    key: &str,
) -> Result<String, SettingError> {
    let adapter = registry
        .get(provider)
        .ok_or_else(|| SettingError::UnknownProvider(provider.to_string()))?;
    if config.unset_provider_value(adapter.id(), key) {
        Ok(format!("✅ Unset {}.{key}", adapter.id()))
    } else {
        Ok(format!("{}.{key} was not set", adapter.id()))
    }
}

/// Lines describing a provider's bots and effective settings.
pub fn describe_provider(
    registry: &ProviderRegistry,
    provider: &str,
    resolved: &ResolvedSettings,
) -> Result<Vec<String>, SettingError> {
    let adapter = registry
        .get(provider)
        .ok_or_else(|| SettingError::UnknownProvider(provider.to_string()))?;

    let mut lines = vec![format!("{} ({})", adapter.name(), adapter.id())];
    lines.push("  bots:".to_string());
    for bot in adapter.bots() {
        lines.push(format!("    {}:{}  {}", adapter.id(), bot.id, bot.name));
    }
    lines.push("  settings:".to_string());
    for item in adapter.settings_schema() {
        let value = display_value(item, resolved.get(&item.key));
        lines.push(format!("    {:<12} {value}", item.key));
        if let Some(description) = &item.description {
            lines.push(format!("    {:<12} {description}", ""));
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::session::default_registry;
    use crate::core::conversation::BotRef;
    use serde_json::json;

    #[test]
    fn global_keys_round_trip_through_config() {
        let mut config = Config::default();
        set_global(&mut config, "default-bot", "openai:image_generation").unwrap();
        assert_eq!(
            config.default_bot_ref(),
            BotRef::new("openai", "image_generation")
        );

        set_global(&mut config, "auto-title", "false").unwrap();
        assert!(!config.auto_title_enabled());
        assert!(set_global(&mut config, "auto-title", "maybe").is_err());

        unset_global(&mut config, "auto-title").unwrap();
        assert!(config.auto_title_enabled());
        assert_eq!(
            set_global(&mut config, "theme", "dark"),
            Err(SettingError::UnknownKey("theme".into()))
        );
    }

    #[test]
    fn provider_values_are_checked_against_schema() {
        let registry = default_registry();
        let mut config = Config::default();

        set_provider(&mut config, &registry, "OpenAI", "temperature", "0.4").unwrap();
        set_provider(&mut config, &registry, "openai", "api_key", "12345").unwrap();
        let values = config.provider_values("openai");
        assert_eq!(values["temperature"], json!(0.4));
        assert_eq!(values["api_key"], json!("12345"));

        assert!(matches!(
            set_provider(&mut config, &registry, "openai", "colour", "red"),
            Err(SettingError::UnknownSetting { .. })
        ));
        assert!(matches!(
            set_provider(&mut config, &registry, "nope", "model", "x"),
            Err(SettingError::UnknownProvider(_))
        ));
        assert!(matches!(
            set_provider(&mut config, &registry, "openai", "image_size", "huge"),
            Err(SettingError::InvalidValue { .. })
        ));
    }

    #[test]
    fn secrets_are_masked_in_confirmation_and_listing() {
        let registry = default_registry();
        let mut config = Config::default();
        let message =
            set_provider(&mut config, &registry, "openai", "api_key", "sk-abcdefghijkl").unwrap();
        assert!(!message.contains("sk-abcdefghijkl"));
        assert!(message.ends_with("ijkl"));

        let adapter = registry.get("openai").unwrap();
        let resolved = ResolvedSettings::resolve(
            "openai",
            adapter.settings_schema(),
            &config.provider_values("openai"),
        );
        let lines = describe_provider(&registry, "openai", &resolved).unwrap();
        assert!(lines.iter().any(|line| line.contains("openai:chat_continuous")));
        assert!(lines.iter().all(|line| !line.contains("sk-abcdefghijkl")));
    }

    #[test]
    fn unset_reports_missing_values() {
        let registry = default_registry();
        let mut config = Config::default();
        set_provider(&mut config, &registry, "openai", "model", "gpt-4o-2024-08-06").unwrap();
        assert!(unset_provider(&mut config, &registry, "openai", "model")
            .unwrap()
            .starts_with("✅"));
        assert!(unset_provider(&mut config, &registry, "openai", "model")
            .unwrap()
            .ends_with("was not set"));
    }
}
