//! Data-described provider settings.
//!
//! Each adapter publishes a list of [`SettingItem`]s. Raw values from the config file
//! and the environment are resolved against that list once at startup, so adapters
//! only ever read typed, in-range values.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::core::config::data::Config;
use crate::providers::ProviderRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingKind {
    /// Secret string; never printed back in full.
    ApiKey,
    Input {
        default: Option<String>,
    },
    Select {
        options: Vec<SelectOption>,
        default: String,
    },
    Slider {
        min: f64,
        max: f64,
        step: f64,
        default: f64,
    },
    Toggle {
        default: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingItem {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: SettingKind,
}

impl SettingItem {
    pub fn new(key: impl Into<String>, name: impl Into<String>, kind: SettingKind) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: None,
            kind,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn default_value(&self) -> Option<Value> {
        match &self.kind {
            SettingKind::ApiKey => None,
            SettingKind::Input { default } => default.clone().map(Value::String),
            SettingKind::Select { default, .. } => Some(Value::String(default.clone())),
            SettingKind::Slider { default, .. } => Some(Value::from(*default)),
            SettingKind::Toggle { default } => Some(Value::Bool(*default)),
        }
    }

    /// Coerces one raw value into range, falling back to the default.
    fn resolve(&self, provider_id: &str, raw: Option<&Value>) -> Option<Value> {
        let Some(raw) = raw else {
            return self.default_value();
        };

        let resolved = match &self.kind {
            SettingKind::ApiKey | SettingKind::Input { .. } => match raw {
                Value::String(text) if !text.trim().is_empty() => {
                    Some(Value::String(text.trim().to_string()))
                }
                Value::String(_) => None,
                other => Some(Value::String(other.to_string())),
            },
            SettingKind::Select { options, .. } => match raw.as_str() {
                Some(choice) if options.iter().any(|opt| opt.value == choice) => {
                    Some(Value::String(choice.to_string()))
                }
                _ => None,
            },
            SettingKind::Slider { min, max, .. } => raw
                .as_f64()
                .or_else(|| raw.as_str().and_then(|text| text.trim().parse().ok()))
                .map(|value| Value::from(value.clamp(*min, *max))),
            SettingKind::Toggle { .. } => match raw {
                Value::Bool(flag) => Some(Value::Bool(*flag)),
                Value::String(text) => match text.as_str() {
                    "true" | "on" | "yes" | "1" => Some(Value::Bool(true)),
                    "false" | "off" | "no" | "0" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
        };

        if resolved.is_none() && !matches!(raw, Value::String(s) if s.trim().is_empty()) {
            warn!(
                provider = provider_id,
                key = %self.key,
                value = %raw,
                "ignoring invalid setting value"
            );
        }
        resolved.or_else(|| self.default_value())
    }
}

/// Typed view of one provider's settings after defaults and clamping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSettings {
    values: BTreeMap<String, Value>,
}

impl ResolvedSettings {
    pub fn resolve(
        provider_id: &str,
        schema: &[SettingItem],
        raw: &BTreeMap<String, Value>,
    ) -> Self {
        let mut values = BTreeMap::new();
        for item in schema {
            if let Some(value) = item.resolve(provider_id, raw.get(&item.key)) {
                values.insert(item.key.clone(), value);
            }
        }
        for key in raw.keys() {
            if !schema.iter().any(|item| &item.key == key) {
                warn!(provider = provider_id, key = %key, "unknown setting ignored");
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn u32(&self, key: &str) -> Option<u32> {
        self.f64(key).map(|value| value.round() as u32)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Resolved settings for every registered provider, config values first and
/// environment overrides on top.
pub fn resolve_all(
    registry: &ProviderRegistry,
    config: &Config,
) -> HashMap<String, ResolvedSettings> {
    registry
        .list()
        .iter()
        .map(|provider| {
            let mut raw = config.provider_values(provider.id());
            raw.extend(provider.env_overrides());
            let resolved =
                ResolvedSettings::resolve(provider.id(), provider.settings_schema(), &raw);
            (provider.id().to_string(), resolved)
        })
        .collect()
}

/// Value as shown to the user; api keys are masked.
pub fn display_value(item: &SettingItem, value: Option<&Value>) -> String {
    match (value, &item.kind) {
        (None, _) => "(not set)".to_string(),
        (Some(Value::String(secret)), SettingKind::ApiKey) => mask_secret(secret),
        (Some(Value::String(text)), _) => text.clone(),
        (Some(other), _) => other.to_string(),
    }
}

fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", "*".repeat(4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<SettingItem> {
        vec![
            SettingItem::new("api_key", "API Key", SettingKind::ApiKey),
            SettingItem::new(
                "model",
                "Model",
                SettingKind::Select {
                    options: vec![
                        SelectOption::new("small", "Small"),
                        SelectOption::new("large", "Large"),
                    ],
                    default: "small".into(),
                },
            ),
            SettingItem::new(
                "temperature",
                "Temperature",
                SettingKind::Slider {
                    min: 0.0,
                    max: 2.0,
                    step: 0.1,
                    default: 1.0,
                },
            ),
            SettingItem::new("verbose", "Verbose", SettingKind::Toggle { default: false }),
            SettingItem::new(
                "base_url",
                "Base URL",
                SettingKind::Input {
                    default: Some("https://example.test".into()),
                },
            ),
        ]
    }

    fn raw(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_fill_missing_values() {
        let resolved = ResolvedSettings::resolve("p", &schema(), &BTreeMap::new());
        assert_eq!(resolved.str("model"), Some("small"));
        assert_eq!(resolved.f64("temperature"), Some(1.0));
        assert_eq!(resolved.bool("verbose"), Some(false));
        assert_eq!(resolved.str("base_url"), Some("https://example.test"));
        assert!(resolved.get("api_key").is_none());
    }

    #[test]
    fn sliders_clamp_and_accept_numeric_strings() {
        let resolved = ResolvedSettings::resolve(
            "p",
            &schema(),
            &raw(&[("temperature", json!(7.5))]),
        );
        assert_eq!(resolved.f64("temperature"), Some(2.0));

        let resolved = ResolvedSettings::resolve(
            "p",
            &schema(),
            &raw(&[("temperature", json!("0.25"))]),
        );
        assert_eq!(resolved.f64("temperature"), Some(0.25));
    }

    #[test]
    fn unknown_select_value_falls_back_to_default() {
        let resolved =
            ResolvedSettings::resolve("p", &schema(), &raw(&[("model", json!("huge"))]));
        assert_eq!(resolved.str("model"), Some("small"));

        let resolved =
            ResolvedSettings::resolve("p", &schema(), &raw(&[("model", json!("large"))]));
        assert_eq!(resolved.str("model"), Some("large"));
    }

    #[test]
    fn blank_strings_count_as_unset() {
        let resolved = ResolvedSettings::resolve(
            "p",
            &schema(),
            &raw(&[("api_key", json!("   ")), ("base_url", json!(""))]),
        );
        assert!(resolved.get("api_key").is_none());
        assert_eq!(resolved.str("base_url"), Some("https://example.test"));
    }

    #[test]
    fn toggles_accept_words() {
        let resolved =
            ResolvedSettings::resolve("p", &schema(), &raw(&[("verbose", json!("on"))]));
        assert_eq!(resolved.bool("verbose"), Some(true));
    }

    #[test]
    fn api_keys_are_masked_for_display() {
        let item = SettingItem::new("api_key", "API Key", SettingKind::ApiKey);
        assert_eq!(
            display_value(&item, Some(&json!("sk-1234567890abcd"))),
            "****…abcd"
        );
        assert_eq!(display_value(&item, Some(&json!("short"))), "*****");
        assert_eq!(display_value(&item, None), "(not set)");
    }
}
