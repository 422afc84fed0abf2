//! Startup wiring shared by every command: config, storage, providers, orchestrator.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::config::data::Config;
use crate::core::conversation::BotRef;
use crate::core::engine::EngineHandle;
use crate::core::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::core::persistence::{JsonFilePersistence, MemoryPersistence, Persistence};
use crate::providers::openai::OpenAiProvider;
use crate::providers::{settings, ProviderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Conversations under the data directory.
    Disk,
    /// Nothing survives the process, used by `say`. Disables titling.
    Memory,
}

pub struct Session {
    pub config: Config,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub orchestrator: Orchestrator,
}

impl Session {
    pub fn open(
        config_path: Option<PathBuf>,
        bot: Option<&str>,
        storage: Storage,
    ) -> Result<Self, Box<dyn Error>> {
        let config_path = config_path.unwrap_or_else(Config::get_config_path);
        let config = Config::load_from_path(&config_path)?;
        let data_dir = config.resolved_data_dir();

        let persistence: Box<dyn Persistence> = match storage {
            Storage::Disk => Box::new(JsonFilePersistence::new(&data_dir)),
            Storage::Memory => Box::new(MemoryPersistence::new()),
        };
        let engine = EngineHandle::open(persistence)?;

        let registry = default_registry();
        let default_bot = match bot {
            Some(raw) => parse_bot(raw, &config.default_bot_ref())?,
            None => config.default_bot_ref(),
        };
        registry.resolve(&default_bot)?;

        let resolved = settings::resolve_all(&registry, &config);
        debug!(
            config = %config_path.display(),
            data = %data_dir.display(),
            bot = %default_bot,
            "session opened"
        );

        let orchestrator = Orchestrator::new(
            engine,
            registry,
            resolved,
            OrchestratorOptions {
                default_bot,
                // Unsaved conversations are never titled.
                auto_title: config.auto_title_enabled() && storage == Storage::Disk,
            },
        );

        Ok(Self {
            config,
            config_path,
            data_dir,
            orchestrator,
        })
    }
}

pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(OpenAiProvider::new(reqwest::Client::new())));
    registry
}

/// Accepts `provider:bot`, or a bare bot id on the default provider.
pub fn parse_bot(raw: &str, default: &BotRef) -> Result<BotRef, String> {
    let raw = raw.trim();
    if raw.contains(':') {
        BotRef::try_from(raw)
    } else if raw.is_empty() {
        Err("bot name cannot be empty".to_string())
    } else {
        Ok(BotRef::new(default.provider_id.clone(), raw))
    }
}
