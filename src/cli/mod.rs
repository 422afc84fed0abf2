//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod conversations;
pub mod render;
pub mod say;
pub mod session;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::cli::session::{default_registry, Session, Storage};
use crate::core::config::data::Config;
use crate::providers::settings::resolve_all;

const LOG_ENV: &str = "MURMUR_LOG";

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_SHA"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "murmur")]
#[command(version = VERSION)]
#[command(about = "A streaming chat client for OpenAI-compatible APIs")]
#[command(
    long_about = "Murmur keeps conversations with chat and image bots, streams replies as \
they arrive and stores every conversation under its data directory.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    Your OpenAI API key (overrides the configured api_key)\n\
  OPENAI_BASE_URL   Custom API base URL (overrides the configured base_url)\n\
  MURMUR_LOG        Diagnostic log filter, e.g. 'murmur=debug' (written to stderr)\n\n\
Chat commands:\n\
  /help             List every command\n\
  /new [bot]        Start a conversation\n\
  /retry            Regenerate the last reply\n\
  /abort            Stop the reply in progress\n\
  /quit             Leave"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file to use instead of the default location
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Append the chat transcript to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<String>,

    /// Bot for new conversations, as provider:bot or a bot id of the default provider
    #[arg(short = 'b', long, global = true, value_name = "BOT")]
    pub bot: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat {
        /// Resume a conversation by list position or id prefix
        conversation: Option<String>,
    },
    /// Send one prompt and print the reply without saving it
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List stored conversations
    List,
    /// Delete a conversation by list position or id prefix
    Delete { conversation: String },
    /// Set a global configuration value (default-provider, default-bot, auto-title, data-dir)
    Set {
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a global configuration value
    Unset { key: String },
    /// Show or change provider settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show the effective settings of one provider, or all of them
    Show { provider: Option<String> },
    /// Store a provider setting
    Set {
        provider: String,
        key: String,
        value: String,
    },
    /// Remove a stored provider setting
    Unset { provider: String, key: String },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

/// Diagnostics go to stderr so they never interleave with streamed replies.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command.unwrap_or(Commands::Chat { conversation: None }) {
        Commands::Chat { conversation } => {
            let session = Session::open(args.config, args.bot.as_deref(), Storage::Disk)?;
            run_chat(session, conversation, args.log).await
        }
        Commands::Say { prompt } => {
            let session = Session::open(args.config, args.bot.as_deref(), Storage::Memory)?;
            run_say(session, prompt).await
        }
        Commands::List => {
            let session = Session::open(args.config, args.bot.as_deref(), Storage::Disk)?;
            conversations::list_conversations(&session.orchestrator)
        }
        Commands::Delete { conversation } => {
            let session = Session::open(args.config, args.bot.as_deref(), Storage::Disk)?;
            conversations::delete_conversation(&session.orchestrator, &conversation)
        }
        Commands::Set { key, value } => {
            let config_path = args.config.unwrap_or_else(Config::get_config_path);
            let mut config = Config::load_from_path(&config_path)?;
            if value.is_empty() {
                config.print_all();
                return Ok(());
            }
            match settings::set_global(&mut config, &key, &value.join(" ")) {
                Ok(message) => {
                    config.save_to_path(&config_path)?;
                    println!("{message}");
                }
                Err(err) => {
                    err.print();
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Unset { key } => {
            let config_path = args.config.unwrap_or_else(Config::get_config_path);
            let mut config = Config::load_from_path(&config_path)?;
            match settings::unset_global(&mut config, &key) {
                Ok(message) => {
                    config.save_to_path(&config_path)?;
                    println!("{message}");
                }
                Err(err) => {
                    err.print();
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Settings { action } => {
            let config_path = args.config.unwrap_or_else(Config::get_config_path);
            run_settings(&config_path, action.unwrap_or(SettingsAction::Show { provider: None }))
        }
    }
}

fn run_settings(config_path: &std::path::Path, action: SettingsAction) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_from_path(config_path)?;
    let registry = default_registry();

    let result = match action {
        SettingsAction::Show { provider } => {
            let resolved = resolve_all(&registry, &config);
            let ids: Vec<String> = match provider {
                Some(id) => vec![id],
                None => {
                    config.print_all();
                    println!();
                    registry.list().iter().map(|p| p.id().to_string()).collect()
                }
            };
            ids.iter().try_for_each(|id| {
                let values = resolved
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(id))
                    .map(|(_, values)| values.clone())
                    .unwrap_or_default();
                settings::describe_provider(&registry, id, &values).map(|lines| {
                    for line in lines {
                        println!("{line}");
                    }
                })
            })
        }
        SettingsAction::Set {
            provider,
            key,
            value,
        } => settings::set_provider(&mut config, &registry, &provider, &key, &value).and_then(
            |message| {
                config
                    .save_to_path(config_path)
                    .map_err(|err| settings::SettingError::InvalidValue {
                        key: key.clone(),
                        reason: format!("could not save configuration: {err}"),
                    })?;
                println!("{message}");
                Ok(())
            },
        ),
        SettingsAction::Unset { provider, key } => {
            settings::unset_provider(&mut config, &registry, &provider, &key).and_then(|message| {
                config
                    .save_to_path(config_path)
                    .map_err(|err| settings::SettingError::InvalidValue {
                        key: key.clone(),
                        reason: format!("could not save configuration: {err}"),
                    })?;
                println!("{message}");
                Ok(())
            })
        }
    };

    if let Err(err) = result {
        err.print();
        std::process::exit(1);
    }
    Ok(())
}
