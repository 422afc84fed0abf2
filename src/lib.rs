//! Murmur is a streaming chat client for remote AI APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversations, transcripts, persistence and the orchestrator
//!   that turns user intents into streamed exchanges.
//! - [`providers`] defines the adapter contract backends implement, their
//!   settings schemas, and the bundled OpenAI adapter.
//! - [`api`] holds the wire payloads exchanged with OpenAI-compatible endpoints.
//! - [`commands`] parses the slash commands of the interactive chat.
//! - [`cli`] wires configuration, storage and providers together and runs the
//!   chat, `say` and management subcommands.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod providers;
pub mod utils;
