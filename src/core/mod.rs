pub mod config;
pub mod conversation;
pub mod engine;
pub mod events;
pub mod ids;
pub mod message;
pub mod message_store;
pub mod orchestrator;
pub mod persistence;
pub mod stream_registry;
