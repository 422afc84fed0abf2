pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_BOT: &str = "chat_continuous";
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Fallback root when the platform reports no home directory.
pub const FALLBACK_DIR: &str = ".murmur";
