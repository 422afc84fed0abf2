use crate::core::config::data::{path_display, Config};
use crate::core::config::defaults::{DEFAULT_BOT, DEFAULT_PROVIDER};

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!(
            "  default-provider: {}",
            self.default_provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
        );
        println!(
            "  default-bot: {}",
            self.default_bot.as_deref().unwrap_or(DEFAULT_BOT)
        );
        match self.auto_title_enabled() {
            true => println!("  auto-title: on"),
            false => println!("  auto-title: off"),
        }
        println!("  data-dir: {}", path_display(self.resolved_data_dir()));
    }
}
