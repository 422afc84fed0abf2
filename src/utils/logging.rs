use crate::core::message::{Message, Role};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Plain-text transcript of a chat session, appended as turns settle.
pub struct TranscriptLog {
    file_path: Option<PathBuf>,
    is_active: bool,
}

impl TranscriptLog {
    pub fn disabled() -> Self {
        Self {
            file_path: None,
            is_active: false,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.into();
        test_file_access(&path)?;
        Ok(Self {
            file_path: Some(path),
            is_active: true,
        })
    }

    pub fn toggle(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match &self.file_path {
            Some(path) => {
                if self.is_active {
                    self.log_message("## Logging paused")?;
                    self.is_active = false;
                    Ok(format!("Logging paused (file: {})", path.display()))
                } else {
                    self.is_active = true;
                    Ok(format!("Logging resumed to: {}", path.display()))
                }
            }
            None => Err("No log file specified. Start with --log <file> to enable logging.".into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }

    pub fn log_turn(&self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        match format_turn(message) {
            Some(text) => self.log_message(&text),
            None => Ok(()),
        }
    }

    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.active_path() else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Replaces the log with `messages`, after a retry or edit rewrote history.
    pub fn rewrite(&self, messages: &[Message]) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.active_path() else {
            return Ok(());
        };
        let parent = file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp_file = NamedTempFile::new_in(parent)?;
        for text in messages.iter().filter_map(format_turn) {
            for line in text.lines() {
                writeln!(temp_file, "{line}")?;
            }
            writeln!(temp_file)?;
        }

        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(file_path)?;
        Ok(())
    }

    fn active_path(&self) -> Option<&Path> {
        if self.is_active {
            self.file_path.as_deref()
        } else {
            None
        }
    }
}

fn format_turn(message: &Message) -> Option<String> {
    match message.role {
        Role::User => Some(format!("You: {}", message.content)),
        Role::Assistant if !message.content.is_empty() => Some(message.content.clone()),
        Role::Assistant => None,
        Role::System => Some(format!("## {}", message.content)),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

fn test_file_access(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.flush()?;
    Ok(())
}
