use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for Role {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One turn of a conversation transcript.
///
/// `stream` is true only while the message is the live target of an exchange;
/// `is_selected` is presentation state and never drives engine control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub is_selected: bool,
    pub date_time: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            stream: false,
            is_selected: false,
            date_time: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty assistant turn that will receive streamed content.
    pub fn assistant_placeholder() -> Self {
        Self {
            stream: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    pub fn apply(&mut self, patch: &MessagePatch) {
        if let Some(content) = &patch.content {
            self.content.clone_from(content);
        }
        if let Some(stream) = patch.stream {
            self.stream = stream;
        }
        if let Some(is_selected) = patch.is_selected {
            self.is_selected = is_selected;
        }
    }
}

/// Partial update merged into an existing message. Identity and role are not patchable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub stream: Option<bool>,
    pub is_selected: Option<bool>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn stream(stream: bool) -> Self {
        Self {
            stream: Some(stream),
            ..Self::default()
        }
    }

    pub fn selected(is_selected: bool) -> Self {
        Self {
            is_selected: Some(is_selected),
            ..Self::default()
        }
    }
}
