//! Opaque identifiers for conversations and messages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

const ID_BYTES: usize = 9;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

macro_rules! opaque_id {
    ($name:ident) => {
        impl $name {
            pub fn generate() -> Self {
                Self(random_urlsafe(ID_BYTES))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(ConversationId);
opaque_id!(MessageId);

pub fn random_urlsafe(bytes_len: usize) -> String {
    let bytes = best_effort_random_bytes(bytes_len);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn best_effort_random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0_u8; len];
    if getrandom::fill(&mut out).is_ok() {
        return out;
    }

    // Timestamp plus a process-local counter keeps ids unique without an entropy source.
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_le_bytes();
    let counter = FALLBACK_COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .to_le_bytes();
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = nanos[i % nanos.len()] ^ counter[(i + 3) % counter.len()];
    }
    out
}
