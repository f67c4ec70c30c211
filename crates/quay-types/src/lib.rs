//! Shared data model for the quay engine (messages, permissions, summaries).
//!
//! These types cross the transport boundary, so everything here is
//! serde-serializable with snake_case wire names.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message in a session's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Returns true for roles that belong to the visible conversation
    /// (`user`, `assistant`). `system` and `tool` entries are internal.
    pub fn is_visible(self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Image content attached to a message.
///
/// Contains base64-encoded image data and MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContent {
    /// MIME type (e.g., "image/png", "image/jpeg")
    pub mime_type: String,
    /// Base64-encoded image data
    pub data: String,
}

impl ImageContent {
    /// Creates image content from raw bytes, encoding them as base64.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// Decodes the payload back into raw bytes.
    ///
    /// # Errors
    /// Returns an error if the stored data is not valid base64.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

/// One entry in a session's append-only message log.
///
/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageContent>,
}

impl Message {
    /// Creates a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    /// Creates a user message with an attached image.
    pub fn user_with_image(text: impl Into<String>, image: ImageContent) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: Some(image),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }

    /// Creates a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            image: None,
        }
    }

    /// Creates a tool message.
    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            text: text.into(),
            image: None,
        }
    }
}

/// A choice offered (and eventually taken) for a permission prompt.
///
/// `Always` and `Session` are remembered grants; `Once` allows a single
/// execution; `No` denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionChoice {
    Always,
    Session,
    Once,
    No,
}

impl PermissionChoice {
    /// All choices, in the order they are presented to callers.
    pub const ALL: [PermissionChoice; 4] = [
        PermissionChoice::Always,
        PermissionChoice::Session,
        PermissionChoice::Once,
        PermissionChoice::No,
    ];

    /// Returns true if the choice allows the pending action to proceed.
    pub fn is_allowed(self) -> bool {
        !matches!(self, PermissionChoice::No)
    }
}

impl std::str::FromStr for PermissionChoice {
    type Err = String;

    /// Parses a choice from its wire name or single-letter shorthand.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "a" => Ok(PermissionChoice::Always),
            "session" | "s" => Ok(PermissionChoice::Session),
            "once" | "o" => Ok(PermissionChoice::Once),
            "no" | "n" => Ok(PermissionChoice::No),
            other => Err(format!("unknown permission choice: {other}")),
        }
    }
}

/// Read-only view of a session for "recent sessions" listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
    /// Short title derived from the first user message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
