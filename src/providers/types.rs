// Shared message and attachment model for multi-provider support
//
// These types abstract over provider-specific wire formats (Anthropic,
// OpenAI-compatible, Gemini, etc.). Each adapter translates them into its
// own JSON shape; the turn loop and accumulator only ever see these.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of payload an attachment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Text,
    Image,
    Folder,
}

/// A file the caller wants sent alongside the prompt
///
/// `data` is plain text for Text attachments and base64 for Image
/// attachments. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// Original file path if available
    pub path: String,
    pub data: String,
    pub kind: AttachmentKind,
    pub mime_type: String,
}

impl Attachment {
    pub fn text(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            data: data.into(),
            kind: AttachmentKind::Text,
            mime_type: "text/plain".to_string(),
        }
    }

    pub fn image(
        name: impl Into<String>,
        base64_data: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            data: base64_data.into(),
            kind: AttachmentKind::Image,
            mime_type: mime_type.into(),
        }
    }

    /// Wrap a text attachment the way every adapter sends it
    pub fn framed_text(&self) -> String {
        format!(
            "--- File: {} ---\n{}\n--- End File ---",
            self.name, self.data
        )
    }
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Tool results going back to the model
    Tool,
}

/// One piece of content within a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded bytes
        data: String,
        mime_type: String,
    },
    ToolUse {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Some vendor streams emit parts carrying nothing at all. Those must
    /// never reach history or a token sink.
    pub fn is_empty(&self) -> bool {
        match self {
            ContentPart::Text { text } => text.is_empty(),
            ContentPart::Image { data, .. } => data.is_empty(),
            ContentPart::ToolUse { id, name, .. } => id.is_empty() && name.is_empty(),
            ContentPart::ToolResult { content, .. } => content.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentPart::ToolUse { .. })
    }
}

/// One role-tagged group of content parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Turn {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            parts: Vec::new(),
        }
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    /// Append a part, silently dropping empty ones
    pub fn push_part(&mut self, part: ContentPart) {
        if !part.is_empty() {
            self.parts.push(part);
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_part(ContentPart::text(text));
        self
    }

    /// First text part, if any
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| p.as_text())
    }

    /// Tool-use parts in the order they appear
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, args } => {
                    Some((id.as_str(), name.as_str(), args))
                }
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.parts.iter().any(|p| p.is_tool_use())
    }
}

/// Token counts reported by the vendor, when available
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}
