//! MCP content envelopes shared by tool, prompt and resource responses.

use serde::{Deserialize, Serialize};

/// Sender or recipient of messages and data in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Optional annotations describing who content is for and how important it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<Role>,
    /// Priority in [0, 1]; 1 means effectively required, 0 entirely optional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
}

/// The contents of a resource: either text or base64-encoded binary data,
/// each carrying its URI and optional MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    #[serde(rename_all = "camelCase")]
    Text {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Blob {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Base64-encoded binary data.
        blob: String,
    },
}

impl ResourceContents {
    pub fn uri(&self) -> &str {
        match self {
            Self::Text { uri, .. } | Self::Blob { uri, .. } => uri,
        }
    }
}

/// A single item of content provided to or from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    Image {
        /// Base64-encoded image data.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    Resource {
        resource: ResourceContents,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
}

impl Content {
    /// Text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            annotations: None,
        }
    }

    /// Image content; `data` is base64-encoded.
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
            annotations: None,
        }
    }

    /// Embedded text resource content.
    pub fn text_resource(
        uri: impl Into<String>,
        text: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self::Resource {
            resource: ResourceContents::Text {
                uri: uri.into(),
                mime_type: Some(mime_type.into()),
                text: text.into(),
            },
            annotations: None,
        }
    }

    /// Embedded blob resource content; `blob` is base64-encoded.
    pub fn blob_resource(
        uri: impl Into<String>,
        blob: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self::Resource {
            resource: ResourceContents::Blob {
                uri: uri.into(),
                mime_type: Some(mime_type.into()),
                blob: blob.into(),
            },
            annotations: None,
        }
    }

    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        match &mut self {
            Self::Text { annotations: a, .. }
            | Self::Image { annotations: a, .. }
            | Self::Resource { annotations: a, .. } => *a = Some(annotations),
        }
        self
    }
}

/// A successful tool invocation result as returned by user handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<Content>,
}

impl ToolResponse {
    pub fn new(content: Vec<Content>) -> Self {
        Self { content }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
        }
    }
}

/// The `tools/call` wire result: content plus an error flag.
///
/// Handler errors never become protocol errors; they are carried here as a
/// single text item with `isError: true` so `tools/call` always yields a
/// well-formed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn success(response: ToolResponse) -> Self {
        Self {
            content: response.content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }
}

impl From<crate::error::Result<ToolResponse>> for CallToolResult {
    fn from(outcome: crate::error::Result<ToolResponse>) -> Self {
        match outcome {
            Ok(response) => Self::success(response),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// One role-tagged message inside a prompt response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

impl PromptMessage {
    pub fn new(role: Role, content: Content) -> Self {
        Self { role, content }
    }
}

/// A rendered prompt as returned by user handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub description: String,
    pub messages: Vec<PromptMessage>,
}

impl PromptResponse {
    pub fn new(description: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            description: description.into(),
            messages,
        }
    }
}

/// The `prompts/get` wire result. Handler errors travel in the `error`
/// field rather than as protocol errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GetPromptResult {
    pub fn success(response: PromptResponse) -> Self {
        Self {
            description: response.description,
            messages: response.messages,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            messages: vec![],
            error: Some(message.into()),
        }
    }
}

/// A resource read result as returned by user handlers: an ordered list of
/// embedded resource contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub contents: Vec<ResourceContents>,
}

impl ResourceResponse {
    pub fn new(contents: Vec<ResourceContents>) -> Self {
        Self { contents }
    }

    pub fn text(
        uri: impl Into<String>,
        text: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            contents: vec![ResourceContents::Text {
                uri: uri.into(),
                mime_type: Some(mime_type.into()),
                text: text.into(),
            }],
        }
    }
}

/// The `resources/read` wire result, with the same error convention as
/// [`GetPromptResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReadResourceResult {
    pub fn success(response: ResourceResponse) -> Self {
        Self {
            contents: response.contents,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            contents: vec![],
            error: Some(message.into()),
        }
    }
}
