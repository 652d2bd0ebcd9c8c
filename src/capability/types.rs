use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Media type used when an image carries no usable type information
pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/png";

/// Argument map passed to a capability
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// One piece of capability output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes
        data: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }

    /// Media type to declare for image content.
    ///
    /// Uses the declared type when present, otherwise sniffs the decoded
    /// bytes, otherwise falls back to PNG. `None` for text.
    pub fn image_media_type(&self) -> Option<String> {
        match self {
            ToolContent::Text { .. } => None,
            ToolContent::Image { data, media_type } => Some(
                media_type
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .or_else(|| sniff_media_type(data))
                    .unwrap_or_else(|| DEFAULT_IMAGE_MEDIA_TYPE.to_string()),
            ),
        }
    }
}

fn sniff_media_type(data: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data).ok()?;
    let media_type = match image::guess_format(&bytes).ok()? {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        _ => return None,
    };
    Some(media_type.to_string())
}

/// Structured result of a capability invocation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: true,
        }
    }

    /// Concatenated text content, for logging
    pub fn text_summary(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result type for capability operations
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors raised by a capability channel
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("failed to start automation backend `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to automation backend: {0}")]
    Io(#[from] std::io::Error),

    #[error("automation backend returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no response from automation backend within {0:?}")]
    Timeout(Duration),

    #[error("automation backend disconnected")]
    Disconnected,

    #[error("automation backend is not connected")]
    NotConnected,
}

/// Channel to the UI-automation backend
///
/// One channel is shared by every device in a run; callers serialize access
/// through `&mut self`.
pub trait CapabilityChannel {
    /// Establish the connection (no-op when already connected)
    fn connect(&mut self) -> CapabilityResult<()>;

    /// Invoke a named capability
    fn invoke(&mut self, name: &str, args: Arguments) -> CapabilityResult<ToolOutput>;

    /// Tear the connection down (no-op when not connected)
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_declared_media_type_wins() {
        let content = ToolContent::Image {
            data: encode(b"whatever"),
            media_type: Some("image/jpeg".into()),
        };
        assert_eq!(content.image_media_type().as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_media_type_sniffed_from_bytes() {
        let gif = encode(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;");
        let content = ToolContent::Image {
            data: gif,
            media_type: None,
        };
        assert_eq!(content.image_media_type().as_deref(), Some("image/gif"));
    }

    #[test]
    fn test_unknown_bytes_default_to_png() {
        let content = ToolContent::Image {
            data: "%%not-base64%%".into(),
            media_type: Some("  ".into()),
        };
        assert_eq!(content.image_media_type().as_deref(), Some(DEFAULT_IMAGE_MEDIA_TYPE));
        assert_eq!(ToolContent::text("x").image_media_type(), None);
    }

    #[test]
    fn test_tool_output_deserializes_mcp_shape() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "tapped"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"}
            ],
            "isError": false
        });
        let output: ToolOutput = serde_json::from_value(json).unwrap();
        assert_eq!(output.content.len(), 2);
        assert_eq!(output.text_summary(), "tapped");
        assert!(!output.is_error);
    }
}
