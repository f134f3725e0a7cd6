//! Image payload codec.
//!
//! A chat message can carry a single image by embedding its data URL after a
//! marker line:
//!
//! ```text
//! <prompt>
//!
//! 画像データ: data:image/png;base64,iVBORw0KGgo...
//! ```
//!
//! Messages are decoded once at the boundary into [`MessageContent`], so the
//! rest of the system never has to look for the marker again.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use once_cell::sync::Lazy;
use regex::Regex;

/// Marker that precedes an embedded image data URL.
pub const IMAGE_MARKER: &str = "画像データ:";

/// Prompt used when an image is sent without accompanying text.
pub const DEFAULT_IMAGE_PROMPT: &str = "この画像について教えてください。";

static IMAGE_PAYLOAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"画像データ:\s*(data:image/[^;]+;base64,[A-Za-z0-9+/=]+)")
        .expect("image payload regex is valid")
});

static IMAGE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[img-[A-Za-z0-9_-]+\]").expect("image tag regex is valid"));

static DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(image/[^;]+);base64,([A-Za-z0-9+/=]+)$").expect("data url regex is valid")
});

/// Accepts base64 with or without trailing padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded image attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    mime_type: String,
    bytes: Vec<u8>,
}

impl ImageData {
    /// Build an image from raw bytes and a MIME type such as `image/png`.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Parse a `data:image/<type>;base64,<payload>` URL.
    ///
    /// Returns `None` when the URL is not an image data URL or the payload is
    /// not valid base64.
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let caps = DATA_URL_RE.captures(data_url.trim())?;
        let mime_type = caps.get(1)?.as_str().to_string();
        let bytes = LENIENT_BASE64.decode(caps.get(2)?.as_str()).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(Self { mime_type, bytes })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64 payload without the `data:` prefix.
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Render the image as a data URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Chat message content with the image payload (if any) split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    TextOnly(String),
    TextWithImage { text: String, image: ImageData },
}

impl MessageContent {
    /// The user-visible text, with any image payload removed.
    pub fn text(&self) -> &str {
        match self {
            MessageContent::TextOnly(text) => text,
            MessageContent::TextWithImage { text, .. } => text,
        }
    }

    pub fn image(&self) -> Option<&ImageData> {
        match self {
            MessageContent::TextOnly(_) => None,
            MessageContent::TextWithImage { image, .. } => Some(image),
        }
    }

    pub fn has_image(&self) -> bool {
        self.image().is_some()
    }
}

/// Encode a prompt and an image into the wire text of a chat message.
///
/// An empty (or whitespace-only) prompt is replaced by [`DEFAULT_IMAGE_PROMPT`].
pub fn encode(prompt: &str, image: &ImageData) -> String {
    let prompt = prompt.trim();
    let prompt = if prompt.is_empty() {
        DEFAULT_IMAGE_PROMPT
    } else {
        prompt
    };
    format!("{}\n\n{} {}", prompt, IMAGE_MARKER, image.data_url())
}

/// Decode wire text into [`MessageContent`].
///
/// Only the first embedded image is honored. A payload whose base64 does not
/// decode is treated as plain text here; routing decisions go by
/// [`extract_image_data_url`] alone.
pub fn decode(text: &str) -> MessageContent {
    let image = extract_image_data_url(text).and_then(ImageData::from_data_url);
    match image {
        Some(image) => MessageContent::TextWithImage {
            text: clean_text(text),
            image,
        },
        None => MessageContent::TextOnly(text.to_string()),
    }
}

/// Return the first embedded image data URL, if any.
pub fn extract_image_data_url(text: &str) -> Option<&str> {
    IMAGE_PAYLOAD_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Strip the first marker and payload plus any `[img-<id>]` tags, then trim.
pub fn clean_text(text: &str) -> String {
    let without_payload = match IMAGE_PAYLOAD_RE.find(text) {
        Some(m) => format!("{}{}", &text[..m.start()], &text[m.end()..]),
        None => text.to_string(),
    };
    IMAGE_TAG_RE
        .replace_all(&without_payload, "")
        .trim()
        .to_string()
}
