//! Request and response types for hosted language/image models.

use crate::dialogue::ConversationMessage;
use crate::geo::LatLng;
use crate::proposal::VisionImage;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};

/// Output kinds a request asks the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    Text,
    Image,
}

/// Free-form conversational text, or a mandated JSON response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A base64-encoded image travelling to or from a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: BASE64_STANDARD.encode(bytes),
        }
    }

    pub fn into_vision_image(self) -> VisionImage {
        VisionImage::Inline {
            mime_type: self.mime_type,
            data: self.data,
        }
    }
}

/// An image sent alongside the request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Text part placed right before the image, telling the model what it is.
    pub label: Option<String>,
    pub image: InlineImage,
}

/// One stateless model call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub system_instruction: Option<String>,
    /// Prior turns, oldest first.
    pub history: Vec<ConversationMessage>,
    /// The latest user utterance.
    pub message: String,
    pub attachments: Vec<Attachment>,
    pub temperature: Option<f32>,
    pub response_format: ResponseFormat,
    pub modalities: Vec<Modality>,
    /// Site under discussion, for backends that answer without a model.
    pub location: Option<LatLng>,
}

impl InferenceRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            system_instruction: None,
            history: Vec::new(),
            message: message.into(),
            attachments: Vec::new(),
            temperature: None,
            response_format: ResponseFormat::Text,
            modalities: vec![Modality::Text],
            location: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_attachment(mut self, label: Option<String>, image: InlineImage) -> Self {
        self.attachments.push(Attachment { label, image });
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Requests a pure JSON response.
    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }

    /// Requests a combined text + image response.
    pub fn with_image_output(mut self) -> Self {
        self.modalities = vec![Modality::Text, Modality::Image];
        self
    }

    pub fn with_location(mut self, location: LatLng) -> Self {
        self.location = Some(location);
        self
    }

    pub fn wants_image(&self) -> bool {
        self.modalities.contains(&Modality::Image)
    }
}

/// Model output.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub text: String,
    pub images: Vec<InlineImage>,
    /// Name of the backend that produced the response.
    pub backend: String,
}

impl InferenceResponse {
    pub fn text(backend: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            backend: backend.into(),
        }
    }

    pub fn first_image(&self) -> Option<&InlineImage> {
        self.images.first()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}
