//! Image generation boundary: request shape and aspect ratio vocabulary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PanelGenerationError;
use crate::storyboard::model::{AspectRatio, PanelImage};

/// Aspect ratios the image service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAspectRatio {
    Widescreen,
    Portrait,
}

impl ServiceAspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Widescreen => "16:9",
            Self::Portrait => "9:16",
        }
    }
}

impl std::fmt::Display for ServiceAspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AspectRatio {
    /// Maps the project ratio onto the service vocabulary.
    ///
    /// Ultrawide has no service equivalent and is sent as 16:9; the project
    /// keeps 2.39:1 for layout.
    pub fn service_ratio(self) -> ServiceAspectRatio {
        match self {
            AspectRatio::Ultrawide | AspectRatio::Widescreen => ServiceAspectRatio::Widescreen,
            AspectRatio::Portrait => ServiceAspectRatio::Portrait,
        }
    }
}

/// One image generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: ServiceAspectRatio,
    /// Previously generated image used to keep the subject consistent.
    pub reference: Option<PanelImage>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, aspect_ratio: AspectRatio) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: aspect_ratio.service_ratio(),
            reference: None,
        }
    }

    /// Builder: Set the continuity reference.
    pub fn with_reference(mut self, reference: Option<PanelImage>) -> Self {
        self.reference = reference;
        self
    }

    /// Text part of the request. With a reference the prompt is wrapped so
    /// the model carries over subject and lighting.
    pub fn instruction(&self) -> String {
        match self.reference {
            Some(_) => format!(
                "Referencing the character/subject and lighting from the attached image, generate the next shot: {}. Ensure the subject remains consistent in features and clothing.",
                self.prompt
            ),
            None => self.prompt.clone(),
        }
    }
}

/// An image-generation backend.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<PanelImage, PanelGenerationError>;
}

#[async_trait]
impl<T: ImageGenerator + ?Sized> ImageGenerator for Arc<T> {
    async fn generate(&self, request: &ImageRequest) -> Result<PanelImage, PanelGenerationError> {
        (**self).generate(request).await
    }
}
