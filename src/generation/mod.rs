//! Generation module.
//!
//! This module provides:
//! - `segmentation`: Script → scene metadata + four panel descriptors
//! - `image`: Image request shape and the `ImageGenerator` boundary
//! - `pipeline`: Sequential, continuity-chained panel generation
//! - `session`: The submit flow tying segmentation, store and pipeline together
//! - `gemini`: Gemini REST backend (feature `gemini`)

pub mod image;
pub mod pipeline;
pub mod segmentation;
pub mod session;

#[cfg(feature = "gemini")]
pub mod gemini;

pub use image::{ImageGenerator, ImageRequest, ServiceAspectRatio};
pub use pipeline::{
    ContinuityPipeline, PanelOutcome, PanelResult, PipelineEvent, PipelineJob, PipelineReport,
};
pub use segmentation::{
    parse_segmentation, segmentation_schema, ScriptSegmenter, Segmentation, SegmentationRequest,
};
pub use session::{Studio, Submission};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiClient, GeminiConfig, GeminiError};
