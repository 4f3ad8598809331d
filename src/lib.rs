//! VisionScript - storyboard engine for screenplay excerpts.
//!
//! A script is segmented into four cinematic panels, an image is generated
//! for each panel in strict narrative order (each request referencing the
//! last successful image so the hero asset stays consistent), and the result
//! is persisted as an Automerge document, played back as a slideshow and
//! exported as a GIF or shot list.
//!
//! # Example
//!
//! ```rust
//! use visionscript::{
//!     AspectRatio, Panel, PanelImage, PanelUpdate, ProjectStore, SceneMetadata, Segmentation,
//!     SegmentationRequest, StylePreset,
//! };
//!
//! let mut store = ProjectStore::new();
//! let project = store.create_project().unwrap();
//!
//! let request = SegmentationRequest::new("INT. LAB - NIGHT", StylePreset::Noir, "a red robot").unwrap();
//! let segmentation = Segmentation {
//!     metadata: SceneMetadata::new("LAB", "NIGHT", "high-contrast black and white"),
//!     panels: (1..=4).map(|i| Panel::new(i, "wide", format!("shot {i}"), "red paint")).collect(),
//! };
//!
//! // Every panel is marked generating; the token authorizes publishes for this run.
//! let token = store
//!     .apply_segmentation(&project.id, &request, AspectRatio::Widescreen, segmentation)
//!     .unwrap();
//! store
//!     .publish_panel(&token, 1, PanelUpdate::Completed(PanelImage::from_bytes("image/png", b"...")))
//!     .unwrap();
//! ```

pub mod error;

// Project store
pub mod storyboard;

// Segmentation and continuity pipeline
pub mod generation;

// Slideshow and export
pub mod sequence;

// Re-exports for convenience
pub use error::{
    ExportError, PanelGenerationError, SegmentationError, StoreError, StoreResult, StudioError,
};
pub use generation::{
    ContinuityPipeline, ImageGenerator, ImageRequest, PipelineEvent, PipelineReport,
    ScriptSegmenter, Segmentation, SegmentationRequest, Studio, Submission,
};
pub use sequence::{render_gif, shot_list, AnimatedExport, ExportProfile, Slideshow};
pub use storyboard::{
    AspectRatio, FileStorage, MemoryStorage, Panel, PanelImage, PanelStatus, PanelUpdate,
    Project, ProjectStorage, ProjectStore, PublishOutcome, RunToken, SceneMetadata, SharedStore,
    StylePreset,
};

#[cfg(feature = "gemini")]
pub use generation::{GeminiClient, GeminiConfig};

#[cfg(feature = "wasm")]
pub use sequence::JsSlideshow;

#[cfg(feature = "wasm")]
pub use storyboard::JsProjectStore;
