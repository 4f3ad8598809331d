//! Error types for the storyboard engine.
//!
//! Each boundary gets its own enum so callers can tell a failed submit
//! (segmentation) from a failed panel (recovered inside the pipeline) from a
//! failed export.

use thiserror::Error;

use crate::storyboard::model::PanelId;

/// Result type alias for project store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the project store and its document.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Automerge error during document operations.
    #[error("Automerge error: {0}")]
    Automerge(#[from] automerge::AutomergeError),

    /// Autosurgeon hydration error.
    #[error("Hydration error: {0}")]
    Hydrate(#[from] autosurgeon::HydrateError),

    /// Autosurgeon reconcile error.
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] autosurgeon::ReconcileError),

    /// Project not found in the store.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Panel not found in a project.
    #[error("Panel {panel_id} not found in project {project_id}")]
    PanelNotFound { project_id: String, panel_id: PanelId },

    /// An operation needed an active project but none is selected.
    #[error("No active project selected")]
    NoActiveProject,

    /// Durable storage could not be written. Returned by `ProjectStore::flush`.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Creates a ProjectNotFound error.
    pub fn project_not_found(id: impl Into<String>) -> Self {
        Self::ProjectNotFound(id.into())
    }

    /// Creates a PanelNotFound error.
    pub fn panel_not_found(project_id: impl Into<String>, panel_id: PanelId) -> Self {
        Self::PanelNotFound {
            project_id: project_id.into(),
            panel_id,
        }
    }

    /// Creates a Serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// Persisted project data could not be read back.
///
/// The store recovers from this by starting with an empty collection.
#[derive(Error, Debug)]
pub enum StorageReadError {
    #[error("failed to read stored projects: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored projects are corrupt: {0}")]
    Corrupt(String),
}

impl StorageReadError {
    /// Creates a Corrupt error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

/// Failure of the script segmentation call.
#[derive(Error, Debug)]
pub enum SegmentationError {
    /// Script or hero asset missing after trimming.
    #[error("Invalid segmentation input: {0}")]
    InvalidInput(String),

    /// The text generation service could not be reached or refused the call.
    #[error("Segmentation service failed: {0}")]
    Upstream(String),

    /// The structured output did not parse or is missing fields.
    #[error("Malformed segmentation response: {0}")]
    Malformed(String),

    /// The response did not contain exactly the expected number of panels.
    #[error("Expected {expected} panels, got {actual}")]
    PanelCount { expected: usize, actual: usize },

    /// Two panels share an id.
    #[error("Duplicate panel id {0} in segmentation response")]
    DuplicatePanelId(PanelId),
}

impl SegmentationError {
    /// Creates an InvalidInput error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an Upstream error.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Creates a Malformed error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl From<serde_json::Error> for SegmentationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Failure of a single panel's image generation. Recovered by the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanelGenerationError {
    /// The image service could not be reached or refused the call.
    #[error("Image service failed: {0}")]
    Upstream(String),

    /// The response carried no image part.
    #[error("Failed to generate image part")]
    NoImage,

    /// The returned payload is not a usable image.
    #[error("Invalid image payload: {0}")]
    InvalidImage(String),
}

impl PanelGenerationError {
    /// Creates an Upstream error.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Creates an InvalidImage error.
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }
}

/// Failure while assembling an export artifact.
#[derive(Error, Debug)]
pub enum ExportError {
    /// No panel has a generated image.
    #[error("No panels with generated images to export")]
    NoEligiblePanels,

    /// A panel image could not be decoded.
    #[error("Failed to decode image of panel {panel_id}: {reason}")]
    Decode { panel_id: PanelId, reason: String },

    /// The encoder reported a failure.
    #[error("GIF encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// Writing the artifact failed.
    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Creates a Decode error.
    pub fn decode(panel_id: PanelId, reason: impl Into<String>) -> Self {
        Self::Decode {
            panel_id,
            reason: reason.into(),
        }
    }
}

/// Failure of a whole submit: either the segmentation or the store rejected it.
#[derive(Error, Debug)]
pub enum StudioError {
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
