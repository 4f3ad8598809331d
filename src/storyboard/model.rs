//! Data models for the project store.
//!
//! These structs map to the records the browser app kept in local storage.
//! Using autosurgeon derives for automatic Automerge serialization.

use autosurgeon::reconcile::NoKey;
use autosurgeon::{Hydrate, HydrateError, Reconcile, Reconciler};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Panel identifier, unique within a project and assigned by segmentation.
pub type PanelId = i32;

/// Number of panels a segmentation produces.
pub const PANELS_PER_SEGMENT: usize = 4;

/// Title given to freshly created projects.
pub const DEFAULT_PROJECT_TITLE: &str = "Untitled Storyboard";

/// Generates string conversions plus sparse Reconcile/Hydrate for unit enums.
/// Variants are stored as plain strings so the document stays readable from JS.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical string form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}' (expected one of: {})",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl Reconcile for $name {
            type Key<'a> = NoKey;

            fn reconcile<R: Reconciler>(&self, reconciler: R) -> Result<(), R::Error> {
                self.as_str().to_string().reconcile(reconciler)
            }
        }

        impl Hydrate for $name {
            fn hydrate_string(s: &'_ str) -> Result<Self, HydrateError> {
                s.parse()
                    .map_err(|_| HydrateError::unexpected(concat!("a ", stringify!($name)), s.to_string()))
            }
        }
    };
}

// =============================================================================
// ENUMS
// =============================================================================

/// Visual style applied to every panel of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StylePreset {
    #[default]
    Cinematic,
    Noir,
    Anime,
    Sketch,
}

string_enum!(StylePreset {
    Cinematic => "Cinematic",
    Noir => "Noir",
    Anime => "Anime",
    Sketch => "Sketch",
});

/// Frame shape chosen for the project's layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "2.39:1")]
    Ultrawide,
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Portrait,
}

string_enum!(AspectRatio {
    Ultrawide => "2.39:1",
    Widescreen => "16:9",
    Portrait => "9:16",
});

/// Where a panel is in its generation lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelStatus {
    /// No image and nothing in flight.
    #[default]
    Pending,
    /// A generation request for this panel is outstanding or queued.
    Generating,
    /// The panel has an image.
    Complete,
    /// The last generation attempt failed; no image.
    Failed,
}

string_enum!(PanelStatus {
    Pending => "pending",
    Generating => "generating",
    Complete => "complete",
    Failed => "failed",
});

// =============================================================================
// DOCUMENT ROOT
// =============================================================================

/// Root document: every project keyed by id, plus display order (newest first).
#[derive(Debug, Clone, Default, Reconcile, Hydrate, Serialize, Deserialize, PartialEq)]
pub struct ProjectsRoot {
    /// Project ids in display order.
    pub project_order: Vec<String>,
    /// Project data keyed by project id.
    pub projects: HashMap<String, Project>,
}

impl ProjectsRoot {
    /// Returns the number of projects.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Returns true if there are no projects.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Projects in display order.
    pub fn ordered(&self) -> Vec<&Project> {
        self.project_order
            .iter()
            .filter_map(|id| self.projects.get(id))
            .collect()
    }
}

// =============================================================================
// PROJECT
// =============================================================================

/// A named storyboard unit.
#[derive(Debug, Clone, Default, Reconcile, Hydrate, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub title: String,
    /// Source screenplay excerpt.
    pub script: String,
    /// Subject that must look the same in every panel.
    pub hero_asset: String,
    pub style: StylePreset,
    pub aspect_ratio: AspectRatio,
    pub metadata: Option<SceneMetadata>,
    /// Panels in narrative order.
    pub panels: Vec<Panel>,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Bumped every time a segmentation result replaces the panels.
    pub generation_run: i64,
}

impl Project {
    /// Creates an empty project with default title, style and ratio.
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_PROJECT_TITLE.to_string(),
            created_at,
            ..Default::default()
        }
    }

    /// Builder: Set title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder: Set style.
    pub fn with_style(mut self, style: StylePreset) -> Self {
        self.style = style;
        self
    }

    /// Builder: Set aspect ratio.
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Builder: Add a panel at the end of the sequence.
    pub fn with_panel(mut self, panel: Panel) -> Self {
        self.panels.push(panel);
        self
    }

    /// Looks up a panel by id.
    pub fn panel(&self, panel_id: PanelId) -> Option<&Panel> {
        self.panels.iter().find(|p| p.panel_id == panel_id)
    }

    /// Looks up a panel by id for mutation.
    pub fn panel_mut(&mut self, panel_id: PanelId) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|p| p.panel_id == panel_id)
    }

    /// Panels that currently have an image, in narrative order.
    pub fn complete_panels(&self) -> Vec<&Panel> {
        self.panels.iter().filter(|p| p.is_complete()).collect()
    }

    /// True when there is at least one panel and every panel has an image.
    pub fn is_fully_generated(&self) -> bool {
        !self.panels.is_empty() && self.panels.iter().all(Panel::is_complete)
    }

    /// True while any panel is still waiting on the pipeline.
    pub fn is_generating(&self) -> bool {
        self.panels.iter().any(Panel::is_generating)
    }
}

// =============================================================================
// SCENE METADATA
// =============================================================================

/// Location, time and overall look of the segmented scene.
#[derive(Debug, Clone, Default, Reconcile, Hydrate, Serialize, Deserialize, PartialEq)]
pub struct SceneMetadata {
    pub location: String,
    /// Time of day / atmosphere.
    pub time: String,
    pub global_style: String,
}

impl SceneMetadata {
    pub fn new(
        location: impl Into<String>,
        time: impl Into<String>,
        global_style: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            time: time.into(),
            global_style: global_style.into(),
        }
    }
}

// =============================================================================
// PANEL
// =============================================================================

/// One storyboard beat.
#[derive(Debug, Clone, Default, Reconcile, Hydrate, Serialize, Deserialize, PartialEq)]
pub struct Panel {
    pub panel_id: PanelId,
    /// Free text, e.g. "close-up".
    pub shot_type: String,
    pub image_prompt: String,
    /// How the hero asset must appear in this shot.
    pub continuity_focus: String,
    pub image: Option<PanelImage>,
    pub status: PanelStatus,
    /// Message of the last failed generation.
    pub error: Option<String>,
}

impl Panel {
    /// Creates a pending panel without an image.
    pub fn new(
        panel_id: PanelId,
        shot_type: impl Into<String>,
        image_prompt: impl Into<String>,
        continuity_focus: impl Into<String>,
    ) -> Self {
        Self {
            panel_id,
            shot_type: shot_type.into(),
            image_prompt: image_prompt.into(),
            continuity_focus: continuity_focus.into(),
            ..Default::default()
        }
    }

    /// Builder: Attach an image, marking the panel complete.
    pub fn with_image(mut self, image: PanelImage) -> Self {
        self.complete(image);
        self
    }

    /// Marks the panel as waiting on the pipeline. Drops any previous image.
    pub fn begin_generation(&mut self) {
        self.status = PanelStatus::Generating;
        self.image = None;
        self.error = None;
    }

    /// Stores a generated image and clears the generating state.
    pub fn complete(&mut self, image: PanelImage) {
        self.status = PanelStatus::Complete;
        self.image = Some(image);
        self.error = None;
    }

    /// Clears the generating state without an image.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = PanelStatus::Failed;
        self.image = None;
        self.error = Some(error.into());
    }

    pub fn is_complete(&self) -> bool {
        self.status == PanelStatus::Complete && self.image.is_some()
    }

    pub fn is_generating(&self) -> bool {
        self.status == PanelStatus::Generating
    }

    pub fn is_failed(&self) -> bool {
        self.status == PanelStatus::Failed
    }

    /// The parts of the panel the pipeline needs.
    pub fn descriptor(&self) -> PanelDescriptor {
        PanelDescriptor {
            panel_id: self.panel_id,
            image_prompt: self.image_prompt.clone(),
            continuity_focus: self.continuity_focus.clone(),
        }
    }
}

/// Immutable view of a panel handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    pub panel_id: PanelId,
    pub image_prompt: String,
    pub continuity_focus: String,
}

// =============================================================================
// PANEL IMAGE
// =============================================================================

/// A generated image, kept base64-encoded so it survives the document and JS.
#[derive(Debug, Clone, Default, Reconcile, Hydrate, Serialize, Deserialize, PartialEq, Eq)]
pub struct PanelImage {
    pub mime_type: String,
    /// Base64 (standard alphabet) payload.
    pub data: String,
}

impl PanelImage {
    /// Wraps an already base64-encoded payload.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Encodes raw image bytes.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, STANDARD.encode(bytes))
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        Some(Self::new(mime_type, payload))
    }

    /// Decodes the payload back into raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data.as_bytes())
    }

    /// Renders the image as a data URL for browser hosts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Current wall clock time in milliseconds since epoch.
pub fn now_millis() -> i64 {
    #[cfg(all(target_arch = "wasm32", feature = "wasm"))]
    {
        js_sys::Date::now() as i64
    }
    #[cfg(not(all(target_arch = "wasm32", feature = "wasm")))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_defaults() {
        let project = Project::new("proj-1", 1_700_000_000_000);
        assert_eq!(project.title, DEFAULT_PROJECT_TITLE);
        assert_eq!(project.style, StylePreset::Cinematic);
        assert_eq!(project.aspect_ratio, AspectRatio::Widescreen);
        assert!(project.panels.is_empty());
        assert!(project.metadata.is_none());
        assert!(!project.is_fully_generated());
    }

    #[test]
    fn test_panel_lifecycle() {
        let mut panel = Panel::new(1, "close-up", "a red robot", "red paint, one eye");
        assert_eq!(panel.status, PanelStatus::Pending);

        panel.begin_generation();
        assert!(panel.is_generating());
        assert!(!panel.is_complete());

        panel.complete(PanelImage::from_bytes("image/png", b"png"));
        assert!(panel.is_complete());
        assert!(!panel.is_generating());

        panel.begin_generation();
        assert!(panel.image.is_none());

        panel.fail("quota exceeded");
        assert!(panel.is_failed());
        assert!(!panel.is_complete());
        assert!(!panel.is_generating());
        assert_eq!(panel.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_panel_lookup_by_id_not_position() {
        let project = Project::new("p", 0)
            .with_panel(Panel::new(7, "wide", "a", "x"))
            .with_panel(Panel::new(3, "close-up", "b", "y"));

        assert_eq!(project.panel(3).unwrap().image_prompt, "b");
        assert_eq!(project.panel(7).unwrap().image_prompt, "a");
        assert!(project.panel(0).is_none());
    }

    #[test]
    fn test_complete_panels_keep_order() {
        let image = PanelImage::from_bytes("image/png", b"x");
        let project = Project::new("p", 0)
            .with_panel(Panel::new(1, "s", "a", "c").with_image(image.clone()))
            .with_panel(Panel::new(2, "s", "b", "c"))
            .with_panel(Panel::new(3, "s", "c", "c").with_image(image));

        let ids: Vec<PanelId> = project.complete_panels().iter().map(|p| p.panel_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(!project.is_fully_generated());
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(AspectRatio::Ultrawide.as_str(), "2.39:1");
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::Portrait);
        assert_eq!("Noir".parse::<StylePreset>().unwrap(), StylePreset::Noir);
        assert!("Watercolor".parse::<StylePreset>().is_err());
        assert_eq!(PanelStatus::Generating.to_string(), "generating");
    }

    #[test]
    fn test_enum_serde_matches_display() {
        let json = serde_json::to_string(&AspectRatio::Ultrawide).unwrap();
        assert_eq!(json, "\"2.39:1\"");
        let json = serde_json::to_string(&PanelStatus::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }

    #[test]
    fn test_image_data_url_round_trip() {
        let image = PanelImage::from_bytes("image/png", &[1, 2, 3]);
        let parsed = PanelImage::from_data_url(&image.data_url()).unwrap();
        assert_eq!(parsed, image);
        assert_eq!(parsed.to_bytes().unwrap(), vec![1, 2, 3]);
        assert!(PanelImage::from_data_url("https://example.com/a.png").is_none());
    }
}
