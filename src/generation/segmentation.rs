//! Script segmentation: turning a screenplay excerpt into scene metadata and
//! exactly four panel descriptors.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::SegmentationError;
use crate::storyboard::model::{Panel, PanelId, SceneMetadata, StylePreset, PANELS_PER_SEGMENT};

/// Validated input for a segmentation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationRequest {
    script: String,
    style: StylePreset,
    hero_asset: String,
}

impl SegmentationRequest {
    /// Creates a request. Script and hero asset must be non-empty after trimming.
    pub fn new(
        script: impl Into<String>,
        style: StylePreset,
        hero_asset: impl Into<String>,
    ) -> Result<Self, SegmentationError> {
        let script = script.into();
        let hero_asset = hero_asset.into();
        if script.trim().is_empty() {
            return Err(SegmentationError::invalid_input("script is empty"));
        }
        if hero_asset.trim().is_empty() {
            return Err(SegmentationError::invalid_input("hero asset is empty"));
        }
        Ok(Self {
            script,
            style,
            hero_asset,
        })
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn style(&self) -> StylePreset {
        self.style
    }

    pub fn hero_asset(&self) -> &str {
        &self.hero_asset
    }

    /// Instruction text sent to the text model.
    pub fn prompt(&self) -> String {
        format!(
            r#"Analyze this screenplay excerpt and convert it into exactly {count} storyboard panels.

STYLE PRESET: {style}
HERO ASSET: {hero}

SCRIPT:
"""
{script}
"""

RULES:
1. Extract location and time.
2. Maintain strict visual continuity. The hero asset must look identical in every shot.
3. Generate technical prompts: [Cinematography] + [Subject] + [Action] + [Context] + [Style & Ambiance].
4. TONALITY: Professional cinematic photography. High-end film stock. Avoid vibrant/fake "AI colors".
5. CONTINUITY: Provide a "continuity_focus" for each panel specifically describing the visual DNA of {hero}.
"#,
            count = PANELS_PER_SEGMENT,
            style = self.style,
            hero = self.hero_asset,
            script = self.script,
        )
    }
}

/// Scene metadata plus the ordered panels of one segmentation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub metadata: SceneMetadata,
    pub panels: Vec<Panel>,
}

/// A text-generation backend able to segment scripts.
///
/// Implementations perform the network call only; they never touch the store.
#[async_trait]
pub trait ScriptSegmenter: Send + Sync {
    async fn segment(&self, request: &SegmentationRequest) -> Result<Segmentation, SegmentationError>;
}

#[async_trait]
impl<T: ScriptSegmenter + ?Sized> ScriptSegmenter for Arc<T> {
    async fn segment(&self, request: &SegmentationRequest) -> Result<Segmentation, SegmentationError> {
        (**self).segment(request).await
    }
}

/// JSON schema the text model is asked to answer with.
pub fn segmentation_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "scene_metadata": {
                "type": "OBJECT",
                "properties": {
                    "location": { "type": "STRING" },
                    "time": { "type": "STRING" },
                    "global_style": { "type": "STRING" }
                },
                "required": ["location", "time", "global_style"]
            },
            "panels": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "panel_id": { "type": "NUMBER" },
                        "shot_type": { "type": "STRING" },
                        "image_prompt": { "type": "STRING" },
                        "continuity_focus": { "type": "STRING" }
                    },
                    "required": ["panel_id", "shot_type", "image_prompt", "continuity_focus"]
                }
            }
        },
        "required": ["scene_metadata", "panels"]
    })
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Debug, Deserialize)]
struct WireSegmentation {
    scene_metadata: WireMetadata,
    panels: Vec<WirePanel>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    location: String,
    time: String,
    global_style: String,
}

#[derive(Debug, Deserialize)]
struct WirePanel {
    // NUMBER in the schema, so 1.0 is as valid as 1.
    panel_id: f64,
    shot_type: String,
    image_prompt: String,
    continuity_focus: String,
}

fn panel_id_from_number(value: f64) -> Result<PanelId, SegmentationError> {
    if value.fract() != 0.0 || value < PanelId::MIN as f64 || value > PanelId::MAX as f64 {
        return Err(SegmentationError::malformed(format!(
            "panel_id {value} is not an integer"
        )));
    }
    Ok(value as PanelId)
}

/// Parses and validates the structured output of the text model.
///
/// Panels keep the order the model returned them in; their ids must be
/// integral and unique and there must be exactly four of them.
pub fn parse_segmentation(text: &str) -> Result<Segmentation, SegmentationError> {
    let wire: WireSegmentation = serde_json::from_str(text.trim())?;

    if wire.panels.len() != PANELS_PER_SEGMENT {
        return Err(SegmentationError::PanelCount {
            expected: PANELS_PER_SEGMENT,
            actual: wire.panels.len(),
        });
    }

    let mut seen = HashSet::new();
    let mut panels = Vec::with_capacity(PANELS_PER_SEGMENT);
    for wire_panel in wire.panels {
        let panel_id = panel_id_from_number(wire_panel.panel_id)?;
        if !seen.insert(panel_id) {
            return Err(SegmentationError::DuplicatePanelId(panel_id));
        }
        panels.push(Panel::new(
            panel_id,
            wire_panel.shot_type,
            wire_panel.image_prompt,
            wire_panel.continuity_focus,
        ));
    }

    Ok(Segmentation {
        metadata: SceneMetadata::new(
            wire.scene_metadata.location,
            wire.scene_metadata.time,
            wire.scene_metadata.global_style,
        ),
        panels,
    })
}

// =============================================================================
// TESTS
// =============================================================================
