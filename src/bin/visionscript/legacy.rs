//! Import of the browser app's localStorage JSON.
//!
//! The browser app kept an array of projects under `visionscript_projects_v2`
//! with camelCase root fields, snake_case panel fields and images as
//! `data:` URLs. Key differences from the Rust model:
//! - Panel ids are JS numbers
//! - Panel state is `imageUrl` + `isGenerating` instead of a status
//! - Projects have no generation run counter

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;

use visionscript::storyboard::model::*;

// =============================================================================
// INPUT STRUCTS
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyProject {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub hero_asset: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub metadata: Option<LegacyMetadata>,
    #[serde(default)]
    pub panels: Vec<LegacyPanel>,
    #[serde(default)]
    pub created_at: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyMetadata {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub global_style: String,
}

#[derive(Debug, Deserialize)]
pub struct LegacyPanel {
    pub panel_id: f64,
    #[serde(default)]
    pub shot_type: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub continuity_focus: String,
    #[serde(default, rename = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default, rename = "isGenerating")]
    pub is_generating: Option<bool>,
}

/// Parses the whole localStorage value.
pub fn parse(json: &str) -> Result<Vec<LegacyProject>> {
    serde_json::from_str(json).context("Failed to parse legacy project JSON")
}

// =============================================================================
// TRANSFORM
// =============================================================================

fn parse_or_default<T: std::str::FromStr + Default>(value: Option<String>, what: &str) -> T {
    match value {
        Some(s) => s.parse().unwrap_or_else(|_| {
            warn!(value = %s, field = what, "unknown value, using default");
            T::default()
        }),
        None => T::default(),
    }
}

impl TryFrom<LegacyPanel> for Panel {
    type Error = anyhow::Error;

    fn try_from(input: LegacyPanel) -> Result<Self> {
        if input.panel_id.fract() != 0.0 || input.panel_id.abs() > PanelId::MAX as f64 {
            bail!("panel_id {} is not an integer", input.panel_id);
        }
        let panel = Panel::new(
            input.panel_id as PanelId,
            input.shot_type,
            input.image_prompt,
            input.continuity_focus,
        );
        // A panel still generating when the tab closed never got its image.
        let image = input.image_url.as_deref().and_then(PanelImage::from_data_url);
        Ok(match image {
            Some(image) => panel.with_image(image),
            None => panel,
        })
    }
}

impl TryFrom<LegacyProject> for Project {
    type Error = anyhow::Error;

    fn try_from(input: LegacyProject) -> Result<Self> {
        let panels = input
            .panels
            .into_iter()
            .map(Panel::try_from)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid panel in project {}", input.id))?;

        let mut project = Project::new(input.id, input.created_at.map_or_else(now_millis, |t| t as i64))
            .with_style(parse_or_default(input.style, "style"))
            .with_aspect_ratio(parse_or_default(input.aspect_ratio, "aspect_ratio"));
        if !input.title.is_empty() {
            project.title = input.title;
        }
        project.script = input.script;
        project.hero_asset = input.hero_asset;
        project.metadata = input
            .metadata
            .map(|m| SceneMetadata::new(m.location, m.time, m.global_style));
        project.panels = panels;
        Ok(project)
    }
}

/// Converts every legacy project, keeping the stored (display) order.
pub fn transform(projects: Vec<LegacyProject>) -> Result<Vec<Project>> {
    projects.into_iter().map(Project::try_from).collect()
}
