//! Downloadable artifacts: animated GIF, shot list, per-panel images.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use image::codecs::gif::GifEncoder;
use image::imageops::FilterType;
use image::{Delay, Frame};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ExportError;
use crate::storyboard::model::{Panel, PanelId, Project};

pub const GIF_WIDTH: u32 = 1280;
pub const GIF_HEIGHT: u32 = 720;

/// Separator between shot list entries.
const SHOT_SEPARATOR: &str = "------------------\n";

// =============================================================================
// PROFILES
// =============================================================================

/// Named GIF timing profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportProfile {
    #[default]
    Smooth,
    Cinematic,
    Dynamic,
}

impl ExportProfile {
    pub const ALL: [ExportProfile; 3] = [Self::Smooth, Self::Cinematic, Self::Dynamic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smooth => "Smooth",
            Self::Cinematic => "Cinematic",
            Self::Dynamic => "Dynamic",
        }
    }

    /// How long each frame is shown.
    pub fn frame_delay(&self) -> Duration {
        match self {
            Self::Smooth => Duration::from_millis(100),
            Self::Cinematic => Duration::from_millis(800),
            Self::Dynamic => Duration::from_millis(2000),
        }
    }

    /// Colour sampling interval; passed to the quantizer as its speed (1-30).
    pub fn sample_interval(&self) -> i32 {
        match self {
            Self::Smooth => 10,
            Self::Cinematic => 5,
            Self::Dynamic => 10,
        }
    }
}

impl fmt::Display for ExportProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown export profile '{s}' (expected Smooth, Cinematic or Dynamic)"))
    }
}

// =============================================================================
// GIF
// =============================================================================

/// An encoded animation and what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedExport {
    pub bytes: Vec<u8>,
    pub frame_count: usize,
    pub panel_ids: Vec<PanelId>,
    pub profile: ExportProfile,
    pub width: u32,
    pub height: u32,
}

fn decode_panel(panel: &Panel) -> Result<image::DynamicImage, ExportError> {
    let image = panel
        .image
        .as_ref()
        .ok_or_else(|| ExportError::decode(panel.panel_id, "panel has no image"))?;
    let bytes = image
        .to_bytes()
        .map_err(|e| ExportError::decode(panel.panel_id, e.to_string()))?;
    image::load_from_memory(&bytes).map_err(|e| ExportError::decode(panel.panel_id, e.to_string()))
}

/// Renders one frame per complete panel, in order, at 1280x720.
///
/// Incomplete panels are skipped. The animation plays once: no loop
/// extension is written.
#[instrument(skip(panels), fields(panels = panels.len()))]
pub fn render_gif(panels: &[Panel], profile: ExportProfile) -> Result<AnimatedExport, ExportError> {
    let eligible: Vec<&Panel> = panels.iter().filter(|p| p.is_complete()).collect();
    if eligible.is_empty() {
        return Err(ExportError::NoEligiblePanels);
    }

    let delay = Delay::from_saturating_duration(profile.frame_delay());
    let mut frames = Vec::with_capacity(eligible.len());
    for panel in &eligible {
        let frame = decode_panel(panel)?
            .resize_to_fill(GIF_WIDTH, GIF_HEIGHT, FilterType::Triangle)
            .to_rgba8();
        frames.push(Frame::from_parts(frame, 0, 0, delay));
    }

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, profile.sample_interval());
        encoder.encode_frames(frames)?;
    }
    debug!(frames = eligible.len(), bytes = bytes.len(), "gif encoded");

    Ok(AnimatedExport {
        bytes,
        frame_count: eligible.len(),
        panel_ids: eligible.iter().map(|p| p.panel_id).collect(),
        profile,
        width: GIF_WIDTH,
        height: GIF_HEIGHT,
    })
}

// =============================================================================
// SHOT LIST
// =============================================================================

/// Plain-text shot list covering every panel, complete or not.
pub fn shot_list(panels: &[Panel]) -> String {
    panels
        .iter()
        .map(|p| {
            format!(
                "PANEL {}\nShot Type: {}\nPrompt: {}\nContinuity Notes: {}\n\n",
                p.panel_id, p.shot_type, p.image_prompt, p.continuity_focus
            )
        })
        .collect::<Vec<_>>()
        .join(SHOT_SEPARATOR)
}

// =============================================================================
// PANEL IMAGES
// =============================================================================

/// A decoded panel image ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelArtifact {
    pub panel_id: PanelId,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw image bytes of every complete panel.
pub fn panel_images(project: &Project) -> Result<Vec<PanelArtifact>, ExportError> {
    project
        .complete_panels()
        .into_iter()
        .filter_map(|panel| panel.image.as_ref().map(|image| (panel.panel_id, image)))
        .map(|(panel_id, image)| {
            let bytes = image
                .to_bytes()
                .map_err(|e| ExportError::decode(panel_id, e.to_string()))?;
            Ok::<_, ExportError>(PanelArtifact {
                panel_id,
                filename: panel_image_filename(&project.title, panel_id),
                bytes,
            })
        })
        .collect()
}

// =============================================================================
// ARTIFACT NAMES
// =============================================================================

/// Replaces every run of whitespace in the title with a single underscore.
pub fn file_stem(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

pub fn panel_image_filename(title: &str, panel_id: PanelId) -> String {
    format!("{}_Panel_{}.png", file_stem(title), panel_id)
}

pub fn shot_list_filename(title: &str) -> String {
    format!("{}_Shot_List.txt", file_stem(title))
}

pub fn gif_filename(title: &str, profile: ExportProfile) -> String {
    format!("{}_{}.gif", file_stem(title), profile)
}

/// Writes an artifact into `dir`, creating it if needed.
pub fn write_artifact(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(path)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storyboard::model::PanelImage;
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;
    use std::io::Cursor;

    fn png(width: u32, height: u32, shade: u8) -> PanelImage {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([shade, shade / 2, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        PanelImage::from_bytes("image/png", &bytes)
    }

    fn complete(id: PanelId) -> Panel {
        Panel::new(id, "wide", format!("prompt {id}"), "red robot").with_image(png(64, 36, id as u8 * 50))
    }

    fn decode_frames(bytes: &[u8]) -> Vec<image::Frame> {
        let decoder = GifDecoder::new(Cursor::new(bytes)).unwrap();
        decoder.into_frames().collect_frames().unwrap()
    }

    #[test]
    fn test_profiles_are_ordered_by_exposure() {
        assert!(ExportProfile::Smooth.frame_delay() < ExportProfile::Cinematic.frame_delay());
        assert!(ExportProfile::Cinematic.frame_delay() < ExportProfile::Dynamic.frame_delay());
        assert_eq!(ExportProfile::Cinematic.sample_interval(), 5);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("cinematic".parse::<ExportProfile>().unwrap(), ExportProfile::Cinematic);
        assert_eq!(" Dynamic ".parse::<ExportProfile>().unwrap(), ExportProfile::Dynamic);
        assert!("slow".parse::<ExportProfile>().is_err());
    }

    #[test]
    fn test_render_gif_four_frames_non_looping() {
        let panels: Vec<Panel> = (1..=4).map(complete).collect();
        let export = render_gif(&panels, ExportProfile::Cinematic).unwrap();

        assert_eq!(export.frame_count, 4);
        assert_eq!(export.panel_ids, vec![1, 2, 3, 4]);
        assert!(!export.bytes.windows(11).any(|w| w == b"NETSCAPE2.0"));

        let frames = decode_frames(&export.bytes);
        assert_eq!(frames.len(), 4);
        for frame in &frames {
            assert_eq!(frame.buffer().dimensions(), (1280, 720));
            let (numer, denom) = frame.delay().numer_denom_ms();
            assert_eq!(numer / denom, 800);
        }
    }

    #[test]
    fn test_render_gif_skips_incomplete_panels() {
        let mut failed = Panel::new(2, "wide", "p2", "");
        failed.fail("boom");
        let panels = vec![complete(1), failed, complete(3)];

        let export = render_gif(&panels, ExportProfile::Smooth).unwrap();
        assert_eq!(export.panel_ids, vec![1, 3]);
        assert_eq!(decode_frames(&export.bytes).len(), 2);
    }

    #[test]
    fn test_render_gif_is_repeatable() {
        let panels: Vec<Panel> = (1..=3).map(complete).collect();
        let first = render_gif(&panels, ExportProfile::Dynamic).unwrap();
        let second = render_gif(&panels, ExportProfile::Dynamic).unwrap();
        assert_eq!(first.frame_count, second.frame_count);
        assert_eq!(first.panel_ids, second.panel_ids);
    }

    #[test]
    fn test_render_gif_without_images() {
        let panels = vec![Panel::new(1, "wide", "p1", "")];
        assert!(matches!(
            render_gif(&panels, ExportProfile::Smooth),
            Err(ExportError::NoEligiblePanels)
        ));
    }

    #[test]
    fn test_render_gif_reports_bad_image() {
        let panels = vec![
            complete(1),
            Panel::new(2, "wide", "p2", "").with_image(PanelImage::from_bytes("image/png", b"nope")),
        ];
        assert!(matches!(
            render_gif(&panels, ExportProfile::Smooth),
            Err(ExportError::Decode { panel_id: 2, .. })
        ));
    }

    #[test]
    fn test_shot_list_format() {
        let mut pending = Panel::new(2, "close-up", "robot eye", "scratched visor");
        pending.begin_generation();
        let panels = vec![
            Panel::new(1, "wide", "warehouse", "red paint").with_image(PanelImage::new("image/png", "QUJD")),
            pending,
        ];
        assert_eq!(
            shot_list(&panels),
            "PANEL 1\nShot Type: wide\nPrompt: warehouse\nContinuity Notes: red paint\n\n\
             ------------------\n\
             PANEL 2\nShot Type: close-up\nPrompt: robot eye\nContinuity Notes: scratched visor\n\n"
        );
        assert_eq!(shot_list(&[]), "");
    }

    #[test]
    fn test_filenames_collapse_whitespace() {
        assert_eq!(file_stem("Robot  Dawn\tPart 2"), "Robot_Dawn_Part_2");
        assert_eq!(panel_image_filename("Robot Dawn", 3), "Robot_Dawn_Panel_3.png");
        assert_eq!(shot_list_filename("Robot Dawn"), "Robot_Dawn_Shot_List.txt");
        assert_eq!(
            gif_filename("Untitled Storyboard", ExportProfile::Cinematic),
            "Untitled_Storyboard_Cinematic.gif"
        );
    }

    #[test]
    fn test_panel_images_only_complete() {
        let project = Project::new("p", 0)
            .with_title("Robot Dawn")
            .with_panel(Panel::new(1, "wide", "a", "").with_image(PanelImage::from_bytes("image/png", b"one")))
            .with_panel(Panel::new(2, "wide", "b", ""));
        let artifacts = panel_images(&project).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].filename, "Robot_Dawn_Panel_1.png");
        assert_eq!(artifacts[0].bytes, b"one");
    }

    #[test]
    fn test_write_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("exports");
        let path = write_artifact(&out, "shots.txt", b"PANEL 1").unwrap();
        assert_eq!(path, out.join("shots.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"PANEL 1");
    }
}
