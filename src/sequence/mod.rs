//! Sequence module.
//!
//! Playback and export of a generated storyboard:
//! - `slideshow`: Timed playback state machine over complete panels
//! - `export`: GIF rendering, shot list, per-panel images and artifact names
//! - `wasm`: WASM bindings (JsSlideshow, renderGif, shotList)

pub mod export;
pub mod slideshow;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-exports for convenience
pub use export::{
    file_stem, gif_filename, panel_image_filename, panel_images, render_gif, shot_list,
    shot_list_filename, write_artifact, AnimatedExport, ExportProfile, PanelArtifact,
};
pub use slideshow::{PlaybackState, Slideshow};

#[cfg(feature = "wasm")]
pub use wasm::JsSlideshow;
