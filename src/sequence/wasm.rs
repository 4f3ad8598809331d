//! WASM bindings for playback and export.

use js_sys::Uint8Array;
use serde_wasm_bindgen::from_value;
use wasm_bindgen::prelude::*;

use super::export::{gif_filename, render_gif, shot_list, shot_list_filename, ExportProfile};
use super::slideshow::Slideshow;
use crate::storyboard::model::{Panel, Project};
use crate::storyboard::wasm::to_js_value;

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// JavaScript-friendly slideshow. The host calls `tick(ms)` from its own timer.
///
/// # Example (JavaScript)
/// ```js
/// const show = new JsSlideshow(store.getProject(id));
/// setInterval(() => { if (show.tick(100) > 0) render(show.current()); }, 100);
/// ```
#[wasm_bindgen]
pub struct JsSlideshow {
    inner: Slideshow,
}

#[wasm_bindgen]
impl JsSlideshow {
    /// Builds a slideshow from a project object (as returned by `getProject`).
    #[wasm_bindgen(constructor)]
    pub fn new(project: JsValue) -> Result<JsSlideshow, JsValue> {
        let project: Project = from_value(project)?;
        Ok(JsSlideshow {
            inner: Slideshow::from_project(&project),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[wasm_bindgen(js_name = isEmpty)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn index(&self) -> usize {
        self.inner.index()
    }

    /// Current panel, or null when there are none.
    pub fn current(&self) -> Result<JsValue, JsValue> {
        match self.inner.current() {
            Some(panel) => Ok(to_js_value(panel)?),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen(js_name = isPlaying)]
    pub fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    #[wasm_bindgen(js_name = intervalMs)]
    pub fn interval_ms(&self) -> u32 {
        self.inner.interval_ms() as u32
    }

    pub fn play(&mut self) {
        self.inner.play();
    }

    pub fn pause(&mut self) {
        self.inner.pause();
    }

    pub fn toggle(&mut self) {
        self.inner.toggle();
    }

    pub fn next(&mut self) {
        self.inner.next();
    }

    pub fn previous(&mut self) {
        self.inner.previous();
    }

    pub fn faster(&mut self) {
        self.inner.faster();
    }

    pub fn slower(&mut self) {
        self.inner.slower();
    }

    #[wasm_bindgen(js_name = setIntervalMs)]
    pub fn set_interval_ms(&mut self, ms: u32) {
        self.inner.set_interval(u64::from(ms));
    }

    /// Advances by `elapsed_ms`; returns how many panels were advanced.
    pub fn tick(&mut self, elapsed_ms: u32) -> usize {
        self.inner
            .tick(std::time::Duration::from_millis(u64::from(elapsed_ms)))
    }
}

/// Renders the project's complete panels as a GIF under the named profile.
#[wasm_bindgen(js_name = renderGif)]
pub fn render_gif_js(panels: JsValue, profile: &str) -> Result<Uint8Array, JsValue> {
    let panels: Vec<Panel> = from_value(panels)?;
    let profile: ExportProfile = profile.parse().map_err(js_error)?;
    let export = render_gif(&panels, profile).map_err(js_error)?;
    Ok(Uint8Array::from(&export.bytes[..]))
}

/// Plain-text shot list of every panel.
#[wasm_bindgen(js_name = shotList)]
pub fn shot_list_js(panels: JsValue) -> Result<String, JsValue> {
    let panels: Vec<Panel> = from_value(panels)?;
    Ok(shot_list(&panels))
}

#[wasm_bindgen(js_name = shotListFilename)]
pub fn shot_list_filename_js(title: &str) -> String {
    shot_list_filename(title)
}

#[wasm_bindgen(js_name = gifFilename)]
pub fn gif_filename_js(title: &str, profile: &str) -> Result<String, JsValue> {
    let profile: ExportProfile = profile.parse().map_err(js_error)?;
    Ok(gif_filename(title, profile))
}
