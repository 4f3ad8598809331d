//! WASM bindings for the project store.
//!
//! This module provides a JavaScript-friendly wrapper around the
//! ProjectStore for use in browser environments. The host persists the
//! bytes returned by `toBytes()` (e.g. in localStorage under `storageKey()`)
//! and drives image generation itself, publishing each result back.

use js_sys::Uint8Array;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::prelude::*;

use crate::error::StoreError;
use crate::generation::segmentation::{parse_segmentation, SegmentationRequest};
use crate::storyboard::model::*;
use crate::storyboard::storage::STORAGE_KEY;
use crate::storyboard::store::{PanelUpdate, ProjectStore, PublishOutcome, RunToken};

/// Serialize a value to JsValue with HashMaps as plain JS objects (not Map).
pub(crate) fn to_js_value<T: Serialize>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&Serializer::new().serialize_maps_as_objects(true))
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

/// Helper macro for Result conversion
macro_rules! js_result {
    ($expr:expr) => {
        $expr.map_err(|e: StoreError| JsValue::from_str(&e.to_string()))
    };
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

// =============================================================================
// MAIN WRAPPER TYPE
// =============================================================================

/// JavaScript-friendly wrapper around ProjectStore.
#[wasm_bindgen]
pub struct JsProjectStore {
    inner: ProjectStore,
}

#[wasm_bindgen]
impl JsProjectStore {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Creates a new empty project store.
    ///
    /// # Example (JavaScript)
    /// ```js
    /// const store = new JsProjectStore();
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new() -> JsProjectStore {
        JsProjectStore {
            inner: ProjectStore::new(),
        }
    }

    /// Loads from binary bytes (Uint8Array). Unreadable bytes yield an
    /// empty store; interrupted panels are reset to pending.
    ///
    /// # Example (JavaScript)
    /// ```js
    /// const saved = localStorage.getItem(JsProjectStore.storageKey());
    /// const store = JsProjectStore.fromBytes(decode(saved));
    /// ```
    #[wasm_bindgen(js_name = fromBytes)]
    pub fn from_bytes(bytes: &[u8]) -> Result<JsProjectStore, JsValue> {
        let mut inner = ProjectStore::from_bytes(bytes).unwrap_or_default();
        js_result!(inner.reset_interrupted())?;
        Ok(JsProjectStore { inner })
    }

    /// Saves to binary bytes (returns Uint8Array).
    #[wasm_bindgen(js_name = toBytes)]
    pub fn to_bytes(&mut self) -> Uint8Array {
        let bytes = self.inner.save();
        Uint8Array::from(&bytes[..])
    }

    /// Key the host should persist the bytes under.
    #[wasm_bindgen(js_name = storageKey)]
    pub fn storage_key() -> String {
        STORAGE_KEY.to_string()
    }

    // =========================================================================
    // STATE ACCESS
    // =========================================================================

    /// Gets the full collection as a JavaScript object.
    #[wasm_bindgen(js_name = getState)]
    pub fn get_state(&mut self) -> Result<JsValue, JsValue> {
        let state = js_result!(self.inner.get_state())?;
        Ok(to_js_value(&state)?)
    }

    /// All projects in display order.
    #[wasm_bindgen(js_name = getProjects)]
    pub fn get_projects(&mut self) -> Result<JsValue, JsValue> {
        let projects = js_result!(self.inner.projects())?;
        Ok(to_js_value(&projects)?)
    }

    /// Gets a project by id, returns null if not found.
    #[wasm_bindgen(js_name = getProject)]
    pub fn get_project(&mut self, project_id: &str) -> Result<JsValue, JsValue> {
        match js_result!(self.inner.project(project_id))? {
            Some(p) => Ok(to_js_value(&p)?),
            None => Ok(JsValue::NULL),
        }
    }

    // =========================================================================
    // PROJECT OPERATIONS
    // =========================================================================

    /// Creates an empty project, selects it and returns it.
    #[wasm_bindgen(js_name = createProject)]
    pub fn create_project(&mut self) -> Result<JsValue, JsValue> {
        let project = js_result!(self.inner.create_project())?;
        Ok(to_js_value(&project)?)
    }

    /// Deletes a project. Returns false if it did not exist.
    #[wasm_bindgen(js_name = deleteProject)]
    pub fn delete_project(&mut self, project_id: &str) -> Result<bool, JsValue> {
        js_result!(self.inner.delete_project(project_id))
    }

    #[wasm_bindgen(js_name = setTitle)]
    pub fn set_title(&mut self, project_id: &str, title: &str) -> Result<(), JsValue> {
        js_result!(self.inner.set_project_title(project_id, title))
    }

    #[wasm_bindgen(js_name = setScript)]
    pub fn set_script(&mut self, project_id: &str, script: &str) -> Result<(), JsValue> {
        js_result!(self.inner.set_project_script(project_id, script))
    }

    #[wasm_bindgen(js_name = setHeroAsset)]
    pub fn set_hero_asset(&mut self, project_id: &str, hero_asset: &str) -> Result<(), JsValue> {
        js_result!(self.inner.set_project_hero_asset(project_id, hero_asset))
    }

    /// Sets the style preset ("Cinematic", "Noir", "Anime", "Sketch").
    #[wasm_bindgen(js_name = setStyle)]
    pub fn set_style(&mut self, project_id: &str, style: &str) -> Result<(), JsValue> {
        let style: StylePreset = style.parse().map_err(js_error)?;
        js_result!(self.inner.set_project_style(project_id, style))
    }

    /// Sets the aspect ratio ("2.39:1", "16:9", "9:16").
    #[wasm_bindgen(js_name = setAspectRatio)]
    pub fn set_aspect_ratio(&mut self, project_id: &str, ratio: &str) -> Result<(), JsValue> {
        let ratio: AspectRatio = ratio.parse().map_err(js_error)?;
        js_result!(self.inner.set_project_aspect_ratio(project_id, ratio))
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Selects a project; pass null/undefined to clear.
    #[wasm_bindgen(js_name = selectProject)]
    pub fn select_project(&mut self, project_id: Option<String>) -> Result<(), JsValue> {
        js_result!(self.inner.select_project(project_id.as_deref()))
    }

    #[wasm_bindgen(js_name = activeProjectId)]
    pub fn active_project_id(&self) -> Option<String> {
        self.inner.active_project_id().map(str::to_string)
    }

    // =========================================================================
    // GENERATION
    // =========================================================================

    /// Applies the text model's JSON answer to a project and returns the run
    /// token (`{ project_id, run }`) to publish panel results with.
    ///
    /// # Example (JavaScript)
    /// ```js
    /// const token = store.applySegmentation(id, script, 'Noir', 'a red robot', '16:9', responseText);
    /// ```
    #[wasm_bindgen(js_name = applySegmentation)]
    pub fn apply_segmentation(
        &mut self,
        project_id: &str,
        script: &str,
        style: &str,
        hero_asset: &str,
        aspect_ratio: &str,
        response_text: &str,
    ) -> Result<JsValue, JsValue> {
        let style: StylePreset = style.parse().map_err(js_error)?;
        let ratio: AspectRatio = aspect_ratio.parse().map_err(js_error)?;
        let request = SegmentationRequest::new(script, style, hero_asset).map_err(js_error)?;
        let segmentation = parse_segmentation(response_text).map_err(js_error)?;
        let token = js_result!(self
            .inner
            .apply_segmentation(project_id, &request, ratio, segmentation))?;
        Ok(to_js_value(&token)?)
    }

    /// Publishes a generated image. Returns false if the run is stale.
    #[wasm_bindgen(js_name = publishPanelImage)]
    pub fn publish_panel_image(
        &mut self,
        token: JsValue,
        panel_id: i32,
        mime_type: &str,
        data: &str,
    ) -> Result<bool, JsValue> {
        let token: RunToken = from_value(token)?;
        let update = PanelUpdate::Completed(PanelImage::new(mime_type, data));
        let outcome = js_result!(self.inner.publish_panel(&token, panel_id, update))?;
        Ok(outcome == PublishOutcome::Applied)
    }

    /// Publishes a failed panel. Returns false if the run is stale.
    #[wasm_bindgen(js_name = publishPanelFailure)]
    pub fn publish_panel_failure(
        &mut self,
        token: JsValue,
        panel_id: i32,
        error: &str,
    ) -> Result<bool, JsValue> {
        let token: RunToken = from_value(token)?;
        let update = PanelUpdate::Failed(error.to_string());
        let outcome = js_result!(self.inner.publish_panel(&token, panel_id, update))?;
        Ok(outcome == PublishOutcome::Applied)
    }
}

impl Default for JsProjectStore {
    fn default() -> Self {
        Self::new()
    }
}
