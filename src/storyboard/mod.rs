//! Project store module.
//!
//! This module provides:
//! - `model`: Data structures (Project, Panel, SceneMetadata, PanelImage)
//! - `store`: ProjectStore with CRUD, selection and run-token checked panel publishes
//! - `storage`: Durable whole-collection storage backends
//! - `wasm`: WASM bindings for browser usage (JsProjectStore)

pub mod model;
pub mod storage;
pub mod store;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use model::*;
pub use storage::{FileStorage, MemoryStorage, ProjectStorage, STORAGE_KEY};
pub use store::{PanelUpdate, ProjectStore, PublishOutcome, RunToken, SharedStore, StoreEvent};

#[cfg(feature = "wasm")]
pub use wasm::JsProjectStore;
