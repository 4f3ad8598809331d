//! ProjectStore implementation with hybrid operations pattern.
//!
//! This module provides the `ProjectStore` struct that wraps an Automerge
//! document holding every project and provides:
//! - High-level operations via autosurgeon (hydrate/reconcile) for bulk updates
//! - Targeted O(1) puts for the free-text project fields
//! - Run-token checked, id-keyed panel publishes for the generation pipeline
//!
//! Every mutation rewrites the whole collection through the configured
//! [`ProjectStorage`] backend. A failed write does not undo the mutation:
//! it is logged, the store is marked unsaved and the next mutation or
//! [`ProjectStore::flush`] writes the collection again.

use std::sync::Arc;

use automerge::{transaction::Transactable, AutoCommit, ObjId, ReadDoc, ScalarValue, Value, ROOT};
use autosurgeon::{hydrate, reconcile};
use paste::paste;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{StorageReadError, StoreError, StoreResult};
use crate::generation::segmentation::{Segmentation, SegmentationRequest};
use crate::storyboard::model::*;
use crate::storyboard::storage::ProjectStorage;

/// A store shared between the pipeline and whoever drives the UI.
///
/// The lock is only ever held for the synchronous duration of one mutation.
pub type SharedStore = Arc<tokio::sync::Mutex<ProjectStore>>;

/// Capacity of the change notification channel.
const EVENT_CAPACITY: usize = 64;

// =============================================================================
// PROJECT FIELD SETTER MACRO
// =============================================================================

/// Generates O(1) setters for free-text project fields.
/// All setters follow identical path: cache invalidate → get ObjId → put → persist
macro_rules! project_text_setters {
    ($($field:ident),+ $(,)?) => {
        paste! {
            $(
                #[doc = concat!("Sets the project `", stringify!($field), "` (O(1)).")]
                pub fn [<set_project_ $field>](&mut self, project_id: &str, value: &str) -> StoreResult<()> {
                    self.cached_state = None;
                    let obj = self.get_project_obj(project_id)?;
                    self.doc.put(&obj, stringify!($field), ScalarValue::Str(value.into()))?;
                    debug!(project_id, field = stringify!($field), "project field updated");
                    self.notify(StoreEvent::ProjectUpdated(project_id.to_string()));
                    self.persist();
                    Ok(())
                }
            )+
        }
    };
}

// =============================================================================
// TOKENS AND EVENTS
// =============================================================================

/// Authorizes a pipeline run to publish into one project.
///
/// Captured when a segmentation result is applied; publishes carrying an
/// older run are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunToken {
    pub project_id: String,
    pub run: i64,
}

/// Result of a single panel publish.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelUpdate {
    Completed(PanelImage),
    Failed(String),
}

/// Whether a publish landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Applied,
    /// The project's panels were replaced by a newer run.
    Stale,
}

/// Change notification sent to subscribers after each mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ProjectCreated(String),
    ProjectUpdated(String),
    ProjectDeleted(String),
    PanelUpdated {
        project_id: String,
        panel_id: PanelId,
        status: PanelStatus,
    },
    ActiveChanged(Option<String>),
}

// =============================================================================
// PROJECT STORE
// =============================================================================

/// Owner of every project and of the active selection.
///
/// Uses a hybrid approach:
/// - `update_state()` for bulk struct operations (uses hydrate/reconcile)
/// - `set_project_*()` for targeted O(1) text updates
/// - `publish_panel()` for pipeline results, merged by panel id
pub struct ProjectStore {
    doc: AutoCommit,
    /// Cached hydrated state - invalidated after direct document mutations.
    cached_state: Option<ProjectsRoot>,
    /// Selection is session state and is not persisted.
    active_project_id: Option<String>,
    storage: Option<Box<dyn ProjectStorage>>,
    /// Set when the last write to storage failed.
    unsaved: bool,
    events: broadcast::Sender<StoreEvent>,
}

impl ProjectStore {
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Creates a new empty in-memory store with an initialized document schema.
    pub fn new() -> Self {
        let mut doc = AutoCommit::new();
        let root = ProjectsRoot::default();
        reconcile(&mut doc, &root).expect("Failed to initialize document");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            doc,
            cached_state: Some(root),
            active_project_id: None,
            storage: None,
            unsaved: false,
            events,
        }
    }

    /// Creates a store from saved binary data.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let mut doc = AutoCommit::load(bytes)?;
        let state: ProjectsRoot = hydrate(&doc)?;
        // Normalise the schema so later targeted puts find their objects.
        reconcile(&mut doc, &state)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            doc,
            cached_state: Some(state),
            active_project_id: None,
            storage: None,
            unsaved: false,
            events,
        })
    }

    /// Opens the collection kept in `storage`.
    ///
    /// Missing or unreadable data yields an empty collection. Panels left
    /// generating by an interrupted session are reset to pending.
    pub fn open(storage: impl ProjectStorage + 'static) -> StoreResult<Self> {
        let mut store = match Self::load_from(&storage) {
            Ok(Some(store)) => store,
            Ok(None) => Self::new(),
            Err(e) => {
                warn!(error = %e, "stored projects are unreadable, starting empty");
                Self::new()
            }
        };
        store.storage = Some(Box::new(storage));
        let reset = store.reset_interrupted()?;
        if reset > 0 {
            debug!(reset, "reset interrupted panels to pending");
        }
        Ok(store)
    }

    /// Reads and decodes the collection kept in `storage`.
    /// `Ok(None)` means nothing was saved yet.
    pub fn load_from(storage: &dyn ProjectStorage) -> Result<Option<Self>, StorageReadError> {
        match storage.load()? {
            Some(bytes) => Self::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| StorageReadError::corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    /// Wraps the store for sharing with a pipeline.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Saves the document to binary format.
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Writes the collection again if the last write failed.
    pub fn flush(&mut self) -> StoreResult<()> {
        if !self.unsaved {
            return Ok(());
        }
        if let Some(storage) = &self.storage {
            storage.save(&self.doc.save())?;
        }
        self.unsaved = false;
        Ok(())
    }

    /// True if a mutation has not reached storage yet.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // HIGH-LEVEL OPERATIONS (via Hydrate/Reconcile)
    // =========================================================================

    /// Hydrates the entire document state to Rust structs.
    pub fn get_state(&mut self) -> StoreResult<ProjectsRoot> {
        if let Some(ref cached) = self.cached_state {
            return Ok(cached.clone());
        }
        let state: ProjectsRoot = hydrate(&self.doc)?;
        self.cached_state = Some(state.clone());
        Ok(state)
    }

    /// Applies a function to mutate the state, reconciles it back to the
    /// document and persists the collection.
    pub fn update_state<F>(&mut self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut ProjectsRoot),
    {
        let mut state = self.get_state()?;
        f(&mut state);
        reconcile(&mut self.doc, &state)?;
        self.cached_state = Some(state);
        self.persist();
        Ok(())
    }

    // =========================================================================
    // PROJECT OPERATIONS
    // =========================================================================

    /// Creates an empty project at the top of the list and selects it.
    pub fn create_project(&mut self) -> StoreResult<Project> {
        let project = Project::new(uuid::Uuid::new_v4().to_string(), now_millis());
        self.insert_project(project.clone())?;
        self.select_project(Some(&project.id))?;
        Ok(project)
    }

    /// Inserts (or replaces) a project. New projects go to the top of the list.
    pub fn insert_project(&mut self, project: Project) -> StoreResult<()> {
        let id = project.id.clone();
        self.update_state(|state| {
            if !state.project_order.contains(&project.id) {
                state.project_order.insert(0, project.id.clone());
            }
            state.projects.insert(project.id.clone(), project);
        })?;
        debug!(project_id = %id, "project stored");
        self.notify(StoreEvent::ProjectCreated(id));
        Ok(())
    }

    /// Gets a project by id.
    pub fn project(&mut self, project_id: &str) -> StoreResult<Option<Project>> {
        let state = self.get_state()?;
        Ok(state.projects.get(project_id).cloned())
    }

    /// All projects in display order.
    pub fn projects(&mut self) -> StoreResult<Vec<Project>> {
        let state = self.get_state()?;
        Ok(state.ordered().into_iter().cloned().collect())
    }

    /// Deletes a project. Clears the selection if it was active.
    /// Returns false if no such project existed.
    pub fn delete_project(&mut self, project_id: &str) -> StoreResult<bool> {
        let existed = self.get_state()?.projects.contains_key(project_id);
        if !existed {
            return Ok(false);
        }
        self.update_state(|state| {
            state.projects.remove(project_id);
            state.project_order.retain(|id| id != project_id);
        })?;
        let was_active = self.active_project_id.as_deref() == Some(project_id);
        if was_active {
            self.active_project_id = None;
        }
        debug!(project_id, "project deleted");
        self.notify(StoreEvent::ProjectDeleted(project_id.to_string()));
        if was_active {
            self.notify(StoreEvent::ActiveChanged(None));
        }
        Ok(true)
    }

    /// Applies a function to one project.
    pub fn update_project<F>(&mut self, project_id: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Project),
    {
        if !self.get_state()?.projects.contains_key(project_id) {
            return Err(StoreError::project_not_found(project_id));
        }
        self.update_state(|state| {
            if let Some(project) = state.projects.get_mut(project_id) {
                f(project);
            }
        })?;
        self.notify(StoreEvent::ProjectUpdated(project_id.to_string()));
        Ok(())
    }

    project_text_setters!(title, script, hero_asset);

    /// Sets the project style preset.
    pub fn set_project_style(&mut self, project_id: &str, style: StylePreset) -> StoreResult<()> {
        self.update_project(project_id, |project| project.style = style)
    }

    /// Sets the project aspect ratio.
    pub fn set_project_aspect_ratio(
        &mut self,
        project_id: &str,
        aspect_ratio: AspectRatio,
    ) -> StoreResult<()> {
        self.update_project(project_id, |project| project.aspect_ratio = aspect_ratio)
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Selects a project, or clears the selection with `None`.
    pub fn select_project(&mut self, project_id: Option<&str>) -> StoreResult<()> {
        if let Some(id) = project_id {
            if !self.get_state()?.projects.contains_key(id) {
                return Err(StoreError::project_not_found(id));
            }
        }
        self.active_project_id = project_id.map(str::to_string);
        self.notify(StoreEvent::ActiveChanged(self.active_project_id.clone()));
        Ok(())
    }

    /// Id of the selected project.
    pub fn active_project_id(&self) -> Option<&str> {
        self.active_project_id.as_deref()
    }

    /// The selected project.
    pub fn active_project(&mut self) -> StoreResult<Option<Project>> {
        match self.active_project_id.clone() {
            Some(id) => self.project(&id),
            None => Ok(None),
        }
    }

    // =========================================================================
    // GENERATION
    // =========================================================================

    /// Replaces a project's script inputs, metadata and panels with a
    /// segmentation result, marking every panel generating in the same
    /// mutation. Returns the token the pipeline must publish with.
    pub fn apply_segmentation(
        &mut self,
        project_id: &str,
        request: &SegmentationRequest,
        aspect_ratio: AspectRatio,
        segmentation: Segmentation,
    ) -> StoreResult<RunToken> {
        let mut run = 0;
        self.update_project(project_id, |project| {
            project.script = request.script().to_string();
            project.hero_asset = request.hero_asset().to_string();
            project.style = request.style();
            project.aspect_ratio = aspect_ratio;
            project.metadata = Some(segmentation.metadata);
            project.panels = segmentation.panels;
            for panel in &mut project.panels {
                panel.begin_generation();
            }
            project.generation_run += 1;
            run = project.generation_run;
        })?;
        debug!(project_id, run, "segmentation applied");
        Ok(RunToken {
            project_id: project_id.to_string(),
            run,
        })
    }

    /// Publishes one panel's generation result.
    ///
    /// Only the panel with `panel_id` in the token's project is touched.
    /// Returns `Stale` without changing anything if the project has moved
    /// on to a newer run.
    pub fn publish_panel(
        &mut self,
        token: &RunToken,
        panel_id: PanelId,
        update: PanelUpdate,
    ) -> StoreResult<PublishOutcome> {
        let state = self.get_state()?;
        let project = state
            .projects
            .get(&token.project_id)
            .ok_or_else(|| StoreError::project_not_found(&token.project_id))?;
        if project.generation_run != token.run {
            debug!(
                project_id = %token.project_id,
                panel_id,
                run = token.run,
                current = project.generation_run,
                "discarding stale panel publish"
            );
            return Ok(PublishOutcome::Stale);
        }
        if project.panel(panel_id).is_none() {
            return Err(StoreError::panel_not_found(&token.project_id, panel_id));
        }

        let mut status = PanelStatus::Pending;
        self.update_state(|state| {
            if let Some(panel) = state
                .projects
                .get_mut(&token.project_id)
                .and_then(|p| p.panel_mut(panel_id))
            {
                match update {
                    PanelUpdate::Completed(image) => panel.complete(image),
                    PanelUpdate::Failed(error) => panel.fail(error),
                }
                status = panel.status;
            }
        })?;
        self.notify(StoreEvent::PanelUpdated {
            project_id: token.project_id.clone(),
            panel_id,
            status,
        });
        Ok(PublishOutcome::Applied)
    }

    /// Resets panels stuck in generating (from an interrupted session) to pending.
    /// Returns how many panels were reset.
    pub fn reset_interrupted(&mut self) -> StoreResult<usize> {
        let stuck: usize = self
            .get_state()?
            .projects
            .values()
            .map(|p| p.panels.iter().filter(|panel| panel.is_generating()).count())
            .sum();
        if stuck == 0 {
            return Ok(0);
        }
        self.update_state(|state| {
            for project in state.projects.values_mut() {
                for panel in project.panels.iter_mut().filter(|p| p.is_generating()) {
                    panel.status = PanelStatus::Pending;
                }
            }
        })?;
        Ok(stuck)
    }

    // =========================================================================
    // INTERNAL HELPERS
    // =========================================================================

    /// Writes the whole collection to storage, if any is configured.
    /// A failed write is logged and left for the next mutation or `flush`.
    fn persist(&mut self) {
        if self.storage.is_none() {
            return;
        }
        let bytes = self.doc.save();
        if let Some(storage) = &self.storage {
            match storage.save(&bytes) {
                Ok(()) => self.unsaved = false,
                Err(e) => {
                    warn!(error = %e, "failed to save projects, keeping changes in memory");
                    self.unsaved = true;
                }
            }
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Gets the ObjId of a project map.
    fn get_project_obj(&self, project_id: &str) -> StoreResult<ObjId> {
        let projects = self.get_obj_at_key(&ROOT, "projects")?;
        self.get_obj_at_key(&projects, project_id).map_err(|e| match e {
            StoreError::Serialization(_) => e,
            _ => StoreError::project_not_found(project_id),
        })
    }

    /// Gets an object ID at a map key.
    fn get_obj_at_key(&self, parent: &ObjId, key: &str) -> StoreResult<ObjId> {
        match self.doc.get(parent, key) {
            Ok(Some((Value::Object(_), obj_id))) => Ok(obj_id),
            Ok(Some(_)) => Err(StoreError::serialization(format!(
                "'{}' is not an object",
                key
            ))),
            Ok(None) => Err(StoreError::project_not_found(key)),
            Err(e) => Err(StoreError::Automerge(e)),
        }
    }
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
