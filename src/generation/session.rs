//! Submit flow: segment a script, apply the result to a project, then run the
//! continuity pipeline over the new panels.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument};

use crate::error::{StoreError, StudioError};
use crate::generation::image::ImageGenerator;
use crate::generation::pipeline::{ContinuityPipeline, PipelineEvent, PipelineJob, PipelineReport};
use crate::generation::segmentation::{ScriptSegmenter, SegmentationRequest};
use crate::storyboard::model::{AspectRatio, StylePreset};
use crate::storyboard::store::SharedStore;

/// User input for one submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub script: String,
    pub hero_asset: String,
    pub style: StylePreset,
    pub aspect_ratio: AspectRatio,
}

impl Submission {
    pub fn new(script: impl Into<String>, hero_asset: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            hero_asset: hero_asset.into(),
            style: StylePreset::default(),
            aspect_ratio: AspectRatio::default(),
        }
    }

    /// Builder: Set the style preset.
    pub fn with_style(mut self, style: StylePreset) -> Self {
        self.style = style;
        self
    }

    /// Builder: Set the aspect ratio.
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }
}

/// Drives segmentation and generation against a shared store.
pub struct Studio<S, G> {
    segmenter: S,
    pipeline: ContinuityPipeline<G>,
    store: SharedStore,
}

impl<S: ScriptSegmenter, G: ImageGenerator> Studio<S, G> {
    pub fn new(segmenter: S, generator: G, store: SharedStore) -> Self {
        Self {
            segmenter,
            pipeline: ContinuityPipeline::new(generator, store.clone()),
            store,
        }
    }

    /// Builder: Forward pipeline progress to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<PipelineEvent>) -> Self {
        self.pipeline = self.pipeline.with_events(tx);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Submits a script for `project_id`.
    ///
    /// If segmentation fails the project is left exactly as it was. Once the
    /// segmentation is applied, panel failures are reported in the returned
    /// report rather than as an error.
    #[instrument(skip(self, submission), fields(style = %submission.style, ratio = %submission.aspect_ratio))]
    pub async fn submit(
        &self,
        project_id: &str,
        submission: Submission,
    ) -> Result<PipelineReport, StudioError> {
        if self.store.lock().await.project(project_id)?.is_none() {
            return Err(StoreError::project_not_found(project_id).into());
        }

        let request =
            SegmentationRequest::new(submission.script, submission.style, submission.hero_asset)?;
        let segmentation = self.segmenter.segment(&request).await?;
        info!(panels = segmentation.panels.len(), "script segmented");

        let job = {
            let mut store = self.store.lock().await;
            let token =
                store.apply_segmentation(project_id, &request, submission.aspect_ratio, segmentation)?;
            let project = store
                .project(project_id)?
                .ok_or_else(|| StoreError::project_not_found(project_id))?;
            PipelineJob::for_project(token, &project)
        };

        Ok(self.pipeline.run(job).await)
    }

    /// Submits for whichever project is active at call time.
    pub async fn submit_active(&self, submission: Submission) -> Result<PipelineReport, StudioError> {
        let project_id = self
            .store
            .lock()
            .await
            .active_project_id()
            .map(str::to_string)
            .ok_or(StoreError::NoActiveProject)?;
        self.submit(&project_id, submission).await
    }
}

// =============================================================================
// TESTS
// =============================================================================
