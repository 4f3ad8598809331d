//! Continuity image pipeline.
//!
//! Generates one image per panel in strict narrative order. Each request
//! carries the most recent successfully generated image as a continuity
//! reference, so a failed panel is skipped over rather than breaking the
//! chain. Results are published to the store one panel at a time, keyed by
//! panel id and guarded by the run token captured at start.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::error::{PanelGenerationError, StoreError};
use crate::generation::image::{ImageGenerator, ImageRequest};
use crate::storyboard::model::{AspectRatio, PanelDescriptor, PanelId, PanelImage, Project};
use crate::storyboard::store::{PanelUpdate, PublishOutcome, RunToken, SharedStore};

/// Everything a pipeline run needs, captured before it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineJob {
    pub token: RunToken,
    pub aspect_ratio: AspectRatio,
    pub panels: Vec<PanelDescriptor>,
}

impl PipelineJob {
    /// Builds a job covering every panel of `project`, in order.
    pub fn for_project(token: RunToken, project: &Project) -> Self {
        Self {
            token,
            aspect_ratio: project.aspect_ratio,
            panels: project.panels.iter().map(|p| p.descriptor()).collect(),
        }
    }
}

/// Progress notifications for observers of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PanelStarted {
        panel_id: PanelId,
        index: usize,
        total: usize,
    },
    PanelCompleted {
        panel_id: PanelId,
    },
    PanelFailed {
        panel_id: PanelId,
        error: String,
    },
    PanelDiscarded {
        panel_id: PanelId,
    },
    Finished(PipelineReport),
}

/// What happened to one panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelOutcome {
    Completed,
    Failed(PanelGenerationError),
    /// The result was not published, usually because the project was deleted
    /// or re-segmented.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelResult {
    pub panel_id: PanelId,
    pub outcome: PanelOutcome,
}

/// Per-panel outcomes of a run, in panel order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineReport {
    pub project_id: String,
    pub results: Vec<PanelResult>,
}

impl PipelineReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, PanelOutcome::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PanelOutcome::Failed(_)))
    }

    pub fn discarded(&self) -> usize {
        self.count(|o| matches!(o, PanelOutcome::Discarded))
    }

    fn count(&self, f: impl Fn(&PanelOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.outcome)).count()
    }
}

/// Sequential, continuity-chained image generation over one project's panels.
pub struct ContinuityPipeline<G> {
    generator: G,
    store: SharedStore,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl<G: ImageGenerator> ContinuityPipeline<G> {
    pub fn new(generator: G, store: SharedStore) -> Self {
        Self {
            generator,
            store,
            events: None,
        }
    }

    /// Builder: Send progress events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Runs the job to completion.
    ///
    /// Panel N is requested only after panel N-1 resolved. A failed panel is
    /// published as failed and the loop moves on. Once the project is
    /// deleted or re-segmented the remaining panels are discarded without
    /// issuing further requests.
    #[instrument(
        name = "continuity_pipeline",
        skip(self, job),
        fields(project_id = %job.token.project_id, run = job.token.run, panels = job.panels.len())
    )]
    pub async fn run(&self, job: PipelineJob) -> PipelineReport {
        let total = job.panels.len();
        let mut report = PipelineReport {
            project_id: job.token.project_id.clone(),
            results: Vec::with_capacity(total),
        };
        let mut previous: Option<PanelImage> = None;
        let mut live = true;

        for (index, panel) in job.panels.iter().enumerate() {
            let panel_id = panel.panel_id;
            if !live {
                report.results.push(PanelResult {
                    panel_id,
                    outcome: PanelOutcome::Discarded,
                });
                self.emit(PipelineEvent::PanelDiscarded { panel_id });
                continue;
            }

            self.emit(PipelineEvent::PanelStarted {
                panel_id,
                index,
                total,
            });
            let request = ImageRequest::new(&panel.image_prompt, job.aspect_ratio)
                .with_reference(previous.clone());
            debug!(
                panel_id,
                ratio = %request.aspect_ratio,
                has_reference = request.reference.is_some(),
                "requesting panel image"
            );

            let (update, outcome) = match self.generator.generate(&request).await {
                Ok(image) => {
                    info!(panel_id, "panel image generated");
                    previous = Some(image.clone());
                    (PanelUpdate::Completed(image), PanelOutcome::Completed)
                }
                Err(e) => {
                    warn!(panel_id, error = %e, "panel generation failed, continuing");
                    (PanelUpdate::Failed(e.to_string()), PanelOutcome::Failed(e))
                }
            };

            let published = {
                let mut store = self.store.lock().await;
                store.publish_panel(&job.token, panel_id, update)
            };
            let outcome = match published {
                Ok(PublishOutcome::Applied) => outcome,
                Ok(PublishOutcome::Stale) => {
                    info!(panel_id, "project was re-segmented, stopping run");
                    live = false;
                    PanelOutcome::Discarded
                }
                Err(StoreError::ProjectNotFound(_)) => {
                    info!(panel_id, "project was deleted, stopping run");
                    live = false;
                    PanelOutcome::Discarded
                }
                Err(e) => {
                    warn!(panel_id, error = %e, "panel publish failed, continuing");
                    PanelOutcome::Discarded
                }
            };

            self.emit(match &outcome {
                PanelOutcome::Completed => PipelineEvent::PanelCompleted { panel_id },
                PanelOutcome::Failed(e) => PipelineEvent::PanelFailed {
                    panel_id,
                    error: e.to_string(),
                },
                PanelOutcome::Discarded => PipelineEvent::PanelDiscarded { panel_id },
            });
            report.results.push(PanelResult { panel_id, outcome });
        }

        info!(
            completed = report.completed(),
            failed = report.failed(),
            discarded = report.discarded(),
            "pipeline finished"
        );
        self.emit(PipelineEvent::Finished(report.clone()));
        report
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::segmentation::{Segmentation, SegmentationRequest};
    use crate::storyboard::model::{Panel, PanelStatus, SceneMetadata, StylePreset};
    use crate::storyboard::storage::FlakyStorage;
    use crate::storyboard::store::ProjectStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Mock generator: records every request, fails the prompts it is told to.
    #[derive(Default)]
    struct MockGenerator {
        failing: HashSet<String>,
        requests: Mutex<Vec<ImageRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl MockGenerator {
        fn failing(prompts: &[&str]) -> Self {
            Self {
                failing: prompts.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<ImageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        async fn generate(&self, request: &ImageRequest) -> Result<PanelImage, PanelGenerationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            if let Some(gate) = &self.gate {
                gate.notified().await;
            } else {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&request.prompt) {
                Err(PanelGenerationError::upstream("model overloaded"))
            } else {
                Ok(PanelImage::from_bytes("image/png", request.prompt.as_bytes()))
            }
        }
    }

    fn image_for(prompt: &str) -> PanelImage {
        PanelImage::from_bytes("image/png", prompt.as_bytes())
    }

    async fn seeded_store(ratio: AspectRatio) -> (SharedStore, String, PipelineJob) {
        seed(ProjectStore::new(), ratio)
    }

    fn seed(mut store: ProjectStore, ratio: AspectRatio) -> (SharedStore, String, PipelineJob) {
        let project = store.create_project().unwrap();
        let request =
            SegmentationRequest::new("INT. ROOM - DAY", StylePreset::Cinematic, "a red robot").unwrap();
        let segmentation = Segmentation {
            metadata: SceneMetadata::new("ROOM", "DAY", "film"),
            panels: (1..=4)
                .map(|i| Panel::new(i, "wide", format!("p{i}"), "red"))
                .collect(),
        };
        let token = store
            .apply_segmentation(&project.id, &request, ratio, segmentation)
            .unwrap();
        let loaded = store.project(&project.id).unwrap().unwrap();
        let job = PipelineJob::for_project(token, &loaded);
        (store.into_shared(), project.id, job)
    }

    #[tokio::test]
    async fn test_all_panels_complete_in_order() {
        let (store, project_id, job) = seeded_store(AspectRatio::Widescreen).await;
        let pipeline = ContinuityPipeline::new(MockGenerator::default(), store.clone());

        let report = pipeline.run(job).await;
        assert_eq!(report.completed(), 4);

        let prompts: Vec<String> = pipeline
            .generator()
            .requests()
            .into_iter()
            .map(|r| r.prompt)
            .collect();
        assert_eq!(prompts, vec!["p1", "p2", "p3", "p4"]);

        let project = store.lock().await.project(&project_id).unwrap().unwrap();
        assert!(project.is_fully_generated());
        assert_eq!(project.panel(2).unwrap().image, Some(image_for("p2")));
    }

    #[tokio::test]
    async fn test_failed_save_does_not_stop_run() {
        let storage = FlakyStorage::new();
        let opened = ProjectStore::open(storage.clone()).unwrap();
        let (store, project_id, job) = seed(opened, AspectRatio::Widescreen);
        storage.fail_next(1);
        let pipeline = ContinuityPipeline::new(MockGenerator::default(), store.clone());

        let report = pipeline.run(job).await;
        assert_eq!(report.completed(), 4);
        assert_eq!(pipeline.generator().requests().len(), 4);

        let mut guard = store.lock().await;
        let project = guard.project(&project_id).unwrap().unwrap();
        assert!(project.panels.iter().all(Panel::is_complete));
        assert!(!guard.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_unwritable_storage_keeps_results_in_memory() {
        let storage = FlakyStorage::new();
        let opened = ProjectStore::open(storage.clone()).unwrap();
        let (store, project_id, job) = seed(opened, AspectRatio::Widescreen);
        storage.fail_next(usize::MAX);
        let pipeline = ContinuityPipeline::new(MockGenerator::failing(&["p2"]), store.clone());

        let report = pipeline.run(job).await;
        assert_eq!(report.completed(), 3);
        assert_eq!(report.failed(), 1);

        let mut guard = store.lock().await;
        let project = guard.project(&project_id).unwrap().unwrap();
        assert!(!project.is_generating());
        assert!(guard.has_unsaved_changes());
        assert!(guard.flush().is_err());
    }

    #[tokio::test]
    async fn test_reference_chains_previous_success() {
        let (store, _, job) = seeded_store(AspectRatio::Widescreen).await;
        let pipeline = ContinuityPipeline::new(MockGenerator::default(), store);
        pipeline.run(job).await;

        let requests = pipeline.generator().requests();
        assert!(requests[0].reference.is_none());
        assert_eq!(requests[1].reference, Some(image_for("p1")));
        assert_eq!(requests[2].reference, Some(image_for("p2")));
        assert_eq!(requests[3].reference, Some(image_for("p3")));
    }

    #[tokio::test]
    async fn test_failed_panel_is_skipped_in_chain() {
        let (store, project_id, job) = seeded_store(AspectRatio::Widescreen).await;
        let pipeline = ContinuityPipeline::new(MockGenerator::failing(&["p2"]), store.clone());

        let report = pipeline.run(job).await;
        assert_eq!(report.completed(), 3);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.results[1].outcome, PanelOutcome::Failed(_)));

        let requests = pipeline.generator().requests();
        assert_eq!(requests.len(), 4);
        // Panel 3 references panel 1, not the failed panel 2.
        assert_eq!(requests[2].reference, Some(image_for("p1")));
        assert_eq!(requests[3].reference, Some(image_for("p3")));

        let project = store.lock().await.project(&project_id).unwrap().unwrap();
        for id in [1, 3, 4] {
            assert!(project.panel(id).unwrap().is_complete());
        }
        let failed = project.panel(2).unwrap();
        assert_eq!(failed.status, PanelStatus::Failed);
        assert!(failed.image.is_none());
    }

    #[tokio::test]
    async fn test_leading_failures_send_no_reference() {
        let (store, _, job) = seeded_store(AspectRatio::Widescreen).await;
        let pipeline = ContinuityPipeline::new(MockGenerator::failing(&["p1", "p2"]), store);
        pipeline.run(job).await;

        let requests = pipeline.generator().requests();
        assert!(requests[1].reference.is_none());
        assert!(requests[2].reference.is_none());
        assert_eq!(requests[3].reference, Some(image_for("p3")));
    }

    #[tokio::test]
    async fn test_every_panel_failing_still_terminates() {
        let (store, project_id, job) = seeded_store(AspectRatio::Widescreen).await;
        let pipeline =
            ContinuityPipeline::new(MockGenerator::failing(&["p1", "p2", "p3", "p4"]), store.clone());

        let report = pipeline.run(job).await;
        assert_eq!(report.failed(), 4);
        let project = store.lock().await.project(&project_id).unwrap().unwrap();
        assert!(!project.is_generating());
    }

    #[tokio::test]
    async fn test_requests_are_strictly_sequential() {
        let (store, _, job) = seeded_store(AspectRatio::Widescreen).await;
        let pipeline = ContinuityPipeline::new(MockGenerator::default(), store);
        pipeline.run(job).await;
        assert_eq!(pipeline.generator().max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ultrawide_requests_widescreen() {
        let (store, project_id, job) = seeded_store(AspectRatio::Ultrawide).await;
        let pipeline = ContinuityPipeline::new(MockGenerator::default(), store.clone());
        pipeline.run(job).await;

        assert!(pipeline
            .generator()
            .requests()
            .iter()
            .all(|r| r.aspect_ratio.as_str() == "16:9"));
        let project = store.lock().await.project(&project_id).unwrap().unwrap();
        assert_eq!(project.aspect_ratio, AspectRatio::Ultrawide);
    }

    #[tokio::test]
    async fn test_zero_panels_makes_no_calls() {
        let (store, _, mut job) = seeded_store(AspectRatio::Widescreen).await;
        job.panels.clear();
        let pipeline = ContinuityPipeline::new(MockGenerator::default(), store);

        let report = pipeline.run(job).await;
        assert!(report.results.is_empty());
        assert!(pipeline.generator().requests().is_empty());
    }

    #[tokio::test]
    async fn test_events_follow_progress() {
        let (store, _, job) = seeded_store(AspectRatio::Widescreen).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let pipeline = ContinuityPipeline::new(MockGenerator::failing(&["p3"]), store).with_events(tx);
        pipeline.run(job).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events[0],
            PipelineEvent::PanelStarted {
                panel_id: 1,
                index: 0,
                total: 4
            }
        );
        assert_eq!(events[1], PipelineEvent::PanelCompleted { panel_id: 1 });
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::PanelFailed { panel_id: 3, .. })));
        assert!(matches!(events.last(), Some(PipelineEvent::Finished(_))));
    }

    #[tokio::test]
    async fn test_deleted_project_stops_run_without_touching_others() {
        let (store, project_id, job) = seeded_store(AspectRatio::Widescreen).await;
        let other_id = {
            let mut guard = store.lock().await;
            let other = guard.create_project().unwrap();
            guard.select_project(Some(&project_id)).unwrap();
            other.id
        };

        let gate = Arc::new(Notify::new());
        let generator = Arc::new(MockGenerator {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let pipeline = ContinuityPipeline::new(generator.clone(), store.clone());
        let handle = tokio::spawn(async move { pipeline.run(job).await });

        // Wait for the first request to be in flight, then delete the project.
        while generator.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        {
            let mut guard = store.lock().await;
            guard.delete_project(&project_id).unwrap();
            assert!(guard.active_project_id().is_none());
        }
        gate.notify_one();

        let report = handle.await.unwrap();
        assert_eq!(report.discarded(), 4);
        assert_eq!(generator.requests().len(), 1);

        let mut guard = store.lock().await;
        assert!(guard.project(&project_id).unwrap().is_none());
        let other = guard.project(&other_id).unwrap().unwrap();
        assert!(other.panels.is_empty());
    }

    #[tokio::test]
    async fn test_resegmented_project_discards_old_run() {
        let (store, project_id, job) = seeded_store(AspectRatio::Widescreen).await;
        let gate = Arc::new(Notify::new());
        let generator = Arc::new(MockGenerator {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let pipeline = ContinuityPipeline::new(generator.clone(), store.clone());
        let handle = tokio::spawn(async move { pipeline.run(job).await });

        while generator.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        {
            let mut guard = store.lock().await;
            let request =
                SegmentationRequest::new("EXT. PARK - NIGHT", StylePreset::Noir, "a red robot").unwrap();
            let segmentation = Segmentation {
                metadata: SceneMetadata::new("PARK", "NIGHT", "noir"),
                panels: (1..=4).map(|i| Panel::new(i, "wide", "new", "red")).collect(),
            };
            guard
                .apply_segmentation(&project_id, &request, AspectRatio::Widescreen, segmentation)
                .unwrap();
        }
        gate.notify_one();

        let report = handle.await.unwrap();
        assert_eq!(report.discarded(), 4);
        let project = store.lock().await.project(&project_id).unwrap().unwrap();
        assert!(project.panels.iter().all(|p| p.is_generating()));
    }
}
