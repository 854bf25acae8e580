use crate::config::{BoxSelection, PipelineConfig};
use crate::distance;
use crate::error::{EstimationError, PipelineError};
use crate::metadata;
use crate::normalize;
use crate::recognition::PlateRecognizer;
use crate::staging::Staging;
use crate::types::{BoundingBox, ImageMetadata, PlateDetection};
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Normalizing,
    Recognizing,
    Estimating,
    Done,
    Failed,
}

impl PipelineState {
    fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_advance_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Normalizing)
            | (Normalizing, Recognizing)
            | (Recognizing, Estimating)
            | (Recognizing, Done)
            | (Estimating, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Normalizing => "normalizing",
            PipelineState::Recognizing => "recognizing",
            PipelineState::Estimating => "estimating",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// The chosen detection came without a usable vehicle box.
    NoVehicleBox,
    Estimation(EstimationError),
}

impl SkipReason {
    pub fn user_message(&self) -> &'static str {
        match self {
            SkipReason::NoVehicleBox => "no distance available",
            SkipReason::Estimation(e) => e.user_message(),
        }
    }
}

/// What became of the distance estimate. Only `Estimated` carries a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceOutcome {
    Estimated(f64),
    /// The recognizer found no plates.
    NoDetection,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    /// In recognizer order; vehicle boxes are in upright original pixels.
    pub detections: Vec<PlateDetection>,
    pub distance: DistanceOutcome,
}

impl UploadResult {
    pub fn distance_meters(&self) -> Option<f64> {
        match self.distance {
            DistanceOutcome::Estimated(meters) => Some(meters),
            _ => None,
        }
    }
}

struct Run {
    id: Uuid,
    state: PipelineState,
}

impl Run {
    fn new() -> Run {
        Run {
            id: Uuid::new_v4(),
            state: PipelineState::Idle,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!("Upload {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }
}

/// Turns one uploaded photo into recognized plates and a distance.
pub struct UploadPipeline {
    config: PipelineConfig,
    recognizer: Arc<dyn PlateRecognizer>,
}

impl UploadPipeline {
    pub fn new(config: PipelineConfig, recognizer: Arc<dyn PlateRecognizer>) -> UploadPipeline {
        UploadPipeline { config, recognizer }
    }

    /// A staging area for a new upload in the configured directory.
    pub fn staging(&self) -> Staging {
        Staging::new(&self.config.staging_dir)
    }

    /// Processes the staged upload at `upload`. Every file in `staging` is
    /// deleted before this returns, whatever the outcome.
    pub async fn run(&self, mut staging: Staging, upload: PathBuf) -> Result<UploadResult, PipelineError> {
        let mut run = Run::new();
        let result = self.process(&mut run, &upload).await;
        match &result {
            Ok(r) => {
                run.advance(PipelineState::Done);
                info!(
                    "Upload {} done: {} plate(s), distance {:?}",
                    run.id,
                    r.detections.len(),
                    r.distance
                );
            }
            Err(e) => {
                run.advance(PipelineState::Failed);
                error!("Upload {} failed: {}", run.id, e);
            }
        }
        debug!("Upload {}: deleting {} staged file(s)", run.id, staging.files().len());
        staging.cleanup().await;
        result
    }

    async fn process(&self, run: &mut Run, upload: &Path) -> Result<UploadResult, PipelineError> {
        run.advance(PipelineState::Normalizing);
        let original = Bytes::from(
            fs::read(upload)
                .await
                .map_err(|e| PipelineError::Staging(e.to_string()))?,
        );
        let (max_width, quality) = (self.config.max_width, self.config.jpeg_quality);
        let for_metadata = original.clone();
        let (metadata, normalized) = tokio::try_join!(
            blocking(move || metadata::extract(&for_metadata)),
            blocking(move || normalize::normalize(&original, max_width, quality)),
        )?;
        debug!(
            "Upload {}: original height {}px, normalized {}x{}, focal {:?}",
            run.id, metadata.height_px, normalized.width, normalized.height, metadata.focal_length_35mm
        );

        run.advance(PipelineState::Recognizing);
        let timeout = self.config.recognition_timeout;
        let recognized = tokio::time::timeout(timeout, self.recognizer.recognize(Bytes::from(normalized.jpeg)))
            .await
            .map_err(|_| PipelineError::Recognition(format!("no response within {:?}", timeout)))?
            .map_err(|e| PipelineError::Recognition(e.to_string()))?;

        // The recognizer saw the normalized image; bring boxes back to the
        // space `metadata.height_px` is measured in.
        let scale = normalized.scale;
        let detections: Vec<PlateDetection> = recognized
            .into_iter()
            .map(|mut d| {
                d.vehicle_box = d.vehicle_box.map(|b| b.unscaled(scale));
                d
            })
            .collect();
        if detections.is_empty() {
            info!("Upload {}: no plates recognized", run.id);
            return Ok(UploadResult {
                detections,
                distance: DistanceOutcome::NoDetection,
            });
        }

        run.advance(PipelineState::Estimating);
        let distance = self.estimate(&metadata, &detections);
        if let DistanceOutcome::Skipped(reason) = &distance {
            warn!("Upload {}: distance estimate skipped: {:?}", run.id, reason);
        }
        Ok(UploadResult {
            detections,
            distance,
        })
    }

    fn estimate(&self, metadata: &ImageMetadata, detections: &[PlateDetection]) -> DistanceOutcome {
        let vehicle = match select_box(detections, self.config.box_selection) {
            Some(b) => b,
            None => return DistanceOutcome::Skipped(SkipReason::NoVehicleBox),
        };
        let focal = metadata
            .focal_length_35mm
            .unwrap_or(self.config.assumed_focal_length_35mm);
        match distance::estimate(
            focal,
            vehicle.height(),
            self.config.vehicle_height_m,
            f64::from(metadata.height_px),
        ) {
            Ok(meters) => DistanceOutcome::Estimated(meters),
            Err(e) => DistanceOutcome::Skipped(SkipReason::Estimation(e)),
        }
    }
}

/// Picks the vehicle box used for the estimate.
pub fn select_box(detections: &[PlateDetection], selection: BoxSelection) -> Option<BoundingBox> {
    match selection {
        BoxSelection::First => detections.first().and_then(|d| d.vehicle_box),
        BoxSelection::Largest => detections
            .iter()
            .filter_map(|d| d.vehicle_box)
            .fold(None, |best: Option<BoundingBox>, b| match best {
                Some(current) if current.area() >= b.area() => Some(current),
                _ => Some(b),
            }),
    }
}

async fn blocking<F, T>(f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Decode(format!("Image task failed: {}", e)))?
}
