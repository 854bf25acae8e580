use crate::error::PipelineError;
use crate::pipeline::{DistanceOutcome, UploadPipeline, UploadResult};
use crate::plate_format::format_plate;
use crate::staging::Staging;
use crate::types::BoundingBox;
use bytes::Buf;
use failure::Fail;
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const NO_DETECTION_MESSAGE: &str = "plate not recognized, try another photo";

#[derive(Debug, Fail)]
enum UploadError {
    #[fail(display = "missing 'upload' part")]
    Missing,
    #[fail(display = "more than one 'upload' part")]
    TooMany,
    #[fail(display = "unsupported content type {:?}", _0)]
    NotAnImage(Option<String>),
    #[fail(display = "failed to receive upload: {}", _0)]
    Transfer(String),
    #[fail(display = "failed to stage upload: {}", _0)]
    Staging(String),
}

impl UploadError {
    fn user_message(&self) -> &'static str {
        match self {
            UploadError::Missing => "no image was uploaded",
            UploadError::TooMany => "only one image can be uploaded",
            UploadError::NotAnImage(_) => "please choose an image",
            UploadError::Transfer(_) => "could not receive image",
            UploadError::Staging(_) => "could not process image",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            UploadError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Serialize)]
struct DetectionBody {
    plate: String,
    display_plate: String,
    region: String,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    vehicle_box: Option<BoundingBox>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    detections: Vec<DetectionBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_meters: Option<f64>,
    distance_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl From<&UploadResult> for UploadResponse {
    fn from(result: &UploadResult) -> UploadResponse {
        let (status, message) = match &result.distance {
            DistanceOutcome::NoDetection => ("no_detection", Some(NO_DETECTION_MESSAGE)),
            DistanceOutcome::Skipped(reason) => ("recognized", Some(reason.user_message())),
            DistanceOutcome::Estimated(_) => ("recognized", None),
        };
        let distance_status = match result.distance {
            DistanceOutcome::Estimated(_) => "estimated",
            DistanceOutcome::NoDetection => "no_detection",
            DistanceOutcome::Skipped(_) => "skipped",
        };
        UploadResponse {
            status,
            detections: result
                .detections
                .iter()
                .map(|d| DetectionBody {
                    plate: d.plate.clone(),
                    display_plate: format_plate(&d.plate, &d.region),
                    region: d.region.clone(),
                    confidence: d.confidence,
                    vehicle_box: d.vehicle_box,
                })
                .collect(),
            distance_meters: result.distance_meters(),
            distance_status,
            message,
        }
    }
}

pub fn route(
    pipeline: Arc<UploadPipeline>,
    max_upload_bytes: u64,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("upload")
        .and(warp::post())
        .and(warp::multipart::form().max_length(max_upload_bytes))
        .and(warp::any().map(move || pipeline.clone()))
        .and_then(handle_upload)
}

async fn handle_upload(form: FormData, pipeline: Arc<UploadPipeline>) -> Result<Response, Rejection> {
    let mut staging = pipeline.staging();
    let upload = match receive_upload(form, &mut staging).await {
        Ok(path) => path,
        Err(e) => {
            match e {
                UploadError::Staging(_) => error!("Unable to accept upload: {}", e),
                _ => warn!("Rejecting upload: {}", e),
            }
            staging.cleanup().await;
            return Ok(error_reply(e.status(), e.user_message()));
        }
    };

    info!("Received upload {:?}", upload);
    let reply = match pipeline.run(staging, upload).await {
        Ok(result) => warp::reply::json(&UploadResponse::from(&result)).into_response(),
        Err(e) => {
            let status = match e {
                PipelineError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
                PipelineError::Recognition(_) => StatusCode::BAD_GATEWAY,
            };
            error_reply(status, e.user_message())
        }
    };
    Ok(reply)
}

/// Streams the single `upload` part into a staged file.
async fn receive_upload(mut form: FormData, staging: &mut Staging) -> Result<PathBuf, UploadError> {
    let mut upload: Option<PathBuf> = None;

    while let Some(part) = form.next().await {
        let part = part.map_err(|e| UploadError::Transfer(e.to_string()))?;
        debug!("Got part {}", part.name());
        if part.name() != "upload" {
            warn!("Ignoring part {}", part.name());
            continue;
        }
        if upload.is_some() {
            return Err(UploadError::TooMany);
        }
        let content_type = part.content_type().map(str::to_string);
        if !content_type.as_deref().map_or(false, |t| t.starts_with("image/")) {
            return Err(UploadError::NotAnImage(content_type));
        }

        let (path, mut file) = staging
            .create("upload")
            .await
            .map_err(|e| UploadError::Staging(e.to_string()))?;
        let mut stream = part.stream();
        while let Some(buf) = stream.next().await {
            let buf = buf.map_err(|e| UploadError::Transfer(e.to_string()))?;
            file.write_all(buf.chunk())
                .await
                .map_err(|e| UploadError::Staging(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| UploadError::Staging(e.to_string()))?;
        upload = Some(path);
    }

    upload.ok_or(UploadError::Missing)
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": message })),
        status,
    )
    .into_response()
}
