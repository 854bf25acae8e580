use failure::Fail;
use serde::{Deserialize, Serialize};

/// Fatal errors of a pipeline run. `Display` carries diagnostics for the
/// log; `user_message` is what the caller may show.
#[derive(Debug, Fail)]
pub enum PipelineError {
    #[fail(display = "failed to decode image: {}", _0)]
    Decode(String),
    #[fail(display = "failed to stage upload: {}", _0)]
    Staging(String),
    #[fail(display = "plate recognition service error: {}", _0)]
    Recognition(String),
}

impl PipelineError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) | PipelineError::Staging(_) => "could not process image",
            PipelineError::Recognition(_) => "recognition failed, try again",
        }
    }
}

#[derive(Debug, Fail, Clone, Copy, PartialEq)]
pub enum EstimationError {
    #[fail(display = "vehicle box height must be positive, got {}", _0)]
    BoxHeight(f64),
    #[fail(display = "image height must be positive, got {}", _0)]
    ImageHeight(f64),
    #[fail(display = "focal length must be positive, got {}", _0)]
    FocalLength(f64),
    #[fail(display = "real vehicle height must be positive, got {}", _0)]
    RealHeight(f64),
    #[fail(display = "distance is not finite")]
    NonFinite,
}

impl EstimationError {
    pub fn user_message(&self) -> &'static str {
        "no distance available"
    }
}

/// Errors reported by a position source, mirroring the browser
/// geolocation error codes.
#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationError {
    #[fail(display = "location permission denied")]
    PermissionDenied,
    #[fail(display = "position unavailable")]
    PositionUnavailable,
    #[fail(display = "timed out waiting for a position")]
    Timeout,
}

impl LocationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => "location access denied",
            LocationError::PositionUnavailable | LocationError::Timeout => {
                "location unavailable"
            }
        }
    }
}
