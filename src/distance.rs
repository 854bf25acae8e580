use crate::error::EstimationError;
use crate::types::GeoPoint;

/// Height of a full-frame sensor, the reference for 35mm-equivalent values.
const FULL_FRAME_HEIGHT_MM: f64 = 24.0;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Pinhole-model distance to an object of known height.
///
/// The 35mm-equivalent focal length is converted into a focal length in
/// pixels of the given image, then `distance = real * focal_px / box`.
/// Assumes a frontal, unoccluded vehicle; the result is an approximation.
pub fn estimate(
    focal_length_35mm: f64,
    box_height_px: f64,
    real_height_m: f64,
    image_height_px: f64,
) -> Result<f64, EstimationError> {
    if !(box_height_px > 0.0) || !box_height_px.is_finite() {
        return Err(EstimationError::BoxHeight(box_height_px));
    }
    if !(image_height_px > 0.0) || !image_height_px.is_finite() {
        return Err(EstimationError::ImageHeight(image_height_px));
    }
    if !(focal_length_35mm > 0.0) || !focal_length_35mm.is_finite() {
        return Err(EstimationError::FocalLength(focal_length_35mm));
    }
    if !(real_height_m > 0.0) || !real_height_m.is_finite() {
        return Err(EstimationError::RealHeight(real_height_m));
    }

    let real_height_mm = real_height_m * 1000.0;
    let focal_length_px = (focal_length_35mm / FULL_FRAME_HEIGHT_MM) * image_height_px;
    let distance_mm = real_height_mm * focal_length_px / box_height_px;
    let distance_m = distance_mm / 1000.0;
    if distance_m.is_finite() {
        Ok(distance_m)
    } else {
        Err(EstimationError::NonFinite)
    }
}

/// Great-circle distance in meters (haversine formula).
pub fn haversine(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points.
    let h = h.min(1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}
