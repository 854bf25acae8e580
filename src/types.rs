use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMetadata {
    pub height_px: u32,
    /// 35mm-equivalent focal length from EXIF, if the tag was usable.
    pub focal_length_35mm: Option<f64>,
}

/// Axis-aligned box in pixels. Always has positive width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Option<BoundingBox> {
        let finite = [xmin, ymin, xmax, ymax].iter().all(|v| v.is_finite());
        if finite && xmax > xmin && ymax > ymin {
            Some(BoundingBox {
                xmin,
                ymin,
                xmax,
                ymax,
            })
        } else {
            None
        }
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f64 {
        (self.xmax - self.xmin) * self.height()
    }

    /// Maps the box out of an image that was resized by `scale`.
    pub fn unscaled(&self, scale: f64) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin / scale,
            ymin: self.ymin / scale,
            xmax: self.xmax / scale,
            ymax: self.ymax / scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlateDetection {
    pub plate: String,
    pub region: String,
    pub confidence: f64,
    pub vehicle_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_boxes() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_some());
        assert!(BoundingBox::new(10.0, 0.0, 10.0, 10.0).is_none());
        assert!(BoundingBox::new(0.0, 5.0, 10.0, 1.0).is_none());
        assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 10.0).is_none());
    }

    #[test]
    fn unscaled_box_returns_to_original_space() {
        let b = BoundingBox::new(10.0, 20.0, 110.0, 70.0).unwrap();
        let original = b.unscaled(0.5);
        assert_eq!(original, BoundingBox::new(20.0, 40.0, 220.0, 140.0).unwrap());
        assert_eq!(original.height(), 100.0);
    }

    #[test]
    fn geo_point_bounds() {
        assert!(GeoPoint { latitude: 55.75, longitude: 37.61 }.is_valid());
        assert!(!GeoPoint { latitude: 91.0, longitude: 0.0 }.is_valid());
        assert!(!GeoPoint { latitude: 0.0, longitude: f64::INFINITY }.is_valid());
    }
}
