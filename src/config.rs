use crate::tracker::WatchOptions;
use failure::Error;
use std::cmp::Ordering;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RECOGNIZER_URL: &str = "https://api.platerecognizer.com/v1/plate-reader/";

/// Which detection's vehicle box feeds the distance estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSelection {
    /// First detection in the order the service reported them.
    First,
    /// Detection with the largest vehicle box; ties go to the earlier one.
    Largest,
}

impl FromStr for BoxSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(BoxSelection::First),
            "largest" => Ok(BoxSelection::Largest),
            other => Err(format_err!("Unknown box selection '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub url: Url,
    pub token: String,
    /// Region hints forwarded to the service, e.g. `ru`.
    pub regions: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where uploads are staged while a run is in flight.
    pub staging_dir: PathBuf,
    /// Used when the photo has no usable 35mm-equivalent focal length.
    /// 26mm is the main camera of most phones.
    pub assumed_focal_length_35mm: f64,
    /// Assumed real height of the vehicle, in meters.
    pub vehicle_height_m: f64,
    pub max_width: u32,
    pub jpeg_quality: u8,
    pub recognition_timeout: Duration,
    pub box_selection: BoxSelection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            staging_dir: env::temp_dir().join("plate-distance"),
            assumed_focal_length_35mm: 26.0,
            vehicle_height_m: 1.5,
            max_width: 1280,
            jpeg_quality: 30,
            recognition_timeout: Duration::from_secs(10),
            box_selection: BoxSelection::First,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_upload_bytes: u64,
    pub pipeline: PipelineConfig,
    pub recognizer: RecognizerConfig,
    /// Hints sent to tracking clients.
    pub watch: WatchOptions,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PipelineConfig::default();
        let timeout = Duration::from_secs(parse_positive(&lookup, "RECOGNITION_TIMEOUT_SECS", 10)?);
        let pipeline = PipelineConfig {
            staging_dir: lookup("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            assumed_focal_length_35mm: parse_positive_f64(
                &lookup,
                "ASSUMED_FOCAL_LENGTH",
                defaults.assumed_focal_length_35mm,
            )?,
            vehicle_height_m: parse_positive_f64(&lookup, "DEFAULT_CAR_HEIGHT", defaults.vehicle_height_m)?,
            max_width: parse_positive(&lookup, "NORMALIZE_MAX_WIDTH", defaults.max_width)?,
            jpeg_quality: parse_positive(&lookup, "JPEG_QUALITY", defaults.jpeg_quality)?.min(100),
            recognition_timeout: timeout,
            box_selection: match lookup("BOX_SELECTION") {
                Some(s) => s.parse()?,
                None => defaults.box_selection,
            },
        };

        let url = lookup("PLATE_RECOGNIZER_URL").unwrap_or_else(|| DEFAULT_RECOGNIZER_URL.to_string());
        let token = lookup("PLATE_RECOGNIZER_TOKEN").unwrap_or_default();
        if token.trim().is_empty() {
            bail!("PLATE_RECOGNIZER_TOKEN environment variable unset");
        }
        let recognizer = RecognizerConfig {
            url: Url::parse(&url).map_err(|e| format_err!("Invalid PLATE_RECOGNIZER_URL {}: {}", url, e))?,
            token,
            regions: lookup("PLATE_REGIONS")
                .map(|s| {
                    s.split(',')
                        .map(|r| r.trim().to_ascii_lowercase())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            timeout,
        };

        let watch_defaults = WatchOptions::default();
        let watch = WatchOptions {
            enable_high_accuracy: parse(&lookup, "WATCH_HIGH_ACCURACY", watch_defaults.enable_high_accuracy)?,
            maximum_age: Duration::from_millis(parse(
                &lookup,
                "WATCH_MAXIMUM_AGE_MS",
                watch_defaults.maximum_age.as_millis() as u64,
            )?),
            timeout: Duration::from_millis(parse_positive(
                &lookup,
                "WATCH_TIMEOUT_MS",
                watch_defaults.timeout.as_millis() as u64,
            )?),
        };

        Ok(Config {
            port: parse_positive(&lookup, "PORT", 5000)?,
            max_upload_bytes: parse_positive(&lookup, "MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,
            pipeline,
            recognizer,
            watch,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format_err!("Unable to parse {}='{}'", key, raw)),
        None => Ok(default),
    }
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default + std::fmt::Display,
{
    let value = parse(lookup, key, default)?;
    // NaN compares as None.
    if value.partial_cmp(&T::default()) != Some(Ordering::Greater) {
        bail!("{} must be positive, got '{}'", key, value);
    }
    Ok(value)
}

fn parse_positive_f64<F>(lookup: &F, key: &str, default: f64) -> Result<f64, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_positive(lookup, key, default)?;
    if !value.is_finite() {
        bail!("{} must be finite, got '{}'", key, value);
    }
    Ok(value)
}
