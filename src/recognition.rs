use crate::config::RecognizerConfig;
use crate::types::{BoundingBox, PlateDetection};
use bytes::Bytes;
use failure::Error;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

/// Anything that can find plates in a JPEG. Detections keep the order the
/// recognizer reported them in.
pub trait PlateRecognizer: Send + Sync {
    fn recognize(&self, jpeg: Bytes) -> BoxFuture<'_, Result<Vec<PlateDetection>, Error>>;
}

/// Client for the Plate Recognizer `plate-reader` HTTP API.
pub struct PlateRecognizerClient {
    client: reqwest::Client,
    config: RecognizerConfig,
}

impl PlateRecognizerClient {
    pub fn new(config: RecognizerConfig) -> Result<PlateRecognizerClient, Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(PlateRecognizerClient { client, config })
    }

    async fn recognize_impl(&self, jpeg: Bytes) -> Result<Vec<PlateDetection>, Error> {
        let length = jpeg.len() as u64;
        let part = Part::stream_with_length(jpeg, length)
            .file_name("upload.jpeg")
            .mime_str("image/jpeg")?;
        let mut form = Form::new().part("upload", part);
        for region in &self.config.regions {
            form = form.text("regions", region.clone());
        }

        let response = self
            .client
            .post(self.config.url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.config.token))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Recognizer responded {}: {}", status, body);
        }
        let json: Value = response.json().await?;
        debug!("Recognizer response: {}", json);
        parse_results(&json)
    }
}

impl PlateRecognizer for PlateRecognizerClient {
    fn recognize(&self, jpeg: Bytes) -> BoxFuture<'_, Result<Vec<PlateDetection>, Error>> {
        self.recognize_impl(jpeg).boxed()
    }
}

/// Parses the `results` array of a plate-reader response.
pub fn parse_results(json: &Value) -> Result<Vec<PlateDetection>, Error> {
    let results = json["results"]
        .as_array()
        .ok_or_else(|| format_err!("Missing results in JSON"))?;
    results.iter().map(parse_result).collect()
}

fn parse_result(result: &Value) -> Result<PlateDetection, Error> {
    let plate = result["plate"]
        .as_str()
        .ok_or_else(|| format_err!("Missing plate field"))?;
    let confidence = result["score"]
        .as_f64()
        .ok_or_else(|| format_err!("Missing score field"))?;
    let vehicle = &result["vehicle"]["box"];
    let vehicle_box = parse_box(vehicle);
    if vehicle_box.is_none() && !vehicle.is_null() {
        warn!("Ignoring malformed vehicle box for plate {}: {}", plate, vehicle);
    }
    Ok(PlateDetection {
        plate: plate.to_uppercase(),
        region: result["region"]["code"]
            .as_str()
            .unwrap_or_default()
            .to_ascii_lowercase(),
        confidence: confidence.max(0.0).min(1.0),
        vehicle_box,
    })
}

fn parse_box(value: &Value) -> Option<BoundingBox> {
    BoundingBox::new(
        value["xmin"].as_f64()?,
        value["ymin"].as_f64()?,
        value["xmax"].as_f64()?,
        value["ymax"].as_f64()?,
    )
}
