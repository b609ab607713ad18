//! Remote HTTP classifier.
//!
//! Sends one resized JPEG per call as a multipart form upload and parses the
//! `predictions` list of the JSON reply. Non-200 answers and transport errors
//! map to `PerceptionError::DetectorUnavailable`; there is no retry here, the
//! next periodic dispatch is the retry.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use url::Url;

use crate::detect::backend::Classifier;
use crate::detect::result::{ClassLabels, Detection};
use crate::error::PerceptionError;
use crate::frame::Frame;

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (416, 416);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct RemoteClassifierConfig {
    /// Model endpoint, e.g. "https://detect.roboflow.com/<project>/<version>".
    pub endpoint: String,
    /// Appended as the `api_key` query parameter when present.
    pub api_key: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub timeout: Duration,
    pub jpeg_quality: u8,
    pub labels: ClassLabels,
}

impl Default for RemoteClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            input_width: DEFAULT_INPUT_SIZE.0,
            input_height: DEFAULT_INPUT_SIZE.1,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            jpeg_quality: 90,
            labels: ClassLabels::default(),
        }
    }
}

pub struct RemoteClassifier {
    config: RemoteClassifierConfig,
    url: Url,
    agent: ureq::Agent,
}

impl RemoteClassifier {
    pub fn new(config: RemoteClassifierConfig) -> Result<Self> {
        let mut url = Url::parse(&config.endpoint).context("parse detector url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detector scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            url.query_pairs_mut().append_pair("api_key", key);
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, url, agent })
    }

    /// Endpoint without query string, safe to log.
    pub fn endpoint(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.to_string()
    }

    fn post(&self, body: &[u8], boundary: &str) -> Result<String> {
        let content_type = format!("multipart/form-data; boundary={}", boundary);
        let response = match self
            .agent
            .post(self.url.as_str())
            .set("Content-Type", &content_type)
            .send_bytes(body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(unavailable(format!(
                    "status {}: {}",
                    code,
                    text.chars().take(200).collect::<String>()
                )));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(unavailable(format!("request failed: {}", transport)));
            }
        };
        if response.status() != 200 {
            return Err(unavailable(format!("status {}", response.status())));
        }
        let mut raw = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut raw)
            .map_err(|e| unavailable(format!("read response: {}", e)))?;
        Ok(raw)
    }
}

impl Classifier for RemoteClassifier {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.config.input_width, self.config.input_height)
    }

    fn classify(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = encode_for_detector(
            frame,
            self.config.input_width,
            self.config.input_height,
            self.config.jpeg_quality,
        )?;
        let boundary = format!("edge-deterrent-{:016x}", rand::random::<u64>());
        let body = multipart_body(&boundary, "file", "image.jpg", "image/jpeg", &jpeg);
        let raw = self.post(&body, &boundary)?;
        parse_predictions(raw.as_bytes(), &self.config.labels)
            .map_err(|e| unavailable(format!("invalid response: {:#}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    class: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    #[serde(default)]
    confidence: f32,
}

/// Parse a classifier reply. A missing `predictions` key is an empty list.
pub fn parse_predictions(payload: &[u8], labels: &ClassLabels) -> Result<Vec<Detection>> {
    let response: PredictionResponse =
        serde_json::from_slice(payload).map_err(|e| anyhow!("parse error: {}", e))?;
    Ok(response
        .predictions
        .into_iter()
        .map(|p| Detection {
            class: labels.classify(&p.class),
            center_x: p.x,
            center_y: p.y,
            width: p.width,
            height: p.height,
            confidence: p.confidence.clamp(0.0, 1.0),
        })
        .collect())
}

/// Resize to the detector input size and encode as JPEG.
pub fn encode_for_detector(frame: &Frame, width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let resized = imageops::resize(frame.image(), width, height, FilterType::Triangle);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&resized)
        .context("encode detector jpeg")?;
    Ok(jpeg)
}

fn multipart_body(
    boundary: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

fn unavailable(reason: String) -> anyhow::Error {
    anyhow::Error::new(PerceptionError::DetectorUnavailable { reason })
}
