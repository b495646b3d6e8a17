use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use log::debug;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::{io::Cursor, time::Duration};

use crate::{auth, cv::Frame};

pub const SIGNATURE_HEADER: &str = "X-Api-Signature";

/// Plate-text recognizer. One call per crop, no retries.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, crop: &Frame) -> Result<String>;
}

/// Remote OCR endpoint taking a JPEG upload and answering with JSON.
pub struct HttpRecognizer {
    client: reqwest::Client,
    url: String,
    field: String,
    secret: Option<String>,
}

impl HttpRecognizer {
    pub fn new(url: &str, field: &str, timeout: Duration, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_owned(),
            field: field.to_owned(),
            secret,
        })
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, crop: &Frame) -> Result<String> {
        let jpeg = encode_jpeg(crop)?;
        debug!("Sending {} byte crop to {}", jpeg.len(), self.url);

        let form = Form::new().part(
            "image",
            Part::bytes(jpeg)
                .file_name("plate.jpg")
                .mime_str("image/jpeg")?,
        );

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, auth::compute_hmac(secret, &self.url));
        }

        let response = request.send().await.context("OCR request failed")?;
        let status = response.status();
        let body = response.text().await.context("Failed to read OCR response")?;

        if !status.is_success() {
            bail!("OCR endpoint returned {}: {}", status, body);
        }

        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("OCR response is not JSON: {body}"))?;
        parse_response(&value, &self.field)
    }
}

/// Pulls the recognized text out of the endpoint's JSON body.
pub fn parse_response(value: &Value, field: &str) -> Result<String> {
    match value.get(field) {
        Some(Value::String(text)) => Ok(text.trim().to_string()),
        Some(Value::Null) | None => Err(anyhow!("OCR response has no '{}'", field)),
        Some(other) => Err(anyhow!("OCR '{}' is not a string: {}", field, other)),
    }
}

/// JPEG-encodes a BGR frame.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let rgb: Vec<u8> = frame
        .data()
        .chunks_exact(Frame::CHANNELS)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();

    let image = RgbImage::from_raw(frame.width(), frame.height(), rgb)
        .context("Frame buffer does not match its dimensions")?;

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Jpeg)
        .context("Failed to encode crop")?;
    Ok(out.into_inner())
}
