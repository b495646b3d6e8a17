use log::{debug, error, warning};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Instant,
};

use crate::{
    cv::{Detector, Frame, Region, RegionSelector},
    ocr::Recognizer,
};

pub type SharedDetector = Arc<Mutex<dyn Detector>>;
pub type SharedRecognizer = Arc<dyn Recognizer>;

/// Outcome of recognizing one frame. Never absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlateText {
    Text(String),
    /// No detection or no usable crop.
    Empty,
    /// The recognizer call or its response failed.
    RecognitionError,
}

impl PlateText {
    /// Recognized text when it is long enough to identify a vehicle.
    pub fn usable(&self, min_len: usize) -> Option<&str> {
        match self {
            PlateText::Text(text) if text.chars().count() >= min_len => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for PlateText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlateText::Text(text) => f.write_str(text),
            PlateText::Empty => f.write_str("EMPTY"),
            PlateText::RecognitionError => f.write_str("RECOGNITION_ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub frame_index: u64,
    pub region: Option<Region>,
    pub plate: PlateText,
    pub finished_at: Instant,
}

/// Crop and recognize for a single frame.
pub struct DetectionTask {
    frame: Frame,
    frame_index: u64,
    detector: SharedDetector,
    recognizer: SharedRecognizer,
    selector: RegionSelector,
}

impl DetectionTask {
    pub fn new(
        frame: Frame,
        frame_index: u64,
        detector: SharedDetector,
        recognizer: SharedRecognizer,
        selector: RegionSelector,
    ) -> Self {
        Self {
            frame,
            frame_index,
            detector,
            recognizer,
            selector,
        }
    }

    /// Runs to completion. Every failure maps to a sentinel.
    pub async fn run(self) -> DetectionOutcome {
        let started = Instant::now();
        let frame = Arc::new(self.frame);

        let regions = {
            let frame = frame.clone();
            let detector = self.detector.clone();
            tokio::task::spawn_blocking(move || {
                let mut detector = match detector.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                detector.detect(&frame)
            })
            .await
        };

        let regions = match regions {
            Ok(Ok(regions)) => regions,
            Ok(Err(e)) => {
                error!("Detector failed on frame {}: {:#}", self.frame_index, e);
                Vec::new()
            }
            Err(e) => {
                error!("Detector panicked on frame {}: {}", self.frame_index, e);
                Vec::new()
            }
        };

        let region = self.selector.select(&regions);
        let plate = match region.as_ref().map(|r| (r, frame.crop(r))) {
            None => {
                debug!("No plate on frame {}", self.frame_index);
                PlateText::Empty
            }
            Some((r, None)) => {
                warning!("Degenerate plate box on frame {}: {:?}", self.frame_index, r);
                PlateText::Empty
            }
            Some((_, Some(crop))) => match self.recognizer.recognize(&crop).await {
                Ok(text) => PlateText::Text(text),
                Err(e) => {
                    error!("OCR error on frame {}: {:#}", self.frame_index, e);
                    PlateText::RecognitionError
                }
            },
        };

        debug!(
            "Frame {} recognized as '{}' in {:?}",
            self.frame_index,
            plate,
            started.elapsed()
        );

        DetectionOutcome {
            frame_index: self.frame_index,
            region,
            plate,
            finished_at: Instant::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct FixedDetector(pub Result<Vec<Region>, String>);

    impl Detector for FixedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Region>> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    pub struct FakeRecognizer {
        pub reply: Result<String, String>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FakeRecognizer {
        pub fn ok(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: Err("connection reset".to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn slow(text: &str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok(text)
            }
        }
    }

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        async fn recognize(&self, _crop: &Frame) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }
}
