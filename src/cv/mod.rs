pub mod frame_metrics;

#[cfg(feature = "opencv")]
pub mod capture;
#[cfg(feature = "opencv")]
pub mod net;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Packed 8-bit BGR image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        ensure!(
            data.len() == width as usize * height as usize * Self::CHANNELS,
            "frame buffer has {} bytes, expected {}x{}x{}",
            data.len(),
            width,
            height,
            Self::CHANNELS
        );
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Solid frame, handy for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * Self::CHANNELS)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Crops `region` after clamping it to the image. `None` when the clamped box
    /// has no area.
    pub fn crop(&self, region: &Region) -> Option<Frame> {
        let (x1, y1, x2, y2) = region.clamped(self.width, self.height)?;
        let (w, h) = (x2 - x1, y2 - y1);

        let stride = self.width as usize * Self::CHANNELS;
        let row_len = w as usize * Self::CHANNELS;
        let mut data = Vec::with_capacity(row_len * h as usize);

        for y in y1..y2 {
            let start = y as usize * stride + x1 as usize * Self::CHANNELS;
            data.extend_from_slice(self.data.get(start..start + row_len)?);
        }

        Some(Frame {
            width: w,
            height: h,
            data,
        })
    }
}

/// One detector hit in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: i32,
}

impl Region {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    /// Integer box clamped to `width` x `height`, or `None` if degenerate.
    pub fn clamped(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() || v <= 0. {
                0
            } else {
                (v as u32).min(max)
            }
        };

        let x1 = clamp(self.x1, width);
        let y1 = clamp(self.y1, height);
        let x2 = clamp(self.x2, width);
        let y2 = clamp(self.y2, height);

        (x2 > x1 && y2 > y1).then_some((x1, y1, x2, y2))
    }
}

/// Which detector hit a detection task works on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionSelector {
    /// First region in detector order.
    #[default]
    First,
    HighestConfidence,
}

impl RegionSelector {
    pub fn select(&self, regions: &[Region]) -> Option<Region> {
        match self {
            RegionSelector::First => regions.first().copied(),
            RegionSelector::HighestConfidence => regions
                .iter()
                .copied()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence)),
        }
    }
}

/// Plate locator run on whole frames.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>>;
}

/// Live frames, one per call.
///
/// `Ok(None)` is a missed tick; an error means the source is finished or broken.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}
