use super::{Detector, Frame, Region, capture::frame_to_mat};
use anyhow::{Result, anyhow};
use log::{debug, error, info};
use opencv::core::{CV_32F, Mat, MatTraitConst, Rect, Scalar, Size, Vector};
use opencv::dnn::{self, NetTrait};
use std::time::Instant;

/// YOLO plate detector loaded from an ONNX export.
///
/// Expects the single-class ultralytics output layout `[1, 4 + classes, N]`
/// with boxes as centre/size in network input pixels.
pub struct PlateNet {
    net: dnn::Net,
    input_size: i32,
    confidence: f32,
    nms: f32,
}

impl PlateNet {
    pub fn new(model: &str, input_size: u32, confidence: f32, nms: f32) -> Result<Self> {
        debug!("Loading plate detector from '{}'", model);
        let start_time = Instant::now();

        let net = match dnn::read_net_from_onnx(model) {
            Ok(net) => {
                info!("Plate detector loaded in {:?}", start_time.elapsed());
                net
            }
            Err(e) => {
                error!("Failed to load plate detector: {}", e);
                return Err(e.into());
            }
        };

        Ok(Self {
            net,
            input_size: input_size as i32,
            confidence,
            nms,
        })
    }

    fn forward(&mut self, mat: &Mat) -> Result<Mat> {
        let blob = dnn::blob_from_image(
            mat,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        self.net.set_input_def(&blob)?;
        Ok(self.net.forward_single_def()?)
    }
}

impl Detector for PlateNet {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>> {
        let started = Instant::now();
        let mat = frame_to_mat(frame)?;
        let output = self.forward(&mat)?;

        let sizes = output.mat_size();
        if sizes.len() != 3 {
            return Err(anyhow!(
                "Invalid output size: expected 3 dimensions, got {}",
                sizes.len()
            ));
        }
        let (rows, candidates) = (sizes[1], sizes[2]);
        if rows < 5 {
            return Err(anyhow!("Invalid output size: {} rows per candidate", rows));
        }

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;

        let mut boxes = Vector::<Rect>::new();
        let mut scores = Vector::<f32>::new();
        let mut classes = Vec::new();

        for i in 0..candidates {
            let mut best = (0, 0f32);
            for c in 4..rows {
                let score = *output.at_3d::<f32>(0, c, i)?;
                if score > best.1 {
                    best = (c - 4, score);
                }
            }
            if best.1 < self.confidence {
                continue;
            }

            let cx = *output.at_3d::<f32>(0, 0, i)? * sx;
            let cy = *output.at_3d::<f32>(0, 1, i)? * sy;
            let w = *output.at_3d::<f32>(0, 2, i)? * sx;
            let h = *output.at_3d::<f32>(0, 3, i)? * sy;

            boxes.push(Rect::new(
                (cx - w / 2.) as i32,
                (cy - h / 2.) as i32,
                w as i32,
                h as i32,
            ));
            scores.push(best.1);
            classes.push(best.0);
        }

        let mut keep = Vector::<i32>::new();
        dnn::nms_boxes(&boxes, &scores, self.confidence, self.nms, &mut keep, 1.0, 0)?;

        let mut regions = Vec::with_capacity(keep.len());
        for idx in keep.iter() {
            let idx = idx as usize;
            let rect = boxes.get(idx)?;
            regions.push(Region::new(
                rect.x as f32,
                rect.y as f32,
                (rect.x + rect.width) as f32,
                (rect.y + rect.height) as f32,
                scores.get(idx)?,
                classes.get(idx).copied().unwrap_or_default(),
            ));
        }

        debug!(
            "Detected {} plate(s) out of {} candidates in {:?}",
            regions.len(),
            candidates,
            started.elapsed()
        );
        Ok(regions)
    }
}
