use super::{Frame, FrameSource};
use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, info};
use opencv::{
    core::{CV_8UC3, Mat, MatTraitConst, MatTraitConstManual},
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};

pub struct CameraSource {
    capture: VideoCapture,
    mat: Mat,
    from_file: bool,
}

impl CameraSource {
    pub fn camera(index: i32, width: u32, height: u32) -> Result<Self> {
        info!("Opening camera stream {}", index);
        let mut capture = VideoCapture::new_def(index).context("Failed to open camera")?;

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
        let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G')?;
        capture.set(videoio::CAP_PROP_FOURCC, fourcc as f64)?;

        Self::from_capture(capture, false)
    }

    pub fn file(path: &str) -> Result<Self> {
        info!("Opening input video file stream: {}", path);
        let capture = VideoCapture::from_file_def(path).context("Failed to open video file")?;
        Self::from_capture(capture, true)
    }

    fn from_capture(capture: VideoCapture, from_file: bool) -> Result<Self> {
        if !capture.is_opened()? {
            return Err(anyhow!("Camera not opened"));
        }
        debug!("Capture opened successfully");
        Ok(Self {
            capture,
            mat: Mat::default(),
            from_file,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.capture.read(&mut self.mat)? || self.mat.empty() {
            if self.from_file {
                return Err(anyhow!("End of video file"));
            }
            return Ok(None);
        }
        mat_to_frame(&self.mat).map(Some)
    }
}

/// Copies a BGR `Mat` into an owned frame.
pub fn mat_to_frame(mat: &Mat) -> Result<Frame> {
    ensure!(mat.typ() == CV_8UC3, "unsupported frame type {}", mat.typ());

    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };

    Frame::new(mat.cols() as u32, mat.rows() as u32, data)
}

/// Copies a frame into a 3-channel `Mat`.
pub fn frame_to_mat(frame: &Frame) -> Result<Mat> {
    let flat = Mat::from_slice(frame.data())?;
    let shaped = flat.reshape(3, frame.height() as i32)?;
    Ok(shaped.try_clone()?)
}
