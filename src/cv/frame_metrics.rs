use log::{debug, info};
use std::time::{Duration, Instant};

/// Frame-rate bookkeeping for the acquisition loop.
pub struct FrameMetrics {
    last_frame_time: Instant,
    start_time: Instant,
    fps: f32,
    min_fps: f32,
    max_fps: f32,
    frames: usize,
    missed: usize,
    report_every: usize,
}

impl FrameMetrics {
    pub fn new(report_every: usize) -> Self {
        debug!("Initializing frame metrics tracker");
        let now = Instant::now();
        FrameMetrics {
            last_frame_time: now,
            start_time: now,
            fps: 0.0,
            min_fps: f32::MAX,
            max_fps: 0.0,
            frames: 0,
            missed: 0,
            report_every: report_every.max(1),
        }
    }

    /// Records a delivered frame at `now`.
    pub fn frame(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_frame_time);
        if !elapsed.is_zero() {
            self.fps = 1.0 / elapsed.as_secs_f32();
            self.min_fps = self.min_fps.min(self.fps);
            self.max_fps = self.max_fps.max(self.fps);
        }
        self.frames += 1;
        self.last_frame_time = now;

        if self.frames % self.report_every == 0 {
            info!(
                "Performance stats after {} frames: Current: {:.1} FPS, Avg: {:.1} FPS, Min: {:.1} FPS, Max: {:.1} FPS, missed reads: {}",
                self.frames,
                self.fps,
                self.avg_fps(),
                self.min_fps,
                self.max_fps,
                self.missed
            );
        }
    }

    /// Records a tick where the source had nothing to deliver.
    pub fn missed(&mut self) {
        self.missed += 1;
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn avg_fps(&self) -> f32 {
        let runtime = self.last_frame_time.duration_since(self.start_time);
        if runtime.is_zero() {
            0.0
        } else {
            self.frames as f32 / runtime.as_secs_f32()
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn missed_reads(&self) -> usize {
        self.missed
    }

    pub fn total_runtime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
