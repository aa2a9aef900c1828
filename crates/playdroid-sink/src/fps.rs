// Handoff rate counter for the sink's periodic report
use std::time::{Duration, Instant};

/// Simple rolling-average rate counter
pub struct FpsCounter {
    /// When we started counting
    last_report: Instant,
    /// Frames since last report
    frame_count: u32,
    /// Report interval
    report_interval: Duration,
}

impl FpsCounter {
    pub fn new(report_interval: Duration) -> Self {
        Self {
            last_report: Instant::now(),
            frame_count: 0,
            report_interval,
        }
    }

    /// Call this for each buffer received
    /// Returns Some(fps) once per report interval
    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;

        let elapsed = self.last_report.elapsed();
        if elapsed >= self.report_interval {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.frame_count = 0;
            self.last_report = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
