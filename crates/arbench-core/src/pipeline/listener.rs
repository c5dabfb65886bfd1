//! Per-frame results and the continuous-capture callback interface.

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::runtime_adapter::TensorMap;
use crate::telemetry::RunMetrics;
use std::time::{Duration, Instant};

/// Stage boundaries for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimestamps {
    /// When the frame was handed to the executor
    pub submitted: Instant,
    pub encoder_start: Instant,
    pub encoder_end: Instant,
    /// When the decoder stage took the frame out of the handoff slot
    pub decoder_start: Instant,
    pub decoder_end: Instant,
}

impl StageTimestamps {
    pub fn encoder_time(&self) -> Duration {
        self.encoder_end.saturating_duration_since(self.encoder_start)
    }

    pub fn decoder_time(&self) -> Duration {
        self.decoder_end.saturating_duration_since(self.decoder_start)
    }

    /// Time the encoded frame waited in the handoff slot.
    pub fn handoff_wait(&self) -> Duration {
        self.decoder_start.saturating_duration_since(self.encoder_end)
    }

    /// Encoder start to decoder end.
    pub fn latency(&self) -> Duration {
        self.decoder_end.saturating_duration_since(self.encoder_start)
    }
}

/// Outcome of one frame through both stages.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Submission order, starting at 0
    pub sequence: u64,
    /// Merged decoder outputs, or why the frame failed. Never partial.
    pub outcome: Result<TensorMap, PipelineError>,
    pub timestamps: StageTimestamps,
    /// Set when this frame closed a monitoring window
    pub metrics: Option<RunMetrics>,
}

impl FrameResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn outputs(&self) -> Option<&TensorMap> {
        self.outcome.as_ref().ok()
    }

    pub fn latency(&self) -> Duration {
        self.timestamps.latency()
    }
}

/// Callbacks for frames submitted with
/// [`queue_run`](super::PipelineExecutor::queue_run).
///
/// `on_ready_for_next_frame` runs on the encoder thread and
/// `on_frame_result` on the decoder thread; neither should block for long.
/// Submitting from `on_frame_result` can deadlock once the submission slot
/// is full, since the decoder thread is the one that drains it.
pub trait PipelineListener: Send + Sync {
    fn on_frame_result(&self, frame: &Frame, result: FrameResult);

    /// The encoder has handed a frame to the decoder stage.
    fn on_ready_for_next_frame(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_durations() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let stamps = StageTimestamps {
            submitted: t0,
            encoder_start: t0 + ms(5),
            encoder_end: t0 + ms(55),
            decoder_start: t0 + ms(70),
            decoder_end: t0 + ms(150),
        };
        assert_eq!(stamps.encoder_time(), ms(50));
        assert_eq!(stamps.handoff_wait(), ms(15));
        assert_eq!(stamps.decoder_time(), ms(80));
        assert_eq!(stamps.latency(), ms(145));
    }
}
