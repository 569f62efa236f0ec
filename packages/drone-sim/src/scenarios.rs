//! Named scenario presets, each tuned to exercise one of the testable
//! end-to-end properties of the coordination/vision stack.

use serde::{Deserialize, Serialize};

use crate::{SimFrameSource, SimStereoCalibration};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioKind {
    /// Blade boundary starts near the top of frame — tip arrival within
    /// the first few iterations.
    TipReversal,
    /// Wide frame, narrow dot spacing — only one edge family survives
    /// normalisation, exercising the single-edge heading weight path.
    SingleEdgeWeighting,
    /// Moderate baseline/focal combination with a dense dot grid, for
    /// disparity-to-depth reconstruction checks.
    StereoDisparity,
    /// Minimal frame, used purely to drive protocol framing over a
    /// loopback connection without a real pipeline behind it.
    ProtocolFraming,
    /// Several iterations with an unmoving boundary, checking that the
    /// followed-edge family locks after the first iteration.
    OrientationLock,
    /// Boundary already past the tip-detection threshold on the first
    /// capture.
    TipArrival,
}

/// Frame/calibration pair tuned for one scenario. `(width, height)`
/// match `Settings::desired_frame_shape`'s orientation.
pub fn build(kind: ScenarioKind) -> (SimFrameSource, SimStereoCalibration) {
    match kind {
        ScenarioKind::TipReversal => (
            SimFrameSource::with_seed(256, 256, 16.0, 0.0, 40.0, 60.0, 1),
            SimStereoCalibration::new(256, 256, 4.0, 100.0, (6.4, 4.8)),
        ),
        ScenarioKind::SingleEdgeWeighting => (
            SimFrameSource::with_seed(512, 128, 20.0, 0.0, 5.0, 96.0, 2),
            SimStereoCalibration::new(512, 128, 4.0, 100.0, (6.4, 4.8)),
        ),
        ScenarioKind::StereoDisparity => (
            SimFrameSource::with_seed(320, 240, 12.0, 1.0, 3.0, 180.0, 3),
            SimStereoCalibration::new(320, 240, 6.0, 120.0, (6.4, 4.8)),
        ),
        ScenarioKind::ProtocolFraming => (
            SimFrameSource::with_seed(32, 32, 8.0, 0.0, 1.0, 16.0, 4),
            SimStereoCalibration::new(32, 32, 4.0, 100.0, (6.4, 4.8)),
        ),
        ScenarioKind::OrientationLock => (
            SimFrameSource::with_seed(256, 256, 16.0, 0.0, 0.0, 128.0, 5),
            SimStereoCalibration::new(256, 256, 4.0, 100.0, (6.4, 4.8)),
        ),
        ScenarioKind::TipArrival => (
            SimFrameSource::with_seed(256, 256, 16.0, 0.0, 0.0, 5.0, 6),
            SimStereoCalibration::new(256, 256, 4.0, 100.0, (6.4, 4.8)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_arrival_scenario_starts_within_the_tip_detection_band() {
        let (source, _) = build(ScenarioKind::TipArrival);
        // diag/3 for a 256x256 frame is ~120px; an edge_offset of 5
        // lands well inside the tip-detection band once centred.
        assert!(source.edge_offset() < 256.0 / 3.0);
    }

    #[test]
    fn every_scenario_builds_without_panicking() {
        for kind in [
            ScenarioKind::TipReversal,
            ScenarioKind::SingleEdgeWeighting,
            ScenarioKind::StereoDisparity,
            ScenarioKind::ProtocolFraming,
            ScenarioKind::OrientationLock,
            ScenarioKind::TipArrival,
        ] {
            let _ = build(kind);
        }
    }
}
