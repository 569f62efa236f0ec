//! Trait seams for the out-of-scope collaborators the vision stack
//! consumes but never implements: the camera/GPIO driver and the
//! intrinsic/stereo calibration result. Kept in this shared crate (and
//! not `drone-core`) so a synthetic implementation can be provided by a
//! sibling crate without a dependency cycle back onto the pipeline
//! crate that drives them.

use crate::{CameraFault, Frame};

/// Yields raw `(normal, structured)` frame pairs and can be re-armed
/// for the next capture. Implemented by the camera driver (out of
/// scope) or, for testing and simulation, by `drone-sim`.
pub trait FrameSource: Send {
    /// Arm the next capture (instructs the underlying driver/laser to
    /// prepare a normal/structured-light pair).
    fn arm(&mut self) -> Result<(), CameraFault>;

    /// Block until the armed pair is ready, or the per-frame timeout
    /// elapses.
    fn capture(&mut self) -> Result<(Frame, Frame), CameraFault>;
}

/// Intrinsic/stereo calibration result: undistortion, projection
/// matrices, the disparity-to-depth matrix, and the metric baseline.
/// Produced by an out-of-scope chessboard calibration routine; consumed
/// read-only by Stereopsis and FrameOps.
pub trait StereoCalibration: Send + Sync {
    fn undistort(&self, frame: &Frame) -> Frame;

    /// Left and right 3x4 projection matrices.
    fn projection_matrices(&self) -> (nalgebra::Matrix3x4<f64>, nalgebra::Matrix3x4<f64>);

    /// 4x4 disparity-to-depth reprojection matrix.
    fn disparity_to_depth(&self) -> nalgebra::Matrix4<f64>;

    fn focal_length_px(&self) -> f64;

    fn baseline_px(&self) -> f64;

    fn baseline_mm(&self) -> f64;
}

/// External range sensor the root-detection stub defers to (radar or
/// similar). `original_source`'s `GetRootDetected` always returns
/// `false`; `NullRootSensor` preserves that behaviour exactly while
/// giving a future real sensor a seam to plug into.
pub trait RootSensor: Send + Sync {
    fn root_detected(&self) -> bool;
}

pub struct NullRootSensor;

impl RootSensor for NullRootSensor {
    fn root_detected(&self) -> bool {
        false
    }
}
