//! A synthetic pinhole stereo rig — rectified, zero distortion, fixed
//! intrinsics — standing in for the out-of-scope chessboard calibration
//! routine behind `StereoCalibration`.

use nalgebra::{Matrix3x4, Matrix4};

use vision_types::camera::StereoCalibration;
use vision_types::Frame;

pub struct SimStereoCalibration {
    width: u32,
    height: u32,
    focal_px: f64,
    baseline_px: f64,
    baseline_mm: f64,
}

impl SimStereoCalibration {
    /// `sensor_size_mm` is `(width_mm, height_mm)`; pixels-per-mm is
    /// derived from the sensor width, matching a simple pinhole model.
    pub fn new(width: u32, height: u32, focal_length_mm: f64, baseline_mm: f64, sensor_size_mm: (f64, f64)) -> Self {
        let px_per_mm = width as f64 / sensor_size_mm.0;
        let focal_px = focal_length_mm * px_per_mm;
        let baseline_px = baseline_mm * px_per_mm;
        Self { width, height, focal_px, baseline_px, baseline_mm }
    }
}

impl StereoCalibration for SimStereoCalibration {
    fn undistort(&self, frame: &Frame) -> Frame {
        // Rectified, zero-distortion rig: nothing to correct.
        frame.clone()
    }

    fn projection_matrices(&self) -> (Matrix3x4<f64>, Matrix3x4<f64>) {
        let f = self.focal_px;
        let (cx, cy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);
        #[rustfmt::skip]
        let p_l = Matrix3x4::new(
            f,   0.0, cx,  0.0,
            0.0, f,   cy,  0.0,
            0.0, 0.0, 1.0, 0.0,
        );
        #[rustfmt::skip]
        let p_r = Matrix3x4::new(
            f,   0.0, cx, -f * self.baseline_mm,
            0.0, f,   cy,  0.0,
            0.0, 0.0, 1.0, 0.0,
        );
        (p_l, p_r)
    }

    fn disparity_to_depth(&self) -> Matrix4<f64> {
        let f = self.focal_px;
        let (cx, cy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);
        #[rustfmt::skip]
        let q = Matrix4::new(
            1.0, 0.0, 0.0, -cx,
            0.0, 1.0, 0.0, -cy,
            0.0, 0.0, 0.0,  f,
            0.0, 0.0, -1.0 / self.baseline_mm, 0.0,
        );
        q
    }

    fn focal_length_px(&self) -> f64 {
        self.focal_px
    }

    fn baseline_px(&self) -> f64 {
        self.baseline_px
    }

    fn baseline_mm(&self) -> f64 {
        self.baseline_mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_matrices_agree_at_infinite_depth_shift() {
        let calib = SimStereoCalibration::new(640, 480, 4.0, 100.0, (6.4, 4.8));
        let (p_l, p_r) = calib.projection_matrices();
        assert_eq!(p_l[(0, 0)], p_r[(0, 0)]);
        assert_ne!(p_l[(0, 3)], p_r[(0, 3)]);
    }

    #[test]
    fn baseline_px_scales_with_sensor_pixel_density() {
        let calib = SimStereoCalibration::new(1280, 960, 4.0, 100.0, (6.4, 4.8));
        assert!(calib.baseline_px() > 0.0);
        assert_eq!(calib.baseline_mm(), 100.0);
    }
}
