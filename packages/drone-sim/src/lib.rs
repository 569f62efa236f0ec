//! # drone-sim
//!
//! Synthetic stand-ins for the two out-of-scope collaborators the
//! vision stack depends on: a [`FrameSource`] driving a moving blade
//! edge with a laser dot grid and Gaussian pixel noise, and a
//! [`StereoCalibration`] for a pinhole stereo rig. Used by
//! `drone-vision simulate` for bench testing without hardware and by
//! integration tests that need the whole pipeline end to end.

pub mod frame_source;
pub mod scenarios;
pub mod stereo_calibration;

pub use frame_source::SimFrameSource;
pub use stereo_calibration::SimStereoCalibration;
