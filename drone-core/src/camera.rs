//! Re-exports the camera/calibration trait seams from `vision-types`,
//! where they live so a synthetic implementation (`drone-sim`) can
//! satisfy them without depending on this crate. See
//! `vision_types::camera` for the trait definitions themselves.

pub use vision_types::camera::{FrameSource, NullRootSensor, RootSensor, StereoCalibration};
