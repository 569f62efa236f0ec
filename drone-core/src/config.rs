//! Typed configuration surface. Every key from the required-
//! configuration list loads from a TOML file with the documented
//! default substituted when absent, following the same load-with-
//! fallback discipline the rest of the stack's calibration cache uses
//! (see `calibration.rs`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    SimpleBlob,
    Orb,
    Sift,
    Surf,
}

impl Default for DetectorBackend {
    fn default() -> Self {
        DetectorBackend::SimpleBlob
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    BlockMatching,
    BruteForce,
    Flann,
}

impl Default for MatchingMode {
    fn default() -> Self {
        MatchingMode::BlockMatching
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionMode {
    Disparity,
    SvdTriangulation,
    IterativeTriangulation,
}

impl Default for ReconstructionMode {
    fn default() -> Self {
        ReconstructionMode::Disparity
    }
}

/// Required configuration keys, per `SPEC_FULL.md` section 6, with
/// their documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Step distance in pixels for the drone to fly each iteration. If
    /// `None`, substitutes a quarter of the frame diagonal.
    pub rho_step_distance: Option<f64>,
    /// Single-edge safety ratio used in heading weight computation.
    pub rho_min_diag_perc: f64,
    pub default_downsampling_divisor: u32,
    pub desired_frame_shape: (u32, u32),
    pub detector_type: DetectorBackend,
    /// Whether to crop frames to the laser's narrower fan angle before
    /// the point pipeline runs; see `fan_angle_camera_deg`/
    /// `fan_angle_laser_deg`.
    pub crop_frames: bool,
    pub fan_angle_camera_deg: f64,
    /// When narrower than `fan_angle_camera_deg` and `crop_frames` is
    /// set, frames are cropped to `fan_angle_laser_deg /
    /// fan_angle_camera_deg` of their downscaled size.
    pub fan_angle_laser_deg: f64,
    pub reconstruction_mode: ReconstructionMode,
    pub matching_mode: MatchingMode,
    pub block_matching_tuning_param: f64,
    pub baseline_mm: f64,
    pub focal_length_mm: f64,
    pub sensor_size_mm: (f64, f64),
    pub master_ip: String,
    pub port: u16,
    pub master_buffer_size: usize,
    pub slave_buffer_size: usize,
    pub tcp_timeout_secs: u64,
    pub frame_req_timeout_secs: u64,
    /// Slave's inactivity bound in automatic mode.
    pub master_timeout_secs: u64,
    pub calib_timeout_secs: i64,
    pub scale_calib_cache_path: String,
    pub n_frames: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rho_step_distance: None,
            rho_min_diag_perc: 0.25,
            default_downsampling_divisor: 2,
            desired_frame_shape: (512, 612),
            detector_type: DetectorBackend::default(),
            crop_frames: false,
            fan_angle_camera_deg: 60.0,
            fan_angle_laser_deg: 60.0,
            reconstruction_mode: ReconstructionMode::default(),
            matching_mode: MatchingMode::default(),
            block_matching_tuning_param: 2.5,
            baseline_mm: 100.0,
            focal_length_mm: 4.0,
            sensor_size_mm: (6.4, 4.8),
            master_ip: "0.0.0.0".to_string(),
            port: 1991,
            master_buffer_size: 3072,
            slave_buffer_size: 256,
            tcp_timeout_secs: 10,
            frame_req_timeout_secs: 10,
            master_timeout_secs: 30,
            calib_timeout_secs: -1,
            scale_calib_cache_path: "scale_calibration.toml".to_string(),
            n_frames: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults for any
    /// key the file omits. Missing file is not an error — it simply
    /// produces the default settings, matching the persistence layer's
    /// "no file yet" behaviour elsewhere in this stack.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no settings file found, using defaults");
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        info!(
            port = settings.port,
            detector = ?settings.detector_type,
            reconstruction = ?settings.reconstruction_mode,
            "settings loaded"
        );
        Ok(settings)
    }
}
