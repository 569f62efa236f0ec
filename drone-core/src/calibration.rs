//! Calibration cache persistence — the one piece of filesystem state
//! this crate owns outright (Section 6: everything else under
//! `calib_save_folder`/`calib_img_folder_*` is produced by the
//! out-of-scope stereo-calibration collaborator). Follows the same
//! load-with-fallback-on-missing-or-corrupt discipline the rest of the
//! stack uses for its persisted state.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Persisted ScaleCalibrator result (C4): nearest-neighbour spacing and
/// mean blob size at the inspection standoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleCalibrationCache {
    pub standard_spacing: f64,
    pub standard_blob_size: f64,
}

impl ScaleCalibrationCache {
    /// Load the cache from disk. Returns `None` if the file is absent,
    /// unreadable, or fails to parse — in all three cases a
    /// recalibration is required, logged at `warn!` (missing file is
    /// `info!`, not a fault: first run of a fresh mission).
    pub fn load(path: impl AsRef<Path>) -> Option<ScaleCalibrationCache> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no scale calibration cache found, recalibration required");
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse scale calibration cache, recalibration required");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read scale calibration cache, recalibration required");
                None
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
