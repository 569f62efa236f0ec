//! C10 — Coordinator. `MasterNode`/`SlaveNode` own every per-role
//! concern as a plain field (composition resolves the master/slave
//! diamond the original's class hierarchy fell into — see DESIGN.md);
//! each drives its own tick-style loop over the TCP connection from
//! [`crate::protocol`].
//!
//! ## Master loop (one iteration)
//! `setNewFrame` → local capture/pipeline concurrently with
//! `getPointList` on the slave → camera-fault short-circuit
//! (`restartPtGrey`, skip) → LineGrid/EdgeFinder/HeadingEngine on the
//! master's own keypoints → Stereopsis across both sides → mission-
//! complete check. Vision-pipeline faults degrade the iteration (warn
//! and carry on with whatever succeeded); camera/protocol faults
//! escalate or trigger the restart path.
//!
//! ## Slave loop
//! Poll-and-dispatch over incoming requests, each with an immediate
//! reply; heavy work (capture, point pipeline) runs inline rather than
//! handed to a background flag-setter, since this port has no second
//! OS thread to hand it to — `tokio`'s cooperative scheduling fills
//! that role instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use vision_types::protocol::{
    FrameContent, FrameContentResponse, OriginalFrameContent, OriginalFrameResponse,
    PointListResponse, Request, Response, TradeFrameResponse,
};
use vision_types::{
    CoordinatorPhase, CoordinatorState, Descriptor, Frame, Keypoint, ProtocolFault, VisionFault,
};

use crate::blob_detector::BlobDetector;
use crate::calibration::ScaleCalibrationCache;
use crate::camera::{FrameSource, RootSensor, StereoCalibration};
use crate::config::{MatchingMode, ReconstructionMode, Settings};
use crate::delta_extractor;
use crate::edge_finder;
use crate::frame_ops;
use crate::heading_engine::HeadingEngine;
use crate::line_grid;
use crate::protocol::Connection;
use crate::scale_calibrator;
use crate::stereopsis;

const DEFAULT_DELTA_THRESHOLD: i32 = 40;
const DEFAULT_HUE_TOL: f64 = 10.0;
const EDGE_SCALE_THRESHOLD: f64 = 0.05;
const FILTER_EDGE_OUTLIERS: bool = true;
const DEFAULT_CALIBRATED_SPACING: f64 = 50.0;
const BLOB_SCALE_CALIB_PAIRS: usize = 5;

/// `LASER.fan_angle / CAMERA.fan_angle`, applied only when the laser's
/// fan angle is narrower than the camera's and `crop_frames` is set
/// (spec's crop-to-laser-footprint rule); `1.0` (no crop) otherwise.
fn crop_ratio(settings: &Settings) -> f64 {
    if settings.crop_frames && settings.fan_angle_laser_deg < settings.fan_angle_camera_deg {
        settings.fan_angle_laser_deg / settings.fan_angle_camera_deg
    } else {
        1.0
    }
}

/// Millisecond epoch timestamp, formatted as a decimal string. The
/// original source sends an ISO datetime; this stack has no `chrono`
/// dependency to reach for (nothing downstream parses the value back
/// into a calendar date), so a sortable epoch-millis string stands in,
/// satisfying the same "opaque session stamp" role.
fn session_timestamp() -> String {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    millis.to_string()
}

/// Undistort, downscale/crop, delta-extract, green-mask, and detect
/// blobs for one normal/structured frame pair — the canonical
/// downscale -> delta -> green mask -> detect pipeline, matching
/// `scale_calibrator::detect_calibration_keypoints`'s combination of
/// the two masks. Shared between the master's local branch and the
/// slave's `getFrame`/`getPointList` handlers.
fn run_point_pipeline(
    normal: &Frame,
    structured: &Frame,
    settings: &Settings,
    calibration: &dyn StereoCalibration,
    detector: &BlobDetector,
) -> Result<(Frame, Vec<Keypoint>), VisionFault> {
    let normal_un = calibration.undistort(normal);
    let structured_un = calibration.undistort(structured);
    let normal_ds = frame_ops::downscale(&normal_un, settings.default_downsampling_divisor, settings.desired_frame_shape);
    let structured_ds = frame_ops::downscale(&structured_un, settings.default_downsampling_divisor, settings.desired_frame_shape);
    let ratio = crop_ratio(settings);
    let (normal_final, structured_final) = if ratio < 1.0 {
        (frame_ops::crop_centered(&normal_ds, ratio)?, frame_ops::crop_centered(&structured_ds, ratio)?)
    } else {
        (normal_ds, structured_ds)
    };
    let delta_mask = delta_extractor::delta(&normal_final, &structured_final, DEFAULT_DELTA_THRESHOLD)?;
    let green = frame_ops::green_mask(&structured_final, DEFAULT_HUE_TOL)?;
    let combined: Vec<u8> = delta_mask
        .data
        .iter()
        .zip(green.data.iter())
        .map(|(&d, &g)| if d > 0 && g > 0 { 255 } else { 0 })
        .collect();
    let mask = Frame::new_gray(delta_mask.width, delta_mask.height, combined);
    let enhanced = delta_extractor::enhance(&mask, 0, 0, 0, 0);
    let keypoints = detector.detect(&enhanced, false)?;
    Ok((normal_final, keypoints))
}

/// Run the matching/reconstruction algorithm pair selected by
/// `Settings`, then sigma-filter the result.
fn run_stereopsis(
    left: &[Keypoint],
    right: &[Keypoint],
    left_descriptors: &[Descriptor],
    right_descriptors: &[Descriptor],
    settings: &Settings,
    calibration: &dyn StereoCalibration,
    calibrated_spacing: f64,
) -> Result<Vec<vision_types::Point3D>, VisionFault> {
    let matches = match settings.matching_mode {
        MatchingMode::BlockMatching => {
            stereopsis::block_search_match(left, right, calibrated_spacing, settings.block_matching_tuning_param)
        }
        MatchingMode::BruteForce => stereopsis::brute_force_cross_check_match(left_descriptors, right_descriptors),
        MatchingMode::Flann => stereopsis::flann_equivalent_match(left_descriptors, right_descriptors),
    };
    stereopsis::require_matches(&matches)?;
    let points = match settings.reconstruction_mode {
        ReconstructionMode::Disparity => stereopsis::disparity_reconstruct(
            left,
            &matches,
            calibration.focal_length_px(),
            calibration.baseline_px(),
            calibration.baseline_mm(),
        ),
        ReconstructionMode::SvdTriangulation | ReconstructionMode::IterativeTriangulation => {
            let (p_l, p_r) = calibration.projection_matrices();
            let q = calibration.disparity_to_depth();
            let iterative = matches!(settings.reconstruction_mode, ReconstructionMode::IterativeTriangulation);
            stereopsis::triangulation_reconstruct(left, right, &matches, &p_l, &p_r, &q, iterative)?
        }
    };
    stereopsis::sigma_filter(&points)
}

/// Run the blob-scale calibration phase (C4) against `count` freshly
/// captured calibration pairs, tune `detector`, and persist the result.
fn calibrate_blob_scale(
    frame_source: &mut dyn FrameSource,
    settings: &Settings,
    detector: &mut BlobDetector,
    count: usize,
) {
    let mut keypoint_sets = Vec::new();
    for _ in 0..count {
        if frame_source.arm().is_err() {
            continue;
        }
        match frame_source.capture() {
            Ok((normal, structured)) => {
                let structured_gray = frame_ops::to_gray(&structured);
                match scale_calibrator::detect_calibration_keypoints(
                    &normal,
                    &structured_gray,
                    &structured,
                    DEFAULT_DELTA_THRESHOLD,
                    DEFAULT_HUE_TOL,
                    detector,
                ) {
                    Ok(kps) => keypoint_sets.push(kps),
                    Err(e) => warn!(error = %e, "calibration pair produced no usable keypoints"),
                }
            }
            Err(e) => warn!(error = ?e, "calibration capture failed"),
        }
    }
    if keypoint_sets.is_empty() {
        warn!("blob scale calibration produced no usable keypoint sets, keeping prior tuning");
        return;
    }
    let (h, w) = settings.desired_frame_shape;
    let diag = ((h as f64).powi(2) + (w as f64).powi(2)).sqrt();
    let (spacing, size) = scale_calibrator::calibrate(&keypoint_sets, diag);
    detector.tune(spacing, size);
    info!(spacing, size, "blob scale calibration complete");
    let cache = ScaleCalibrationCache { standard_spacing: spacing, standard_blob_size: size };
    if let Err(e) = cache.save(&settings.scale_calib_cache_path) {
        warn!(error = %e, "failed to persist scale calibration cache");
    }
}

enum IterationOutcome {
    Continue,
    CameraFault,
    MissionComplete,
}

/// The master side: owns the local camera, the master-side CV pipeline
/// (C1-C8), and the connection to the slave.
pub struct MasterNode {
    conn: Connection,
    settings: Settings,
    frame_source: Box<dyn FrameSource>,
    calibration: Arc<dyn StereoCalibration>,
    blob_detector: BlobDetector,
    root_sensor: Box<dyn RootSensor>,
    heading_engine: HeadingEngine,
    scale_cache: Option<ScaleCalibrationCache>,
    state: CoordinatorState,
    /// Set from outside (e.g. a keyboard-input task) to request a clean
    /// shutdown at the next iteration boundary.
    break_req: Arc<AtomicBool>,
}

impl MasterNode {
    pub fn new(
        conn: Connection,
        settings: Settings,
        frame_source: Box<dyn FrameSource>,
        calibration: Arc<dyn StereoCalibration>,
        root_sensor: Box<dyn RootSensor>,
        break_req: Arc<AtomicBool>,
    ) -> Self {
        let scale_cache = ScaleCalibrationCache::load(&settings.scale_calib_cache_path);
        let mut blob_detector = BlobDetector::new(settings.detector_type);
        if let Some(cache) = scale_cache {
            blob_detector.tune(cache.standard_spacing, cache.standard_blob_size);
        }
        let session_id = session_timestamp();
        Self {
            conn,
            settings,
            frame_source,
            calibration,
            blob_detector,
            root_sensor,
            heading_engine: HeadingEngine::new(true),
            scale_cache,
            state: CoordinatorState::new(session_id),
            break_req,
        }
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    /// Poll `slaveReady` every 100ms until the slave accepts, or
    /// `calib_timeout_secs` elapses (negative = unbounded).
    async fn wait_for_slave_ready(&mut self) -> Result<(), ProtocolFault> {
        let start = Instant::now();
        loop {
            self.conn.send_request(&Request::SlaveReady).await?;
            if let Response::SlaveReady { ready: true } = self.conn.recv_response("slaveReady").await? {
                return Ok(());
            }
            if self.settings.calib_timeout_secs >= 0 && start.elapsed().as_secs() as i64 >= self.settings.calib_timeout_secs {
                return Err(ProtocolFault::MasterTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn calibrate(&mut self, calibrate_stereopsis: bool, calibrate_blobs: bool) -> Result<(), ProtocolFault> {
        self.state.phase = CoordinatorPhase::Calibrating;
        self.conn
            .send_request(&Request::CalibrateCv {
                calibrate_stereopsis_session: calibrate_stereopsis,
                calibrate_blob_scale_detector_session: calibrate_blobs,
            })
            .await?;
        self.conn.recv_response("calibrateCV").await?;
        if calibrate_blobs {
            calibrate_blob_scale(self.frame_source.as_mut(), &self.settings, &mut self.blob_detector, BLOB_SCALE_CALIB_PAIRS);
            self.scale_cache = ScaleCalibrationCache::load(&self.settings.scale_calib_cache_path);
        }
        // Stereo intrinsic/extrinsic calibration is produced by the
        // out-of-scope collaborator behind `StereoCalibration` — there
        // is nothing further for this side to compute.
        self.state.phase = CoordinatorPhase::Ready;
        Ok(())
    }

    /// Stages 1-6 of the heading pipeline: LineGrid, EdgeFinder,
    /// HeadingEngine, run against the master's own keypoints.
    fn compute_heading(&mut self, normal: &Frame, keypoints: &[Keypoint]) -> Result<vision_types::Heading, VisionFault> {
        let largest_blob = keypoints.iter().map(|k| k.size as f64).fold(0.0_f64, f64::max);
        let (segments, extremes) = line_grid::fit_grid(keypoints, None, largest_blob)?;
        let edges = edge_finder::detect_boundary_edges(normal, &segments, &extremes, EDGE_SCALE_THRESHOLD, FILTER_EDGE_OUTLIERS)?;
        let rho_step = self.settings.rho_step_distance.unwrap_or_else(|| normal.diagonal() / 4.0);
        let (heading, tip_or_root) = self.heading_engine.step(
            edges,
            rho_step,
            self.settings.rho_min_diag_perc,
            normal.width as f64,
            normal.height as f64,
            self.root_sensor.as_ref(),
        )?;
        self.state.towards_tip = self.heading_engine.towards_tip();
        self.state.following_horizontal_edges = self.heading_engine.following_horizontal_edges();
        self.state.phase = if self.heading_engine.towards_tip() { CoordinatorPhase::Running } else { CoordinatorPhase::Reversing };
        if tip_or_root {
            info!(?heading, "tip or root transition");
        }
        Ok(heading)
    }

    async fn run_iteration(&mut self) -> Result<IterationOutcome, ProtocolFault> {
        self.conn.send_request(&Request::SetNewFrame).await?;
        self.conn.recv_response("setNewFrame").await?;

        let frame_source = &mut self.frame_source;
        let conn = &mut self.conn;

        let local_fut = async {
            frame_source.arm()?;
            frame_source.capture()
        };
        let remote_fut = async {
            conn.send_request(&Request::GetPointList).await?;
            conn.recv_response("getPointList").await
        };
        let (local_result, remote_result) = tokio::join!(local_fut, remote_fut);

        let remote_points = match remote_result? {
            Response::GetPointList(content) => content,
            other => {
                return Err(ProtocolFault::UnexpectedResponse {
                    response: other.name().to_string(),
                    request: "getPointList".to_string(),
                })
            }
        };

        let (normal, structured) = match local_result {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = ?e, "local camera fault, requesting restartPtGrey");
                self.conn.send_request(&Request::RestartPtGrey).await?;
                self.conn.recv_response("restartPtGrey").await?;
                return Ok(IterationOutcome::CameraFault);
            }
        };
        if remote_points.error {
            warn!("slave camera fault, requesting restartPtGrey");
            self.conn.send_request(&Request::RestartPtGrey).await?;
            self.conn.recv_response("restartPtGrey").await?;
            return Ok(IterationOutcome::CameraFault);
        }

        let (normal_final, keypoints) =
            match run_point_pipeline(&normal, &structured, &self.settings, self.calibration.as_ref(), &self.blob_detector) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "local point pipeline degraded");
                    (normal.clone(), Vec::new())
                }
            };

        match self.compute_heading(&normal_final, &keypoints) {
            Ok(heading) if heading.is_complete() => {
                self.state.phase = CoordinatorPhase::Finished;
                return Ok(IterationOutcome::MissionComplete);
            }
            Ok(heading) => debug!(?heading, "heading synthesised"),
            Err(e) => warn!(error = %e, "heading pipeline degraded"),
        }

        let spacing = self.scale_cache.map(|c| c.standard_spacing).unwrap_or(DEFAULT_CALIBRATED_SPACING);
        match run_stereopsis(
            &keypoints,
            &remote_points.keypoints,
            &[],
            &remote_points.descriptors,
            &self.settings,
            self.calibration.as_ref(),
            spacing,
        ) {
            Ok(points) => info!(count = points.len(), "stereopsis reconstructed point cloud"),
            Err(e) => warn!(error = %e, "stereopsis degraded"),
        }

        self.state.iteration += 1;
        Ok(IterationOutcome::Continue)
    }

    async fn shutdown(&mut self) -> Result<(), ProtocolFault> {
        self.conn.send_request(&Request::Stop).await?;
        self.conn.recv_response("stop").await?;
        self.conn.send_request(&Request::Disconnect).await?;
        self.conn.recv_response("disconnect").await?;
        Ok(())
    }

    /// Drive the mission to completion: handshake, optional
    /// calibration, the per-iteration loop, then shutdown.
    pub async fn run(mut self, calibrate_stereopsis: bool, calibrate_blobs: bool) -> anyhow::Result<()> {
        self.wait_for_slave_ready().await?;
        self.conn.send_request(&Request::SetTimestamp { timestamp: session_timestamp() }).await?;
        self.conn.recv_response("setTimestamp").await?;

        if calibrate_stereopsis || calibrate_blobs {
            self.calibrate(calibrate_stereopsis, calibrate_blobs).await?;
        }
        self.state.phase = CoordinatorPhase::Running;

        loop {
            if self.break_req.load(Ordering::Relaxed) {
                info!("termination requested, shutting down");
                break;
            }
            if let Some(n) = self.settings.n_frames {
                if self.state.iteration >= n {
                    info!(n, "n_frames reached, terminating");
                    break;
                }
            }
            match self.run_iteration().await? {
                IterationOutcome::MissionComplete => {
                    info!("mission-complete sentinel reached");
                    break;
                }
                IterationOutcome::Continue | IterationOutcome::CameraFault => {}
            }
        }

        self.shutdown().await?;
        Ok(())
    }
}

/// The slave side: polls for requests and replies immediately,
/// performing its share of the point pipeline inline.
pub struct SlaveNode {
    conn: Connection,
    settings: Settings,
    frame_source: Box<dyn FrameSource>,
    calibration: Arc<dyn StereoCalibration>,
    blob_detector: BlobDetector,
    state: CoordinatorState,
    /// In-memory barter/lookup store for `tradeFrame`/`getOriginalFrame`,
    /// keyed by the filename the master names. A real deployment would
    /// back this with `calib_save_folder`'s capture archive; this crate
    /// does not implement that persistence layer (Section 6: consumed,
    /// not defined).
    frame_store: HashMap<String, Frame>,
    frame_counter: u64,
}

impl SlaveNode {
    pub fn new(
        conn: Connection,
        settings: Settings,
        frame_source: Box<dyn FrameSource>,
        calibration: Arc<dyn StereoCalibration>,
    ) -> Self {
        let scale_cache = ScaleCalibrationCache::load(&settings.scale_calib_cache_path);
        let mut blob_detector = BlobDetector::new(settings.detector_type);
        if let Some(cache) = scale_cache {
            blob_detector.tune(cache.standard_spacing, cache.standard_blob_size);
        }
        Self {
            conn,
            settings,
            frame_source,
            calibration,
            blob_detector,
            state: CoordinatorState::new(session_timestamp()),
            frame_store: HashMap::new(),
            frame_counter: 0,
        }
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    fn remember(&mut self, frame: &Frame) -> String {
        let filename = format!("frame_{:06}", self.frame_counter);
        self.frame_counter += 1;
        self.frame_store.insert(filename.clone(), frame.clone());
        filename
    }

    fn build_point_list(&mut self) -> PointListResponse {
        match self.frame_source.capture() {
            Ok((normal, structured)) => {
                self.remember(&normal);
                match run_point_pipeline(&normal, &structured, &self.settings, self.calibration.as_ref(), &self.blob_detector) {
                    Ok((normal_final, keypoints)) => PointListResponse {
                        valid: true,
                        error: false,
                        und_shape: Some((normal_final.height, normal_final.width)),
                        keypoints,
                        descriptors: Vec::new(),
                    },
                    Err(e) => {
                        warn!(error = %e, "slave point pipeline degraded");
                        PointListResponse { valid: false, error: false, und_shape: None, keypoints: vec![], descriptors: vec![] }
                    }
                }
            }
            Err(e) => {
                warn!(error = ?e, "slave capture failed");
                PointListResponse { valid: false, error: true, und_shape: None, keypoints: vec![], descriptors: vec![] }
            }
        }
    }

    fn build_frame_content(&mut self) -> FrameContentResponse {
        match self.frame_source.capture() {
            Ok((normal, structured)) => {
                self.remember(&normal);
                match run_point_pipeline(&normal, &structured, &self.settings, self.calibration.as_ref(), &self.blob_detector) {
                    Ok((normal_final, keypoints)) => {
                        let delta_frame =
                            delta_extractor::delta(&normal_final, &structured, DEFAULT_DELTA_THRESHOLD).unwrap_or_else(|_| normal_final.clone());
                        FrameContentResponse {
                            valid: true,
                            error: false,
                            frame_content: Some(FrameContent {
                                original_frame: normal,
                                original_sl_frame: structured,
                                frame_un: normal_final,
                                delta_frame,
                                keypoints,
                                descriptors: Vec::new(),
                            }),
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "slave frame pipeline degraded");
                        FrameContentResponse { valid: false, error: false, frame_content: None }
                    }
                }
            }
            Err(e) => {
                warn!(error = ?e, "slave capture failed");
                FrameContentResponse { valid: false, error: true, frame_content: None }
            }
        }
    }

    fn trade_frame(&mut self, filename: String, frame: Frame) -> TradeFrameResponse {
        let counterpart = self.frame_store.get(&filename).cloned();
        self.frame_store.insert(filename, frame);
        match counterpart {
            Some(frame) => TradeFrameResponse { valid: true, error: false, frame_content: Some(frame) },
            None => TradeFrameResponse { valid: false, error: false, frame_content: None },
        }
    }

    fn lookup_original_frame(&self, filename: &str, sl_filename: Option<&str>) -> OriginalFrameResponse {
        let primary = self.frame_store.get(filename).cloned();
        let secondary = sl_filename.and_then(|s| self.frame_store.get(s)).cloned();
        match (primary, secondary) {
            (Some(a), Some(b)) => {
                OriginalFrameResponse { valid: true, error: false, frame_content: Some(OriginalFrameContent::Pair(a, b)) }
            }
            (Some(a), None) => OriginalFrameResponse { valid: true, error: false, frame_content: Some(OriginalFrameContent::Single(a)) },
            _ => OriginalFrameResponse { valid: false, error: true, frame_content: None },
        }
    }

    /// Wait for `setTimestamp`, then poll-and-dispatch until
    /// `disconnect` or a master-inactivity timeout.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let request = match self.conn.recv_request().await {
                Ok(r) => r,
                Err(ProtocolFault::Timeout) => {
                    warn!("master timed out");
                    return Err(ProtocolFault::MasterTimeout.into());
                }
                Err(e) => return Err(e.into()),
            };

            match request {
                Request::SetTimestamp { timestamp } => {
                    info!(timestamp, "session timestamp received");
                    self.conn.send_response(&Response::SetTimestamp).await?;
                }
                Request::CalibrateCv { calibrate_stereopsis_session: _, calibrate_blob_scale_detector_session } => {
                    self.state.phase = CoordinatorPhase::Calibrating;
                    if calibrate_blob_scale_detector_session {
                        calibrate_blob_scale(self.frame_source.as_mut(), &self.settings, &mut self.blob_detector, BLOB_SCALE_CALIB_PAIRS);
                    }
                    self.state.phase = CoordinatorPhase::Ready;
                    self.conn.send_response(&Response::CalibrateCv).await?;
                }
                Request::SlaveReady => {
                    self.conn.send_response(&Response::SlaveReady { ready: true }).await?;
                }
                Request::SendFlagToSlave { flag } => {
                    debug!(flag, "flag received from master");
                    self.conn.send_response(&Response::SendFlagToSlave).await?;
                }
                Request::SetNewFrame => {
                    if let Err(e) = self.frame_source.arm() {
                        warn!(error = ?e, "failed to arm camera for next frame");
                    }
                    self.conn.send_response(&Response::SetNewFrame).await?;
                }
                Request::GetFrame => {
                    let response = self.build_frame_content();
                    self.conn.send_response(&Response::GetFrame(response)).await?;
                }
                Request::GetPointList => {
                    let response = self.build_point_list();
                    self.conn.send_response(&Response::GetPointList(response)).await?;
                }
                Request::GetOriginalFrame { filename, sl_filename } => {
                    let response = self.lookup_original_frame(&filename, sl_filename.as_deref());
                    self.conn.send_response(&Response::GetOriginalFrame(response)).await?;
                }
                Request::TradeFrame { filename, frame } => {
                    let response = self.trade_frame(filename, frame);
                    self.conn.send_response(&Response::TradeFrame(response)).await?;
                }
                Request::RestartPtGrey => {
                    warn!("camera restart requested by master");
                    self.conn.send_response(&Response::RestartPtGrey).await?;
                }
                Request::Stop => {
                    info!("stop received");
                    self.conn.send_response(&Response::Stop).await?;
                }
                Request::Disconnect => {
                    info!("disconnect received, exiting");
                    self.conn.send_response(&Response::Disconnect).await?;
                    return Ok(());
                }
                Request::Restart => {
                    info!("restart requested");
                    self.conn.send_response(&Response::Restart).await?;
                }
                other => {
                    warn!(request = other.name(), "unexpected top-level request on slave");
                    self.conn
                        .send_response(&Response::Error { message: format!("unexpected request: {}", other.name()) })
                        .await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3x4, Matrix4};
    use vision_types::CameraFault;

    struct IdentityCalibration;

    impl StereoCalibration for IdentityCalibration {
        fn undistort(&self, frame: &Frame) -> Frame {
            frame.clone()
        }
        fn projection_matrices(&self) -> (Matrix3x4<f64>, Matrix3x4<f64>) {
            let p = Matrix3x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
            (p, p)
        }
        fn disparity_to_depth(&self) -> Matrix4<f64> {
            Matrix4::identity()
        }
        fn focal_length_px(&self) -> f64 {
            500.0
        }
        fn baseline_px(&self) -> f64 {
            100.0
        }
        fn baseline_mm(&self) -> f64 {
            100.0
        }
    }

    struct TwoShotFrameSource {
        remaining: u32,
    }

    impl FrameSource for TwoShotFrameSource {
        fn arm(&mut self) -> Result<(), CameraFault> {
            if self.remaining == 0 {
                return Err(CameraFault::NotConnected);
            }
            Ok(())
        }
        fn capture(&mut self) -> Result<(Frame, Frame), CameraFault> {
            if self.remaining == 0 {
                return Err(CameraFault::TimeoutCapturingFrame);
            }
            self.remaining -= 1;
            let normal = Frame::new_color(4, 4, vec![10u8; 16 * 3]);
            // pixel 5 is the laser dot: brightened (for delta) and
            // R==G/low-B (for green_mask), background stays achromatic.
            let mut sl_data = vec![10u8; 16 * 3];
            sl_data[5 * 3] = 250;
            sl_data[5 * 3 + 1] = 250;
            sl_data[5 * 3 + 2] = 20;
            let structured = Frame::new_color(4, 4, sl_data);
            Ok((normal, structured))
        }
    }

    #[test]
    fn run_point_pipeline_detects_the_brightened_pixel() {
        let settings = Settings { default_downsampling_divisor: 2, desired_frame_shape: (4, 4), crop_frames: false, ..Settings::default() };
        let detector = BlobDetector::new(crate::config::DetectorBackend::SimpleBlob);
        let mut source = TwoShotFrameSource { remaining: 1 };
        let (normal, structured) = source.capture().unwrap();
        let result = run_point_pipeline(&normal, &structured, &settings, &IdentityCalibration, &detector);
        assert!(result.is_ok());
    }

    #[test]
    fn calibrate_blob_scale_tunes_detector_from_synthetic_pairs() {
        let settings = Settings::default();
        let mut detector = BlobDetector::new(crate::config::DetectorBackend::SimpleBlob);
        let mut source = TwoShotFrameSource { remaining: 3 };
        assert_eq!(detector.max_area, f64::INFINITY);
        calibrate_blob_scale(&mut source, &settings, &mut detector, 3);
        // each synthetic pair yields exactly one keypoint (the single
        // brightened, green-masked pixel), so standard_blob_size is the
        // one-pixel equivalent diameter and standard_spacing is 0 (no
        // neighbour to measure against).
        let expected_size = 2.0 * (1.0_f64 / std::f64::consts::PI).sqrt();
        assert_eq!(detector.min_dist_between_blobs, 0.0);
        assert!((detector.min_area - 0.1 * expected_size).abs() < 1e-9);
        assert!((detector.max_area - 3.5 * expected_size).abs() < 1e-9);
    }
}
