//! Error taxonomy. The original Python source identified error kinds by
//! string keys (e.g. `'no_blobs_error_msg'`); each kind is a distinct
//! tagged variant here, with the original key preserved only as the
//! `Display` text so a log line reproduces the original diagnostic.

use thiserror::Error;

/// Camera faults — surfaced to Coordinator, which issues `restartPtGrey`
/// and skips the iteration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraFault {
    #[error("camera_not_connected")]
    NotConnected,
    #[error("timeout_capturing_frame")]
    TimeoutCapturingFrame,
    #[error("failed_capturing_frame")]
    FailedCapturingFrame,
}

/// Vision-pipeline faults — logged as warnings; the iteration continues
/// with whichever stages did succeed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VisionFault {
    #[error("no_blobs_error_msg")]
    NoBlobs,
    #[error("feature_descriptor_not_available_error_msg")]
    FeatureDescriptorNotAvailable,
    #[error("detector backend {0:?} has no in-crate implementation")]
    DetectorUnavailable(String),
    #[error("frame shape mismatch: expected {expected} bytes, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("find_line_limits_no_hor_found")]
    FindLineLimitsNoHorFound,
    #[error("find_line_limits_no_vert_found")]
    FindLineLimitsNoVertFound,
    #[error("detect_boundary_edge_not_found_all_edge_lines")]
    DetectBoundaryEdgeNotFoundAllEdgeLines,
    #[error("error_msg_no_heading_angle_detected")]
    NoHeadingAngleDetected,
    #[error("error_msg_no_backup_heading_available")]
    NoBackupHeadingAvailable,
    #[error("no_3D_point_matches")]
    No3dPointMatches,
    #[error("triangulation_error_msg")]
    TriangulationError,
    #[error("3D_point_filtration_failed")]
    PointFiltrationFailed,
}

/// Protocol faults — propagate out of the master/slave loop; the
/// connection is disconnected and the process exits nonzero.
#[derive(Debug, Error)]
pub enum ProtocolFault {
    #[error("socket io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed wire frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected ack, got different response")]
    BadAck,
    #[error("expected a response_size control frame")]
    MissingLengthPrefix,
    #[error("operation timed out")]
    Timeout,
    #[error("response does not match request: response={response}, request={request}")]
    UnexpectedResponse { response: String, request: String },
    #[error("peer error response: {0}")]
    PeerError(String),
    #[error("connection disconnected")]
    Disconnected,
    #[error("master timed out waiting for a request")]
    MasterTimeout,
}

/// Calibration faults — fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalibrationFault {
    #[error("no usable chessboard/calibration images")]
    NoUsableImages,
    #[error("calibration solver did not converge")]
    SolverNonConvergence,
}
