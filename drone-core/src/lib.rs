//! # drone-core
//!
//! The onboard computer-vision stack of the two-camera blade-inspection
//! drone: structured-light point detection, edge/heading state machine,
//! stereopsis, and the master/slave coordination protocol that ties a
//! pair of nodes together.
//!
//! Module map (component numbers match `SPEC_FULL.md` section 4):
//! - [`frame_ops`] (C1), [`delta_extractor`] (C2), [`blob_detector`] (C3),
//!   [`scale_calibrator`] (C4) — the structured-light point pipeline.
//! - [`line_grid`] (C5), [`edge_finder`] (C6), [`heading_engine`] (C7) —
//!   the edge/heading state machine.
//! - [`stereopsis`] (C8) — feature matching and 3D reconstruction.
//! - [`protocol`] (C9) — the TCP wire protocol.
//! - [`coordinator`] (C10) — the master/slave top-level loops.
//! - [`camera`] — trait seams for the out-of-scope camera/calibration
//!   collaborators.
//! - [`config`] — the typed settings surface.

pub mod blob_detector;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod coordinator;
pub mod delta_extractor;
pub mod edge_finder;
pub mod frame_ops;
pub mod heading_engine;
pub mod line_grid;
pub mod protocol;
pub mod scale_calibrator;
pub mod stereopsis;

pub use vision_types::{
    BoundedSegment, CalibrationFault, CameraFault, CoordinatorPhase, CoordinatorState,
    Descriptor, EdgeHeading, Frame, Heading, HoughLine, Keypoint, Match, Point3D, ProtocolFault,
    VisionFault,
};
