//! Wire protocol envelope — `{"request": <str>, "content": <value>}` —
//! and the full request/response catalogue from the master/slave
//! coordination channel (C9). Adjacently tagged so the wire shape is
//! exactly `{"request": "...", "content": {...}}` regardless of which
//! variant is in play, matching the original's untyped dict framing
//! while giving each request kind a real Rust shape.

use serde::{Deserialize, Serialize};

use crate::{Descriptor, Frame, Keypoint};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", content = "content")]
pub enum Request {
    #[serde(rename = "setTimestamp")]
    SetTimestamp { timestamp: String },
    #[serde(rename = "calibrateCV")]
    CalibrateCv {
        calibrate_stereopsis_session: bool,
        calibrate_blob_scale_detector_session: bool,
    },
    #[serde(rename = "slaveReady")]
    SlaveReady,
    #[serde(rename = "sendFlagToSlave")]
    SendFlagToSlave { flag: bool },
    #[serde(rename = "setNewFrame")]
    SetNewFrame,
    #[serde(rename = "getFrame")]
    GetFrame,
    #[serde(rename = "getPointList")]
    GetPointList,
    #[serde(rename = "getOriginalFrame")]
    GetOriginalFrame {
        filename: String,
        sl_filename: Option<String>,
    },
    #[serde(rename = "tradeFrame")]
    TradeFrame { filename: String, frame: Frame },
    #[serde(rename = "restartPtGrey")]
    RestartPtGrey,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "restart")]
    Restart,
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "response_size")]
    ResponseSize { length: usize },
    #[serde(rename = "error")]
    Error { message: String },
}

impl Request {
    /// The request-name key, used to validate `RecvResponse`'s
    /// "response matches request" check.
    pub fn name(&self) -> &'static str {
        match self {
            Request::SetTimestamp { .. } => "setTimestamp",
            Request::CalibrateCv { .. } => "calibrateCV",
            Request::SlaveReady => "slaveReady",
            Request::SendFlagToSlave { .. } => "sendFlagToSlave",
            Request::SetNewFrame => "setNewFrame",
            Request::GetFrame => "getFrame",
            Request::GetPointList => "getPointList",
            Request::GetOriginalFrame { .. } => "getOriginalFrame",
            Request::TradeFrame { .. } => "tradeFrame",
            Request::RestartPtGrey => "restartPtGrey",
            Request::Stop => "stop",
            Request::Disconnect => "disconnect",
            Request::Restart => "restart",
            Request::Ack => "ack",
            Request::ResponseSize { .. } => "response_size",
            Request::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", content = "content")]
pub enum Response {
    #[serde(rename = "setTimestamp")]
    SetTimestamp,
    #[serde(rename = "calibrateCV")]
    CalibrateCv,
    #[serde(rename = "slaveReady")]
    SlaveReady { ready: bool },
    #[serde(rename = "sendFlagToSlave")]
    SendFlagToSlave,
    #[serde(rename = "setNewFrame")]
    SetNewFrame,
    #[serde(rename = "getFrame")]
    GetFrame(FrameContentResponse),
    #[serde(rename = "getPointList")]
    GetPointList(PointListResponse),
    #[serde(rename = "getOriginalFrame")]
    GetOriginalFrame(OriginalFrameResponse),
    #[serde(rename = "tradeFrame")]
    TradeFrame(TradeFrameResponse),
    #[serde(rename = "restartPtGrey")]
    RestartPtGrey,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "restart")]
    Restart,
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "response_size")]
    ResponseSize { length: usize },
    #[serde(rename = "error")]
    Error { message: String },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::SetTimestamp => "setTimestamp",
            Response::CalibrateCv => "calibrateCV",
            Response::SlaveReady { .. } => "slaveReady",
            Response::SendFlagToSlave => "sendFlagToSlave",
            Response::SetNewFrame => "setNewFrame",
            Response::GetFrame(_) => "getFrame",
            Response::GetPointList(_) => "getPointList",
            Response::GetOriginalFrame(_) => "getOriginalFrame",
            Response::TradeFrame(_) => "tradeFrame",
            Response::RestartPtGrey => "restartPtGrey",
            Response::Stop => "stop",
            Response::Disconnect => "disconnect",
            Response::Restart => "restart",
            Response::Ack => "ack",
            Response::ResponseSize { .. } => "response_size",
            Response::Error { .. } => "error",
        }
    }
}

/// Reply content for `getFrame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameContentResponse {
    pub valid: bool,
    pub error: bool,
    pub frame_content: Option<FrameContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameContent {
    pub original_frame: Frame,
    pub original_sl_frame: Frame,
    pub frame_un: Frame,
    pub delta_frame: Frame,
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

/// Reply content for `getPointList`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointListResponse {
    pub valid: bool,
    pub error: bool,
    pub und_shape: Option<(u32, u32)>,
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

/// Reply content for `getOriginalFrame`. Implemented for wire parity;
/// Coordinator never issues the request (see DESIGN.md Open Question 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalFrameResponse {
    pub valid: bool,
    pub error: bool,
    pub frame_content: Option<OriginalFrameContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OriginalFrameContent {
    Single(Frame),
    Pair(Frame, Frame),
}

/// Reply content for `tradeFrame`: the slave's stored counterpart frame
/// for the filename the master offered to barter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFrameResponse {
    pub valid: bool,
    pub error: bool,
    pub frame_content: Option<Frame>,
}
