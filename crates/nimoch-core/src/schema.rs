//! JSON payload shapes shared by `serve`, `detect`, `index`, and `check`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoPayload {
    pub stream: i32,
    pub timebase: Rational,
    pub fps: Rational,
    pub start_time: i64,
    pub first_pts: i64,
    pub width: i32,
    pub height: i32,
    pub aspect_ratio: Rational,
    pub duration: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneDetectPayload {
    pub scores: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectVideoInfo {
    pub width: i32,
    pub height: i32,
    pub format: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectAudioInfo {
    pub channels: i32,
    pub layout: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectStream {
    pub index: usize,
    pub pts: Option<i64>,
    pub timebase: Rational,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<Rational>,
    pub pid: i32,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<DetectVideoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<DetectAudioInfo>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectResult {
    pub video: Vec<DetectStream>,
    pub audio: Vec<DetectStream>,
    pub subtitle: Vec<DetectStream>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexFrameEntry {
    pub pts: i64,
    pub pos: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub num_frames: usize,
    pub fps: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResult {
    pub frames: Vec<IndexFrameEntry>,
    pub stream: i32,
    pub timebase: Rational,
    pub info: IndexInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentInfo {
    pub start: u64,
    pub end: u64,
    pub layout: String,
    pub channels: i32,
    pub format: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: i32,
    pub frames: i32,
}
