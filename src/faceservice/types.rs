//! Wire types for the external face service (§4.F).
//!
//! The service is CompReface-shaped (hence `compreface_synced`/
//! `AutoCompreface` naming already established in [`crate::db::faces`]):
//! `x-api-key` auth, `det_prob_threshold`/`limit` query params, a
//! `face_plugins` plugin list, and subject-keyed face management.

use serde::{Deserialize, Serialize};

use crate::db::objects::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plugin {
    Landmarks,
    Gender,
    Age,
    Pose,
}

impl Plugin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plugin::Landmarks => "landmarks",
            Plugin::Gender => "gender",
            Plugin::Age => "age",
            Plugin::Pose => "pose",
        }
    }
}

pub fn plugins_param(plugins: &[Plugin]) -> String {
    plugins.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    pub result: Vec<DetectedFaceWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectedFaceWire {
    pub box_: BoxWire,
    pub probability: f64,
    #[serde(default)]
    pub landmarks: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub gender: Option<PredictionWire>,
    #[serde(default)]
    pub age: Option<AgeWire>,
    #[serde(default)]
    pub pose: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxWire {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoxWire {
    pub fn to_bbox(&self) -> BoundingBox {
        BoundingBox { x: self.x_min, y: self.y_min, width: self.x_max - self.x_min, height: self.y_max - self.y_min }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionWire {
    pub value: String,
    pub probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgeWire {
    pub low: i64,
    pub high: i64,
    pub probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizeResponse {
    pub result: Vec<RecognizedFaceWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizedFaceWire {
    pub box_: BoxWire,
    #[serde(default)]
    pub subjects: Vec<SubjectMatchWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectMatchWire {
    pub subject: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub result: Vec<VerifyMatchWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyMatchWire {
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsListResponse {
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSubjectRequest {
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddFaceResponse {
    pub image_id: String,
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacesListResponse {
    pub faces: Vec<FaceEntryWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceEntryWire {
    pub image_id: String,
    pub subject: String,
}
