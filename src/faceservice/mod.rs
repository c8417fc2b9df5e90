//! External face detection/recognition service (§4.F).

pub mod client;
pub mod types;

pub use client::{DetectedFace, FaceServiceClient, SubjectCandidate};
pub use types::Plugin;

use anyhow::Result;
use std::path::Path;

use crate::pipeline::{FaceCandidate, FaceDetector};

const DEFAULT_LIMIT: u32 = 0;
const DEFAULT_DET_PROB_THRESHOLD: f64 = 0.8;

impl FaceDetector for FaceServiceClient {
    fn detect(&self, path: &Path) -> Result<Vec<FaceCandidate>> {
        let plugins = [Plugin::Landmarks, Plugin::Gender, Plugin::Age];
        let faces = self.detect(path, DEFAULT_LIMIT, DEFAULT_DET_PROB_THRESHOLD, &plugins)?;
        Ok(faces.into_iter().map(to_candidate).collect())
    }
}

fn to_candidate(face: DetectedFace) -> FaceCandidate {
    FaceCandidate {
        bbox: face.bbox,
        detection_confidence: face.probability,
        gender: face.gender,
        gender_confidence: face.gender_confidence,
        age_low: face.age_low,
        age_high: face.age_high,
        age_confidence: face.age_confidence,
        landmarks_json: face.landmarks_json,
    }
}
