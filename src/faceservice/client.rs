//! Face service HTTP client (§4.F).
//!
//! Grounded on the predecessor's `llm/client.rs`: a thin `ureq`-backed
//! client building one request struct per call, mapping transport errors
//! through `anyhow!`. Multipart upload (subject face management) has no
//! predecessor counterpart — built by hand rather than adding a multipart
//! crate, since the wire format is simple enough for one helper.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::config::FaceServiceConfig;
use crate::error::EngineError;
use crate::faceservice::types::*;

const RECOGNIZE_BATCH_DELAY: Duration = Duration::from_millis(500);
const TRAINING_UPLOAD_DELAY: Duration = Duration::from_millis(1500);

pub struct FaceServiceClient {
    base_url: String,
    detect_api_key: String,
    recognize_api_key: String,
    timeout: Duration,
    max_concurrency: usize,
}

/// One detected face, normalized from the wire shape into the types the
/// rest of the engine deals in.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: crate::db::objects::BoundingBox,
    pub probability: f64,
    pub landmarks_json: Option<String>,
    pub gender: Option<String>,
    pub gender_confidence: Option<f64>,
    pub age_low: Option<i64>,
    pub age_high: Option<i64>,
    pub age_confidence: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SubjectCandidate {
    pub bbox: crate::db::objects::BoundingBox,
    pub subjects: Vec<(String, f64)>,
}

impl FaceServiceClient {
    pub fn new(config: &FaceServiceConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            detect_api_key: config.detect_api_key.clone(),
            recognize_api_key: config.recognize_api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_concurrency: config.max_concurrency,
        }
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.timeout).build()
    }

    /// (i) Detect: image → faces with bbox, probability, and any requested
    /// plugin outputs.
    pub fn detect(&self, image_path: &Path, limit: u32, det_prob_threshold: f64, plugins: &[Plugin]) -> Result<Vec<DetectedFace>> {
        let bytes = std::fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
        let filename = image_path.file_name().and_then(|n| n.to_str()).unwrap_or("image.jpg");
        let body = multipart_body("file", filename, &bytes);

        let url = format!(
            "{}/api/v1/detection/detect?limit={}&det_prob_threshold={}&face_plugins={}",
            self.base_url,
            limit,
            det_prob_threshold,
            plugins_param(plugins)
        );

        let response = self
            .agent()
            .post(&url)
            .set("x-api-key", &self.detect_api_key)
            .set("Content-Type", &body.content_type)
            .send_bytes(&body.bytes)
            .map_err(EngineError::from)?;

        let parsed: DetectResponse = response.into_json().context("parsing detect response")?;
        Ok(parsed.result.into_iter().map(normalize_detected).collect())
    }

    /// (ii) Recognize: image → per detected face, ranked subject candidates.
    pub fn recognize(&self, image_path: &Path, limit: u32, det_prob_threshold: f64) -> Result<Vec<SubjectCandidate>> {
        let bytes = std::fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
        let filename = image_path.file_name().and_then(|n| n.to_str()).unwrap_or("image.jpg");
        let body = multipart_body("file", filename, &bytes);

        let url = format!(
            "{}/api/v1/recognition/recognize?limit={}&det_prob_threshold={}",
            self.base_url, limit, det_prob_threshold
        );

        let response = self
            .agent()
            .post(&url)
            .set("x-api-key", &self.recognize_api_key)
            .set("Content-Type", &body.content_type)
            .send_bytes(&body.bytes)
            .map_err(EngineError::from)?;

        let parsed: RecognizeResponse = response.into_json().context("parsing recognize response")?;
        Ok(parsed
            .result
            .into_iter()
            .map(|face| SubjectCandidate {
                bbox: face.box_.to_bbox(),
                subjects: face.subjects.into_iter().map(|s| (s.subject, s.similarity)).collect(),
            })
            .collect())
    }

    /// (iii) Verify: source vs target image → single similarity.
    pub fn verify(&self, source_path: &Path, target_path: &Path) -> Result<f64> {
        let source_bytes = std::fs::read(source_path).with_context(|| format!("reading {}", source_path.display()))?;
        let target_bytes = std::fs::read(target_path).with_context(|| format!("reading {}", target_path.display()))?;
        let source_filename = source_path.file_name().and_then(|n| n.to_str()).unwrap_or("source.jpg");
        let target_filename = target_path.file_name().and_then(|n| n.to_str()).unwrap_or("target.jpg");
        let body = multipart_body_fields(&[
            ("source_image", source_filename, &source_bytes),
            ("target_image", target_filename, &target_bytes),
        ]);

        let url = format!("{}/api/v1/verification/verify", self.base_url);

        let response = self
            .agent()
            .post(&url)
            .set("x-api-key", &self.recognize_api_key)
            .set("Content-Type", &body.content_type)
            .send_bytes(&body.bytes)
            .map_err(EngineError::from)?;

        let parsed: VerifyResponse = response.into_json().context("parsing verify response")?;
        parsed.result.first().map(|m| m.similarity).context("verify returned no comparison result")
    }

    /// (iv) Subject/face management.
    pub fn create_subject(&self, subject: &str) -> Result<()> {
        let url = format!("{}/api/v1/recognition/subjects", self.base_url);
        self.agent()
            .post(&url)
            .set("x-api-key", &self.recognize_api_key)
            .send_json(CreateSubjectRequest { subject: subject.to_string() })
            .map_err(EngineError::from)?;
        Ok(())
    }

    pub fn add_face_to_subject(&self, subject: &str, face_image_path: &Path) -> Result<AddFaceResponse> {
        let bytes = std::fs::read(face_image_path).with_context(|| format!("reading {}", face_image_path.display()))?;
        let filename = face_image_path.file_name().and_then(|n| n.to_str()).unwrap_or("face.jpg");
        let body = multipart_body("file", filename, &bytes);

        let url = format!("{}/api/v1/recognition/faces?subject={}", self.base_url, urlencode(subject));
        let response = self
            .agent()
            .post(&url)
            .set("x-api-key", &self.recognize_api_key)
            .set("Content-Type", &body.content_type)
            .send_bytes(&body.bytes)
            .map_err(EngineError::from)?;

        response.into_json().context("parsing add-face response")
    }

    pub fn list_subjects(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/recognition/subjects", self.base_url);
        let response = self.agent().get(&url).set("x-api-key", &self.recognize_api_key).call().map_err(EngineError::from)?;
        let parsed: SubjectsListResponse = response.into_json().context("parsing subjects list")?;
        Ok(parsed.subjects)
    }

    pub fn list_faces(&self) -> Result<Vec<FaceEntryWire>> {
        let url = format!("{}/api/v1/recognition/faces", self.base_url);
        let response = self.agent().get(&url).set("x-api-key", &self.recognize_api_key).call().map_err(EngineError::from)?;
        let parsed: FacesListResponse = response.into_json().context("parsing faces list")?;
        Ok(parsed.faces)
    }

    pub fn delete_subject(&self, subject: &str) -> Result<()> {
        let url = format!("{}/api/v1/recognition/subjects/{}", self.base_url, urlencode(subject));
        self.agent().delete(&url).set("x-api-key", &self.recognize_api_key).call().map_err(EngineError::from)?;
        Ok(())
    }

    pub fn delete_face(&self, face_image_id: &str) -> Result<()> {
        let url = format!("{}/api/v1/recognition/faces/{}", self.base_url, urlencode(face_image_id));
        self.agent().delete(&url).set("x-api-key", &self.recognize_api_key).call().map_err(EngineError::from)?;
        Ok(())
    }

    /// Batch recognize: chunk by `maxConcurrency`, run each chunk
    /// concurrently, sleep between chunks (§4.F 500ms).
    pub fn batch_recognize(&self, image_paths: &[std::path::PathBuf], limit: u32, det_prob_threshold: f64) -> Vec<Result<Vec<SubjectCandidate>>> {
        self.run_batched(image_paths, RECOGNIZE_BATCH_DELAY, |path| self.recognize(path, limit, det_prob_threshold))
    }

    /// Batch face upload (training): same chunking, longer inter-chunk
    /// delay (§4.F 1-2s for training upload).
    pub fn batch_add_faces(&self, subject: &str, face_paths: &[std::path::PathBuf]) -> Vec<Result<AddFaceResponse>> {
        self.run_batched(face_paths, TRAINING_UPLOAD_DELAY, |path| self.add_face_to_subject(subject, path))
    }

    fn run_batched<T: Send, F: Fn(&std::path::PathBuf) -> Result<T> + Sync>(&self, items: &[std::path::PathBuf], delay: Duration, op: F) -> Vec<Result<T>> {
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.max_concurrency.max(1)) {
            let chunk_results: Vec<Result<T>> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk.iter().map(|path| scope.spawn(|| op(path))).collect();
                handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Err(anyhow::anyhow!("face service worker panicked")))).collect()
            });
            results.extend(chunk_results);
            if results.len() < items.len() {
                std::thread::sleep(delay);
            }
        }
        results
    }
}

fn normalize_detected(wire: DetectedFaceWire) -> DetectedFace {
    DetectedFace {
        bbox: wire.box_.to_bbox(),
        probability: wire.probability,
        landmarks_json: wire.landmarks.and_then(|l| serde_json::to_string(&l).ok()),
        gender: wire.gender.as_ref().map(|g| g.value.clone()),
        gender_confidence: wire.gender.as_ref().map(|g| g.probability),
        age_low: wire.age.as_ref().map(|a| a.low),
        age_high: wire.age.as_ref().map(|a| a.high),
        age_confidence: wire.age.as_ref().map(|a| a.probability),
    }
}

struct MultipartBody {
    content_type: String,
    bytes: Vec<u8>,
}

fn multipart_body(field_name: &str, filename: &str, data: &[u8]) -> MultipartBody {
    multipart_body_fields(&[(field_name, filename, data)])
}

/// Builds a multipart/form-data body with one part per `(field_name,
/// filename, data)` entry — the face service's verify endpoint needs two
/// image parts in a single request, unlike every other upload here.
fn multipart_body_fields(fields: &[(&str, &str, &[u8])]) -> MultipartBody {
    let boundary = format!("----photon-engine-{}", uuid::Uuid::new_v4().simple());
    let total: usize = fields.iter().map(|(_, _, data)| data.len()).sum();
    let mut bytes = Vec::with_capacity(total + 256 * fields.len());
    for (field_name, filename, data) in fields {
        bytes.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        bytes.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\n").as_bytes(),
        );
        bytes.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        bytes.extend_from_slice(data);
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    MultipartBody { content_type: format!("multipart/form-data; boundary={boundary}"), bytes }
}

fn urlencode(value: &str) -> String {
    value.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c.to_string() } else { format!("%{:02X}", c as u32) }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_includes_boundary_and_payload() {
        let body = multipart_body("file", "face.jpg", b"fake-bytes");
        assert!(body.content_type.starts_with("multipart/form-data; boundary="));
        assert!(String::from_utf8_lossy(&body.bytes).contains("name=\"file\""));
        assert!(String::from_utf8_lossy(&body.bytes).contains("face.jpg"));
    }

    #[test]
    fn multipart_body_fields_includes_every_part() {
        let body = multipart_body_fields(&[("source_image", "a.jpg", b"aaa"), ("target_image", "b.jpg", b"bbb")]);
        let text = String::from_utf8_lossy(&body.bytes);
        assert!(text.contains("name=\"source_image\""));
        assert!(text.contains("name=\"target_image\""));
        assert!(text.contains("a.jpg"));
        assert!(text.contains("b.jpg"));
        assert_eq!(text.matches("Content-Disposition").count(), 2);
    }

    #[test]
    fn urlencode_escapes_non_alphanumeric_characters() {
        assert_eq!(urlencode("jane doe"), "jane%20doe");
        assert_eq!(urlencode("a-b_c"), "a-b_c");
    }
}
