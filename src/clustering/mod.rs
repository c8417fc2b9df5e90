//! Face Clustering + Suggestions (§4.J): two-phase generator over
//! unassigned faces.

use anyhow::Result;
use std::collections::HashSet;
use std::thread::sleep;
use std::time::Duration;
use tracing::info;

use crate::db::clusters::FaceSimilarity;
use crate::db::faces::{AssignedBy, Face};
use crate::db::Database;
use crate::faceservice::FaceServiceClient;

const MIN_DETECTION_CONFIDENCE: f64 = 0.8;
const BBOX_MATCH_TOLERANCE_PX: f64 = 20.0;
const MAX_SUGGESTIONS_PER_PERSON: usize = 50;
const VERIFY_CANDIDATE_LIMIT: usize = 20;
const CLUSTER_SIMILARITY_THRESHOLD: f64 = 0.75;
const MIN_CLUSTER_SIZE: usize = 3;
const MAX_CLUSTER_SIZE: usize = 50;
const QUICK_SAMPLE_DATASET_THRESHOLD: usize = 1000;
const QUICK_SAMPLE_SIZE: usize = 200;
const QUICK_SAMPLE_MIN_CONFIDENCE: f64 = 0.9;
const COMPARISON_DELAY: Duration = Duration::from_millis(100);
const BATCH_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct PersonSuggestion {
    pub person_id: i64,
    pub face_id: i64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ClusterCandidate {
    pub representative_face_id: i64,
    pub member_face_ids: Vec<i64>,
    pub average_similarity: f64,
}

/// Phase 1: batched recognition matched to candidate faces by bounding-box
/// proximity; faces whose top match clears `confidence_auto_assign` are
/// assigned directly, the rest collected as ranked suggestions.
pub fn generate_recognition_suggestions(db: &Database, client: &FaceServiceClient, auto_assign_threshold: f64) -> Result<(Vec<PersonSuggestion>, Vec<i64>)> {
    let candidates = db.get_unassigned_faces(MIN_DETECTION_CONFIDENCE, i64::MAX)?;
    let mut suggestions: Vec<PersonSuggestion> = Vec::new();
    let mut matched_face_ids: HashSet<i64> = HashSet::new();

    let paths: Vec<std::path::PathBuf> = candidates
        .iter()
        .filter_map(|f| f.face_image_path.as_ref())
        .map(std::path::PathBuf::from)
        .collect();
    let recognitions = client.batch_recognize(&paths, 1, MIN_DETECTION_CONFIDENCE);

    for result in recognitions.into_iter().flatten().flatten() {
        let Some(face) = candidates.iter().find(|f| bbox_matches(f, &result.bbox)) else { continue };
        let Some((subject, similarity)) = result.subjects.first() else { continue };
        let Some(person) = db.find_person_by_subject_id(subject)? else { continue };

        if *similarity >= auto_assign_threshold {
            db.assign_face_to_person(face.id, person.id, AssignedBy::AutoRecognition, Some("recognition"))?;
            matched_face_ids.insert(face.id);
        } else {
            suggestions.push(PersonSuggestion { person_id: person.id, face_id: face.id, confidence: *similarity });
            matched_face_ids.insert(face.id);
        }
    }

    let mut per_person: std::collections::HashMap<i64, Vec<PersonSuggestion>> = std::collections::HashMap::new();
    for s in suggestions {
        per_person.entry(s.person_id).or_default().push(s);
    }
    let mut consolidated = Vec::new();
    for (_, mut group) in per_person {
        group.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        group.truncate(MAX_SUGGESTIONS_PER_PERSON);
        consolidated.extend(group);
    }
    consolidated.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let residual: Vec<i64> = candidates.iter().map(|f| f.id).filter(|id| !matched_face_ids.contains(id)).collect();
    Ok((consolidated, residual))
}

fn bbox_matches(face: &Face, bbox: &crate::db::objects::BoundingBox) -> bool {
    (face.bbox.x - bbox.x).abs() <= BBOX_MATCH_TOLERANCE_PX
        && (face.bbox.y - bbox.y).abs() <= BBOX_MATCH_TOLERANCE_PX
        && ((face.bbox.x + face.bbox.width) - (bbox.x + bbox.width)).abs() <= BBOX_MATCH_TOLERANCE_PX
        && ((face.bbox.y + face.bbox.height) - (bbox.y + bbox.height)).abs() <= BBOX_MATCH_TOLERANCE_PX
}

/// Phase 2: clusters the residual (unmatched) faces by pairwise Verify,
/// seeding from the highest-confidence face each round.
pub fn cluster_residual_faces(db: &Database, client: &FaceServiceClient, residual_face_ids: &[i64]) -> Result<Vec<ClusterCandidate>> {
    let mut faces: Vec<Face> = residual_face_ids.iter().filter_map(|id| db.get_face(*id).ok().flatten()).collect();
    faces.sort_by(|a, b| b.detection_confidence.partial_cmp(&a.detection_confidence).unwrap());

    let mut clustered: HashSet<i64> = HashSet::new();
    let mut clusters = Vec::new();

    for seed in &faces {
        if clustered.contains(&seed.id) {
            continue;
        }
        let Some(seed_path) = seed.face_image_path.as_ref() else { continue };

        let mut members = vec![seed.id];
        let mut similarities = Vec::new();
        let mut compared = 0;

        for candidate in &faces {
            if candidate.id == seed.id || clustered.contains(&candidate.id) || compared >= VERIFY_CANDIDATE_LIMIT {
                continue;
            }
            let Some(candidate_path) = candidate.face_image_path.as_ref() else { continue };
            compared += 1;
            sleep(COMPARISON_DELAY);

            match client.verify(std::path::Path::new(seed_path), std::path::Path::new(candidate_path)) {
                Ok(similarity) if similarity >= CLUSTER_SIMILARITY_THRESHOLD => {
                    members.push(candidate.id);
                    similarities.push(similarity);
                }
                _ => {}
            }
        }

        if members.len() >= MIN_CLUSTER_SIZE {
            members.truncate(MAX_CLUSTER_SIZE);
            let average = if similarities.is_empty() { 0.0 } else { similarities.iter().sum::<f64>() / similarities.len() as f64 };
            for id in &members {
                clustered.insert(*id);
            }
            for member in members.iter().skip(1) {
                db.record_face_similarity(&FaceSimilarity { face_a_id: seed.id, face_b_id: *member, method: "verify".into(), score: CLUSTER_SIMILARITY_THRESHOLD })?;
            }
            clusters.push(ClusterCandidate { representative_face_id: seed.id, member_face_ids: members, average_similarity: average });
            sleep(BATCH_DELAY);
        }
    }

    info!(clusters = clusters.len(), "face clustering pass complete");
    Ok(clusters)
}

pub fn materialize_clusters(db: &Database, candidates: &[ClusterCandidate]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut members = vec![candidate.representative_face_id];
        members.extend(candidate.member_face_ids.iter().filter(|id| **id != candidate.representative_face_id));
        let cluster = db.create_face_cluster(&members, Some(candidate.average_similarity))?;
        ids.push(cluster.id);
    }
    Ok(ids)
}

#[derive(Debug, Clone)]
pub struct QuickSampleEstimate {
    pub sampled: usize,
    pub matched: usize,
    pub estimated_match_ratio: f64,
}

/// For large backlogs, samples a high-confidence recent subset instead of
/// scanning the whole unassigned pool, and extrapolates a ratio.
pub fn quick_sample_estimate(db: &Database, client: &FaceServiceClient, auto_assign_threshold: f64) -> Result<Option<QuickSampleEstimate>> {
    let total = db.count_unassigned_faces(MIN_DETECTION_CONFIDENCE)?;
    if (total as usize) <= QUICK_SAMPLE_DATASET_THRESHOLD {
        return Ok(None);
    }

    let sample = db.get_unassigned_faces(QUICK_SAMPLE_MIN_CONFIDENCE, QUICK_SAMPLE_SIZE as i64)?;
    let paths: Vec<std::path::PathBuf> = sample.iter().filter_map(|f| f.face_image_path.as_ref()).map(std::path::PathBuf::from).collect();
    let recognitions = client.batch_recognize(&paths, 1, MIN_DETECTION_CONFIDENCE);

    let matched = recognitions
        .into_iter()
        .flatten()
        .flatten()
        .filter(|r| r.subjects.first().map(|(_, sim)| *sim >= auto_assign_threshold).unwrap_or(false))
        .count();

    let sampled = sample.len();
    Ok(Some(QuickSampleEstimate {
        sampled,
        matched,
        estimated_match_ratio: if sampled > 0 { matched as f64 / sampled as f64 } else { 0.0 },
    }))
}

/// After a user assigns one face to a person, surfaces up to `limit` other
/// recent unassigned faces whose top recognition match is the same subject.
pub fn batch_assignment_candidates(db: &Database, client: &FaceServiceClient, person_id: i64, limit: usize) -> Result<Vec<i64>> {
    let Some(person) = db.get_person(person_id)? else { return Ok(Vec::new()) };
    let Some(subject_id) = person.face_service_subject_id else { return Ok(Vec::new()) };

    let recent = db.get_unassigned_faces(MIN_DETECTION_CONFIDENCE, (limit * 4).max(limit) as i64)?;
    let paths: Vec<std::path::PathBuf> = recent.iter().filter_map(|f| f.face_image_path.as_ref()).map(std::path::PathBuf::from).collect();
    let recognitions = client.batch_recognize(&paths, 1, MIN_DETECTION_CONFIDENCE);

    let mut matches = Vec::new();
    for (face, result) in recent.iter().zip(recognitions.into_iter()) {
        let Some(candidates) = result.ok() else { continue };
        let Some(top) = candidates.first() else { continue };
        if top.subjects.first().map(|(s, _)| s == &subject_id).unwrap_or(false) {
            matches.push(face.id);
        }
        if matches.len() >= limit {
            break;
        }
    }
    Ok(matches)
}

pub fn sweep_orphaned_similarities(db: &Database) -> Result<usize> {
    db.sweep_orphaned_similarities()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::objects::BoundingBox;

    #[test]
    fn bbox_matches_within_tolerance() {
        let face = Face {
            id: 1,
            image_id: 1,
            bbox: BoundingBox { x: 10.0, y: 10.0, width: 50.0, height: 50.0 },
            detection_confidence: 0.9,
            face_image_path: None,
            person_id: None,
            assigned_by: None,
            compreface_synced: false,
            compreface_uploaded_at: None,
        };
        let close = BoundingBox { x: 15.0, y: 8.0, width: 50.0, height: 52.0 };
        assert!(bbox_matches(&face, &close));

        let far = BoundingBox { x: 200.0, y: 200.0, width: 50.0, height: 50.0 };
        assert!(!bbox_matches(&face, &far));
    }

    #[test]
    fn quick_sample_skips_small_datasets() {
        let db = Database::open_in_memory().unwrap();
        let client = FaceServiceClient::new(&crate::config::FaceServiceConfig { base_url: "http://127.0.0.1:1".into(), ..Default::default() });
        let estimate = quick_sample_estimate(&db, &client, 0.9).unwrap();
        assert!(estimate.is_none());
    }
}
