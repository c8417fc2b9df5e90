//! FaceSimilarity and FaceCluster persistence (§3, §4.J).
//!
//! Grounded on the predecessor's `db/similarity.rs`: the shape of
//! `SimilarityGroup` (pairwise scores rolled up into groups) carries over
//! directly, retargeted from perceptual-hash photo groups to face-embedding
//! clusters.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::Database;

#[derive(Debug, Clone)]
pub struct FaceSimilarity {
    pub face_a_id: i64,
    pub face_b_id: i64,
    pub method: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct FaceCluster {
    pub id: i64,
    pub uuid: String,
    pub name: Option<String>,
    pub representative_face_id: Option<i64>,
    pub member_count: i64,
    pub average_similarity: Option<f64>,
    pub reviewed: bool,
}

#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub face_id: i64,
    pub similarity: Option<f64>,
    pub is_representative: bool,
}

fn row_to_cluster(row: &rusqlite::Row) -> rusqlite::Result<FaceCluster> {
    Ok(FaceCluster {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        name: row.get("name")?,
        representative_face_id: row.get("representative_face_id")?,
        member_count: row.get("member_count")?,
        average_similarity: row.get("average_similarity")?,
        reviewed: row.get::<_, i64>("reviewed")? != 0,
    })
}

impl Database {
    /// Records a pairwise similarity score. Upserted since the same pair can
    /// be recomputed when either face's crop changes.
    pub fn record_face_similarity(&self, sim: &FaceSimilarity) -> Result<()> {
        let (a, b) = if sim.face_a_id <= sim.face_b_id {
            (sim.face_a_id, sim.face_b_id)
        } else {
            (sim.face_b_id, sim.face_a_id)
        };
        self.conn().execute(
            r#"
            INSERT INTO face_similarities (face_a_id, face_b_id, method, score)
            VALUES (?1,?2,?3,?4)
            ON CONFLICT(face_a_id, face_b_id, method) DO UPDATE SET score = excluded.score
            "#,
            params![a, b, sim.method, sim.score],
        )?;
        Ok(())
    }

    pub fn similarities_above(&self, method: &str, min_score: f64) -> Result<Vec<FaceSimilarity>> {
        let mut stmt = self.conn().prepare(
            "SELECT face_a_id, face_b_id, method, score FROM face_similarities WHERE method = ?1 AND score >= ?2",
        )?;
        let rows = stmt
            .query_map(params![method, min_score], |row| {
                Ok(FaceSimilarity {
                    face_a_id: row.get(0)?,
                    face_b_id: row.get(1)?,
                    method: row.get(2)?,
                    score: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Creates a new cluster with a fresh uuid (§3 FaceCluster.id is a uuid,
    /// distinct from the surrogate integer primary key used elsewhere).
    pub fn create_face_cluster(&self, member_face_ids: &[i64], average_similarity: Option<f64>) -> Result<FaceCluster> {
        let uuid = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO face_clusters (uuid, member_count, average_similarity) VALUES (?1,?2,?3)",
            params![uuid, member_face_ids.len() as i64, average_similarity],
        )?;
        let cluster_id = self.conn().last_insert_rowid();
        for (idx, face_id) in member_face_ids.iter().enumerate() {
            self.conn().execute(
                "INSERT INTO face_cluster_members (cluster_id, face_id, is_representative) VALUES (?1,?2,?3)",
                params![cluster_id, face_id, (idx == 0) as i64],
            )?;
        }
        if let Some(first) = member_face_ids.first() {
            self.conn().execute(
                "UPDATE face_clusters SET representative_face_id = ?2 WHERE id = ?1",
                params![cluster_id, first],
            )?;
        }
        Ok(self.get_face_cluster(cluster_id)?.expect("just inserted"))
    }

    pub fn get_face_cluster(&self, id: i64) -> Result<Option<FaceCluster>> {
        let cluster = self
            .conn()
            .query_row("SELECT * FROM face_clusters WHERE id = ?1", params![id], row_to_cluster)
            .optional()?;
        Ok(cluster)
    }

    pub fn get_unreviewed_clusters(&self) -> Result<Vec<FaceCluster>> {
        let mut stmt = self.conn().prepare("SELECT * FROM face_clusters WHERE reviewed = 0 ORDER BY member_count DESC")?;
        let clusters = stmt.query_map([], row_to_cluster)?.filter_map(|r| r.ok()).collect();
        Ok(clusters)
    }

    pub fn get_cluster_members(&self, cluster_id: i64) -> Result<Vec<ClusterMember>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT face_id, similarity, is_representative FROM face_cluster_members WHERE cluster_id = ?1")?;
        let members = stmt
            .query_map(params![cluster_id], |row| {
                Ok(ClusterMember {
                    face_id: row.get(0)?,
                    similarity: row.get(1)?,
                    is_representative: row.get::<_, i64>(2)? != 0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(members)
    }

    pub fn mark_cluster_reviewed(&self, cluster_id: i64) -> Result<()> {
        self.conn()
            .execute("UPDATE face_clusters SET reviewed = 1 WHERE id = ?1", params![cluster_id])?;
        Ok(())
    }

    /// Dissolves a cluster without touching the faces or people it pointed
    /// at — used when a reviewer rejects a suggested grouping entirely.
    pub fn delete_face_cluster(&self, cluster_id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM face_cluster_members WHERE cluster_id = ?1", params![cluster_id])?;
        self.conn()
            .execute("DELETE FROM face_clusters WHERE id = ?1", params![cluster_id])?;
        Ok(())
    }

    /// Periodic hygiene (§4.J orphan sweep): removes similarity rows whose
    /// endpoint faces were deleted.
    pub fn sweep_orphaned_similarities(&self) -> Result<usize> {
        let n = self.conn().execute(
            r#"
            DELETE FROM face_similarities
            WHERE face_a_id NOT IN (SELECT id FROM detected_faces)
               OR face_b_id NOT IN (SELECT id FROM detected_faces)
            "#,
            [],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::faces::NewFace;
    use crate::db::images::NewImage;
    use crate::db::objects::BoundingBox;

    fn seed_two_faces(db: &Database) -> (i64, i64) {
        let image_id = db
            .insert_image(&NewImage { hash: "h".into(), source_path: "/a.jpg".into(), relative_path: "2024/01/a_deadbeef.jpg".into(), size_bytes: 1, ..Default::default() })
            .unwrap();
        let face = NewFace {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
            detection_confidence: 0.9,
            gender: None,
            gender_confidence: None,
            age_low: None,
            age_high: None,
            age_confidence: None,
            landmarks_json: None,
            face_image_path: Some("f.jpg".into()),
        };
        let ids = db.insert_detected_faces(image_id, &[face.clone(), face]).unwrap();
        (ids[0], ids[1])
    }

    #[test]
    fn cluster_creation_picks_first_member_as_representative() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = seed_two_faces(&db);

        let cluster = db.create_face_cluster(&[a, b], Some(0.92)).unwrap();

        assert_eq!(cluster.representative_face_id, Some(a));
        assert_eq!(cluster.member_count, 2);
        assert!(!cluster.reviewed);
    }

    #[test]
    fn similarity_is_order_independent() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = seed_two_faces(&db);
        db.record_face_similarity(&FaceSimilarity { face_a_id: b, face_b_id: a, method: "embedding".into(), score: 0.8 }).unwrap();

        let found = db.similarities_above("embedding", 0.5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].face_a_id, a.min(b));
    }
}
