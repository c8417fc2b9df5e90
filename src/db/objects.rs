//! DetectedObject persistence (§3 DetectedObject).

use anyhow::Result;
use rusqlite::params;

use super::Database;

#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct DetectedObject {
    pub class: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

impl Database {
    pub fn insert_detected_objects(&self, image_id: i64, objects: &[DetectedObject]) -> Result<()> {
        for obj in objects {
            self.conn().execute(
                r#"
                INSERT INTO detected_objects (image_id, class, confidence, bbox_x, bbox_y, bbox_width, bbox_height)
                VALUES (?1,?2,?3,?4,?5,?6,?7)
                "#,
                params![
                    image_id,
                    obj.class,
                    obj.confidence,
                    obj.bbox.x,
                    obj.bbox.y,
                    obj.bbox.width,
                    obj.bbox.height,
                ],
            )?;
        }
        Ok(())
    }

    pub fn get_detected_objects(&self, image_id: i64) -> Result<Vec<DetectedObject>> {
        let mut stmt = self.conn().prepare(
            "SELECT class, confidence, bbox_x, bbox_y, bbox_width, bbox_height FROM detected_objects WHERE image_id = ?1",
        )?;
        let objects = stmt
            .query_map(params![image_id], |row| {
                Ok(DetectedObject {
                    class: row.get(0)?,
                    confidence: row.get(1)?,
                    bbox: BoundingBox {
                        x: row.get(2)?,
                        y: row.get(3)?,
                        width: row.get(4)?,
                        height: row.get(5)?,
                    },
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(objects)
    }
}
