//! Image persistence (§3 Image).

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub hash: String,
    pub source_path: String,
    pub relative_path: String,
    pub size_bytes: i64,
    pub mime: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub taken_at: Option<String>,
    pub dominant_color: Option<String>,
    pub is_screenshot: bool,
    pub screenshot_confidence: Option<f64>,
    pub screenshot_reasons: Option<String>,
    pub is_astrophotography: bool,
    pub astro_confidence: Option<f64>,
    pub astro_classification: Option<String>,
    pub astro_details: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Image {
    pub id: i64,
    pub hash: String,
    pub source_path: String,
    pub relative_path: String,
    pub size_bytes: i64,
    pub mime: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub taken_at: Option<String>,
    pub processed_at: Option<String>,
    pub dominant_color: Option<String>,
    pub is_screenshot: bool,
    pub screenshot_confidence: Option<f64>,
    pub is_astrophotography: bool,
    pub astro_confidence: Option<f64>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub smart_album_count: i64,
    pub deleted_at: Option<String>,
}

fn row_to_image(row: &rusqlite::Row) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get("id")?,
        hash: row.get("hash")?,
        source_path: row.get("source_path")?,
        relative_path: row.get("relative_path")?,
        size_bytes: row.get("size_bytes")?,
        mime: row.get("mime")?,
        width: row.get("width")?,
        height: row.get("height")?,
        taken_at: row.get("taken_at")?,
        processed_at: row.get("processed_at")?,
        dominant_color: row.get("dominant_color")?,
        is_screenshot: row.get::<_, i64>("is_screenshot")? != 0,
        screenshot_confidence: row.get("screenshot_confidence")?,
        is_astrophotography: row.get::<_, i64>("is_astrophotography")? != 0,
        astro_confidence: row.get("astro_confidence")?,
        gps_latitude: row.get("gps_latitude")?,
        gps_longitude: row.get("gps_longitude")?,
        smart_album_count: row.get("smart_album_count")?,
        deleted_at: row.get("deleted_at")?,
    })
}

impl Database {
    /// Insert a freshly-ingested image. Returns its id. Callers must have
    /// already checked `find_duplicate_by_hash` (§4.E step 2).
    pub fn insert_image(&self, img: &NewImage) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            r#"
            INSERT INTO images (
                hash, source_path, relative_path, size_bytes, mime, width, height,
                taken_at, processed_at, dominant_color,
                is_screenshot, screenshot_confidence, screenshot_reasons,
                is_astrophotography, astro_confidence, astro_classification, astro_details,
                gps_latitude, gps_longitude, gps_altitude
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)
            "#,
            params![
                img.hash,
                img.source_path,
                img.relative_path,
                img.size_bytes,
                img.mime,
                img.width,
                img.height,
                img.taken_at,
                now,
                img.dominant_color,
                img.is_screenshot as i64,
                img.screenshot_confidence,
                img.screenshot_reasons,
                img.is_astrophotography as i64,
                img.astro_confidence,
                img.astro_classification,
                img.astro_details,
                img.gps_latitude,
                img.gps_longitude,
                img.gps_altitude,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn find_duplicate_by_hash(&self, hash: &str) -> Result<Option<Image>> {
        let image = self
            .conn()
            .query_row(
                "SELECT * FROM images WHERE hash = ?1 AND deleted_at IS NULL",
                params![hash],
                row_to_image,
            )
            .optional()?;
        Ok(image)
    }

    pub fn get_image(&self, id: i64) -> Result<Option<Image>> {
        let image = self
            .conn()
            .query_row("SELECT * FROM images WHERE id = ?1", params![id], row_to_image)
            .optional()?;
        Ok(image)
    }

    pub fn increment_smart_album_count(&self, image_id: i64, delta: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE images SET smart_album_count = MAX(0, smart_album_count + ?2) WHERE id = ?1",
            params![image_id, delta],
        )?;
        Ok(())
    }

    /// Images with GPS data (own or via metadata) that have no geolocation
    /// row yet — feeds the retroactive scan in §4.L.
    pub fn images_missing_geolocation(&self, limit: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT i.id FROM images i
            LEFT JOIN image_geolocations g ON g.image_id = i.id
            WHERE g.image_id IS NULL
              AND i.gps_latitude IS NOT NULL AND i.gps_longitude IS NOT NULL
              AND i.deleted_at IS NULL
            LIMIT ?1
            "#,
        )?;
        let ids = stmt
            .query_map(params![limit], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Soft-delete: sets `deleted_at`. Core never hard-deletes except via the
    /// cleanup cascade (§5 Shared resources).
    pub fn soft_delete_image(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE images SET deleted_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Permanent delete cascading across dependent tables in a single
    /// transaction, per §5.
    pub fn hard_delete_image(&mut self, id: i64) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM detected_faces WHERE image_id = ?1", params![id])?;
        tx.execute("DELETE FROM detected_objects WHERE image_id = ?1", params![id])?;
        tx.execute("DELETE FROM image_metadata WHERE image_id = ?1", params![id])?;
        tx.execute("DELETE FROM image_geolocations WHERE image_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM smart_album_memberships WHERE image_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }
}

#[allow(dead_code)]
fn unused_datetime_hint(_dt: DateTime<Utc>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_image(hash: &str) -> NewImage {
        NewImage {
            hash: hash.to_string(),
            source_path: "/src/a.jpg".into(),
            relative_path: "2024/01/a_deadbeef.jpg".into(),
            size_bytes: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_by_hash_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_image(&new_image("abc123")).unwrap();

        let found = db.find_duplicate_by_hash("abc123").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(db.find_duplicate_by_hash("missing").unwrap().is_none());
    }

    #[test]
    fn soft_deleted_images_are_not_duplicate_matches() {
        let db = Database::open_in_memory().unwrap();
        db.insert_image(&new_image("abc123")).unwrap();
        let id = db.find_duplicate_by_hash("abc123").unwrap().unwrap().id;
        db.soft_delete_image(id).unwrap();
        assert!(db.find_duplicate_by_hash("abc123").unwrap().is_none());
    }
}
