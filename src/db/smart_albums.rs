//! SmartAlbum and membership persistence (§3, §4.K).
//!
//! Grounded on the predecessor's `db/albums.rs` tag/album CRUD shape,
//! retargeted from user-curated tags to rule-evaluated system albums plus
//! user-defined ones.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Debug, Clone)]
pub struct SmartAlbum {
    pub id: i64,
    pub name: String,
    pub album_type: String,
    pub rules: String,
    pub priority: i64,
    pub is_active: bool,
    pub is_system: bool,
}

fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<SmartAlbum> {
    Ok(SmartAlbum {
        id: row.get("id")?,
        name: row.get("name")?,
        album_type: row.get("album_type")?,
        rules: row.get("rules")?,
        priority: row.get("priority")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        is_system: row.get::<_, i64>("is_system")? != 0,
    })
}

impl Database {
    pub fn create_smart_album(&self, name: &str, album_type: &str, rules_json: &str, is_system: bool) -> Result<SmartAlbum> {
        self.conn().execute(
            "INSERT INTO smart_albums (name, album_type, rules, is_system) VALUES (?1,?2,?3,?4)",
            params![name, album_type, rules_json, is_system as i64],
        )?;
        let id = self.conn().last_insert_rowid();
        Ok(self.get_smart_album(id)?.expect("just inserted"))
    }

    pub fn get_smart_album(&self, id: i64) -> Result<Option<SmartAlbum>> {
        let album = self
            .conn()
            .query_row("SELECT * FROM smart_albums WHERE id = ?1", params![id], row_to_album)
            .optional()?;
        Ok(album)
    }

    pub fn find_album_by_name(&self, name: &str) -> Result<Option<SmartAlbum>> {
        let album = self
            .conn()
            .query_row("SELECT * FROM smart_albums WHERE name = ?1", params![name], row_to_album)
            .optional()?;
        Ok(album)
    }

    /// Active albums in priority order (§4.K evaluates higher-priority rules
    /// first when albums are mutually exclusive).
    pub fn get_active_albums(&self) -> Result<Vec<SmartAlbum>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM smart_albums WHERE is_active = 1 ORDER BY priority DESC, id")?;
        let albums = stmt.query_map([], row_to_album)?.filter_map(|r| r.ok()).collect();
        Ok(albums)
    }

    pub fn set_album_active(&self, id: i64, active: bool) -> Result<()> {
        self.conn()
            .execute("UPDATE smart_albums SET is_active = ?2 WHERE id = ?1", params![id, active as i64])?;
        Ok(())
    }

    /// Adds an image to an album, recording match confidence/reasons; a
    /// no-op if already a member (rule re-evaluation is idempotent).
    pub fn add_to_album(&self, album_id: i64, image_id: i64, confidence: Option<f64>, reasons: Option<&str>) -> Result<bool> {
        let inserted = self.conn().execute(
            r#"
            INSERT OR IGNORE INTO smart_album_memberships (album_id, image_id, confidence, reasons)
            VALUES (?1,?2,?3,?4)
            "#,
            params![album_id, image_id, confidence, reasons],
        )?;
        if inserted > 0 {
            self.increment_smart_album_count(image_id, 1)?;
        }
        Ok(inserted > 0)
    }

    pub fn remove_from_album(&self, album_id: i64, image_id: i64) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM smart_album_memberships WHERE album_id = ?1 AND image_id = ?2",
            params![album_id, image_id],
        )?;
        if removed > 0 {
            self.increment_smart_album_count(image_id, -1)?;
        }
        Ok(removed > 0)
    }

    pub fn is_album_member(&self, album_id: i64, image_id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM smart_album_memberships WHERE album_id = ?1 AND image_id = ?2",
                params![album_id, image_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn album_member_count(&self, album_id: i64) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM smart_album_memberships WHERE album_id = ?1",
            params![album_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn images_in_album(&self, album_id: i64, limit: i64, offset: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT image_id FROM smart_album_memberships WHERE album_id = ?1 ORDER BY image_id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let ids = stmt
            .query_map(params![album_id, limit, offset], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::images::NewImage;

    #[test]
    fn adding_to_album_is_idempotent_and_tracks_image_count() {
        let db = Database::open_in_memory().unwrap();
        let image_id = db
            .insert_image(&NewImage { hash: "h".into(), source_path: "/a.jpg".into(), relative_path: "2024/01/a_deadbeef.jpg".into(), size_bytes: 1, ..Default::default() })
            .unwrap();
        let album = db.create_smart_album("Astrophotography", "system", "{}", true).unwrap();

        assert!(db.add_to_album(album.id, image_id, Some(0.9), None).unwrap());
        assert!(!db.add_to_album(album.id, image_id, Some(0.9), None).unwrap());

        let image = db.get_image(image_id).unwrap().unwrap();
        assert_eq!(image.smart_album_count, 1);
    }

    #[test]
    fn removing_from_album_decrements_image_count() {
        let db = Database::open_in_memory().unwrap();
        let image_id = db
            .insert_image(&NewImage { hash: "h".into(), source_path: "/a.jpg".into(), relative_path: "2024/01/a_deadbeef.jpg".into(), size_bytes: 1, ..Default::default() })
            .unwrap();
        let album = db.create_smart_album("Screenshots", "system", "{}", true).unwrap();
        db.add_to_album(album.id, image_id, None, None).unwrap();

        assert!(db.remove_from_album(album.id, image_id).unwrap());

        let image = db.get_image(image_id).unwrap().unwrap();
        assert_eq!(image.smart_album_count, 0);
    }
}
