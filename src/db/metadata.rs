//! ImageMetadata persistence (§3 ImageMetadata), 1:1 with Image.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::pipeline::exif::ExifData;

#[derive(Debug, Clone, Default)]
pub struct ImageMetadataRow {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub iso: Option<i64>,
    pub aperture: Option<f64>,
}

fn row_to_metadata(row: &rusqlite::Row) -> rusqlite::Result<ImageMetadataRow> {
    Ok(ImageMetadataRow {
        camera_make: row.get("camera_make")?,
        camera_model: row.get("camera_model")?,
        lens: row.get("lens")?,
        iso: row.get("iso")?,
        aperture: row.get("aperture")?,
    })
}

impl Database {
    pub fn get_image_metadata(&self, image_id: i64) -> Result<Option<ImageMetadataRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT camera_make, camera_model, lens, iso, aperture FROM image_metadata WHERE image_id = ?1",
                params![image_id],
                row_to_metadata,
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_image_metadata(&self, image_id: i64, exif: &ExifData) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO image_metadata (
                image_id, camera_make, camera_model, software, lens, focal_length,
                aperture, shutter_speed, iso, flash, white_balance, exposure_program,
                gps_dop, gps_satellites, gps_h_error, creator, raw_exif
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
            ON CONFLICT(image_id) DO UPDATE SET
                camera_make=excluded.camera_make, camera_model=excluded.camera_model,
                software=excluded.software, lens=excluded.lens,
                focal_length=excluded.focal_length, aperture=excluded.aperture,
                shutter_speed=excluded.shutter_speed, iso=excluded.iso,
                flash=excluded.flash, white_balance=excluded.white_balance,
                exposure_program=excluded.exposure_program, gps_dop=excluded.gps_dop,
                gps_satellites=excluded.gps_satellites, gps_h_error=excluded.gps_h_error,
                creator=excluded.creator, raw_exif=excluded.raw_exif
            "#,
            params![
                image_id,
                exif.camera_make,
                exif.camera_model,
                exif.software,
                exif.lens,
                exif.focal_length,
                exif.aperture,
                exif.shutter_speed,
                exif.iso,
                exif.flash,
                exif.white_balance,
                exif.exposure_program,
                exif.gps_dop,
                exif.gps_satellites,
                exif.gps_h_error,
                exif.creator,
                exif.raw_exif_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_raw_exif(&self, image_id: i64) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT raw_exif FROM image_metadata WHERE image_id = ?1",
                params![image_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}
