//! Reference geo-data and ImageGeolocation persistence (§3, §4.L).

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Debug, Clone)]
pub struct City {
    pub id: i64,
    pub state_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct Geolocation {
    pub image_id: i64,
    pub city_id: i64,
    pub confidence: f64,
    pub detection_method: String,
    pub distance: f64,
}

impl Database {
    pub fn insert_country(&self, name: &str, code: &str) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO geo_countries (name, code) VALUES (?1,?2) ON CONFLICT(code) DO UPDATE SET name = excluded.name",
            params![name, code],
        )?;
        let id: i64 = self
            .conn()
            .query_row("SELECT id FROM geo_countries WHERE code = ?1", params![code], |r| r.get(0))?;
        Ok(id)
    }

    pub fn insert_state(&self, country_id: i64, name: &str, code: Option<&str>) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO geo_states (country_id, name, code) VALUES (?1,?2,?3)",
            params![country_id, name, code],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn insert_city(&self, state_id: i64, name: &str, latitude: f64, longitude: f64) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO geo_cities (state_id, name, latitude, longitude) VALUES (?1,?2,?3,?4)",
            params![state_id, name, latitude, longitude],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn geo_dataset_is_loaded(&self) -> Result<bool> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM geo_cities", [], |r| r.get(0))?;
        Ok(count > 0)
    }

    /// Coarse bounding-box prefilter before the haversine pass in
    /// `geo::nearest_city` — avoids scanning the whole reference table for
    /// every image.
    pub fn cities_near(&self, latitude: f64, longitude: f64, margin_degrees: f64) -> Result<Vec<City>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, state_id, name, latitude, longitude FROM geo_cities
            WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4
            "#,
        )?;
        let cities = stmt
            .query_map(
                params![
                    latitude - margin_degrees,
                    latitude + margin_degrees,
                    longitude - margin_degrees,
                    longitude + margin_degrees,
                ],
                |row| {
                    Ok(City {
                        id: row.get(0)?,
                        state_id: row.get(1)?,
                        name: row.get(2)?,
                        latitude: row.get(3)?,
                        longitude: row.get(4)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(cities)
    }

    pub fn set_image_geolocation(&self, geo: &Geolocation) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO image_geolocations (image_id, city_id, confidence, detection_method, distance)
            VALUES (?1,?2,?3,?4,?5)
            ON CONFLICT(image_id) DO UPDATE SET
                city_id = excluded.city_id, confidence = excluded.confidence,
                detection_method = excluded.detection_method, distance = excluded.distance
            "#,
            params![geo.image_id, geo.city_id, geo.confidence, geo.detection_method, geo.distance],
        )?;
        Ok(())
    }

    pub fn get_image_geolocation(&self, image_id: i64) -> Result<Option<Geolocation>> {
        let geo = self
            .conn()
            .query_row(
                "SELECT image_id, city_id, confidence, detection_method, distance FROM image_geolocations WHERE image_id = ?1",
                params![image_id],
                |row| {
                    Ok(Geolocation {
                        image_id: row.get(0)?,
                        city_id: row.get(1)?,
                        confidence: row.get(2)?,
                        detection_method: row.get(3)?,
                        distance: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(geo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geolocation_upsert_replaces_prior_assignment() {
        let db = Database::open_in_memory().unwrap();
        let country = db.insert_country("Wales", "WL").unwrap();
        let state = db.insert_state(country, "Gwynedd", None).unwrap();
        let city_a = db.insert_city(state, "Bangor", 53.228, -4.128).unwrap();
        let city_b = db.insert_city(state, "Caernarfon", 53.139, -4.274).unwrap();

        db.set_image_geolocation(&Geolocation { image_id: 1, city_id: city_a, confidence: 0.9, detection_method: "exact".into(), distance: 0.0 }).unwrap();
        db.set_image_geolocation(&Geolocation { image_id: 1, city_id: city_b, confidence: 0.8, detection_method: "nearest".into(), distance: 5.0 }).unwrap();

        let found = db.get_image_geolocation(1).unwrap().unwrap();
        assert_eq!(found.city_id, city_b);
    }

    #[test]
    fn bounding_box_prefilter_excludes_far_cities() {
        let db = Database::open_in_memory().unwrap();
        let country = db.insert_country("Wales", "WL").unwrap();
        let state = db.insert_state(country, "Gwynedd", None).unwrap();
        db.insert_city(state, "Bangor", 53.228, -4.128).unwrap();
        db.insert_city(state, "Tokyo", 35.676, 139.650).unwrap();

        let near = db.cities_near(53.2, -4.1, 1.0).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].name, "Bangor");
    }
}
