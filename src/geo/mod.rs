//! Geolocation linker (§4.L).
//!
//! Grounded on `db::geo`'s bounding-box prefilter; this module adds the
//! haversine refinement and the bundled reference dataset seed.

pub mod data;

use anyhow::Result;

use crate::db::geo::{City, Geolocation};
use crate::db::Database;

pub const DEFAULT_RADIUS_MILES: f64 = 25.0;
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Great-circle distance between two coordinates, in miles.
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_MILES * c
}

/// Coarse bounding-box prefilter margin in degrees, generous enough that a
/// city at exactly `radius` miles away is never excluded before the
/// haversine pass (~1 degree of latitude is ~69 miles).
fn prefilter_margin(radius_miles: f64) -> f64 {
    (radius_miles / 60.0).max(0.5)
}

/// Nearest city within `radius_miles`, or `None` if nothing qualifies.
pub fn nearest_city(db: &Database, latitude: f64, longitude: f64, radius_miles: f64) -> Result<Option<(City, f64)>> {
    let candidates = db.cities_near(latitude, longitude, prefilter_margin(radius_miles))?;
    let nearest = candidates
        .into_iter()
        .map(|city| {
            let distance = haversine_miles(latitude, longitude, city.latitude, city.longitude);
            (city, distance)
        })
        .filter(|(_, distance)| *distance <= radius_miles)
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap());
    Ok(nearest)
}

/// Links one image's GPS coordinates to its nearest reference city and
/// persists the result (§4.L). No-ops (returns `Ok(None)`) if nothing is
/// within range; callers treat this as non-fatal.
pub fn link_image(db: &Database, image_id: i64, latitude: f64, longitude: f64, radius_miles: f64) -> Result<Option<Geolocation>> {
    let Some((city, distance)) = nearest_city(db, latitude, longitude, radius_miles)? else {
        return Ok(None);
    };
    let confidence = (1.0 - distance / radius_miles).max(0.1);
    let geo = Geolocation {
        image_id,
        city_id: city.id,
        confidence,
        detection_method: "exif_gps".to_string(),
        distance,
    };
    db.set_image_geolocation(&geo)?;
    Ok(Some(geo))
}

/// Drives the linker over every image with GPS but no geolocation row yet
/// (§4.L retroactive scan). Returns the number of images linked.
pub fn retroactive_scan(db: &Database, radius_miles: f64, batch_limit: i64) -> Result<usize> {
    let ids = db.images_missing_geolocation(batch_limit)?;
    let mut linked = 0;
    for id in ids {
        let Some(image) = db.get_image(id)? else { continue };
        let (Some(lat), Some(lon)) = (image.gps_latitude, image.gps_longitude) else { continue };
        if link_image(db, id, lat, lon, radius_miles)?.is_some() {
            linked += 1;
        }
    }
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert_eq!(haversine_miles(53.0, -4.0, 53.0, -4.0), 0.0);
    }

    #[test]
    fn nearest_city_respects_radius() {
        let db = Database::open_in_memory().unwrap();
        let country = db.insert_country("Wales", "WL").unwrap();
        let state = db.insert_state(country, "Gwynedd", None).unwrap();
        db.insert_city(state, "Bangor", 53.228, -4.128).unwrap();

        let found = nearest_city(&db, 53.2, -4.1, 25.0).unwrap();
        assert!(found.is_some());

        let out_of_range = nearest_city(&db, 10.0, 10.0, 25.0).unwrap();
        assert!(out_of_range.is_none());
    }

    #[test]
    fn link_image_writes_a_confidence_inversely_proportional_to_distance() {
        let db = Database::open_in_memory().unwrap();
        let country = db.insert_country("Wales", "WL").unwrap();
        let state = db.insert_state(country, "Gwynedd", None).unwrap();
        db.insert_city(state, "Bangor", 53.228, -4.128).unwrap();

        let geo = link_image(&db, 1, 53.228, -4.128, 25.0).unwrap().unwrap();
        assert!(geo.confidence > 0.9);
    }
}
