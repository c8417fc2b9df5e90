//! Small bundled reference dataset (§4.L): a handful of major cities per
//! country, enough to exercise the linker out of the box. Deployments that
//! need finer coverage load a larger dataset through the same
//! `insert_country`/`insert_state`/`insert_city` calls this seed uses.

use anyhow::Result;

use crate::db::Database;

struct SeedCity {
    name: &'static str,
    state: &'static str,
    latitude: f64,
    longitude: f64,
}

struct SeedCountry {
    name: &'static str,
    code: &'static str,
    cities: &'static [SeedCity],
}

const SEED: &[SeedCountry] = &[
    SeedCountry {
        name: "United States",
        code: "US",
        cities: &[
            SeedCity { name: "New York", state: "New York", latitude: 40.7128, longitude: -74.0060 },
            SeedCity { name: "Los Angeles", state: "California", latitude: 34.0522, longitude: -118.2437 },
            SeedCity { name: "Chicago", state: "Illinois", latitude: 41.8781, longitude: -87.6298 },
            SeedCity { name: "Seattle", state: "Washington", latitude: 47.6062, longitude: -122.3321 },
            SeedCity { name: "Austin", state: "Texas", latitude: 30.2672, longitude: -97.7431 },
        ],
    },
    SeedCountry {
        name: "United Kingdom",
        code: "GB",
        cities: &[
            SeedCity { name: "London", state: "England", latitude: 51.5074, longitude: -0.1278 },
            SeedCity { name: "Manchester", state: "England", latitude: 53.4808, longitude: -2.2426 },
            SeedCity { name: "Bangor", state: "Wales", latitude: 53.228, longitude: -4.128 },
        ],
    },
    SeedCountry {
        name: "Japan",
        code: "JP",
        cities: &[
            SeedCity { name: "Tokyo", state: "Tokyo", latitude: 35.6762, longitude: 139.6503 },
            SeedCity { name: "Osaka", state: "Osaka", latitude: 34.6937, longitude: 135.5023 },
        ],
    },
    SeedCountry {
        name: "Australia",
        code: "AU",
        cities: &[
            SeedCity { name: "Sydney", state: "New South Wales", latitude: -33.8688, longitude: 151.2093 },
            SeedCity { name: "Melbourne", state: "Victoria", latitude: -37.8136, longitude: 144.9631 },
        ],
    },
];

/// Loads [`SEED`] if the reference tables are empty; a no-op otherwise so
/// restarts don't duplicate rows.
pub fn seed_if_empty(db: &Database) -> Result<usize> {
    if db.geo_dataset_is_loaded()? {
        return Ok(0);
    }

    let mut inserted = 0;
    for country in SEED {
        let country_id = db.insert_country(country.name, country.code)?;
        for city in country.cities {
            let state_id = db.insert_state(country_id, city.state, None)?;
            db.insert_city(state_id, city.name, city.latitude, city.longitude)?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_twice_only_loads_once() {
        let db = Database::open_in_memory().unwrap();
        let first = seed_if_empty(&db).unwrap();
        assert!(first > 0);
        let second = seed_if_empty(&db).unwrap();
        assert_eq!(second, 0);
    }
}
