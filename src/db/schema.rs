//! Full relational schema for the entities in §3 of the specification.
//!
//! `CREATE TABLE IF NOT EXISTS` throughout: [`super::Database::initialize`]
//! runs this against both a fresh and an already-migrated database.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    source_path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    mime TEXT,
    width INTEGER,
    height INTEGER,
    taken_at TEXT,
    processed_at TEXT,
    dominant_color TEXT,
    is_screenshot INTEGER NOT NULL DEFAULT 0,
    screenshot_confidence REAL,
    screenshot_reasons TEXT,
    is_astrophotography INTEGER NOT NULL DEFAULT 0,
    astro_confidence REAL,
    astro_classification TEXT,
    astro_details TEXT,
    gps_latitude REAL,
    gps_longitude REAL,
    gps_altitude REAL,
    smart_album_count INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_images_hash ON images(hash);
CREATE INDEX IF NOT EXISTS idx_images_taken_at ON images(taken_at);
CREATE INDEX IF NOT EXISTS idx_images_deleted_at ON images(deleted_at);

CREATE TABLE IF NOT EXISTS image_metadata (
    image_id INTEGER PRIMARY KEY REFERENCES images(id) ON DELETE CASCADE,
    camera_make TEXT,
    camera_model TEXT,
    software TEXT,
    lens TEXT,
    focal_length REAL,
    aperture REAL,
    shutter_speed TEXT,
    iso INTEGER,
    flash TEXT,
    white_balance TEXT,
    exposure_program TEXT,
    gps_dop REAL,
    gps_satellites TEXT,
    gps_h_error REAL,
    creator TEXT,
    raw_exif TEXT
);

CREATE TABLE IF NOT EXISTS detected_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    class TEXT NOT NULL,
    confidence REAL NOT NULL,
    bbox_x REAL NOT NULL,
    bbox_y REAL NOT NULL,
    bbox_width REAL NOT NULL,
    bbox_height REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_detected_objects_image ON detected_objects(image_id);
CREATE INDEX IF NOT EXISTS idx_detected_objects_class ON detected_objects(class);

CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    face_service_subject_id TEXT,
    recognition_status TEXT NOT NULL DEFAULT 'untrained',
    training_face_count INTEGER NOT NULL DEFAULT 0,
    face_count INTEGER NOT NULL DEFAULT 0,
    last_trained_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS detected_faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    bbox_x REAL NOT NULL,
    bbox_y REAL NOT NULL,
    bbox_width REAL NOT NULL,
    bbox_height REAL NOT NULL,
    detection_confidence REAL NOT NULL,
    gender TEXT,
    gender_confidence REAL,
    age_low INTEGER,
    age_high INTEGER,
    age_confidence REAL,
    landmarks TEXT,
    face_image_path TEXT,
    person_id INTEGER REFERENCES people(id) ON DELETE SET NULL,
    assigned_by TEXT,
    recognition_method TEXT,
    compreface_synced INTEGER NOT NULL DEFAULT 0,
    compreface_uploaded_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_detected_faces_image ON detected_faces(image_id);
CREATE INDEX IF NOT EXISTS idx_detected_faces_person ON detected_faces(person_id);
CREATE INDEX IF NOT EXISTS idx_detected_faces_unassigned
    ON detected_faces(person_id, detection_confidence) WHERE person_id IS NULL;

CREATE TABLE IF NOT EXISTS face_similarities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    face_a_id INTEGER NOT NULL REFERENCES detected_faces(id) ON DELETE CASCADE,
    face_b_id INTEGER NOT NULL REFERENCES detected_faces(id) ON DELETE CASCADE,
    method TEXT NOT NULL,
    score REAL NOT NULL,
    UNIQUE(face_a_id, face_b_id, method)
);

CREATE TABLE IF NOT EXISTS face_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT,
    representative_face_id INTEGER REFERENCES detected_faces(id) ON DELETE SET NULL,
    member_count INTEGER NOT NULL DEFAULT 0,
    average_similarity REAL,
    reviewed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS face_cluster_members (
    cluster_id INTEGER NOT NULL REFERENCES face_clusters(id) ON DELETE CASCADE,
    face_id INTEGER NOT NULL REFERENCES detected_faces(id) ON DELETE CASCADE,
    similarity REAL,
    is_representative INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (cluster_id, face_id)
);

CREATE TABLE IF NOT EXISTS file_index_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    mtime TEXT NOT NULL,
    hash TEXT,
    discovered_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    last_processed_at TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_file_index_status ON file_index_entries(processing_status);

CREATE TABLE IF NOT EXISTS smart_albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    album_type TEXT NOT NULL,
    rules TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_system INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS smart_album_memberships (
    album_id INTEGER NOT NULL REFERENCES smart_albums(id) ON DELETE CASCADE,
    image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    confidence REAL,
    reasons TEXT,
    PRIMARY KEY (album_id, image_id)
);
CREATE INDEX IF NOT EXISTS idx_smart_album_memberships_image ON smart_album_memberships(image_id);

CREATE TABLE IF NOT EXISTS training_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at TEXT,
    completed_at TEXT,
    success_rate REAL,
    added_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_training_jobs_person ON training_jobs(person_id);
CREATE INDEX IF NOT EXISTS idx_training_jobs_status ON training_jobs(status);

CREATE TABLE IF NOT EXISTS face_training_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    face_id INTEGER NOT NULL REFERENCES detected_faces(id) ON DELETE CASCADE,
    person_id INTEGER NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    success INTEGER NOT NULL,
    service_response TEXT,
    error TEXT,
    upload_attempt_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_face_training_log_face ON face_training_log(face_id);
CREATE INDEX IF NOT EXISTS idx_face_training_log_person ON face_training_log(person_id);

CREATE TABLE IF NOT EXISTS geo_countries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    code TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS geo_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    country_id INTEGER NOT NULL REFERENCES geo_countries(id),
    name TEXT NOT NULL,
    code TEXT
);

CREATE TABLE IF NOT EXISTS geo_cities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    state_id INTEGER NOT NULL REFERENCES geo_states(id),
    name TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_geo_cities_lat_lon ON geo_cities(latitude, longitude);

CREATE TABLE IF NOT EXISTS image_geolocations (
    image_id INTEGER PRIMARY KEY REFERENCES images(id) ON DELETE CASCADE,
    city_id INTEGER NOT NULL REFERENCES geo_cities(id),
    confidence REAL NOT NULL,
    detection_method TEXT NOT NULL,
    distance REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    priority TEXT NOT NULL DEFAULT 'normal',
    status TEXT NOT NULL DEFAULT 'pending',
    data TEXT,
    progress INTEGER NOT NULL DEFAULT 0,
    total_items INTEGER,
    processed_items INTEGER NOT NULL DEFAULT 0,
    errors TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_priority ON jobs(priority);
"#;
