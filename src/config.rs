//! Layered configuration (§4.A Config Resolver).
//!
//! Precedence, lowest to highest: built-in defaults, process environment
//! (explicit name→field mapping), user TOML file, programmatic overrides via
//! [`Config::apply_overrides`]. Each layer is validated by [`Config::validate`];
//! failures are aggregated into a single `ConfigError` rather than aborting on
//! the first violation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub face_service: FaceServiceConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            processing: ProcessingConfig::default(),
            face_service: FaceServiceConfig::default(),
            image: ImageConfig::default(),
            server: ServerConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Server host; unset means "use embedded sqlite at `name`".
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Either a server-style database name (when `host` is set) or a sqlite
    /// file path (when it is not).
    #[serde(default = "default_db_name")]
    pub name: String,
}

fn default_db_port() -> u16 {
    5432
}
fn default_db_name() -> String {
    "photon.sqlite3".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_db_port(),
            user: None,
            password: None,
            name: default_db_name(),
        }
    }
}

impl DatabaseConfig {
    /// Resolve the sqlite file path relative to `base_dir` when `name` is
    /// relative and no server host is configured.
    pub fn sqlite_path(&self, base_dir: &Path) -> PathBuf {
        let p = PathBuf::from(&self.name);
        if p.is_absolute() {
            p
        } else {
            base_dir.join(p)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

fn default_source_dir() -> PathBuf {
    Config::data_dir().join("source")
}
fn default_processed_dir() -> PathBuf {
    Config::data_dir().join("processed")
}
fn default_logs_dir() -> PathBuf {
    Config::data_dir().join("logs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            processed_dir: default_processed_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub object_detection: ObjectDetectionConfig,
    #[serde(default)]
    pub face_detection: FaceDetectionConfig,
    #[serde(default)]
    pub face_recognition: FaceRecognitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_od_confidence_detection")]
    pub confidence_detection: f32,
    #[serde(default = "default_od_confidence_search")]
    pub confidence_search: f32,
    #[serde(default = "default_od_confidence_high_quality")]
    pub confidence_high_quality: f32,
    #[serde(default = "default_od_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_od_resize_width")]
    pub resize_width: u32,
    #[serde(default = "default_od_resize_height")]
    pub resize_height: u32,
}

fn default_true() -> bool {
    true
}
fn default_od_confidence_detection() -> f32 {
    0.5
}
fn default_od_confidence_search() -> f32 {
    0.6
}
fn default_od_confidence_high_quality() -> f32 {
    0.8
}
fn default_od_batch_size() -> usize {
    10
}
fn default_od_resize_width() -> u32 {
    640
}
fn default_od_resize_height() -> u32 {
    640
}

impl Default for ObjectDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            confidence_detection: default_od_confidence_detection(),
            confidence_search: default_od_confidence_search(),
            confidence_high_quality: default_od_confidence_high_quality(),
            batch_size: default_od_batch_size(),
            resize_width: default_od_resize_width(),
            resize_height: default_od_resize_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_fd_confidence_detection")]
    pub confidence_detection: f32,
    #[serde(default = "default_fd_confidence_review")]
    pub confidence_review: f32,
    #[serde(default = "default_fd_confidence_auto_assign")]
    pub confidence_auto_assign: f32,
    #[serde(default = "default_fd_confidence_gender")]
    pub confidence_gender: f32,
    #[serde(default = "default_fd_confidence_age")]
    pub confidence_age: f32,
}

fn default_fd_confidence_detection() -> f32 {
    0.8
}
fn default_fd_confidence_review() -> f32 {
    0.7
}
fn default_fd_confidence_auto_assign() -> f32 {
    0.9
}
fn default_fd_confidence_gender() -> f32 {
    0.7
}
fn default_fd_confidence_age() -> f32 {
    0.6
}

impl Default for FaceDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            confidence_detection: default_fd_confidence_detection(),
            confidence_review: default_fd_confidence_review(),
            confidence_auto_assign: default_fd_confidence_auto_assign(),
            confidence_gender: default_fd_confidence_gender(),
            confidence_age: default_fd_confidence_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecognitionConfig {
    #[serde(default = "default_fr_confidence_review")]
    pub confidence_review: f32,
    #[serde(default = "default_fr_confidence_auto_assign")]
    pub confidence_auto_assign: f32,
    #[serde(default = "default_fr_confidence_similarity")]
    pub confidence_similarity: f32,
    #[serde(default = "default_true")]
    pub auto_training_enabled: bool,
    #[serde(default = "default_fr_min_faces_threshold")]
    pub min_faces_threshold: usize,
    #[serde(default = "default_fr_training_interval_days")]
    pub training_interval_days: i64,
}

fn default_fr_confidence_review() -> f32 {
    0.7
}
fn default_fr_confidence_auto_assign() -> f32 {
    0.9
}
fn default_fr_confidence_similarity() -> f32 {
    0.75
}
fn default_fr_min_faces_threshold() -> usize {
    3
}
fn default_fr_training_interval_days() -> i64 {
    30
}

impl Default for FaceRecognitionConfig {
    fn default() -> Self {
        Self {
            confidence_review: default_fr_confidence_review(),
            confidence_auto_assign: default_fr_confidence_auto_assign(),
            confidence_similarity: default_fr_confidence_similarity(),
            auto_training_enabled: default_true(),
            min_faces_threshold: default_fr_min_faces_threshold(),
            training_interval_days: default_fr_training_interval_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceServiceConfig {
    #[serde(default = "default_fs_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub detect_api_key: String,
    #[serde(default)]
    pub recognize_api_key: String,
    #[serde(default = "default_fs_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fs_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_fs_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_fs_timeout_secs() -> u64 {
    30
}
fn default_fs_max_concurrency() -> usize {
    3
}

impl Default for FaceServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_fs_base_url(),
            detect_api_key: String::new(),
            recognize_api_key: String::new(),
            timeout_secs: default_fs_timeout_secs(),
            max_concurrency: default_fs_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_thumbnail_size() -> u32 {
    400
}
fn default_jpeg_quality() -> u8 {
    85
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: default_thumbnail_size(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl ImageConfig {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if !(32..=2048).contains(&self.thumbnail_size) {
            errors.push(format!(
                "image.thumbnail_size must be in 32..=2048, got {}",
                self.thumbnail_size
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            errors.push(format!(
                "image.jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            ));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_gallery_page_size")]
    pub gallery_page_size: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    /// Per-job hard timeout before a running job is forced to `failed`.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_server_port() -> u16 {
    8080
}
fn default_gallery_page_size() -> usize {
    50
}
fn default_search_limit() -> usize {
    100
}
fn default_scan_batch_size() -> usize {
    4
}
fn default_job_timeout_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            gallery_page_size: default_gallery_page_size(),
            search_limit: default_search_limit(),
            scan_batch_size: default_scan_batch_size(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.port == 0 {
            errors.push("server.port must be in 1..=65535".to_string());
        }
        if self.scan_batch_size == 0 {
            errors.push("server.scan_batch_size must be > 0".to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub object_detection: bool,
    #[serde(default = "default_true")]
    pub face_detection: bool,
    #[serde(default = "default_true")]
    pub face_recognition: bool,
    #[serde(default = "default_true")]
    pub smart_albums: bool,
    #[serde(default = "default_true")]
    pub geolocation: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            object_detection: default_true(),
            face_detection: default_true(),
            face_recognition: default_true(),
            smart_albums: default_true(),
            geolocation: default_true(),
        }
    }
}

/// Env vars consulted during layer 2 of resolution. Each maps onto a config
/// field; a value that fails to parse is recorded as a validation error
/// rather than aborting the whole load.
const ENV_MAPPING: &[(&str, &str)] = &[
    ("PHOTON_SOURCE_DIR", "storage.source_dir"),
    ("PHOTON_PROCESSED_DIR", "storage.processed_dir"),
    ("PHOTON_FACE_SERVICE_BASE_URL", "face_service.base_url"),
    ("PHOTON_FACE_SERVICE_DETECT_KEY", "face_service.detect_api_key"),
    ("PHOTON_FACE_SERVICE_RECOGNIZE_KEY", "face_service.recognize_api_key"),
    // Legacy name, accepted with a warning.
    ("CLEPHO_FACE_API_KEY", "face_service.detect_api_key"),
];

/// Recursively overlays `overlay` onto `base`, table by table. A table key
/// present in both is merged recursively; any other value in `overlay`
/// (scalar, array, or a table replacing a non-table) replaces `base`
/// outright. This is what lets a user's TOML file override only the fields
/// it mentions, in any nested group, without zeroing out its siblings.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match overlay {
        toml::Value::Table(overlay_table) => {
            if let toml::Value::Table(base_table) = base {
                for (key, value) in overlay_table {
                    match base_table.get_mut(&key) {
                        Some(existing) => merge_toml(existing, value),
                        None => {
                            base_table.insert(key, value);
                        }
                    }
                }
            } else {
                *base = toml::Value::Table(overlay_table);
            }
        }
        other => *base = other,
    }
}

impl Config {
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("photon-engine")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("photon-engine")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load layers 1-3: defaults, environment, user file (if present).
    pub fn load() -> Result<Self, EngineError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, EngineError> {
        let mut config = Config::default();
        config.apply_env();

        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let file_value: toml::Value = toml::from_str(&contents)?;
            let mut merged = toml::Value::try_from(&config)?;
            merge_toml(&mut merged, file_value);
            config = merged.try_into()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Applies the env mapping on top of the defaults, before the file layer
    /// is merged in. The file is the higher-precedence layer: see
    /// [`merge_toml`], which lets file values override env/defaults while
    /// leaving fields the file doesn't mention untouched.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PHOTON_SOURCE_DIR") {
            self.storage.source_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PHOTON_PROCESSED_DIR") {
            self.storage.processed_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PHOTON_FACE_SERVICE_BASE_URL") {
            self.face_service.base_url = v;
        }
        if let Ok(v) = std::env::var("PHOTON_FACE_SERVICE_DETECT_KEY") {
            self.face_service.detect_api_key = v;
        } else if let Ok(v) = std::env::var("CLEPHO_FACE_API_KEY") {
            tracing::warn!(
                "CLEPHO_FACE_API_KEY is a legacy env var name; use PHOTON_FACE_SERVICE_DETECT_KEY"
            );
            self.face_service.detect_api_key = v;
        }
        if let Ok(v) = std::env::var("PHOTON_FACE_SERVICE_RECOGNIZE_KEY") {
            self.face_service.recognize_api_key = v;
        }
    }

    /// Programmatic partial update (layer 4). Re-validates before committing;
    /// on failure the config is left unchanged.
    pub fn apply_overrides(&mut self, patch: impl FnOnce(&mut Config)) -> Result<(), EngineError> {
        let mut candidate = self.clone();
        patch(&mut candidate);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut errors = Vec::new();

        if !self.storage.source_dir.exists() {
            errors.push(format!(
                "storage.source_dir does not exist: {}",
                self.storage.source_dir.display()
            ));
        }
        self.image.validate(&mut errors);
        self.server.validate(&mut errors);

        if self.face_service.max_concurrency == 0 {
            errors.push("face_service.max_concurrency must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(errors.join("; ")))
        }
    }

    /// env var → field names recognized for documentation/tooling purposes.
    pub fn env_mapping() -> &'static [(&'static str, &'static str)] {
        ENV_MAPPING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_image_settings() {
        let c = ImageConfig::default();
        let mut errors = Vec::new();
        c.validate(&mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn image_config_rejects_out_of_range_thumbnail_size() {
        let c = ImageConfig {
            thumbnail_size: 10,
            jpeg_quality: 85,
        };
        let mut errors = Vec::new();
        c.validate(&mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn sqlite_path_resolves_relative_names_against_base_dir() {
        let db = DatabaseConfig::default();
        let base = PathBuf::from("/tmp/photon");
        assert_eq!(db.sqlite_path(&base), base.join("photon.sqlite3"));
    }

    #[test]
    fn apply_overrides_rejects_invalid_patch_and_keeps_original() {
        let mut config = Config::default();
        config.storage.source_dir = std::env::temp_dir();
        let result = config.apply_overrides(|c| c.image.jpeg_quality = 0);
        assert!(result.is_err());
        assert_ne!(config.image.jpeg_quality, 0);
    }

    #[test]
    fn merge_toml_overlays_only_the_keys_the_overlay_sets() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [face_service]
            base_url = "http://env-applied:8000"
            timeout_secs = 30
            "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [face_service]
            timeout_secs = 99
            "#,
        )
        .unwrap();

        merge_toml(&mut base, overlay);

        let face_service = base.get("face_service").unwrap();
        assert_eq!(face_service.get("base_url").unwrap().as_str(), Some("http://env-applied:8000"));
        assert_eq!(face_service.get("timeout_secs").unwrap().as_integer(), Some(99));
    }

    #[test]
    fn load_from_lets_the_file_win_over_environment_for_the_fields_it_sets() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
                [storage]
                source_dir = "{}"

                [face_service]
                base_url = "http://from-file:9000"
                "#,
                dir.path().display()
            ),
        )
        .unwrap();

        std::env::set_var("PHOTON_FACE_SERVICE_BASE_URL", "http://from-env:9000");
        std::env::set_var("PHOTON_FACE_SERVICE_RECOGNIZE_KEY", "env-recognize-key");
        let loaded = Config::load_from(&config_path);
        std::env::remove_var("PHOTON_FACE_SERVICE_BASE_URL");
        std::env::remove_var("PHOTON_FACE_SERVICE_RECOGNIZE_KEY");
        let loaded = loaded.unwrap();

        // The file sets face_service.base_url explicitly, so it wins over the
        // environment variable even though the env layer is applied first.
        assert_eq!(loaded.face_service.base_url, "http://from-file:9000");
        // The file never mentions face_service.recognize_api_key, so the
        // environment-applied value survives the merge.
        assert_eq!(loaded.face_service.recognize_api_key, "env-recognize-key");
    }
}
