//! EXIF extraction and date-priority resolution (§4.E steps 4 & 7).
//!
//! Grounded on the predecessor's `scanner/metadata.rs`, which read the same
//! fields with the same `kamadak-exif` crate; extended with the additional
//! metadata fields (`flash`, `white_balance`, `exposure_program`, GPS
//! refinements, `creator`) the persisted `ImageMetadata` entity carries.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ExifData {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub software: Option<String>,
    pub lens: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub exposure_secs: Option<f64>,
    pub iso: Option<i64>,
    pub flash: Option<String>,
    pub white_balance: Option<String>,
    pub exposure_program: Option<String>,
    pub gps_dop: Option<f64>,
    pub gps_satellites: Option<String>,
    pub gps_h_error: Option<f64>,
    pub creator: Option<String>,
    pub raw_exif_json: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
    pub date_time_original: Option<String>,
    pub date_time_digitized: Option<String>,
    pub date_time: Option<String>,
}

fn display(field: &exif::Field) -> String {
    field.display_value().to_string().trim_matches('"').to_string()
}

fn rational_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Rational(v) => v.first().map(|r| r.num as f64 / r.denom as f64),
        Value::SRational(v) => v.first().map(|r| r.num as f64 / r.denom as f64),
        _ => None,
    }
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag, negative_refs: &[&str]) -> Option<f64> {
    let value_field = exif.get_field(value_tag, In::PRIMARY)?;
    let ref_field = exif.get_field(ref_tag, In::PRIMARY)?;
    if let Value::Rational(parts) = &value_field.value {
        if parts.len() >= 3 {
            let decimal = dms_to_decimal(
                parts[0].num as f64 / parts[0].denom as f64,
                parts[1].num as f64 / parts[1].denom as f64,
                parts[2].num as f64 / parts[2].denom as f64,
            );
            let ref_str = display(ref_field);
            let negate = negative_refs.iter().any(|r| ref_str.contains(r));
            return Some(if negate { -decimal } else { decimal });
        }
    }
    None
}

fn flash_description(code: u16) -> String {
    if code & 0x1 != 0 { "fired".to_string() } else { "not_fired".to_string() }
}

fn white_balance_description(code: u16) -> String {
    match code {
        0 => "auto".to_string(),
        1 => "manual".to_string(),
        other => format!("unknown({other})"),
    }
}

fn exposure_program_description(code: u16) -> String {
    match code {
        1 => "manual",
        2 => "normal",
        3 => "aperture_priority",
        4 => "shutter_priority",
        5 => "creative",
        6 => "action",
        7 => "portrait",
        8 => "landscape",
        _ => "unknown",
    }
    .to_string()
}

/// Reads EXIF metadata from a file. Returns `Ok(ExifData::default())` for
/// images with no EXIF segment (PNG, GIF) rather than failing — per §4.E
/// invariant 4, a missing EXIF segment degrades to defaults, it does not
/// fail the image.
pub fn extract(path: &Path) -> Result<ExifData> {
    let mut data = ExifData::default();

    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(data),
    };
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return Ok(data),
    };

    if let Some(f) = exif.get_field(Tag::Make, In::PRIMARY) {
        data.camera_make = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::Model, In::PRIMARY) {
        data.camera_model = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::Software, In::PRIMARY) {
        data.software = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::LensModel, In::PRIMARY) {
        data.lens = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::Artist, In::PRIMARY) {
        data.creator = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::FocalLength, In::PRIMARY) {
        data.focal_length = rational_f64(&f.value);
    }
    if let Some(f) = exif.get_field(Tag::FNumber, In::PRIMARY) {
        data.aperture = rational_f64(&f.value);
    }
    if let Some(f) = exif.get_field(Tag::ExposureTime, In::PRIMARY) {
        data.shutter_speed = Some(display(f));
        data.exposure_secs = rational_f64(&f.value);
    }
    if let Some(f) = exif.get_field(Tag::PhotographicSensitivity, In::PRIMARY) {
        if let Value::Short(v) = &f.value {
            data.iso = v.first().map(|&iso| iso as i64);
        }
    }
    if let Some(f) = exif.get_field(Tag::Flash, In::PRIMARY) {
        if let Value::Short(v) = &f.value {
            data.flash = v.first().map(|&code| flash_description(code));
        }
    }
    if let Some(f) = exif.get_field(Tag::WhiteBalance, In::PRIMARY) {
        if let Value::Short(v) = &f.value {
            data.white_balance = v.first().map(|&code| white_balance_description(code));
        }
    }
    if let Some(f) = exif.get_field(Tag::ExposureProgram, In::PRIMARY) {
        if let Value::Short(v) = &f.value {
            data.exposure_program = v.first().map(|&code| exposure_program_description(code));
        }
    }
    if let Some(f) = exif.get_field(Tag::GPSDOP, In::PRIMARY) {
        data.gps_dop = rational_f64(&f.value);
    }
    if let Some(f) = exif.get_field(Tag::GPSSatellites, In::PRIMARY) {
        data.gps_satellites = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::GPSHPositioningError, In::PRIMARY) {
        data.gps_h_error = rational_f64(&f.value);
    }
    if let Some(f) = exif.get_field(Tag::GPSAltitude, In::PRIMARY) {
        data.gps_altitude = rational_f64(&f.value);
    }
    data.gps_latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, &["S"]);
    data.gps_longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, &["W"]);

    if let Some(f) = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
        data.date_time_original = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::DateTimeDigitized, In::PRIMARY) {
        data.date_time_digitized = Some(display(f));
    }
    if let Some(f) = exif.get_field(Tag::DateTime, In::PRIMARY) {
        data.date_time = Some(display(f));
    }

    data.raw_exif_json = serialize_all(&exif);
    Ok(data)
}

fn serialize_all(exif: &exif::Exif) -> Option<String> {
    let mut fields: HashMap<String, serde_json::Value> = HashMap::new();
    for field in exif.fields() {
        let ifd = match field.ifd_num {
            In::PRIMARY => "primary",
            In::THUMBNAIL => "thumbnail",
            _ => "other",
        };
        let key = format!("{}:{}", ifd, field.tag);
        fields.insert(key, json_value(&field.value));
    }
    serde_json::to_string(&fields).ok()
}

fn json_value(value: &Value) -> serde_json::Value {
    use serde_json::json;
    match value {
        Value::Byte(v) => json!(v),
        Value::Ascii(v) => {
            let strings: Vec<String> = v.iter().map(|b| String::from_utf8_lossy(b).to_string()).collect();
            if strings.len() == 1 { json!(strings[0]) } else { json!(strings) }
        }
        Value::Short(v) => if v.len() == 1 { json!(v[0]) } else { json!(v) },
        Value::Long(v) => if v.len() == 1 { json!(v[0]) } else { json!(v) },
        Value::Rational(v) => {
            let floats: Vec<f64> = v.iter().map(|r| r.num as f64 / r.denom as f64).collect();
            if floats.len() == 1 { json!(floats[0]) } else { json!(floats) }
        }
        Value::SByte(v) => json!(v),
        Value::Undefined(v, _) => {
            if v.len() > 1024 {
                json!({"type": "binary", "size": v.len()})
            } else {
                json!(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, v))
            }
        }
        Value::SShort(v) => if v.len() == 1 { json!(v[0]) } else { json!(v) },
        Value::SLong(v) => if v.len() == 1 { json!(v[0]) } else { json!(v) },
        Value::SRational(v) => {
            let floats: Vec<f64> = v.iter().map(|r| r.num as f64 / r.denom as f64).collect();
            if floats.len() == 1 { json!(floats[0]) } else { json!(floats) }
        }
        Value::Float(v) => if v.len() == 1 { json!(v[0]) } else { json!(v) },
        Value::Double(v) => if v.len() == 1 { json!(v[0]) } else { json!(v) },
        Value::Unknown(t, c, o) => json!({"unknown_type": t, "count": c, "offset": o}),
    }
}

fn parse_exif_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S").ok().map(|dt| dt.and_utc())
}

/// Resolves `date_taken` with the priority chain from §4.E step 7:
/// `DateTimeOriginal` > `CreateDate` > `DateCreated` > `ModifyDate` >
/// `FileModifyDate` > `FileCreateDate`. Only `DateTimeOriginal` (original
/// capture), `CreateDate` (digitized) and `ModifyDate` have EXIF
/// counterparts; `DateCreated`/`FileModifyDate`/`FileCreateDate` collapse
/// into the filesystem mtime fallback since there is no EXIF or IPTC source
/// for them here.
pub fn resolve_taken_at(exif: &ExifData, file_mtime: DateTime<Utc>) -> DateTime<Utc> {
    exif.date_time_original
        .as_deref()
        .and_then(parse_exif_datetime)
        .or_else(|| exif.date_time_digitized.as_deref().and_then(parse_exif_datetime))
        .or_else(|| exif.date_time.as_deref().and_then(parse_exif_datetime))
        .unwrap_or(file_mtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_exif_segment_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        std::fs::write(&path, b"not a real png").unwrap();

        let data = extract(&path).unwrap();
        assert!(data.camera_make.is_none());
        assert!(data.exposure_secs.is_none());
    }

    #[test]
    fn rational_f64_converts_exposure_time_to_seconds() {
        let value = Value::Rational(vec![exif::Rational { num: 1, denom: 200 }]);
        assert_eq!(rational_f64(&value), Some(0.005));
    }

    #[test]
    fn date_priority_prefers_original_over_digitized() {
        let mut data = ExifData::default();
        data.date_time_original = Some("2010:05:01 12:00:00".to_string());
        data.date_time_digitized = Some("2011:01:01 00:00:00".to_string());

        let resolved = resolve_taken_at(&data, Utc::now());
        assert_eq!(resolved.format("%Y-%m-%dT%H:%M:%S").to_string(), "2010-05-01T12:00:00");
    }

    #[test]
    fn falls_back_to_file_mtime_when_no_dates_present() {
        let data = ExifData::default();
        let mtime = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z").unwrap().with_timezone(&Utc);

        assert_eq!(resolve_taken_at(&data, mtime), mtime);
    }
}
