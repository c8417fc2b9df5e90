//! Face crop extraction (§4.E "Face crop extraction").
//!
//! Grounded on `store::apply_rotation`'s rotate90/180/270 idiom; the
//! orientation-aware bbox transform has no direct predecessor since the
//! predecessor's face cropping never accounted for EXIF orientation.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use std::path::Path;

use crate::db::objects::BoundingBox;

/// Transforms a bounding box given in *display* orientation (what a viewer
/// sees after the image viewer applies EXIF orientation) into the
/// coordinate space of the *raw*, undecoded raster, per the EXIF orientation
/// tag. `display_w`/`display_h` are the dimensions as displayed.
fn bbox_to_raw(bbox: &BoundingBox, orientation: u16, display_w: f64, display_h: f64) -> BoundingBox {
    match orientation {
        3 => BoundingBox {
            x: display_w - bbox.x - bbox.width,
            y: display_h - bbox.y - bbox.height,
            width: bbox.width,
            height: bbox.height,
        },
        6 => BoundingBox { x: bbox.y, y: display_w - bbox.x - bbox.width, width: bbox.height, height: bbox.width },
        8 => BoundingBox { x: display_h - bbox.y - bbox.height, y: bbox.x, width: bbox.height, height: bbox.width },
        5 => BoundingBox { x: bbox.y, y: bbox.x, width: bbox.height, height: bbox.width },
        7 => BoundingBox {
            x: display_h - bbox.y - bbox.height,
            y: display_w - bbox.x - bbox.width,
            width: bbox.height,
            height: bbox.width,
        },
        _ => bbox.clone(),
    }
}

/// Degrees to rotate a crop taken from the raw raster so the face ends up
/// upright, matching [`crate::store`]'s rotation convention.
fn rotation_for_orientation(orientation: u16) -> i32 {
    match orientation {
        3 => 180,
        6 => 90,
        8 => 270,
        _ => 0,
    }
}

/// Crops `bbox` (display-orientation coordinates) out of the raw image at
/// `source_path`, rotates it upright, and writes it to `dest_path`.
pub fn extract_face_crop(
    source_path: &Path,
    dest_path: &Path,
    bbox: &BoundingBox,
    orientation: u16,
) -> Result<()> {
    let img = image::open(source_path).with_context(|| format!("opening {}", source_path.display()))?;
    let (raw_w, raw_h) = img.dimensions();

    let (display_w, display_h) = if matches!(orientation, 5 | 6 | 7 | 8) {
        (raw_h as f64, raw_w as f64)
    } else {
        (raw_w as f64, raw_h as f64)
    };

    let raw_bbox = bbox_to_raw(bbox, orientation, display_w, display_h);
    let (x, y, w, h) = clamp_to_bounds(&raw_bbox, raw_w, raw_h);
    if w == 0 || h == 0 {
        anyhow::bail!("face bounding box has zero area after clamping");
    }

    let cropped = img.crop_imm(x, y, w, h);
    let rotated = apply_rotation(cropped, rotation_for_orientation(orientation));

    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    rotated.save(dest_path).with_context(|| format!("writing {}", dest_path.display()))?;
    Ok(())
}

fn clamp_to_bounds(bbox: &BoundingBox, max_w: u32, max_h: u32) -> (u32, u32, u32, u32) {
    let x = bbox.x.max(0.0) as u32;
    let y = bbox.y.max(0.0) as u32;
    let x = x.min(max_w.saturating_sub(1));
    let y = y.min(max_h.saturating_sub(1));
    let w = (bbox.width.max(0.0) as u32).min(max_w - x);
    let h = (bbox.height.max(0.0) as u32).min(max_h - y);
    (x, y, w, h)
}

fn apply_rotation(img: DynamicImage, rotation_degrees: i32) -> DynamicImage {
    match rotation_degrees.rem_euclid(360) {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f64, y: f64, w: f64, h: f64) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h }
    }

    #[test]
    fn identity_orientation_leaves_bbox_unchanged() {
        let raw = bbox(10.0, 20.0, 30.0, 40.0);
        let transformed = bbox_to_raw(&raw, 1, 100.0, 200.0);
        assert_eq!(transformed.x, 10.0);
        assert_eq!(transformed.y, 20.0);
    }

    #[test]
    fn orientation_6_swaps_axes_and_rotates_90() {
        let raw = bbox(10.0, 20.0, 30.0, 40.0);
        let transformed = bbox_to_raw(&raw, 6, 100.0, 200.0);
        assert_eq!(transformed.width, 40.0);
        assert_eq!(transformed.height, 30.0);
        assert_eq!(rotation_for_orientation(6), 90);
    }

    #[test]
    fn orientation_3_is_a_180_flip() {
        let raw = bbox(0.0, 0.0, 30.0, 40.0);
        let transformed = bbox_to_raw(&raw, 3, 100.0, 200.0);
        assert_eq!(transformed.x, 70.0);
        assert_eq!(transformed.y, 160.0);
        assert_eq!(rotation_for_orientation(3), 180);
    }

    #[test]
    fn clamp_keeps_box_within_image_bounds() {
        let oversized = bbox(90.0, 90.0, 50.0, 50.0);
        let (x, y, w, h) = clamp_to_bounds(&oversized, 100, 100);
        assert!(x + w <= 100);
        assert!(y + h <= 100);
    }
}
