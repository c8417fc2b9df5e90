//! Dominant color extraction (§4.E step 4).
//!
//! No predecessor counterpart; written fresh against the `image` crate
//! already in the dependency stack rather than pulling in a palette crate
//! for a single quantize-and-count pass.

use anyhow::Result;
use image::GenericImageView;
use std::collections::HashMap;
use std::path::Path;

/// Bucket width per channel. 32 buckets/channel keeps the histogram small
/// (32^3 = 32768 entries worst case) while still distinguishing hues.
const BUCKET: u32 = 8;

/// Returns the most common quantized color as `#rrggbb`, sampling on a
/// thumbnail-sized copy so large originals don't pay full-resolution cost.
pub fn dominant_color(path: &Path) -> Result<String> {
    let img = image::open(path)?;
    let sample = img.thumbnail(120, 120);

    let mut counts: HashMap<(u8, u8, u8), u32> = HashMap::new();
    for (_, _, pixel) in sample.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < 16 {
            continue;
        }
        let bucketed = (quantize(r), quantize(g), quantize(b));
        *counts.entry(bucketed).or_insert(0) += 1;
    }

    let winner = counts.into_iter().max_by_key(|(_, count)| *count).map(|(rgb, _)| rgb);
    Ok(match winner {
        Some((r, g, b)) => format!("#{r:02x}{g:02x}{b:02x}"),
        None => default_color(),
    })
}

fn quantize(channel: u8) -> u8 {
    ((channel as u32 / BUCKET) * BUCKET) as u8
}

/// White, per §4.E invariant 4: a failed extractor degrades to a default
/// value rather than failing the image.
pub fn default_color() -> String {
    "#ffffff".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn solid_color_image_reports_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.png");
        let img = RgbaImage::from_pixel(40, 40, Rgba([200, 40, 40, 255]));
        img.save(&path).unwrap();

        let color = dominant_color(&path).unwrap();
        assert_eq!(color, "#c82828");
    }

    #[test]
    fn missing_file_is_handled_by_caller_via_default() {
        assert!(dominant_color(Path::new("/no/such/file.png")).is_err());
        assert_eq!(default_color(), "#ffffff");
    }
}
