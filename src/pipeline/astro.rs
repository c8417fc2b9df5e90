//! Astrophotography detection (§4.E "Astrophotography detection").
//!
//! No predecessor counterpart. Star candidates are connected components of
//! bright pixels, found with a simple flood fill — adequate at thumbnail
//! resolution, no need for a vision crate.

use anyhow::Result;
use image::{GenericImageView, GrayImage};
use std::path::Path;

const DARK_RATIO_THRESHOLD: f64 = 0.6;
const STAR_BRIGHTNESS: u8 = 150;
const STAR_MIN_SIZE: usize = 1;
const STAR_MAX_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstroClass {
    Stars,
    DenseStarField,
    MoonPlanets,
    DeepSpace,
}

impl AstroClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AstroClass::Stars => "stars",
            AstroClass::DenseStarField => "dense_star_field",
            AstroClass::MoonPlanets => "moon_planets",
            AstroClass::DeepSpace => "deep_space",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AstroVerdict {
    pub is_astro: bool,
    pub confidence: f64,
    pub classification: Option<AstroClass>,
    pub star_count: usize,
}

pub struct AstroInput {
    pub exposure_secs: Option<f64>,
    pub iso: Option<i64>,
}

const THRESHOLD: f64 = 0.5;

pub fn detect(path: &Path, input: &AstroInput) -> Result<AstroVerdict> {
    let img = image::open(path)?;
    let gray = img.thumbnail(400, 400).to_luma8();

    let total = (gray.width() * gray.height()).max(1) as f64;
    let dark_pixels = gray.pixels().filter(|p| p.0[0] < 40).count() as f64;
    let dark_ratio = dark_pixels / total;

    let brightness_sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let avg_brightness = brightness_sum as f64 / total;

    let (min, max) = gray.pixels().fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    let contrast_ratio = (max as f64 - min as f64) / 255.0;

    let star_count = count_star_candidates(&gray);

    let mut score = 0.0;
    if dark_ratio >= DARK_RATIO_THRESHOLD {
        score += 0.3;
    }
    if star_count >= 50 {
        score += 0.4;
    } else if star_count >= 10 {
        score += 0.2;
    }
    if avg_brightness <= 30.0 {
        score += 0.2;
    }
    if contrast_ratio >= 0.3 {
        score += 0.1;
    }
    if input.exposure_secs.map(|s| s > 5.0).unwrap_or(false) {
        score += 0.1;
    }
    if input.iso.map(|iso| iso > 1600).unwrap_or(false) {
        score += 0.05;
    }

    let is_astro = score >= THRESHOLD;
    let classification = if !is_astro {
        None
    } else if star_count >= 200 {
        Some(AstroClass::DenseStarField)
    } else if star_count >= 10 {
        Some(AstroClass::Stars)
    } else if avg_brightness > 60.0 {
        Some(AstroClass::MoonPlanets)
    } else {
        Some(AstroClass::DeepSpace)
    };

    Ok(AstroVerdict { is_astro, confidence: score.min(1.0), classification, star_count })
}

/// Flood-fills connected components of pixels at or above [`STAR_BRIGHTNESS`],
/// counting those whose size falls in `[STAR_MIN_SIZE, STAR_MAX_SIZE]` —
/// large enough to not be noise, small enough to not be the moon or a cloud.
fn count_star_candidates(gray: &GrayImage) -> usize {
    let (w, h) = gray.dimensions();
    let mut visited = vec![false; (w * h) as usize];
    let mut count = 0;

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if visited[idx] || gray.get_pixel(x, y).0[0] < STAR_BRIGHTNESS {
                continue;
            }

            let mut stack = vec![(x, y)];
            visited[idx] = true;
            let mut size = 0usize;

            while let Some((cx, cy)) = stack.pop() {
                size += 1;
                for (nx, ny) in neighbors(cx, cy, w, h) {
                    let nidx = (ny * w + nx) as usize;
                    if !visited[nidx] && gray.get_pixel(nx, ny).0[0] >= STAR_BRIGHTNESS {
                        visited[nidx] = true;
                        stack.push((nx, ny));
                    }
                }
            }

            if (STAR_MIN_SIZE..=STAR_MAX_SIZE).contains(&size) {
                count += 1;
            }
        }
    }
    count
}

fn neighbors(x: u32, y: u32, w: u32, h: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(4);
    if x > 0 {
        out.push((x - 1, y));
    }
    if x + 1 < w {
        out.push((x + 1, y));
    }
    if y > 0 {
        out.push((x, y - 1));
    }
    if y + 1 < h {
        out.push((x, y + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbaImage};

    #[test]
    fn solid_gray_image_is_not_astro() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        let img = RgbaImage::from_pixel(60, 60, image::Rgba([128, 128, 128, 255]));
        img.save(&path).unwrap();

        let verdict = detect(&path, &AstroInput { exposure_secs: None, iso: None }).unwrap();
        assert!(!verdict.is_astro);
    }

    #[test]
    fn star_count_ignores_blobs_larger_than_max_size() {
        let mut gray = GrayImage::from_pixel(20, 20, Luma([10]));
        for x in 5..15 {
            for y in 5..15 {
                gray.put_pixel(x, y, Luma([200]));
            }
        }
        assert_eq!(count_star_candidates(&gray), 0);
    }

    #[test]
    fn star_count_finds_isolated_bright_pixel() {
        let mut gray = GrayImage::from_pixel(20, 20, Luma([10]));
        gray.put_pixel(10, 10, Luma([200]));
        assert_eq!(count_star_candidates(&gray), 1);
    }
}
