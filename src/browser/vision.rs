// ABOUTME: Grayscale template matching for image-based click targeting
// ABOUTME: Scores candidate positions with normalized cross-correlation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::GrayImage;
use std::path::Path;

use crate::engine::error::{EngineError, Result};

/// A located template occurrence, in screenshot pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Center of the matched region.
    pub x: u32,
    pub y: u32,
    /// Normalized cross-correlation score, 0.0..=1.0.
    pub confidence: f32,
}

/// Decode a base64 screenshot into grayscale for matching.
pub fn decode_screenshot(base64_png: &str) -> Result<GrayImage> {
    let bytes = STANDARD
        .decode(base64_png.as_bytes())
        .map_err(|e| EngineError::ScreenshotFailed {
            reason: format!("invalid base64 screenshot: {e}"),
        })?;
    let img = image::load_from_memory(&bytes).map_err(|e| EngineError::ScreenshotFailed {
        reason: format!("undecodable screenshot: {e}"),
    })?;
    Ok(img.to_luma8())
}

/// Load a click template from disk.
pub fn load_template(path: &str) -> Result<GrayImage> {
    if !Path::new(path).exists() {
        return Err(EngineError::ActionFailed {
            action: "click".to_string(),
            reason: format!("template image not found: {path}"),
        });
    }
    let img = image::open(path).map_err(|e| EngineError::ActionFailed {
        action: "click".to_string(),
        reason: format!("failed to load template {path}: {e}"),
    })?;
    Ok(img.to_luma8())
}

/// Find the best placement of `template` inside `haystack`.
///
/// Returns `None` when the template does not fit or the best score falls
/// below `min_confidence`. Exhaustive search; templates are small UI
/// fragments, so the window count stays manageable.
pub fn find_template(
    haystack: &GrayImage,
    template: &GrayImage,
    min_confidence: f32,
) -> Option<TemplateMatch> {
    let (hw, hh) = haystack.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return None;
    }

    let template_pixels: Vec<f64> = template.pixels().map(|p| p.0[0] as f64).collect();
    let t_mean = template_pixels.iter().sum::<f64>() / template_pixels.len() as f64;
    let t_dev: Vec<f64> = template_pixels.iter().map(|v| v - t_mean).collect();
    let t_norm = t_dev.iter().map(|v| v * v).sum::<f64>().sqrt();
    if t_norm == 0.0 {
        // A flat template matches everything equally; refuse it.
        return None;
    }

    let mut best: Option<TemplateMatch> = None;

    for oy in 0..=(hh - th) {
        for ox in 0..=(hw - tw) {
            let mut window = Vec::with_capacity(t_dev.len());
            for ty in 0..th {
                for tx in 0..tw {
                    window.push(haystack.get_pixel(ox + tx, oy + ty).0[0] as f64);
                }
            }
            let w_mean = window.iter().sum::<f64>() / window.len() as f64;

            let mut dot = 0.0;
            let mut w_norm_sq = 0.0;
            for (w, t) in window.iter().zip(t_dev.iter()) {
                let wd = w - w_mean;
                dot += wd * t;
                w_norm_sq += wd * wd;
            }
            if w_norm_sq == 0.0 {
                continue;
            }

            let score = (dot / (w_norm_sq.sqrt() * t_norm)) as f32;
            if best.map_or(true, |b| score > b.confidence) {
                best = Some(TemplateMatch {
                    x: ox + tw / 2,
                    y: oy + th / 2,
                    confidence: score,
                });
            }
        }
    }

    best.filter(|m| m.confidence >= min_confidence)
}
