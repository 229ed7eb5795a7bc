// ============================================================
// Layer 4 — Preprocessing
// ============================================================
// Two cleaners sit between raw files and model-ready samples:
//
//   TextCleaner       → captions: control characters and odd
//                       Unicode spaces become plain spaces, runs of
//                       whitespace collapse, edges are trimmed
//
//   ImagePreprocessor → pixels: decode, RGB, resize to the model's
//                       input shape, optional horizontal flip, then
//                       per-channel normalisation into CHW order
//
// Mean/std are the statistics the CLIP family of image encoders is
// trained with.

use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use std::path::Path;

pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD:  [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

// ─── TextCleaner ──────────────────────────────────────────────────────────────
pub struct TextCleaner;

impl TextCleaner {
    pub fn new() -> Self {
        Self
    }

    /// Normalise a caption to single-spaced, trimmed text.
    pub fn clean(&self, text: &str) -> String {
        let normalised: String = text
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            })
            .collect();

        // split_whitespace drops the runs and the edges in one pass
        normalised.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self::new()
    }
}

// ─── ImagePreprocessor ────────────────────────────────────────────────────────
/// Turns an image file into a normalised `[3, height, width]` f32 buffer.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    pub height: usize,
    pub width:  usize,
    mean:       [f32; 3],
    std:        [f32; 3],
}

impl ImagePreprocessor {
    /// `input_shape` is `[height, width]`
    pub fn new(input_shape: [usize; 2]) -> Self {
        Self {
            height: input_shape[0],
            width:  input_shape[1],
            mean:   CLIP_MEAN,
            std:    CLIP_STD,
        }
    }

    /// Check that `path` decodes fully, pixel data included.
    pub fn verify(&self, path: &Path) -> Result<()> {
        image::open(path)
            .with_context(|| format!("Cannot decode image '{}'", path.display()))?;
        Ok(())
    }

    /// Decode, resize, optionally mirror, and normalise one image.
    pub fn load(&self, path: &Path, flip: bool) -> Result<Vec<f32>> {
        let img = image::open(path)
            .with_context(|| format!("Cannot decode image '{}'", path.display()))?
            .to_rgb8();
        Ok(self.process(&img, flip))
    }

    /// Resize + normalise an already decoded RGB image.
    pub fn process(&self, img: &RgbImage, flip: bool) -> Vec<f32> {
        let mut resized = imageops::resize(
            img,
            self.width as u32,
            self.height as u32,
            FilterType::Triangle,
        );
        if flip {
            imageops::flip_horizontal_in_place(&mut resized);
        }

        // HWC bytes → CHW normalised floats
        let plane   = self.height * self.width;
        let mut out = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                out[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }
}
