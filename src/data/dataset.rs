use anyhow::{bail, Result};
use burn::data::dataset::Dataset;
use rand::Rng;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

use crate::data::preprocessor::{ImagePreprocessor, TextCleaner};
use crate::domain::pair::PairRecord;
use crate::infra::tokenizer_store::{encode_caption, EncodedText};

/// One decoded (image, text, label) sample ready for collation.
#[derive(Debug, Clone)]
pub struct PairSample {
    /// Normalised pixels, CHW order, length 3 * height * width
    pub pixels:         Vec<f32>,
    pub height:         usize,
    pub width:          usize,
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub label:          i64,
}

/// Samples that failed to load inside `Dataset::get`.
///
/// burn reads a `None` from `get` as the end of the pass, so the
/// error itself is parked here and picked up by the epoch runner.
#[derive(Debug, Clone, Default)]
pub struct LoadErrors(Arc<Mutex<Vec<String>>>);

impl LoadErrors {
    fn push(&self, message: String) {
        if let Ok(mut errors) = self.0.lock() {
            errors.push(message);
        }
    }

    /// Fail with the first error recorded since the last check.
    pub fn check(&self, split: &str) -> Result<()> {
        let errors = match self.0.lock() {
            Ok(mut errors) => std::mem::take(&mut *errors),
            Err(_) => bail!("Load error record of the {split} split is poisoned"),
        };
        if let Some(first) = errors.first() {
            bail!("{} {split} sample(s) failed to load, first: {first}", errors.len());
        }
        Ok(())
    }
}

/// Index → sample view over a list of pair records.
///
/// Captions are tokenised up front; images are decoded on `get`, so
/// loader worker threads do the file I/O.
#[derive(Debug)]
pub struct SiameseDataset {
    records:    Vec<PairRecord>,
    encoded:    Vec<EncodedText>,
    preprocess: ImagePreprocessor,
    augment:    bool,
    errors:     LoadErrors,
}

impl SiameseDataset {
    /// Build a dataset. Every image is decoded once here so a bad
    /// file fails the run before the first epoch.
    pub fn new(
        input_shape:    [usize; 2],
        records:        Vec<PairRecord>,
        tokenizer:      &Tokenizer,
        context_length: usize,
        augment:        bool,
    ) -> Result<Self> {
        let preprocess = ImagePreprocessor::new(input_shape);
        let cleaner    = TextCleaner::new();

        let mut encoded = Vec::with_capacity(records.len());
        for record in &records {
            preprocess.verify(&record.image)?;
            encoded.push(encode_caption(tokenizer, &cleaner.clean(&record.text), context_length)?);
        }

        Ok(Self {
            records,
            encoded,
            preprocess,
            augment,
            errors: LoadErrors::default(),
        })
    }

    /// Handle on the errors `get` records; clones share one record.
    pub fn errors(&self) -> LoadErrors {
        self.errors.clone()
    }

    fn load(&self, index: usize) -> Result<Option<PairSample>> {
        let (Some(record), Some(text)) = (self.records.get(index), self.encoded.get(index)) else {
            return Ok(None);
        };

        let flip   = self.augment && rand::thread_rng().gen_bool(0.5);
        let pixels = self.preprocess.load(&record.image, flip)?;

        Ok(Some(PairSample {
            pixels,
            height:         self.preprocess.height,
            width:          self.preprocess.width,
            input_ids:      text.input_ids.clone(),
            attention_mask: text.attention_mask.clone(),
            label:          record.label,
        }))
    }
}

impl Dataset<PairSample> for SiameseDataset {
    fn get(&self, index: usize) -> Option<PairSample> {
        match self.load(index) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::error!("Cannot load sample {index}: {e:#}");
                self.errors.push(format!("sample {index}: {e:#}"));
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infra::tokenizer_store::TokenizerStore;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use tempfile::TempDir;

    /// Write `n` small solid-colour PNGs and return matching records.
    pub(crate) fn write_pairs(dir: &Path, n: usize) -> Vec<PairRecord> {
        std::fs::create_dir_all(dir.join("images")).unwrap();
        (0..n)
            .map(|i| {
                let path  = dir.join("images").join(format!("{i}.png"));
                let shade = (i * 40 % 256) as u8;
                RgbImage::from_pixel(12, 10, Rgb([shade, 255 - shade, 64]))
                    .save(&path)
                    .unwrap();
                PairRecord::new(path, format!("picture number {i}"), i as i64)
            })
            .collect()
    }

    #[test]
    fn test_get_returns_decoded_sample() {
        let dir     = TempDir::new().unwrap();
        let records = write_pairs(dir.path(), 3);
        let tok     = TokenizerStore::new(dir.path())
            .load_or_build(&["picture number".to_string()], 200)
            .unwrap();

        let ds = SiameseDataset::new([8, 8], records, &tok, 6, false).unwrap();
        assert_eq!(ds.len(), 3);

        let s = ds.get(2).unwrap();
        assert_eq!(s.pixels.len(), 3 * 8 * 8);
        assert_eq!(s.input_ids.len(), 6);
        assert_eq!(s.label, 2);
        assert!(ds.get(3).is_none());
    }

    #[test]
    fn test_unreadable_image_fails_construction() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&[], 200).unwrap();

        let records = vec![PairRecord::new(path, "broken", 0)];
        assert!(SiameseDataset::new([8, 8], records, &tok, 6, false).is_err());
    }

    /// Keep the PNG header but cut the pixel data short.
    pub(crate) fn truncate_image(path: &Path) {
        let bytes = std::fs::read(path).unwrap();
        std::fs::write(path, &bytes[..bytes.len() - 30]).unwrap();
    }

    #[test]
    fn test_truncated_image_fails_construction() {
        let dir     = TempDir::new().unwrap();
        let records = write_pairs(dir.path(), 2);
        truncate_image(&records[1].image);
        let tok = TokenizerStore::new(dir.path()).load_or_build(&[], 200).unwrap();

        let err = SiameseDataset::new([8, 8], records, &tok, 6, false).unwrap_err();
        assert!(format!("{err:#}").contains("1.png"));
    }

    #[test]
    fn test_failed_get_is_recorded() {
        let dir     = TempDir::new().unwrap();
        let records = write_pairs(dir.path(), 2);
        let tok     = TokenizerStore::new(dir.path()).load_or_build(&[], 200).unwrap();
        let ds      = SiameseDataset::new([8, 8], records.clone(), &tok, 6, false).unwrap();
        let errors  = ds.errors();

        std::fs::remove_file(&records[0].image).unwrap();
        assert!(ds.get(0).is_none());
        assert!(ds.get(1).is_some());

        let err = errors.check("validation").unwrap_err();
        assert!(err.to_string().contains("1 validation sample(s)"));
        // The record is drained by a check
        assert!(errors.check("validation").is_ok());
    }
}
