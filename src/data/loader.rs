// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads image–text pairs from a dataset root laid out as:
//
//   <root>/train.jsonl      required
//   <root>/val.jsonl        optional
//   <root>/images/...       any layout, referenced relatively
//
// Each non-blank line is one JSON object:
//   {"image": "images/0001.jpg", "text": "a red bicycle", "label": 3}
//
// `label` may be omitted. Such records get a fresh label that no
// other record uses, so they are only positive with themselves.
//
// When val.jsonl is absent the training file is split with the
// seeded splitter.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::splitter::split_train_val;
use crate::domain::pair::{DatasetSplits, PairRecord};
use crate::domain::traits::PairSource;

const TRAIN_FILE: &str = "train.jsonl";
const VAL_FILE:   &str = "val.jsonl";

/// One line of a .jsonl annotation file, before path resolution.
#[derive(Debug, Deserialize)]
struct RawRecord {
    image: String,
    text:  String,
    #[serde(default)]
    label: Option<i64>,
}

/// Loads pairs from `train.jsonl` / `val.jsonl` under a root directory.
/// Implements the PairSource trait from Layer 3.
pub struct JsonlPairSource {
    root:         PathBuf,
    val_fraction: f64,
    seed:         u64,
}

impl JsonlPairSource {
    pub fn new(root: impl Into<PathBuf>, val_fraction: f64, seed: u64) -> Self {
        Self {
            root: root.into(),
            val_fraction,
            seed,
        }
    }
}

impl PairSource for JsonlPairSource {
    fn load_splits(&self) -> Result<DatasetSplits> {
        let root = self.root.as_path();

        if !root.is_dir() {
            bail!("Dataset root '{}' does not exist or is not a directory", root.display());
        }

        let train_path = root.join(TRAIN_FILE);
        if !train_path.is_file() {
            bail!("Dataset root '{}' has no {}", root.display(), TRAIN_FILE);
        }

        let mut train_raw = read_jsonl(&train_path)?;
        let val_path      = root.join(VAL_FILE);
        let mut val_raw   = if val_path.is_file() {
            read_jsonl(&val_path)?
        } else {
            Vec::new()
        };

        if train_raw.is_empty() {
            bail!("'{}' contains no records", train_path.display());
        }

        // Fresh labels start past every explicit label in either file
        let mut next_label = train_raw
            .iter()
            .chain(val_raw.iter())
            .filter_map(|r| r.label)
            .max()
            .map_or(0, |m| m + 1);

        let train = resolve(root, &mut train_raw, &mut next_label)?;
        let val   = resolve(root, &mut val_raw,   &mut next_label)?;

        let splits = if val_path.is_file() {
            if val.is_empty() {
                bail!("'{}' exists but contains no records", val_path.display());
            }
            DatasetSplits::new(train, val)
        } else {
            tracing::info!(
                "No {} in '{}', holding out {:.0}% of {} for validation",
                VAL_FILE,
                root.display(),
                self.val_fraction * 100.0,
                TRAIN_FILE,
            );
            let (train, val) = split_train_val(train, 1.0 - self.val_fraction, self.seed);
            DatasetSplits::new(train, val)
        };

        tracing::info!(
            "Loaded dataset '{}': {} train pairs, {} validation pairs",
            root.display(),
            splits.train.len(),
            splits.val.len()
        );
        Ok(splits)
    }
}

/// Load both splits from a dataset root.
pub fn load_dataset(root: impl AsRef<Path>, val_fraction: f64, seed: u64) -> Result<DatasetSplits> {
    JsonlPairSource::new(root.as_ref(), val_fraction, seed).load_splits()
}

/// Parse a .jsonl file, skipping blank lines.
fn read_jsonl(path: &Path) -> Result<Vec<RawRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed record", path.display(), line_no + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Resolve image paths against the root and fill in missing labels.
/// Every referenced image must exist.
fn resolve(root: &Path, raw: &mut [RawRecord], next_label: &mut i64) -> Result<Vec<PairRecord>> {
    let mut records = Vec::with_capacity(raw.len());

    for r in raw.iter_mut() {
        let image = root.join(&r.image);
        if !image.is_file() {
            bail!("Image '{}' referenced by the dataset does not exist", image.display());
        }

        let label = match r.label {
            Some(label) => label,
            None => {
                let label = *next_label;
                *next_label += 1;
                label
            }
        };

        records.push(PairRecord::new(image, std::mem::take(&mut r.text), label));
    }

    Ok(records)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch_images(root: &Path, names: &[&str]) {
        fs::create_dir_all(root.join("images")).unwrap();
        for name in names {
            fs::write(root.join("images").join(name), b"not decoded here").unwrap();
        }
    }

    #[test]
    fn test_missing_root_fails_fast() {
        let err = load_dataset("/definitely/not/here", 0.1, 42).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_empty_train_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TRAIN_FILE), "\n\n").unwrap();
        let err = load_dataset(dir.path(), 0.1, 42).unwrap_err();
        assert!(err.to_string().contains("no records"));
    }

    #[test]
    fn test_missing_image_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(TRAIN_FILE),
            r#"{"image": "images/ghost.png", "text": "nothing", "label": 0}"#,
        )
        .unwrap();
        let err = load_dataset(dir.path(), 0.1, 42).unwrap_err();
        assert!(err.to_string().contains("ghost.png"));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = TempDir::new().unwrap();
        touch_images(dir.path(), &["a.png"]);
        fs::write(
            dir.path().join(TRAIN_FILE),
            "{\"image\": \"images/a.png\", \"text\": \"ok\"}\n{not json}\n",
        )
        .unwrap();
        let err = load_dataset(dir.path(), 0.1, 42).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }

    #[test]
    fn test_explicit_val_file_and_fresh_labels() {
        let dir = TempDir::new().unwrap();
        touch_images(dir.path(), &["a.png", "b.png", "c.png"]);
        fs::write(
            dir.path().join(TRAIN_FILE),
            concat!(
                "{\"image\": \"images/a.png\", \"text\": \"cat\", \"label\": 4}\n",
                "{\"image\": \"images/b.png\", \"text\": \"dog\"}\n",
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join(VAL_FILE),
            "{\"image\": \"images/c.png\", \"text\": \"bird\"}\n",
        )
        .unwrap();

        let splits = load_dataset(dir.path(), 0.1, 42).unwrap();

        assert_eq!(splits.train.len(), 2);
        assert_eq!(splits.val.len(), 1);
        assert_eq!(splits.train[0].label, 4);
        assert_eq!(splits.train[1].label, 5);
        assert_eq!(splits.val[0].label, 6);
        assert!(splits.train[0].image.ends_with("images/a.png"));
    }

    #[test]
    fn test_split_when_val_file_absent() {
        let dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..10).map(|i| format!("{i}.png")).collect();
        let refs: Vec<&str>    = names.iter().map(String::as_str).collect();
        touch_images(dir.path(), &refs);

        let lines: String = names
            .iter()
            .map(|n| format!("{{\"image\": \"images/{n}\", \"text\": \"t {n}\"}}\n"))
            .collect();
        fs::write(dir.path().join(TRAIN_FILE), lines).unwrap();

        let splits = load_dataset(dir.path(), 0.2, 7).unwrap();
        assert_eq!(splits.train.len(), 8);
        assert_eq!(splits.val.len(), 2);
    }
}
