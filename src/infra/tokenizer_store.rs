// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads `<save_dir>/tokenizer.json` when it exists, otherwise
// builds a word-level vocabulary from the training captions and
// writes it there. Keeping the tokenizer next to the weights means
// a restarted run maps words to the same embedding rows.
//
// The JSON is written by hand in the HuggingFace format and read
// back with Tokenizer::from_file, which avoids the trainer API.

use anyhow::{Context, Result};
use std::{collections::HashMap, path::PathBuf};
use tokenizers::Tokenizer;

pub const PAD_ID:  u32 = 0;
pub const UNK_ID:  u32 = 1;
pub const CLS_ID:  u32 = 101;
pub const SEP_ID:  u32 = 102;
pub const MASK_ID: u32 = 103;

/// First id handed to a corpus word
const FIRST_WORD_ID: usize = 104;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load existing tokenizer or build a new one from texts
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        if self.path().exists() {
            tracing::info!("Loading existing tokenizer from '{}'", self.path().display());
            let tokenizer = self.load()?;
            self.check_fits(&tokenizer, vocab_size)?;
            Ok(tokenizer)
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.path();
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    /// Every id must index a row of the `vocab_size` embedding table.
    fn check_fits(&self, tokenizer: &Tokenizer, vocab_size: usize) -> Result<()> {
        let max_id = tokenizer.get_vocab(true).into_values().max().unwrap_or(0) as usize;
        anyhow::ensure!(
            max_id < vocab_size,
            "Tokenizer '{}' uses ids up to {} but vocab_size is {}; \
             raise --vocab-size or remove the file to rebuild it",
            self.path().display(),
            max_id,
            vocab_size
        );
        Ok(())
    }

    /// Build a word-level vocabulary whose ids all stay below
    /// `vocab_size`, write it as tokenizer JSON, and load it back.
    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        anyhow::ensure!(
            vocab_size > FIRST_WORD_ID,
            "vocab_size must exceed {} to leave room for corpus words",
            FIRST_WORD_ID
        );
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: Word frequencies ──────────────────────────────────────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in text.split_whitespace() {
                let w = word.to_lowercase();
                let w = w.trim_matches(|c: char| !c.is_alphanumeric());
                if !w.is_empty() {
                    *freq.entry(w.to_string()).or_insert(0) += 1;
                }
            }
        }

        // Most frequent first; ties broken alphabetically so two builds
        // over the same corpus agree
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size - FIRST_WORD_ID);

        // ── Step 2: Vocab JSON ────────────────────────────────────────────────
        let mut vocab = serde_json::json!({
            "[PAD]":  PAD_ID,
            "[UNK]":  UNK_ID,
            "[CLS]":  CLS_ID,
            "[SEP]":  SEP_ID,
            "[MASK]": MASK_ID,
        });

        let mut next_id = FIRST_WORD_ID;
        for (word, _) in &words {
            if vocab.get(word).is_none() {
                vocab[word] = serde_json::json!(next_id);
                next_id += 1;
            }
        }

        // ── Step 3: HuggingFace tokenizer JSON ────────────────────────────────
        let special = |id: u32, content: &str| {
            serde_json::json!({
                "id": id, "content": content, "single_word": false,
                "lstrip": false, "rstrip": false, "normalized": false, "special": true
            })
        };
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                special(PAD_ID,  "[PAD]"),
                special(UNK_ID,  "[UNK]"),
                special(CLS_ID,  "[CLS]"),
                special(SEP_ID,  "[SEP]"),
                special(MASK_ID, "[MASK]"),
            ],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let tok_path = self.path();
        std::fs::write(&tok_path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write tokenizer JSON to '{}'", tok_path.display()))?;

        tracing::info!(
            "Tokenizer built with {} words, saved to '{}'",
            next_id - FIRST_WORD_ID,
            tok_path.display()
        );

        self.load()
    }
}

/// Token ids and attention mask of one caption, padded to a fixed length.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedText {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// Encode `[CLS] text [SEP]`, truncated to `context_length` with the
/// closing `[SEP]` kept, then padded with `[PAD]`.
pub fn encode_caption(tokenizer: &Tokenizer, text: &str, context_length: usize) -> Result<EncodedText> {
    anyhow::ensure!(context_length >= 2, "context_length must be at least 2");

    let enc = tokenizer
        .encode(text, false)
        .map_err(|e| anyhow::anyhow!("Tokenisation error for '{text}': {e}"))?;

    let body = enc.get_ids();
    let keep = body.len().min(context_length - 2);

    let mut input_ids = Vec::with_capacity(context_length);
    input_ids.push(CLS_ID);
    input_ids.extend_from_slice(&body[..keep]);
    input_ids.push(SEP_ID);

    let real = input_ids.len();
    let mut attention_mask = vec![1u32; real];

    input_ids.resize(context_length, PAD_ID);
    attention_mask.resize(context_length, 0);

    Ok(EncodedText { input_ids, attention_mask })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus() -> Vec<String> {
        vec![
            "a red bicycle".to_string(),
            "a red car".to_string(),
            "the blue sky".to_string(),
        ]
    }

    #[test]
    fn test_build_then_reload() {
        let dir   = TempDir::new().unwrap();
        let store = TokenizerStore::new(dir.path());
        let built = store.load_or_build(&corpus(), 200).unwrap();
        assert!(store.path().exists());

        let again = store.load_or_build(&[], 200).unwrap();
        let a = built.encode("red sky", false).unwrap();
        let b = again.encode("red sky", false).unwrap();
        assert_eq!(a.get_ids(), b.get_ids());
    }

    #[test]
    fn test_ids_stay_below_vocab_size() {
        let dir   = TempDir::new().unwrap();
        let store = TokenizerStore::new(dir.path());
        // Room for only two corpus words
        let tok = store.load_or_build(&corpus(), FIRST_WORD_ID + 2).unwrap();

        let enc = tok.encode("a red bicycle the blue sky car", false).unwrap();
        assert!(enc.get_ids().iter().all(|&id| (id as usize) < FIRST_WORD_ID + 2));
        // Rare words fall back to [UNK]
        assert!(enc.get_ids().contains(&UNK_ID));
    }

    #[test]
    fn test_reload_rejects_smaller_vocab_size() {
        let dir   = TempDir::new().unwrap();
        let store = TokenizerStore::new(dir.path());
        let words: Vec<String> = (0..40).map(|i| format!("word{i}")).collect();
        store.load_or_build(&[words.join(" ")], 1000).unwrap();

        let err = store.load_or_build(&[], 128).unwrap_err();
        assert!(err.to_string().contains("ids up to 143"), "{err}");

        // A table at least as large still accepts it
        assert!(store.load_or_build(&[], 144).is_ok());
    }

    #[test]
    fn test_encode_caption_pads_and_masks() {
        let dir = TempDir::new().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&corpus(), 200).unwrap();

        let e = encode_caption(&tok, "a red car", 8).unwrap();
        assert_eq!(e.input_ids.len(), 8);
        assert_eq!(e.input_ids[0], CLS_ID);
        assert_eq!(e.input_ids[4], SEP_ID);
        assert_eq!(e.attention_mask, vec![1, 1, 1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_encode_caption_truncates_keeping_sep() {
        let dir = TempDir::new().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&corpus(), 200).unwrap();

        let e = encode_caption(&tok, "a red bicycle a red car the blue sky", 4).unwrap();
        assert_eq!(e.input_ids.len(), 4);
        assert_eq!(e.input_ids[3], SEP_ID);
        assert!(e.attention_mask.iter().all(|&m| m == 1));
    }
}
