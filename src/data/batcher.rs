// ============================================================
// Layer 4 — Pair Batcher (collate)
// ============================================================
// Implements Burn's Batcher trait: a Vec<PairSample> becomes one
// PairBatch of aligned tensors.
//
//   pixels          N × [3·H·W]  → images          [N, 3, H, W]
//   input_ids       N × [S]      → input_ids       [N, S]
//   attention_mask  N × [S]      → attention_mask  [N, S]
//   label           N            → labels          [N]
//
// Collation is a pure function of its input order, so a loader
// that does not shuffle always yields identical batches.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::PairSample;

/// A batch of pairs ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    /// Normalised images, shape: [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,

    /// Token ids, shape: [batch_size, context_length]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding, shape: [batch_size, context_length]
    pub attention_mask: Tensor<B, 2, Int>,

    /// Pair labels, shape: [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

/// Holds the target device so tensors are created on the right GPU/CPU.
#[derive(Clone, Debug)]
pub struct PairBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> PairBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<PairSample, PairBatch<B>> for PairBatcher<B> {
    fn batch(&self, items: Vec<PairSample>) -> PairBatch<B> {
        let batch_size = items.len();
        // All samples share the preprocessor's shape and context length
        let (height, width) = (items[0].height, items[0].width);
        let seq_len         = items[0].input_ids.len();

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|s| s.pixels.iter().copied())
            .collect();

        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.input_ids.iter().map(|&x| x as i32))
            .collect();

        let mask_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.attention_mask.iter().map(|&x| x as i32))
            .collect();

        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, 3, height, width]),
            &self.device,
        );

        let input_ids = Tensor::<B, 1, Int>::from_ints(input_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);

        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);

        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        PairBatch { images, input_ids, attention_mask, labels }
    }
}
