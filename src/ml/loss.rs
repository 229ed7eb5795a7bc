// ============================================================
// Layer 5 — Contrastive Loss
// ============================================================
// Symmetric InfoNCE over a batch of paired embeddings.
//
//   logits[i][j] = exp(logit_scale) · image_i · text_j
//
// Row i of the target matrix spreads probability evenly over
// every text whose label equals label_i (always including i
// itself). The loss averages the image→text and text→image
// soft cross-entropies. When every label in the batch is distinct
// this is exactly the CLIP objective.

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::ml::model::Cli2pOutput;

/// Upper bound on exp(logit_scale), as in CLIP
pub const MAX_LOGIT_SCALE: f32 = 100.0;

#[derive(Debug, Clone, Default)]
pub struct ContrastiveLoss;

impl ContrastiveLoss {
    pub fn new() -> Self {
        Self
    }

    /// Reduce a batch of paired embeddings and their labels to a scalar.
    pub fn forward<B: Backend>(&self, output: Cli2pOutput<B>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let logits = self.logits(
            output.image_embeddings,
            output.text_embeddings,
            output.logit_scale,
        );
        let targets = pair_targets(labels);

        let image_to_text = soft_cross_entropy(logits.clone(), targets.clone());
        let text_to_image = soft_cross_entropy(logits.transpose(), targets.transpose());

        (image_to_text + text_to_image) / 2.0
    }

    /// Scaled cosine-similarity matrix, shape [batch, batch].
    pub fn logits<B: Backend>(
        &self,
        image_embeddings: Tensor<B, 2>,
        text_embeddings:  Tensor<B, 2>,
        logit_scale:      Tensor<B, 1>,
    ) -> Tensor<B, 2> {
        let scale = logit_scale.exp().clamp_max(MAX_LOGIT_SCALE).unsqueeze::<2>();
        image_embeddings.matmul(text_embeddings.transpose()) * scale
    }
}

/// Row-normalised "same label" matrix.
fn pair_targets<B: Backend>(labels: Tensor<B, 1, Int>) -> Tensor<B, 2> {
    let [n] = labels.dims();
    let rows = labels.clone().reshape([n, 1]).expand([n, n]);
    let cols = labels.reshape([1, n]).expand([n, n]);

    let same = rows.equal(cols).float();
    // The diagonal is always 1, so no row sums to zero
    let row_sums = same.clone().sum_dim(1);
    same / row_sums
}

fn soft_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (targets * log_probs).sum_dim(1).neg().mean()
}
