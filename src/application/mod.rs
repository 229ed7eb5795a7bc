// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each.
//
// Rules for this layer:
//   - No model math or tensor code here
//   - No argument parsing or printing here (that's Layer 1)
//   - Only workflow coordination

// The training workflow
pub mod train_use_case;

// Checkpoint inspection
pub mod inspect_use_case;
