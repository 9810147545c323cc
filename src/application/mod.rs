// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination and backend selection
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Training run: datasets, fit, optional test pass
pub mod train_use_case;

// Score a finished run on one split
pub mod evaluate_use_case;

// Load one sample through the pipeline and describe it
pub mod inspect_use_case;
