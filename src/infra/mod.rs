// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by more than one layer:
//
//   checkpoint.rs — parameter files (safetensors), the
//                   best-checkpoint pointer, pretrained loading
//                   with key filtering, and train_config.json
//
//   metrics.rs    — in-memory scalar log filled by the
//                   classifier, and the metrics.csv sink the
//                   trainer drains it into
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Checkpoint files, pointer and pretrained loading
pub mod checkpoint;

/// Scalar metric log and CSV logger
pub mod metrics;
