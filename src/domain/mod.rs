// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that name the core concepts of the system:
// which partition a subject belongs to, what a manifest row
// looks like, and what can go wrong when a model is driven
// through the training hooks.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Everything above (data, ml, infra) speaks in these types.

/// Train / validation / test labels and the per-split record
pub mod split;

/// One row of the split manifest
pub mod manifest;

/// Typed failures raised by the model wrapper
pub mod error;

/// A scan: voxels, spacing, axis layout
pub mod volume;

/// Core abstractions (traits) that other layers implement
pub mod traits;
