// ============================================================
// Layer 3 — Model Errors
// ============================================================
// Almost every failure in this crate comes from a collaborator
// (csv, nifti, burn) and travels as anyhow::Error with context.
// The few raised by the model wrapper itself get a type, so
// callers and tests can tell them apart with downcast_ref.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// A hook of the wrapper was invoked without being provided
    #[error("`{0}` is not implemented for this model")]
    NotImplemented(&'static str),

    /// Strict loading saw parameters the model does not own
    #[error("unexpected parameter keys in state dict: {0:?}")]
    UnexpectedKeys(Vec<String>),

    /// A parameter the model needs is absent from the state dict
    #[error("missing parameter key in state dict: {0}")]
    MissingKey(String),

    #[error("shape mismatch for '{key}': model has {expected:?}, checkpoint has {actual:?}")]
    ShapeMismatch {
        key:      String,
        expected: Vec<usize>,
        actual:   Vec<usize>,
    },
}
