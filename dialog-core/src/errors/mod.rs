//! Error types for the transaction and dialog layers.

pub mod dialog_errors;

pub use dialog_errors::{DialogError, DialogResult};
