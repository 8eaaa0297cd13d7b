//! Text utilities shared by transcript stitching and entity resolution.

pub mod sanitize;
pub mod similarity;

pub use sanitize::{sanitize_component, slug};
pub use similarity::{lcs_len, overlap_ratio, ratio};
