//! Spatial softmax cross-entropy loss for dense prediction training.
//!
//! This crate scores batches of dense label grids (per-pixel class indices)
//! against per-class probability maps using the Burn deep learning
//! framework, and produces the matching analytic gradient for the backward
//! pass.
//!
//! ## Components
//!
//! - **[`SpatialCrossEntropyLoss`]**: per-location cross-entropy over
//!   `[batch, classes, height, width]` probabilities, reduced to a scalar
//!   loss, with an explicit [`backward`](SpatialCrossEntropyLoss::backward)
//!   computing the `p - onehot(target)` gradient
//! - **[`class_histogram`]**: per-batch class occurrence counts backing the
//!   inverse-frequency reweighting
//!
//! ## Key Features
//!
//! - **Ignore label**: locations carrying a configured sentinel are
//!   excluded from both the loss sum and its normalizer
//! - **Frequency reweighting**: each location's contribution can be divided
//!   by the batch occurrence count of its class, counteracting label
//!   imbalance
//! - **Selectable normalization**: divide by the number of counted
//!   locations or by the batch size
//! - **Backend agnostic**: every operation is expressed through Burn tensor
//!   primitives and runs on any Burn backend
//!
//! ## Usage Example
//!
//! ```rust
//! use segloss_burn::{SpatialCrossEntropyLoss, SpatialCrossEntropyLossConfig};
//!
//! fn create_loss() -> SpatialCrossEntropyLoss {
//!     SpatialCrossEntropyLossConfig::new()
//!         .with_ignore_label(Some(255))
//!         .with_weight_by_label_freqs(true)
//!         .init()
//! }
//! ```
//!
//! The loss consumes probabilities, not logits: the upstream softmax (or
//! any other row-normalizing transform) is the caller's concern, and the
//! probability tensor can be passed through unchanged alongside the scalar
//! loss via
//! [`forward_with_probabilities`](SpatialCrossEntropyLoss::forward_with_probabilities).

mod histogram;
mod spatial_cross_entropy;

pub use histogram::{class_histogram, MAX_CLASS_BINS};
pub use spatial_cross_entropy::{
    GradientRequest, SpatialCrossEntropyLoss, SpatialCrossEntropyLossConfig, MIN_PROBABILITY,
};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
