//! Spatial softmax cross-entropy loss.
//!
//! Scores a batch of dense label grids against per-class probabilities, one
//! loss term per location, with optional exclusion of sentinel-labeled
//! locations and optional inverse-frequency class reweighting.
//!
//! The per-location loss is computed as:
//! ```text
//! loss(n, y, x) = -ln(max(p[n, target(n, y, x), y, x], MIN_PROBABILITY))
//!                 / freq(target(n, y, x))        (when reweighting)
//! loss = Σ loss(n, y, x) / normalizer
//! ```
//! where the normalizer is the number of counted locations or the batch
//! size, depending on configuration. The matching analytic gradient,
//! `p - onehot(target)` with the same weighting and normalization, is
//! produced by [`SpatialCrossEntropyLoss::backward`].

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};

use crate::histogram::{class_histogram, MAX_CLASS_BINS};

/// Floor applied to probabilities before the logarithm.
///
/// The smallest positive normal `f32`; it keeps the loss finite on
/// degenerate or underflowed probabilities without altering any
/// representable loss value above it.
pub const MIN_PROBABILITY: f32 = f32::MIN_POSITIVE;

/// Selects which inputs of the loss receive a gradient during the backward
/// pass.
///
/// The targets are integer class indices, so no gradient with respect to
/// them exists; requesting one is rejected with a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GradientRequest {
    /// Compute the gradient with respect to the probability input.
    pub probabilities: bool,
    /// Request a gradient with respect to the target input (always fatal).
    pub targets: bool,
}

impl GradientRequest {
    /// Request the probability gradient only.
    pub const fn probabilities() -> Self {
        Self {
            probabilities: true,
            targets: false,
        }
    }
}

/// Configuration for creating a [Spatial cross-entropy loss](SpatialCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct SpatialCrossEntropyLossConfig {
    /// Label value marking locations excluded from the loss. Default: None
    pub ignore_label: Option<i64>,

    /// Divide by the number of counted locations instead of the batch size.
    /// Default: true
    #[config(default = true)]
    pub normalize: bool,

    /// Divide each location's contribution by the occurrence count of its
    /// class over the current batch. Default: false
    #[config(default = false)]
    pub weight_by_label_freqs: bool,
}

impl SpatialCrossEntropyLossConfig {
    /// Initialize [Spatial cross-entropy loss](SpatialCrossEntropyLoss).
    pub fn init(&self) -> SpatialCrossEntropyLoss {
        self.assertions();
        SpatialCrossEntropyLoss {
            ignore_label: self.ignore_label,
            normalize: self.normalize,
            weight_by_label_freqs: self.weight_by_label_freqs,
        }
    }

    fn assertions(&self) {
        if self.weight_by_label_freqs {
            if let Some(label) = self.ignore_label {
                assert!(
                    (0..MAX_CLASS_BINS as i64).contains(&label),
                    "Ignore label {label} must lie in [0, {MAX_CLASS_BINS}) when frequency weighting is enabled"
                );
            }
        }
    }
}

/// Spatial softmax cross-entropy loss.
///
/// Evaluates one cross-entropy term per location of a dense label grid and
/// reduces the terms into a scalar loss. Locations carrying the configured
/// ignore label contribute neither to the sum nor to the normalizer. With
/// frequency weighting enabled, each location's contribution is divided by
/// the batch occurrence count of its class, counteracting label imbalance.
///
/// The loss consumes probabilities, not logits; producing them is the
/// caller's concern.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct SpatialCrossEntropyLoss {
    /// Label value marking locations excluded from the loss.
    pub ignore_label: Option<i64>,
    /// Divide by the number of counted locations instead of the batch size.
    pub normalize: bool,
    /// Divide each location's contribution by its class occurrence count.
    pub weight_by_label_freqs: bool,
}

impl Default for SpatialCrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for SpatialCrossEntropyLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let content = content
            .add("normalize", &self.normalize)
            .add("weight_by_label_freqs", &self.weight_by_label_freqs);
        match self.ignore_label {
            Some(label) => content.add("ignore_label", &label).optional(),
            None => content.optional(),
        }
    }
}

impl SpatialCrossEntropyLoss {
    /// Create a new spatial cross-entropy loss with default configuration.
    pub fn new() -> Self {
        SpatialCrossEntropyLossConfig::new().init()
    }

    /// Compute the scalar loss over a batch of label grids.
    ///
    /// # Shapes
    ///
    /// - probabilities: `[batch_size, classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        probabilities: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, height, width] = targets.dims();
        let per_location = self.forward_no_reduction(probabilities, targets.clone());
        let labels = targets.reshape([batch_size, height * width]);

        per_location.sum() / self.normalizer(&labels)
    }

    /// Compute the scalar loss and pass the probability tensor through
    /// unchanged, for consumers that need both.
    ///
    /// # Shapes
    ///
    /// - probabilities: `[batch_size, classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: (`[1]`, `[batch_size, classes, height, width]`)
    pub fn forward_with_probabilities<B: Backend>(
        &self,
        probabilities: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 4>) {
        let loss = self.forward(probabilities.clone(), targets);
        (loss, probabilities)
    }

    /// Compute the per-location loss map without reduction.
    ///
    /// Ignored locations hold zero. With frequency weighting enabled, each
    /// entry is already divided by its class occurrence count.
    ///
    /// # Shapes
    ///
    /// - probabilities: `[batch_size, classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[batch_size, height, width]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        probabilities: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 3> {
        self.assertions(&probabilities, &targets);

        let [batch_size, classes, height, width] = probabilities.dims();
        let locations = height * width;
        let labels = targets.reshape([batch_size, locations]);

        // Probability assigned to the target class at each location. Ignored
        // locations may carry an out-of-range sentinel, so the lookup index
        // is clamped; their terms are masked out below.
        let index = labels
            .clone()
            .clamp(0, classes as i64 - 1)
            .unsqueeze_dim::<3>(1);
        let picked = probabilities
            .reshape([batch_size, classes, locations])
            .gather(1, index)
            .reshape([batch_size, locations]);

        let mut per_location = picked.clamp_min(MIN_PROBABILITY).log().neg();

        if self.weight_by_label_freqs {
            per_location = per_location * self.frequency_weights(&labels);
        }

        (per_location * self.validity_mask(&labels)).reshape([batch_size, height, width])
    }

    /// Compute the gradient of the loss with respect to the probability
    /// input, scaled by the upstream loss weight.
    ///
    /// Returns `None` when the probability gradient is not requested.
    /// Requesting a gradient for the targets panics: the loss is not
    /// differentiable with respect to integer class indices.
    ///
    /// # Shapes
    ///
    /// - probabilities: `[batch_size, classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[batch_size, classes, height, width]`
    pub fn backward<B: Backend>(
        &self,
        probabilities: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
        loss_weight: f64,
        request: GradientRequest,
    ) -> Option<Tensor<B, 4>> {
        assert!(
            !request.targets,
            "SpatialCrossEntropyLoss cannot backpropagate to the target labels"
        );
        if !request.probabilities {
            return None;
        }
        self.assertions(&probabilities, &targets);

        let [batch_size, classes, height, width] = probabilities.dims();
        let locations = height * width;
        let labels = targets.reshape([batch_size, locations]);
        let device = labels.device();

        // p - onehot(target): scatter accumulates, so adding -1 at the
        // target entry of every location yields the softmax gradient.
        let index = labels
            .clone()
            .clamp(0, classes as i64 - 1)
            .unsqueeze_dim::<3>(1);
        let mut grad = probabilities
            .reshape([batch_size, classes, locations])
            .scatter(1, index, Tensor::full([batch_size, 1, locations], -1.0, &device));

        // Ignored locations drop their entire class slice.
        grad = grad * self.validity_mask(&labels).unsqueeze_dim::<3>(1);

        if self.weight_by_label_freqs {
            grad = grad * self.frequency_weights(&labels).unsqueeze_dim::<3>(1);
        }

        // Uniform scale, applied once the validity reduction is complete.
        let scale = self
            .normalizer(&labels)
            .recip()
            .mul_scalar(loss_weight)
            .reshape([1, 1, 1]);

        Some((grad * scale).reshape([batch_size, classes, height, width]))
    }

    /// One at every location that participates in the loss, zero at ignored
    /// ones.
    fn validity_mask<B: Backend>(&self, labels: &Tensor<B, 2, Int>) -> Tensor<B, 2> {
        match self.ignore_label {
            Some(label) => labels.clone().equal_elem(label).bool_not().float(),
            None => Tensor::ones(labels.shape(), &labels.device()),
        }
    }

    /// Reciprocal of each location's class occurrence count over the batch.
    fn frequency_weights<B: Backend>(&self, labels: &Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [batch_size, locations] = labels.dims();
        let counts = class_histogram(labels.clone())
            .gather(0, labels.clone().reshape([batch_size * locations]))
            .float();

        counts.recip().reshape([batch_size, locations])
    }

    /// Denominator of the reduction: the number of counted locations, or
    /// the batch size when per-sample normalization is configured.
    fn normalizer<B: Backend>(&self, labels: &Tensor<B, 2, Int>) -> Tensor<B, 1> {
        if self.normalize {
            self.validity_mask(labels).sum()
        } else {
            let [batch_size, _] = labels.dims();
            Tensor::from_data(TensorData::from([batch_size as f32]), &labels.device())
        }
    }

    fn assertions<B: Backend>(&self, probabilities: &Tensor<B, 4>, targets: &Tensor<B, 3, Int>) {
        let [batch_size, classes, height, width] = probabilities.dims();
        let spatial = [batch_size, height, width];
        let target_dims = targets.dims();
        assert_eq!(
            spatial, target_dims,
            "Spatial layout of probabilities ({spatial:?}) must match targets ({target_dims:?})"
        );

        if self.weight_by_label_freqs {
            assert!(
                classes <= MAX_CLASS_BINS,
                "Class count {classes} exceeds the {MAX_CLASS_BINS}-bin class histogram capacity"
            );
        }
    }
}
