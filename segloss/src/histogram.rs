//! Per-batch class occurrence histogram.
//!
//! Counts how many label occurrences fall into each class bin over one batch
//! of target grids. The counts feed the inverse-frequency reweighting of
//! [`SpatialCrossEntropyLoss`](crate::SpatialCrossEntropyLoss) and are only
//! valid for the batch they were built from.

use burn::tensor::{backend::Backend, Int, Tensor};

/// Capacity of the class histogram.
///
/// The bin tensor is always allocated at full capacity, so any label value
/// below this limit lands in its own bin even when it exceeds the class
/// count (an ignore sentinel, for example). Class counts above the capacity
/// are rejected by the consumers of the histogram.
pub const MAX_CLASS_BINS: usize = 1024;

/// Count the occurrences of each label value over one batch.
///
/// Every element of `labels` increments its bin exactly once, through an
/// accumulating scatter, so the result is independent of how the backend
/// orders the additions and `sum(histogram)` equals the element count of
/// `labels`. Label values must lie in `[0, MAX_CLASS_BINS)`.
///
/// # Shapes
///
/// - labels: `[...dims]` (any shape)
/// - output: `[MAX_CLASS_BINS]`
pub fn class_histogram<B: Backend, const D: usize>(
    labels: Tensor<B, D, Int>,
) -> Tensor<B, 1, Int> {
    let count = labels.shape().num_elements();
    let flat = labels.reshape([count]);
    let bins = Tensor::zeros([MAX_CLASS_BINS], &flat.device());

    bins.scatter(0, flat.clone(), Tensor::ones_like(&flat))
}

#[cfg(test)]
mod tests {
    use burn::tensor::{cast::ToElement, TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn class_histogram_counts_every_occurrence_exactly() {
        let device = Default::default();

        let labels = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[1, 0, 1], [2, 1, 0]]),
            &device,
        );

        let histogram = class_histogram(labels);
        assert_eq!(histogram.dims(), [MAX_CLASS_BINS]);

        // Class 0 twice, class 1 three times, class 2 once, nothing above
        let expected = TensorData::from([2.0, 3.0, 1.0, 0.0]);
        histogram
            .float()
            .slice([0..4])
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn class_histogram_total_equals_label_count() {
        let device = Default::default();

        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 3], [2, 2]], [[1, 0], [3, 3]]]),
            &device,
        );

        let total = class_histogram(labels).float().sum();
        assert_eq!(total.into_scalar().to_f64(), 8.0);
    }

    #[test]
    fn class_histogram_is_permutation_invariant() {
        let device = Default::default();

        let labels = Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::from([2, 1, 0, 1]),
            &device,
        );
        let shuffled = Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::from([1, 0, 1, 2]),
            &device,
        );

        let [histogram, histogram_shuffled] = Transaction::default()
            .register(class_histogram(labels).float())
            .register(class_histogram(shuffled).float())
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        histogram.assert_approx_eq::<f32>(&histogram_shuffled, Tolerance::default());
    }

    #[test]
    fn class_histogram_bins_sentinel_above_class_range() {
        let device = Default::default();

        // An ignore sentinel of 255 is counted in its own bin
        let labels = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[0, 255]]),
            &device,
        );

        let histogram = class_histogram(labels).float();

        let sentinel_bin = histogram.clone().slice([255..256]);
        sentinel_bin
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([1.0]), Tolerance::default());
        assert_eq!(histogram.sum().into_scalar().to_f64(), 2.0);
    }
}
