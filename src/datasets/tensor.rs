//! Bridges to `dfdx`.

use dfdx::{
    data::ExactSizeDataset,
    shapes::Shape,
    tensor::{Tensor, TensorFromVec},
};
use ndarray::ArrayD;

use super::{
    dataset::{Dataset, Sample},
    errors::{Error, Result},
};

impl ExactSizeDataset for Dataset {
    type Item<'a> = Result<Sample> where Self: 'a;
    fn get(&self, index: usize) -> Self::Item<'_> {
        Dataset::get(self, index)
    }
    fn len(&self) -> usize {
        Dataset::len(self)
    }
}

/// Moves an array into a tensor of `shape`, which must hold as many
/// dimensions and elements as the array.
pub fn to_tensor<S: Shape, D: TensorFromVec<f32>>(
    dev: &D,
    array: &ArrayD<f32>,
    shape: S,
) -> Result<Tensor<S, f32, D>> {
    if S::NUM_DIMS != array.ndim() || shape.num_elements() != array.len() {
        return Err(Error::InvalidOptions(format!(
            "array of shape {:?} does not fit a {}-dimensional tensor of {} elements",
            array.shape(),
            S::NUM_DIMS,
            shape.num_elements()
        )));
    }
    Ok(dev.tensor_from_vec(array.iter().copied().collect(), shape))
}
