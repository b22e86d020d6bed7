//! Batching over a [`Dataset`].

use ndarray::{Array2, ArrayD, Axis, IxDyn, Slice};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::{
    dataset::{Dataset, DatasetOptions, Sample},
    errors::{Error, Result},
};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    /// Reshuffle sample order at the start of every pass.
    pub shuffle: bool,
    /// Skip a trailing batch smaller than `batch_size`.
    pub drop_last: bool,
    /// Seed for shuffling; drawn from the OS when `None`.
    pub seed: Option<u64>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }
}

/// A stack of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `(batch, channels + constants, spatial...)`; each constant is
    /// appended as a channel filled with its (normalized) value.
    pub input: ArrayD<f32>,
    /// `(batch, channels, spatial...)` or
    /// `(batch, time_steps, channels, spatial...)`.
    pub target: ArrayD<f32>,
    /// `(batch, constants)`, never normalized.
    pub constants_raw: Array2<f64>,
}

pub struct Dataloader {
    dataset: Dataset,
    opts: LoaderOptions,
    rng: StdRng,
}

impl Dataloader {
    pub fn new(dataset: Dataset, opts: LoaderOptions) -> Result<Self> {
        if opts.batch_size == 0 {
            return Err(Error::InvalidOptions("batch_size must be positive".into()));
        }
        let rng = match opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { dataset, opts, rng })
    }

    pub fn open(name: &str, dataset_opts: DatasetOptions, opts: LoaderOptions) -> Result<Self> {
        Self::new(Dataset::open(name, dataset_opts)?, opts)
    }

    pub fn open_with_config(
        name: &str,
        dataset_opts: DatasetOptions,
        opts: LoaderOptions,
        config: &Config,
    ) -> Result<Self> {
        Self::new(Dataset::open_with_config(name, dataset_opts, config)?, opts)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    /// Number of batches per pass.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.opts.batch_size;
        if self.opts.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One pass over the dataset.
    pub fn iter(&mut self) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.opts.shuffle {
            order.shuffle(&mut self.rng);
        }
        Batches {
            dataset: &self.dataset,
            order,
            pos: 0,
            remaining: self.len(),
            batch_size: self.opts.batch_size,
        }
    }
}

impl<'a> IntoIterator for &'a mut Dataloader {
    type Item = Result<Batch>;
    type IntoIter = Batches<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Batches<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    pos: usize,
    remaining: usize,
    batch_size: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let end = (self.pos + self.batch_size).min(self.order.len());
        let indices = &self.order[self.pos..end];
        self.pos = end;
        Some(collate(self.dataset, indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

/// Loads and stacks the samples at `indices`.
pub fn collate(dataset: &Dataset, indices: &[usize]) -> Result<Batch> {
    let samples = indices
        .iter()
        .map(|&i| dataset.get(i))
        .collect::<Result<Vec<Sample>>>()?;

    let inputs: Vec<ArrayD<f32>> = samples
        .iter()
        .map(|s| with_constant_channels(&s.input, &s.constants))
        .collect();
    let input_views: Vec<_> = inputs.iter().map(|a| a.view()).collect();
    let target_views: Vec<_> = samples.iter().map(|s| s.target.view()).collect();

    let k = samples.first().map_or(0, |s| s.constants_raw.len());
    let constants_raw = Array2::from_shape_fn((samples.len(), k), |(i, j)| samples[i].constants_raw[j]);

    Ok(Batch {
        input: ndarray::stack(Axis(0), &input_views)?,
        target: ndarray::stack(Axis(0), &target_views)?,
        constants_raw,
    })
}

/// Appends one channel per constant to a `(channels, spatial...)` frame.
pub fn with_constant_channels(input: &ArrayD<f32>, constants: &[f64]) -> ArrayD<f32> {
    let channels = input.len_of(Axis(0));
    let mut shape = input.shape().to_vec();
    shape[0] += constants.len();

    let mut out = ArrayD::zeros(IxDyn(&shape));
    out.slice_axis_mut(Axis(0), Slice::from(0..channels))
        .assign(input);
    for (j, &v) in constants.iter().enumerate() {
        out.index_axis_mut(Axis(0), channels + j).fill(v as f32);
    }
    out
}
