pub mod dataset;
#[cfg(feature = "download")]
pub(crate) mod download;
pub mod errors;
#[cfg(feature = "download")]
pub mod fetcher;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod index;
pub mod loader;
pub mod meta;
pub mod normalization;
pub(crate) mod progress;
pub mod split;
#[cfg(feature = "dfdx")]
pub mod tensor;

pub use dataset::{Dataset, DatasetOptions, Sample, Sampling};
pub use errors::{Error, Result};
pub use index::{datasets, index, Index, IndexEntry, Source};
pub use loader::{Batch, Batches, Dataloader, LoaderOptions};
pub use meta::Metadata;
pub use normalization::{NormStats, NormStrategy, Normalizer};
pub use split::{DatasetSplit, SimSplit, SplitNotFoundError};
