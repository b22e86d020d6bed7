//! Datasets for physics-based deep learning.
//!
//! Simulation datasets are HDF5 files holding one array per simulation,
//! shaped `(frames, fields, spatial...)`. They are found in a local
//! directory or fetched from the Hugging Face hub, normalized, and served as
//! `(input, target)` frame pairs.
//!
//! ```no_run
//! use pbdl::datasets::*;
//!
//! let opts = DatasetOptions {
//!     time_steps: Some(10),
//!     normalize_data: Some(NormStrategy::Std),
//!     ..Default::default()
//! };
//! let mut loader = Dataloader::open("transonic-cylinder-flow-tiny", opts, LoaderOptions {
//!     batch_size: 8,
//!     shuffle: true,
//!     ..Default::default()
//! })?;
//! for batch in &mut loader {
//!     let batch = batch?;
//!     println!("{:?} -> {:?}", batch.input.shape(), batch.target.shape());
//! }
//! # Ok::<(), pbdl::datasets::Error>(())
//! ```

pub mod config;
pub mod datasets;

pub use config::Config;
