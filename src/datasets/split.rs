use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSplit {
    Train,
    Test,
    Val,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("split {0:?} holds no simulations")]
pub struct SplitNotFoundError(pub DatasetSplit);

/// Partition of simulation ids into train, validation and test sets.
///
/// Splitting happens per simulation, never per sample, so no trajectory
/// contributes to more than one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSplit {
    train: Vec<usize>,
    val: Vec<usize>,
    test: Vec<usize>,
}

impl SimSplit {
    /// `train` and `val` are fractions of the ids; the rest is test. With a
    /// seed the ids are shuffled first, otherwise the order of `sim_ids` is
    /// kept.
    pub fn new(sim_ids: &[usize], train: f64, val: f64, seed: Option<u64>) -> Result<Self> {
        let valid = |f: f64| (0.0..=1.0).contains(&f);
        if !valid(train) || !valid(val) || train + val > 1.0 {
            return Err(Error::InvalidOptions(format!(
                "split fractions must lie in [0, 1] and sum to at most 1, got train={train} val={val}"
            )));
        }

        let mut ids = sim_ids.to_vec();
        if let Some(seed) = seed {
            ids.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        let n = ids.len();
        let n_train = (train * n as f64).round() as usize;
        let n_val = ((val * n as f64).round() as usize).min(n - n_train);

        let test = ids.split_off(n_train + n_val);
        let val = ids.split_off(n_train);
        Ok(Self {
            train: ids,
            val,
            test,
        })
    }

    /// Ids of one split, ready for `DatasetOptions::sel_sims`.
    pub fn sims(&self, split: DatasetSplit) -> Result<&[usize], SplitNotFoundError> {
        let ids = match split {
            DatasetSplit::Train => &self.train,
            DatasetSplit::Val => &self.val,
            DatasetSplit::Test => &self.test,
        };
        if ids.is_empty() {
            return Err(SplitNotFoundError(split));
        }
        Ok(ids)
    }
}
