//! Normalization statistics and the per-channel affine maps built from them.
//!
//! Statistics are computed once over every frame of every simulation and
//! cached inside the dataset file under [`NORM_GROUP`].

use std::str::FromStr;

use ndarray::{ArrayD, ArrayView1, Axis, Slice};

use super::{
    errors::{Error, Result},
    meta::{read_frames, sim_constants, sim_dataset, Metadata},
    progress::count_bar,
};

pub const NORM_GROUP: &str = "norm_data";

/// Frames read per block while accumulating statistics.
const FRAME_CHUNK: usize = 32;

const DATA_KEYS: [&str; 5] = ["data_mean", "data_std", "data_std_vnorm", "data_min", "data_max"];
const CONST_KEYS: [&str; 4] = ["const_mean", "const_std", "const_min", "const_max"];

/// Running moments, accumulated with Welford's update.
#[derive(Debug, Clone, Copy)]
struct Moments {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Moments {
    fn new() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, v: f64) {
        self.n += 1;
        let delta = v - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (v - self.mean);
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation.
    fn std(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        (self.m2 / self.n as f64).max(0.0).sqrt()
    }
}

/// Per-channel and per-constant statistics of a whole dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct NormStats {
    pub data_mean: Vec<f64>,
    pub data_std: Vec<f64>,
    /// Std of the vector magnitude for channels of a vector field, plain std
    /// for scalar channels.
    pub data_std_vnorm: Vec<f64>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
    pub const_mean: Vec<f64>,
    pub const_std: Vec<f64>,
    pub const_min: Vec<f64>,
    pub const_max: Vec<f64>,
}

impl NormStats {
    pub fn compute(file: &hdf5::File, meta: &Metadata, show_progress: bool) -> Result<Self> {
        let groups = meta.field_groups();
        let all_consts: Vec<usize> = (0..meta.constants.len()).collect();

        let mut chan = vec![Moments::new(); meta.num_channels()];
        let mut mags = vec![Moments::new(); groups.len()];
        let mut consts = vec![Moments::new(); meta.constants.len()];

        let pb = count_bar(show_progress, meta.num_sims() as u64);
        pb.set_message("normalization data");

        for &id in &meta.sim_ids {
            let sim = sim_dataset(file, id)?;
            for (m, v) in consts
                .iter_mut()
                .zip(sim_constants(&sim, &meta.constants, &all_consts)?)
            {
                m.push(v);
            }

            let frames = meta.num_frames();
            let mut start = 0;
            while start < frames {
                let end = (start + FRAME_CHUNK).min(frames);
                let block = read_frames::<f64>(&sim, start..end)?;

                for (m, lane) in chan.iter_mut().zip(block.axis_iter(Axis(1))) {
                    lane.iter().for_each(|&v| m.push(v));
                }
                for (m, range) in mags.iter_mut().zip(&groups) {
                    if range.len() < 2 {
                        continue;
                    }
                    let comps = block.slice_axis(Axis(1), Slice::from(range.clone()));
                    let sq = comps.mapv(|v| v * v).sum_axis(Axis(1));
                    sq.iter().for_each(|&s| m.push(s.sqrt()));
                }
                start = end;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let mut data_std_vnorm = chan.iter().map(Moments::std).collect::<Vec<_>>();
        for (m, range) in mags.iter().zip(&groups) {
            if range.len() > 1 {
                data_std_vnorm[range.clone()].fill(m.std());
            }
        }

        Ok(Self {
            data_mean: chan.iter().map(Moments::mean).collect(),
            data_std: chan.iter().map(Moments::std).collect(),
            data_std_vnorm,
            data_min: chan.iter().map(|m| m.min).collect(),
            data_max: chan.iter().map(|m| m.max).collect(),
            const_mean: consts.iter().map(Moments::mean).collect(),
            const_std: consts.iter().map(Moments::std).collect(),
            const_min: consts.iter().map(|m| m.min).collect(),
            const_max: consts.iter().map(|m| m.max).collect(),
        })
    }

    fn data_columns(&self) -> [&Vec<f64>; 5] {
        [
            &self.data_mean,
            &self.data_std,
            &self.data_std_vnorm,
            &self.data_min,
            &self.data_max,
        ]
    }

    fn const_columns(&self) -> [&Vec<f64>; 4] {
        [&self.const_mean, &self.const_std, &self.const_min, &self.const_max]
    }

    /// Writes the statistics into `file`, replacing any previous ones.
    pub fn store(&self, file: &hdf5::File) -> Result<()> {
        Self::clear(file)?;
        let group = file.create_group(NORM_GROUP)?;
        let columns = DATA_KEYS
            .iter()
            .zip(self.data_columns())
            .chain(CONST_KEYS.iter().zip(self.const_columns()));
        for (key, values) in columns {
            if values.is_empty() {
                continue;
            }
            group
                .new_dataset_builder()
                .with_data(ArrayView1::from(values.as_slice()))
                .create(*key)?;
        }
        Ok(())
    }

    /// Reads cached statistics. `None` when absent or not matching `meta`.
    pub fn load(file: &hdf5::File, meta: &Metadata) -> Result<Option<Self>> {
        if !file.link_exists(NORM_GROUP) {
            return Ok(None);
        }
        let group = file.group(NORM_GROUP)?;
        let read = |key: &str, len: usize| -> Result<Option<Vec<f64>>> {
            if len == 0 {
                return Ok(Some(Vec::new()));
            }
            if !group.link_exists(key) {
                return Ok(None);
            }
            let values = group.dataset(key)?.read_raw::<f64>()?;
            Ok((values.len() == len).then_some(values))
        };

        let mut data = Vec::with_capacity(DATA_KEYS.len());
        for key in DATA_KEYS {
            match read(key, meta.num_channels())? {
                Some(v) => data.push(v),
                None => return Ok(None),
            }
        }
        let mut consts = Vec::with_capacity(CONST_KEYS.len());
        for key in CONST_KEYS {
            match read(key, meta.constants.len())? {
                Some(v) => consts.push(v),
                None => return Ok(None),
            }
        }

        let mut data = data.into_iter();
        let mut consts = consts.into_iter();
        let next = |it: &mut std::vec::IntoIter<Vec<f64>>| it.next().unwrap_or_default();
        Ok(Some(Self {
            data_mean: next(&mut data),
            data_std: next(&mut data),
            data_std_vnorm: next(&mut data),
            data_min: next(&mut data),
            data_max: next(&mut data),
            const_mean: next(&mut consts),
            const_std: next(&mut consts),
            const_min: next(&mut consts),
            const_max: next(&mut consts),
        }))
    }

    pub fn is_cached(file: &hdf5::File, meta: &Metadata) -> Result<bool> {
        Ok(Self::load(file, meta)?.is_some())
    }

    /// Computes and stores statistics. `file` must be writable.
    pub fn calculate(file: &hdf5::File, meta: &Metadata, show_progress: bool) -> Result<Self> {
        let stats = Self::compute(file, meta, show_progress)?;
        stats.store(file)?;
        Ok(stats)
    }

    /// Drops cached statistics, if any. `file` must be writable.
    pub fn clear(file: &hdf5::File) -> Result<()> {
        if file.link_exists(NORM_GROUP) {
            file.unlink(NORM_GROUP)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormStrategy {
    /// Divide by the standard deviation (of the magnitude, for vector
    /// fields).
    Std,
    /// Subtract the mean, then divide by the standard deviation.
    MeanStd,
    /// Map `[min, max]` of each channel onto the given interval.
    MinMax { min: f64, max: f64 },
}

impl FromStr for NormStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "std" => Ok(Self::Std),
            "mean-std" => Ok(Self::MeanStd),
            "minus-one-to-one" => Ok(Self::MinMax { min: -1.0, max: 1.0 }),
            "zero-to-one" => Ok(Self::MinMax { min: 0.0, max: 1.0 }),
            other => Err(Error::UnknownNormStrategy(other.to_string())),
        }
    }
}

/// Per-channel map `y = (x - shift) / scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    pub strategy: NormStrategy,
    shift: Vec<f64>,
    scale: Vec<f64>,
}

impl Normalizer {
    /// Normalizer for simulation channels.
    pub fn for_data(strategy: NormStrategy, stats: &NormStats) -> Result<Self> {
        let std = match strategy {
            NormStrategy::Std => &stats.data_std_vnorm,
            _ => &stats.data_std,
        };
        Self::build(strategy, &stats.data_mean, std, &stats.data_min, &stats.data_max)
    }

    /// Normalizer for the constants at positions `idx`, in that order.
    pub fn for_constants(strategy: NormStrategy, stats: &NormStats, idx: &[usize]) -> Result<Self> {
        let pick = |v: &[f64]| -> Result<Vec<f64>> {
            idx.iter()
                .map(|&i| {
                    v.get(i).copied().ok_or_else(|| {
                        Error::InvalidOptions(format!(
                            "constant index {i} out of range for {} constants",
                            v.len()
                        ))
                    })
                })
                .collect()
        };
        Self::build(
            strategy,
            &pick(&stats.const_mean)?,
            &pick(&stats.const_std)?,
            &pick(&stats.const_min)?,
            &pick(&stats.const_max)?,
        )
    }

    fn build(
        strategy: NormStrategy,
        mean: &[f64],
        std: &[f64],
        min: &[f64],
        max: &[f64],
    ) -> Result<Self> {
        let n = mean.len();
        if std.len() != n || min.len() != n || max.len() != n {
            return Err(Error::MissingNormData);
        }
        let (shift, scale): (Vec<f64>, Vec<f64>) = (0..n)
            .map(|i| match strategy {
                NormStrategy::Std => (0.0, std[i]),
                NormStrategy::MeanStd => (mean[i], std[i]),
                NormStrategy::MinMax { min: a, max: b } => {
                    let scale = (max[i] - min[i]) / (b - a);
                    (min[i] - a * nonzero(scale), scale)
                }
            })
            .map(|(shift, scale)| (shift, nonzero(scale)))
            .unzip();
        Ok(Self {
            strategy,
            shift,
            scale,
        })
    }

    pub fn channels(&self) -> usize {
        self.shift.len()
    }

    fn check(&self, found: usize) -> Result<()> {
        if found != self.channels() {
            return Err(Error::InvalidOptions(format!(
                "normalizer expects {} channels, got {found}",
                self.channels()
            )));
        }
        Ok(())
    }

    /// Normalizes `x` in place; channels run along `axis`.
    pub fn normalize(&self, x: &mut ArrayD<f32>, axis: Axis) -> Result<()> {
        self.check(x.len_of(axis))?;
        for (c, mut lane) in x.axis_iter_mut(axis).enumerate() {
            let (shift, scale) = (self.shift[c], self.scale[c]);
            lane.mapv_inplace(|v| ((v as f64 - shift) / scale) as f32);
        }
        Ok(())
    }

    pub fn normalize_rev(&self, x: &mut ArrayD<f32>, axis: Axis) -> Result<()> {
        self.check(x.len_of(axis))?;
        for (c, mut lane) in x.axis_iter_mut(axis).enumerate() {
            let (shift, scale) = (self.shift[c], self.scale[c]);
            lane.mapv_inplace(|v| (v as f64 * scale + shift) as f32);
        }
        Ok(())
    }

    pub fn normalize_values(&self, values: &mut [f64]) -> Result<()> {
        self.check(values.len())?;
        for (c, v) in values.iter_mut().enumerate() {
            *v = (*v - self.shift[c]) / self.scale[c];
        }
        Ok(())
    }

    pub fn normalize_values_rev(&self, values: &mut [f64]) -> Result<()> {
        self.check(values.len())?;
        for (c, v) in values.iter_mut().enumerate() {
            *v = *v * self.scale[c] + self.shift[c];
        }
        Ok(())
    }
}

fn nonzero(scale: f64) -> f64 {
    if scale == 0.0 || !scale.is_finite() {
        1.0
    } else {
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::fixtures::RandomDataset;
    use ndarray::{Array, IxDyn};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::path::Path;

    fn open_random(dir: &Path) -> (hdf5::File, Metadata) {
        let path = dir.join("random.hdf5");
        RandomDataset::default().write(&path).unwrap();
        let file = hdf5::File::open_rw(&path).unwrap();
        let meta = Metadata::read(&file).unwrap();
        (file, meta)
    }

    /// Every frame of every sim, normalized, stacked along axis 0.
    fn normalized_frames(file: &hdf5::File, meta: &Metadata, norm: &Normalizer) -> ArrayD<f32> {
        let mut frames = Vec::new();
        for &id in &meta.sim_ids {
            let sim = sim_dataset(file, id).unwrap();
            let mut block = read_frames::<f32>(&sim, 0..meta.num_frames()).unwrap();
            norm.normalize(&mut block, Axis(1)).unwrap();
            frames.push(block);
        }
        let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
        ndarray::concatenate(Axis(0), &views).unwrap()
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("std".parse::<NormStrategy>().unwrap(), NormStrategy::Std);
        assert_eq!("mean-std".parse::<NormStrategy>().unwrap(), NormStrategy::MeanStd);
        assert_eq!(
            "minus-one-to-one".parse::<NormStrategy>().unwrap(),
            NormStrategy::MinMax { min: -1.0, max: 1.0 }
        );
        assert!(matches!(
            "median".parse::<NormStrategy>(),
            Err(Error::UnknownNormStrategy(s)) if s == "median"
        ));
    }

    #[test]
    fn test_cache_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (file, meta) = open_random(dir.path());

        assert!(!NormStats::is_cached(&file, &meta).unwrap());
        let stats = NormStats::calculate(&file, &meta, false).unwrap();
        assert!(NormStats::is_cached(&file, &meta).unwrap());
        assert_eq!(NormStats::load(&file, &meta).unwrap(), Some(stats.clone()));

        assert_eq!(stats.data_mean.len(), 4);
        assert_eq!(stats.const_std.len(), 1);
        // uniform [0, 1) samples
        for c in 0..4 {
            assert!((stats.data_mean[c] - 0.5).abs() < 0.05);
            assert!(stats.data_min[c] >= 0.0 && stats.data_max[c] < 1.0);
        }
        // the vector field "BB" shares one magnitude std
        assert_eq!(stats.data_std_vnorm[1], stats.data_std_vnorm[2]);
        assert_eq!(stats.data_std_vnorm[0], stats.data_std[0]);

        NormStats::clear(&file).unwrap();
        assert!(!NormStats::is_cached(&file, &meta).unwrap());
        NormStats::clear(&file).unwrap();
    }

    #[test]
    fn test_mean_std_norm() {
        let dir = tempfile::tempdir().unwrap();
        let (file, meta) = open_random(dir.path());
        let stats = NormStats::calculate(&file, &meta, false).unwrap();
        let norm = Normalizer::for_data(NormStrategy::MeanStd, &stats).unwrap();

        let all = normalized_frames(&file, &meta, &norm);
        for lane in all.axis_iter(Axis(1)) {
            let lane = lane.mapv(|v| v as f64);
            assert!(lane.mean().unwrap().abs() < 1e-3);
            assert!((lane.std(0.0) - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_std_norm_vector_magnitude() {
        let dir = tempfile::tempdir().unwrap();
        let (file, meta) = open_random(dir.path());
        let stats = NormStats::calculate(&file, &meta, false).unwrap();
        let norm = Normalizer::for_data(NormStrategy::Std, &stats).unwrap();

        let all = normalized_frames(&file, &meta, &norm).mapv(|v| v as f64);
        let magnitude = all
            .slice_axis(Axis(1), Slice::from(1..3))
            .mapv(|v| v * v)
            .sum_axis(Axis(1))
            .mapv(f64::sqrt);
        assert!((magnitude.std(0.0) - 1.0).abs() < 1e-3);
        assert!((all.index_axis(Axis(1), 3).std(0.0) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_min_max_norm() {
        let dir = tempfile::tempdir().unwrap();
        let (file, meta) = open_random(dir.path());
        let stats = NormStats::calculate(&file, &meta, false).unwrap();
        let norm =
            Normalizer::for_data(NormStrategy::MinMax { min: -1.0, max: 1.0 }, &stats).unwrap();

        let all = normalized_frames(&file, &meta, &norm);
        for lane in all.axis_iter(Axis(1)) {
            let min = lane.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = lane.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert!((min + 1.0).abs() < 1e-5, "min {min}");
            assert!((max - 1.0).abs() < 1e-5, "max {max}");
        }

        let cnorm = Normalizer::for_constants(
            NormStrategy::MinMax { min: -1.0, max: 1.0 },
            &stats,
            &[0],
        )
        .unwrap();
        let mut lo = vec![stats.const_min[0]];
        let mut hi = vec![stats.const_max[0]];
        cnorm.normalize_values(&mut lo).unwrap();
        cnorm.normalize_values(&mut hi).unwrap();
        assert!((lo[0] + 1.0).abs() < 1e-9);
        assert!((hi[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_rev_restores_input() {
        let dir = tempfile::tempdir().unwrap();
        let (file, meta) = open_random(dir.path());
        let stats = NormStats::calculate(&file, &meta, false).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let original = Array::from_shape_simple_fn(IxDyn(&[4, 8, 6]), || rng.gen::<f32>());

        for strategy in [
            NormStrategy::Std,
            NormStrategy::MeanStd,
            NormStrategy::MinMax { min: -1.0, max: 1.0 },
        ] {
            let norm = Normalizer::for_data(strategy, &stats).unwrap();
            let mut x = original.clone();
            norm.normalize(&mut x, Axis(0)).unwrap();
            assert_ne!(x, original);
            norm.normalize_rev(&mut x, Axis(0)).unwrap();
            for (a, b) in x.iter().zip(original.iter()) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_channel_count_checked() {
        let stats = NormStats {
            data_mean: vec![0.0; 2],
            data_std: vec![1.0; 2],
            data_std_vnorm: vec![1.0; 2],
            data_min: vec![0.0; 2],
            data_max: vec![1.0; 2],
            const_mean: vec![],
            const_std: vec![],
            const_min: vec![],
            const_max: vec![],
        };
        let norm = Normalizer::for_data(NormStrategy::Std, &stats).unwrap();
        let mut x = ArrayD::<f32>::zeros(IxDyn(&[3, 2]));
        assert!(matches!(
            norm.normalize(&mut x, Axis(0)),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_zero_spread_leaves_scale_one() {
        let norm =
            Normalizer::build(NormStrategy::MeanStd, &[2.0], &[0.0], &[2.0], &[2.0]).unwrap();
        let mut v = [5.0];
        norm.normalize_values(&mut v).unwrap();
        assert_eq!(v, [3.0]);
    }

    #[test]
    fn test_inconsistent_stats_rejected() {
        let stats = NormStats {
            data_mean: vec![0.0; 3],
            data_std: vec![1.0; 2],
            data_std_vnorm: vec![1.0; 3],
            data_min: vec![0.0; 3],
            data_max: vec![1.0; 3],
            const_mean: vec![1.0],
            const_std: vec![1.0],
            const_min: vec![0.0],
            const_max: vec![2.0],
        };
        assert!(matches!(
            Normalizer::for_data(NormStrategy::MeanStd, &stats),
            Err(Error::MissingNormData)
        ));
        assert!(matches!(
            Normalizer::for_constants(NormStrategy::Std, &stats, &[0, 1]),
            Err(Error::InvalidOptions(_))
        ));
        assert_eq!(
            Normalizer::for_constants(NormStrategy::Std, &stats, &[0])
                .unwrap()
                .channels(),
            1
        );
    }

    #[test]
    fn test_moments_stable_with_large_offset() {
        let mut m = Moments::new();
        for i in 0..10_000 {
            // alternating 1e9 +- 1
            m.push(1e9 + if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        assert!((m.mean() - 1e9).abs() < 1e-5);
        assert!((m.std() - 1.0).abs() < 1e-6);
        assert_eq!(m.min, 1e9 - 1.0);
        assert_eq!(m.max, 1e9 + 1.0);
    }
}
