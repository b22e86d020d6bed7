//! Input/target samples drawn from the simulations of one dataset.

use std::{
    fmt::Write,
    ops::Range,
    path::{Path, PathBuf},
};

use ndarray::{ArrayD, Axis, Slice};

use super::{
    errors::{Error, Result},
    index::{Index, Source},
    meta::{read_frames, sim_constants, sim_dataset, sim_path, Metadata},
    normalization::{NormStats, NormStrategy, Normalizer},
};
use crate::config::Config;

/// How a dataset is opened and sampled. `None` fields take their defaults.
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    /// Distance in frames between input and target. Defaults to
    /// `num_frames - 1`.
    pub time_steps: Option<usize>,
    /// One sample per simulation: the first frame against all later ones.
    /// Overrides the time step, trim and step size settings.
    pub all_time_steps: bool,
    /// Return every frame up to the target instead of the target alone.
    pub intermediate_time_steps: Option<bool>,
    pub normalize_data: Option<NormStrategy>,
    pub normalize_const: Option<NormStrategy>,
    /// Simulation ids to use; all simulations when `None`.
    pub sel_sims: Option<Vec<usize>>,
    /// Constant names to return, in this order; all constants when `None`.
    pub sel_const: Option<Vec<String>>,
    /// Field channels to return; all channels when `None`.
    pub sel_channels: Option<Vec<usize>>,
    pub trim_start: Option<usize>,
    pub trim_end: Option<usize>,
    pub step_size: Option<usize>,
    pub disable_progress: bool,
    /// Drop cached normalization statistics before anything else.
    pub clear_norm_data: bool,
}

/// Resolved sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub time_steps: usize,
    pub intermediate_time_steps: bool,
    pub trim_start: usize,
    pub trim_end: usize,
    pub step_size: usize,
    pub samples_per_sim: usize,
}

impl Sampling {
    pub fn resolve(opts: &DatasetOptions, num_frames: usize) -> Result<Self> {
        if num_frames < 2 {
            return Err(Error::InvalidOptions(format!(
                "simulations need at least two frames, found {num_frames}"
            )));
        }

        if opts.all_time_steps {
            let managed = [
                ("time_steps", opts.time_steps.is_some()),
                ("intermediate_time_steps", opts.intermediate_time_steps.is_some()),
                ("trim_start", opts.trim_start.is_some()),
                ("trim_end", opts.trim_end.is_some()),
                ("step_size", opts.step_size.is_some()),
            ];
            for (attr, _) in managed.iter().filter(|(_, set)| *set) {
                tracing::warn!(
                    "`{attr}` is managed by `all_time_steps` and can therefore not be set manually."
                );
            }
            return Ok(Self {
                time_steps: num_frames - 1,
                intermediate_time_steps: true,
                trim_start: 0,
                trim_end: 0,
                step_size: 1,
                samples_per_sim: 1,
            });
        }

        let time_steps = opts.time_steps.unwrap_or(num_frames - 1);
        let trim_start = opts.trim_start.unwrap_or(0);
        let trim_end = opts.trim_end.unwrap_or(0);
        let step_size = opts.step_size.unwrap_or(1);
        if time_steps == 0 || step_size == 0 {
            return Err(Error::InvalidOptions(
                "time_steps and step_size must be positive".into(),
            ));
        }

        let used = time_steps + trim_start + trim_end;
        let samples_per_sim = num_frames.saturating_sub(used) / step_size;
        if samples_per_sim == 0 {
            return Err(Error::InvalidOptions(format!(
                "no samples: time_steps={time_steps}, trim_start={trim_start}, trim_end={trim_end}, \
                 step_size={step_size} leave nothing of {num_frames} frames"
            )));
        }

        Ok(Self {
            time_steps,
            intermediate_time_steps: opts.intermediate_time_steps.unwrap_or(false),
            trim_start,
            trim_end,
            step_size,
            samples_per_sim,
        })
    }
}

/// One input/target pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// `(channels, spatial...)`
    pub input: ArrayD<f32>,
    /// `(channels, spatial...)`, or `(time_steps, channels, spatial...)`
    /// with intermediate time steps.
    pub target: ArrayD<f32>,
    /// Selected constants, normalized if requested.
    pub constants: Vec<f64>,
    pub constants_raw: Vec<f64>,
}

pub struct Dataset {
    name: String,
    path: PathBuf,
    file: hdf5::File,
    meta: Metadata,
    sampling: Sampling,
    sims: Vec<usize>,
    const_idx: Vec<usize>,
    sel_channels: Option<Vec<usize>>,
    norm_data: Option<Normalizer>,
    norm_const: Option<Normalizer>,
}

impl Dataset {
    /// Opens `name` using the configuration from [`Config::load`].
    pub fn open(name: &str, opts: DatasetOptions) -> Result<Self> {
        Self::open_with_config(name, opts, &Config::load()?)
    }

    pub fn open_with_config(name: &str, opts: DatasetOptions, config: &Config) -> Result<Self> {
        let index = Index::load(config);
        let path = match index.locate(name) {
            Some(Source::Local) => config.dataset_path_local(name),
            Some(Source::Global { single_file }) => {
                fetch_global(name, single_file, config, &opts)?;
                config.dataset_path_global(name)
            }
            None => {
                let err = Error::NotFound {
                    name: name.to_string(),
                    available: index.names().join(", "),
                };
                tracing::error!("{err}");
                return Err(err);
            }
        };
        Self::open_path(name, &path, opts)
    }

    /// Opens a dataset file directly, bypassing the index.
    pub fn open_path<P: AsRef<Path>>(name: &str, path: P, opts: DatasetOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = hdf5::File::open(&path)?;
        let meta = Metadata::read(&file)?;
        meta.validate(&file)?;

        let sampling = Sampling::resolve(&opts, meta.num_frames())?;

        let sims = match &opts.sel_sims {
            Some(sel) if !sel.is_empty() => {
                if let Some(s) = sel.iter().find(|s| !meta.sim_ids.contains(*s)) {
                    return Err(Error::InvalidOptions(format!(
                        "simulation {s} is not part of '{name}'"
                    )));
                }
                sel.clone()
            }
            _ => meta.sim_ids.clone(),
        };

        if let Some(sel) = &opts.sel_channels {
            if let Some(c) = sel.iter().find(|&&c| c >= meta.num_channels()) {
                return Err(Error::InvalidOptions(format!(
                    "channel {c} out of range, '{name}' has {} channels",
                    meta.num_channels()
                )));
            }
        }
        let const_idx = meta.const_indices(opts.sel_const.as_deref())?;

        let selected = match &opts.sel_sims {
            Some(sel) if !sel.is_empty() => format!("({} selected) ", sel.len()),
            _ => String::new(),
        };
        tracing::info!(
            "Loaded {name} with {} simulations {selected}and {} samples each.",
            meta.num_sims(),
            sampling.samples_per_sim
        );

        let show_progress = !opts.disable_progress;
        if opts.clear_norm_data {
            file = with_writable(&path, file, NormStats::clear)?.0;
        }

        let stats = if opts.normalize_data.is_some() || opts.normalize_const.is_some() {
            match NormStats::load(&file, &meta)? {
                Some(stats) => Some(stats),
                None => {
                    tracing::info!(
                        "No precomputed normalization data found (or not complete). Calculating data..."
                    );
                    let (reopened, stats) = with_writable(&path, file, |rw| {
                        NormStats::calculate(rw, &meta, show_progress)
                    })?;
                    file = reopened;
                    Some(stats)
                }
            }
        } else {
            None
        };

        let norm_data = opts
            .normalize_data
            .zip(stats.as_ref())
            .map(|(strategy, stats)| Normalizer::for_data(strategy, stats))
            .transpose()?;
        let norm_const = opts
            .normalize_const
            .zip(stats.as_ref())
            .map(|(strategy, stats)| Normalizer::for_constants(strategy, stats, &const_idx))
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            path,
            file,
            meta,
            sampling,
            sims,
            const_idx,
            sel_channels: opts.sel_channels,
            norm_data,
            norm_const,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn sampling(&self) -> &Sampling {
        &self.sampling
    }

    /// Number of simulations in the file, selected or not.
    pub fn num_sims(&self) -> usize {
        self.meta.num_sims()
    }

    pub fn selected_sims(&self) -> &[usize] {
        &self.sims
    }

    /// Names of the constants returned with each sample, in order.
    pub fn constant_names(&self) -> Vec<&str> {
        self.const_idx
            .iter()
            .map(|&i| self.meta.constants[i].as_str())
            .collect()
    }

    pub fn norm_data(&self) -> Option<&Normalizer> {
        self.norm_data.as_ref()
    }

    pub fn norm_const(&self) -> Option<&Normalizer> {
        self.norm_const.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sims.len() * self.sampling.samples_per_sim
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Result<Sample> {
        let len = self.len();
        if idx >= len {
            return Err(Error::IndexOutOfRange { index: idx, len });
        }
        let s = &self.sampling;

        let sim = sim_dataset(&self.file, self.sims[idx / s.samples_per_sim])?;
        let constants_raw = sim_constants(&sim, &self.meta.constants, &self.const_idx)?;

        let input_frame = s.trim_start + (idx % s.samples_per_sim) * s.step_size;
        let target_frame = input_frame + s.time_steps;

        let (mut input, mut target, channel_axis) = if s.intermediate_time_steps {
            let frames = read_frames::<f32>(&sim, input_frame..target_frame + 1)?;
            let input = frames.index_axis(Axis(0), 0).to_owned();
            let target = frames.slice_axis(Axis(0), Slice::from(1..)).to_owned();
            (input, target, Axis(1))
        } else {
            let input = read_frames::<f32>(&sim, input_frame..input_frame + 1)?
                .index_axis_move(Axis(0), 0);
            let target = read_frames::<f32>(&sim, target_frame..target_frame + 1)?
                .index_axis_move(Axis(0), 0);
            (input, target, Axis(0))
        };

        if let Some(norm) = &self.norm_data {
            norm.normalize(&mut input, Axis(0))?;
            norm.normalize(&mut target, channel_axis)?;
        }

        let mut constants = constants_raw.clone();
        if let Some(norm) = &self.norm_const {
            norm.normalize_values(&mut constants)?;
        }

        if let Some(sel) = &self.sel_channels {
            input = input.select(Axis(0), sel);
            target = target.select(channel_axis, sel);
        }

        Ok(Sample {
            input,
            target,
            constants,
            constants_raw,
        })
    }

    /// Sample indices of each selected simulation.
    pub fn iterate_sims(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let spp = self.sampling.samples_per_sim;
        (0..self.sims.len()).map(move |s| s * spp..(s + 1) * spp)
    }

    /// The raw HDF5 dataset of simulation `sim`.
    pub fn sim_raw(&self, sim: usize) -> Result<hdf5::Dataset> {
        sim_dataset(&self.file, sim)
    }

    pub fn h5_raw(&self) -> &hdf5::File {
        &self.file
    }

    /// Human-readable description of the physics behind the dataset.
    pub fn info(&self) -> String {
        let bold = |s: &str| console::style(s).bold().to_string();
        let meta = &self.meta;
        let mut out = String::new();

        let _ = writeln!(out, "{} {}", bold("PDE:"), meta.pde.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "{} {}", bold("Fields Scheme:"), meta.fields_scheme);
        match meta.dt {
            Some(dt) => {
                let _ = writeln!(out, "{} {dt}", bold("Dt:"));
            }
            None => {
                let _ = writeln!(out, "{} -", bold("Dt:"));
            }
        }

        let _ = writeln!(out, "\n{}", bold("Fields:"));
        describe(&mut out, &meta.fields, meta.field_desc.as_deref());
        let _ = writeln!(out, "\n{}", bold("Constants:"));
        describe(&mut out, &meta.constants, meta.const_desc.as_deref());
        out
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("sampling", &self.sampling)
            .field("sims", &self.sims)
            .finish_non_exhaustive()
    }
}

fn describe(out: &mut String, names: &[String], desc: Option<&[String]>) {
    for (i, name) in names.iter().enumerate() {
        let _ = match desc.and_then(|d| d.get(i)) {
            Some(d) => writeln!(out, "   {name}:\t{d}"),
            None => writeln!(out, "   {name}"),
        };
    }
}

/// Closes `file`, runs `f` on a read-write handle, then reopens read-only.
fn with_writable<T>(
    path: &Path,
    file: hdf5::File,
    f: impl FnOnce(&hdf5::File) -> Result<T>,
) -> Result<(hdf5::File, T)> {
    drop(file);
    let out = {
        let rw = hdf5::File::open_rw(path)?;
        f(&rw)
    };
    let file = hdf5::File::open(path)?;
    Ok((file, out?))
}

#[cfg(feature = "download")]
fn fetch_global(name: &str, single_file: bool, config: &Config, opts: &DatasetOptions) -> Result<()> {
    use super::fetcher;

    if config.offline {
        return require_on_disk(name, config, opts);
    }
    let show_progress = !opts.disable_progress;
    if single_file {
        if !config.dataset_path_global(name).exists() {
            tracing::warn!(
                "`{name}` is stored in single-file format. The download might take some time."
            );
        }
        fetcher::dl_single_file(name, config, show_progress)
    } else {
        fetcher::dl_parts(name, config, opts.sel_sims.as_deref(), show_progress).map(|_| ())
    }
}

#[cfg(not(feature = "download"))]
fn fetch_global(name: &str, _single_file: bool, config: &Config, opts: &DatasetOptions) -> Result<()> {
    require_on_disk(name, config, opts)
}

/// Checks that a global dataset, and every selected simulation of it, has
/// already been downloaded.
fn require_on_disk(name: &str, config: &Config, opts: &DatasetOptions) -> Result<()> {
    let path = config.dataset_path_global(name);
    if !path.exists() {
        return Err(Error::DownloadDisabled(name.to_string()));
    }
    if let Some(sel) = opts.sel_sims.as_deref().filter(|s| !s.is_empty()) {
        let file = hdf5::File::open(&path)?;
        let missing: Vec<usize> = sel
            .iter()
            .copied()
            .filter(|&s| !file.link_exists(&sim_path(s)))
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingSims {
                name: name.to_string(),
                sims: missing,
            });
        }
    }
    Ok(())
}
