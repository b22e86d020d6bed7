//! Metadata stored in dataset files, and the low-level reads built on it.
//!
//! A dataset file holds a group `sims` with one dataset `sim<i>` per
//! simulation, shaped `(frames, fields, spatial...)`. Dataset-wide metadata
//! lives in attributes of `sims`; each simulation carries its constants as
//! float attributes.

use std::{collections::BTreeSet, ops::Range};

use hdf5::{
    types::{VarLenAscii, VarLenUnicode},
    H5Type, Location,
};
use ndarray::{ArrayD, IxDyn, SliceInfo, SliceInfoElem};

use super::errors::{Error, Result};

pub const SIMS_GROUP: &str = "sims";

pub const ATTR_PDE: &str = "PDE";
pub const ATTR_FIELDS_SCHEME: &str = "Fields Scheme";
pub const ATTR_FIELDS: &str = "Fields";
pub const ATTR_CONSTANTS: &str = "Constants";
pub const ATTR_DT: &str = "Dt";
pub const ATTR_FIELD_DESC: &str = "Field Desc";
pub const ATTR_CONST_DESC: &str = "Constant Desc";

#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub pde: Option<String>,
    pub fields_scheme: String,
    pub fields: Vec<String>,
    pub constants: Vec<String>,
    pub dt: Option<f64>,
    pub field_desc: Option<Vec<String>>,
    pub const_desc: Option<Vec<String>>,
    /// Numeric suffixes of the `sim<i>` members, ascending.
    pub sim_ids: Vec<usize>,
    pub sim_shape: Vec<usize>,
}

impl Metadata {
    pub fn read(file: &hdf5::File) -> Result<Self> {
        let sims = file
            .group(SIMS_GROUP)
            .map_err(|_| Error::Corrupt(format!("missing group '{SIMS_GROUP}'")))?;
        let names: BTreeSet<String> = sims.attr_names()?.into_iter().collect();

        let fields_scheme = if names.contains(ATTR_FIELDS_SCHEME) {
            read_str_attr(&sims, ATTR_FIELDS_SCHEME)?
        } else {
            return Err(Error::Corrupt(format!("missing attribute '{ATTR_FIELDS_SCHEME}'")));
        };
        let opt_str = |name: &str| -> Result<Option<String>> {
            names.contains(name).then(|| read_str_attr(&sims, name)).transpose()
        };
        let opt_list = |name: &str| -> Result<Option<Vec<String>>> {
            names.contains(name).then(|| read_str_list_attr(&sims, name)).transpose()
        };

        let pde = opt_str(ATTR_PDE)?;
        let fields = opt_list(ATTR_FIELDS)?.unwrap_or_default();
        let constants = opt_list(ATTR_CONSTANTS)?.unwrap_or_default();
        let field_desc = opt_list(ATTR_FIELD_DESC)?;
        let const_desc = opt_list(ATTR_CONST_DESC)?;
        let dt = if names.contains(ATTR_DT) {
            Some(sims.attr(ATTR_DT)?.read_scalar::<f64>()?)
        } else {
            None
        };

        let mut sim_ids = Vec::new();
        for member in sims.member_names()? {
            match parse_sim_name(&member) {
                Some(id) => sim_ids.push(id),
                None => tracing::warn!("ignoring unexpected member '{SIMS_GROUP}/{member}'"),
            }
        }
        sim_ids.sort_unstable();
        let first = sim_ids
            .first()
            .ok_or_else(|| Error::Corrupt("dataset contains no simulations".into()))?;
        let sim_shape = sim_dataset(file, *first)?.shape();

        Ok(Self {
            pde,
            fields_scheme,
            fields,
            constants,
            dt,
            field_desc,
            const_desc,
            sim_ids,
            sim_shape,
        })
    }

    /// Basic consistency checks over every simulation in `file`.
    pub fn validate(&self, file: &hdf5::File) -> Result<()> {
        if self.sim_shape.len() < 3 {
            return Err(Error::Corrupt(
                "simulation data must have shape (frames, fields, spatial dims...)".into(),
            ));
        }

        let scheme_len = self.fields_scheme.chars().count();
        if scheme_len != self.sim_shape[1] {
            return Err(Error::FieldMismatch {
                meta: scheme_len,
                sims: self.sim_shape[1],
            });
        }

        for &id in &self.sim_ids {
            let sim = sim_dataset(file, id)?;
            if sim.shape() != self.sim_shape {
                return Err(Error::Corrupt(format!(
                    "the shape of all simulations must be consistent: sim{} has {:?}, sim{id} has {:?}",
                    self.sim_ids[0],
                    self.sim_shape,
                    sim.shape()
                )));
            }

            let defined: BTreeSet<String> = sim.attr_names()?.into_iter().collect();
            let missing: Vec<&str> = self
                .constants
                .iter()
                .filter(|c| !defined.contains(c.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(Error::Corrupt(format!(
                    "simulation {id} does not define all declared constants: {missing:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn num_sims(&self) -> usize {
        self.sim_ids.len()
    }

    pub fn num_frames(&self) -> usize {
        self.sim_shape[0]
    }

    pub fn num_channels(&self) -> usize {
        self.sim_shape[1]
    }

    pub fn field_groups(&self) -> Vec<Range<usize>> {
        field_groups(&self.fields_scheme)
    }

    /// Positions of the `sel_const` names among the declared constants, or
    /// all positions.
    pub fn const_indices(&self, sel_const: Option<&[String]>) -> Result<Vec<usize>> {
        let Some(sel) = sel_const else {
            return Ok((0..self.constants.len()).collect());
        };
        sel.iter()
            .map(|name| {
                self.constants.iter().position(|c| c == name).ok_or_else(|| {
                    Error::InvalidOptions(format!(
                        "unknown constant '{name}', declared constants are {:?}",
                        self.constants
                    ))
                })
            })
            .collect()
    }
}

/// Channel ranges of the fields in a scheme string. Runs of the same letter
/// (ignoring case) form one vector field.
pub fn field_groups(scheme: &str) -> Vec<Range<usize>> {
    let mut groups: Vec<Range<usize>> = Vec::new();
    let mut prev = None;
    for (i, c) in scheme.chars().map(|c| c.to_ascii_lowercase()).enumerate() {
        match groups.last_mut() {
            Some(last) if prev == Some(c) => last.end = i + 1,
            _ => groups.push(i..i + 1),
        }
        prev = Some(c);
    }
    groups
}

fn parse_sim_name(name: &str) -> Option<usize> {
    name.strip_prefix("sim")?.parse().ok()
}

pub fn sim_path(id: usize) -> String {
    format!("{SIMS_GROUP}/sim{id}")
}

pub fn sim_dataset(file: &hdf5::File, id: usize) -> Result<hdf5::Dataset> {
    Ok(file.dataset(&sim_path(id))?)
}

/// Values of the selected constants of one simulation, in selection order.
pub fn sim_constants(sim: &hdf5::Dataset, names: &[String], idx: &[usize]) -> Result<Vec<f64>> {
    idx.iter()
        .map(|&i| Ok(sim.attr(&names[i])?.read_scalar::<f64>()?))
        .collect()
}

/// Reads frames `frames` of a simulation, keeping every other axis whole.
pub fn read_frames<T: H5Type>(sim: &hdf5::Dataset, frames: Range<usize>) -> Result<ArrayD<T>> {
    let ndim = sim.ndim();
    let mut elems = Vec::with_capacity(ndim);
    elems.push(SliceInfoElem::Slice {
        start: frames.start as isize,
        end: Some(frames.end as isize),
        step: 1,
    });
    elems.extend((1..ndim).map(|_| SliceInfoElem::from(..)));
    let info = SliceInfo::<Vec<SliceInfoElem>, IxDyn, IxDyn>::try_from(elems)?;
    Ok(sim.read_slice::<T, _, IxDyn>(info)?)
}

pub(crate) fn read_str_attr(loc: &Location, name: &str) -> Result<String> {
    let attr = loc.attr(name)?;
    if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
        return Ok(s.as_str().to_owned());
    }
    Ok(attr.read_scalar::<VarLenAscii>()?.as_str().to_owned())
}

pub(crate) fn read_str_list_attr(loc: &Location, name: &str) -> Result<Vec<String>> {
    let attr = loc.attr(name)?;
    if let Ok(v) = attr.read_raw::<VarLenUnicode>() {
        return Ok(v.iter().map(|s| s.as_str().to_owned()).collect());
    }
    Ok(attr
        .read_raw::<VarLenAscii>()?
        .iter()
        .map(|s| s.as_str().to_owned())
        .collect())
}
