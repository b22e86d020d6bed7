//! Global datasets on the Hugging Face hub.
//!
//! A dataset is stored either as one file `<name><ext>` at the top of the
//! repository, or partitioned into a directory `<name>/` holding one file
//! `sim<i><ext>` per simulation plus `meta_all.json`.

use std::{collections::BTreeSet, path::Path};

use hdf5::types::VarLenUnicode;
use ndarray::{arr0, Array1};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    download::{download_to_file, fetch_bytes},
    errors::{Error, Result},
    index::{Entries, IndexEntry},
    meta::{read_str_attr, sim_path, SIMS_GROUP},
    normalization::NormStats,
    progress::count_bar,
};
use crate::config::Config;

#[derive(Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Deserialize)]
struct Sibling {
    rfilename: String,
}

/// Every file path in the dataset repository.
pub fn repo_file_list(config: &Config) -> Result<Vec<String>> {
    let body = fetch_bytes(&config.api_url(), false)?;
    let info: RepoInfo = serde_json::from_slice(&body)?;
    Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
}

/// Splits a repository listing into partitioned datasets (first-level
/// directories) and single-file datasets (first-level `*ext` files).
pub(crate) fn classify_listing(files: &[String], ext: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut dirs = BTreeSet::new();
    let mut singles = BTreeSet::new();
    for f in files {
        match f.split_once('/') {
            Some((dir, _)) => {
                dirs.insert(dir.to_string());
            }
            None => {
                if let Some(name) = f.strip_suffix(ext) {
                    singles.insert(name.to_string());
                }
            }
        }
    }
    (dirs, singles)
}

/// Number of partitions of `name`; numbering is expected to be consecutive.
pub(crate) fn count_partitions(files: &[String], name: &str) -> usize {
    let prefix = format!("{name}/sim");
    files.iter().filter(|f| f.starts_with(&prefix)).count()
}

/// Builds the global index from the hub.
pub fn fetch_global_index(config: &Config) -> Result<Entries> {
    let files = repo_file_list(config)?;
    let (dirs, singles) = classify_listing(&files, &config.dataset_ext);

    let mut entries = Entries::new();
    for dir in dirs {
        let body = fetch_bytes(&config.resolve_url(&format!("{dir}/meta_all.json")), false)?;
        let mut entry: IndexEntry = serde_json::from_slice(&body)?;
        entry.is_single_file = false;
        entries.insert(dir, entry);
    }
    for name in singles {
        // metadata of single-file datasets is optional
        let url = config.resolve_url(&format!("{name}.json"));
        let mut entry = match fetch_bytes(&url, false)
            .and_then(|body| Ok(serde_json::from_slice::<IndexEntry>(&body)?))
        {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("no metadata for {name}: {e}");
                IndexEntry::default()
            }
        };
        entry.is_single_file = true;
        entries.insert(name, entry);
    }
    Ok(entries)
}

/// Downloads a single-file dataset unless it is already on disk.
pub fn dl_single_file(name: &str, config: &Config, show_progress: bool) -> Result<()> {
    let dest = config.dataset_path_global(name);
    if dest.exists() {
        return Ok(());
    }
    let url = config.resolve_url(&format!("{name}{}", config.dataset_ext));
    download_to_file(&url, &dest, show_progress)
}

/// Adds the partitions `sims` (all of them when `None`) of a partitioned
/// dataset to its local file. Returns whether any simulation was added, in
/// which case cached normalization statistics are dropped.
pub fn dl_parts(
    name: &str,
    config: &Config,
    sims: Option<&[usize]>,
    show_progress: bool,
) -> Result<bool> {
    std::fs::create_dir_all(&config.global_dataset_dir)?;
    let dest = config.dataset_path_global(name);

    let sims: Vec<usize> = match sims {
        Some(sims) if !sims.is_empty() => sims.to_vec(),
        _ => (0..count_partitions(&repo_file_list(config)?, name)).collect(),
    };

    let file = hdf5::File::append(&dest)?;
    let pb = count_bar(show_progress, sims.len() as u64);
    pb.set_message(format!("downloading {name}"));

    let mut modified = false;
    for &s in &sims {
        if !file.link_exists(&sim_path(s)) {
            if !modified {
                NormStats::clear(&file)?;
                modified = true;
            }
            let url = config.resolve_url(&format!("{name}/sim{s}{}", config.dataset_ext));
            let body = fetch_bytes(&url, false)?;
            let part = tempfile::Builder::new()
                .prefix(".partition")
                .suffix(&config.dataset_ext)
                .tempfile_in(&config.global_dataset_dir)?;
            std::fs::write(part.path(), &body)?;
            merge_partition(&file, part.path(), s)?;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let body = fetch_bytes(&config.resolve_url(&format!("{name}/meta_all.json")), false)?;
    let meta: Map<String, Value> = serde_json::from_slice(&body)?;
    write_meta_attrs(&ensure_group(&file, SIMS_GROUP)?, &meta)?;

    tracing::info!("download of {name} completed");
    Ok(modified)
}

fn ensure_group(file: &hdf5::File, name: &str) -> Result<hdf5::Group> {
    if file.link_exists(name) {
        Ok(file.group(name)?)
    } else {
        Ok(file.create_group(name)?)
    }
}

enum SimData {
    F32(ndarray::ArrayD<f32>),
    F64(ndarray::ArrayD<f64>),
}

enum AttrValue {
    Float(f64),
    Text(VarLenUnicode),
}

/// Copies the single simulation of a partition file into `dest` as
/// `sims/sim<id>`, with its attributes. Nothing is left behind on failure.
pub(crate) fn merge_partition(dest: &hdf5::File, partition: &Path, id: usize) -> Result<()> {
    let part = hdf5::File::open(partition)?;
    let members = part.member_names()?.len();
    if members != 1 || !part.link_exists("sims/sim0") {
        return Err(Error::InvalidPartition(members));
    }
    let src = part.dataset("sims/sim0")?;

    let data = if src.dtype()?.size() == 4 {
        SimData::F32(src.read_dyn::<f32>()?)
    } else {
        SimData::F64(src.read_dyn::<f64>()?)
    };
    let mut attrs = Vec::new();
    for name in src.attr_names()? {
        if let Ok(v) = src.attr(&name)?.read_scalar::<f64>() {
            attrs.push((name, AttrValue::Float(v)));
            continue;
        }
        match read_str_attr(&src, &name) {
            Ok(text) => {
                let text = unicode(&text)?;
                attrs.push((name, AttrValue::Text(text)));
            }
            Err(e) => tracing::warn!("not copying attribute '{name}' of sim{id}: {e}"),
        }
    }

    let sims = ensure_group(dest, SIMS_GROUP)?;
    let name = format!("sim{id}");
    let builder = sims.new_dataset_builder();
    let copied = match &data {
        SimData::F32(a) => builder.with_data(a).create(name.as_str())?,
        SimData::F64(a) => builder.with_data(a).create(name.as_str())?,
    };

    let written = attrs.iter().try_for_each(|(key, value)| -> Result<()> {
        let builder = copied.new_attr_builder();
        match value {
            AttrValue::Float(v) => builder.with_data(&arr0(*v)).create(key.as_str())?,
            AttrValue::Text(t) => builder.with_data(&arr0(t.clone())).create(key.as_str())?,
        };
        Ok(())
    });
    if let Err(e) = written {
        drop(copied);
        if let Err(unlink) = sims.unlink(&name) {
            tracing::warn!("could not remove partial {SIMS_GROUP}/{name}: {unlink}");
        }
        return Err(e);
    }
    Ok(())
}

fn unicode(s: &str) -> Result<VarLenUnicode> {
    s.parse()
        .map_err(|_| Error::Corrupt(format!("metadata string contains a nul byte: {s:?}")))
}

/// Stores `meta_all.json` entries as attributes of `group`, replacing
/// attributes of the same name.
pub(crate) fn write_meta_attrs(group: &hdf5::Group, meta: &Map<String, Value>) -> Result<()> {
    let existing: BTreeSet<String> = group.attr_names()?.into_iter().collect();
    for (key, value) in meta {
        if !storable(value) {
            tracing::warn!("not storing metadata '{key}' of unsupported shape: {value}");
            continue;
        }
        if existing.contains(key) {
            group.delete_attr(key)?;
        }
        let builder = group.new_attr_builder();
        match value {
            Value::String(s) => {
                builder.with_data(&arr0(unicode(s)?)).create(key.as_str())?;
            }
            Value::Number(n) => {
                let v = n.as_f64().unwrap_or(f64::NAN);
                builder.with_data(&arr0(v)).create(key.as_str())?;
            }
            Value::Bool(b) => {
                builder.with_data(&arr0(*b)).create(key.as_str())?;
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
                let strings = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(unicode)
                    .collect::<Result<Array1<_>>>()?;
                builder.with_data(&strings).create(key.as_str())?;
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_number) => {
                let numbers: Array1<f64> = items.iter().filter_map(Value::as_f64).collect();
                builder.with_data(&numbers).create(key.as_str())?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn storable(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
        Value::Array(items) => {
            !items.is_empty()
                && (items.iter().all(Value::is_string) || items.iter().all(Value::is_number))
        }
        _ => false,
    }
}
