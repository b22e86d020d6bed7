//! Which datasets exist, locally and on the hub.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{errors::Result, meta::Metadata};
use crate::config::Config;

/// Index record of one dataset. Mirrors the `meta_all.json` files on the hub;
/// keys this crate does not interpret are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "PDE", default, skip_serializing_if = "Option::is_none")]
    pub pde: Option<String>,
    #[serde(rename = "Fields Scheme", default, skip_serializing_if = "Option::is_none")]
    pub fields_scheme: Option<String>,
    #[serde(rename = "Fields", default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(rename = "Constants", default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<String>,
    #[serde(rename = "Dt", default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    #[serde(rename = "isSingleFile", default)]
    pub is_single_file: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&Metadata> for IndexEntry {
    fn from(meta: &Metadata) -> Self {
        Self {
            pde: meta.pde.clone(),
            fields_scheme: Some(meta.fields_scheme.clone()),
            fields: meta.fields.clone(),
            constants: meta.constants.clone(),
            dt: meta.dt,
            is_single_file: true,
            extra: Map::new(),
        }
    }
}

pub type Entries = BTreeMap<String, IndexEntry>;

/// Where a dataset will be loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Global { single_file: bool },
}

#[derive(Debug, Clone, Default)]
pub struct Index {
    pub local: Entries,
    pub global: Entries,
}

impl Index {
    pub fn load(config: &Config) -> Self {
        Self {
            local: scan_local(config),
            global: global_index(config),
        }
    }

    /// Global entries overlaid by local ones.
    pub fn merged(&self) -> Entries {
        let mut all = self.global.clone();
        all.extend(self.local.iter().map(|(k, v)| (k.clone(), v.clone())));
        all
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .global
            .keys()
            .chain(self.local.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.local.get(name).or_else(|| self.global.get(name))
    }

    pub fn locate(&self, name: &str) -> Option<Source> {
        if self.local.contains_key(name) {
            return Some(Source::Local);
        }
        self.global.get(name).map(|e| Source::Global {
            single_file: e.is_single_file,
        })
    }
}

/// Merged index of local and global datasets.
pub fn index(config: &Config) -> Entries {
    Index::load(config).merged()
}

/// Names of every dataset that can be opened.
pub fn datasets(config: &Config) -> Vec<String> {
    Index::load(config).names()
}

/// Datasets lying directly in `local_datasets_dir`.
pub fn scan_local(config: &Config) -> Entries {
    let mut entries = Entries::new();
    let dir = &config.local_datasets_dir;
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!("not scanning {}: {e}", dir.display());
            return entries;
        }
    };

    for dirent in read_dir.flatten() {
        let path = dirent.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(config.dataset_ext.as_str()))
        else {
            continue;
        };
        match read_entry(&path) {
            Ok(entry) => {
                entries.insert(name.to_string(), entry);
            }
            Err(e) => tracing::warn!("skipping {}: {e}", path.display()),
        }
    }
    entries
}

fn read_entry(path: &Path) -> Result<IndexEntry> {
    let file = hdf5::File::open(path)?;
    Ok(IndexEntry::from(&Metadata::read(&file)?))
}

/// Global index: refreshed from the hub unless offline, then served from the
/// on-disk cache.
pub fn global_index(config: &Config) -> Entries {
    if !config.offline {
        refresh_cache(config);
    }
    read_cache(config)
}

#[cfg(feature = "download")]
fn refresh_cache(config: &Config) {
    let fetched = super::fetcher::fetch_global_index(config)
        .and_then(|entries| write_cache(config, &entries));
    if let Err(e) = fetched {
        tracing::warn!("Failed to fetch global dataset index ({e}). Check your internet connection.");
    }
}

#[cfg(not(feature = "download"))]
fn refresh_cache(_config: &Config) {
    tracing::debug!("downloads disabled, using the cached global index");
}

pub(crate) fn write_cache(config: &Config, entries: &Entries) -> Result<()> {
    let path = config.index_cache_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_vec(entries)?)?;
    Ok(())
}

pub(crate) fn read_cache(config: &Config) -> Entries {
    let path = config.index_cache_path();
    let parsed = std::fs::read(&path)
        .map_err(super::errors::Error::from)
        .and_then(|bytes| Ok(serde_json::from_slice::<Entries>(&bytes)?));
    match parsed {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                "Global index is not in cache or corrupted ({e}). Global datasets will not be accessible."
            );
            Entries::new()
        }
    }
}
