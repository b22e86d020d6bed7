//! Runtime configuration.
//!
//! The defaults ship inside the crate as `config.json`. A user file can
//! override any subset of keys, and `PBDL_*` environment variables override
//! both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datasets::errors::{Error, Result};

const BUNDLED: &str = include_str!("config.json");

const INDEX_CACHE_FILE: &str = "global_index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for datasets that are already on disk.
    pub local_datasets_dir: PathBuf,
    /// Directory that receives downloaded datasets and the index cache.
    pub global_dataset_dir: PathBuf,
    /// File extension of dataset files, including the dot.
    pub dataset_ext: String,
    /// Hugging Face dataset repository holding the global datasets.
    pub hf_repo_id: String,
    pub hf_endpoint: String,
    /// Never touch the network; the global index comes from the cache only.
    pub offline: bool,
}

impl Config {
    /// The configuration bundled with the crate.
    pub fn bundled() -> Result<Self> {
        serde_json::from_str(BUNDLED).map_err(|e| Error::Config(format!("bundled config: {e}")))
    }

    /// Bundled defaults overlaid with the keys present in `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::merged(user)
    }

    /// Bundled defaults overlaid with `PBDL_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut config = Self::bundled()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn merged(user: Value) -> Result<Self> {
        let mut base: Value = serde_json::from_str(BUNDLED)
            .map_err(|e| Error::Config(format!("bundled config: {e}")))?;
        match (base.as_object_mut(), user) {
            (Some(base), Value::Object(user)) => base.extend(user),
            _ => return Err(Error::Config("configuration must be a JSON object".into())),
        }
        serde_json::from_value(base).map_err(|e| Error::Config(e.to_string()))
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) -> Result<()> {
        if let Some(v) = var("PBDL_LOCAL_DATASETS_DIR") {
            self.local_datasets_dir = v.into();
        }
        if let Some(v) = var("PBDL_GLOBAL_DATASET_DIR") {
            self.global_dataset_dir = v.into();
        }
        if let Some(v) = var("PBDL_HF_REPO_ID") {
            self.hf_repo_id = v;
        }
        if let Some(v) = var("PBDL_HF_ENDPOINT") {
            self.hf_endpoint = v;
        }
        if let Some(v) = var("PBDL_OFFLINE") {
            self.offline = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => return Err(Error::Config(format!("PBDL_OFFLINE: invalid value '{other}'"))),
            };
        }
        Ok(())
    }

    fn file_name(&self, name: &str) -> String {
        format!("{name}{}", self.dataset_ext)
    }

    pub fn dataset_path_local(&self, name: &str) -> PathBuf {
        self.local_datasets_dir.join(self.file_name(name))
    }

    pub fn dataset_path_global(&self, name: &str) -> PathBuf {
        self.global_dataset_dir.join(self.file_name(name))
    }

    pub fn index_cache_path(&self) -> PathBuf {
        self.global_dataset_dir.join(INDEX_CACHE_FILE)
    }

    /// `{endpoint}/datasets/{repo}/resolve/main/{path}`
    pub fn resolve_url(&self, path: &str) -> String {
        format!(
            "{}/datasets/{}/resolve/main/{path}",
            self.hf_endpoint.trim_end_matches('/'),
            self.hf_repo_id
        )
    }

    pub fn api_url(&self) -> String {
        format!(
            "{}/api/datasets/{}",
            self.hf_endpoint.trim_end_matches('/'),
            self.hf_repo_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_bundled_parses() {
        let config = Config::bundled().unwrap();
        assert_eq!(config.dataset_ext, ".hdf5");
        assert!(!config.offline);
        assert_eq!(
            config.dataset_path_global("wake"),
            config.global_dataset_dir.join("wake.hdf5")
        );
    }

    #[test]
    fn test_file_overrides_subset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"local_datasets_dir": "/data/sims", "offline": true}}"#).unwrap();

        let config = Config::from_file(f.path()).unwrap();
        assert_eq!(config.local_datasets_dir, PathBuf::from("/data/sims"));
        assert!(config.offline);
        assert_eq!(config.dataset_ext, Config::bundled().unwrap().dataset_ext);
    }

    #[test]
    fn test_file_must_be_object() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "[1, 2]").unwrap();
        assert!(matches!(Config::from_file(f.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PBDL_HF_REPO_ID", "someone/mirror"),
            ("PBDL_HF_ENDPOINT", "http://localhost:8080/"),
            ("PBDL_OFFLINE", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::bundled().unwrap();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.offline);
        assert_eq!(config.api_url(), "http://localhost:8080/api/datasets/someone/mirror");
        assert_eq!(
            config.resolve_url("wake/meta_all.json"),
            "http://localhost:8080/datasets/someone/mirror/resolve/main/wake/meta_all.json"
        );
    }

    #[test]
    fn test_env_rejects_bad_flag() {
        let mut config = Config::bundled().unwrap();
        let err = config
            .apply_env(|k| (k == "PBDL_OFFLINE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
