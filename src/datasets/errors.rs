use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "download")]
    #[error("transfer failed: {0}")]
    Curl(#[from] curl::Error),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u32 },

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("dataset '{name}' not found, datasets available are: {available}")]
    NotFound { name: String, available: String },

    #[error("dataset '{0}' is not on disk and downloads are disabled")]
    DownloadDisabled(String),

    #[error("simulations {sims:?} of '{name}' are not on disk and downloads are disabled")]
    MissingSims { name: String, sims: Vec<usize> },

    #[error("corrupt dataset: {0}")]
    Corrupt(String),

    #[error("inconsistent number of fields between metadata ({meta}) and simulations ({sims})")]
    FieldMismatch { meta: usize, sims: usize },

    #[error("a partition file must contain exactly one simulation, found {0} entries")]
    InvalidPartition(usize),

    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("unknown normalization strategy '{0}'")]
    UnknownNormStrategy(String),

    #[error("normalization statistics are missing or incomplete")]
    MissingNormData,

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
