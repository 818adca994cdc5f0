use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decode capture image: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid capture manifest: {0}")]
    InvalidManifest(String),

    #[error("no captures available for this run")]
    NoCaptures,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("name '{0}' is shorter than 2 characters")]
    NameTooShort(String),

    #[error("correction '{0}' would map a name onto itself")]
    SelfCorrection(String),

    #[error("'{0}' is not a known name")]
    UnknownName(String),

    #[error("no correction is registered for '{0}'")]
    UnknownCorrection(String),

    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("registry document is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend '{backend}' exceeded its {limit_ms} ms budget")]
    Timeout { backend: String, limit_ms: u64 },

    #[error("backend returned a malformed response: {0}")]
    Malformed(String),

    #[error("backend '{0}' cannot recognize this region kind")]
    UnsupportedRegion(String),

    #[error("backend failed: {0}")]
    Failed(String),

    #[error("backend call abandoned because the run was cancelled")]
    Cancelled,
}
