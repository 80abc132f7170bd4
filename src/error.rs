use thiserror::Error;

/// The failure kinds the traversal engine needs to tell apart. Everything
/// else travels as a plain `anyhow` error with context.
#[derive(Error, Debug)]
pub enum DepotError {
    #[error("unsupported index api-version {0:?}, only 1.x is supported")]
    UnsupportedIndexVersion(String),

    #[error("index response for {0} does not contain a list of files")]
    MalformedIndexResponse(String),

    #[error("package {0} not found in index")]
    PackageNotFound(String),

    #[error("no files match requirement {0}")]
    NoMatchingFiles(String),

    #[error("digest mismatch for {filename}: expected {expected}, got {actual}")]
    DigestMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
}
