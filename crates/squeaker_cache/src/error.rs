//! Error types for the cache store, stage resolver and maintainer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the raw content-addressed store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{prefix} matches more than one entry: {matches:?}")]
    AmbiguousPrefix { prefix: String, matches: Vec<String> },
}

/// Raised by a [`crate::collab::UrlFetcher`] when a fetch could not complete.
#[derive(Debug, Error)]
pub enum FetchStageError {
    #[error("fetch failed with status {status}: {url}")]
    BadStatus {
        url: String,
        status: u16,
        headers: Vec<(String, String)>,
    },

    #[error("could not read file url {0}: {1}")]
    FileUnreadable(String, std::io::Error),

    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },
}

/// Raised by a [`crate::collab::Archiver`].
#[derive(Debug, Error)]
pub enum ArchiveStageError {
    #[error("archive is missing a *.image entry")]
    MissingImageEntry,

    #[error("archive's *.changes entry does not match its *.image stem")]
    MismatchedChangesEntry,

    #[error("archive error: {0}")]
    Other(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by a [`crate::collab::VmRunner`].
#[derive(Debug, Error)]
pub enum VmStageError {
    #[error("VM exited with status {status}: {errors}")]
    NonZeroExit { status: i32, errors: String },

    #[error("io error launching VM: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error surfaced by the stage resolver and cache maintainer.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchStageError),

    #[error("archive malformed: {0}")]
    Archive(#[from] ArchiveStageError),

    #[error("VM failed: {0}")]
    Vm(#[from] VmStageError),

    #[error("cache miss: parent stage {stage_digest} is not present on disk")]
    CacheMiss { stage_digest: String },

    #[error("resource file is missing: {0}")]
    ResourceMissing(PathBuf),

    #[error("unknown stage_type in stored record")]
    Internal(String),

    #[error("malformed digest input: {0}")]
    Digest(#[from] hex::FromHexError),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("stage not found: {0}")]
    StageNotFound(String),

    #[error("ambiguous reference {reference}: matches {matches:?}")]
    AmbiguousReference {
        reference: String,
        matches: Vec<String>,
    },
}
