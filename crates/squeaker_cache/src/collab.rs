//! Narrow interfaces to the core's external collaborators.
//!
//! The stage resolver treats the Smalltalk VM, the URL transport and the
//! ZIP image-blob codec as opaque collaborators it calls through these
//! traits. Concrete implementations live in `squeaker_fetch`,
//! `squeaker_archive` and `squeaker_vm`; the CLI binary wires them in.

use std::io::Write;
use std::path::Path;

use crate::error::{ArchiveStageError, FetchStageError, VmStageError};

/// A byte-streaming source for `url:`/`file:` fetches.
pub trait UrlFetcher {
    /// Stream the body of `url` into `dest`. An HTTP response outside the
    /// 2xx range, or an unreadable `file:` path, is a [`FetchStageError`].
    fn fetch_to(&self, url: &str, dest: &mut dyn Write) -> Result<(), FetchStageError>;
}

/// A content-addressed blob codec: the image blob ZIP format.
pub trait Archiver {
    /// Extract the archive's single `*.image`/`*.changes` pair into
    /// `work_dir` as `squeak.image`/`squeak.changes`.
    fn extract(&self, blob_path: &Path, work_dir: &Path) -> Result<(), ArchiveStageError>;

    /// Re-pack `work_dir`'s `squeak.image`/`squeak.changes` into a new ZIP
    /// archive, returning its bytes.
    fn pack(&self, work_dir: &Path) -> Result<Vec<u8>, ArchiveStageError>;
}

/// The Smalltalk VM, spawned as an opaque child process.
pub trait VmRunner {
    /// Run `vm_path` against the image in `work_dir`, applying `chunk`.
    /// On success, `work_dir`'s `squeak.image`/`squeak.changes` reflect the
    /// applied chunk.
    fn run(
        &self,
        vm_path: &str,
        work_dir: &Path,
        chunk: &str,
        headless: bool,
    ) -> Result<(), VmStageError>;
}
