//! Spawns the Smalltalk VM as a child process to apply one chunk.
//!
//! The VM is invoked as `<vm_path> [<headless_flag>] squeak.image <script>`
//! against a working directory already populated with `squeak.image` and
//! `squeak.changes` by the archive codec. The injected script redirects the
//! in-image streams to `output.txt`/`errors.txt`, evaluates the chunk inside
//! an exception trap, and snapshots-and-quits.

use std::path::{Path, PathBuf};
use std::process::Command;

use squeaker_cache::{VmRunner, VmStageError};

const SCRIPT_TEMPLATE: &str = r#"| result |
Transcript redirectTo: (FileStream fileNamed: 'output.txt').
[
    result := [((CHUNK_TEXT)) . nil] on: Error do: [:e |
        (FileStream fileNamed: 'errors.txt')
            nextPutAll: e messageText; nl;
            nextPutAll: e signalerContext backtrace; nl;
            close.
        Smalltalk snapshot: true andQuit: true.
    ].
] value.
Smalltalk snapshot: true andQuit: true.
"#;

/// Runs the Smalltalk VM for a single build. Holds the user-supplied recipe
/// directory, whose absolute path is written into `squeakerDirectory` in
/// each build's scratch directory so in-image code can locate the recipe.
pub struct SqueakVm {
    recipe_dir: PathBuf,
}

impl SqueakVm {
    pub fn new(recipe_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipe_dir: recipe_dir.into(),
        }
    }
}

impl VmRunner for SqueakVm {
    fn run(
        &self,
        vm_path: &str,
        work_dir: &Path,
        chunk: &str,
        headless: bool,
    ) -> Result<(), VmStageError> {
        let recipe_dir_abs = fs_err::canonicalize(&self.recipe_dir)?;
        fs_err::write(
            work_dir.join("squeakerDirectory"),
            recipe_dir_abs.to_string_lossy().as_bytes(),
        )?;

        let script = SCRIPT_TEMPLATE.replace("CHUNK_TEXT", chunk);
        let script_path = work_dir.join("squeaker-chunk.st");
        fs_err::write(&script_path, script)?;

        let mut command = Command::new(vm_path);
        command.current_dir(work_dir);
        if headless {
            command.arg("-headless");
        }
        command.arg("squeak.image").arg(&script_path);

        tracing::debug!(vm_path, work_dir = %work_dir.display(), headless, "launching VM");
        let status = command.status()?;
        if !status.success() {
            let errors = fs_err::read_to_string(work_dir.join("errors.txt")).unwrap_or_default();
            tracing::warn!(status = status.code(), errors, "VM exited non-zero");
            return Err(VmStageError::NonZeroExit {
                status: status.code().unwrap_or(-1),
                errors,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_reports_nonzero_exit_with_error_log() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("errors.txt"), b"boom").unwrap();

        let vm = SqueakVm::new(dir.path());
        let result = vm.run("false", dir.path(), "1 + 1", false);
        match result {
            Err(VmStageError::NonZeroExit { errors, .. }) => assert_eq!(errors, "boom"),
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[test]
    fn run_writes_squeaker_directory_marker() {
        let recipe_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let vm = SqueakVm::new(recipe_dir.path());
        let _ = vm.run("true", work_dir.path(), "1 + 1", false);
        let marker = fs_err::read_to_string(work_dir.path().join("squeakerDirectory")).unwrap();
        assert_eq!(
            marker,
            fs_err::canonicalize(recipe_dir.path())
                .unwrap()
                .to_string_lossy()
        );
    }
}
