//! ZIP image-blob codec: the on-disk format of an image blob.
//!
//! Each blob is a ZIP archive holding exactly one `*.image` file and its
//! matching `*.changes` file (same base name). [`ZipArchiver`] extracts
//! that pair into a work directory as `squeak.image`/`squeak.changes`, and
//! packs them back the other way after the VM has run.

use std::io::Read;
use std::path::Path;

use fs_err::File;
use squeaker_cache::{ArchiveStageError, Archiver};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const IMAGE_NAME: &str = "squeak.image";
const CHANGES_NAME: &str = "squeak.changes";

#[derive(Debug, Default)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn extract(&self, blob_path: &Path, work_dir: &Path) -> Result<(), ArchiveStageError> {
        let file = File::open(blob_path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| ArchiveStageError::Other(format!("not a valid image blob: {e}")))?;

        let mut image_stem: Option<String> = None;
        let mut changes_stem: Option<String> = None;

        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|e| ArchiveStageError::Other(e.to_string()))?;
            let name = entry.name().to_string();
            if let Some(stem) = name.strip_suffix(".image") {
                image_stem = Some(stem.to_string());
            } else if let Some(stem) = name.strip_suffix(".changes") {
                changes_stem = Some(stem.to_string());
            }
        }

        let (image_stem, changes_stem) = match (image_stem, changes_stem) {
            (Some(i), Some(c)) => (i, c),
            _ => return Err(ArchiveStageError::MissingImageEntry),
        };
        if image_stem != changes_stem {
            return Err(ArchiveStageError::MismatchedChangesEntry);
        }

        extract_entry(&mut archive, &format!("{image_stem}.image"), &work_dir.join(IMAGE_NAME))?;
        extract_entry(&mut archive, &format!("{image_stem}.changes"), &work_dir.join(CHANGES_NAME))?;

        Ok(())
    }

    fn pack(&self, work_dir: &Path) -> Result<Vec<u8>, ArchiveStageError> {
        let image_path = work_dir.join(IMAGE_NAME);
        let changes_path = work_dir.join(CHANGES_NAME);
        if !image_path.is_file() || !changes_path.is_file() {
            return Err(ArchiveStageError::MissingImageEntry);
        }

        let mut buf = Vec::new();
        let mut writer = ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        writer
            .start_file("squeak.image", options)
            .map_err(|e| ArchiveStageError::Other(e.to_string()))?;
        std::io::copy(&mut File::open(&image_path)?, &mut writer)?;

        writer
            .start_file("squeak.changes", options)
            .map_err(|e| ArchiveStageError::Other(e.to_string()))?;
        std::io::copy(&mut File::open(&changes_path)?, &mut writer)?;

        writer
            .finish()
            .map_err(|e| ArchiveStageError::Other(e.to_string()))?;
        Ok(buf)
    }
}

fn extract_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    entry_name: &str,
    dest: &Path,
) -> Result<(), ArchiveStageError> {
    if dest.is_file() {
        tracing::warn!(path = %dest.display(), "not overwriting existing file in work dir");
        return Ok(());
    }
    let mut entry = archive
        .by_name(entry_name)
        .map_err(|e| ArchiveStageError::Other(e.to_string()))?;
    let mut out = File::create(dest)?;
    std::io::copy(&mut entry, &mut out)?;
    Ok(())
}
