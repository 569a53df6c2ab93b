//! The content-addressed on-disk cache store.
//!
//! Three namespaces live under the cache root: `images/` (opaque blobs
//! named by their own SHA-512), `stages/` (JSON stage records named by a
//! stage digest) and `tags/` (JSON tag pointers named by a human tag).

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use squeaker_digest::digest_file;

use crate::error::StoreError;
use crate::record::{StageRecord, Tag};

/// One of the three content-addressed namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Images,
    Stages,
    Tags,
}

impl Namespace {
    fn dir_name(self) -> &'static str {
        match self {
            Namespace::Images => "images",
            Namespace::Stages => "stages",
            Namespace::Tags => "tags",
        }
    }
}

/// Resolve the default cache root: `$XDG_CACHE_HOME/squeaker`, falling back
/// to `$HOME/.cache/squeaker`. Mirrors the platform switch used by build
/// tools that do not want to pull in a whole `dirs` crate for one lookup.
pub fn default_cache_root() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    base.join("squeaker")
}

/// Durable, content-addressed storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open (creating if necessary) a cache store rooted at `root`.
    pub fn open(root: PathBuf) -> Result<Self, StoreError> {
        let store = Self { root };
        for ns in [Namespace::Images, Namespace::Stages, Namespace::Tags] {
            fs_err::create_dir_all(store.namespace_dir(ns))?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    fn entry_path(&self, ns: Namespace, id: &str) -> PathBuf {
        self.namespace_dir(ns).join(id)
    }

    pub fn blob_path(&self, image_digest: &str) -> PathBuf {
        self.entry_path(Namespace::Images, image_digest)
    }

    pub fn has_blob(&self, image_digest: &str) -> bool {
        self.blob_path(image_digest).is_file()
    }

    /// Write `bytes` under its own SHA-512 digest, returning that digest.
    /// At-most-once: writing the same content twice is a harmless no-op
    /// overwrite, since the content (and therefore the destination) is
    /// identical.
    pub fn put_blob(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let dir = self.namespace_dir(Namespace::Images);
        fs_err::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        let digest = squeaker_digest::digest_bytes(bytes);
        tmp.persist(self.blob_path(&digest))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(digest)
    }

    /// Create a temp file inside the images namespace that a collaborator
    /// can stream a fetch into; call [`Self::promote_temp_blob`] once the
    /// content has been fully written.
    pub fn create_temp_blob(&self) -> Result<(File, PathBuf), StoreError> {
        let dir = self.namespace_dir(Namespace::Images);
        fs_err::create_dir_all(&dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        // keep() detaches the file from auto-delete-on-drop; the caller
        // manages its lifetime explicitly via promote_temp_blob from here.
        tmp.keep().map_err(|e| StoreError::Io(e.error))
    }

    /// Hash the temp file's content and move it into place under that hash.
    pub fn promote_temp_blob(&self, tmp_path: &Path) -> Result<String, StoreError> {
        let digest = digest_file(tmp_path)?;
        let dest = self.blob_path(&digest);
        fs_err::rename(tmp_path, &dest).or_else(|_| {
            // Cross-device rename can fail; fall back to copy + remove.
            fs_err::copy(tmp_path, &dest)?;
            fs_err::remove_file(tmp_path)
        })?;
        Ok(digest)
    }

    pub fn load_stage(&self, stage_digest: &str) -> Result<Option<StageRecord>, StoreError> {
        let path = self.entry_path(Namespace::Stages, stage_digest);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs_err::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn write_stage(&self, record: &StageRecord) -> Result<(), StoreError> {
        self.write_json(Namespace::Stages, record.stage_digest(), record)
    }

    pub fn load_tag(&self, name: &str) -> Result<Option<Tag>, StoreError> {
        let path = self.entry_path(Namespace::Tags, name);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs_err::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn write_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        self.write_json(Namespace::Tags, &tag.tag, tag)
    }

    fn write_json<T: serde::Serialize>(
        &self,
        ns: Namespace,
        id: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let dir = self.namespace_dir(ns);
        fs_err::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(value)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(dir.join(id)).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// List the ids stored in `namespace`, sorted for deterministic output.
    pub fn list(&self, namespace: Namespace) -> Result<Vec<String>, StoreError> {
        let dir = self.namespace_dir(namespace);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs_err::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Idempotent delete: a missing entry is not an error.
    pub fn delete(&self, namespace: Namespace, id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(namespace, id);
        match fs_err::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Resolve a short prefix against a namespace. `Ok(None)` on zero
    /// matches, `Err(StoreError::AmbiguousPrefix)` on more than one.
    pub fn resolve_prefix(
        &self,
        namespace: Namespace,
        prefix: &str,
    ) -> Result<Option<String>, StoreError> {
        let matches: Vec<String> = self
            .list(namespace)?
            .into_iter()
            .filter(|id| id.starts_with(prefix))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.into_iter().next().unwrap())),
            _ => Err(StoreError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                matches,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_blob_is_content_addressed() {
        let (_dir, store) = store();
        let d1 = store.put_blob(b"hello").unwrap();
        let d2 = store.put_blob(b"hello").unwrap();
        assert_eq!(d1, d2);
        assert!(store.has_blob(&d1));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.delete(Namespace::Stages, "nonexistent").unwrap();
        store.delete(Namespace::Stages, "nonexistent").unwrap();
    }

    #[test]
    fn resolve_prefix_detects_ambiguity() {
        let (_dir, store) = store();
        store.put_blob(b"aaa1").unwrap();
        store.put_blob(b"bbb1").unwrap();
        let d1 = squeaker_digest::digest_bytes(b"aaa1");
        let d2 = squeaker_digest::digest_bytes(b"bbb1");
        let common_prefix_len = d1
            .chars()
            .zip(d2.chars())
            .take_while(|(a, b)| a == b)
            .count();
        if common_prefix_len > 0 {
            let prefix = &d1[..common_prefix_len];
            assert_eq!(store.resolve_prefix(Namespace::Images, prefix).unwrap(), None);
        }
        assert_eq!(
            store.resolve_prefix(Namespace::Images, &d1[..8]).unwrap(),
            Some(d1)
        );
    }

    #[test]
    fn resolve_prefix_zero_matches_is_none() {
        let (_dir, store) = store();
        assert_eq!(
            store.resolve_prefix(Namespace::Stages, "deadbeef").unwrap(),
            None
        );
    }
}
