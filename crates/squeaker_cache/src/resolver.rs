//! The stage resolver: the engine that turns recipe operations into stage
//! records, materializing image blobs only on a cache miss.

use std::cell::RefCell;
use std::path::Path;

use squeaker_digest::{digest_digests, digest_stage, digest_string};

use crate::collab::{Archiver, UrlFetcher, VmRunner};
use crate::error::StageError;
use crate::record::StageRecord;
use crate::store::{CacheStore, Namespace};

/// Which stage types a build wants recomputed rather than served from cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCacheMask {
    pub urls: bool,
    pub stages: bool,
}

/// The stage resolver. Borrows the store and its three collaborators for
/// the lifetime of one build.
pub struct StageResolver<'a> {
    store: &'a CacheStore,
    fetcher: &'a dyn UrlFetcher,
    archiver: &'a dyn Archiver,
    vm: &'a dyn VmRunner,
    vm_path: String,
    headless: bool,
    no_cache: NoCacheMask,
}

impl<'a> StageResolver<'a> {
    pub fn new(
        store: &'a CacheStore,
        fetcher: &'a dyn UrlFetcher,
        archiver: &'a dyn Archiver,
        vm: &'a dyn VmRunner,
        vm_path: impl Into<String>,
        headless: bool,
        no_cache: NoCacheMask,
    ) -> Self {
        Self {
            store,
            fetcher,
            archiver,
            vm,
            vm_path: vm_path.into(),
            headless,
            no_cache,
        }
    }

    /// Fetch a URL (or `file:` path) into a fresh `url` stage.
    pub fn fetch_url(&self, url: &str) -> Result<StageRecord, StageError> {
        let stage_key = url.to_string();
        let stage_digest = digest_stage("url", &stage_key);

        if !self.no_cache.urls {
            if let Some(record) = self.store.load_stage(&stage_digest)? {
                tracing::debug!(url, "cache hit for url stage");
                return Ok(record);
            }
        } else {
            tracing::debug!(url, "ignoring cached url stage due to --no-cache-urls");
        }

        let image_digest = self.fetch_and_store(url)?;
        let record = StageRecord::Url {
            stage_digest,
            stage_key,
            image_digest,
            url: url.to_string(),
        };
        self.store.write_stage(&record)?;
        Ok(record)
    }

    /// Apply a Smalltalk chunk to `parent`, producing a new `stage` stage.
    pub fn apply_chunk(&self, parent: &StageRecord, chunk: &str) -> Result<StageRecord, StageError> {
        let slot = RefCell::new(parent.clone());
        let key_for = |p: &StageRecord| -> Result<String, StageError> {
            Ok(digest_digests([
                p.stage_digest(),
                p.image_digest(),
                &digest_string(&self.vm_path),
                &digest_string(chunk),
            ])?)
        };

        let tentative_key = key_for(&slot.borrow())?;
        let tentative_digest = digest_stage("stage", &tentative_key);

        if !self.no_cache.stages {
            if let Some(record) = self.store.load_stage(&tentative_digest)? {
                return Ok(record);
            }
        } else {
            tracing::debug!("ignoring cached stage due to --no-cache-stages");
        }

        {
            let mut p = slot.borrow_mut();
            self.ensure_image_present(&mut p)?;
        }
        let parent_now = slot.into_inner();
        let final_key = key_for(&parent_now)?;
        let final_digest = digest_stage("stage", &final_key);

        let image_digest = self.run_chunk(&parent_now, chunk)?;
        let digest_inputs = vec![
            parent_now.stage_digest().to_string(),
            parent_now.image_digest().to_string(),
            digest_string(&self.vm_path),
            digest_string(chunk),
        ];
        let record = StageRecord::Stage {
            stage_digest: final_digest,
            stage_key: final_key,
            image_digest,
            parent: parent_now.stage_digest().to_string(),
            chunk: chunk.to_string(),
            vm: self.vm_path.clone(),
            digest_inputs,
        };
        self.store.write_stage(&record)?;
        Ok(record)
    }

    /// Attach a resource fingerprint for `resource_path` to `parent`.
    /// Absence of the file is legal: the stage key simply omits the
    /// resource-digest component.
    pub fn depend_on_resource(
        &self,
        parent: &StageRecord,
        resource_path: &Path,
    ) -> Result<StageRecord, StageError> {
        let resource_digest = if resource_path.is_file() {
            Some(squeaker_digest::digest_file(resource_path).map_err(crate::error::StoreError::from)?)
        } else {
            None
        };

        let slot = RefCell::new(parent.clone());
        let key_for = |p: &StageRecord| -> Result<String, StageError> {
            let mut inputs = vec![p.stage_digest().to_string(), p.image_digest().to_string()];
            if let Some(rd) = &resource_digest {
                inputs.push(rd.clone());
            }
            Ok(digest_digests(inputs)?)
        };

        let tentative_key = key_for(&slot.borrow())?;
        let tentative_digest = digest_stage("resource", &tentative_key);

        if let Some(record) = self.store.load_stage(&tentative_digest)? {
            return Ok(record);
        }

        {
            let mut p = slot.borrow_mut();
            self.ensure_image_present(&mut p)?;
        }
        let parent_now = slot.into_inner();
        let final_key = key_for(&parent_now)?;
        let final_digest = digest_stage("resource", &final_key);

        let mut digest_inputs = vec![
            parent_now.stage_digest().to_string(),
            parent_now.image_digest().to_string(),
        ];
        if let Some(rd) = &resource_digest {
            digest_inputs.push(rd.clone());
        }

        let record = StageRecord::Resource {
            stage_digest: final_digest,
            stage_key: final_key,
            image_digest: parent_now.image_digest().to_string(),
            parent: parent_now.stage_digest().to_string(),
            resource_path: resource_path.to_string_lossy().into_owned(),
            resource_digest,
            digest_inputs,
        };
        self.store.write_stage(&record)?;
        Ok(record)
    }

    /// Ensure `record`'s image blob exists, reconstructing it (and
    /// recursively its ancestors) if it has been garbage collected. Treats
    /// a stage record as a hint, not an authority: any disagreement with
    /// reality is self-repaired.
    pub fn ensure_image_present(&self, record: &mut StageRecord) -> Result<(), StageError> {
        if self.store.has_blob(record.image_digest()) {
            return Ok(());
        }

        self.store.delete(Namespace::Stages, record.stage_digest())?;

        match record.clone() {
            StageRecord::Url { url, .. } => {
                let image_digest = self.fetch_and_store(&url)?;
                *record = StageRecord::Url {
                    stage_digest: record.stage_digest().to_string(),
                    stage_key: record.stage_key().to_string(),
                    image_digest,
                    url,
                };
            }
            StageRecord::Stage {
                parent,
                chunk,
                vm,
                ..
            } => {
                let mut parent_rec = self
                    .store
                    .load_stage(&parent)?
                    .ok_or(StageError::CacheMiss {
                        stage_digest: parent.clone(),
                    })?;
                self.ensure_image_present(&mut parent_rec)?;

                let image_digest = self.run_chunk(&parent_rec, &chunk)?;
                let key = digest_digests([
                    parent_rec.stage_digest(),
                    parent_rec.image_digest(),
                    &digest_string(&vm),
                    &digest_string(&chunk),
                ])?;
                let digest = digest_stage("stage", &key);
                let digest_inputs = vec![
                    parent_rec.stage_digest().to_string(),
                    parent_rec.image_digest().to_string(),
                    digest_string(&vm),
                    digest_string(&chunk),
                ];
                *record = StageRecord::Stage {
                    stage_digest: digest,
                    stage_key: key,
                    image_digest,
                    parent: parent_rec.stage_digest().to_string(),
                    chunk,
                    vm,
                    digest_inputs,
                };
            }
            StageRecord::Resource {
                parent,
                resource_path,
                resource_digest,
                ..
            } => {
                let mut parent_rec = self
                    .store
                    .load_stage(&parent)?
                    .ok_or(StageError::CacheMiss {
                        stage_digest: parent.clone(),
                    })?;
                self.ensure_image_present(&mut parent_rec)?;

                let mut inputs = vec![
                    parent_rec.stage_digest().to_string(),
                    parent_rec.image_digest().to_string(),
                ];
                if let Some(rd) = &resource_digest {
                    inputs.push(rd.clone());
                }
                let key = digest_digests(inputs.clone())?;
                let digest = digest_stage("resource", &key);
                *record = StageRecord::Resource {
                    stage_digest: digest,
                    stage_key: key,
                    image_digest: parent_rec.image_digest().to_string(),
                    parent: parent_rec.stage_digest().to_string(),
                    resource_path,
                    resource_digest,
                    digest_inputs: inputs,
                };
            }
        }

        self.store.write_stage(record)?;
        Ok(())
    }

    fn fetch_and_store(&self, url: &str) -> Result<String, StageError> {
        let (mut file, tmp_path) = self.store.create_temp_blob()?;
        self.fetcher.fetch_to(url, &mut file)?;
        drop(file);
        Ok(self.store.promote_temp_blob(&tmp_path)?)
    }

    fn run_chunk(&self, parent: &StageRecord, chunk: &str) -> Result<String, StageError> {
        let work_dir = tempfile::tempdir().map_err(crate::error::StoreError::from)?;
        let blob_path = self.store.blob_path(parent.image_digest());
        self.archiver.extract(&blob_path, work_dir.path())?;
        self.vm
            .run(&self.vm_path, work_dir.path(), chunk, self.headless)?;
        let bytes = self.archiver.pack(work_dir.path())?;
        Ok(self.store.put_blob(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Mutex;

    struct FixtureFetcher {
        bodies: std::collections::HashMap<String, Vec<u8>>,
    }

    impl UrlFetcher for FixtureFetcher {
        fn fetch_to(
            &self,
            url: &str,
            dest: &mut dyn std::io::Write,
        ) -> Result<(), crate::error::FetchStageError> {
            let bytes = self.bodies.get(url).cloned().unwrap_or_default();
            dest.write_all(&bytes).unwrap();
            Ok(())
        }
    }

    /// A fixture archiver/VM pair that treats the "image" as a raw byte
    /// buffer and the "chunk" as a transform appended to it, so tests don't
    /// need a real ZIP or a real Smalltalk VM.
    struct FixtureArchiver;

    impl Archiver for FixtureArchiver {
        fn extract(
            &self,
            blob_path: &Path,
            work_dir: &Path,
        ) -> Result<(), crate::error::ArchiveStageError> {
            let bytes = fs_err::read(blob_path)?;
            fs_err::write(work_dir.join("squeak.image"), bytes)?;
            fs_err::write(work_dir.join("squeak.changes"), b"")?;
            Ok(())
        }

        fn pack(&self, work_dir: &Path) -> Result<Vec<u8>, crate::error::ArchiveStageError> {
            Ok(fs_err::read(work_dir.join("squeak.image"))?)
        }
    }

    struct FixtureVm {
        chunks_applied: Mutex<Vec<String>>,
    }

    impl VmRunner for FixtureVm {
        fn run(
            &self,
            _vm_path: &str,
            work_dir: &Path,
            chunk: &str,
            _headless: bool,
        ) -> Result<(), crate::error::VmStageError> {
            self.chunks_applied.lock().unwrap().push(chunk.to_string());
            let mut image = fs_err::read(work_dir.join("squeak.image"))?;
            image.extend_from_slice(format!("|{chunk}").as_bytes());
            fs_err::write(work_dir.join("squeak.image"), image)?;
            Ok(())
        }
    }

    fn harness() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    #[test]
    fn fetch_url_is_reused_on_second_call() {
        let (_dir, store) = harness();
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("file:/tmp/base.zip".to_string(), b"IMG0".to_vec());
        let fetcher = FixtureFetcher { bodies };
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            chunks_applied: Mutex::new(vec![]),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/usr/bin/squeak",
            true,
            NoCacheMask::default(),
        );

        let first = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let second = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        assert_eq!(first.stage_digest(), second.stage_digest());
        assert_eq!(first.image_digest(), second.image_digest());
    }

    #[test]
    fn apply_chunk_changes_digest_when_chunk_changes() {
        let (_dir, store) = harness();
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("file:/tmp/base.zip".to_string(), b"IMG0".to_vec());
        let fetcher = FixtureFetcher { bodies };
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            chunks_applied: Mutex::new(vec![]),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/usr/bin/squeak",
            true,
            NoCacheMask::default(),
        );

        let base = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let a = resolver.apply_chunk(&base, "X").unwrap();
        let b = resolver.apply_chunk(&base, "Y").unwrap();
        assert_ne!(a.stage_digest(), b.stage_digest());
        assert_ne!(a.image_digest(), b.image_digest());
    }

    #[test]
    fn apply_chunk_is_cached_on_second_build() {
        let (_dir, store) = harness();
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("file:/tmp/base.zip".to_string(), b"IMG0".to_vec());
        let fetcher = FixtureFetcher { bodies };
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            chunks_applied: Mutex::new(vec![]),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/usr/bin/squeak",
            true,
            NoCacheMask::default(),
        );

        let base = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let a = resolver.apply_chunk(&base, "X").unwrap();
        let b = resolver.apply_chunk(&base, "X").unwrap();
        assert_eq!(a.stage_digest(), b.stage_digest());
        assert_eq!(vm.chunks_applied.lock().unwrap().len(), 1);
    }

    #[test]
    fn self_repair_reconstructs_deleted_blobs() {
        let (_dir, store) = harness();
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("file:/tmp/base.zip".to_string(), b"IMG0".to_vec());
        let fetcher = FixtureFetcher { bodies };
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            chunks_applied: Mutex::new(vec![]),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/usr/bin/squeak",
            true,
            NoCacheMask::default(),
        );

        let base = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let a = resolver.apply_chunk(&base, "X").unwrap();
        let original_digest = a.image_digest().to_string();

        // Simulate GC deleting every image blob while keeping stage records.
        for id in store.list(Namespace::Images).unwrap() {
            store.delete(Namespace::Images, &id).unwrap();
        }

        let base2 = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let a2 = resolver.apply_chunk(&base2, "X").unwrap();
        assert_eq!(a2.image_digest(), original_digest);
    }

    #[test]
    fn resource_stage_records_absence() {
        let (_dir, store) = harness();
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("file:/tmp/base.zip".to_string(), b"IMG0".to_vec());
        let fetcher = FixtureFetcher { bodies };
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            chunks_applied: Mutex::new(vec![]),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/usr/bin/squeak",
            true,
            NoCacheMask::default(),
        );

        let base = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let missing = resolver
            .depend_on_resource(&base, Path::new("/nonexistent/data.txt"))
            .unwrap();
        match &missing {
            StageRecord::Resource {
                resource_digest, ..
            } => assert!(resource_digest.is_none()),
            _ => panic!("expected a resource stage"),
        }
        assert_eq!(missing.image_digest(), base.image_digest());
    }

    #[test]
    fn resource_presence_change_invalidates_descendant() {
        let (dir, store) = harness();
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("file:/tmp/base.zip".to_string(), b"IMG0".to_vec());
        let fetcher = FixtureFetcher { bodies };
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            chunks_applied: Mutex::new(vec![]),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/usr/bin/squeak",
            true,
            NoCacheMask::default(),
        );

        let base = resolver.fetch_url("file:/tmp/base.zip").unwrap();
        let data_path = dir.path().join("data.txt");
        let before = resolver.depend_on_resource(&base, &data_path).unwrap();

        let mut f = fs_err::File::create(&data_path).unwrap();
        f.write_all(b"v1").unwrap();
        drop(f);
        let with_v1 = resolver.depend_on_resource(&base, &data_path).unwrap();
        assert_ne!(before.stage_digest(), with_v1.stage_digest());

        let mut f = fs_err::File::create(&data_path).unwrap();
        f.write_all(b"v2").unwrap();
        drop(f);
        let with_v2 = resolver.depend_on_resource(&base, &data_path).unwrap();
        assert_ne!(with_v1.stage_digest(), with_v2.stage_digest());
    }
}
