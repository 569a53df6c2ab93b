//! Cache maintenance: mark-and-sweep GC plus tag/stage bookkeeping.
//!
//! The DAG exists only implicitly, through `parent` pointers in stored
//! stage records — there is no in-memory graph held between operations.
//! GC walks it fresh from every tag root each time it runs.

use std::collections::{HashMap, HashSet};

use crate::error::StageError;
use crate::record::{StageRecord, Tag};
use crate::store::{CacheStore, Namespace};

/// How aggressively to reclaim URL-stage image blobs during GC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPolicy {
    /// Protect every URL stage's blob, even if no tag currently depends on
    /// it. This is the default: downloads are expensive to redo.
    Keep,
    /// Only protect URL stages a tag walk actually reaches.
    DeleteUnreferenced,
    /// Forcibly delete every URL stage's image blob, tag-reachable or not.
    /// Stage records survive only if a tag walk reaches them.
    DeleteAll,
}

/// How many levels of intermediate image blobs to keep along a tag's
/// parent chain. `None` keeps all of them; `Some(0)` keeps only the tip.
pub type KeepIntermediate = Option<u32>;

/// What a (possibly dry-run) GC pass would delete / did delete.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub doomed_images: Vec<String>,
    pub doomed_stages: Vec<String>,
}

/// Operations over the cache that are not part of resolving a build:
/// garbage collection, tag listing/removal, stage removal by prefix.
pub struct CacheMaintainer<'a> {
    store: &'a CacheStore,
}

impl<'a> CacheMaintainer<'a> {
    pub fn new(store: &'a CacheStore) -> Self {
        Self { store }
    }

    pub fn gc(
        &self,
        keep_intermediate: KeepIntermediate,
        url_policy: UrlPolicy,
        dry_run: bool,
    ) -> Result<GcReport, StageError> {
        let stage_ids = self.store.list(Namespace::Stages)?;
        let mut stages: HashMap<String, StageRecord> = HashMap::with_capacity(stage_ids.len());
        let mut images_by_stage: HashMap<String, Vec<String>> = HashMap::new();
        for id in &stage_ids {
            if let Some(record) = self.store.load_stage(id)? {
                images_by_stage
                    .entry(record.image_digest().to_string())
                    .or_default()
                    .push(record.stage_digest().to_string());
                stages.insert(id.clone(), record);
            }
        }

        let mut marked_stages: HashSet<String> = HashSet::new();
        let mut marked_images: HashSet<String> = HashSet::new();

        for tag_name in self.store.list(Namespace::Tags)? {
            let Some(tag) = self.store.load_tag(&tag_name)? else {
                continue;
            };
            marked_images.insert(tag.image_digest.clone());
            self.walk_and_mark(&tag, &stages, keep_intermediate, &mut marked_stages, &mut marked_images);
        }

        for record in stages.values() {
            if record.stage_type() != "url" {
                continue;
            }
            match url_policy {
                UrlPolicy::Keep => {
                    marked_stages.insert(record.stage_digest().to_string());
                    marked_images.insert(record.image_digest().to_string());
                }
                UrlPolicy::DeleteUnreferenced => {
                    // No extra marking: rely purely on the tag walk above.
                }
                UrlPolicy::DeleteAll => {
                    // A content-addressed image blob can be shared by more
                    // than one stage (e.g. a command stage that happens to
                    // reproduce a url stage's bytes exactly). DeleteAll still
                    // forces out a url stage's own claim on its blob, but a
                    // different, non-url stage that is tag-reachable and
                    // shares the same blob keeps it alive.
                    let protected_by_other_stage = images_by_stage
                        .get(record.image_digest())
                        .is_some_and(|sharing_stages| {
                            sharing_stages.iter().any(|digest| {
                                digest != record.stage_digest()
                                    && marked_stages.contains(digest)
                                    && stages
                                        .get(digest)
                                        .is_some_and(|other| other.stage_type() != "url")
                            })
                        });
                    if !protected_by_other_stage {
                        marked_images.remove(record.image_digest());
                    }
                }
            }
        }

        let on_disk_images = self.store.list(Namespace::Images)?;
        let on_disk_stages = self.store.list(Namespace::Stages)?;

        let mut report = GcReport {
            doomed_images: on_disk_images
                .into_iter()
                .filter(|id| !marked_images.contains(id))
                .collect(),
            doomed_stages: on_disk_stages
                .into_iter()
                .filter(|id| !marked_stages.contains(id))
                .collect(),
        };
        report.doomed_images.sort();
        report.doomed_stages.sort();

        if !dry_run {
            for id in &report.doomed_images {
                self.store.delete(Namespace::Images, id)?;
            }
            for id in &report.doomed_stages {
                self.store.delete(Namespace::Stages, id)?;
            }
        }

        Ok(report)
    }

    /// Walk a tag's stage chain via `parent`, marking each stage digest and
    /// (when within `keep_intermediate` depth of the tip) its image digest.
    /// Dangling parents are tolerated here: GC keeps going on the rest of
    /// the chain rather than treating the tag as fatally broken.
    fn walk_and_mark(
        &self,
        tag: &Tag,
        stages: &HashMap<String, StageRecord>,
        keep_intermediate: KeepIntermediate,
        marked_stages: &mut HashSet<String>,
        marked_images: &mut HashSet<String>,
    ) {
        let mut current = Some(tag.stage_digest.clone());
        let mut depth: u32 = 0;
        while let Some(digest) = current {
            let Some(record) = stages.get(&digest) else {
                break;
            };
            marked_stages.insert(digest.clone());
            let within_depth = match keep_intermediate {
                None => true,
                Some(limit) => depth <= limit,
            };
            if within_depth {
                marked_images.insert(record.image_digest().to_string());
            }
            current = record.parent().map(str::to_string);
            depth += 1;
        }
    }

    pub fn tags(&self) -> Result<Vec<String>, StageError> {
        Ok(self.store.list(Namespace::Tags)?)
    }

    pub fn resolve_tag(&self, name: &str) -> Result<Tag, StageError> {
        self.store
            .load_tag(name)?
            .ok_or_else(|| StageError::TagNotFound(name.to_string()))
    }

    pub fn untag(&self, names: &[String]) -> Result<(), StageError> {
        for name in names {
            self.store.delete(Namespace::Tags, name)?;
        }
        Ok(())
    }

    /// Resolve each prefix against the stages namespace and unlink
    /// unambiguous matches, returning the digests actually removed.
    pub fn unstage(&self, prefixes: &[String]) -> Result<Vec<String>, StageError> {
        let mut removed = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            match self.store.resolve_prefix(Namespace::Stages, prefix)? {
                Some(digest) => {
                    self.store.delete(Namespace::Stages, &digest)?;
                    removed.push(digest);
                }
                None => {
                    return Err(StageError::StageNotFound(prefix.clone()));
                }
            }
        }
        Ok(removed)
    }
}
