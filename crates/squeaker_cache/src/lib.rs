//! Content-addressed cache store, stage resolver and garbage collector.
//!
//! This crate is the core of squeaker: the cache store (three namespaces
//! on disk), the stage resolver (the derivation engine, with its
//! self-repair and rebindable-parent-slot subtleties) and the cache
//! maintainer (mark-and-sweep GC plus tag/stage bookkeeping).

pub mod collab;
pub mod error;
pub mod maintain;
pub mod record;
pub mod resolver;
pub mod store;

pub use collab::{Archiver, UrlFetcher, VmRunner};
pub use error::{ArchiveStageError, FetchStageError, StageError, StoreError, VmStageError};
pub use maintain::{CacheMaintainer, GcReport, KeepIntermediate, UrlPolicy};
pub use record::{StageRecord, Tag};
pub use resolver::{NoCacheMask, StageResolver};
pub use store::{default_cache_root, CacheStore, Namespace};
