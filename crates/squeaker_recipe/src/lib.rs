//! The recipe interpreter: threads a running "current stage" through the
//! stage resolver as it walks a chunk file's classified chunks.

pub mod chunks;
pub mod literal;

use squeaker_cache::{CacheStore, StageError, StageRecord, StageResolver};
use thiserror::Error;

use chunks::read_chunks;
use literal::{parse_from_arg, parse_string_literal, FromArg, LiteralError};

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Literal(#[from] LiteralError),

    #[error("unrecognized chunk prefix in {0:?}")]
    UnrecognizedPrefix(String),

    #[error("command chunk before any from: in {0:?}")]
    CommandBeforeFrom(String),

    #[error("tag {0:?} not found")]
    UnknownTag(String),
}

/// Interprets a chunk-format recipe body against a [`StageResolver`],
/// returning the final stage once every chunk has been applied.
pub struct RecipeRunner<'a> {
    resolver: &'a StageResolver<'a>,
    store: &'a CacheStore,
}

impl<'a> RecipeRunner<'a> {
    pub fn new(resolver: &'a StageResolver<'a>, store: &'a CacheStore) -> Self {
        Self { resolver, store }
    }

    pub fn run(&self, recipe_text: &str) -> Result<StageRecord, RecipeError> {
        let mut current: Option<StageRecord> = None;

        for raw_chunk in read_chunks(recipe_text) {
            let chunk = raw_chunk.trim();
            if chunk.is_empty() {
                continue;
            }

            if let Some(arg) = chunk.strip_prefix("from:") {
                tracing::debug!(arg, "from: chunk");
                current = Some(self.handle_from(arg)?);
                continue;
            }

            if let Some(arg) = chunk.strip_prefix("resource:") {
                tracing::debug!(arg, "resource: chunk");
                let current_stage = current
                    .as_ref()
                    .ok_or_else(|| RecipeError::CommandBeforeFrom(chunk.to_string()))?;
                let path = parse_string_literal(arg)?;
                current = Some(self.resolver.depend_on_resource(current_stage, path.as_ref())?);
                continue;
            }

            if let Some(arg) = chunk.strip_prefix("fileIn:") {
                tracing::debug!(arg, "fileIn: chunk");
                let current_stage = current
                    .as_ref()
                    .ok_or_else(|| RecipeError::CommandBeforeFrom(chunk.to_string()))?;
                let literal = parse_string_literal(arg)?;
                let with_resource = self
                    .resolver
                    .depend_on_resource(current_stage, literal.as_ref())?;
                let install_chunk = format!("Installer installFile: '{literal}'");
                current = Some(self.resolver.apply_chunk(&with_resource, &install_chunk)?);
                continue;
            }

            tracing::debug!(chunk, "command chunk");
            let current_stage = current
                .as_ref()
                .ok_or_else(|| RecipeError::CommandBeforeFrom(chunk.to_string()))?;
            current = Some(self.resolver.apply_chunk(current_stage, chunk)?);
        }

        current.ok_or_else(|| RecipeError::CommandBeforeFrom(recipe_text.to_string()))
    }

    fn handle_from(&self, arg: &str) -> Result<StageRecord, RecipeError> {
        match parse_from_arg(arg)? {
            FromArg::Url(url) => Ok(self.resolver.fetch_url(&url)?),
            FromArg::Tag(name) => {
                let tag = self
                    .store
                    .load_tag(&name)
                    .map_err(StageError::from)?
                    .ok_or_else(|| RecipeError::UnknownTag(name.clone()))?;
                self.store
                    .load_stage(&tag.stage_digest)
                    .map_err(StageError::from)?
                    .ok_or(RecipeError::UnknownTag(name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;
    use std::path::Path;

    use squeaker_cache::{Archiver, NoCacheMask, UrlFetcher, VmRunner};

    struct FixtureFetcher;
    impl UrlFetcher for FixtureFetcher {
        fn fetch_to(
            &self,
            url: &str,
            dest: &mut dyn Write,
        ) -> Result<(), squeaker_cache::FetchStageError> {
            dest.write_all(url.as_bytes()).unwrap();
            Ok(())
        }
    }

    struct FixtureArchiver;
    impl Archiver for FixtureArchiver {
        fn extract(
            &self,
            blob_path: &Path,
            work_dir: &Path,
        ) -> Result<(), squeaker_cache::ArchiveStageError> {
            let bytes = fs_err::read(blob_path)?;
            fs_err::write(work_dir.join("squeak.image"), bytes)?;
            fs_err::write(work_dir.join("squeak.changes"), b"changes")?;
            Ok(())
        }

        fn pack(&self, work_dir: &Path) -> Result<Vec<u8>, squeaker_cache::ArchiveStageError> {
            Ok(fs_err::read(work_dir.join("squeak.image"))?)
        }
    }

    struct FixtureVm {
        invocations: RefCell<u32>,
    }
    impl VmRunner for FixtureVm {
        fn run(
            &self,
            _vm_path: &str,
            work_dir: &Path,
            chunk: &str,
            _headless: bool,
        ) -> Result<(), squeaker_cache::VmStageError> {
            *self.invocations.borrow_mut() += 1;
            let mut bytes = fs_err::read(work_dir.join("squeak.image"))?;
            bytes.extend_from_slice(chunk.as_bytes());
            fs_err::write(work_dir.join("squeak.image"), bytes)?;
            Ok(())
        }
    }

    #[test]
    fn recipe_walks_from_and_command_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        let fetcher = FixtureFetcher;
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            invocations: RefCell::new(0),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/vm".to_string(),
            false,
            NoCacheMask::default(),
        );
        let runner = RecipeRunner::new(&resolver, &store);

        let recipe = "from: 'file:/tmp/base.zip'!Transcript showCr: 'hi'!";
        let stage = runner.run(recipe).unwrap();
        assert_eq!(stage.stage_type(), "stage");
        assert_eq!(*vm.invocations.borrow(), 1);
    }

    #[test]
    fn command_before_from_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        let fetcher = FixtureFetcher;
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            invocations: RefCell::new(0),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/vm".to_string(),
            false,
            NoCacheMask::default(),
        );
        let runner = RecipeRunner::new(&resolver, &store);

        let result = runner.run("Transcript showCr: 'hi'!");
        assert!(matches!(result, Err(RecipeError::CommandBeforeFrom(_))));
    }

    #[test]
    fn unknown_tag_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        let fetcher = FixtureFetcher;
        let archiver = FixtureArchiver;
        let vm = FixtureVm {
            invocations: RefCell::new(0),
        };
        let resolver = StageResolver::new(
            &store,
            &fetcher,
            &archiver,
            &vm,
            "/vm".to_string(),
            false,
            NoCacheMask::default(),
        );
        let runner = RecipeRunner::new(&resolver, &store);

        let result = runner.run("from: #'missing'!");
        assert!(matches!(result, Err(RecipeError::UnknownTag(_))));
    }
}
