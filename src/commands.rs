//! Implementations of each CLI subcommand, wiring the concrete collaborators
//! (`squeaker_fetch`, `squeaker_archive`, `squeaker_vm`) into the core's
//! `StageResolver` and `RecipeRunner`.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use squeaker_archive::ZipArchiver;
use squeaker_cache::{
    default_cache_root, Archiver, CacheMaintainer, CacheStore, KeepIntermediate, NoCacheMask,
    StageRecord, StageResolver, UrlPolicy,
};
use squeaker_fetch::HttpFetcher;
use squeaker_recipe::RecipeRunner;
use squeaker_vm::SqueakVm;

use crate::console_utils::ProgressHandle;
use crate::opt::{
    BuildOpts, CreateOpts, GcOpts, ResolveTagOpts, RunOpts, UnstageOpts, UntagOpts,
};

const VM_CANDIDATES: &[&str] = &["squeak", "Squeak", "squeakvm"];

/// How many `recentchanges/*.changes` snapshots to retain after each `run`.
const RECENT_CHANGES_KEPT: usize = 5;

fn open_store(cache_dir: Option<PathBuf>) -> Result<CacheStore> {
    CacheStore::open(cache_dir.unwrap_or_else(default_cache_root)).context("opening cache store")
}

fn resolve_vm_path(explicit: Option<String>) -> Result<String> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    autodetect_vm().context("no --vm given and no Smalltalk VM found on PATH")
}

fn autodetect_vm() -> Option<String> {
    VM_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|path| path.to_string_lossy().into_owned())
}

pub fn print_autodetect() -> Result<()> {
    match autodetect_vm() {
        Some(path) => println!("{path}"),
        None => bail!("no Smalltalk VM found on PATH"),
    }
    Ok(())
}

pub fn build(opts: BuildOpts, cache_dir: Option<PathBuf>, progress: &ProgressHandle) -> Result<()> {
    let store = open_store(cache_dir)?;
    let headless = opts.headless();
    let vm_path = resolve_vm_path(opts.vm)?;
    let recipe_dir = fs_err::canonicalize(&opts.dir)?;
    let recipe_path = opts
        .file
        .unwrap_or_else(|| recipe_dir.join("recipe.st"));
    let recipe_text = fs_err::read_to_string(&recipe_path)
        .with_context(|| format!("reading recipe file {}", recipe_path.display()))?;

    let fetcher = HttpFetcher::new();
    let archiver = ZipArchiver;
    let vm = SqueakVm::new(&recipe_dir);
    let no_cache = NoCacheMask {
        urls: opts.no_cache_urls,
        stages: opts.no_cache_stages,
    };
    let resolver = StageResolver::new(&store, &fetcher, &archiver, &vm, vm_path, headless, no_cache);
    let runner = RecipeRunner::new(&resolver, &store);

    let bar = progress.add(indicatif::ProgressBar::new_spinner());
    bar.set_style(progress.default_style());
    bar.set_prefix("build");
    bar.enable_steady_tick(std::time::Duration::from_millis(120));

    let mut final_stage = runner.run(&recipe_text)?;

    if let Some(tag_name) = opts.tag {
        resolver.ensure_image_present(&mut final_stage)?;
        let tag = squeaker_cache::Tag {
            tag: tag_name,
            stage_digest: final_stage.stage_digest().to_string(),
            image_digest: final_stage.image_digest().to_string(),
        };
        store.write_tag(&tag)?;
    }

    bar.finish_and_clear();
    println!("{}", final_stage.image_digest());
    Ok(())
}

fn resolve_reference(store: &CacheStore, reference: &str, root: bool) -> Result<StageRecord> {
    let maintainer = CacheMaintainer::new(store);
    let stage_digest = if root {
        store
            .resolve_prefix(squeaker_cache::Namespace::Stages, reference)?
            .ok_or_else(|| anyhow::anyhow!("no stage matches prefix {reference:?}"))?
    } else {
        maintainer.resolve_tag(reference)?.stage_digest
    };
    store
        .load_stage(&stage_digest)?
        .ok_or_else(|| anyhow::anyhow!("stage record {stage_digest} is missing"))
}

pub fn run(opts: RunOpts, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    let headless = opts.headless();
    let vm_path = resolve_vm_path(opts.vm)?;
    let record = resolve_reference(&store, &opts.image, opts.root)?;

    if !store.has_blob(record.image_digest()) {
        bail!(
            "image {} is not present on disk; rebuild the stage it came from first",
            record.image_digest()
        );
    }

    let work_dir = tempfile::tempdir()?;
    ZipArchiver.extract(&store.blob_path(record.image_digest()), work_dir.path())?;

    let mut command = Command::new(&vm_path);
    command.current_dir(work_dir.path());
    if headless {
        command.arg("-headless");
    }
    command.arg("squeak.image");
    command.args(&opts.args);

    let status = command.status().context("launching VM")?;
    if !status.success() {
        bail!("VM exited with status {}", status.code().unwrap_or(-1));
    }

    record_recent_changes(store.root(), &work_dir.path().join("squeak.changes"))?;
    Ok(())
}

/// Copies the session's `squeak.changes` into `<cache_root>/recentchanges/`
/// under an ISO-8601 timestamped name, then prunes all but the
/// [`RECENT_CHANGES_KEPT`] newest files in that directory.
fn record_recent_changes(cache_root: &std::path::Path, changes_path: &std::path::Path) -> Result<()> {
    if !changes_path.is_file() {
        return Ok(());
    }

    let dir = cache_root.join("recentchanges");
    fs_err::create_dir_all(&dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f");
    let dest = dir.join(format!("{timestamp}Z.changes"));
    fs_err::copy(changes_path, &dest)?;

    let mut entries: Vec<_> = fs_err::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "changes"))
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    let doomed = entries.len().saturating_sub(RECENT_CHANGES_KEPT);
    for entry in entries.into_iter().take(doomed) {
        fs_err::remove_file(entry.path())?;
    }

    Ok(())
}

pub fn gc(opts: GcOpts, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    let maintainer = CacheMaintainer::new(&store);

    let url_policy = if opts.delete_all_urls {
        UrlPolicy::DeleteAll
    } else if opts.delete_unreferenced_urls {
        UrlPolicy::DeleteUnreferenced
    } else {
        UrlPolicy::Keep
    };

    let keep_intermediate: KeepIntermediate = if opts.discard_all_intermediate {
        Some(0)
    } else {
        opts.keep_intermediate
    };

    let report = maintainer.gc(keep_intermediate, url_policy, opts.dry_run)?;

    for digest in &report.doomed_stages {
        println!("stage {digest}");
    }
    for digest in &report.doomed_images {
        println!("image {digest}");
    }
    Ok(())
}

pub fn tags(cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    for tag in CacheMaintainer::new(&store).tags()? {
        println!("{tag}");
    }
    Ok(())
}

pub fn resolve_tag(opts: ResolveTagOpts, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    let tag = CacheMaintainer::new(&store).resolve_tag(&opts.tag)?;
    println!("{}", tag.image_digest);
    Ok(())
}

pub fn dot(cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    println!("digraph squeaker {{");
    for digest in store.list(squeaker_cache::Namespace::Stages)? {
        let Some(record) = store.load_stage(&digest)? else {
            continue;
        };
        let short = &digest[..12.min(digest.len())];
        println!(
            "  \"{short}\" [label=\"{} {short}\"];",
            record.stage_type()
        );
        if let Some(parent) = record.parent() {
            let parent_short = &parent[..12.min(parent.len())];
            println!("  \"{parent_short}\" -> \"{short}\";");
        }
    }
    for tag_name in store.list(squeaker_cache::Namespace::Tags)? {
        if let Some(tag) = store.load_tag(&tag_name)? {
            let short = &tag.stage_digest[..12.min(tag.stage_digest.len())];
            println!("  \"tag:{tag_name}\" [shape=box];");
            println!("  \"tag:{tag_name}\" -> \"{short}\";");
        }
    }
    println!("}}");
    Ok(())
}

pub fn create(opts: CreateOpts, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    let blob = ZipArchiver.pack(&opts.dir)?;
    fs_err::write(&opts.image, &blob)?;

    let image_path_abs = fs_err::canonicalize(&opts.image)?;
    let url = format!("file:{}", image_path_abs.display());
    let image_digest = store.put_blob(&blob)?;
    let stage_digest = squeaker_digest::digest_stage("url", &url);
    let record = StageRecord::Url {
        stage_digest,
        stage_key: url.clone(),
        image_digest: image_digest.clone(),
        url,
    };
    store.write_stage(&record)?;
    println!("{image_digest}");
    Ok(())
}

pub fn untag(opts: UntagOpts, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    CacheMaintainer::new(&store).untag(&opts.tags)?;
    Ok(())
}

pub fn unstage(opts: UnstageOpts, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_dir)?;
    let removed = CacheMaintainer::new(&store).unstage(&opts.digests)?;
    for digest in removed {
        println!("{digest}");
    }
    Ok(())
}
