//! Command-line options.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::console_utils::LogStyle;

#[derive(Parser)]
#[command(name = "squeaker", version, about = "A content-addressed build tool for Smalltalk images")]
pub struct Opts {
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    #[arg(long, value_enum, default_value = "plain")]
    pub log_style: LogStyle,

    /// Cache root directory. Defaults to the XDG/HOME cache location.
    #[arg(long, global = true, env = "SQUEAKER_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: SubCommands,
}

#[derive(Subcommand)]
pub enum SubCommands {
    /// Build an image by running a chunk-format recipe through the cache.
    Build(BuildOpts),

    /// Launch the VM against an already-built image.
    Run(RunOpts),

    /// Reclaim cache space unreachable from any tag.
    Gc(GcOpts),

    /// List every tag currently registered in the cache.
    Tags,

    /// Print the image digest a tag currently points at.
    ResolveTag(ResolveTagOpts),

    /// Emit the stage graph as Graphviz DOT.
    Dot,

    /// Pack a local image/changes pair into the cache.
    Create(CreateOpts),

    /// Remove one or more tags.
    Untag(UntagOpts),

    /// Remove one or more stage records by digest prefix.
    Unstage(UnstageOpts),

    /// Print the autodetected VM executable path, if any.
    PrintAutodetect,
}

#[derive(clap::Args)]
pub struct BuildOpts {
    /// Chunk-format recipe file. Defaults to `recipe.st` inside DIR.
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Tag to assign to the final stage's image once the build completes.
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    #[arg(long)]
    pub no_cache_urls: bool,

    #[arg(long)]
    pub no_cache_stages: bool,

    #[arg(long, overrides_with = "no_headless")]
    pub headless: bool,

    #[arg(long, overrides_with = "headless")]
    pub no_headless: bool,

    /// Path to the Smalltalk VM executable.
    #[arg(long, env = "SQUEAKER_VM")]
    pub vm: Option<String>,

    /// Directory containing the recipe file and any resources it references.
    pub dir: PathBuf,
}

impl BuildOpts {
    pub fn headless(&self) -> bool {
        !self.no_headless
    }
}

#[derive(clap::Args)]
pub struct RunOpts {
    #[arg(long, env = "SQUEAKER_VM")]
    pub vm: Option<String>,

    /// Treat IMAGE as a raw stage/image digest prefix instead of a tag name.
    #[arg(long)]
    pub root: bool,

    #[arg(long, overrides_with = "no_headless")]
    pub headless: bool,

    #[arg(long, overrides_with = "headless")]
    pub no_headless: bool,

    /// Tag name, or (with --root) a stage/image digest prefix.
    pub image: String,

    /// Extra arguments forwarded to the VM invocation.
    pub args: Vec<String>,
}

impl RunOpts {
    pub fn headless(&self) -> bool {
        !self.no_headless
    }
}

#[derive(clap::Args)]
#[command(group(clap::ArgGroup::new("url_policy").args(["delete_unreferenced_urls", "delete_all_urls"])))]
#[command(group(clap::ArgGroup::new("intermediate_policy").args(["discard_all_intermediate", "keep_intermediate"])))]
pub struct GcOpts {
    /// Report what would be deleted without deleting it.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    #[arg(long)]
    pub delete_unreferenced_urls: bool,

    #[arg(long)]
    pub delete_all_urls: bool,

    #[arg(long)]
    pub discard_all_intermediate: bool,

    #[arg(long)]
    pub keep_intermediate: Option<u32>,
}

#[derive(clap::Args)]
pub struct ResolveTagOpts {
    pub tag: String,
}

#[derive(clap::Args)]
pub struct CreateOpts {
    /// Path to write the packed image blob to.
    pub image: PathBuf,

    /// Directory containing `squeak.image` and `squeak.changes`.
    pub dir: PathBuf,
}

#[derive(clap::Args)]
pub struct UntagOpts {
    pub tags: Vec<String>,
}

#[derive(clap::Args)]
pub struct UnstageOpts {
    pub digests: Vec<String>,
}
