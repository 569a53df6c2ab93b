use clap::Parser;

use squeaker::commands;
use squeaker::console_utils::{init_logging, print_error};
use squeaker::opt::{Opts, SubCommands};

fn main() {
    let opts = Opts::parse();
    let progress = match init_logging(opts.log_style, &opts.verbosity) {
        Ok(progress) => progress,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    let cache_dir = opts.cache_dir;
    let result = match opts.command {
        SubCommands::Build(build_opts) => commands::build(build_opts, cache_dir, &progress),
        SubCommands::Run(run_opts) => commands::run(run_opts, cache_dir),
        SubCommands::Gc(gc_opts) => commands::gc(gc_opts, cache_dir),
        SubCommands::Tags => commands::tags(cache_dir),
        SubCommands::ResolveTag(resolve_opts) => commands::resolve_tag(resolve_opts, cache_dir),
        SubCommands::Dot => commands::dot(cache_dir),
        SubCommands::Create(create_opts) => commands::create(create_opts, cache_dir),
        SubCommands::Untag(untag_opts) => commands::untag(untag_opts, cache_dir),
        SubCommands::Unstage(unstage_opts) => commands::unstage(unstage_opts, cache_dir),
        SubCommands::PrintAutodetect => commands::print_autodetect(),
    };

    if let Err(e) = result {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
