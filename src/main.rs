use clap::{Parser, Subcommand};
use imagecache::cache::{CacheResolver, CacheStats};
use imagecache::layout::SourceRef;
use imagecache::{config, inventory, output, request};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imagecache")]
#[command(about = "On-demand image preset cache")]
#[command(long_about = "\
On-demand image preset cache

Source images live under static_root and are published at static_url.
Named presets (thumbnail, crop, watermark, ...) turn a source into an
artifact stored under cache_root/<preset>/, mirroring the source layout,
and published at cache_url/<preset>/. Artifacts are regenerated when the
source is newer.

  static/photos/dawn.jpg            /static/photos/dawn.jpg
  cache/thumb/photos/dawn.jpg       /cache/thumb/photos/dawn.jpg

Set RUST_LOG (e.g. RUST_LOG=imagecache=debug) to control log output.

Run 'imagecache gen-config' to generate a documented imagecache.toml.")]
#[command(version)]
struct Cli {
    /// Config file; relative roots inside it resolve against its directory
    #[arg(long, default_value = config::CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// A source image given as a path or as its public URL.
#[derive(clap::Args, Clone)]
struct SourceArgs {
    /// Source path (absolute, or relative to static_root)
    source: String,
    /// Treat SOURCE as a URL under static_url
    #[arg(long)]
    from_url: bool,
}

impl SourceArgs {
    fn source_ref(&self) -> SourceRef<'_> {
        if self.from_url {
            SourceRef::Url(&self.source)
        } else {
            SourceRef::Path(Path::new(&self.source))
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the cache URL of a source under a preset, generating it if needed
    Url {
        #[command(flatten)]
        source: SourceArgs,
        preset: String,
    },
    /// Print the cache file path of a source under a preset, generating it if needed
    Path {
        #[command(flatten)]
        source: SourceArgs,
        preset: String,
    },
    /// Produce the bytes a cache URL would serve
    Serve {
        /// URL under cache_url, e.g. /cache/thumb/photos/dawn.jpg
        url: String,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete every preset's artifact for a source
    Invalidate {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Delete cached artifacts
    Flush {
        /// Only this preset
        #[arg(long)]
        preset: Option<String>,
    },
    /// Pre-generate artifacts for every source image
    Warm {
        /// Only these presets (repeatable); defaults to all
        #[arg(long = "preset")]
        presets: Vec<String>,
    },
    /// Show cached files and disk usage per preset
    Stats,
    /// Validate the config and pick an engine
    Check,
    /// Print a stock imagecache.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("imagecache=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
        command => run(command, &cli.config),
    }
}

fn run(command: Command, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(config_path)?;

    match command {
        Command::Url { source, preset } => {
            let resolver = CacheResolver::from_config(&config)?;
            let url = match source.source_ref() {
                SourceRef::Url(url) => resolver.url_for_url(url, &preset)?,
                SourceRef::Path(path) => resolver.url_for_path(path, &preset)?,
            };
            println!("{}", url);
        }
        Command::Path { source, preset } => {
            let resolver = CacheResolver::from_config(&config)?;
            let path = resolver.path_for(source.source_ref(), &preset)?;
            println!("{}", path.display());
        }
        Command::Serve { url, out } => {
            let resolver = CacheResolver::from_config(&config)?;
            let response = request::serve(&resolver, &url).map_err(|e| {
                format!("{} {}", e.class().status_code(), e)
            })?;
            tracing::info!(
                content_type = response.content_type,
                bytes = response.bytes.len(),
                outcome = ?response.outcome,
                "served"
            );
            match out {
                Some(path) => std::fs::write(path, &response.bytes)?,
                None => std::io::stdout().lock().write_all(&response.bytes)?,
            }
        }
        Command::Invalidate { source } => {
            let resolver = CacheResolver::from_config(&config)?;
            let report = resolver.invalidate(source.source_ref())?;
            output::print_invalidation(&report, resolver.layout().cache_root());
            if !report.is_complete() {
                return Err(format!("{} artifact(s) could not be removed", report.failed.len()).into());
            }
        }
        Command::Flush { preset } => {
            let resolver = CacheResolver::from_config(&config)?;
            let flushed = match &preset {
                Some(name) => resolver.flush_preset(name)?,
                None => resolver.flush_all()?,
            };
            let target = preset.as_deref().unwrap_or("cache");
            if flushed {
                println!("Flushed {}", target);
            } else {
                println!("Nothing cached for {}", target);
            }
        }
        Command::Warm { presets } => {
            init_thread_pool(&config.processing);
            let resolver = CacheResolver::from_config(&config)?;
            for name in &presets {
                if !resolver.has_preset(name) {
                    return Err(format!("Preset \"{}\" does not exist", name).into());
                }
            }
            let presets: Vec<String> = if presets.is_empty() {
                resolver.registry().names().map(str::to_string).collect()
            } else {
                presets
            };
            let sources = inventory::discover_sources(resolver.layout());
            println!(
                "==> Warming {} source(s) x {} preset(s)",
                sources.len(),
                presets.len()
            );
            let jobs: Vec<(PathBuf, String)> = sources
                .iter()
                .flat_map(|source| presets.iter().map(move |p| (source.clone(), p.clone())))
                .collect();
            let items = resolver.warm(&jobs);
            output::print_warm_output(&items, resolver.layout().static_root());
            let stats = CacheStats::from_items(&items);
            if stats.failed > 0 {
                return Err(format!("{} artifact(s) failed", stats.failed).into());
            }
        }
        Command::Stats => {
            let resolver = CacheResolver::from_config(&config)?;
            let inventory = inventory::inventory(resolver.layout(), resolver.registry());
            output::print_inventory(&inventory);
        }
        Command::Check => {
            println!("==> Checking {}", config_path.display());
            let resolver = CacheResolver::from_config(&config)?;
            println!("    Engine: {}", resolver.engine().name());
            println!("    Presets: {}", resolver.registry().len());
            if !resolver.layout().static_root().is_dir() {
                println!(
                    "    Warning: static_root {} does not exist",
                    resolver.layout().static_root().display()
                );
            }
            println!("==> Config is valid");
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
