use clap::{Parser, Subcommand, ValueEnum};
use rendition_cache::config::{self, RenderConfig};
use rendition_cache::filesystem::Filesystem;
use rendition_cache::imaging::{Pipeline, RustBackend};
use rendition_cache::responder::Responder;
use rendition_cache::srcset::{DEFAULT_SEPARATOR, SrcsetGenerator};
use rendition_cache::store::FilesystemStore;
use rendition_cache::supervisor::{Supervisor, SupervisorReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rendition-cache")]
#[command(about = "Render, expire and verify cached image renditions")]
#[command(long_about = "\
Render, expire and verify cached image renditions

Renditions are named parameter sets (size, fit, format, effects) defined in
renditions.toml. Each rendered file is stored at

  {render_path}/{rendition}/{source ext}/{source dir}/{name}.{format}

and is considered fresh while its modification time matches the source's.

Run 'rendition-cache gen-config' to generate a documented renditions.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Stop starting new work after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExpireKind {
    File,
    Rendition,
    Set,
}

#[derive(Clone, Copy, ValueEnum)]
enum PrimeKind {
    Rendition,
    Set,
    File,
}

#[derive(Subcommand)]
enum Command {
    /// Delete cached renditions of a source file, a rendition or a set
    Expire {
        kind: ExpireKind,
        /// Source path (for `file`) or rendition/set name
        name: String,
        /// Re-render each deleted file (file only)
        #[arg(long)]
        replace: bool,
    },
    /// Render missing or stale renditions
    ///
    /// `prime rendition|set <name> [paths...]` covers every image below the
    /// paths (all images when none are given). `prime file <path>
    /// [renditions...]` covers one image.
    Prime {
        kind: PrimeKind,
        name: String,
        paths: Vec<String>,
    },
    /// Reconcile the cache against the sources
    Verify {
        /// Restrict to a cache subdirectory, e.g. a rendition name
        path: Option<String>,
        /// Delete orphaned and invalid cache files
        #[arg(long)]
        remove: bool,
    },
    /// Print srcset and sizes attributes of a set for one image
    Srcset {
        set: String,
        path: String,
        /// Print the set members as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Print a stock renditions.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    let catalog = Arc::new(config.build_catalog()?);

    if let Command::Srcset { set, path, json } = &cli.command {
        let generator =
            SrcsetGenerator::new(catalog, &config.image_root(), &config.render_root());
        if *json {
            let entries = generator.entries(path, set)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else {
            println!("{}", generator.attributes(path, set, DEFAULT_SEPARATOR)?);
        }
        return Ok(());
    }

    init_thread_pool(&config.processing);
    let mut supervisor = Supervisor::new(catalog, responder(&config));
    if let Some(secs) = cli.timeout {
        supervisor = supervisor.with_timeout(Duration::from_secs(secs));
    }

    let report = match cli.command {
        Command::Expire {
            kind: ExpireKind::File,
            name,
            replace,
        } => supervisor.expire_file(&name, replace)?,
        Command::Expire {
            kind: ExpireKind::Rendition,
            name,
            ..
        } => supervisor.expire_rendition(&name)?,
        Command::Expire {
            kind: ExpireKind::Set,
            name,
            ..
        } => supervisor.expire_set(&name)?,
        Command::Prime { kind, name, paths } => match kind {
            PrimeKind::Rendition => supervisor.prime_rendition(&name, &paths)?,
            PrimeKind::Set => supervisor.prime_set(&name, &paths)?,
            PrimeKind::File => supervisor.prime_file(&name, &paths)?,
        },
        Command::Verify { path, remove } => supervisor.verify(path.as_deref(), remove)?,
        Command::Srcset { .. } | Command::GenConfig => SupervisorReport::default(),
    };

    println!("{report}");
    if report.failed > 0 {
        return Err(format!("{} renditions failed", report.failed).into());
    }
    Ok(())
}

fn responder(config: &RenderConfig) -> Responder<FilesystemStore, RustBackend> {
    let pipeline = Pipeline::new(RustBackend::new())
        .with_watermarks(Filesystem::new(config.watermark_root()))
        .with_max_image_size(config.max_image_size);
    Responder::new(
        Filesystem::new(config.image_root()),
        FilesystemStore::new(Filesystem::new(config.render_root())),
        pipeline,
    )
}

/// Log to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
