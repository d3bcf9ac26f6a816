use clap::{ArgAction, Parser, Subcommand};
use stamp_watch::catalog_update::{SavePolicy, UpdateOptions, update_catalog};
use stamp_watch::config::{self, ProcessingConfig, WatchConfig};
use stamp_watch::imaging::{RustBackend, ThumbnailParams};
use stamp_watch::orchestrator::{Orchestrator, OrchestratorOptions};
use stamp_watch::repo::GitRepo;
use stamp_watch::scraper::CommandScraper;
use stamp_watch::thumbnails::{PipelineConfig, make_thumbnails};
use stamp_watch::types::Outcome;
use std::path::{Path, PathBuf};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "stamp-watch")]
#[command(about = "Incremental builder for a static stamp catalog")]
#[command(long_about = "\
Incremental builder for a static stamp catalog

Mirrors a git repository holding stamps.json and images/, keeps a directory
of content-addressed JPEG thumbnails in sync with it, scrapes shop
availability, and rebuilds the published site whenever any of them change.

Working root layout:

  state/
  ├── repo/                 # Checkout of the data repository
  ├── thumbnails/           # Thumbnail cache (_metadata.json + <sha256>.jpg)
  ├── pages/                # Assembled site, rebuilt from scratch
  │   └── data/
  │       ├── stamps.json   # Catalog with image paths → thumbnails
  │       ├── shops.json    # Availability per shop
  │       └── images/       # Published thumbnails
  └── availability.json     # Last availability snapshot

Run 'stamp-watch gen-config' to generate a documented stamp-watch.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (default: ./stamp-watch.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `watch` command.
#[derive(clap::Args)]
struct WatchArgs {
    /// Working root directory
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Git URL of the data repository
    #[arg(long)]
    data_source: Option<String>,

    /// Branch of the data repository to follow
    #[arg(long)]
    data_source_branch: Option<String>,

    /// Seconds between update attempts
    #[arg(long)]
    update_interval_secs: Option<u64>,

    /// Never scrape shop availability
    #[arg(long)]
    disable_availability: bool,

    /// Directory copied into every rebuilt site
    #[arg(short, long)]
    frontend: Option<PathBuf>,

    /// Command run after every rebuild; {pages} is the output directory
    #[arg(short, long)]
    deploy_command: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the data repository and republish the site when anything changes
    Watch(WatchArgs),
    /// Bring a thumbnail directory in sync with a directory of images, once
    Thumbnails {
        /// Directory of source images
        src: PathBuf,
        /// Thumbnail directory (holds the cache metadata)
        dst: PathBuf,
        /// Maximum parallel workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Add newly listed shop pages to a catalog and refresh categories
    UpdateCatalog {
        /// Directory containing stamps.json
        dir: PathBuf,
        /// Discover and scrape pages not yet in the catalog
        #[arg(short, long)]
        new: bool,
        /// Refresh categories of every stamp
        #[arg(short, long)]
        categories: bool,
        /// When to save stamps.json: 'any' change or only when 'all' kinds changed
        #[arg(long, default_value_t = SavePolicy::AnyChange)]
        save_policy: SavePolicy,
        /// Scraper program (overrides availability.scrape_command)
        #[arg(long)]
        scrape_command: Option<String>,
    },
    /// Print a stock stamp-watch.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    stamp_watch::logging::init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Watch(args) => {
            let config = apply_watch_args(load_config(cli.config.as_deref())?, args)?;
            let options = OrchestratorOptions::from_config(&config);
            let repo = GitRepo::new(
                options.root.join("repo"),
                &config.data_source,
                &config.data_source_branch,
            );
            log::info!(
                "Data source: {} [branch {}]",
                config.data_source,
                config.data_source_branch
            );
            let scraper = config.availability.scrape_command.as_ref().map(|command| {
                CommandScraper::new(
                    command.clone(),
                    config.availability.timeout(),
                    config.availability.retry_policy(),
                )
            });
            let mut orchestrator = Orchestrator::new(options, repo, scraper, RustBackend::new());
            orchestrator.run_loop()?;
        }
        Command::Thumbnails { src, dst, workers } => {
            let config = load_config(cli.config.as_deref())?;
            let processing = ProcessingConfig {
                max_workers: workers.or(config.processing.max_workers),
            };
            let pipeline = PipelineConfig {
                params: ThumbnailParams::default(),
                workers: config::effective_workers(&processing),
            };
            match make_thumbnails(&src, &dst, &pipeline)? {
                Outcome::Unchanged => println!("Thumbnails are up to date"),
                Outcome::Changed(report) => println!("Thumbnails: {report}"),
            }
        }
        Command::UpdateCatalog {
            dir,
            new,
            categories,
            save_policy,
            scrape_command,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let Some(command) = scrape_command.or(config.availability.scrape_command.clone())
            else {
                return Err("no scraper configured: pass --scrape-command or set availability.scrape_command".into());
            };
            let scraper = CommandScraper::new(
                command,
                config.availability.timeout(),
                config.availability.retry_policy(),
            );
            let options = UpdateOptions {
                discover_new_pages: new,
                refresh_categories: categories,
                save_policy,
            };
            let report = update_catalog(&scraper, &dir, &options)?;
            println!("{report}");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the config file. An explicitly named file must exist.
fn load_config(path: Option<&Path>) -> Result<WatchConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) if !path.exists() => {
            Err(format!("config file {} not found", path.display()).into())
        }
        Some(path) => Ok(config::load_config(path)?),
        None => Ok(config::load_config(Path::new(config::CONFIG_FILENAME))?),
    }
}

/// Command-line flags win over the config file.
fn apply_watch_args(
    mut config: WatchConfig,
    args: WatchArgs,
) -> Result<WatchConfig, config::ConfigError> {
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(data_source) = args.data_source {
        config.data_source = data_source;
    }
    if let Some(branch) = args.data_source_branch {
        config.data_source_branch = branch;
    }
    if let Some(secs) = args.update_interval_secs {
        config.update_interval_secs = secs;
    }
    if args.disable_availability {
        config.availability.disabled = true;
    }
    if args.frontend.is_some() {
        config.frontend_dir = args.frontend;
    }
    if args.deploy_command.is_some() {
        config.deploy_command = args.deploy_command;
    }
    config.validate()?;
    Ok(config)
}
