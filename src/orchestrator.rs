//! The watch loop: decide when the published output must be rebuilt.
//!
//! ## Working root
//!
//! ```text
//! <root>/
//! ├── repo/               # checkout of the data repository (stamps.json, images/)
//! ├── thumbnails/         # thumbnail cache (_metadata.json + <hash>.jpg)
//! ├── pages/              # assembled output, rebuilt from scratch
//! └── availability.json   # last availability snapshot
//! ```
//!
//! ## One update
//!
//! Three freshness signals are checked in order:
//!
//! 1. **Data source**: fetch the repository; did HEAD move?
//! 2. **Thumbnails**: only when (1) fired or on the first run, run the
//!    thumbnail pipeline over `repo/images`; did it change anything?
//! 3. **Availability**: unless disabled, refresh the snapshot when it is
//!    missing, expired, or was taken over a different set of catalog pages.
//!
//! The output is rebuilt (and deployed) on the first run and whenever any
//! signal fired. Any error aborts the update; the next tick starts over.
//!
//! Only one orchestrator may use a working root at a time. Nothing locks it.

use crate::assemble::{AssembleError, AssembleInputs, AssembleReport, assemble_pages};
use crate::availability::{
    AvailabilityError, AvailabilityStore, RefreshReason, ShopInfo, refresh_reason,
};
use crate::catalog::{Catalog, CatalogError};
use crate::config::{WatchConfig, effective_workers};
use crate::deploy::{DeployCommand, DeployError};
use crate::imaging::{ThumbnailBackend, ThumbnailParams};
use crate::repo::{RepoError, SourceRepo};
use crate::scraper::{ScrapeError, Scraper};
use crate::thumbnails::{
    PipelineConfig, PipelineError, PipelineReport, make_thumbnails_with_backend,
};
use crate::types::Outcome;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("data source: {0}")]
    Repo(#[from] RepoError),
    #[error("thumbnails: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("availability: {0}")]
    Availability(#[from] AvailabilityError),
    #[error("availability scraping: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("assembling output: {0}")]
    Assemble(#[from] AssembleError),
    #[error("deploy: {0}")]
    Deploy(#[from] DeployError),
    #[error("frontend directory {0} is not a directory")]
    FrontendNotDir(PathBuf),
}

/// Locations inside the working root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub root: PathBuf,
    pub repo: PathBuf,
    pub thumbnails: PathBuf,
    pub pages: PathBuf,
}

impl WorkPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            repo: root.join("repo"),
            thumbnails: root.join("thumbnails"),
            pages: root.join("pages"),
        }
    }

    /// Source images inside the data repository.
    pub fn images(&self) -> PathBuf {
        self.repo.join("images")
    }
}

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub root: PathBuf,
    pub update_interval: Duration,
    pub availability_disabled: bool,
    pub availability_ttl: Duration,
    pub shop: ShopInfo,
    pub frontend_dir: Option<PathBuf>,
    pub deploy_command: Option<String>,
    pub pipeline: PipelineConfig,
}

impl OrchestratorOptions {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            root: config.root.clone(),
            update_interval: config.update_interval(),
            availability_disabled: config.availability.disabled,
            availability_ttl: config.availability.ttl(),
            shop: config.availability.shop.clone(),
            frontend_dir: config.frontend_dir.clone(),
            deploy_command: config.deploy_command.clone(),
            pipeline: PipelineConfig {
                params: ThumbnailParams::default(),
                workers: effective_workers(&config.processing),
            },
        }
    }
}

/// Why the output was rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    FirstRun,
    DataSource,
    Thumbnails,
    Availability,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RebuildReason::FirstRun => "first run",
            RebuildReason::DataSource => "data source",
            RebuildReason::Thumbnails => "thumbnails",
            RebuildReason::Availability => "availability",
        })
    }
}

/// What one update did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Empty when nothing changed and nothing was rebuilt.
    pub reasons: Vec<RebuildReason>,
    pub thumbnails: Option<PipelineReport>,
    pub availability: Option<RefreshReason>,
    pub assembled: Option<AssembleReport>,
}

impl UpdateReport {
    pub fn rebuilt(&self) -> bool {
        self.assembled.is_some()
    }

    fn add_reason(&mut self, reason: RebuildReason) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reasons.is_empty() {
            return f.write_str("no rebuild");
        }
        let reasons: Vec<String> = self.reasons.iter().map(|r| r.to_string()).collect();
        write!(f, "rebuilt [{}]", reasons.join(", "))
    }
}

pub struct Orchestrator<R, S, B> {
    options: OrchestratorOptions,
    paths: WorkPaths,
    repo: R,
    scraper: Option<S>,
    backend: B,
    store: AvailabilityStore,
    deploy: Option<DeployCommand>,
    initialized: bool,
    /// Reasons of a failed update. They carry over until a rebuild and
    /// deploy succeed, so a signal consumed by a failed attempt is not lost.
    pending: Vec<RebuildReason>,
}

impl<R: SourceRepo, S: Scraper, B: ThumbnailBackend> Orchestrator<R, S, B> {
    /// `scraper` may be `None`, which disables availability like the config flag does.
    pub fn new(options: OrchestratorOptions, repo: R, scraper: Option<S>, backend: B) -> Self {
        let paths = WorkPaths::new(&options.root);
        let store = AvailabilityStore::in_root(&options.root);
        Self {
            options,
            paths,
            repo,
            scraper,
            backend,
            store,
            deploy: None,
            initialized: false,
            pending: Vec::new(),
        }
    }

    pub fn paths(&self) -> &WorkPaths {
        &self.paths
    }

    pub fn scraper(&self) -> Option<&S> {
        self.scraper.as_ref()
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Rebuild reasons left over from failed updates.
    pub fn pending(&self) -> &[RebuildReason] {
        &self.pending
    }

    /// Create the working directories and validate the deploy command and
    /// frontend directory.
    pub fn initialize(&mut self) -> Result<(), UpdateError> {
        for dir in [&self.paths.root, &self.paths.thumbnails, &self.paths.pages] {
            std::fs::create_dir_all(dir)?;
        }
        self.deploy = self
            .options
            .deploy_command
            .as_deref()
            .map(DeployCommand::parse)
            .transpose()?;
        if let Some(frontend) = &self.options.frontend_dir
            && !frontend.is_dir()
        {
            return Err(UpdateError::FrontendNotDir(frontend.clone()));
        }
        self.initialized = true;
        Ok(())
    }

    /// Run one update at the current time.
    pub fn update(&mut self, first_run: bool) -> Result<UpdateReport, UpdateError> {
        self.update_at(first_run, chrono::Utc::now().timestamp())
    }

    /// Run one update as if the current time were `now` (unix seconds).
    ///
    /// If the update fails, its rebuild reasons are kept and the next update
    /// rebuilds even when no new signal fires.
    pub fn update_at(&mut self, first_run: bool, now: i64) -> Result<UpdateReport, UpdateError> {
        let mut report = UpdateReport {
            reasons: std::mem::take(&mut self.pending),
            ..Default::default()
        };
        if !report.reasons.is_empty() {
            log::info!("Retrying rebuild left by a failed update [{report}]");
        }
        match self.run_update(first_run, now, &mut report) {
            Ok(()) => Ok(report),
            Err(e) => {
                self.pending = report.reasons;
                Err(e)
            }
        }
    }

    fn run_update(
        &mut self,
        first_run: bool,
        now: i64,
        report: &mut UpdateReport,
    ) -> Result<(), UpdateError> {
        if !self.initialized {
            self.initialize()?;
        }
        if first_run {
            report.add_reason(RebuildReason::FirstRun);
        }

        self.repo.ensure_cloned()?;
        log::info!("Checking for data source updates");
        if self.repo.fetch_updates()?.is_changed() {
            log::info!("New data fetched");
            report.add_reason(RebuildReason::DataSource);
        }

        // Pending data changes count too: their thumbnails may not have been
        // brought up to date.
        let data_changed = report.reasons.iter().any(|r| {
            matches!(
                r,
                RebuildReason::FirstRun | RebuildReason::DataSource | RebuildReason::Thumbnails
            )
        });
        if data_changed {
            log::info!("Updating thumbnails");
            let outcome = make_thumbnails_with_backend(
                &self.backend,
                &self.paths.images(),
                &self.paths.thumbnails,
                &self.options.pipeline,
            )?;
            if let Outcome::Changed(thumbnails) = outcome {
                log::info!("Thumbnails updated: {thumbnails}");
                report.add_reason(RebuildReason::Thumbnails);
                report.thumbnails = Some(thumbnails);
            }
        }

        let mut snapshot = self.store.load()?;
        if !self.options.availability_disabled
            && let Some(scraper) = &self.scraper
        {
            let pages = Catalog::load_from_dir(&self.paths.repo)?.pages();
            if let Some(reason) =
                refresh_reason(snapshot.as_ref(), &pages, now, self.options.availability_ttl)
            {
                log::info!("Scraping availability: {reason}");
                let urls: Vec<String> = pages.into_iter().collect();
                let fresh = scraper.fetch_availability_snapshot(&urls)?;
                self.store.save(&fresh)?;
                log::info!(
                    "{} stamp(s) available across {} page(s)",
                    fresh.available_stamp_ids.len(),
                    fresh.visited_pages.len()
                );
                snapshot = Some(fresh);
                report.availability = Some(reason);
                report.add_reason(RebuildReason::Availability);
            }
        }

        if report.reasons.is_empty() {
            log::info!("Nothing changed");
            return Ok(());
        }

        log::info!("Assembling output [{report}]");
        let shop = snapshot.map(|s| s.to_shop(&self.options.shop));
        let inputs = AssembleInputs {
            repo_dir: &self.paths.repo,
            thumbnails_dir: &self.paths.thumbnails,
            frontend_dir: self.options.frontend_dir.as_deref(),
            shop: shop.as_ref(),
        };
        report.assembled = Some(assemble_pages(&inputs, &self.paths.pages)?);

        if let Some(deploy) = &self.deploy {
            deploy.run(&self.paths.pages)?;
        }
        Ok(())
    }

    /// Initialize and run the first update. Errors here are fatal.
    pub fn start(&mut self) -> Result<UpdateReport, UpdateError> {
        self.log_options();
        self.initialize()?;
        log::info!("Doing the first update");
        self.update(true)
    }

    /// One steady-state update. Failures are logged, not returned.
    pub fn tick(&mut self) -> Option<UpdateReport> {
        match self.update(false) {
            Ok(report) => {
                log::info!("Update finished: {report}");
                Some(report)
            }
            Err(e) => {
                log::error!("Update failed: {e}");
                None
            }
        }
    }

    /// Run forever: [`start`](Self::start), then [`tick`](Self::tick) every
    /// update interval. Returns only if the first update fails.
    pub fn run_loop(&mut self) -> Result<(), UpdateError> {
        let report = self.start()?;
        log::info!("First update finished: {report}; later failures will be retried");
        loop {
            log::info!("Sleeping for {:?}", self.options.update_interval);
            std::thread::sleep(self.options.update_interval);
            self.tick();
        }
    }

    fn log_options(&self) {
        log::info!("Root: {}", self.paths.root.display());
        log::info!("Updates: every {:?}", self.options.update_interval);
        if self.options.availability_disabled || self.scraper.is_none() {
            log::info!("Availability updates: disabled");
        } else {
            log::info!("Availability updates: every {:?}", self.options.availability_ttl);
        }
        if self.options.deploy_command.is_some() {
            log::info!("Deploy command is provided");
        }
        if let Some(frontend) = &self.options.frontend_dir {
            log::info!("Frontend files are copied from {}", frontend.display());
        }
    }
}
