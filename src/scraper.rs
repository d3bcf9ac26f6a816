//! The scraper collaborator: everything that talks to the shop's website.
//!
//! The watcher and the catalog updater only see the [`Scraper`] trait. The
//! shipped implementation, [`CommandScraper`], delegates to an external
//! program so the HTML-parsing side can live in whatever tool suits it. The
//! program is run through `sh -c` with one of these subcommands and must
//! print JSON on stdout:
//!
//! | Invocation                 | stdin          | stdout                                             |
//! |----------------------------|----------------|----------------------------------------------------|
//! | `discover`                 | none           | `["<page url>", …]`                                |
//! | `page <url>`               | none           | `{"entries": [StampEntry…], "images": {"<name>": "<base64>"}}` |
//! | `categories`               | catalog JSON   | `{"<stamp id>": ["<category>", …], …}`             |
//! | `availability <url>…`      | none           | `{"availableStampIds": [<id>, …]}`                 |
//!
//! Every call has a timeout. A call that runs out of time is killed and may
//! be retried according to the scraper's [`RetryPolicy`]; any other failure
//! is returned immediately.

use crate::availability::AvailabilitySnapshot;
use crate::catalog::StampEntry;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a running scraper command is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("failed to run scraper: {0}")]
    Io(#[from] io::Error),
    #[error("scraper timed out after {0:?}")]
    Timeout(Duration),
    #[error("scraper exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("invalid scraper output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid image payload for {name}: {source}")]
    Image {
        name: String,
        source: base64::DecodeError,
    },
}

impl ScrapeError {
    /// Whether trying the same call again might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Timeout(_))
    }
}

/// Records and images scraped from one catalog page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageEntries {
    pub entries: Vec<StampEntry>,
    /// Image bytes keyed by path relative to the catalog directory.
    pub images: BTreeMap<String, Vec<u8>>,
}

pub trait Scraper {
    /// Every catalog page URL the shop currently lists.
    fn list_page_urls(&self) -> Result<Vec<String>, ScrapeError>;

    /// Scrape a page that is not in the catalog yet.
    fn fetch_new_page_entries(&self, url: &str) -> Result<PageEntries, ScrapeError>;

    /// Refresh the categories of `entries` in place. Returns how many
    /// entries had their category list changed.
    fn fetch_category_assignments(&self, entries: &mut [StampEntry]) -> Result<usize, ScrapeError>;

    /// Visit `urls` and record which stamps are for sale right now.
    fn fetch_availability_snapshot(&self, urls: &[String]) -> Result<AvailabilitySnapshot, ScrapeError>;
}

/// Apply scraped category lists, returning how many entries changed.
///
/// Entries missing from `assignments` keep their categories.
pub fn apply_category_assignments(
    entries: &mut [StampEntry],
    assignments: &BTreeMap<i64, Vec<String>>,
) -> usize {
    let mut updated = 0;
    for entry in entries {
        if let Some(categories) = assignments.get(&entry.id)
            && *categories != entry.categories
        {
            entry.categories = categories.clone();
            updated += 1;
        }
    }
    updated
}

/// Retry schedule for transient scraper failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, ScrapeError>,
    ) -> Result<T, ScrapeError> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    log::warn!(
                        "{what}: {e}; retrying in {:?} (attempt {attempt} of {})",
                        self.backoff,
                        self.max_attempts
                    );
                    thread::sleep(self.backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Deserialize)]
struct PageResponse {
    #[serde(default)]
    entries: Vec<StampEntry>,
    #[serde(default)]
    images: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityResponse {
    available_stamp_ids: Vec<i64>,
}

/// [`Scraper`] backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandScraper {
    command: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CommandScraper {
    pub fn new(command: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            command: command.into(),
            timeout,
            retry,
        }
    }

    fn invoke(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, ScrapeError> {
        let what = args.first().copied().unwrap_or("scraper");
        self.retry.run(what, || self.invoke_once(args, stdin))
    }

    /// Run the command once: arguments go to `"$@"`, stdout is returned.
    fn invoke_once(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, ScrapeError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$@\"", self.command))
            .arg("sh")
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are drained on their own threads so a chatty child cannot
        // block on a full pipe while we wait for it.
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let input = input.to_vec();
            thread::spawn(move || pipe.write_all(&input));
        }
        let stdout = child.stdout.take().map(read_in_background);
        let stderr = child.stderr.take().map(read_in_background);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // Already exited or unkillable; either way the call is over.
                let _ = child.kill();
                let _ = child.wait();
                return Err(ScrapeError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = join_output(stdout)?;
        if !status.success() {
            let stderr = join_output(stderr)?;
            return Err(ScrapeError::Failed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

fn read_in_background<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_output(handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::other("output reader panicked"))?,
        None => Ok(Vec::new()),
    }
}

impl Scraper for CommandScraper {
    fn list_page_urls(&self) -> Result<Vec<String>, ScrapeError> {
        let output = self.invoke(&["discover"], None)?;
        Ok(serde_json::from_slice(&output)?)
    }

    fn fetch_new_page_entries(&self, url: &str) -> Result<PageEntries, ScrapeError> {
        let output = self.invoke(&["page", url], None)?;
        let response: PageResponse = serde_json::from_slice(&output)?;
        let mut images = BTreeMap::new();
        for (name, encoded) in response.images {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|source| ScrapeError::Image {
                    name: name.clone(),
                    source,
                })?;
            images.insert(name, bytes);
        }
        Ok(PageEntries {
            entries: response.entries,
            images,
        })
    }

    fn fetch_category_assignments(&self, entries: &mut [StampEntry]) -> Result<usize, ScrapeError> {
        let catalog = serde_json::to_vec(&*entries)?;
        let output = self.invoke(&["categories"], Some(&catalog))?;
        let assignments: BTreeMap<i64, Vec<String>> = serde_json::from_slice(&output)?;
        Ok(apply_category_assignments(entries, &assignments))
    }

    fn fetch_availability_snapshot(&self, urls: &[String]) -> Result<AvailabilitySnapshot, ScrapeError> {
        let mut args = vec!["availability"];
        args.extend(urls.iter().map(String::as_str));
        let output = self.invoke(&args, None)?;
        let response: AvailabilityResponse = serde_json::from_slice(&output)?;
        Ok(AvailabilitySnapshot::new(
            response.available_stamp_ids,
            urls.to_vec(),
            chrono::Utc::now().timestamp(),
        ))
    }
}
